//! cardshot
//!
//! Renders card documents (nested elements, some referencing remote images)
//! to fixed-width, auto-height PNG images.
//!
//! Rendering happens in two regimes:
//!
//! - **Prefetch**: every distinct image URL in the card is fetched
//!   concurrently into a per-call [`ImageCache`]. Failed fetches are logged and
//!   simply leave that image out.
//! - **Render**: once all fetches have settled, a single unit runs on an
//!   [`AffinityExecutor`] worker. Each worker owns its own renderer, created on
//!   that worker, so renderers never cross threads.
//!
//! # Example
//!
//! ```no_run
//! use cardshot::{Card, CardRenderer, HostStyle, RenderConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RenderConfig::default();
//! let renderer = CardRenderer::with_style(&config, HostStyle::default())?;
//!
//! let card = Card::from_json(r#"{
//!     "type": "AdaptiveCard",
//!     "body": [ { "type": "TextBlock", "text": "Hello" } ]
//! }"#)?;
//! let png = renderer.render_async(card, 480).await?;
//! std::fs::write("card.png", png.into_inner())?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub use error::{Error, Result};

pub mod card;
pub mod encode;
pub mod executor;
pub mod pipeline;
pub mod prefetch;
pub mod rendering;
pub mod style;

pub use card::Card;
pub use executor::{AffinityExecutor, CancelToken};
pub use pipeline::{render_sync, CardRenderer, RenderOptions};
pub use prefetch::{Fetcher, ImageCache, Prefetcher, PrefetchOptions};
pub use rendering::{BlockRenderer, Renderer};
pub use style::HostStyle;

/// Configuration for a [`CardRenderer`]
///
/// The defaults are conservative: one worker per processor, a 30 second
/// fetch timeout, no fetch retries and 96 DPI output.
///
/// # Examples
///
/// ```
/// let cfg = cardshot::RenderConfig::default();
/// assert_eq!(cfg.dpi, 96.0);
/// assert!(cfg.workers >= 1);
/// ```
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Number of affinity workers in the render pool
    pub workers: usize,
    /// User agent sent with image requests
    pub user_agent: String,
    /// Per-attempt image fetch timeout in milliseconds (0 => no timeout)
    pub fetch_timeout_ms: u64,
    /// Maximum concurrent image fetches per render (None => unbounded)
    pub fetch_concurrency: Option<usize>,
    /// Extra attempts for a failed image fetch
    pub fetch_retries: u32,
    /// Initial delay between fetch retries in milliseconds, doubled each retry
    pub retry_backoff_ms: u64,
    /// Output resolution in dots per inch
    pub dpi: f64,
    /// Upper bound on measured card height in pixels
    pub max_height: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get().max(1),
            user_agent: format!("cardshot/{}", env!("CARGO_PKG_VERSION")),
            fetch_timeout_ms: 30000,
            fetch_concurrency: None,
            fetch_retries: 0,
            retry_backoff_ms: 200,
            dpi: encode::DEFAULT_DPI,
            max_height: u32::MAX,
        }
    }
}

/// Width used when the caller does not pick one
pub const DEFAULT_WIDTH: u32 = 480;
