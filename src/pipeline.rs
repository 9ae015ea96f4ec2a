//! Render pipeline: prefetch images, then build, measure, rasterize and encode
//! on an affinity worker.
//!
//! Two entry points:
//! - [`CardRenderer::render_async`] prefetches every image concurrently, waits
//!   for all fetches to settle, then runs one render unit on the executor.
//! - [`render_sync`] renders inline with a renderer the caller already owns,
//!   for hosts that manage thread affinity themselves. No prefetch happens;
//!   only inline `data:` images are painted.

use crate::card::Card;
use crate::encode::encode_png;
use crate::executor::{current_worker, AffinityExecutor, CancelToken};
use crate::prefetch::{default_fetcher, inline_images, Prefetcher, PrefetchOptions};
use crate::rendering::{BlockRenderer, ImageResolver, Renderer};
use crate::style::HostStyle;
use crate::{Error, RenderConfig, Result};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Output settings applied inside the render unit
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    /// Resolution written into the PNG
    pub dpi: f64,
    /// Upper bound passed to `measure`; the bitmap is cut to the natural height
    pub max_height: u32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self::from(&RenderConfig::default())
    }
}

impl From<&RenderConfig> for RenderOptions {
    fn from(config: &RenderConfig) -> Self {
        Self {
            dpi: config.dpi,
            max_height: config.max_height,
        }
    }
}

/// Render `card` inline on the current thread without fetching images.
/// `data:` images are decoded in place; remote references fall back to the
/// renderer's missing-image handling.
pub fn render_sync<R: Renderer>(
    renderer: &mut R,
    card: &Card,
    width: u32,
    options: &RenderOptions,
) -> Result<Cursor<Vec<u8>>> {
    check_width(width)?;
    render_with_images(renderer, card, width, &inline_images, options)
}

/// Build, measure at `width` with unbounded height, rasterize at the natural
/// height and encode. Images resolve through `images` only.
pub fn render_with_images<R: Renderer>(
    renderer: &mut R,
    card: &Card,
    width: u32,
    images: &dyn ImageResolver,
    options: &RenderOptions,
) -> Result<Cursor<Vec<u8>>> {
    let visual = renderer.build(card, images).map_err(render_failure)?;
    let size = renderer
        .measure(&visual, width, options.max_height)
        .map_err(render_failure)?;
    let height = size.height.max(1);
    let bitmap = renderer.rasterize(&visual, width, height).map_err(render_failure)?;
    encode_png(&bitmap, options.dpi).map_err(encode_failure)
}

fn check_width(width: u32) -> Result<()> {
    if width == 0 {
        return Err(Error::ConfigError("render width must be positive".into()));
    }
    Ok(())
}

fn render_failure(err: Error) -> Error {
    match err {
        Error::RenderError(_) => err,
        other => Error::RenderError(other.to_string()),
    }
}

fn encode_failure(err: Error) -> Error {
    match err {
        Error::EncodeError(_) => err,
        other => Error::EncodeError(other.to_string()),
    }
}

/// Card-to-PNG renderer backed by a shared pool of affinity workers.
///
/// Cheap to clone; clones share the pool.
pub struct CardRenderer<R> {
    executor: Arc<AffinityExecutor<R>>,
    prefetcher: Prefetcher,
    options: RenderOptions,
}

impl<R> Clone for CardRenderer<R> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            prefetcher: self.prefetcher.clone(),
            options: self.options.clone(),
        }
    }
}

impl<R: Renderer + 'static> CardRenderer<R> {
    pub fn new(executor: Arc<AffinityExecutor<R>>, prefetcher: Prefetcher, options: RenderOptions) -> Self {
        Self {
            executor,
            prefetcher,
            options,
        }
    }

    pub fn executor(&self) -> &Arc<AffinityExecutor<R>> {
        &self.executor
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    /// Inline render with a caller-owned renderer; see [`render_sync`].
    pub fn render_sync(&self, renderer: &mut R, card: &Card, width: u32) -> Result<Cursor<Vec<u8>>> {
        render_sync(renderer, card, width, &self.options)
    }

    /// Prefetch all images, then render on an affinity worker. The calling
    /// task is suspended, never blocked.
    pub async fn render_async(&self, card: impl Into<Arc<Card>>, width: u32) -> Result<Cursor<Vec<u8>>> {
        self.render_async_with_cancel(card, width, CancelToken::new()).await
    }

    /// Like [`render_async`](Self::render_async); canceling `cancel` before a
    /// worker starts the unit abandons the render with [`Error::Canceled`].
    pub async fn render_async_with_cancel(
        &self,
        card: impl Into<Arc<Card>>,
        width: u32,
        cancel: CancelToken,
    ) -> Result<Cursor<Vec<u8>>> {
        check_width(width)?;
        let card = card.into();
        let started = Instant::now();

        let images = self.prefetcher.prefetch(&card).await;
        log::debug!(
            "prefetched {} image(s) in {:?}",
            images.len(),
            started.elapsed()
        );
        if cancel.is_canceled() {
            return Err(Error::Canceled);
        }

        let options = self.options.clone();
        let stream = self
            .executor
            .submit_with_cancel(
                move |renderer: &mut R| {
                    log::debug!("rendering card at width {} on worker {:?}", width, current_worker());
                    let lookup = move |url: &str| images.get(url);
                    render_with_images(renderer, &card, width, &lookup, &options)
                },
                cancel,
            )
            .await?;

        log::debug!("card rendered in {:?}", started.elapsed());
        Ok(stream)
    }
}

impl CardRenderer<BlockRenderer> {
    /// Pool of block renderers sharing `style`; each worker gets its own copy.
    pub fn with_style(config: &RenderConfig, style: HostStyle) -> Result<Self> {
        style.validate()?;
        let executor = AffinityExecutor::new(config.workers, move |_| Ok(BlockRenderer::new(style.clone())))?;
        Self::with_executor(config, executor)
    }

    /// Pool of block renderers whose style is loaded from `path` on each
    /// worker as it starts.
    pub fn with_style_path(config: &RenderConfig, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let executor = AffinityExecutor::new(config.workers, move |idx| {
            log::debug!("worker {} loading style from {}", idx, path.display());
            BlockRenderer::from_style_path(&path)
        })?;
        Self::with_executor(config, executor)
    }

    fn with_executor(config: &RenderConfig, executor: AffinityExecutor<BlockRenderer>) -> Result<Self> {
        let prefetcher = Prefetcher::new(default_fetcher(config)?, PrefetchOptions::from(config));
        Ok(Self::new(Arc::new(executor), prefetcher, RenderOptions::from(config)))
    }
}
