//! Error types for the card renderer

use thiserror::Error;

/// Result type alias for render operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while prefetching, scheduling or rendering a card
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to initialize a worker or its renderer
    #[error("Initialization failed: {0}")]
    InitializationError(String),

    /// Failed to fetch a single image. Soft: the prefetcher absorbs it.
    #[error("Failed to fetch {url}: {reason}")]
    FetchError { url: String, reason: String },

    /// Build, layout or rasterization failed
    #[error("Rendering failed: {0}")]
    RenderError(String),

    /// Output encoding failed
    #[error("Encoding failed: {0}")]
    EncodeError(String),

    /// A worker could not run the unit (panicked or gone)
    #[error("Scheduling failed: {0}")]
    SchedulingError(String),

    /// The unit was canceled before a worker picked it up
    #[error("Render canceled before it started")]
    Canceled,

    /// Operation timed out
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn fetch(url: &str, reason: impl std::fmt::Display) -> Self {
        Error::FetchError {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<png::EncodingError> for Error {
    fn from(err: png::EncodingError) -> Self {
        Error::EncodeError(err.to_string())
    }
}
