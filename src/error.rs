use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while resolving or reading a source image.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// The identifier resolves to nothing readable (missing file, escaped
    /// base directory, remote 404, unrecognised image data).
    #[error("Source image not found: {src}")]
    NotFound { src: String },

    /// The source exists but exceeds the processable size.
    #[error("Source image exceeds maximum processable size ({size} > {limit} bytes)")]
    TooLarge { size: u64, limit: u64 },

    /// A remote identifier that no configured rule allows.
    #[error("Source not permitted: {src}")]
    NotPermitted { src: String },

    /// Remote fetch failed for a reason other than "not found".
    #[error("Failed to fetch remote source: {0}")]
    Fetch(String),

    /// Local I/O failure while reading the source.
    #[error("I/O error reading source: {0}")]
    Io(String),
}

impl SourceError {
    /// Build a `NotFound` for the given identifier.
    pub fn not_found(src: impl Into<String>) -> Self {
        SourceError::NotFound { src: src.into() }
    }
}

/// Errors raised by the on-disk artifact cache.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("Cache I/O error at {path}: {message}")]
    Io { path: PathBuf, message: String },

    /// The advisory lock guarding a cache entry could not be taken.
    #[error("Could not lock cache entry {path}")]
    LockFailed { path: PathBuf },

    #[error("Cache directory {path} is not writable: {message}")]
    DirectoryNotWritable { path: PathBuf, message: String },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// Errors raised while resolving a filter chain.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    /// Neither a legacy numeric id nor a supported named operation.
    #[error("Unknown filter: {0}")]
    UnknownFilter(String),

    #[error("Invalid argument for filter {filter}: {message}")]
    InvalidArgument { filter: String, message: String },
}

/// Errors raised by the transform pipeline or the image engine.
#[derive(Debug, Clone, Error)]
pub enum TransformError {
    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    #[error("Could not read image data: {0}")]
    Decode(String),

    #[error("Could not encode image: {0}")]
    Encode(String),

    #[error("Image engine error: {0}")]
    Engine(String),

    #[error("Image of {width}x{height} is too large")]
    TooLarge { width: u32, height: u32 },
}

/// Server misconfiguration. Never recovered through a fallback image.
#[derive(Debug, Clone, Error)]
pub enum CriticalError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Cache directory error: {0}")]
    CacheDirectory(#[from] CacheError),

    #[error("Rate limiter unavailable: {0}")]
    RateLimiter(String),

    #[error("Image engine unavailable: {0}")]
    Engine(String),
}

/// Top-level error of a thumbnail request.
#[derive(Debug, Clone, Error)]
pub enum ThumbnailError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Critical(#[from] CriticalError),
}

impl ThumbnailError {
    /// Critical errors bypass every recovery path.
    pub fn is_critical(&self) -> bool {
        matches!(self, ThumbnailError::Critical(_))
    }

    /// Errors answered with the "not found" fallback image rather than the
    /// error image.
    pub fn is_fallback_class(&self) -> bool {
        matches!(
            self,
            ThumbnailError::Source(
                SourceError::NotFound { .. }
                    | SourceError::TooLarge { .. }
                    | SourceError::NotPermitted { .. }
            )
        )
    }

    /// Short message suitable for an HTTP error header.
    ///
    /// Not-permitted sources get a generic message so callers do not learn
    /// which rule rejected them.
    pub fn header_message(&self) -> String {
        let message = match self {
            ThumbnailError::Source(SourceError::NotPermitted { .. }) => {
                "Source not permitted".to_string()
            }
            ThumbnailError::Critical(_) => "Server configuration error".to_string(),
            other => other.to_string(),
        };
        // Header values must stay on one line.
        message.replace(['\r', '\n'], " ")
    }
}

impl From<FilterError> for ThumbnailError {
    fn from(err: FilterError) -> Self {
        ThumbnailError::Transform(TransformError::Filter(err))
    }
}
