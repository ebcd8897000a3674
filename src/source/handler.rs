//! Source abstraction: metadata, the `Source` trait and the handler enum.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;

use super::http::HttpSource;
use super::local::LocalSource;
use crate::error::{SourceError, ThumbnailError, TransformError};
use crate::transform::{ImageArtifact, ImageEngine, OutputFormat};

// =============================================================================
// Source Metadata
// =============================================================================

/// What a handler learned about a source without decoding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMeta {
    /// Local file holding the image bytes.
    pub path: PathBuf,
    pub valid: bool,
    pub modified: Option<SystemTime>,
    pub byte_size: u64,
    /// Normalised MIME type (`image/jpeg`, `image/png`, ...).
    pub mime_type: String,
}

impl SourceMeta {
    /// Metadata for a source that could not be resolved or read.
    pub fn invalid() -> Self {
        Self {
            path: PathBuf::new(),
            valid: false,
            modified: None,
            byte_size: 0,
            mime_type: String::new(),
        }
    }

    /// Check the metadata against the processable-size limit.
    pub fn validate(&self, src: &str, max_bytes: u64) -> Result<(), SourceError> {
        if !self.valid {
            return Err(SourceError::not_found(src));
        }
        if self.byte_size > max_bytes {
            return Err(SourceError::TooLarge {
                size: self.byte_size,
                limit: max_bytes,
            });
        }
        Ok(())
    }

    pub fn output_format(&self) -> OutputFormat {
        OutputFormat::from_mime(&self.mime_type)
    }
}

/// Normalise a MIME type: `image/jpg` becomes `image/jpeg` and a bare
/// subtype gets the `image/` prefix.
pub fn normalize_mime(mime: &str) -> String {
    let mime = mime.trim().to_ascii_lowercase();
    let mime = if mime.contains('/') {
        mime
    } else {
        format!("image/{}", mime)
    };
    if mime == "image/jpg" {
        "image/jpeg".to_string()
    } else {
        mime
    }
}

// =============================================================================
// Source Trait
// =============================================================================

/// A way of turning a source identifier into image data.
#[async_trait]
pub trait Source: Send + Sync {
    /// Handler name used in configuration rules.
    fn name(&self) -> &str;

    /// Resolve `src` and describe it. Unresolvable sources yield
    /// [`SourceMeta::invalid`] rather than an error.
    async fn read_metadata(&self, src: &str) -> Result<SourceMeta, SourceError>;

    /// Decode the image described by `meta`.
    ///
    /// Returns `Ok(None)` for invalid metadata. The default reads the local
    /// file named by `meta.path` and decodes it on the blocking pool.
    async fn read_resource(
        &self,
        meta: &SourceMeta,
        engine: Arc<dyn ImageEngine>,
    ) -> Result<Option<ImageArtifact>, ThumbnailError> {
        if !meta.valid {
            return Ok(None);
        }
        let data = tokio::fs::read(&meta.path)
            .await
            .map_err(|e| SourceError::Io(e.to_string()))?;
        let format = meta.output_format();
        let artifact = tokio::task::spawn_blocking(move || engine.decode(&data, format))
            .await
            .map_err(|e| TransformError::Engine(e.to_string()))??;
        Ok(Some(artifact))
    }
}

// =============================================================================
// Source Handler
// =============================================================================

/// The handler a resolver rule points at.
#[derive(Clone)]
pub enum SourceHandler {
    Local(Arc<LocalSource>),
    Http(Arc<HttpSource>),
    Custom(Arc<dyn Source>),
}

impl SourceHandler {
    pub fn as_source(&self) -> &dyn Source {
        match self {
            SourceHandler::Local(s) => s.as_ref(),
            SourceHandler::Http(s) => s.as_ref(),
            SourceHandler::Custom(s) => s.as_ref(),
        }
    }

    pub fn name(&self) -> &str {
        self.as_source().name()
    }

    pub async fn read_metadata(&self, src: &str) -> Result<SourceMeta, SourceError> {
        self.as_source().read_metadata(src).await
    }

    pub async fn read_resource(
        &self,
        meta: &SourceMeta,
        engine: Arc<dyn ImageEngine>,
    ) -> Result<Option<ImageArtifact>, ThumbnailError> {
        self.as_source().read_resource(meta, engine).await
    }
}

impl fmt::Debug for SourceHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SourceHandler").field(&self.name()).finish()
    }
}
