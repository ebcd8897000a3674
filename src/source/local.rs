//! Local filesystem source confined to a base directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tracing::debug;

use super::handler::{normalize_mime, Source, SourceMeta};
use crate::error::SourceError;

/// Bytes read from the head of a file to recognise its format.
const SNIFF_LEN: u64 = 64;

/// Serves images from below a base directory.
///
/// Identifiers are joined onto the base directory unless they already start
/// with it; after canonicalisation the result must still lie inside the
/// base directory, so `..` segments and symlinks cannot escape it.
#[derive(Debug, Clone)]
pub struct LocalSource {
    base_dir: PathBuf,
}

impl LocalSource {
    /// Create a source rooted at `base_dir`, which must exist.
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self, SourceError> {
        let base_dir = std::fs::canonicalize(base_dir.as_ref()).map_err(|e| {
            SourceError::Io(format!(
                "base directory {}: {}",
                base_dir.as_ref().display(),
                e
            ))
        })?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Canonical path for `src`, or `None` if it does not exist or lies
    /// outside the base directory.
    pub async fn resolve_path(&self, src: &str) -> Option<PathBuf> {
        let src = src.trim();
        if src.is_empty() {
            return None;
        }
        let requested = Path::new(src);
        let candidate = if requested.starts_with(&self.base_dir) {
            requested.to_path_buf()
        } else {
            self.base_dir.join(src.trim_start_matches(['/', '\\']))
        };
        let canonical = tokio::fs::canonicalize(&candidate).await.ok()?;
        canonical.starts_with(&self.base_dir).then_some(canonical)
    }

    /// Describe a file that is already known to be local.
    pub(crate) async fn metadata_for_path(&self, path: &Path) -> Result<SourceMeta, SourceError> {
        let Ok(canonical) = tokio::fs::canonicalize(path).await else {
            return Ok(SourceMeta::invalid());
        };
        if !canonical.starts_with(&self.base_dir) {
            debug!(path = %path.display(), "Path outside base directory");
            return Ok(SourceMeta::invalid());
        }
        describe(canonical).await
    }
}

async fn describe(path: PathBuf) -> Result<SourceMeta, SourceError> {
    let metadata = match tokio::fs::metadata(&path).await {
        Ok(m) if m.is_file() => m,
        _ => return Ok(SourceMeta::invalid()),
    };

    let mut head = Vec::with_capacity(SNIFF_LEN as usize);
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| SourceError::Io(e.to_string()))?;
    file.take(SNIFF_LEN)
        .read_to_end(&mut head)
        .await
        .map_err(|e| SourceError::Io(e.to_string()))?;

    let Ok(format) = image::guess_format(&head) else {
        debug!(path = %path.display(), "Not a recognised image");
        return Ok(SourceMeta::invalid());
    };

    Ok(SourceMeta {
        modified: metadata.modified().ok(),
        byte_size: metadata.len(),
        mime_type: normalize_mime(format.to_mime_type()),
        valid: true,
        path,
    })
}

#[async_trait]
impl Source for LocalSource {
    fn name(&self) -> &str {
        "local"
    }

    async fn read_metadata(&self, src: &str) -> Result<SourceMeta, SourceError> {
        match self.resolve_path(src).await {
            Some(path) => describe(path).await,
            None => {
                debug!(src, "Local source not resolvable");
                Ok(SourceMeta::invalid())
            }
        }
    }
}
