//! Remote source: downloads into the cache directory, then reads locally.
//!
//! A fetched file is keyed by the url-encoded source identifier and is never
//! refetched while it exists on disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::handler::{Source, SourceMeta};
use super::local::LocalSource;
use crate::error::SourceError;

/// Default timeout for one remote request.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(20);

/// Default wait before a failed URL is fetched again.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(3600);

const USER_AGENT: &str = concat!("imthumb/", env!("CARGO_PKG_VERSION"));
const MAX_REDIRECTS: usize = 10;
const DOWNLOAD_PREFIX: &str = "imthumb_tmpimg_";

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    /// Where downloads are stored (normally the cache directory).
    pub download_dir: PathBuf,
    /// Transfers larger than this are aborted.
    pub max_bytes: u64,
    pub timeout: Duration,
    pub retry_interval: Duration,
}

impl HttpSourceConfig {
    pub fn new(download_dir: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            download_dir: download_dir.into(),
            max_bytes,
            timeout: DEFAULT_FETCH_TIMEOUT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }
}

// =============================================================================
// HTTP Source
// =============================================================================

pub struct HttpSource {
    client: reqwest::Client,
    config: HttpSourceConfig,
    local: LocalSource,
    /// Last failed fetch per source identifier.
    failures: Mutex<HashMap<String, Instant>>,
}

impl HttpSource {
    pub fn new(config: HttpSourceConfig) -> Result<Self, SourceError> {
        std::fs::create_dir_all(&config.download_dir).map_err(|e| {
            SourceError::Io(format!(
                "download directory {}: {}",
                config.download_dir.display(),
                e
            ))
        })?;
        let local = LocalSource::new(&config.download_dir)?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SourceError::Fetch(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            local,
            failures: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &HttpSourceConfig {
        &self.config
    }

    /// Where the download of `src` lives.
    pub fn local_path(&self, src: &str) -> PathBuf {
        self.local
            .base_dir()
            .join(urlencoding::encode(src).into_owned())
    }

    fn recently_failed(&self, src: &str) -> bool {
        let failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        failures
            .get(src)
            .is_some_and(|at| at.elapsed() < self.config.retry_interval)
    }

    /// Remember a failed fetch. Entries older than the retry interval no
    /// longer block anything and are dropped here.
    fn record_failure(&self, src: &str) {
        let retry_interval = self.config.retry_interval;
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        failures.retain(|_, at| at.elapsed() < retry_interval);
        failures.insert(src.to_string(), Instant::now());
    }

    #[cfg(test)]
    fn tracked_failures(&self) -> usize {
        self.failures.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn clear_failure(&self, src: &str) {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        failures.remove(src);
    }

    /// Download `src` into `dest`, streaming through a temp file that is
    /// renamed into place only once the transfer completed within limits.
    async fn fetch(&self, src: &str, dest: &Path) -> Result<u64, SourceError> {
        let url = src.replace(' ', "%20");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SourceError::Fetch(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(SourceError::not_found(src));
        }
        if !status.is_success() {
            return Err(SourceError::Fetch(format!("HTTP {} for {}", status.as_u16(), src)));
        }
        if let Some(len) = response.content_length() {
            if len > self.config.max_bytes {
                return Err(SourceError::TooLarge {
                    size: len,
                    limit: self.config.max_bytes,
                });
            }
        }

        let temp = tempfile::Builder::new()
            .prefix(DOWNLOAD_PREFIX)
            .tempfile_in(self.local.base_dir())
            .map_err(|e| SourceError::Io(e.to_string()))?;
        let (file, temp_path) = temp.into_parts();
        let mut file = tokio::fs::File::from_std(file);

        let mut response = response;
        let mut total: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| SourceError::Fetch(e.to_string()))?
        {
            total = total.saturating_add(chunk.len() as u64);
            if total > self.config.max_bytes {
                // Dropping temp_path removes the partial download.
                return Err(SourceError::TooLarge {
                    size: total,
                    limit: self.config.max_bytes,
                });
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| SourceError::Io(e.to_string()))?;
        }
        file.flush()
            .await
            .map_err(|e| SourceError::Io(e.to_string()))?;
        drop(file);

        temp_path
            .persist(dest)
            .map_err(|e| SourceError::Io(e.error.to_string()))?;
        Ok(total)
    }
}

#[async_trait]
impl Source for HttpSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn read_metadata(&self, src: &str) -> Result<SourceMeta, SourceError> {
        let path = self.local_path(src);
        let exists = tokio::fs::try_exists(&path).await.unwrap_or(false);

        if !exists {
            if self.recently_failed(src) {
                debug!(src, "Skipping remote fetch inside retry window");
                return Err(SourceError::Fetch(format!(
                    "recent fetch of {} failed, retry later",
                    src
                )));
            }

            match self.fetch(src, &path).await {
                Ok(bytes) => {
                    info!(src, bytes, "Fetched remote source");
                    self.clear_failure(src);
                }
                Err(err) => {
                    if matches!(err, SourceError::Fetch(_) | SourceError::Io(_)) {
                        self.record_failure(src);
                    }
                    warn!(src, error = %err, "Remote fetch failed");
                    return Err(err);
                }
            }
        }

        self.local.metadata_for_path(&path).await
    }
}

impl std::fmt::Debug for HttpSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSource")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
