//! Thumbnail service: the request state machine.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        ThumbnailService                          │
//! │                                                                  │
//! │  leech check ─► rate limit ─► resolve source ─► 304?             │
//! │       │              │              │             │              │
//! │   fixed GIF      fixed GIF          ▼             ▼              │
//! │                              cache lookup ──hit──► respond       │
//! │                                     │ miss                       │
//! │                                     ▼                            │
//! │                         decode ─► TransformPipeline              │
//! │                                     │                            │
//! │                                     ▼                            │
//! │                         cache write (failure logged) ─► respond  │
//! │                                                                  │
//! │  any recoverable error ─► fallback / error image (unaltered fit) │
//! │  critical error or failed recovery ─► Err                        │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use super::context::RequestContext;
use super::ratelimit::{RateLimiter, DEFAULT_RATE_EXCEEDED_MESSAGE};
use crate::cache::ArtifactCache;
use crate::error::{CacheError, CriticalError, SourceError, ThumbnailError, TransformError};
use crate::params::{Color, ParameterSet, DEFAULT_SIZE};
use crate::source::{normalize_mime, SourceResolver};
use crate::transform::{ImageEngine, OutputFormat, RenderedImage, TransformPipeline};

/// Default colour of the generated "not found" image.
pub const DEFAULT_NOT_FOUND_COLOR: Color = Color::rgb(0xff, 0x77, 0x00);

/// Default colour of the generated error image.
pub const DEFAULT_ERROR_COLOR: Color = Color::rgb(0xff, 0x00, 0x00);

/// Size of the fixed rate-limit and leech images.
const NOTICE_SIZE: (u32, u32) = (64, 16);
const RATE_LIMITED_COLOR: Color = Color::rgb(0xfc, 0x0f, 0x3e);
const LEECHING_COLOR: Color = Color::rgb(0xfd, 0x7f, 0x98);

// =============================================================================
// Configuration
// =============================================================================

/// Response policy of the service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Image served for missing, oversized or refused sources.
    pub not_found_image: Option<PathBuf>,
    /// Fill colour when no `not_found_image` is configured.
    pub not_found_color: Color,
    /// Image served for every other recoverable error.
    pub error_image: Option<PathBuf>,
    pub error_color: Color,
    /// Answer conditional requests with 304.
    pub browser_cache: bool,
    pub block_external_leechers: bool,
    pub rate_exceeded_message: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            not_found_image: None,
            not_found_color: DEFAULT_NOT_FOUND_COLOR,
            error_image: None,
            error_color: DEFAULT_ERROR_COLOR,
            browser_cache: true,
            block_external_leechers: false,
            rate_exceeded_message: DEFAULT_RATE_EXCEEDED_MESSAGE.to_string(),
        }
    }
}

impl ServiceConfig {
    pub fn with_not_found_image(mut self, path: impl Into<PathBuf>) -> Self {
        self.not_found_image = Some(path.into());
        self
    }

    pub fn with_error_image(mut self, path: impl Into<PathBuf>) -> Self {
        self.error_image = Some(path.into());
        self
    }

    pub fn with_browser_cache(mut self, enabled: bool) -> Self {
        self.browser_cache = enabled;
        self
    }

    pub fn with_leech_blocking(mut self, enabled: bool) -> Self {
        self.block_external_leechers = enabled;
        self
    }
}

// =============================================================================
// Response
// =============================================================================

/// What kind of answer the service produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseKind {
    /// The requested thumbnail.
    Rendered,
    /// The "not found" substitute. `configured` is false when it is the
    /// generated solid colour image.
    Fallback { configured: bool },
    /// The error substitute, with the message for the error header.
    ErrorImage { message: String },
    /// The client's copy is current.
    NotModified,
    RateLimited { message: String },
    Leeching,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    /// The cache was not consulted.
    Bypass,
}

#[derive(Debug, Clone)]
pub struct ThumbnailResponse {
    pub kind: ResponseKind,
    pub body: Bytes,
    pub mime_type: &'static str,
    pub cache_status: CacheStatus,
    /// When the served bytes were produced.
    pub last_modified: SystemTime,
    pub source_modified: Option<SystemTime>,
}

impl ThumbnailResponse {
    fn fixed(kind: ResponseKind, body: Bytes) -> Self {
        Self {
            kind,
            body,
            mime_type: OutputFormat::Gif.mime_type(),
            cache_status: CacheStatus::Bypass,
            last_modified: SystemTime::now(),
            source_modified: None,
        }
    }

    fn rendered(kind: ResponseKind, image: RenderedImage, cache_status: CacheStatus) -> Self {
        Self {
            kind,
            body: image.data,
            mime_type: image.mime_type,
            cache_status,
            last_modified: SystemTime::now(),
            source_modified: None,
        }
    }

    /// Whether the fixed or substitute responses must not be cached by
    /// browsers.
    pub fn is_uncacheable(&self) -> bool {
        matches!(
            self.kind,
            ResponseKind::RateLimited { .. } | ResponseKind::Leeching
        )
    }
}

// =============================================================================
// Thumbnail Service
// =============================================================================

/// Orchestrates source resolution, caching and rendering for one request.
pub struct ThumbnailService {
    resolver: SourceResolver,
    cache: Option<ArtifactCache>,
    pipeline: TransformPipeline,
    limiter: Option<Arc<dyn RateLimiter>>,
    config: ServiceConfig,
    rate_limited_image: Bytes,
    leech_image: Bytes,
}

impl ThumbnailService {
    /// Create a service without cache or rate limiter.
    ///
    /// Fails if the engine cannot produce the fixed notice images.
    pub fn new(
        resolver: SourceResolver,
        engine: Arc<dyn ImageEngine>,
    ) -> Result<Self, CriticalError> {
        let notice = |color: Color| -> Result<Bytes, CriticalError> {
            engine
                .canvas(NOTICE_SIZE.0, NOTICE_SIZE.1, color, OutputFormat::Gif)
                .and_then(|artifact| engine.encode(&artifact))
                .map(Bytes::from)
                .map_err(|e| CriticalError::Engine(e.to_string()))
        };
        let rate_limited_image = notice(RATE_LIMITED_COLOR)?;
        let leech_image = notice(LEECHING_COLOR)?;

        Ok(Self {
            resolver,
            cache: None,
            pipeline: TransformPipeline::new(engine),
            limiter: None,
            config: ServiceConfig::default(),
            rate_limited_image,
            leech_image,
        })
    }

    pub fn with_cache(mut self, cache: ArtifactCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn cache(&self) -> Option<&ArtifactCache> {
        self.cache.as_ref()
    }

    pub fn resolver(&self) -> &SourceResolver {
        &self.resolver
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn engine_name(&self) -> &str {
        self.pipeline.engine().name()
    }

    /// Serve one thumbnail request.
    ///
    /// Recoverable failures come back as `Ok` with a substitute image; only
    /// critical errors and failed recoveries are returned as `Err`.
    pub async fn handle(
        &self,
        ctx: &RequestContext,
        params: &ParameterSet,
    ) -> Result<ThumbnailResponse, ThumbnailError> {
        if self.config.block_external_leechers && ctx.has_external_referer() {
            info!(referer = ?ctx.referer, "Blocked external referer");
            return Ok(ThumbnailResponse::fixed(
                ResponseKind::Leeching,
                self.leech_image.clone(),
            ));
        }

        if let Some(limiter) = &self.limiter {
            if !limiter.check_limit(ctx) {
                warn!(client = ?ctx.client, "Rate limit exceeded");
                return Ok(ThumbnailResponse::fixed(
                    ResponseKind::RateLimited {
                        message: self.config.rate_exceeded_message.clone(),
                    },
                    self.rate_limited_image.clone(),
                ));
            }
        }

        match self.generate(ctx, params).await {
            Ok(response) => Ok(response),
            Err(err) if err.is_critical() => {
                error!(src = %params.src, error = %err, "Critical error");
                Err(err)
            }
            Err(err) => self.recover(params, err).await,
        }
    }

    async fn generate(
        &self,
        ctx: &RequestContext,
        params: &ParameterSet,
    ) -> Result<ThumbnailResponse, ThumbnailError> {
        let (handler, meta) = self.resolver.resolve(&params.src).await?;
        meta.validate(&params.src, params.max_source_bytes)?;
        let format = meta.output_format();

        if self.config.browser_cache && not_modified_since(ctx.if_modified_since, meta.modified) {
            debug!(src = %params.src, "Client copy is current");
            return Ok(ThumbnailResponse {
                kind: ResponseKind::NotModified,
                body: Bytes::new(),
                mime_type: format.mime_type(),
                cache_status: CacheStatus::Bypass,
                last_modified: meta.modified.unwrap_or_else(SystemTime::now),
                source_modified: meta.modified,
            });
        }

        if let Some((data, cached_at)) = self.cached(params, meta.modified).await {
            debug!(src = %params.src, cache = "hit", "Serving cached thumbnail");
            self.sweep_cache().await;
            return Ok(ThumbnailResponse {
                kind: ResponseKind::Rendered,
                body: data,
                mime_type: format.mime_type(),
                cache_status: CacheStatus::Hit,
                last_modified: cached_at,
                source_modified: meta.modified,
            });
        }

        let artifact = handler
            .read_resource(&meta, self.pipeline.engine().clone())
            .await?
            .ok_or_else(|| SourceError::not_found(&params.src))?;

        let pipeline = self.pipeline.clone();
        let render_params = params.clone();
        let rendered = tokio::task::spawn_blocking(move || pipeline.render(artifact, &render_params))
            .await
            .map_err(|e| TransformError::Engine(e.to_string()))??;

        let cache_status = match self.store(params, rendered.data.clone()).await {
            Some(true) => CacheStatus::Miss,
            Some(false) => {
                self.sweep_cache().await;
                CacheStatus::Miss
            }
            None => CacheStatus::Bypass,
        };
        debug!(src = %params.src, cache = "miss", "Rendered thumbnail");

        let mut response = ThumbnailResponse::rendered(ResponseKind::Rendered, rendered, cache_status);
        response.source_modified = meta.modified;
        Ok(response)
    }

    /// Cached bytes for `params` if they are at least as new as the source.
    /// Stale entries are removed. Read failures count as a miss.
    async fn cached(
        &self,
        params: &ParameterSet,
        source_modified: Option<SystemTime>,
    ) -> Option<(Bytes, SystemTime)> {
        let cache = self.cache.clone()?;
        let params = params.clone();
        let result = tokio::task::spawn_blocking(move || -> Result<_, CacheError> {
            let Some(entry) = cache.lookup(&params) else {
                return Ok(None);
            };
            if !entry.is_fresh_for(source_modified) {
                debug!(src = %params.src, "Cached thumbnail is stale");
                cache.remove(&params)?;
                return Ok(None);
            }
            Ok(cache.read(&params)?.map(|data| (data, entry.modified)))
        })
        .await;

        match result {
            Ok(Ok(hit)) => hit,
            Ok(Err(e)) => {
                warn!(error = %e, "Cache read failed, regenerating");
                None
            }
            Err(e) => {
                warn!(error = %e, "Cache lookup task failed");
                None
            }
        }
    }

    /// Write a rendered artifact. `None` without a cache, otherwise whether
    /// the write succeeded. Failures are logged and never fail the request.
    async fn store(&self, params: &ParameterSet, data: Bytes) -> Option<bool> {
        let cache = self.cache.clone()?;
        let params = params.clone();
        let result = tokio::task::spawn_blocking(move || cache.write(&params, &data)).await;
        match result {
            Ok(Ok(_)) => Some(true),
            Ok(Err(e)) => {
                warn!(error = %e, "Cache write failed, serving uncached render");
                Some(false)
            }
            Err(e) => {
                warn!(error = %e, "Cache write task failed");
                Some(false)
            }
        }
    }

    async fn sweep_cache(&self) {
        let Some(cache) = self.cache.clone() else {
            return;
        };
        match tokio::task::spawn_blocking(move || cache.sweep_expired()).await {
            Ok(Ok(Some(removed))) => info!(removed, "Swept expired cache entries"),
            Ok(Ok(None)) => {}
            Ok(Err(e)) => warn!(error = %e, "Cache sweep failed"),
            Err(e) => warn!(error = %e, "Cache sweep task failed"),
        }
    }

    /// Render the fallback or error substitute for `err`.
    ///
    /// If the substitute cannot be produced either, `err` is returned.
    async fn recover(
        &self,
        params: &ParameterSet,
        err: ThumbnailError,
    ) -> Result<ThumbnailResponse, ThumbnailError> {
        let fallback = err.is_fallback_class();
        let (image, color) = if fallback {
            (self.config.not_found_image.as_deref(), self.config.not_found_color)
        } else {
            (self.config.error_image.as_deref(), self.config.error_color)
        };

        let fit = params.unaltered_fit();
        let rendered = match self.render_substitute(image, color, &fit).await {
            Ok(rendered) => rendered,
            Err(recovery_err) => {
                error!(
                    src = %params.src,
                    error = %err,
                    recovery_error = %recovery_err,
                    "Could not render substitute image"
                );
                return Err(err);
            }
        };

        let kind = if fallback {
            warn!(src = %params.src, error = %err, "Serving not-found image");
            ResponseKind::Fallback {
                configured: image.is_some(),
            }
        } else {
            warn!(src = %params.src, error = %err, "Serving error image");
            ResponseKind::ErrorImage {
                message: err.header_message(),
            }
        };
        Ok(ThumbnailResponse::rendered(kind, rendered, CacheStatus::Bypass))
    }

    async fn render_substitute(
        &self,
        image: Option<&Path>,
        color: Color,
        params: &ParameterSet,
    ) -> Result<RenderedImage, ThumbnailError> {
        let engine = self.pipeline.engine().clone();
        let data = match image {
            Some(path) => Some(
                tokio::fs::read(path)
                    .await
                    .map_err(|e| SourceError::Io(format!("{}: {}", path.display(), e)))?,
            ),
            None => None,
        };

        let pipeline = self.pipeline.clone();
        let params = params.clone();
        let rendered = tokio::task::spawn_blocking(move || {
            let artifact = match data {
                Some(data) => {
                    let format = image::guess_format(&data)
                        .map(|f| OutputFormat::from_mime(&normalize_mime(f.to_mime_type())))
                        .map_err(|e| TransformError::Decode(e.to_string()))?;
                    engine.decode(&data, format)?
                }
                None => {
                    let (w, h) = substitute_size(&params);
                    engine.canvas(w, h, color, OutputFormat::Png)?
                }
            };
            pipeline.render(artifact, &params)
        })
        .await
        .map_err(|e| TransformError::Engine(e.to_string()))??;
        Ok(rendered)
    }
}

impl std::fmt::Debug for ThumbnailService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThumbnailService")
            .field("resolver", &self.resolver)
            .field("cache", &self.cache.as_ref().map(|c| c.directory()))
            .field("rate_limited", &self.limiter.is_some())
            .field("config", &self.config)
            .finish()
    }
}

/// Size of a generated solid-colour substitute: the requested box, with a
/// missing side copied from the other.
fn substitute_size(params: &ParameterSet) -> (u32, u32) {
    match (params.width, params.height) {
        (Some(w), Some(h)) => (w, h),
        (Some(side), None) | (None, Some(side)) => (side, side),
        (None, None) => (DEFAULT_SIZE, DEFAULT_SIZE),
    }
}

/// Whether a client holding a copy from `since` is current with respect to a
/// source modified at `modified`. HTTP dates have whole-second precision.
fn not_modified_since(since: Option<SystemTime>, modified: Option<SystemTime>) -> bool {
    let (Some(since), Some(modified)) = (since, modified) else {
        return false;
    };
    let secs = |t: SystemTime| t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).ok();
    match (secs(since), secs(modified)) {
        (Some(since), Some(modified)) => since >= modified,
        _ => false,
    }
}
