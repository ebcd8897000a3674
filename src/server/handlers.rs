//! HTTP request handlers.
//!
//! # Endpoints
//!
//! - `GET /?src=...&w=...` and `GET /thumb?src=...` - Serve a thumbnail
//! - `GET /health` - Health check endpoint

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    body::Body,
    extract::{ConnectInfo, Query, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::error::{SourceError, ThumbnailError};
use crate::params::{ParameterSet, RenderDefaults};
use crate::service::{CacheStatus, RequestContext, ResponseKind, ThumbnailResponse, ThumbnailService};

/// Header carrying a short error description.
pub const ERROR_HEADER: &str = "x-imthumb-error";

/// Default browser cache lifetime (1 day).
pub const DEFAULT_BROWSER_CACHE_MAX_AGE: u64 = 86_400;

// =============================================================================
// Application State
// =============================================================================

/// Header policy of the HTTP layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpOptions {
    /// `Cache-Control: max-age` when browser caching is enabled.
    pub browser_cache_max_age: u64,
    /// Omit `X-Generator` and `X-Cache` headers.
    pub silent: bool,
    /// Add timing and memory headers.
    pub debug: bool,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            browser_cache_max_age: DEFAULT_BROWSER_CACHE_MAX_AGE,
            silent: false,
            debug: false,
        }
    }
}

/// Shared application state passed to handlers via Axum's State extractor.
pub struct AppState {
    pub service: Arc<ThumbnailService>,

    /// Defaults merged into every query.
    pub defaults: Arc<RenderDefaults>,

    pub http: HttpOptions,
}

impl AppState {
    pub fn new(service: ThumbnailService, defaults: RenderDefaults) -> Self {
        Self {
            service: Arc::new(service),
            defaults: Arc::new(defaults),
            http: HttpOptions::default(),
        }
    }

    pub fn with_http_options(mut self, http: HttpOptions) -> Self {
        self.http = http;
        self
    }
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            defaults: Arc::clone(&self.defaults),
            http: self.http,
        }
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned when no image could be produced.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "configuration_error")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Errors that escaped recovery. Always 500: the service only lets critical
/// errors and failed recoveries through.
impl IntoResponse for ThumbnailError {
    fn into_response(self) -> Response {
        let status = StatusCode::INTERNAL_SERVER_ERROR;
        let error_type = match &self {
            ThumbnailError::Critical(_) => "configuration_error",
            ThumbnailError::Source(SourceError::NotFound { .. }) => "not_found",
            ThumbnailError::Source(_) => "source_error",
            ThumbnailError::Transform(_) => "transform_error",
            ThumbnailError::Cache(_) => "cache_error",
        };
        let message = self.header_message();

        error!(
            error_type = error_type,
            status = status.as_u16(),
            "Server error: {}",
            self
        );

        let mut response = (
            status,
            Json(ErrorResponse::with_status(error_type, message.clone(), status)),
        )
            .into_response();
        if let Ok(value) = HeaderValue::from_str(&message) {
            response
                .headers_mut()
                .insert(HeaderName::from_static(ERROR_HEADER), value);
        }
        response
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle thumbnail requests.
///
/// # Endpoint
///
/// `GET /?src={path-or-url}&w=&h=&q=&a=&zc=&s=&cc=&ct=&cr=&f=&p=`
///
/// # Response
///
/// - `200 OK`: the thumbnail, a configured not-found image, or a fixed
///   rate-limit / leech notice
/// - `304 Not Modified`: `If-Modified-Since` is at or after the source mtime
/// - `404 Not Found`: source invalid, generated not-found image in the body
/// - `500 Internal Server Error`: error image in the body, or a JSON error
///   when nothing could be rendered; `X-ImThumb-Error` carries the message
pub async fn thumbnail_handler(
    State(state): State<AppState>,
    Query(query): Query<Vec<(String, String)>>,
    request: Request,
) -> Result<Response, ThumbnailError> {
    let params = ParameterSet::from_pairs(query, &state.defaults);
    let ctx = request_context(&request);
    debug!(src = %params.src, "Thumbnail request");

    let response = state.service.handle(&ctx, &params).await?;
    Ok(build_response(&state, &ctx, response))
}

/// Handle health check requests.
///
/// `GET /health` → `{"status": "healthy", "version": "0.1.0"}`
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// =============================================================================
// Request Context
// =============================================================================

fn request_context(request: &Request) -> RequestContext {
    let headers = request.headers();
    let mut ctx = RequestContext::new();

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    if let Some(client) = client_ip(headers).or(peer) {
        ctx = ctx.with_client(client);
    }
    if let Some(since) = header_str(headers, header::IF_MODIFIED_SINCE).and_then(parse_http_time) {
        ctx = ctx.with_if_modified_since(since);
    }
    if let Some(referer) = header_str(headers, header::REFERER) {
        ctx = ctx.with_referer(referer);
    }
    if let Some(host) = header_str(headers, header::HOST) {
        ctx = ctx.with_host(host);
    }
    ctx
}

fn header_str(headers: &HeaderMap, name: HeaderName) -> Option<&str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Client address as reported by a proxy, if any.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = header_str(headers, HeaderName::from_static("x-forwarded-for")) {
        if let Some(first) = forwarded.split(',').next().map(str::trim) {
            if !first.is_empty() {
                return Some(first.to_string());
            }
        }
    }
    header_str(headers, HeaderName::from_static("x-real-ip")).map(str::to_string)
}

/// Parse an HTTP date or a bare Unix timestamp. Timestamps the platform
/// cannot represent are treated as unparseable.
pub fn parse_http_time(value: &str) -> Option<SystemTime> {
    if let Ok(secs) = value.parse::<u64>() {
        return UNIX_EPOCH.checked_add(Duration::from_secs(secs));
    }
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| SystemTime::from(dt.with_timezone(&Utc)))
}

/// Format a timestamp as an HTTP date.
pub fn format_http_time(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

// =============================================================================
// Response Headers
// =============================================================================

fn build_response(state: &AppState, ctx: &RequestContext, thumb: ThumbnailResponse) -> Response {
    let status = match &thumb.kind {
        ResponseKind::Rendered
        | ResponseKind::Fallback { configured: true }
        | ResponseKind::RateLimited { .. }
        | ResponseKind::Leeching => StatusCode::OK,
        ResponseKind::Fallback { configured: false } => StatusCode::NOT_FOUND,
        ResponseKind::ErrorImage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        ResponseKind::NotModified => StatusCode::NOT_MODIFIED,
    };

    let mut headers = HeaderMap::new();
    let now = SystemTime::now();

    if thumb.is_uncacheable() {
        insert_content_headers(&mut headers, &thumb);
        insert_no_store(&mut headers, now);
        if let ResponseKind::RateLimited { message } = &thumb.kind {
            insert(&mut headers, HeaderName::from_static(ERROR_HEADER), message);
        }
        return finish(status, headers, thumb.body);
    }

    if thumb.kind != ResponseKind::NotModified {
        if let ResponseKind::ErrorImage { message } = &thumb.kind {
            insert(&mut headers, HeaderName::from_static(ERROR_HEADER), message);
        }
        insert_content_headers(&mut headers, &thumb);
        insert(&mut headers, header::ACCEPT_RANGES, "none");
        insert(
            &mut headers,
            header::LAST_MODIFIED,
            &format_http_time(thumb.last_modified),
        );

        if state.service.config().browser_cache {
            let max_age = state.http.browser_cache_max_age;
            insert(
                &mut headers,
                header::CACHE_CONTROL,
                &format!("max-age={}, must-revalidate", max_age),
            );
            insert(
                &mut headers,
                header::EXPIRES,
                &format_http_time(now + Duration::from_secs(max_age)),
            );
        } else {
            insert_no_store(&mut headers, now);
        }
    }

    if !state.http.silent {
        insert(
            &mut headers,
            HeaderName::from_static("x-generator"),
            &format!(
                "ImThumb v{}; {}",
                env!("CARGO_PKG_VERSION"),
                state.service.engine_name()
            ),
        );
        let cache = match thumb.cache_status {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss | CacheStatus::Bypass => "MISS",
        };
        insert(&mut headers, HeaderName::from_static("x-cache"), cache);
        insert(&mut headers, HeaderName::from_static("x-img-cache"), cache);

        if state.http.debug {
            insert_debug_headers(&mut headers, ctx);
        }
    }

    finish(status, headers, thumb.body)
}

fn insert_content_headers(headers: &mut HeaderMap, thumb: &ThumbnailResponse) {
    insert(headers, header::CONTENT_TYPE, thumb.mime_type);
    // Counted on the bytes actually sent.
    insert(headers, header::CONTENT_LENGTH, &thumb.body.len().to_string());
}

fn insert_no_store(headers: &mut HeaderMap, now: SystemTime) {
    insert(
        headers,
        header::CACHE_CONTROL,
        "no-store, no-cache, must-revalidate, max-age=0",
    );
    insert(headers, header::PRAGMA, "no-cache");
    insert(headers, header::EXPIRES, &format_http_time(now));
}

fn insert_debug_headers(headers: &mut HeaderMap, ctx: &RequestContext) {
    let usage = ctx.usage();
    insert(
        headers,
        HeaderName::from_static("x-generated-in"),
        &format!("{:.6}s", usage.elapsed.as_secs_f64()),
    );
    if let Some(bytes) = usage.peak_memory_bytes {
        insert(
            headers,
            HeaderName::from_static("x-memory-peak"),
            &format!("{:.3}KB", bytes as f64 / 1024.0),
        );
    }
    if let Some(cpu) = usage.cpu_percent {
        insert(
            headers,
            HeaderName::from_static("x-cpu-utilisation"),
            &format!("{:.2}%", cpu),
        );
    }
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => warn!(header = %name, "Dropping header with invalid value"),
    }
}

fn finish(status: StatusCode, headers: HeaderMap, body: bytes::Bytes) -> Response {
    let mut response = Body::from(body).into_response();
    *response.status_mut() = status;
    response.headers_mut().extend(headers);
    response
}
