//! Router configuration for the thumbnail server.
//!
//! # Route Structure
//!
//! ```text
//! /health         - Health check
//! /?src=...       - Thumbnail endpoint
//! /thumb?src=...  - Same endpoint under an explicit path
//! ```
//!
//! # Example
//!
//! ```ignore
//! use imthumb::params::RenderDefaults;
//! use imthumb::server::{create_router, RouterConfig};
//!
//! let config = RouterConfig::new()
//!     .with_cors_origins(vec!["https://example.com".to_string()]);
//!
//! let router = create_router(service, RenderDefaults::default(), config);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::time::Duration;

use axum::{routing::get, Router};
use http::header::{CONTENT_TYPE, IF_MODIFIED_SINCE};
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{health_handler, thumbnail_handler, AppState, HttpOptions};
use crate::params::RenderDefaults;
use crate::service::ThumbnailService;

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Response header policy
    pub http: HttpOptions,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl RouterConfig {
    /// Create a router configuration.
    ///
    /// By default:
    /// - CORS allows any origin
    /// - Browser cache max-age is 1 day
    /// - Informational headers are sent, debug headers are not
    /// - Tracing is enabled
    pub fn new() -> Self {
        Self {
            cors_origins: None,
            http: HttpOptions::default(),
            enable_tracing: true,
        }
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    /// Set the browser cache max-age in seconds.
    pub fn with_browser_cache_max_age(mut self, seconds: u64) -> Self {
        self.http.browser_cache_max_age = seconds;
        self
    }

    /// Suppress `X-Generator` and `X-Cache` headers.
    pub fn with_silent(mut self, silent: bool) -> Self {
        self.http.silent = silent;
        self
    }

    /// Add timing and memory headers.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.http.debug = debug;
        self
    }

    /// Enable or disable request tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the main application router.
pub fn create_router(
    service: ThumbnailService,
    defaults: RenderDefaults,
    config: RouterConfig,
) -> Router {
    let app_state = AppState::new(service, defaults).with_http_options(config.http);
    let cors = build_cors_layer(&config);

    let router = Router::new()
        .route("/", get(thumbnail_handler))
        .route("/thumb", get(thumbnail_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
        .layer(cors);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, IF_MODIFIED_SINCE])
        .max_age(Duration::from_secs(86400)); // 24 hours

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        // No origins allowed
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}
