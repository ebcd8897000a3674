//! HTTP server layer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │              GET /?src=...&w=...&h=...&zc=...                   │
//! │                                                                 │
//! │  ┌──────────────────────────┐  ┌─────────────────────────────┐  │
//! │  │        handlers          │  │          routes             │  │
//! │  │ (query → service → hdrs) │  │  (router, CORS, tracing)    │  │
//! │  └──────────────────────────┘  └─────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{
    format_http_time, health_handler, parse_http_time, thumbnail_handler, AppState,
    ErrorResponse, HealthResponse, HttpOptions, DEFAULT_BROWSER_CACHE_MAX_AGE, ERROR_HEADER,
};
pub use routes::{create_router, RouterConfig};
