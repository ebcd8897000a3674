//! # imthumb
//!
//! An on-demand image thumbnailing server.
//!
//! A request names a source image (a file under the base directory or an
//! allowed remote URL) plus rendering parameters. The server resizes,
//! crops, filters and re-encodes it, keeps the result in a disk cache
//! keyed by the parameters, and serves it with browser-cache headers.
//!
//! ## Architecture
//!
//! - [`params`] - Request parameters, defaults and the canonical fingerprint input
//! - [`source`] - Local, HTTP and custom source handlers behind an ordered resolver
//! - [`cache`] - On-disk artifact cache with atomic writes and expiry sweeps
//! - [`transform`] - Image engine capability and the render pipeline
//! - [`service`] - Request orchestration, fallback images and rate limiting
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use clap::Parser;
//! use imthumb::{create_router, Cli, Command};
//!
//! #[tokio::main]
//! async fn main() {
//!     let Command::Serve(config) = Cli::parse().into_command() else {
//!         return;
//!     };
//!     let service = config.build_service().expect("service");
//!     let router = create_router(service, config.render_defaults(), config.router_config());
//!
//!     let listener = tokio::net::TcpListener::bind(config.bind_address()).await.unwrap();
//!     axum::serve(listener, router).await.unwrap();
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod params;
pub mod server;
pub mod service;
pub mod source;
pub mod transform;

// Re-export commonly used types
pub use cache::{ArtifactCache, CacheConfig};
pub use config::{CheckConfig, Cli, Command, ServeConfig};
pub use error::{
    CacheError, CriticalError, FilterError, SourceError, ThumbnailError, TransformError,
};
pub use params::{ParameterSet, RenderDefaults};
pub use server::{create_router, AppState, ErrorResponse, HealthResponse, RouterConfig};
pub use service::{RequestContext, ThumbnailResponse, ThumbnailService};
pub use source::{Source, SourceHandler, SourceMeta, SourceResolver};
pub use transform::{ImageEngine, RasterEngine, TransformPipeline};
