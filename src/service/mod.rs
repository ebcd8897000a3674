//! Request orchestration.
//!
//! - [`ThumbnailService`]: the request state machine tying sources, cache and
//!   pipeline together, including fallback and error recovery
//! - [`RequestContext`]: per-request facts and timing
//! - [`RateLimiter`]: the admission check consulted before any work

mod context;
mod ratelimit;
mod thumbnail;

pub use context::{RequestContext, ResourceUsage};
pub use ratelimit::{
    KeyedRateLimiter, RateLimiter, DEFAULT_RATE_EXCEEDED_MESSAGE, DEFAULT_RATE_LIMIT_INTERVAL,
    DEFAULT_RATE_LIMIT_REQUESTS,
};
pub use thumbnail::{
    CacheStatus, ResponseKind, ServiceConfig, ThumbnailResponse, ThumbnailService,
    DEFAULT_ERROR_COLOR, DEFAULT_NOT_FOUND_COLOR,
};
