//! Rate limiting.
//!
//! The service asks a [`RateLimiter`] before doing any work. The bundled
//! [`KeyedRateLimiter`] is a per-client token bucket from `governor`.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use governor::{DefaultKeyedRateLimiter, Quota};

use super::context::RequestContext;
use crate::error::CriticalError;

/// Default number of requests allowed per window.
pub const DEFAULT_RATE_LIMIT_REQUESTS: u32 = 8;

/// Default rate limit window.
pub const DEFAULT_RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(20);

/// Default message sent with a rate-limited response.
pub const DEFAULT_RATE_EXCEEDED_MESSAGE: &str = "Rate limit exceeded. Please wait before requesting more images.";

/// Client key used when the request carries no address.
const ANONYMOUS_CLIENT: &str = "anonymous";

/// Idle client keys are dropped every this many checks.
const PRUNE_EVERY: u64 = 1024;

/// Decides whether a request may proceed.
pub trait RateLimiter: Send + Sync {
    /// `true` lets the request through.
    fn check_limit(&self, ctx: &RequestContext) -> bool;
}

/// Token bucket per client key.
///
/// `requests` tokens are available at once and refill evenly over
/// `interval`. Keys whose bucket has refilled completely carry no state and
/// are pruned periodically, so spoofed client addresses cannot grow the
/// store without bound.
pub struct KeyedRateLimiter {
    limiter: DefaultKeyedRateLimiter<String>,
    requests: u32,
    interval: Duration,
    checks: AtomicU64,
}

impl KeyedRateLimiter {
    pub fn new(requests: u32, interval: Duration) -> Result<Self, CriticalError> {
        let burst = NonZeroU32::new(requests).ok_or_else(|| {
            CriticalError::RateLimiter("request allowance must be positive".to_string())
        })?;
        let quota = Quota::with_period(interval / requests)
            .ok_or_else(|| CriticalError::RateLimiter("window must be positive".to_string()))?
            .allow_burst(burst);

        Ok(Self {
            limiter: governor::RateLimiter::keyed(quota),
            requests,
            interval,
            checks: AtomicU64::new(0),
        })
    }

    /// Drop client keys that are no longer limited.
    pub fn prune(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }

    /// Number of client keys currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.limiter.len()
    }

    pub fn requests(&self) -> u32 {
        self.requests
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl RateLimiter for KeyedRateLimiter {
    fn check_limit(&self, ctx: &RequestContext) -> bool {
        if self.checks.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.prune();
        }
        let key = ctx.client.as_deref().unwrap_or(ANONYMOUS_CLIENT).to_string();
        self.limiter.check_key(&key).is_ok()
    }
}

impl std::fmt::Debug for KeyedRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedRateLimiter")
            .field("requests", &self.requests)
            .field("interval", &self.interval)
            .finish()
    }
}
