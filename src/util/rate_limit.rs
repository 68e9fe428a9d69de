//! Rate limiting utilities

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter with the specified requests per second
pub fn create_limiter(requests_per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Signal rate limiter for WebSocket messages (per session)
pub const SIGNAL_RATE_LIMIT: u32 = 30; // Max 30 signals per second

/// Per-session rate limiter state
#[derive(Clone)]
pub struct SessionRateLimiter {
    signal_limiter: Arc<Limiter>,
}

impl SessionRateLimiter {
    pub fn new() -> Self {
        Self {
            signal_limiter: create_limiter(SIGNAL_RATE_LIMIT),
        }
    }

    /// Check if a signal is allowed (returns true if allowed)
    pub fn check_signal(&self) -> bool {
        self.signal_limiter.check().is_ok()
    }
}

impl Default for SessionRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
