//! Shared utility modules

pub mod rate_limit;
pub mod time;

pub use rate_limit::SessionRateLimiter;
