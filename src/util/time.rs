//! Time utilities for match orchestration

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Tick rate configuration
pub const ENGINE_TPS: u32 = 10; // 10 orchestration ticks per second
pub const TICK_DURATION_MICROS: u64 = 1_000_000 / ENGINE_TPS as u64;

/// Delta time between engine ticks (in seconds)
pub fn tick_delta() -> f32 {
    1.0 / ENGINE_TPS as f32
}
