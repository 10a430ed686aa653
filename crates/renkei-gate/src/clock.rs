//! Wall-clock capability.

use chrono::Utc;

/// Source of "now" in epoch milliseconds. Injected so timings and
/// timestamps are deterministic under test.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Production clock backed by `chrono::Utc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Milliseconds elapsed between two readings, clamped at zero so a clock
/// stepping backwards never yields a negative timing.
pub fn elapsed_ms(start: i64, end: i64) -> u64 {
    u64::try_from(end.saturating_sub(start)).unwrap_or(0)
}
