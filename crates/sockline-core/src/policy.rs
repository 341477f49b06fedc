//! Reconnect budget and backoff schedule.

use std::time::Duration;

/// How many times, and how patiently, a reconnect call retries before
/// giving up.
///
/// The schedule doubles from `base_delay` and is capped at `max_delay`.
/// No jitter: harness runs must be reproducible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts allowed per reconnect call.
    pub max_attempts: u32,
    /// Delay before the first attempt.
    pub base_delay: Duration,
    /// Ceiling on the backoff schedule.
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(25),
            max_delay: Duration::from_millis(400),
        }
    }
}

impl ReconnectPolicy {
    /// Backoff applied before `attempt` (1-based): `base_delay * 2^(attempt-1)`,
    /// capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // Shift cap keeps the multiplier in u32 range
        let shift = attempt.saturating_sub(1).min(20);
        let delay = self.base_delay.saturating_mul(1u32 << shift);
        delay.min(self.max_delay)
    }
}
