use std::time::Duration;

use crate::settings::SETTINGS;

/// Reconnect delay policy: exponential doubling capped at a maximum, with a
/// hard attempt budget. Pure and deterministic; no timers, no randomness.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
        }
    }

    /// Delay before reconnect attempt number `attempt`:
    /// `min(base * 2^attempt, cap)`.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        // Shifting past 63 bits would wrap; everything that large caps anyway.
        let factor = 1u64 << attempt.min(32);
        let delay_ms = base_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms.min(self.cap.as_millis() as u64))
    }

    /// True once `attempt` has gone past the budget.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt > self.max_attempts
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: SETTINGS.base_backoff,
            cap: SETTINGS.cap_backoff,
            max_attempts: SETTINGS.max_attempts,
        }
    }
}
