//! Retry delay policy.

use std::time::Duration;

use crate::defaults;

/// Exponential backoff: `base * 2^(attempts - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(defaults::JOB_BACKOFF_BASE_SECS),
            max: Duration::from_secs(defaults::JOB_BACKOFF_MAX_SECS),
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before the next run after `attempts` failed attempts.
    pub fn delay(&self, attempts: i32) -> Duration {
        backoff_delay(attempts, self.base, self.max)
    }

    /// Same as [`delay`](Self::delay), as a chrono duration for timestamp math.
    pub fn delay_chrono(&self, attempts: i32) -> chrono::Duration {
        chrono::Duration::from_std(self.delay(attempts))
            .unwrap_or_else(|_| chrono::Duration::weeks(52))
    }
}

/// Pure backoff function. `attempts <= 1` yields `base`; the result never exceeds `max`.
pub fn backoff_delay(attempts: i32, base: Duration, max: Duration) -> Duration {
    let exponent = attempts.saturating_sub(1).clamp(0, 31) as u32;
    base.checked_mul(1u32 << exponent)
        .map_or(max, |delay| delay.min(max))
}
