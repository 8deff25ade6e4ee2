//! Exponential backoff arithmetic.
//!
//! Only the math lives here. Drawing the jitter and sleeping is the worker's
//! job, so these functions take the jitter as an argument.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry schedule for failed sync cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub base: Duration,
    /// Upper bound for any single delay
    pub cap: Duration,
    /// Attempts per trigger, the first one included
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            cap: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
        }
    }

    /// `base * 2^(attempt-1)`, saturating. `attempt` counts failures from 1.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor)
    }

    /// Exclusive upper bound for jitter: half the base delay.
    pub fn jitter_bound(&self) -> Duration {
        self.base / 2
    }

    /// Delay to sleep after failure number `attempt`.
    ///
    /// Jitter beyond [`Self::jitter_bound`] is clamped, and the sum never
    /// exceeds the cap. With the jitter kept under half the base, the delay
    /// grows strictly from one attempt to the next until it reaches the cap.
    pub fn delay(&self, attempt: u32, jitter: Duration) -> Duration {
        let bound = self.jitter_bound();
        let jitter = if jitter >= bound && !bound.is_zero() {
            bound - Duration::from_nanos(1)
        } else {
            jitter.min(bound)
        };
        self.base_delay(attempt).saturating_add(jitter).min(self.cap)
    }

    /// Whether another attempt is allowed after `attempts_made` attempts.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}
