//! Exponential backoff with multiplicative jitter for callback retries.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Lower bound of the jitter multiplier (inclusive).
pub const JITTER_MIN: f64 = 0.5;

/// Upper bound of the jitter multiplier (exclusive).
pub const JITTER_MAX: f64 = 1.5;

/// Retry schedule for callback delivery.
///
/// A callback gets one initial attempt plus up to `max_retries` retries.
/// After failed attempt `k` (0-based) the dispatcher sleeps
/// `min(base_delay * 2^k, max_delay)` scaled by a random factor in
/// `[0.5, 1.5)`. No sleep follows the final attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay ceiling before the first retry.
    pub base_delay: Duration,
    /// Upper bound on the un-jittered delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: crate::DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Total attempts including the first.
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Un-jittered delay after failed attempt `attempt`.
    pub fn capped_delay(&self, attempt: u32) -> Duration {
        let multiplier = 2_u32.saturating_pow(attempt.min(31));
        self.base_delay.saturating_mul(multiplier).min(self.max_delay)
    }

    /// Jittered delay after failed attempt `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = rand::rng().random_range(JITTER_MIN..JITTER_MAX);
        apply_jitter(self.capped_delay(attempt), factor)
    }
}

/// Scales `delay` by `factor`, clamped into the jitter range.
pub fn apply_jitter(delay: Duration, factor: f64) -> Duration {
    let factor = if factor.is_finite() { factor.clamp(JITTER_MIN, JITTER_MAX) } else { 1.0 };
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}
