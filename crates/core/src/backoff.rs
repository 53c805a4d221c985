//! Exponential backoff with an optional jitter.
//!
//! Delay formula: `min(base * 2^attempt, max)`, then stretched by up to
//! `jitter * delay` when jitter is enabled.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1000);

/// Backoff policy shared by the work queue and the watch reflector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExponentialBackoff {
    /// Delay after the first failure.
    #[serde(with = "crate::serde_duration::millis", default = "default_base_delay")]
    pub base_delay: Duration,
    /// Cap on the delay.
    #[serde(with = "crate::serde_duration::millis", default = "default_max_delay")]
    pub max_delay: Duration,
    /// Fraction of the delay added at random (0.0 disables jitter).
    #[serde(default)]
    pub jitter: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: 0.0,
        }
    }
}

impl ExponentialBackoff {
    /// Create a backoff without jitter.
    pub const fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter: 0.0,
        }
    }

    /// Set the jitter factor.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay for the given 0-indexed attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let capped = self
            .base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay));

        if self.jitter > 0.0 {
            let stretch = rand::thread_rng().gen_range(0.0..=self.jitter);
            capped.mul_f64(1.0 + stretch)
        } else {
            capped
        }
    }
}

const fn default_base_delay() -> Duration {
    DEFAULT_BASE_DELAY
}

const fn default_max_delay() -> Duration {
    DEFAULT_MAX_DELAY
}
