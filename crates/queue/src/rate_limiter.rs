//! Per-key failure counting for rate-limited requeues.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use gobj_core::ExponentialBackoff;

/// Exponential per-key rate limiter.
///
/// Each call to [`RateLimiter::when`] counts one more failure for the key and
/// returns `base * 2^previous_failures`, capped by the backoff's maximum.
#[derive(Debug, Clone)]
pub struct RateLimiter<K> {
    backoff: ExponentialBackoff,
    failures: HashMap<K, u32>,
}

impl<K: Eq + Hash + Clone> RateLimiter<K> {
    /// Create a rate limiter using `backoff`.
    pub fn new(backoff: ExponentialBackoff) -> Self {
        Self {
            backoff,
            failures: HashMap::new(),
        }
    }

    /// Record a failure for `key` and return how long to wait before retrying.
    pub fn when(&mut self, key: &K) -> Duration {
        let failures = self.failures.entry(key.clone()).or_insert(0);
        let delay = self.backoff.delay(*failures);
        *failures = failures.saturating_add(1);
        delay
    }

    /// Reset the failure count for `key`.
    pub fn forget(&mut self, key: &K) {
        self.failures.remove(key);
    }

    /// Failures recorded for `key` since it was last forgotten.
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }
}

impl<K: Eq + Hash + Clone> Default for RateLimiter<K> {
    fn default() -> Self {
        Self::new(ExponentialBackoff::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_per_failure() {
        let mut limiter = RateLimiter::default();
        assert_eq!(limiter.when(&"obj-1"), Duration::from_millis(5));
        assert_eq!(limiter.when(&"obj-1"), Duration::from_millis(10));
        assert_eq!(limiter.when(&"obj-1"), Duration::from_millis(20));
        assert_eq!(limiter.num_requeues(&"obj-1"), 3);
        assert_eq!(limiter.when(&"obj-2"), Duration::from_millis(5));
    }

    #[test]
    fn test_delay_is_capped() {
        let mut limiter = RateLimiter::new(ExponentialBackoff::new(
            Duration::from_millis(5),
            Duration::from_millis(40),
        ));
        let delays: Vec<_> = (0..6).map(|_| limiter.when(&"k")).collect();
        assert_eq!(delays.last(), Some(&Duration::from_millis(40)));
    }

    #[test]
    fn test_forget_resets_count() {
        let mut limiter = RateLimiter::default();
        limiter.when(&"obj-1");
        limiter.when(&"obj-1");
        limiter.forget(&"obj-1");
        assert_eq!(limiter.num_requeues(&"obj-1"), 0);
        assert_eq!(limiter.when(&"obj-1"), Duration::from_millis(5));
    }
}
