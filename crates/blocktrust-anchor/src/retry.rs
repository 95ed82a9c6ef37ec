//! Backoff schedule for anchoring submissions.
//!
//! The delay after failed attempt *k* is `base_delay * 2^(k-1)`: with the
//! default 2000ms base, attempt 2 waits 2000ms and attempt 3 waits 4000ms.

use blocktrust_core::RetryConfig;
use std::time::Duration;

/// Cap on the doubling exponent so large attempt counts cannot overflow.
const MAX_DOUBLINGS: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Always at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_millis(config.base_delay_ms))
    }

    /// Wait before the given 1-based attempt. Zero for the first attempt.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let doublings = (attempt - 2).min(MAX_DOUBLINGS);
        self.base_delay.saturating_mul(1u32 << doublings)
    }

    /// Upper bound on time spent sleeping across all attempts.
    pub fn total_wait(&self) -> Duration {
        (1..=self.max_attempts)
            .map(|a| self.delay_before(a))
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_attempts, 3);
        assert_eq!(p.delay_before(1), Duration::ZERO);
        assert_eq!(p.delay_before(2), Duration::from_millis(2000));
        assert_eq!(p.delay_before(3), Duration::from_millis(4000));
        assert_eq!(p.total_wait(), Duration::from_millis(6000));
    }

    #[test]
    fn test_zero_attempts_clamped() {
        let p = RetryPolicy::new(0, Duration::from_millis(10));
        assert_eq!(p.max_attempts, 1);
        assert_eq!(p.total_wait(), Duration::ZERO);
    }

    #[test]
    fn test_large_attempt_does_not_overflow() {
        let p = RetryPolicy::new(100, Duration::from_millis(2000));
        assert!(p.delay_before(90) >= p.delay_before(18));
    }
}
