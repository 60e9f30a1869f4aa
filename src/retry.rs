// Backoff policy for 503 Service Unavailable

use std::time::Duration;

/// Retry policy for transient server unavailability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(5000),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        backoff_delay(retry, self.base_delay, self.max_delay)
    }

    /// Whether another retry is allowed after `performed` retries
    pub fn allows(&self, performed: u32) -> bool {
        performed < self.max_retries
    }
}

/// `min(base * 2^(retry-1), cap)`. Retry 0 is treated as retry 1.
pub fn backoff_delay(retry: u32, base: Duration, cap: Duration) -> Duration {
    let exponent = retry.saturating_sub(1).min(31);
    let factor = 1u32 << exponent;
    base.checked_mul(factor).unwrap_or(cap).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for(4), Duration::from_millis(5000));
        assert_eq!(policy.delay_for(20), Duration::from_millis(5000));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(5000));
    }

    #[test]
    fn test_backoff_zero_retry() {
        let d = backoff_delay(0, Duration::from_millis(250), Duration::from_secs(5));
        assert_eq!(d, Duration::from_millis(250));
    }

    #[test]
    fn test_retry_bound() {
        let policy = RetryPolicy::default();
        assert!(policy.allows(0));
        assert!(policy.allows(2));
        assert!(!policy.allows(3));
        assert!(!policy.allows(4));
    }
}
