//! Bounded retry with exponential backoff for calls that got no response

use std::time::Duration;

/// Retry budget for a single work item
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Attempts after the first before the item is dead-lettered
    pub max_retries: u32,
    /// Backoff unit; attempt `n` waits `base * 2^n`
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff: 2^attempt units (2s, 4s, 8s, ... with the default unit)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    pub fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_exponential() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
    }

    #[test]
    fn backoff_saturates() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(64), Duration::from_secs(u32::MAX as u64));
    }

    #[test]
    fn budget_bounds_attempts() {
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
        };
        assert!(policy.allows(0));
        assert!(policy.allows(1));
        assert!(!policy.allows(2));
    }
}
