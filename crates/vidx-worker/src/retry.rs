//! Retry scheduling for failed stage runs.

use std::time::Duration;

use vidx_queue::QueueConfig;

/// Exponential backoff between attempts of the same unit of work.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the second attempt; doubles after that
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    pub fn from_queue_config(config: &QueueConfig) -> Self {
        Self {
            base_delay: config.backoff_base,
            max_delay: config.backoff_max,
        }
    }

    /// Delay before the attempt following `failed_attempt` (1-based):
    /// `base * 2^(failed_attempt - 1)`, capped at `max_delay`.
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        let exp = failed_attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_calculation() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
        };
        assert_eq!(policy.delay_after(1), Duration::from_secs(5));
        assert_eq!(policy.delay_after(2), Duration::from_secs(10));
        assert_eq!(policy.delay_after(3), Duration::from_secs(20));
        assert_eq!(policy.delay_after(5), Duration::from_secs(60));
        assert_eq!(policy.delay_after(40), Duration::from_secs(60));
    }

    #[test]
    fn test_from_queue_config() {
        let config = QueueConfig::default();
        let policy = RetryPolicy::from_queue_config(&config);
        assert_eq!(policy.base_delay, config.backoff_base);
        assert_eq!(policy.max_delay, config.backoff_max);
    }
}
