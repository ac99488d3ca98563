//! Retry backoff for refresh attempts.

use std::time::Duration;

/// Geometric backoff: `base * 2^(retry - 1)`, capped at `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before the next attempt after `retry_count` failures
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry_count.saturating_sub(1));
        self.base.saturating_mul(factor).min(self.max)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(60 * 60), Duration::from_secs(24 * 60 * 60))
    }
}
