//! Refresh queue and worker tuning.

use crate::backoff::BackoffPolicy;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Delay before the first attempt on a newly enqueued path
    pub initial_delay: Duration,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Failed attempts after which an item is terminally `Failed`
    pub max_retries: u32,
    pub poll_interval: Duration,
    pub max_concurrent_attempts: usize,
    /// How long finished items are kept for observability
    pub history_retention: Duration,
    /// Upper bound on a single resolve + refresh attempt
    pub attempt_timeout: Duration,
}

impl RefreshConfig {
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.base_backoff, self.max_backoff)
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(30 * 60),
            base_backoff: Duration::from_secs(60 * 60),
            max_backoff: Duration::from_secs(24 * 60 * 60),
            max_retries: 4,
            poll_interval: Duration::from_secs(60),
            max_concurrent_attempts: 2,
            history_retention: Duration::from_secs(7 * 24 * 60 * 60),
            attempt_timeout: Duration::from_secs(120),
        }
    }
}
