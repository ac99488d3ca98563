//! Time Abstraction
//!
//! Injectable time source so queue scheduling and ledger timestamps can be
//! driven deterministically in tests.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Time source trait
///
/// # Example
///
/// ```ignore
/// use bridge_traits::time::Clock;
///
/// fn due(clock: &dyn Clock, scheduled_at: i64) -> bool {
///     scheduled_at <= clock.unix_timestamp()
/// }
/// ```
pub trait Clock: Send + Sync {
    /// Get current UTC time
    fn now(&self) -> DateTime<Utc>;

    /// Get current Unix timestamp in seconds
    fn unix_timestamp(&self) -> i64 {
        self.now().timestamp()
    }

    /// Get current Unix timestamp in milliseconds
    fn unix_timestamp_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// System clock implementation using actual system time
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for testing/development
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// Start the clock at the given Unix timestamp (seconds)
    pub fn at(unix_secs: i64) -> Self {
        Self {
            millis: AtomicI64::new(unix_secs * 1000),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    /// Jump to an absolute Unix timestamp (seconds)
    pub fn set(&self, unix_secs: i64) {
        self.millis.store(unix_secs * 1000, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let millis = self.millis.load(Ordering::SeqCst);
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_recent() {
        let clock = SystemClock;
        assert!(clock.unix_timestamp() > 1_600_000_000);
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::at(1_000);
        assert_eq!(clock.unix_timestamp(), 1_000);

        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.unix_timestamp(), 1_090);

        clock.set(5_000);
        assert_eq!(clock.unix_timestamp_millis(), 5_000_000);
    }
}
