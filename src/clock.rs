//! Wall-clock access
//!
//! Delay-queue scores and hour gating read the wall clock through [`Clock`] so
//! tests can pin it. Interval timing and TTLs use `tokio::time` instead.

use chrono::{DateTime, Local, TimeZone, Timelike, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Source of wall-clock time
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch
    fn now_millis(&self) -> i64;

    /// Current hour of day (0-23) in the process's local timezone
    fn local_hour(&self) -> u32;
}

/// Clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    fn local_hour(&self) -> u32 {
        Local::now().hour()
    }
}

/// Settable clock for tests and simulations.
///
/// The hour of day is derived from the stored instant in UTC.
#[derive(Debug, Clone)]
pub struct ManualClock {
    millis: Arc<AtomicI64>,
}

impl ManualClock {
    /// Create a clock pinned at the given epoch milliseconds
    pub fn new(millis: i64) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(millis)),
        }
    }

    /// Create a clock pinned at `hour:00` UTC on 2024-01-15
    pub fn at_hour(hour: u32) -> Self {
        let clock = Self::new(0);
        clock.set_hour(hour);
        clock
    }

    /// Move the clock to `hour:00` UTC on 2024-01-15
    pub fn set_hour(&self, hour: u32) {
        let base = Utc
            .with_ymd_and_hms(2024, 1, 15, 0, 0, 0)
            .single()
            .map_or(0, |dt| dt.timestamp_millis());
        self.set_millis(base + i64::from(hour % 24) * 3_600_000);
    }

    /// Set the clock to an absolute instant
    pub fn set_millis(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let delta = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.millis.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now().timestamp_millis())
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }

    fn local_hour(&self) -> u32 {
        DateTime::<Utc>::from_timestamp_millis(self.now_millis()).map_or(0, |dt| dt.hour())
    }
}

/// Stand-in for "never" when a deadline would overflow `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + after` on the runtime clock, saturating at roughly thirty years out.
///
/// Callers pass user-supplied waits and TTLs here; `Duration::MAX` is a
/// legitimate way to say "wait forever".
pub(crate) fn deadline_after(after: Duration) -> tokio::time::Instant {
    tokio::time::Instant::now() + after.min(FAR_FUTURE)
}

/// Convert epoch milliseconds to a UTC timestamp
pub fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_hour() {
        let clock = ManualClock::at_hour(2);
        assert_eq!(clock.local_hour(), 2);

        clock.set_hour(10);
        assert_eq!(clock.local_hour(), 10);

        clock.advance(Duration::from_secs(3600 * 14));
        assert_eq!(clock.local_hour(), 0);
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(1_000);
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now_millis(), 1_250);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_after_saturates() {
        let now = tokio::time::Instant::now();
        assert_eq!(deadline_after(Duration::from_secs(5)), now + Duration::from_secs(5));
        assert_eq!(deadline_after(Duration::MAX), now + FAR_FUTURE);
    }

    #[test]
    fn test_system_clock_is_sane() {
        let clock = SystemClock;
        assert!(clock.now_millis() > 1_600_000_000_000);
        assert!(clock.local_hour() < 24);
    }
}
