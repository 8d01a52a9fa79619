//! Time sources. Window math uses the monotonic clock; quota dates use UTC.

use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    /// Monotonic instant for window and TTL arithmetic.
    fn now(&self) -> Instant;
    /// Wall-clock time, used only to bucket daily quotas by UTC date.
    fn utc_now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests. Both time lines move together on `advance`.
#[derive(Debug)]
pub struct ManualClock {
    state: Mutex<(Instant, DateTime<Utc>)>,
}

impl ManualClock {
    pub fn new(utc: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new((Instant::now(), utc)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        guard.0 += by;
        guard.1 += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
    }

    pub fn advance_millis(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }

    /// Move only the wall clock (simulates skew; windows are unaffected).
    pub fn set_utc(&self, utc: DateTime<Utc>) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        guard.1 = utc;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).0
    }

    fn utc_now(&self) -> DateTime<Utc> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn manual_clock_moves_both_lines() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let t0 = clock.now();
        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now() - t0, Duration::from_secs(90));
        assert_eq!(clock.utc_now(), start + chrono::Duration::seconds(90));
    }

    #[test]
    fn skewing_wall_clock_leaves_monotonic_alone() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let t0 = clock.now();
        clock.set_utc(start - chrono::Duration::hours(3));
        assert_eq!(clock.now(), t0);
    }
}
