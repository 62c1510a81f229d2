//! Wall-clock abstraction and UTC calendar helpers
//!
//! Freshness checks, midnight anchoring and clock-aligned scheduling all read
//! time through [`Clock`] so tests can drive them deterministically with
//! [`ManualClock`].

use chrono::{DateTime, Duration, Timelike, Utc};
use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::Arc;

/// Source of the current UTC time
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

pub type SharedClock = Arc<dyn Clock>;

/// Reads the system clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn shared(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self::new(start))
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// First UTC midnight strictly after `ts`.
pub fn next_utc_midnight(ts: DateTime<Utc>) -> DateTime<Utc> {
    let day = ts.date_naive() + Duration::days(1);
    day.and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(ts + Duration::days(1))
}

/// Wait until the wall-clock second of the minute equals `offset_secs`.
///
/// Returns zero when `now` sits exactly on the offset.
pub fn delay_until_second_offset(now: DateTime<Utc>, offset_secs: u32) -> std::time::Duration {
    let offset_ms = i64::from(offset_secs.min(59)) * 1_000;
    let into_minute_ms =
        i64::from(now.second()) * 1_000 + i64::from(now.timestamp_subsec_millis().min(999));
    let mut wait_ms = offset_ms - into_minute_ms;
    if wait_ms < 0 {
        wait_ms += 60_000;
    }
    std::time::Duration::from_millis(wait_ms as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_next_midnight_same_for_whole_day() {
        let early = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 1).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 3, 10, 23, 59, 59).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap();
        assert_eq!(next_utc_midnight(early), expected);
        assert_eq!(next_utc_midnight(late), expected);
    }

    #[test]
    fn test_next_midnight_from_exact_midnight_is_next_day() {
        let midnight = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        assert_eq!(
            next_utc_midnight(midnight),
            Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_delay_until_offset() {
        let t = Utc.with_ymd_and_hms(2024, 3, 10, 12, 30, 15).unwrap();
        assert_eq!(delay_until_second_offset(t, 40).as_secs(), 25);

        let past = Utc.with_ymd_and_hms(2024, 3, 10, 12, 30, 45).unwrap();
        assert_eq!(delay_until_second_offset(past, 40).as_secs(), 55);

        let exact = Utc.with_ymd_and_hms(2024, 3, 10, 12, 30, 40).unwrap();
        assert_eq!(delay_until_second_offset(exact, 40).as_millis(), 0);
    }

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(Duration::minutes(5));
        assert_eq!(clock.now(), start + Duration::minutes(5));
    }
}
