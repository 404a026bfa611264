//! Wall-clock access and window bucket derivation.
//!
//! Every request samples the clock once. All bucket boundaries for that
//! request are derived from the sample, so window rollover needs no timers:
//! a new boundary yields a new counter key.

use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use parking_lot::Mutex;

use super::period::Period;

/// Source of wall-clock time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same time value.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Create a clock fixed at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: chrono::Duration) {
        *self.current.lock() += by;
    }

    /// Set the clock to a specific time.
    pub fn set(&self, at: DateTime<Utc>) {
        *self.current.lock() = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock()
    }
}

/// Bucket start timestamps (epoch milliseconds) derived from one clock sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowTimestamps {
    now: i64,
    buckets: [i64; 6],
}

impl WindowTimestamps {
    /// Truncate `now` to the start of each period.
    ///
    /// Each bucket coarsens the previous one: milliseconds, then seconds,
    /// minutes and hours are zeroed, then the day of month goes to 1 and the
    /// month to January. All truncation is in UTC.
    pub fn new(now: DateTime<Utc>) -> Self {
        let now_ms = now.timestamp_millis();

        let second = now_ms - now_ms.rem_euclid(1_000);
        let minute = second - second.rem_euclid(60_000);
        let hour = minute - minute.rem_euclid(3_600_000);
        let day = hour - hour.rem_euclid(86_400_000);

        let date = now.date_naive();
        let month = start_of(NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date));
        let year = start_of(NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date));

        Self {
            now: now_ms,
            buckets: [second, minute, hour, day, month, year],
        }
    }

    /// The sampled time in epoch milliseconds.
    pub fn now_millis(&self) -> i64 {
        self.now
    }

    /// Start of the bucket containing `now` for `period`.
    pub fn bucket(&self, period: Period) -> i64 {
        self.buckets[period as usize]
    }

    /// Seconds until the window for `period` resets, never less than one.
    pub fn reset_secs(&self, period: Period) -> i64 {
        let elapsed_secs = (self.now - self.bucket(period)).div_euclid(1_000);
        (period.span_secs() - elapsed_secs).max(1)
    }
}

fn start_of(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}
