//! Rate limit periods and their fixed tables.

use std::fmt;
use std::time::Duration;

/// One of the six nested rate limit windows, finest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Period {
    /// Per-second rate limiting
    Second,
    /// Per-minute rate limiting
    Minute,
    /// Per-hour rate limiting
    Hour,
    /// Per-day rate limiting
    Day,
    /// Per-month rate limiting
    Month,
    /// Per-year rate limiting
    Year,
}

/// Window spans in seconds, `60^index` for each period.
///
/// Day, month and year follow the compounding rule, not calendar lengths.
const SPANS: [i64; 6] = [1, 60, 3_600, 216_000, 12_960_000, 777_600_000];

const NAMES: [&str; 6] = ["second", "minute", "hour", "day", "month", "year"];

const LIMIT_HEADERS: [&str; 6] = [
    "X-RateLimit-Limit-Second",
    "X-RateLimit-Limit-Minute",
    "X-RateLimit-Limit-Hour",
    "X-RateLimit-Limit-Day",
    "X-RateLimit-Limit-Month",
    "X-RateLimit-Limit-Year",
];

const REMAINING_HEADERS: [&str; 6] = [
    "X-RateLimit-Remaining-Second",
    "X-RateLimit-Remaining-Minute",
    "X-RateLimit-Remaining-Hour",
    "X-RateLimit-Remaining-Day",
    "X-RateLimit-Remaining-Month",
    "X-RateLimit-Remaining-Year",
];

impl Period {
    /// All periods in enumeration order.
    pub const ALL: [Period; 6] = [
        Period::Second,
        Period::Minute,
        Period::Hour,
        Period::Day,
        Period::Month,
        Period::Year,
    ];

    const fn index(self) -> usize {
        self as usize
    }

    /// Window span in seconds.
    pub const fn span_secs(self) -> i64 {
        SPANS[self.index()]
    }

    /// Window span as a duration.
    pub fn span(self) -> Duration {
        Duration::from_secs(self.span_secs() as u64)
    }

    /// Lowercase name used in counter keys.
    pub const fn name(self) -> &'static str {
        NAMES[self.index()]
    }

    /// Name of the per-period limit header.
    pub const fn limit_header(self) -> &'static str {
        LIMIT_HEADERS[self.index()]
    }

    /// Name of the per-period remaining header.
    pub const fn remaining_header(self) -> &'static str {
        REMAINING_HEADERS[self.index()]
    }

    /// Parse the lowercase name used in counter keys.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|period| period.name() == name)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
