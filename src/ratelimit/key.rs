//! Counter key generation and parsing.

use std::fmt;

use super::clock::WindowTimestamps;
use super::period::Period;

/// Namespace under which all counters live in the shared store.
pub const COUNTER_NAMESPACE: &str = "kong_wasm_rate_limiting_counters/";

const KEY_PREFIX: &str = "ratelimit:";

/// A key that uniquely identifies one window instance of one counter.
///
/// Format: `{namespace}ratelimit:{route}:{service}:{subject}:{bucket_ms}:{period}`.
/// The subject may itself contain `:` (IPv6 addresses, header values), so
/// parsing takes route and service from the left and bucket and period from
/// the right.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    /// Route identity from the gateway
    pub route_id: String,
    /// Service identity from the gateway
    pub service_id: String,
    /// The rate limited subject
    pub subject: String,
    /// Bucket start in epoch milliseconds
    pub bucket: i64,
    /// The window this counter belongs to
    pub period: Period,
}

impl CounterKey {
    /// Create a new counter key.
    pub fn new(route_id: &str, service_id: &str, subject: &str, bucket: i64, period: Period) -> Self {
        Self {
            route_id: route_id.to_string(),
            service_id: service_id.to_string(),
            subject: subject.to_string(),
            bucket,
            period,
        }
    }

    /// Parse a store key produced by [`CounterKey`]'s `Display`.
    pub fn parse(key: &str) -> Option<Self> {
        let rest = key
            .strip_prefix(COUNTER_NAMESPACE)?
            .strip_prefix(KEY_PREFIX)?;

        let (rest, period) = rest.rsplit_once(':')?;
        let period = Period::from_name(period)?;

        let (rest, bucket) = rest.rsplit_once(':')?;
        let bucket: i64 = bucket.parse().ok()?;

        let (route_id, rest) = rest.split_once(':')?;
        let (service_id, subject) = rest.split_once(':')?;

        Some(Self::new(route_id, service_id, subject, bucket, period))
    }

    /// Whether this bucket's window has fully passed at `now_ms`.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.bucket + self.period.span_secs() * 1_000
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}:{}:{}:{}:{}",
            COUNTER_NAMESPACE,
            KEY_PREFIX,
            self.route_id,
            self.service_id,
            self.subject,
            self.bucket,
            self.period
        )
    }
}

/// The route, service and subject a request is counted under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterScope {
    pub route_id: String,
    pub service_id: String,
    pub subject: String,
}

impl CounterScope {
    /// Create a new scope.
    pub fn new(route_id: &str, service_id: &str, subject: &str) -> Self {
        Self {
            route_id: route_id.to_string(),
            service_id: service_id.to_string(),
            subject: subject.to_string(),
        }
    }

    /// The key of the bucket `timestamps` falls into for `period`.
    pub fn key(&self, period: Period, timestamps: &WindowTimestamps) -> CounterKey {
        CounterKey::new(
            &self.route_id,
            &self.service_id,
            &self.subject,
            timestamps.bucket(period),
            period,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_key_format() {
        let key = CounterKey::new("route-1", "svc-1", "10.0.0.1", 1_704_067_200_000, Period::Minute);
        assert_eq!(
            key.to_string(),
            "kong_wasm_rate_limiting_counters/ratelimit:route-1:svc-1:10.0.0.1:1704067200000:minute"
        );
    }

    #[test]
    fn test_counter_key_parse() {
        let key = CounterKey::new("r", "s", "2001:db8::1", 1_000, Period::Hour);
        let parsed = CounterKey::parse(&key.to_string()).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_counter_key_parse_empty_subject() {
        let key = CounterKey::new("", "", "", 0, Period::Year);
        assert_eq!(CounterKey::parse(&key.to_string()), Some(key));
    }

    #[test]
    fn test_counter_key_parsing_invalid() {
        assert!(CounterKey::parse("invalid").is_none());
        assert!(CounterKey::parse("ratelimit:r:s:id:1000:minute").is_none());
        assert!(CounterKey::parse("kong_wasm_rate_limiting_counters/ratelimit:r:s:id:abc:minute").is_none());
        assert!(CounterKey::parse("kong_wasm_rate_limiting_counters/ratelimit:r:s:id:1000:week").is_none());
        assert!(CounterKey::parse("kong_wasm_rate_limiting_counters/ratelimit:r:1000:minute").is_none());
    }

    #[test]
    fn test_distinct_identities_never_collide() {
        let base = CounterKey::new("route", "service", "alice", 60_000, Period::Minute);
        let others = [
            CounterKey::new("route", "service", "bob", 60_000, Period::Minute),
            CounterKey::new("route2", "service", "alice", 60_000, Period::Minute),
            CounterKey::new("route", "service2", "alice", 60_000, Period::Minute),
            CounterKey::new("route", "service", "alice", 120_000, Period::Minute),
            CounterKey::new("route", "service", "alice", 60_000, Period::Hour),
        ];
        for other in &others {
            assert_ne!(base.to_string(), other.to_string());
        }
    }

    #[test]
    fn test_scope_key_uses_period_bucket() {
        let now = chrono::DateTime::parse_from_rfc3339("2024-03-05T10:20:30.400Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let timestamps = WindowTimestamps::new(now);
        let scope = CounterScope::new("r", "s", "id");

        let minute = scope.key(Period::Minute, &timestamps);
        let hour = scope.key(Period::Hour, &timestamps);

        assert_eq!(minute.bucket, timestamps.bucket(Period::Minute));
        assert_eq!(hour.bucket, timestamps.bucket(Period::Hour));
        assert_ne!(minute.to_string(), hour.to_string());
    }

    #[test]
    fn test_is_expired() {
        let key = CounterKey::new("r", "s", "id", 60_000, Period::Minute);
        assert!(!key.is_expired(60_000));
        assert!(!key.is_expired(119_999));
        assert!(key.is_expired(120_000));
    }
}
