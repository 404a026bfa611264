//! Optimistic counter increments for admitted requests.
//!
//! Each tracked period's counter is advanced with compare-and-swap writes.
//! A lost race re-reads the counter and tries again, up to
//! [`MAX_WRITE_ATTEMPTS`] writes per period. A failed write spends an attempt
//! like a lost race does. Running out of attempts only under-counts the
//! window; the request stays admitted.

use tracing::{trace, warn};

use crate::config::FilterConfig;
use crate::error::{Result, TollgateError};

use super::clock::WindowTimestamps;
use super::key::CounterScope;
use super::period::Period;
use super::store::{read_counter, write_counter, CounterStore, Version, WriteOutcome};
use super::usage::{Usage, Usages};

/// Write attempts per period before the update is given up.
pub const MAX_WRITE_ATTEMPTS: usize = 10;

/// How one period's counter update ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrementOutcome {
    /// The counter now holds `value`; `attempts` writes were issued.
    Committed { value: i32, attempts: usize },
    /// Every write attempt lost a race.
    Exhausted,
    /// A re-read failed under the fault-tolerant policy.
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IncrementState {
    ReadPending,
    WritePending { value: i32, version: Version },
    Committed { value: i32 },
    Exhausted,
}

/// Increment one counter, starting from the value and version already read.
pub async fn increment_counter<S>(
    store: &S,
    key: &str,
    usage: &Usage,
    fault_tolerant: bool,
) -> Result<IncrementOutcome>
where
    S: CounterStore + ?Sized,
{
    let mut state = IncrementState::WritePending {
        value: usage.usage,
        version: usage.version,
    };
    let mut attempts = 0;

    loop {
        state = match state {
            IncrementState::ReadPending => match read_counter(store, key).await {
                Ok(read) => IncrementState::WritePending {
                    value: read.value,
                    version: read.version,
                },
                Err(e) if fault_tolerant => {
                    warn!(key = %key, error = %e, "Failed to re-read counter, abandoning update");
                    return Ok(IncrementOutcome::Abandoned);
                }
                Err(e) => {
                    return Err(TollgateError::StoreRead {
                        key: key.to_string(),
                        source: e,
                    })
                }
            },
            IncrementState::WritePending { .. } if attempts == MAX_WRITE_ATTEMPTS => {
                IncrementState::Exhausted
            }
            IncrementState::WritePending { value, version } => {
                attempts += 1;
                let next = value.saturating_add(1);
                match write_counter(store, key, next, version).await {
                    Ok(WriteOutcome::Committed) => IncrementState::Committed { value: next },
                    Ok(WriteOutcome::CasMismatch) => {
                        trace!(key = %key, attempt = attempts, "Counter changed concurrently, retrying");
                        IncrementState::ReadPending
                    }
                    Err(e) => {
                        warn!(key = %key, attempt = attempts, error = %e, "Failed to write counter, retrying");
                        IncrementState::WritePending { value, version }
                    }
                }
            }
            IncrementState::Committed { value } => {
                return Ok(IncrementOutcome::Committed { value, attempts });
            }
            IncrementState::Exhausted => {
                warn!(key = %key, attempts = attempts, "Could not increment counter");
                return Ok(IncrementOutcome::Exhausted);
            }
        };
    }
}

/// Increment the counter of every tracked period, finest first.
pub async fn increment_usages<S>(
    store: &S,
    config: &FilterConfig,
    scope: &CounterScope,
    timestamps: &WindowTimestamps,
    usages: &Usages,
) -> Result<Vec<(Period, IncrementOutcome)>>
where
    S: CounterStore + ?Sized,
{
    let mut outcomes = Vec::with_capacity(usages.counters().len());
    for (period, usage) in usages.counters() {
        let key = scope.key(*period, timestamps).to_string();
        let outcome = increment_counter(store, &key, usage, config.fault_tolerant).await?;
        outcomes.push((*period, outcome));
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::store::{CounterRead, MemoryStore, StoreError};
    use crate::ratelimit::testing::ScriptedStore;

    const KEY: &str = "kong_wasm_rate_limiting_counters/ratelimit:r:s:id:0:minute";

    fn fresh(limit: i32) -> Usage {
        Usage::new(limit, CounterRead::FRESH)
    }

    async fn stored(store: &MemoryStore) -> i32 {
        read_counter(store, KEY).await.unwrap().value
    }

    #[tokio::test]
    async fn test_first_increment_commits() {
        let store = MemoryStore::new();

        let outcome = increment_counter(&store, KEY, &fresh(10), false).await.unwrap();

        assert_eq!(outcome, IncrementOutcome::Committed { value: 1, attempts: 1 });
        assert_eq!(stored(&store).await, 1);
    }

    #[tokio::test]
    async fn test_converges_after_lost_races() {
        for lost in 1..MAX_WRITE_ATTEMPTS {
            let store = ScriptedStore::new().with_cas_mismatches(lost);

            let outcome = increment_counter(&store, KEY, &fresh(100), false).await.unwrap();

            // Each lost race is another writer's increment; ours lands once on top.
            let expected = lost as i32 + 1;
            assert_eq!(
                outcome,
                IncrementOutcome::Committed {
                    value: expected,
                    attempts: lost + 1
                }
            );
            assert_eq!(stored(store.inner()).await, expected);
        }
    }

    #[tokio::test]
    async fn test_exhaustion_after_max_attempts() {
        let store = ScriptedStore::new().with_cas_mismatches(MAX_WRITE_ATTEMPTS);

        let outcome = increment_counter(&store, KEY, &fresh(100), false).await.unwrap();

        assert_eq!(outcome, IncrementOutcome::Exhausted);
        assert_eq!(store.writes(), MAX_WRITE_ATTEMPTS);
        // Only the competing writers' increments landed.
        assert_eq!(stored(store.inner()).await, MAX_WRITE_ATTEMPTS as i32);
    }

    #[tokio::test]
    async fn test_transient_write_failure_is_retried() {
        let store = ScriptedStore::new().failing_writes_for(1, StoreError::Timeout);

        let outcome = increment_counter(&store, KEY, &fresh(10), false).await.unwrap();

        assert_eq!(outcome, IncrementOutcome::Committed { value: 1, attempts: 2 });
        assert_eq!(stored(store.inner()).await, 1);
    }

    #[tokio::test]
    async fn test_persistent_write_failure_exhausts_under_either_policy() {
        for fault_tolerant in [true, false] {
            let store = ScriptedStore::new().failing_writes(StoreError::Timeout);

            let outcome = increment_counter(&store, KEY, &fresh(10), fault_tolerant)
                .await
                .unwrap();

            assert_eq!(outcome, IncrementOutcome::Exhausted);
            assert_eq!(store.writes(), MAX_WRITE_ATTEMPTS);
            assert!(store.inner().is_empty());
        }
    }

    #[tokio::test]
    async fn test_write_failures_and_lost_races_share_attempts() {
        let store = ScriptedStore::new()
            .failing_writes_for(2, StoreError::Timeout)
            .with_cas_mismatches(1);

        let outcome = increment_counter(&store, KEY, &fresh(10), false).await.unwrap();

        // Two failed writes, one lost race, then a write on top of the rival's.
        assert_eq!(outcome, IncrementOutcome::Committed { value: 2, attempts: 4 });
        assert_eq!(stored(store.inner()).await, 2);
    }

    #[tokio::test]
    async fn test_reread_failure_follows_policy() {
        let store = ScriptedStore::new()
            .with_cas_mismatches(1)
            .failing_reads(StoreError::Unavailable("gone".into()));
        let outcome = increment_counter(&store, KEY, &fresh(10), true).await.unwrap();
        assert_eq!(outcome, IncrementOutcome::Abandoned);

        let store = ScriptedStore::new()
            .with_cas_mismatches(1)
            .failing_reads(StoreError::Unavailable("gone".into()));
        let result = increment_counter(&store, KEY, &fresh(10), false).await;
        assert!(matches!(result, Err(TollgateError::StoreRead { .. })));
    }

    #[tokio::test]
    async fn test_increment_uses_read_version() {
        let store = MemoryStore::new();
        write_counter(&store, KEY, 4, Version::ABSENT).await.unwrap();
        let read = read_counter(&store, KEY).await.unwrap();

        let outcome = increment_counter(&store, KEY, &Usage::new(10, read), false)
            .await
            .unwrap();

        assert_eq!(outcome, IncrementOutcome::Committed { value: 5, attempts: 1 });
    }

    #[tokio::test]
    async fn test_increment_usages_touches_every_period() {
        let store = MemoryStore::new();
        let config = FilterConfig::from_json(r#"{"second": 5, "minute": 10, "year": 1000}"#).unwrap();
        let scope = CounterScope::new("r", "s", "id");
        let timestamps = WindowTimestamps::new(chrono::Utc::now());
        let usages = Usages::from_counters(
            config
                .tracked_periods()
                .map(|(period, limit)| (period, fresh(limit)))
                .collect(),
        );

        let outcomes = increment_usages(&store, &config, &scope, &timestamps, &usages)
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes
            .iter()
            .all(|(_, outcome)| *outcome == IncrementOutcome::Committed { value: 1, attempts: 1 }));
        assert_eq!(store.len(), 3);
    }
}
