//! Per-period usage aggregation and binding period selection.

use futures::future::join_all;
use tracing::{trace, warn};

use crate::config::FilterConfig;
use crate::error::{Result, TollgateError};

use super::clock::WindowTimestamps;
use super::key::CounterScope;
use super::period::Period;
use super::store::{read_counter, CounterRead, CounterStore, Version};

/// Budget state of one period for the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    /// Configured limit
    pub limit: i32,
    /// Counter value before this request
    pub usage: i32,
    /// `limit - usage`, unclamped
    pub remaining: i32,
    /// Version of the read, for the later increment
    pub version: Version,
}

impl Usage {
    /// Build a usage from a limit and a counter read.
    pub fn new(limit: i32, read: CounterRead) -> Self {
        Self {
            limit,
            usage: read.value,
            remaining: limit.saturating_sub(read.value),
            version: read.version,
        }
    }

    /// Remaining budget, never below zero.
    pub fn clamped_remaining(&self) -> i32 {
        self.remaining.max(0)
    }
}

/// Usage of every tracked period for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Usages {
    counters: Vec<(Period, Usage)>,
    binding: Option<Period>,
    stop: Option<Period>,
}

impl Usages {
    /// Aggregate already-read usages, in enumeration order.
    pub fn from_counters(counters: Vec<(Period, Usage)>) -> Self {
        let mut binding: Option<(Period, i32)> = None;
        let mut stop = None;

        for (period, usage) in &counters {
            let remaining = usage.clamped_remaining();

            let tighter = match binding {
                None => true,
                Some((current, current_remaining)) => {
                    remaining < current_remaining
                        || (remaining == current_remaining
                            && period.span_secs() > current.span_secs())
                }
            };
            if tighter {
                binding = Some((*period, remaining));
            }

            if stop.is_none() && remaining == 0 {
                stop = Some(*period);
            }
        }

        Self {
            counters,
            binding: binding.map(|(period, _)| period),
            stop,
        }
    }

    /// Tracked periods and their usage, finest first.
    pub fn counters(&self) -> &[(Period, Usage)] {
        &self.counters
    }

    /// Usage of one period, if it is tracked.
    pub fn get(&self, period: Period) -> Option<&Usage> {
        self.counters
            .iter()
            .find(|(p, _)| *p == period)
            .map(|(_, usage)| usage)
    }

    /// The period whose budget the aggregate headers report.
    pub fn binding(&self) -> Option<Period> {
        self.binding
    }

    /// The first exhausted period, if any. Its presence rejects the request.
    pub fn stop(&self) -> Option<Period> {
        self.stop
    }

    /// Whether no period is tracked.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

/// Read the counter of every tracked period and aggregate the results.
///
/// Reads for all periods are issued together. A failed read aborts with
/// [`TollgateError::StoreRead`] unless the filter is fault tolerant, in which
/// case the period counts as unused.
pub async fn get_usages<S>(
    store: &S,
    config: &FilterConfig,
    scope: &CounterScope,
    timestamps: &WindowTimestamps,
) -> Result<Usages>
where
    S: CounterStore + ?Sized,
{
    let tracked: Vec<(Period, i32)> = config.tracked_periods().collect();

    let reads = join_all(tracked.iter().map(|(period, _)| async move {
        let key = scope.key(*period, timestamps).to_string();
        let read = read_counter(store, &key).await;
        (key, read)
    }))
    .await;

    let mut counters = Vec::with_capacity(tracked.len());
    for ((period, limit), (key, read)) in tracked.into_iter().zip(reads) {
        let read = match read {
            Ok(read) => read,
            Err(e) if config.fault_tolerant => {
                warn!(key = %key, error = %e, "Failed to get usage, treating as unused");
                CounterRead::FRESH
            }
            Err(e) => return Err(TollgateError::StoreRead { key, source: e }),
        };

        let usage = Usage::new(limit, read);
        trace!(
            period = %period,
            limit = usage.limit,
            usage = usage.usage,
            remaining = usage.remaining,
            "Read usage"
        );
        counters.push((period, usage));
    }

    Ok(Usages::from_counters(counters))
}
