//! Scripted counter stores for exercising failure and contention paths.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::store::{
    read_counter, write_counter, CounterStore, MemoryStore, StoreError, StoredValue, Version,
    WriteOutcome,
};

/// Wraps a [`MemoryStore`] and injects failures and lost CAS races.
#[derive(Debug, Default)]
pub(crate) struct ScriptedStore {
    inner: MemoryStore,
    read_error: Mutex<Option<StoreError>>,
    reads_before_failure: Mutex<Option<usize>>,
    write_error: Mutex<Option<StoreError>>,
    writes_before_recovery: Mutex<Option<usize>>,
    write_error_suffix: Mutex<Option<String>>,
    cas_mismatches: AtomicUsize,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl ScriptedStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every read fails with `error`.
    pub(crate) fn failing_reads(self, error: StoreError) -> Self {
        *self.read_error.lock() = Some(error);
        self
    }

    /// Reads succeed `count` times, then fail with `error`.
    pub(crate) fn failing_reads_after(self, count: usize, error: StoreError) -> Self {
        *self.reads_before_failure.lock() = Some(count);
        self.failing_reads(error)
    }

    /// Every write fails with `error`.
    pub(crate) fn failing_writes(self, error: StoreError) -> Self {
        *self.write_error.lock() = Some(error);
        self
    }

    /// The next `count` writes fail with `error`, later writes succeed.
    pub(crate) fn failing_writes_for(self, count: usize, error: StoreError) -> Self {
        *self.writes_before_recovery.lock() = Some(count);
        self.failing_writes(error)
    }

    /// Writes to keys ending in `suffix` fail with `error`.
    pub(crate) fn failing_writes_on(self, suffix: &str, error: StoreError) -> Self {
        *self.write_error_suffix.lock() = Some(suffix.to_string());
        self.failing_writes(error)
    }

    /// The next `count` writes lose a race: another writer bumps the
    /// counter by one just before each of them lands.
    pub(crate) fn with_cas_mismatches(self, count: usize) -> Self {
        self.cas_mismatches.store(count, Ordering::SeqCst);
        self
    }

    pub(crate) fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub(crate) fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub(crate) fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn read_fails(&self) -> Option<StoreError> {
        let error = self.read_error.lock().clone()?;
        let mut remaining = self.reads_before_failure.lock();
        match remaining.as_mut() {
            Some(0) | None => Some(error),
            Some(n) => {
                *n -= 1;
                None
            }
        }
    }

    fn write_fails(&self, key: &str) -> Option<StoreError> {
        let error = self.write_error.lock().clone()?;
        if let Some(suffix) = self.write_error_suffix.lock().as_deref() {
            if !key.ends_with(suffix) {
                return None;
            }
        }
        let mut remaining = self.writes_before_recovery.lock();
        match remaining.as_mut() {
            None => Some(error),
            Some(0) => None,
            Some(n) => {
                *n -= 1;
                Some(error)
            }
        }
    }

    async fn concurrent_bump(&self, key: &str) {
        if let Ok(current) = read_counter(&self.inner, key).await {
            let _ = write_counter(&self.inner, key, current.value + 1, current.version).await;
        }
    }
}

#[async_trait]
impl CounterStore for ScriptedStore {
    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.read_fails() {
            return Err(error);
        }
        self.inner.get(key).await
    }

    async fn set(
        &self,
        key: &str,
        value: &[u8],
        expected: Version,
    ) -> Result<WriteOutcome, StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.write_fails(key) {
            return Err(error);
        }

        let lose_race = self
            .cas_mismatches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lose_race {
            self.concurrent_bump(key).await;
        }

        self.inner.set(key, value, expected).await
    }
}
