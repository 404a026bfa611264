//! Counter store port and an in-memory implementation.
//!
//! The store is the only shared mutable state between requests. Each key
//! carries a version that changes on every write, and writes are
//! compare-and-swap against the version the writer last read.

use std::fmt;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

use super::key::CounterKey;

/// Errors raised by a counter store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store operation timed out")]
    Timeout,
    #[error("stored value has {len} bytes, expected 4")]
    InvalidValue { len: usize },
}

/// Opaque per-key version token used for compare-and-swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Version(pub u32);

impl Version {
    /// Expected version for a key that has never been written.
    pub const ABSENT: Version = Version(0);
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A raw value and its current version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    pub bytes: Vec<u8>,
    pub version: Version,
}

/// Result of a conditional write that reached the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write was applied.
    Committed,
    /// Another writer changed the key since it was read.
    CasMismatch,
}

/// Shared key-value store with per-key versioning.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Read a key. `Ok(None)` means the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StoreError>;

    /// Write `value` if the key's version still equals `expected`.
    ///
    /// `Version::ABSENT` only matches a key that does not exist.
    async fn set(&self, key: &str, value: &[u8], expected: Version)
        -> Result<WriteOutcome, StoreError>;
}

/// A counter value as seen by one read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterRead {
    pub value: i32,
    pub version: Version,
    pub found: bool,
}

impl CounterRead {
    /// The read of a key that does not exist yet.
    pub const FRESH: CounterRead = CounterRead {
        value: 0,
        version: Version::ABSENT,
        found: false,
    };
}

/// Encode a counter as 4 little-endian bytes.
pub fn encode_counter(value: i32) -> [u8; 4] {
    value.to_le_bytes()
}

/// Decode a counter stored by [`encode_counter`].
pub fn decode_counter(bytes: &[u8]) -> Result<i32, StoreError> {
    let raw: [u8; 4] = bytes
        .try_into()
        .map_err(|_| StoreError::InvalidValue { len: bytes.len() })?;
    Ok(i32::from_le_bytes(raw))
}

/// Read and decode one counter.
pub async fn read_counter<S>(store: &S, key: &str) -> Result<CounterRead, StoreError>
where
    S: CounterStore + ?Sized,
{
    match store.get(key).await? {
        Some(stored) => Ok(CounterRead {
            value: decode_counter(&stored.bytes)?,
            version: stored.version,
            found: true,
        }),
        None => Ok(CounterRead::FRESH),
    }
}

/// Write one counter conditionally.
pub async fn write_counter<S>(
    store: &S,
    key: &str,
    value: i32,
    expected: Version,
) -> Result<WriteOutcome, StoreError>
where
    S: CounterStore + ?Sized,
{
    store.set(key, &encode_counter(value), expected).await
}

/// In-memory counter store.
///
/// Compare-and-swap is atomic per key. Versions start at 1 and wrap past
/// `u32::MAX` without ever returning to `Version::ABSENT`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove all keys.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Drop counter buckets whose window has passed at `now_ms`.
    ///
    /// Keys that are not counter keys are kept. Returns how many were removed.
    pub fn purge_expired(&self, now_ms: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| {
            CounterKey::parse(key).map_or(true, |counter| !counter.is_expired(now_ms))
        });
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed = removed, "Purged expired counter buckets");
        }
        removed
    }
}

fn next_version(current: Version) -> Version {
    match current.0.wrapping_add(1) {
        0 => Version(1),
        n => Version(n),
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StoreError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(
        &self,
        key: &str,
        value: &[u8],
        expected: Version,
    ) -> Result<WriteOutcome, StoreError> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get().version;
                if current != expected {
                    return Ok(WriteOutcome::CasMismatch);
                }
                occupied.insert(StoredValue {
                    bytes: value.to_vec(),
                    version: next_version(current),
                });
                Ok(WriteOutcome::Committed)
            }
            Entry::Vacant(vacant) => {
                if expected != Version::ABSENT {
                    return Ok(WriteOutcome::CasMismatch);
                }
                vacant.insert(StoredValue {
                    bytes: value.to_vec(),
                    version: Version(1),
                });
                Ok(WriteOutcome::Committed)
            }
        }
    }
}
