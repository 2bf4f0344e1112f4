//! Concurrent entry table: the node-local cache index.
//!
//! Maps keys to shared [`Entry`] handles so transactions, fetch workers, and
//! eviction workers all coordinate against the same per-key state machine.
//! The table is deliberately thin: it owns the index, a capacity bound, and
//! activity counters. Picking eviction victims, driving the network
//! writeback, and deciding who may read or write a key belong to the
//! surrounding system, which acts through the entry API.
//!
//! ## Key Components
//! - [`EntryTable`]: thread-safe index from keys to `Arc<Entry>`.
//! - [`InsertError`]: capacity or duplicate-key insert failure.
//! - [`TableMetrics`]: snapshot of hit/miss/insert/remove counters.
//!
//! ## Removal Discipline
//! An entry leaves the index only after its state machine has reached the
//! terminal [`State::Decached`]; [`EntryTable::remove`] refuses anything
//! else. Threads still blocked on the entry hold their own `Arc` and finish
//! their waits against the decached state.

use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::entry::{Entry, State};
use crate::error::InvalidStateError;
use crate::key::EntryKey;

/// Snapshot of table-level metrics.
///
/// All fields are cumulative since table creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableMetrics {
    /// Number of successful lookups.
    pub hits: u64,
    /// Number of failed lookups.
    pub misses: u64,
    /// Number of entries inserted.
    pub inserts: u64,
    /// Number of decached entries removed.
    pub removes: u64,
}

/// Table metrics counters.
#[derive(Debug, Default)]
struct TableCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    removes: AtomicU64,
}

impl TableCounters {
    /// Snapshot current table metrics.
    fn snapshot(&self) -> TableMetrics {
        TableMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
        }
    }

    /// Increment hit counter.
    fn inc_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment miss counter.
    fn inc_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment insert counter.
    fn inc_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment remove counter.
    fn inc_remove(&self) {
        self.removes.fetch_add(1, Ordering::Relaxed);
    }
}

/// Error returned when an entry cannot be inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertError {
    /// The table is at capacity.
    Full,
    /// A live entry for the key already exists.
    Occupied,
}

impl fmt::Display for InsertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsertError::Full => f.write_str("entry table is at capacity"),
            InsertError::Occupied => f.write_str("a live entry for the key already exists"),
        }
    }
}

impl std::error::Error for InsertError {}

/// Thread-safe index from keys to shared cache entries.
pub struct EntryTable<K, V> {
    index: RwLock<FxHashMap<K, Arc<Entry<K, V>>>>,
    capacity: usize,
    metrics: TableCounters,
}

impl<K, V> EntryTable<K, V>
where
    K: EntryKey + Clone + Eq + Hash,
{
    /// Creates a table with a fixed capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            index: RwLock::new(FxHashMap::default()),
            capacity,
            metrics: TableCounters::default(),
        }
    }

    /// Creates an entry for `key` in the given initial state and indexes it.
    ///
    /// Returns the shared handle on success. Fails with
    /// [`InsertError::Occupied`] when the key is already indexed and
    /// [`InsertError::Full`] at capacity.
    pub fn try_insert(
        &self,
        key: K,
        context_id: u64,
        state: State,
    ) -> Result<Arc<Entry<K, V>>, InsertError> {
        let mut index = self.index.write();
        if index.contains_key(&key) {
            return Err(InsertError::Occupied);
        }
        if index.len() >= self.capacity {
            return Err(InsertError::Full);
        }
        let entry = Arc::new(Entry::new(key.clone(), context_id, state));
        index.insert(key, Arc::clone(&entry));
        self.metrics.inc_insert();
        Ok(entry)
    }

    /// Fetches the entry for a key.
    pub fn get(&self, key: &K) -> Option<Arc<Entry<K, V>>> {
        match self.index.read().get(key).cloned() {
            Some(entry) => {
                self.metrics.inc_hit();
                Some(entry)
            },
            None => {
                self.metrics.inc_miss();
                None
            },
        }
    }

    /// Removes a fully decached entry from the index.
    ///
    /// Returns `Ok(None)` when the key is not indexed, and refuses with an
    /// invalid-state error (expected [`State::Decached`]) when the entry's
    /// lifecycle has not finished.
    pub fn remove(&self, key: &K) -> Result<Option<Arc<Entry<K, V>>>, InvalidStateError> {
        let mut index = self.index.write();
        let Some(entry) = index.get(key) else {
            return Ok(None);
        };
        entry.lock().verify("remove", &[State::Decached])?;
        let removed = index.remove(key);
        self.metrics.inc_remove();
        Ok(removed)
    }

    /// Whether a key is indexed.
    pub fn contains(&self, key: &K) -> bool {
        self.index.read().contains_key(key)
    }

    /// Number of indexed entries.
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// The maximum number of entries.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot table metrics.
    pub fn metrics(&self) -> TableMetrics {
        self.metrics.snapshot()
    }
}

impl<K: EntryKey, V> fmt::Debug for EntryTable<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryTable")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}
