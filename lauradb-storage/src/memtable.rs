//! Skip-list backed memtable.
//!
//! The skip list itself is `crossbeam_skiplist::SkipMap`: a probabilistic
//! ordered map with expected O(log n) search/insert and deterministic
//! ascending iteration. `MemTable` wraps it with an approximate byte-size
//! counter so the engine can decide when to rotate.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_skiplist::SkipMap;
use lauradb_common::Key;

/// One entry as held in an active or immutable memtable.
#[derive(Debug, Clone)]
pub struct MemTableEntry {
    pub value: Option<Vec<u8>>,
    pub timestamp: i64,
    pub deleted: bool,
}

impl MemTableEntry {
    pub fn put(value: Vec<u8>, timestamp: i64) -> Self {
        Self {
            value: Some(value),
            timestamp,
            deleted: false,
        }
    }

    pub fn tombstone(timestamp: i64) -> Self {
        Self {
            value: None,
            timestamp,
            deleted: true,
        }
    }
}

/// An in-memory sorted table of pending writes.
pub struct MemTable {
    map: SkipMap<Key, MemTableEntry>,
    approximate_size: AtomicUsize,
}

impl MemTable {
    pub fn new() -> Self {
        Self {
            map: SkipMap::new(),
            approximate_size: AtomicUsize::new(0),
        }
    }

    /// Records a put, overwriting any prior entry for `key` in place.
    pub fn put(&self, key: Key, value: Vec<u8>, timestamp: i64) {
        let size = key.len() + value.len();
        if let Some(old) = self.map.get(&key) {
            self.approximate_size.fetch_sub(
                old.value().value.as_ref().map_or(0, Vec::len) + key.len(),
                Ordering::Relaxed,
            );
        }
        self.map.insert(key, MemTableEntry::put(value, timestamp));
        self.approximate_size.fetch_add(size, Ordering::Relaxed);
    }

    /// Records a tombstone for `key`.
    pub fn delete(&self, key: Key, timestamp: i64) {
        self.approximate_size
            .fetch_add(key.len(), Ordering::Relaxed);
        self.map.insert(key, MemTableEntry::tombstone(timestamp));
    }

    pub fn get(&self, key: &[u8]) -> Option<MemTableEntry> {
        self.map.get(key).map(|e| e.value().clone())
    }

    pub fn is_full(&self, threshold: usize) -> bool {
        self.approximate_size.load(Ordering::Relaxed) >= threshold
    }

    pub fn approximate_size(&self) -> usize {
        self.approximate_size.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Ascending-key iteration, as the spec requires of skip list iteration.
    pub fn iter(&self) -> impl Iterator<Item = (Key, MemTableEntry)> + '_ {
        self.map.iter().map(|e| (e.key().clone(), e.value().clone()))
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}
