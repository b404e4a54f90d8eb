//! Per-key version chains behind a single read-write lock.
//!
//! Each key maps to its chain of [`VersionedValue`]s ordered newest-first.
//! Snapshot reads walk the chain looking for the first entry whose version
//! is at most the reader's `read_version`; they never block a concurrent
//! writer for longer than it takes to clone one entry.

use std::collections::HashMap;

use lauradb_common::{Key, Version, VersionedValue};
use parking_lot::RwLock;

#[derive(Default)]
pub struct VersionStore {
    chains: RwLock<HashMap<Key, Vec<VersionedValue>>>,
}

impl VersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepends `versioned_value` to `key`'s chain (it must carry the
    /// highest version seen so far for that key). Also used to replay
    /// previously-durable entries back into the chain on recovery, in which
    /// case callers must replay in increasing version order.
    pub fn put(&self, key: Key, versioned_value: VersionedValue) {
        let mut chains = self.chains.write();
        chains.entry(key).or_default().insert(0, versioned_value);
    }

    /// Returns the newest entry with `version <= at_version`, honouring
    /// tombstones (a tombstone entry is returned as `None`, not skipped).
    pub fn get_version(&self, key: &[u8], at_version: Version) -> Option<VersionedValue> {
        let chains = self.chains.read();
        let chain = chains.get(key)?;
        chain
            .iter()
            .find(|v| v.version <= at_version)
            .filter(|v| !v.is_tombstone())
            .cloned()
    }

    /// The head version for `key`, or zero if the key has never been
    /// written.
    pub fn latest_version(&self, key: &[u8]) -> Version {
        self.chains
            .read()
            .get(key)
            .and_then(|chain| chain.first())
            .map_or(0, |v| v.version)
    }

    /// Drops chain entries older than the newest version `<= watermark`,
    /// keeping exactly one entry visible to any snapshot at or below the
    /// watermark.
    pub fn garbage_collect(&self, watermark: Version) {
        let mut chains = self.chains.write();
        for chain in chains.values_mut() {
            let cutoff = chain.iter().position(|v| v.version <= watermark);
            if let Some(cutoff) = cutoff {
                chain.truncate(cutoff + 1);
            }
        }
        chains.retain(|_, chain| !chain.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn versioned(version: Version, value: &str, deleted_by: u64) -> VersionedValue {
        VersionedValue {
            value: value.as_bytes().to_vec(),
            version,
            created_by_txn: 1,
            deleted_by_txn: deleted_by,
            commit_time: 0,
        }
    }

    #[test]
    fn get_version_honours_snapshot() {
        let store = VersionStore::new();
        store.put(b"k".to_vec(), versioned(1, "a", 0));
        store.put(b"k".to_vec(), versioned(2, "b", 0));

        assert_eq!(store.get_version(b"k", 1).unwrap().value, b"a");
        assert_eq!(store.get_version(b"k", 2).unwrap().value, b"b");
        assert!(store.get_version(b"k", 0).is_none());
    }

    #[test]
    fn tombstone_hides_value_without_removing_history() {
        let store = VersionStore::new();
        store.put(b"k".to_vec(), versioned(1, "a", 0));
        store.put(b"k".to_vec(), versioned(2, "", 2));

        assert!(store.get_version(b"k", 2).is_none());
        assert_eq!(store.get_version(b"k", 1).unwrap().value, b"a");
    }

    #[test]
    fn garbage_collect_keeps_one_reachable_entry_per_watermark() {
        let store = VersionStore::new();
        store.put(b"k".to_vec(), versioned(1, "a", 0));
        store.put(b"k".to_vec(), versioned(2, "b", 0));
        store.put(b"k".to_vec(), versioned(3, "c", 0));

        store.garbage_collect(2);

        assert_eq!(store.get_version(b"k", 2).unwrap().value, b"b");
        assert_eq!(store.get_version(b"k", 3).unwrap().value, b"c");
        assert!(store.get_version(b"k", 1).is_none());
    }
}
