//! MVCC transaction manager: first-committer-wins snapshot isolation.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{bounded, Sender};
use lauradb_common::{
    metrics, now_millis, Error, Key, Result, TransactionError, TxnId, Version, VersionedValue,
};
use parking_lot::{Mutex, RwLock};

use crate::version_store::VersionStore;

/// Message sent to the background garbage-collection worker.
enum GcMsg {
    Watermark(Version),
    Shutdown,
}

fn gc_worker(version_store: Arc<VersionStore>, rx: crossbeam::channel::Receiver<GcMsg>) {
    for msg in rx {
        match msg {
            GcMsg::Watermark(watermark) => {
                metrics::set_gc_watermark(watermark);
                version_store.garbage_collect(watermark);
            }
            GcMsg::Shutdown => return,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnStatus {
    Active,
    Committed,
    Aborted,
}

#[derive(Debug, Clone)]
enum WriteOp {
    Put(Vec<u8>),
    Delete,
}

/// A single transaction's private state. Reads and writes against it never
/// take the manager's coarse lock; only `commit`/`abort` do.
pub struct Transaction {
    pub id: TxnId,
    pub read_version: Version,
    status: RwLock<TxnStatus>,
    write_set: RwLock<HashMap<Key, WriteOp>>,
    read_set: RwLock<HashMap<Key, Version>>,
}

impl Transaction {
    fn new(id: TxnId, read_version: Version) -> Self {
        Self {
            id,
            read_version,
            status: RwLock::new(TxnStatus::Active),
            write_set: RwLock::new(HashMap::new()),
            read_set: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_active(&self) -> bool {
        *self.status.read() == TxnStatus::Active
    }

    /// A snapshot of this transaction's pending writes, for callers (such
    /// as a session facade) that need to mirror them into durable storage
    /// and the oplog once `commit` has validated them.
    pub fn writes(&self) -> Vec<(Key, Option<Vec<u8>>)> {
        self.write_set
            .read()
            .iter()
            .map(|(key, op)| {
                let value = match op {
                    WriteOp::Put(value) => Some(value.clone()),
                    WriteOp::Delete => None,
                };
                (key.clone(), value)
            })
            .collect()
    }
}

/// Monotonic counters, the active/committed transaction sets, and the
/// version store, guarded by one coarse lock around begin/commit/abort.
pub struct TransactionManager {
    next_txn_id: std::sync::atomic::AtomicU64,
    next_version: std::sync::atomic::AtomicU64,
    active: RwLock<HashMap<TxnId, Arc<Transaction>>>,
    /// Committed transaction ids retained for GC watermark bookkeeping,
    /// mapped to the commit version they installed.
    committed: RwLock<HashMap<TxnId, Version>>,
    commit_lock: Mutex<()>,
    version_store: Arc<VersionStore>,
    gc_tx: Sender<GcMsg>,
    gc_handle: Option<JoinHandle<()>>,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    pub fn new() -> Self {
        let version_store = Arc::new(VersionStore::new());
        let (gc_tx, gc_rx) = bounded::<GcMsg>(64);
        let worker_store = version_store.clone();
        let gc_handle = std::thread::spawn(move || gc_worker(worker_store, gc_rx));

        Self {
            next_txn_id: std::sync::atomic::AtomicU64::new(0),
            next_version: std::sync::atomic::AtomicU64::new(0),
            active: RwLock::new(HashMap::new()),
            committed: RwLock::new(HashMap::new()),
            commit_lock: Mutex::new(()),
            version_store,
            gc_tx,
            gc_handle: Some(gc_handle),
        }
    }

    /// Allocates a `txn_id`, snapshots `next_version` as `read_version`,
    /// and registers the transaction as active.
    pub fn begin(&self) -> Arc<Transaction> {
        use std::sync::atomic::Ordering;
        let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst) + 1;
        let read_version = self.next_version.load(Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(id, read_version));
        self.active.write().insert(id, txn.clone());
        txn
    }

    /// Installs a previously-durable write back into the version store and
    /// advances the version counter past it, so transactions begun after
    /// recovery never reuse a version already visible on disk. Callers
    /// (see `Database::open`) must replay in increasing version order.
    pub fn recover_write(&self, key: Key, value: Option<Vec<u8>>, version: Version) {
        let (value, deleted_by_txn) = match value {
            Some(value) => (value, 0),
            None => (Vec::new(), u64::MAX),
        };
        self.version_store.put(
            key,
            VersionedValue {
                value,
                version,
                created_by_txn: 0,
                deleted_by_txn,
                commit_time: now_millis(),
            },
        );

        use std::sync::atomic::Ordering;
        let mut current = self.next_version.load(Ordering::SeqCst);
        while version > current {
            match self.next_version.compare_exchange(
                current,
                version,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    /// Read-your-own-writes, then fall through to the snapshot view.
    pub fn read(&self, txn: &Transaction, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(op) = txn.write_set.read().get(key) {
            return Ok(match op {
                WriteOp::Put(value) => Some(value.clone()),
                WriteOp::Delete => None,
            });
        }

        let observed = self.version_store.get_version(key, txn.read_version);
        let observed_version = observed.as_ref().map_or(0, |v| v.version);
        txn.read_set.write().insert(key.to_vec(), observed_version);
        Ok(observed.map(|v| v.value))
    }

    pub fn write(&self, txn: &Transaction, key: Key, value: Vec<u8>) {
        txn.write_set.write().insert(key, WriteOp::Put(value));
    }

    pub fn delete(&self, txn: &Transaction, key: Key) {
        txn.write_set.write().insert(key, WriteOp::Delete);
    }

    /// Validates the read/write sets against the version store under the
    /// commit lock, installs new versions on success, and asynchronously
    /// triggers GC with the current watermark.
    pub fn commit(&self, txn: &Transaction) -> Result<Version> {
        let _guard = self.commit_lock.lock();

        if !txn.is_active() {
            return Err(Error::Transaction(TransactionError::NotActive));
        }

        let write_set = txn.write_set.read();
        let read_set = txn.read_set.read();

        for (key, observed_version) in read_set.iter() {
            if write_set.contains_key(key) {
                let latest = self.version_store.latest_version(key);
                if latest > *observed_version && latest > txn.read_version {
                    metrics::record_txn_commit(false);
                    return Err(Error::Transaction(TransactionError::Conflict));
                }
            }
        }

        for key in write_set.keys() {
            if !read_set.contains_key(key) {
                let latest = self.version_store.latest_version(key);
                if latest > txn.read_version {
                    metrics::record_txn_commit(false);
                    return Err(Error::Transaction(TransactionError::Conflict));
                }
            }
        }

        use std::sync::atomic::Ordering;
        let commit_version = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        let commit_time = now_millis();

        for (key, op) in write_set.iter() {
            let (value, deleted_by_txn) = match op {
                WriteOp::Put(value) => (value.clone(), 0),
                WriteOp::Delete => (Vec::new(), txn.id),
            };
            self.version_store.put(
                key.clone(),
                VersionedValue {
                    value,
                    version: commit_version,
                    created_by_txn: txn.id,
                    deleted_by_txn,
                    commit_time,
                },
            );
        }
        drop(write_set);
        drop(read_set);

        *txn.status.write() = TxnStatus::Committed;
        self.active.write().remove(&txn.id);
        self.committed.write().insert(txn.id, commit_version);

        metrics::record_txn_commit(true);
        self.trigger_gc();

        Ok(commit_version)
    }

    pub fn abort(&self, txn: &Transaction) {
        *txn.status.write() = TxnStatus::Aborted;
        self.active.write().remove(&txn.id);
        metrics::record_txn_abort();
    }

    /// Computes the current GC watermark and hands it to the background
    /// worker. Never scans the version store itself: a full per-key sweep
    /// on every commit would turn this coarse critical section into an
    /// O(total keys) one.
    fn trigger_gc(&self) {
        let watermark = self
            .active
            .read()
            .values()
            .map(|txn| txn.read_version)
            .min()
            .unwrap_or_else(|| self.next_version.load(std::sync::atomic::Ordering::SeqCst));

        // A full channel means a GC pass is already queued with a watermark
        // computed no earlier than this one; dropping this tick is fine.
        let _ = self.gc_tx.try_send(GcMsg::Watermark(watermark));
    }
}

impl Drop for TransactionManager {
    fn drop(&mut self) {
        let _ = self.gc_tx.send(GcMsg::Shutdown);
        if let Some(handle) = self.gc_handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_your_own_writes() {
        let mgr = TransactionManager::new();
        let txn = mgr.begin();
        mgr.write(&txn, b"k".to_vec(), b"v1".to_vec());
        assert_eq!(mgr.read(&txn, b"k").unwrap(), Some(b"v1".to_vec()));
    }

    #[test]
    fn snapshot_isolation_hides_concurrent_commits() {
        let mgr = TransactionManager::new();

        let writer = mgr.begin();
        mgr.write(&writer, b"k".to_vec(), b"v1".to_vec());

        let reader = mgr.begin();
        assert_eq!(mgr.read(&reader, b"k").unwrap(), None);

        mgr.commit(&writer).unwrap();

        assert_eq!(mgr.read(&reader, b"k").unwrap(), None);

        let later = mgr.begin();
        assert_eq!(mgr.read(&later, b"k").unwrap(), Some(b"v1".to_vec()));
    }

    #[test]
    fn first_committer_wins_on_write_write_conflict() {
        let mgr = TransactionManager::new();

        let a = mgr.begin();
        let b = mgr.begin();

        mgr.read(&a, b"k").unwrap();
        mgr.read(&b, b"k").unwrap();

        mgr.write(&a, b"k".to_vec(), b"from-a".to_vec());
        mgr.write(&b, b"k".to_vec(), b"from-b".to_vec());

        mgr.commit(&a).unwrap();
        let err = mgr.commit(&b).unwrap_err();
        assert!(matches!(
            err,
            Error::Transaction(TransactionError::Conflict)
        ));
    }

    #[test]
    fn commit_on_inactive_transaction_fails() {
        let mgr = TransactionManager::new();
        let txn = mgr.begin();
        mgr.commit(&txn).unwrap();
        let err = mgr.commit(&txn).unwrap_err();
        assert!(matches!(
            err,
            Error::Transaction(TransactionError::NotActive)
        ));
    }

    #[test]
    fn abort_discards_write_set() {
        let mgr = TransactionManager::new();
        let txn = mgr.begin();
        mgr.write(&txn, b"k".to_vec(), b"v".to_vec());
        mgr.abort(&txn);

        let reader = mgr.begin();
        assert_eq!(mgr.read(&reader, b"k").unwrap(), None);
    }

    #[test]
    fn delete_then_commit_is_a_tombstone() {
        let mgr = TransactionManager::new();
        let writer = mgr.begin();
        mgr.write(&writer, b"k".to_vec(), b"v".to_vec());
        mgr.commit(&writer).unwrap();

        let deleter = mgr.begin();
        mgr.delete(&deleter, b"k".to_vec());
        mgr.commit(&deleter).unwrap();

        let reader = mgr.begin();
        assert_eq!(mgr.read(&reader, b"k").unwrap(), None);
    }

    #[test]
    fn commit_triggers_background_gc_that_prunes_superseded_versions() {
        let mgr = TransactionManager::new();

        let w1 = mgr.begin();
        mgr.write(&w1, b"k".to_vec(), b"v1".to_vec());
        let v1 = mgr.commit(&w1).unwrap();

        let w2 = mgr.begin();
        mgr.write(&w2, b"k".to_vec(), b"v2".to_vec());
        mgr.commit(&w2).unwrap();

        // No active readers hold back the watermark, so the GC worker should
        // eventually prune "v1" off the chain in the background.
        let mut pruned = false;
        for _ in 0..50 {
            if mgr.version_store.get_version(b"k", v1).is_none() {
                pruned = true;
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert!(pruned, "background GC did not prune superseded version");
    }
}
