//! Top-level facade wiring the LSM engine, transaction manager, oplog,
//! replica set and change streams into one embeddable database.

use std::sync::Arc;

use lauradb_changestream::{ChangeStream, ChangeStreamOptions};
use lauradb_common::{Config, OpType, Result};
use lauradb_oplog::{Oplog, OplogOptions};
use lauradb_replicaset::ReplicaSet;
use lauradb_storage::{LsmEngine, LsmOptions};
use lauradb_txn::TransactionManager;
use tracing::info;

use crate::session::Session;

/// An embedded LauraDB instance: one LSM engine as the durable key/value
/// substrate, one transaction manager for MVCC, one oplog for replication
/// and change-stream fan-out, and an optional replica-set role.
pub struct Database {
    pub(crate) storage: Arc<LsmEngine>,
    pub(crate) txn_manager: Arc<TransactionManager>,
    pub(crate) oplog: Arc<Oplog>,
    replica_set: Arc<ReplicaSet>,
}

impl Database {
    /// Opens (or creates) a database under `config.database.data_dir`,
    /// recovering the LSM engine and the oplog from what's already there.
    pub fn open(config: Config) -> Result<Self> {
        info!(data_dir = %config.database.data_dir, "opening LauraDB");

        let storage = Arc::new(LsmEngine::open(LsmOptions {
            dir: config.lsm.dir.clone().into(),
            memtable_size: config.lsm.memtable_size,
            index_interval: config.lsm.index_interval,
            compaction_threshold: config.lsm.compaction_threshold,
        })?);

        let oplog = Arc::new(Oplog::open(OplogOptions {
            path: config.oplog.path.clone().into(),
            max_cached: config.oplog.max_cached,
        })?);

        let txn_manager = Arc::new(TransactionManager::new());
        replay_into_version_store(&oplog, &txn_manager)?;

        let replica_set = Arc::new(ReplicaSet::new(
            config.replica_set.clone(),
            oplog.clone(),
        ));

        Ok(Self {
            storage,
            txn_manager,
            oplog,
            replica_set,
        })
    }

    /// Begins a new session bound to a fresh MVCC transaction.
    pub fn start_session(self: &Arc<Self>) -> Session {
        Session::new(self.clone())
    }

    pub fn replica_set(&self) -> &Arc<ReplicaSet> {
        &self.replica_set
    }

    pub fn oplog(&self) -> &Arc<Oplog> {
        &self.oplog
    }

    pub fn storage(&self) -> &Arc<LsmEngine> {
        &self.storage
    }

    /// Opens a tailing change stream over this database's oplog.
    pub fn watch(&self, options: ChangeStreamOptions) -> ChangeStream {
        ChangeStream::new(self.oplog.clone(), options)
    }

    /// Flushes the LSM engine and fsyncs the oplog; call before dropping a
    /// `Database` whose writes must be fully durable.
    pub fn flush(&self) -> Result<()> {
        self.storage.flush()?;
        self.oplog.flush()?;
        Ok(())
    }
}

/// Rebuilds the transaction manager's version store from the durable oplog
/// so that transactional reads see previously-committed keys across a
/// restart, not just the LSM engine's latest-value view. Entries are
/// replayed in the order they were appended (already increasing `op_id`,
/// per oplog monotonicity), using each entry's `op_id` as its version.
fn replay_into_version_store(oplog: &Oplog, txn_manager: &TransactionManager) -> Result<()> {
    for entry in oplog.get_entries_since(0)? {
        let Some(doc_id) = &entry.doc_id else {
            continue;
        };
        let key = doc_id.clone().into_bytes();
        match entry.op_type {
            OpType::Insert => {
                let value = entry
                    .document
                    .as_ref()
                    .and_then(|doc| doc.get("value"))
                    .and_then(|v| v.as_str())
                    .map(|s| s.as_bytes().to_vec())
                    .unwrap_or_default();
                txn_manager.recover_write(key, Some(value), entry.op_id);
            }
            OpType::Delete => {
                txn_manager.recover_write(key, None, entry.op_id);
            }
            _ => {}
        }
    }
    Ok(())
}
