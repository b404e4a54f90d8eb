//! A session bound to exactly one transaction: the data-flow unit through
//! which writes enter the transaction's write set and, on commit, are
//! mirrored into durable storage and appended to the oplog.

use std::sync::Arc;

use lauradb_common::{now_millis, Key, OpType, OplogEntry, Result, Version};
use lauradb_txn::Transaction;

use crate::database::Database;

/// Database/collection the facade stamps onto oplog entries it generates
/// on behalf of a session; the core itself is collection-agnostic, a
/// higher query layer is responsible for real routing (see Non-goals).
const DEFAULT_DATABASE: &str = "default";
const DEFAULT_COLLECTION: &str = "default";

pub struct Session {
    database: Arc<Database>,
    txn: Arc<Transaction>,
}

impl Session {
    pub(crate) fn new(database: Arc<Database>) -> Self {
        let txn = database.txn_manager.begin();
        Self { database, txn }
    }

    pub fn txn(&self) -> &Arc<Transaction> {
        &self.txn
    }

    pub fn txn_id(&self) -> u64 {
        self.txn.id
    }

    /// Read-your-own-writes, else the transaction's MVCC snapshot.
    pub fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.database.txn_manager.read(&self.txn, key)
    }

    pub fn write(&self, key: Key, value: Vec<u8>) {
        self.database.txn_manager.write(&self.txn, key, value);
    }

    pub fn delete(&self, key: Key) {
        self.database.txn_manager.delete(&self.txn, key);
    }

    /// Validates and installs the transaction's writes, then mirrors each
    /// one into the LSM engine (the version store's durable substrate) and
    /// appends one oplog entry per logical operation.
    pub fn commit(self) -> Result<Version> {
        let writes = self.txn.writes();
        let commit_version = self.database.txn_manager.commit(&self.txn)?;
        mirror_writes(&self.database, writes)?;
        Ok(commit_version)
    }

    pub fn abort(self) {
        self.database.txn_manager.abort(&self.txn);
    }
}

/// Shared by [`Session::commit`] and the 2PC [`crate::two_phase::SessionParticipant`]:
/// installs each write into the LSM engine and appends its oplog entry.
pub(crate) fn mirror_writes(
    database: &Arc<Database>,
    writes: Vec<(Key, Option<Vec<u8>>)>,
) -> Result<()> {
    for (key, value) in writes {
        let doc_id = String::from_utf8_lossy(&key).into_owned();
        match value {
            Some(value) => {
                let value_repr = String::from_utf8_lossy(&value).into_owned();
                database.storage.put(key, value)?;
                database.oplog.append(OplogEntry {
                    op_id: 0,
                    timestamp: now_millis(),
                    op_type: OpType::Insert,
                    database: DEFAULT_DATABASE.to_string(),
                    collection: DEFAULT_COLLECTION.to_string(),
                    doc_id: Some(doc_id.clone()),
                    document: Some(serde_json::json!({ "_id": doc_id, "value": value_repr })),
                    filter: None,
                    update: None,
                    index_def: None,
                })?;
            }
            None => {
                database.storage.delete(key)?;
                database.oplog.append(OplogEntry {
                    op_id: 0,
                    timestamp: now_millis(),
                    op_type: OpType::Delete,
                    database: DEFAULT_DATABASE.to_string(),
                    collection: DEFAULT_COLLECTION.to_string(),
                    doc_id: Some(doc_id),
                    document: None,
                    filter: None,
                    update: None,
                    index_def: None,
                })?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lauradb_common::Config;

    fn test_database(dir: &std::path::Path) -> Arc<Database> {
        let mut config = Config::default();
        config.lsm.dir = dir.join("lsm").to_string_lossy().into_owned();
        config.oplog.path = dir.join("oplog.log").to_string_lossy().into_owned();
        Arc::new(Database::open(config).unwrap())
    }

    #[test]
    fn commit_mirrors_writes_into_storage_and_oplog() {
        let dir = tempfile::tempdir().unwrap();
        let db = test_database(dir.path());

        let session = db.start_session();
        session.write(b"key1".to_vec(), b"value1".to_vec());
        session.commit().unwrap();

        assert_eq!(
            db.storage().get(b"key1").unwrap(),
            Some(b"value1".to_vec())
        );
        assert_eq!(db.oplog().current_id(), 1);
    }

    #[test]
    fn snapshot_isolation_across_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let db = test_database(dir.path());

        let t1 = db.start_session();
        t1.write(b"key1".to_vec(), b"initial".to_vec());
        t1.commit().unwrap();

        let t2 = db.start_session();
        assert_eq!(t2.read(b"key1").unwrap(), Some(b"initial".to_vec()));

        let t3 = db.start_session();
        t3.write(b"key1".to_vec(), b"modified".to_vec());
        t3.commit().unwrap();

        assert_eq!(t2.read(b"key1").unwrap(), Some(b"initial".to_vec()));
        t2.commit().unwrap();

        let t4 = db.start_session();
        assert_eq!(t4.read(b"key1").unwrap(), Some(b"modified".to_vec()));
    }
}
