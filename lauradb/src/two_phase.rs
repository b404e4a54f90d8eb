//! Adapts a facade [`Session`] into a two-phase commit [`Participant`] whose
//! `commit` mirrors the transaction's writes into storage and the oplog,
//! the same way a locally-committed session does.

use std::sync::Arc;

use async_trait::async_trait;
use lauradb_common::{Result, TxnId};
use lauradb_txn::{Participant, Transaction, TransactionManager};

use crate::database::Database;
use crate::session::mirror_writes;

pub struct SessionParticipant {
    database: Arc<Database>,
    manager: Arc<TransactionManager>,
    txn: Arc<Transaction>,
}

impl SessionParticipant {
    pub fn new(database: Arc<Database>, txn: Arc<Transaction>) -> Self {
        let manager = database.txn_manager.clone();
        Self {
            database,
            manager,
            txn,
        }
    }
}

#[async_trait]
impl Participant for SessionParticipant {
    async fn prepare(&self, _txn_id: TxnId) -> Result<bool> {
        Ok(self.txn.is_active())
    }

    async fn commit(&self, _txn_id: TxnId) -> Result<()> {
        let writes = self.txn.writes();
        self.manager.commit(&self.txn)?;
        mirror_writes(&self.database, writes)
    }

    async fn abort(&self, _txn_id: TxnId) -> Result<()> {
        self.manager.abort(&self.txn);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lauradb_common::Config;
    use lauradb_txn::TwoPcCoordinator;
    use std::time::Duration;

    fn test_database(dir: &std::path::Path) -> Arc<Database> {
        let mut config = Config::default();
        config.lsm.dir = dir.join("lsm").to_string_lossy().into_owned();
        config.oplog.path = dir.join("oplog.log").to_string_lossy().into_owned();
        Arc::new(Database::open(config).unwrap())
    }

    #[tokio::test]
    async fn two_phase_commit_mirrors_writes_on_commit() {
        let dir = tempfile::tempdir().unwrap();
        let db = test_database(dir.path());

        let session = db.start_session();
        session.write(b"key1".to_vec(), b"value1".to_vec());
        let txn = session.txn().clone();

        let coordinator = TwoPcCoordinator::new(txn.id, Duration::from_secs(1));
        coordinator
            .add_participant("db", Arc::new(SessionParticipant::new(db.clone(), txn)))
            .unwrap();

        coordinator.execute().await.unwrap();

        assert_eq!(
            db.storage().get(b"key1").unwrap(),
            Some(b"value1".to_vec())
        );
        assert_eq!(db.oplog().current_id(), 1);
    }

    #[tokio::test]
    async fn a_no_vote_participant_aborts_the_session_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let db = test_database(dir.path());

        let session = db.start_session();
        session.write(b"key1".to_vec(), b"value1".to_vec());
        let txn = session.txn().clone();

        struct AlwaysNo;
        #[async_trait]
        impl Participant for AlwaysNo {
            async fn prepare(&self, _txn_id: TxnId) -> Result<bool> {
                Ok(false)
            }
            async fn commit(&self, _txn_id: TxnId) -> Result<()> {
                Ok(())
            }
            async fn abort(&self, _txn_id: TxnId) -> Result<()> {
                Ok(())
            }
        }

        let coordinator = TwoPcCoordinator::new(txn.id, Duration::from_secs(1));
        coordinator
            .add_participant("db", Arc::new(SessionParticipant::new(db.clone(), txn)))
            .unwrap();
        coordinator
            .add_participant("veto", Arc::new(AlwaysNo))
            .unwrap();

        coordinator.execute().await.unwrap_err();

        assert_eq!(db.storage().get(b"key1").unwrap(), None);
        assert_eq!(db.oplog().current_id(), 0);
    }
}
