//! Two-phase commit coordinator over an arbitrary set of participants.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lauradb_common::{Error, Result, TwoPcError, TxnId};
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::manager::{Transaction, TransactionManager};

/// One participant in a two-phase commit: `prepare` must not mutate
/// visibility, `commit`/`abort` finalize.
#[async_trait]
pub trait Participant: Send + Sync {
    async fn prepare(&self, txn_id: TxnId) -> Result<bool>;
    async fn commit(&self, txn_id: TxnId) -> Result<()>;
    async fn abort(&self, txn_id: TxnId) -> Result<()>;
}

/// Adapts a [`TransactionManager`] session into a 2PC participant: `prepare`
/// only checks liveness, `commit` triggers the real MVCC validation (so a
/// YES vote can still turn into an abort here).
pub struct DatabaseParticipant {
    manager: Arc<TransactionManager>,
    txn: Arc<Transaction>,
}

impl DatabaseParticipant {
    pub fn new(manager: Arc<TransactionManager>, txn: Arc<Transaction>) -> Self {
        Self { manager, txn }
    }
}

#[async_trait]
impl Participant for DatabaseParticipant {
    async fn prepare(&self, _txn_id: TxnId) -> Result<bool> {
        Ok(self.txn.is_active())
    }

    async fn commit(&self, _txn_id: TxnId) -> Result<()> {
        self.manager.commit(&self.txn).map(|_| ())
    }

    async fn abort(&self, _txn_id: TxnId) -> Result<()> {
        self.manager.abort(&self.txn);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Init,
    Preparing,
    Committing,
    Aborting,
    Committed,
    Aborted,
}

/// Drives participants for one distributed transaction through prepare and
/// commit/abort. All RPCs within a phase are dispatched concurrently, then
/// collected — never one at a time.
pub struct TwoPcCoordinator {
    txn_id: TxnId,
    timeout: Duration,
    state: RwLock<CoordinatorState>,
    participants: RwLock<HashMap<String, Arc<dyn Participant>>>,
}

impl TwoPcCoordinator {
    pub fn new(txn_id: TxnId, timeout: Duration) -> Self {
        Self {
            txn_id,
            timeout,
            state: RwLock::new(CoordinatorState::Init),
            participants: RwLock::new(HashMap::new()),
        }
    }

    pub fn state(&self) -> CoordinatorState {
        *self.state.read()
    }

    /// Legal only while the coordinator is still in `Init`.
    pub fn add_participant(&self, name: impl Into<String>, participant: Arc<dyn Participant>) -> Result<()> {
        if *self.state.read() != CoordinatorState::Init {
            return Err(Error::TwoPc(TwoPcError::CoordinatorNotInit));
        }
        let name = name.into();
        let mut participants = self.participants.write();
        if participants.contains_key(&name) {
            return Err(Error::TwoPc(TwoPcError::ParticipantAlreadyAdded(name)));
        }
        participants.insert(name, participant);
        Ok(())
    }

    /// Runs prepare, then commit or abort depending on the vote, honouring
    /// the coordinator's deadline for each phase.
    pub async fn execute(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            if *state == CoordinatorState::Committed {
                return Err(Error::TwoPc(TwoPcError::AlreadyCommitted));
            }
            *state = CoordinatorState::Preparing;
        }

        let participants: Vec<(String, Arc<dyn Participant>)> = self
            .participants
            .read()
            .iter()
            .map(|(name, p)| (name.clone(), p.clone()))
            .collect();

        let txn_id = self.txn_id;
        let prepare_futures = participants.iter().map(|(name, participant)| {
            let name = name.clone();
            let participant = participant.clone();
            async move {
                let result = tokio::time::timeout(self.timeout, participant.prepare(txn_id))
                    .await
                    .map_err(|_| Error::TwoPc(TwoPcError::PrepareFailed(format!("{name}: timed out"))))
                    .and_then(|inner| inner);
                (name, result)
            }
        });
        let prepare_results = futures::future::join_all(prepare_futures).await;

        let mut all_yes = true;
        let mut failure = None;
        for (name, result) in &prepare_results {
            match result {
                Ok(true) => {}
                Ok(false) => {
                    all_yes = false;
                    failure.get_or_insert_with(|| {
                        Error::TwoPc(TwoPcError::PrepareFailed(format!("{name}: voted no")))
                    });
                }
                Err(_) => {
                    all_yes = false;
                    failure.get_or_insert_with(|| {
                        Error::TwoPc(TwoPcError::PrepareFailed(format!("{name}: prepare error")))
                    });
                }
            }
        }

        if !all_yes {
            *self.state.write() = CoordinatorState::Aborting;
            let abort_futures = participants
                .iter()
                .map(|(name, p)| {
                    let name = name.clone();
                    let p = p.clone();
                    async move {
                        if let Err(e) = p.abort(txn_id).await {
                            warn!(participant = %name, error = %e, "abort failed during 2pc rollback");
                        }
                    }
                });
            futures::future::join_all(abort_futures).await;
            *self.state.write() = CoordinatorState::Aborted;
            return Err(failure.unwrap_or(Error::TwoPc(TwoPcError::NotAllPrepared)));
        }

        *self.state.write() = CoordinatorState::Committing;
        let commit_futures = participants.iter().map(|(name, participant)| {
            let name = name.clone();
            let participant = participant.clone();
            async move {
                let result = tokio::time::timeout(self.timeout, participant.commit(txn_id))
                    .await
                    .map_err(|_| Error::TwoPc(TwoPcError::CommitFailed(format!("{name}: timed out"))))
                    .and_then(|inner| inner);
                (name, result)
            }
        });
        let commit_results = futures::future::join_all(commit_futures).await;

        let failed: Vec<_> = commit_results
            .iter()
            .filter_map(|(name, r)| r.as_ref().err().map(|e| (name.clone(), e.to_string())))
            .collect();

        if failed.is_empty() {
            *self.state.write() = CoordinatorState::Committed;
            info!(txn_id = self.txn_id, "two-phase commit succeeded");
            Ok(())
        } else {
            *self.state.write() = CoordinatorState::Aborted;
            let (name, reason) = &failed[0];
            Err(Error::TwoPc(TwoPcError::CommitFailed(format!(
                "{name}: {reason}"
            ))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeParticipant {
        vote_yes: bool,
        commits: Arc<AtomicUsize>,
        aborts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Participant for FakeParticipant {
        async fn prepare(&self, _txn_id: TxnId) -> Result<bool> {
            Ok(self.vote_yes)
        }

        async fn commit(&self, _txn_id: TxnId) -> Result<()> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn abort(&self, _txn_id: TxnId) -> Result<()> {
            self.aborts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn all_yes_votes_commit_every_participant() {
        let coordinator = TwoPcCoordinator::new(1, Duration::from_secs(1));
        let commits = Arc::new(AtomicUsize::new(0));
        let aborts = Arc::new(AtomicUsize::new(0));

        for name in ["a", "b", "c"] {
            coordinator
                .add_participant(
                    name,
                    Arc::new(FakeParticipant {
                        vote_yes: true,
                        commits: commits.clone(),
                        aborts: aborts.clone(),
                    }),
                )
                .unwrap();
        }

        coordinator.execute().await.unwrap();
        assert_eq!(coordinator.state(), CoordinatorState::Committed);
        assert_eq!(commits.load(Ordering::SeqCst), 3);
        assert_eq!(aborts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn a_single_no_vote_aborts_all_participants() {
        let coordinator = TwoPcCoordinator::new(2, Duration::from_secs(1));
        let commits = Arc::new(AtomicUsize::new(0));
        let aborts = Arc::new(AtomicUsize::new(0));

        coordinator
            .add_participant(
                "yes",
                Arc::new(FakeParticipant {
                    vote_yes: true,
                    commits: commits.clone(),
                    aborts: aborts.clone(),
                }),
            )
            .unwrap();
        coordinator
            .add_participant(
                "no",
                Arc::new(FakeParticipant {
                    vote_yes: false,
                    commits: commits.clone(),
                    aborts: aborts.clone(),
                }),
            )
            .unwrap();

        let err = coordinator.execute().await.unwrap_err();
        assert!(matches!(err, Error::TwoPc(TwoPcError::PrepareFailed(_))));
        assert_eq!(coordinator.state(), CoordinatorState::Aborted);
        assert_eq!(commits.load(Ordering::SeqCst), 0);
        assert_eq!(aborts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn add_participant_after_init_is_rejected() {
        let coordinator = TwoPcCoordinator::new(3, Duration::from_secs(1));
        let commits = Arc::new(AtomicUsize::new(0));
        let aborts = Arc::new(AtomicUsize::new(0));
        coordinator
            .add_participant(
                "a",
                Arc::new(FakeParticipant {
                    vote_yes: true,
                    commits: commits.clone(),
                    aborts: aborts.clone(),
                }),
            )
            .unwrap();

        coordinator.execute().await.unwrap();

        let err = coordinator
            .add_participant(
                "b",
                Arc::new(FakeParticipant {
                    vote_yes: true,
                    commits,
                    aborts,
                }),
            )
            .unwrap_err();
        assert!(matches!(err, Error::TwoPc(TwoPcError::CoordinatorNotInit)));
    }

    #[tokio::test]
    async fn database_participant_yes_vote_can_still_abort_on_commit_conflict() {
        let manager = Arc::new(TransactionManager::new());

        let a = manager.begin();
        let b = manager.begin();
        manager.read(&a, b"k").unwrap();
        manager.read(&b, b"k").unwrap();
        manager.write(&a, b"k".to_vec(), b"from-a".to_vec());
        manager.write(&b, b"k".to_vec(), b"from-b".to_vec());
        manager.commit(&a).unwrap();

        let coordinator = TwoPcCoordinator::new(b.id, Duration::from_secs(1));
        coordinator
            .add_participant("db", Arc::new(DatabaseParticipant::new(manager, b)))
            .unwrap();

        let err = coordinator.execute().await.unwrap_err();
        assert!(matches!(err, Error::TwoPc(TwoPcError::CommitFailed(_))));
        assert_eq!(coordinator.state(), CoordinatorState::Aborted);
    }
}
