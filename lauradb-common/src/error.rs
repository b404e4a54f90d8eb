//! Error types for LauraDB
//!
//! A layered `thiserror` hierarchy: one top-level variant per subsystem,
//! each wrapping that subsystem's own error enum.

use thiserror::Error;

/// Result type alias using LauraDB's `Error` type.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("two-phase commit error: {0}")]
    TwoPc(#[from] TwoPcError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("replica set error: {0}")]
    ReplicaSet(#[from] ReplicaSetError),

    #[error("change stream error: {0}")]
    ChangeStream(#[from] ChangeStreamError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// LSM storage-engine errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("key not found")]
    KeyNotFound,

    #[error("invalid bloom filter: {0}")]
    InvalidBloomFilter(String),

    #[error("engine is closed")]
    Closed,

    #[error("corrupt sstable: {0}")]
    CorruptData(String),

    #[error("flush failed: {0}")]
    FlushFailed(String),

    #[error("compaction failed: {0}")]
    CompactionFailed(String),
}

/// MVCC transaction-manager errors.
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("transaction is not active")]
    NotActive,

    #[error("write-write conflict on commit, retry")]
    Conflict,
}

/// Two-phase commit state-machine errors.
#[derive(Error, Debug)]
pub enum TwoPcError {
    #[error("prepare failed: {0}")]
    PrepareFailed(String),

    #[error("not all participants prepared")]
    NotAllPrepared,

    #[error("commit failed: {0}")]
    CommitFailed(String),

    #[error("participant not found: {0}")]
    ParticipantNotFound(String),

    #[error("participant already added: {0}")]
    ParticipantAlreadyAdded(String),

    #[error("coordinator is not in init state")]
    CoordinatorNotInit,

    #[error("coordinator is not in preparing state")]
    CoordinatorNotPreparing,

    #[error("coordinator has already committed")]
    AlreadyCommitted,
}

/// Session-level errors (operations against an unknown transaction session).
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),
}

/// Replica-set errors.
#[derive(Error, Debug)]
pub enum ReplicaSetError {
    #[error("node {0} is not primary")]
    NotPrimary(String),

    #[error("invalid write concern: {0}")]
    InvalidWriteConcern(String),

    #[error("write concern timed out: {acknowledged}/{required} nodes acknowledged")]
    WriteConcernTimeout { acknowledged: usize, required: usize },

    #[error("member already exists: {0}")]
    MemberAlreadyExists(String),

    #[error("member not found: {0}")]
    MemberNotFound(String),

    #[error("cannot remove self from replica set")]
    CannotRemoveSelf,
}

/// Change-stream errors.
#[derive(Error, Debug)]
pub enum ChangeStreamError {
    #[error("change stream is closed")]
    Closed,
}
