//! LauraDB: an embedded document database combining MVCC transactions, an
//! LSM storage engine, an operation log, replica-set replication, and
//! resumable change streams.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod database;
pub mod session;
pub mod two_phase;

pub use database::Database;
pub use lauradb_changestream::{ChangeEvent, ChangeStream, ChangeStreamOptions, OperationType};
pub use lauradb_common::{Config, Error, Result};
pub use lauradb_replicaset::{ReplicaSet, Role, WriteConcernResult};
pub use lauradb_txn::{CoordinatorState, Participant, TwoPcCoordinator};
pub use session::Session;
pub use two_phase::SessionParticipant;
