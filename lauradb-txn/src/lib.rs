//! MVCC version store, transaction manager, and two-phase commit
//! coordinator for LauraDB.
//!
//! First-committer-wins snapshot isolation: a transaction's reads are
//! answered from a fixed version as of `begin`, its writes are invisible to
//! everyone else until `commit`, and `commit` detects write-write conflicts
//! without holding a read lock across the transaction's lifetime.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod manager;
pub mod two_pc;
pub mod version_store;

pub use manager::{Transaction, TransactionManager};
pub use two_pc::{CoordinatorState, DatabaseParticipant, Participant, TwoPcCoordinator};
pub use version_store::VersionStore;
