//! LauraDB Storage Engine
//!
//! An LSM-tree key-value store:
//! - skip-list memtables (§4.1)
//! - sorted on-disk tables with sparse index + bloom filter (§4.2)
//! - the engine tying memtable rotation to background flush/compaction (§4.3)

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod engine;
pub mod memtable;
pub mod sstable;

pub use engine::{LsmEngine, LsmOptions, LsmStats};
pub use memtable::{MemTable, MemTableEntry};
pub use sstable::{BloomFilter, SsTableEntry, SsTableReader, SsTableWriter};
