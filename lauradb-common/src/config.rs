//! Configuration surface for LauraDB
//!
//! One struct per subsystem, each with a `Default` impl carrying the
//! defaults spec.md documents.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{ReadPreference, WriteConcern};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Root directory under which every subsystem's files live.
    pub data_dir: String,
    /// Advisory page-count hint for an outer buffer pool; not used by the
    /// core itself.
    pub buffer_pool_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            buffer_pool_size: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LsmConfig {
    /// Directory sstables and the write path live under.
    pub dir: String,
    /// Memtable rotation threshold, in bytes.
    pub memtable_size: usize,
    /// Sparse-index stride: every Nth key is indexed.
    pub index_interval: usize,
    /// Number of sstables that triggers compaction.
    pub compaction_threshold: usize,
    /// Expected bloom-filter false-positive rate.
    pub bloom_false_positive_rate: f64,
}

impl Default for LsmConfig {
    fn default() -> Self {
        Self {
            dir: "./data/lsm".to_string(),
            memtable_size: 4 * 1024 * 1024,
            index_interval: 100,
            compaction_threshold: 4,
            bloom_false_positive_rate: 0.01,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OplogConfig {
    pub path: String,
    pub max_cached: usize,
}

impl Default for OplogConfig {
    fn default() -> Self {
        Self {
            path: "./data/oplog.log".to_string(),
            max_cached: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaSetConfig {
    pub name: String,
    pub node_id: String,
    pub priority: i32,
    #[serde(with = "duration_millis")]
    pub heartbeat_interval: Duration,
    #[serde(with = "duration_millis")]
    pub election_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub heartbeat_timeout: Duration,
}

impl Default for ReplicaSetConfig {
    fn default() -> Self {
        Self {
            name: "rs0".to_string(),
            node_id: "node-1".to_string(),
            priority: 1,
            heartbeat_interval: Duration::from_secs(2),
            election_timeout: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaveConfig {
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,
    #[serde(with = "duration_millis")]
    pub heartbeat_interval: Duration,
    #[serde(with = "duration_millis")]
    pub retry_interval: Duration,
    pub max_retries: u32,
}

impl Default for SlaveConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(5),
            retry_interval: Duration::from_secs(1),
            max_retries: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeStreamConfig {
    #[serde(with = "duration_millis")]
    pub max_await_time: Duration,
    pub batch_size: usize,
}

impl Default for ChangeStreamConfig {
    fn default() -> Self {
        Self {
            max_await_time: Duration::from_secs(1),
            batch_size: 1000,
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Aggregate configuration for an embedded LauraDB instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub lsm: LsmConfig,
    #[serde(default)]
    pub oplog: OplogConfig,
    #[serde(default)]
    pub replica_set: ReplicaSetConfig,
    #[serde(default)]
    pub slave: SlaveConfig,
    #[serde(default)]
    pub change_stream: ChangeStreamConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            lsm: LsmConfig::default(),
            oplog: OplogConfig::default(),
            replica_set: ReplicaSetConfig::default(),
            slave: SlaveConfig::default(),
            change_stream: ChangeStreamConfig::default(),
        }
    }
}

// `WriteConcern`/`ReadPreference` are per-call knobs rather than
// process-wide config, so they live in `types` but get their defaults
// re-exported here for discoverability alongside the rest of the surface.
pub fn default_write_concern() -> WriteConcern {
    WriteConcern::default()
}

pub fn default_read_preference() -> ReadPreference {
    ReadPreference::default()
}
