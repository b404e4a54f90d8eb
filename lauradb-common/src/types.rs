//! Shared type definitions spanning the storage, transaction, oplog and
//! replica-set layers.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// A storage-layer key: a byte sequence under the core's total lexicographic
/// order. The higher layer is responsible for encoding `(collection, _id)`
/// into this.
pub type Key = Vec<u8>;

/// Monotonic version counter assigned at transaction commit.
pub type Version = u64;

/// Monotonic transaction identifier, unique per process.
pub type TxnId = u64;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Node identifier within a replica set.
pub type NodeId = String;

/// Election term, monotonically increasing per replica set.
pub type Term = i64;

pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

/// A single entry in a key's version chain: the value as of `version`,
/// who created and (optionally) deleted it, and when it was committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionedValue {
    pub value: Vec<u8>,
    pub version: Version,
    pub created_by_txn: TxnId,
    pub deleted_by_txn: TxnId,
    pub commit_time: Timestamp,
}

impl VersionedValue {
    pub fn is_tombstone(&self) -> bool {
        self.deleted_by_txn != 0
    }
}

/// The logical operation carried by one oplog entry. A closed enumeration,
/// not a string, per the rewrite guidance on operation-type variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpType {
    Insert,
    Update,
    Delete,
    CreateCollection,
    DropCollection,
    CreateIndex,
    DropIndex,
    Noop,
}

/// A single durable, replicated logical operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OplogEntry {
    pub op_id: u64,
    pub timestamp: Timestamp,
    pub op_type: OpType,
    pub database: String,
    pub collection: String,
    pub doc_id: Option<String>,
    pub document: Option<serde_json::Value>,
    pub filter: Option<serde_json::Value>,
    pub update: Option<serde_json::Value>,
    pub index_def: Option<serde_json::Value>,
}

/// A single entry as stored in the LSM tree: raw key/value bytes, a
/// nanosecond timestamp used to break ties between identical keys during
/// compaction, and a tombstone marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LsmEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub timestamp: i64,
    pub deleted: bool,
}

/// Health state of a replica set member as observed by the local node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberHealth {
    Healthy,
    Unhealthy,
    Unreachable,
}

/// Role a replica set member currently occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Primary,
    Secondary,
    Arbiter,
}

/// A member of a replica set, as tracked by every other member.
#[derive(Debug, Clone)]
pub struct Member {
    pub node_id: NodeId,
    pub role: Role,
    pub state: MemberHealth,
    pub priority: i32,
    pub last_heartbeat: Instant,
    pub last_op_id: u64,
    pub lag: Duration,
    pub is_voting: bool,
}

/// An opaque position within a change stream's oplog tail. Equality and
/// ordering are entirely by `op_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResumeToken {
    pub op_id: u64,
}

/// Write-concern durability requirement for a single write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteConcernLevel {
    Count(u32),
    Majority,
}

#[derive(Debug, Clone)]
pub struct WriteConcern {
    pub w: WriteConcernLevel,
    pub wtimeout: Duration,
    pub j: bool,
}

impl Default for WriteConcern {
    fn default() -> Self {
        Self {
            w: WriteConcernLevel::Count(1),
            wtimeout: Duration::from_secs(10),
            j: false,
        }
    }
}

/// Routing policy for reads against a replica set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPreferenceMode {
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

#[derive(Debug, Clone)]
pub struct ReadPreference {
    pub mode: ReadPreferenceMode,
    pub max_staleness: Option<Duration>,
    pub tags: std::collections::HashMap<String, String>,
}

impl Default for ReadPreference {
    fn default() -> Self {
        Self {
            mode: ReadPreferenceMode::Primary,
            max_staleness: None,
            tags: std::collections::HashMap::new(),
        }
    }
}
