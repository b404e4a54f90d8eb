//! Cooperative, term-based replica-set node: membership, a simplified
//! (non-Raft) election model, and write-concern acknowledgement.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use lauradb_common::{
    metrics, Error, Member, MemberHealth, NodeId, OplogEntry, ReplicaSetError, Result,
    WriteConcern, WriteConcernLevel,
};
use lauradb_oplog::Oplog;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{info, warn};

use crossbeam::channel::{bounded, Sender};

use lauradb_common::config::ReplicaSetConfig;

use crate::role::{Role, RoleState};

/// Outcome of a write-concern-gated write on the primary.
#[derive(Debug, Clone)]
pub struct WriteConcernResult {
    pub op_id: u64,
    pub nodes_acknowledged: usize,
    pub elapsed: Duration,
    pub journal_synced: bool,
}

enum WorkerMsg {
    Shutdown,
}

/// Shared state behind the heartbeat worker thread. Two locks, always
/// acquired role-lock-first: one for role/term/primary, one for the member
/// map.
struct Inner {
    config: ReplicaSetConfig,
    oplog: Arc<Oplog>,
    role: RwLock<RoleState>,
    members: RwLock<HashMap<NodeId, Member>>,
}

/// One replica-set node, plus the background timer that drives election
/// timeouts and missed-heartbeat failure detection.
pub struct ReplicaSet {
    inner: Arc<Inner>,
    heartbeat_tx: Sender<WorkerMsg>,
    heartbeat_handle: Option<std::thread::JoinHandle<()>>,
}

impl ReplicaSet {
    pub fn new(config: ReplicaSetConfig, oplog: Arc<Oplog>) -> Self {
        let inner = Arc::new(Inner {
            config,
            oplog,
            role: RwLock::new(RoleState::new()),
            members: RwLock::new(HashMap::new()),
        });

        let (heartbeat_tx, heartbeat_rx) = bounded::<WorkerMsg>(8);
        let worker_inner = inner.clone();
        let heartbeat_handle =
            std::thread::spawn(move || heartbeat_worker(worker_inner, heartbeat_rx));

        Self {
            inner,
            heartbeat_tx,
            heartbeat_handle: Some(heartbeat_handle),
        }
    }

    pub fn role(&self) -> Role {
        self.inner.role.read().role
    }

    pub fn current_term(&self) -> i64 {
        self.inner.role.read().current_term
    }

    pub fn current_primary_id(&self) -> Option<NodeId> {
        self.inner.role.read().current_primary_id.clone()
    }

    /// Refuses duplicates.
    pub fn add_member(&self, id: NodeId, priority: i32, voting: bool) -> Result<()> {
        let mut members = self.inner.members.write();
        if members.contains_key(&id) {
            return Err(Error::ReplicaSet(ReplicaSetError::MemberAlreadyExists(id)));
        }
        members.insert(
            id.clone(),
            Member {
                node_id: id,
                role: lauradb_common::Role::Secondary,
                state: MemberHealth::Healthy,
                priority,
                last_heartbeat: Instant::now(),
                last_op_id: 0,
                lag: Duration::ZERO,
                is_voting: voting,
            },
        );
        Ok(())
    }

    /// Refuses removing the local node.
    pub fn remove_member(&self, id: &str) -> Result<()> {
        if id == self.inner.config.node_id {
            return Err(Error::ReplicaSet(ReplicaSetError::CannotRemoveSelf));
        }
        let mut members = self.inner.members.write();
        if members.remove(id).is_none() {
            return Err(Error::ReplicaSet(ReplicaSetError::MemberNotFound(
                id.to_string(),
            )));
        }
        Ok(())
    }

    /// Records a heartbeat report from `id`, recomputing its replication lag
    /// and, if `id` is the current primary, bumping the local election
    /// timer baseline.
    pub fn update_member_heartbeat(&self, id: &str, last_op_id: u64) {
        update_member_heartbeat(&self.inner, id, last_op_id);
    }

    /// The last-observed health state of member `id`, as kept current by
    /// the background heartbeat worker.
    pub fn member_state(&self, id: &str) -> Option<MemberHealth> {
        self.inner.members.read().get(id).map(|m| m.state)
    }

    /// Called periodically by the heartbeat worker (or directly by tests);
    /// triggers an election if the local node is secondary and the election
    /// timer has expired.
    pub fn on_election_timeout_tick(&self) {
        on_election_timeout_tick(&self.inner);
    }

    /// Increments the term, votes for self, and tallies votes per the
    /// simplified (non-Raft) rule: self counts one, and any healthy voting
    /// member whose priority is `<=` the local priority contributes one.
    pub fn start_election(&self) {
        start_election(&self.inner);
    }

    pub fn become_secondary(&self, primary_id: Option<NodeId>) {
        let mut role = self.inner.role.write();
        role.role = Role::Secondary;
        role.current_primary_id = primary_id;
        role.last_heartbeat = Instant::now();
    }

    /// Valid only when currently primary.
    pub fn step_down(&self) -> Result<()> {
        let mut role = self.inner.role.write();
        if role.role != Role::Primary {
            return Err(Error::ReplicaSet(ReplicaSetError::NotPrimary(
                self.inner.config.node_id.clone(),
            )));
        }
        role.role = Role::Secondary;
        role.current_primary_id = None;
        role.last_heartbeat = Instant::now();
        Ok(())
    }

    /// Appends `entry` to the oplog and waits for the requested write
    /// concern to be satisfied, polling every 50ms up to `wtimeout`.
    pub async fn write_with_concern(
        &self,
        entry: OplogEntry,
        concern: &WriteConcern,
    ) -> Result<WriteConcernResult> {
        if self.role() != Role::Primary {
            return Err(Error::ReplicaSet(ReplicaSetError::NotPrimary(
                self.inner.config.node_id.clone(),
            )));
        }

        let start = Instant::now();
        let op_id = self.inner.oplog.append(entry)?;
        self.update_member_heartbeat(&self.inner.config.node_id.clone(), op_id);

        if let WriteConcernLevel::Count(0) = concern.w {
            return Ok(WriteConcernResult {
                op_id,
                nodes_acknowledged: 0,
                elapsed: start.elapsed(),
                journal_synced: false,
            });
        }

        let voting_members = self.inner.members.read().values().filter(|m| m.is_voting).count() + 1;
        let required = match &concern.w {
            WriteConcernLevel::Count(n) => *n as usize,
            WriteConcernLevel::Majority => voting_members / 2 + 1,
        };

        if required > voting_members {
            return Err(Error::ReplicaSet(ReplicaSetError::InvalidWriteConcern(
                format!("requires {required} of {voting_members} voting members"),
            )));
        }

        if required <= 1 && !concern.j {
            return Ok(WriteConcernResult {
                op_id,
                nodes_acknowledged: 1,
                elapsed: start.elapsed(),
                journal_synced: false,
            });
        }

        let deadline = start + concern.wtimeout;
        loop {
            let acknowledged = 1 + self
                .inner
                .members
                .read()
                .values()
                .filter(|m| m.is_voting && m.last_op_id >= op_id)
                .count();

            if acknowledged >= required {
                if concern.j {
                    self.inner.oplog.flush()?;
                }
                return Ok(WriteConcernResult {
                    op_id,
                    nodes_acknowledged: acknowledged,
                    elapsed: start.elapsed(),
                    journal_synced: concern.j,
                });
            }

            if Instant::now() >= deadline {
                warn!(op_id, acknowledged, required, "write concern timed out");
                return Err(Error::ReplicaSet(ReplicaSetError::WriteConcernTimeout {
                    acknowledged,
                    required,
                }));
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for ReplicaSet {
    fn drop(&mut self) {
        let _ = self.heartbeat_tx.send(WorkerMsg::Shutdown);
        if let Some(handle) = self.heartbeat_handle.take() {
            let _ = handle.join();
        }
    }
}

fn update_member_heartbeat(inner: &Inner, id: &str, last_op_id: u64) {
    let lag_ms = inner.oplog.current_id().saturating_sub(last_op_id);
    {
        let mut members = inner.members.write();
        if let Some(member) = members.get_mut(id) {
            member.last_heartbeat = Instant::now();
            member.last_op_id = last_op_id;
            member.state = MemberHealth::Healthy;
            member.lag = Duration::from_millis(lag_ms);
        }
    }
    metrics::set_replication_lag(id, lag_ms);

    let mut role = inner.role.write();
    if role.current_primary_id.as_deref() == Some(id) {
        role.last_heartbeat = Instant::now();
    }
}

fn on_election_timeout_tick(inner: &Inner) {
    let should_elect = {
        let role = inner.role.read();
        role.role == Role::Secondary && role.last_heartbeat.elapsed() >= inner.config.election_timeout
    };
    if should_elect {
        start_election(inner);
    }
}

fn start_election(inner: &Inner) {
    let term = {
        let mut role = inner.role.write();
        role.current_term += 1;
        role.voted_for = Some(inner.config.node_id.clone());
        role.current_term
    };

    let members = inner.members.read();
    let voting_members = members.values().filter(|m| m.is_voting).count() + 1;
    let votes = 1 + members
        .values()
        .filter(|m| m.is_voting && m.state == MemberHealth::Healthy && m.priority <= inner.config.priority)
        .count();
    drop(members);

    let needed = voting_members / 2 + 1;
    let won = votes >= needed;
    info!(term, votes, needed, won, "replica set election");
    metrics::record_election(won);

    if won {
        become_primary(inner);
    } else {
        let mut role = inner.role.write();
        role.last_heartbeat = Instant::now();
    }
}

fn become_primary(inner: &Inner) {
    let mut role = inner.role.write();
    role.role = Role::Primary;
    role.current_primary_id = Some(inner.config.node_id.clone());
    role.voted_for = None;
    role.last_heartbeat = Instant::now();
}

/// Marks members stale relative to `heartbeat_timeout`: `Unhealthy` past one
/// timeout window, `Unreachable` past two. Never touches the local node's
/// own entry, since the local node reports its own liveness directly.
fn mark_stale_members(inner: &Inner) {
    let timeout = inner.config.heartbeat_timeout;
    let mut members = inner.members.write();
    for member in members.values_mut() {
        let since = member.last_heartbeat.elapsed();
        member.state = if since >= timeout * 2 {
            MemberHealth::Unreachable
        } else if since >= timeout {
            MemberHealth::Unhealthy
        } else {
            MemberHealth::Healthy
        };
    }
}

/// Background timer driving election timeouts and missed-heartbeat failure
/// detection, ticking at `heartbeat_interval` (falling back to a fixed
/// interval if unset) until told to shut down.
fn heartbeat_worker(inner: Arc<Inner>, rx: crossbeam::channel::Receiver<WorkerMsg>) {
    let interval = if inner.config.heartbeat_interval.is_zero() {
        Duration::from_millis(100)
    } else {
        inner.config.heartbeat_interval
    };
    loop {
        match rx.recv_timeout(interval) {
            Ok(WorkerMsg::Shutdown) => return,
            Err(crossbeam::channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam::channel::RecvTimeoutError::Disconnected) => return,
        }
        on_election_timeout_tick(&inner);
        mark_stale_members(&inner);
    }
}
