//! Role, term and primary bookkeeping for one replica-set node.
//!
//! Guarded by its own lock, acquired before the member-map lock whenever
//! both are needed — see [`crate::ReplicaSet`].

use std::time::Instant;

use lauradb_common::{NodeId, Term};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Primary,
    Secondary,
}

pub(crate) struct RoleState {
    pub role: Role,
    pub current_primary_id: Option<NodeId>,
    pub current_term: Term,
    pub voted_for: Option<NodeId>,
    pub last_heartbeat: Instant,
}

impl RoleState {
    pub fn new() -> Self {
        Self {
            role: Role::Secondary,
            current_primary_id: None,
            current_term: 0,
            voted_for: None,
            last_heartbeat: Instant::now(),
        }
    }
}
