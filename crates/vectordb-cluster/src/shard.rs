use serde::{Deserialize, Serialize};

pub type ShardId = u32;
pub type NodeId = String;

/// A shard's lifecycle state. `Migrating` and `Draining` are set by the
/// caller that executes a [`crate::ring::RebalancePlan`] (plan execution is
/// out of scope here; the ring only plans) so the query pipeline can avoid
/// routing to a shard mid-move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShardState {
    Active,
    Migrating,
    Draining,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shard {
    pub id: ShardId,
    pub primary: NodeId,
    pub replicas: Vec<NodeId>,
    pub state: ShardState,
}

impl Shard {
    pub fn new(id: ShardId, primary: impl Into<NodeId>) -> Self {
        Self { id, primary: primary.into(), replicas: Vec::new(), state: ShardState::Active }
    }

    pub fn with_replicas(mut self, replicas: Vec<NodeId>) -> Self {
        self.replicas = replicas;
        self
    }
}
