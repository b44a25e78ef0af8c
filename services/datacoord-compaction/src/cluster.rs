use std::collections::HashMap;

use async_trait::async_trait;
use datacoord_core::{CompactionResult, CoreResult, NodeId, PlanId};

use crate::plan::CompactionPlan;

/// Progress of a plan as reported by the node executing it.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeCompactionState {
    Executing,
    Completed(CompactionResult),
}

/// Compute nodes that execute compaction plans.
#[async_trait]
pub trait ComputeCluster: Send + Sync {
    /// Node currently watching `channel`.
    async fn find_watcher(&self, channel: &str) -> CoreResult<NodeId>;

    /// Hands `plan` to `node`. Returns once the node has accepted it.
    async fn compaction(&self, node: NodeId, plan: &CompactionPlan) -> CoreResult<()>;

    /// State of every plan known to any node.
    async fn get_compaction_states(&self) -> CoreResult<HashMap<PlanId, NodeCompactionState>>;
}
