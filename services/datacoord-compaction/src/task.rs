use datacoord_core::{CompactionResult, NodeId};
use serde::{Deserialize, Serialize};

use crate::plan::CompactionPlan;
use crate::signal::CompactionSignal;

/// Lifecycle of a dispatched plan.
///
/// `Executing -> {Completed | Failed | Timeout}`, and `Timeout -> Failed`
/// once the node forgets the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionTaskState {
    Executing,
    Completed,
    Failed,
    Timeout,
}

impl CompactionTaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompactionTaskState::Executing => "executing",
            CompactionTaskState::Completed => "completed",
            CompactionTaskState::Failed => "failed",
            CompactionTaskState::Timeout => "timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CompactionTaskState::Completed | CompactionTaskState::Failed
        )
    }
}

impl std::fmt::Display for CompactionTaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A plan tracked by the execution handler.
#[derive(Debug, Clone)]
pub struct CompactionTask {
    pub plan: CompactionPlan,
    pub signal: CompactionSignal,
    pub state: CompactionTaskState,
    pub node_id: NodeId,
    pub result: Option<CompactionResult>,
}

impl CompactionTask {
    pub fn new(plan: CompactionPlan, signal: CompactionSignal, node_id: NodeId) -> Self {
        Self {
            plan,
            signal,
            state: CompactionTaskState::Executing,
            node_id,
            result: None,
        }
    }
}

/// Aggregate task counts for one signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionStateSummary {
    pub executing: usize,
    pub completed: usize,
    pub failed: usize,
    pub timeout: usize,
}

impl CompactionStateSummary {
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a CompactionTask>) -> Self {
        let mut summary = Self::default();
        for task in tasks {
            match task.state {
                CompactionTaskState::Executing => summary.executing += 1,
                CompactionTaskState::Completed => summary.completed += 1,
                CompactionTaskState::Failed => summary.failed += 1,
                CompactionTaskState::Timeout => summary.timeout += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.executing + self.completed + self.failed + self.timeout
    }

    /// No task is still running.
    pub fn is_finished(&self) -> bool {
        self.executing == 0
    }
}
