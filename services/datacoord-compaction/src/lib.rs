//! Compaction trigger, planner and execution tracking for the data coordinator.

pub mod cluster;
pub mod handler;
pub mod plan;
pub mod planner;
pub mod policy;
pub mod signal;
pub mod task;
pub mod trigger;

pub use cluster::{ComputeCluster, NodeCompactionState};
pub use handler::{is_timeout, CompactionPlanHandler, ExecutionHandler};
pub use plan::{CompactionPlan, CompactionSegmentBinlogs, CompactionType};
pub use planner::{generate_plans, is_small_segment, segments_to_plan, should_do_single_compaction};
pub use policy::{CompactTime, CompactionPolicy};
pub use signal::CompactionSignal;
pub use task::{CompactionStateSummary, CompactionTask, CompactionTaskState};
pub use trigger::CompactionTrigger;
