use serde::{Deserialize, Serialize};

use crate::ids::{PlanId, SegmentId};
use crate::segment::FieldBinlog;

/// Outcome of a merge reported by the compute node that executed a plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CompactionResult {
    pub plan_id: PlanId,
    /// Identifier of the merged segment.
    pub segment_id: SegmentId,
    pub num_of_rows: i64,
    #[serde(default)]
    pub insert_logs: Vec<FieldBinlog>,
    #[serde(default)]
    pub field2_statslogs: Vec<FieldBinlog>,
    #[serde(default)]
    pub deltalogs: Vec<FieldBinlog>,
}
