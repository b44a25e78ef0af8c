use datacoord_core::{FieldBinlog, PlanId, SegmentId, SegmentInfo, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionType {
    /// Merge insert and delete logs of one or more segments into a new segment.
    Mix,
}

/// Log files of one source segment, as shipped to the compute node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionSegmentBinlogs {
    pub segment_id: SegmentId,
    pub field_binlogs: Vec<FieldBinlog>,
    pub field2_statslogs: Vec<FieldBinlog>,
    pub deltalogs: Vec<FieldBinlog>,
}

impl From<&SegmentInfo> for CompactionSegmentBinlogs {
    fn from(segment: &SegmentInfo) -> Self {
        Self {
            segment_id: segment.id,
            field_binlogs: segment.binlogs.clone(),
            field2_statslogs: segment.statslogs.clone(),
            deltalogs: segment.deltalogs.clone(),
        }
    }
}

/// Unit of work handed to a compute node. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionPlan {
    pub plan_id: PlanId,
    pub segment_binlogs: Vec<CompactionSegmentBinlogs>,
    pub channel: String,
    pub compaction_type: CompactionType,
    pub timetravel: Timestamp,
    pub start_time: Timestamp,
    pub timeout_in_seconds: i32,
}

impl CompactionPlan {
    /// Ids of the source segments, in plan order.
    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.segment_binlogs.iter().map(|s| s.segment_id).collect()
    }
}
