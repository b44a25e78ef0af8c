use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CollectionId, FieldId, PartitionId, SegmentId};
use crate::tso::Timestamp;

/// Lifecycle state for a segment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SegmentState {
    /// Accepting inserts.
    Growing,
    /// Closed for inserts, waiting to be flushed.
    Sealed,
    /// Flush in progress.
    Flushing,
    /// Persisted and immutable.
    Flushed,
    /// Removed; kept only until garbage collection.
    Dropped,
    /// Merged into the successor segment.
    Compacted(SegmentId),
}

impl SegmentState {
    /// Whether the segment still holds live data.
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        !matches!(self, Self::Dropped | Self::Compacted(_))
    }

    /// Whether the segment's data has reached (or is reaching) storage.
    #[must_use]
    pub const fn is_flushed(&self) -> bool {
        matches!(self, Self::Flushed | Self::Flushing)
    }
}

/// A single insert, stats or delete log file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Binlog {
    pub entries_num: i64,
    pub timestamp_from: Timestamp,
    pub timestamp_to: Timestamp,
    pub log_path: String,
    /// Size in bytes.
    pub log_size: i64,
}

impl Binlog {
    #[must_use]
    pub fn new(log_path: impl Into<String>, entries_num: i64, log_size: i64) -> Self {
        Self {
            entries_num,
            log_path: log_path.into(),
            log_size,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_time_range(mut self, from: Timestamp, to: Timestamp) -> Self {
        self.timestamp_from = from;
        self.timestamp_to = to;
        self
    }
}

/// Log files written for one field.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldBinlog {
    pub field_id: FieldId,
    pub binlogs: Vec<Binlog>,
}

impl FieldBinlog {
    #[must_use]
    pub fn new(field_id: FieldId, binlogs: Vec<Binlog>) -> Self {
        Self { field_id, binlogs }
    }
}

/// Pending row reservation made by a writer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Allocation {
    pub num_of_rows: i64,
    pub expire_time: Timestamp,
}

/// Authoritative record for a persisted segment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SegmentInfo {
    pub id: SegmentId,
    pub collection_id: CollectionId,
    pub partition_id: PartitionId,
    pub insert_channel: String,
    pub state: SegmentState,
    pub num_of_rows: i64,
    /// Row capacity fixed at creation.
    pub max_row_num: i64,
    pub last_expire_time: Timestamp,
    #[serde(default)]
    pub binlogs: Vec<FieldBinlog>,
    #[serde(default)]
    pub statslogs: Vec<FieldBinlog>,
    #[serde(default)]
    pub deltalogs: Vec<FieldBinlog>,
    /// Segments merged to produce this one.
    #[serde(default)]
    pub compaction_from: Vec<SegmentId>,
    /// Placeholder covering a gap; never compacted.
    #[serde(default)]
    pub is_fake: bool,

    // Runtime-only state, not persisted.
    #[serde(skip)]
    pub current_rows: i64,
    #[serde(skip)]
    pub allocations: Vec<Allocation>,
    #[serde(skip, default = "Utc::now")]
    pub last_flush_time: DateTime<Utc>,
    #[serde(skip)]
    pub is_compacting: bool,
}

impl SegmentInfo {
    /// Creates a growing segment with no logs.
    #[must_use]
    pub fn new(
        id: SegmentId,
        collection_id: CollectionId,
        partition_id: PartitionId,
        insert_channel: impl Into<String>,
        max_row_num: i64,
    ) -> Self {
        Self {
            id,
            collection_id,
            partition_id,
            insert_channel: insert_channel.into(),
            state: SegmentState::Growing,
            num_of_rows: 0,
            max_row_num,
            last_expire_time: 0,
            binlogs: Vec::new(),
            statslogs: Vec::new(),
            deltalogs: Vec::new(),
            compaction_from: Vec::new(),
            is_fake: false,
            current_rows: 0,
            allocations: Vec::new(),
            last_flush_time: Utc::now(),
            is_compacting: false,
        }
    }

    /// Number of insert binlog files across all fields.
    #[must_use]
    pub fn binlog_count(&self) -> usize {
        self.binlogs.iter().map(|f| f.binlogs.len()).sum()
    }

    /// Total bytes of insert binlogs.
    #[must_use]
    pub fn insert_log_size(&self) -> i64 {
        sum_log_size(&self.binlogs)
    }

    /// Total bytes of delete logs.
    #[must_use]
    pub fn delta_log_size(&self) -> i64 {
        sum_log_size(&self.deltalogs)
    }

    /// Total bytes of insert, stats and delete logs.
    #[must_use]
    pub fn segment_size(&self) -> i64 {
        self.insert_log_size() + sum_log_size(&self.statslogs) + self.delta_log_size()
    }
}

fn sum_log_size(groups: &[FieldBinlog]) -> i64 {
    groups
        .iter()
        .flat_map(|f| f.binlogs.iter())
        .map(|b| b.log_size)
        .sum()
}
