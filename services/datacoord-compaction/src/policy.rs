use std::time::Duration;

use datacoord_core::{DataCoordConfig, Timestamp};

/// Time bounds used to judge a segment during one evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactTime {
    /// Deletes older than this are invisible to time-travel reads and may be purged.
    pub travel_time: Timestamp,
    /// Rows written before this have outlived the collection TTL; 0 when no TTL.
    pub expire_time: Timestamp,
}

/// Immutable compaction thresholds, frozen from configuration at construction.
#[derive(Debug, Clone)]
pub struct CompactionPolicy {
    pub retention_duration: Duration,
    pub disk_segment_max_size_bytes: i64,
    pub small_proportion: f64,
    pub compactable_proportion: f64,
    pub max_segments_to_merge: usize,
    pub min_segments_to_merge: usize,
    pub binlog_max_num: usize,
    pub expired_log_max_size: i64,
    pub delete_ratio_threshold: f64,
    pub deleted_rows_ratio_threshold: f64,
    pub timeout_secs: i32,
    pub global_interval: Duration,
    pub enable_auto_compaction: bool,
    pub signal_buffer: usize,
}

const MB: i64 = 1024 * 1024;

impl CompactionPolicy {
    pub fn from_config(config: &DataCoordConfig) -> Self {
        Self {
            retention_duration: config.common.retention_duration(),
            disk_segment_max_size_bytes: config.segment.disk_max_size_mb * MB,
            small_proportion: config.segment.small_proportion,
            compactable_proportion: config.segment.compactable_proportion,
            max_segments_to_merge: config.compaction.max_segments_to_merge,
            min_segments_to_merge: config.compaction.min_segments_to_merge,
            binlog_max_num: config.compaction.binlog_max_num,
            expired_log_max_size: config.compaction.expired_log_max_size,
            delete_ratio_threshold: config.compaction.delete_ratio_threshold,
            deleted_rows_ratio_threshold: config.compaction.deleted_rows_ratio_threshold,
            timeout_secs: config.compaction.timeout_secs,
            global_interval: config.compaction.global_interval(),
            enable_auto_compaction: config.compaction.enable_auto_compaction,
            signal_buffer: config.compaction.signal_buffer,
        }
    }

    /// Row capacity of a segment on disk-indexed collections.
    pub fn disk_segment_max_rows(&self, bytes_per_vector: i64) -> i64 {
        self.disk_segment_max_size_bytes / bytes_per_vector.max(1)
    }
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self::from_config(&DataCoordConfig::default())
    }
}
