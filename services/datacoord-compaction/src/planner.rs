//! Candidate selection and bin packing of segments into merge plans.
//!
//! Everything here is pure: callers pass snapshot copies of segment
//! metadata and receive unfilled plans (plan id and start time are zero).

use datacoord_core::SegmentInfo;

use crate::plan::{CompactionPlan, CompactionSegmentBinlogs, CompactionType};
use crate::policy::{CompactTime, CompactionPolicy};

/// Whether a segment deserves compaction on its own merits.
///
/// True when the segment has accumulated too many insert log files, holds
/// enough expired data, or carries enough purgeable deletes.
pub fn should_do_single_compaction(
    segment: &SegmentInfo,
    compact_time: &CompactTime,
    policy: &CompactionPolicy,
) -> bool {
    let log_count = segment.binlog_count();
    if log_count >= policy.binlog_max_num {
        tracing::debug!(
            segment_id = %segment.id,
            log_count,
            "Segment exceeds binlog file limit"
        );
        return true;
    }

    if compact_time.expire_time > 0 && segment.last_expire_time <= compact_time.expire_time {
        let expired_size: i64 = segment
            .binlogs
            .iter()
            .flat_map(|f| f.binlogs.iter())
            .filter(|l| l.timestamp_to < compact_time.expire_time)
            .map(|l| l.log_size)
            .sum();
        if expired_size > policy.expired_log_max_size {
            tracing::debug!(
                segment_id = %segment.id,
                expired_size,
                "Segment holds enough expired data"
            );
            return true;
        }
    }

    // Insert logs carry no reliable time range, so deletes are only
    // purgeable once the whole segment is older than the travel floor.
    if segment.last_expire_time >= compact_time.travel_time {
        return false;
    }

    let (deleted_rows, deleted_size) = segment
        .deltalogs
        .iter()
        .flat_map(|f| f.binlogs.iter())
        .filter(|l| l.timestamp_to < compact_time.travel_time)
        .fold((0_i64, 0_i64), |(rows, size), l| {
            (rows + l.entries_num, size + l.log_size)
        });

    let insert_size = segment.insert_log_size();
    if deleted_size as f64 > insert_size as f64 * policy.delete_ratio_threshold {
        tracing::debug!(
            segment_id = %segment.id,
            deleted_size,
            insert_size,
            "Segment delete log ratio reached"
        );
        return true;
    }

    if segment.num_of_rows > 0
        && deleted_rows as f64 / segment.num_of_rows as f64 >= policy.deleted_rows_ratio_threshold
    {
        tracing::debug!(
            segment_id = %segment.id,
            deleted_rows,
            rows = segment.num_of_rows,
            "Segment deleted row ratio reached"
        );
        return true;
    }

    false
}

/// Whether a segment is small enough to be worth merging with others.
pub fn is_small_segment(segment: &SegmentInfo, policy: &CompactionPolicy) -> bool {
    (segment.num_of_rows as f64) < segment.max_row_num as f64 * policy.small_proportion
}

fn is_compactable(target_rows: i64, anchor: &SegmentInfo, policy: &CompactionPolicy) -> bool {
    target_rows as f64 > anchor.max_row_num as f64 * policy.compactable_proportion
}

/// Takes candidates front to back while they fit in `free` rows.
fn greedy_select(
    candidates: &mut Vec<SegmentInfo>,
    mut free: i64,
    max_segments: usize,
) -> (Vec<SegmentInfo>, i64) {
    let mut selected = Vec::new();
    let mut i = 0;
    while i < candidates.len() {
        if selected.len() < max_segments && candidates[i].num_of_rows < free {
            let segment = candidates.remove(i);
            free -= segment.num_of_rows;
            selected.push(segment);
        } else {
            i += 1;
        }
    }
    (selected, free)
}

/// Takes candidates back to front (smallest first) while they fit in `free` rows.
fn reverse_greedy_select(
    candidates: &mut Vec<SegmentInfo>,
    mut free: i64,
    max_segments: usize,
) -> Vec<SegmentInfo> {
    let mut selected = Vec::new();
    for i in (0..candidates.len()).rev() {
        if selected.len() < max_segments && candidates[i].num_of_rows < free {
            let segment = candidates.remove(i);
            free -= segment.num_of_rows;
            selected.push(segment);
        }
    }
    selected
}

fn sort_by_rows_desc(segments: &mut [SegmentInfo]) {
    segments.sort_by(|a, b| b.num_of_rows.cmp(&a.num_of_rows).then(a.id.cmp(&b.id)));
}

/// Packs one channel/partition group into merge plans.
///
/// Prioritized segments (every segment when `force`, otherwise those passing
/// [`should_do_single_compaction`]) are always planned, topped up with other
/// prioritized and then small segments. Remaining small segments are merged
/// only when enough of them fit together.
pub fn generate_plans(
    segments: Vec<SegmentInfo>,
    force: bool,
    compact_time: &CompactTime,
    policy: &CompactionPolicy,
) -> Vec<CompactionPlan> {
    let mut prioritized = Vec::new();
    let mut small = Vec::new();
    for segment in segments {
        if force || should_do_single_compaction(&segment, compact_time, policy) {
            prioritized.push(segment);
        } else if is_small_segment(&segment, policy) {
            small.push(segment);
        }
    }
    sort_by_rows_desc(&mut prioritized);
    sort_by_rows_desc(&mut small);

    let max_extra = policy.max_segments_to_merge.saturating_sub(1);
    let mut plans = Vec::new();

    while !prioritized.is_empty() {
        let anchor = prioritized.remove(0);
        let mut bucket = Vec::new();
        // A full segment is rewritten on its own.
        if anchor.num_of_rows < anchor.max_row_num {
            let free = anchor.max_row_num - anchor.num_of_rows;
            let (picked, free) = greedy_select(&mut prioritized, free, max_extra);
            let remaining = max_extra - picked.len();
            bucket.extend(picked);
            if remaining > 0 {
                let (picked, _) = greedy_select(&mut small, free, remaining);
                bucket.extend(picked);
            }
        }
        bucket.insert(0, anchor);
        plans.push(segments_to_plan(&bucket, compact_time));
    }

    while !small.is_empty() {
        let anchor = small.remove(0);
        let free = anchor.max_row_num - anchor.num_of_rows;
        let mut bucket = vec![anchor];
        bucket.extend(reverse_greedy_select(&mut small, free, max_extra));

        let target_rows: i64 = bucket.iter().map(|s| s.num_of_rows).sum();
        if bucket.len() >= policy.min_segments_to_merge
            || (bucket.len() > 1 && is_compactable(target_rows, &bucket[0], policy))
        {
            plans.push(segments_to_plan(&bucket, compact_time));
        } else {
            tracing::debug!(
                anchor = %bucket[0].id,
                segments = bucket.len(),
                target_rows,
                "Small segment bucket not worth merging yet"
            );
        }
    }

    plans
}

/// Builds an unfilled mix-compaction plan over `segments`.
pub fn segments_to_plan(segments: &[SegmentInfo], compact_time: &CompactTime) -> CompactionPlan {
    CompactionPlan {
        plan_id: Default::default(),
        segment_binlogs: segments.iter().map(CompactionSegmentBinlogs::from).collect(),
        channel: segments
            .first()
            .map(|s| s.insert_channel.clone())
            .unwrap_or_default(),
        compaction_type: CompactionType::Mix,
        timetravel: compact_time.travel_time,
        start_time: 0,
        timeout_in_seconds: 0,
    }
}
