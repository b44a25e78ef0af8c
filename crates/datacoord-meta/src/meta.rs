use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use datacoord_core::{
    Allocation, CollectionId, CollectionInfo, CompactionResult, CoreError, CoreResult,
    MetadataStore, SegmentId, SegmentInfo, SegmentMutator, SegmentState,
};
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::catalog::MetaCatalog;

/// Authoritative segment and collection metadata.
///
/// Reads are served from memory. Writes are serialized, persisted through
/// the catalog, and only then applied to the in-memory map, so a failed
/// persist never leaves a half-applied change visible.
pub struct SegmentMeta {
    catalog: Arc<dyn MetaCatalog>,
    segments: RwLock<HashMap<SegmentId, SegmentInfo>>,
    collections: RwLock<HashMap<CollectionId, CollectionInfo>>,
    write_lock: Mutex<()>,
}

impl SegmentMeta {
    /// Creates an empty store on top of `catalog`.
    pub fn new(catalog: Arc<dyn MetaCatalog>) -> Self {
        Self {
            catalog,
            segments: RwLock::new(HashMap::new()),
            collections: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Creates a store and loads every persisted segment.
    pub async fn open(catalog: Arc<dyn MetaCatalog>) -> CoreResult<Self> {
        let meta = Self::new(catalog);
        meta.reload().await?;
        Ok(meta)
    }

    /// Replaces the in-memory segment map with the catalog contents.
    ///
    /// Runtime-only fields (allocations, current rows, compacting flags)
    /// start from their defaults.
    pub async fn reload(&self) -> CoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let loaded = self.catalog.list_segments().await?;
        let count = loaded.len();
        *self.segments.write() = loaded.into_iter().map(|s| (s.id, s)).collect();
        info!(segments = count, "Reloaded segment metadata");
        Ok(())
    }

    /// Registers or replaces collection metadata.
    pub fn add_collection(&self, collection: CollectionInfo) {
        self.collections.write().insert(collection.id, collection);
    }

    /// Adds a new segment.
    ///
    /// # Errors
    ///
    /// Fails if the id is taken, the row count exceeds the capacity, or the
    /// catalog rejects the write.
    pub async fn add_segment(&self, segment: SegmentInfo) -> CoreResult<()> {
        let _guard = self.write_lock.lock().await;
        if self.segments.read().contains_key(&segment.id) {
            return Err(CoreError::already_exists("segment", segment.id));
        }
        check_capacity(&segment)?;

        self.catalog.save_segments(std::slice::from_ref(&segment)).await?;
        debug!(segment_id = %segment.id, collection_id = %segment.collection_id, "Added segment");
        self.segments.write().insert(segment.id, segment);
        Ok(())
    }

    /// Copies of every segment matching `filter`.
    pub fn select_segments<F>(&self, filter: F) -> Vec<SegmentInfo>
    where
        F: Fn(&SegmentInfo) -> bool,
    {
        self.segments
            .read()
            .values()
            .filter(|s| filter(s))
            .cloned()
            .collect()
    }

    /// Moves a segment to `state`.
    ///
    /// Dropping a segment that does not exist succeeds with a warning; that
    /// mirrors the long-standing coordinator behavior and is kept until its
    /// callers are audited. Any other transition on a missing segment fails.
    pub async fn set_state(&self, segment_id: SegmentId, state: SegmentState) -> CoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let Some(mut segment) = self.segments.read().get(&segment_id).cloned() else {
            if state == SegmentState::Dropped {
                warn!(segment_id = %segment_id, "Dropping unknown segment, treating as success");
                return Ok(());
            }
            return Err(CoreError::not_found("segment", segment_id));
        };

        segment.state = state;
        self.persist_and_apply(vec![segment]).await
    }

    /// Removes a segment from the catalog and memory. Unknown ids are ignored.
    pub async fn drop_segment(&self, segment_id: SegmentId) -> CoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let Some(segment) = self.segments.read().get(&segment_id).cloned() else {
            warn!(segment_id = %segment_id, "Segment to drop does not exist");
            return Ok(());
        };

        self.catalog.remove_segment(&segment).await?;
        self.segments.write().remove(&segment_id);
        info!(segment_id = %segment_id, "Removed segment");
        Ok(())
    }

    /// Updates the in-memory row count of a growing segment.
    pub fn set_current_rows(&self, segment_id: SegmentId, rows: i64) -> CoreResult<()> {
        let mut segments = self.segments.write();
        let segment = segments
            .get_mut(&segment_id)
            .ok_or_else(|| CoreError::not_found("segment", segment_id))?;
        if rows > segment.max_row_num {
            return Err(CoreError::invalid_state(format!(
                "segment {segment_id} row count {rows} exceeds capacity {}",
                segment.max_row_num
            )));
        }
        segment.current_rows = rows;
        Ok(())
    }

    /// Records a writer's row reservation.
    pub fn add_allocation(&self, segment_id: SegmentId, allocation: Allocation) -> CoreResult<()> {
        let mut segments = self.segments.write();
        let segment = segments
            .get_mut(&segment_id)
            .ok_or_else(|| CoreError::not_found("segment", segment_id))?;
        segment.allocations.push(allocation);
        Ok(())
    }

    pub fn set_last_flush_time(&self, segment_id: SegmentId, time: DateTime<Utc>) -> CoreResult<()> {
        let mut segments = self.segments.write();
        let segment = segments
            .get_mut(&segment_id)
            .ok_or_else(|| CoreError::not_found("segment", segment_id))?;
        segment.last_flush_time = time;
        Ok(())
    }

    async fn persist_and_apply(&self, updated: Vec<SegmentInfo>) -> CoreResult<()> {
        self.catalog.save_segments(&updated).await?;
        let mut segments = self.segments.write();
        for segment in updated {
            segments.insert(segment.id, segment);
        }
        Ok(())
    }
}

fn check_capacity(segment: &SegmentInfo) -> CoreResult<()> {
    if segment.num_of_rows > segment.max_row_num {
        return Err(CoreError::invalid_state(format!(
            "segment {} row count {} exceeds capacity {}",
            segment.id, segment.num_of_rows, segment.max_row_num
        )));
    }
    Ok(())
}

#[async_trait]
impl MetadataStore for SegmentMeta {
    async fn get_segment(&self, segment_id: SegmentId) -> Option<SegmentInfo> {
        self.segments.read().get(&segment_id).cloned()
    }

    async fn list_segments(&self, collection_id: CollectionId) -> Vec<SegmentInfo> {
        self.select_segments(|s| s.collection_id == collection_id)
    }

    async fn list_all_segments(&self) -> Vec<SegmentInfo> {
        self.segments.read().values().cloned().collect()
    }

    async fn update_segment(
        &self,
        segment_id: SegmentId,
        mutator: SegmentMutator,
    ) -> CoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let original = self
            .segments
            .read()
            .get(&segment_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("segment", segment_id))?;

        let mut updated = original.clone();
        mutator(&mut updated);
        if updated.id != original.id {
            return Err(CoreError::invalid_state("segment id cannot be changed"));
        }
        if updated.num_of_rows != original.num_of_rows {
            check_capacity(&updated)?;
        }
        if updated == original {
            return Ok(());
        }

        self.persist_and_apply(vec![updated]).await
    }

    async fn get_collection(&self, collection_id: CollectionId) -> CoreResult<CollectionInfo> {
        self.collections
            .read()
            .get(&collection_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("collection", collection_id))
    }

    async fn list_collections(&self) -> Vec<CollectionId> {
        let mut ids: Vec<_> = self.collections.read().keys().copied().collect();
        ids.sort();
        ids
    }

    async fn set_segments_compacting(&self, segment_ids: &[SegmentId], compacting: bool) {
        let mut segments = self.segments.write();
        for id in segment_ids {
            match segments.get_mut(id) {
                Some(segment) => segment.is_compacting = compacting,
                None => debug!(segment_id = %id, "Segment vanished before compacting flag update"),
            }
        }
    }

    async fn complete_compaction(
        &self,
        compacted_from: &[SegmentId],
        result: &CompactionResult,
    ) -> CoreResult<Option<SegmentInfo>> {
        let _guard = self.write_lock.lock().await;

        let olds = {
            let segments = self.segments.read();
            if segments.contains_key(&result.segment_id) {
                debug!(
                    plan_id = %result.plan_id,
                    segment_id = %result.segment_id,
                    "Compaction result already applied"
                );
                return Ok(None);
            }
            compacted_from
                .iter()
                .map(|id| {
                    segments
                        .get(id)
                        .cloned()
                        .ok_or_else(|| CoreError::not_found("segment", id))
                })
                .collect::<CoreResult<Vec<_>>>()?
        };

        let Some(first) = olds.first() else {
            return Err(CoreError::invalid_state(format!(
                "plan {} has no source segments",
                result.plan_id
            )));
        };
        if let Some(stale) = olds.iter().find(|s| !s.state.is_healthy()) {
            return Err(CoreError::invalid_state(format!(
                "segment {} is {:?} and cannot be compacted",
                stale.id, stale.state
            )));
        }

        let mut merged = SegmentInfo::new(
            result.segment_id,
            first.collection_id,
            first.partition_id,
            first.insert_channel.clone(),
            olds.iter().map(|s| s.max_row_num).max().unwrap_or(first.max_row_num),
        );
        merged.state = if result.num_of_rows == 0 {
            SegmentState::Dropped
        } else {
            SegmentState::Flushed
        };
        merged.num_of_rows = result.num_of_rows;
        merged.last_expire_time = olds.iter().map(|s| s.last_expire_time).max().unwrap_or(0);
        merged.binlogs = result.insert_logs.clone();
        merged.statslogs = result.field2_statslogs.clone();
        merged.deltalogs = result.deltalogs.clone();
        merged.compaction_from = compacted_from.to_vec();
        check_capacity(&merged)?;

        let mut batch: Vec<SegmentInfo> = olds
            .into_iter()
            .map(|mut s| {
                s.state = SegmentState::Compacted(result.segment_id);
                s.is_compacting = false;
                s
            })
            .collect();
        batch.push(merged.clone());

        self.persist_and_apply(batch).await?;
        info!(
            plan_id = %result.plan_id,
            segment_id = %merged.id,
            rows = merged.num_of_rows,
            sources = compacted_from.len(),
            "Applied compaction result"
        );
        Ok(Some(merged))
    }
}
