use async_trait::async_trait;

use crate::collection::CollectionInfo;
use crate::compaction::CompactionResult;
use crate::error::CoreResult;
use crate::ids::{CollectionId, SegmentId, UniqueId};
use crate::segment::SegmentInfo;
use crate::tso::Timestamp;

/// In-place edit applied to a segment record under the store's write lock.
pub type SegmentMutator = Box<dyn FnOnce(&mut SegmentInfo) + Send>;

/// Authoritative segment and collection metadata.
///
/// Every read returns a copy; only the store mutates its records.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Fetches a copy of a segment record.
    async fn get_segment(&self, segment_id: SegmentId) -> Option<SegmentInfo>;

    /// Lists every segment of a collection, including dropped ones.
    async fn list_segments(&self, collection_id: CollectionId) -> Vec<SegmentInfo>;

    /// Lists every segment known to the store.
    async fn list_all_segments(&self) -> Vec<SegmentInfo>;

    /// Applies `mutator` to a segment and persists the result.
    async fn update_segment(&self, segment_id: SegmentId, mutator: SegmentMutator)
        -> CoreResult<()>;

    /// Fetches collection metadata.
    async fn get_collection(&self, collection_id: CollectionId) -> CoreResult<CollectionInfo>;

    /// Lists all registered collections.
    async fn list_collections(&self) -> Vec<CollectionId>;

    /// Flags segments as owned by an executing compaction.
    async fn set_segments_compacting(&self, segment_ids: &[SegmentId], compacting: bool);

    /// Replaces `compacted_from` with the merged segment described by `result`.
    ///
    /// Returns the new segment, or `None` when the result was already applied.
    async fn complete_compaction(
        &self,
        compacted_from: &[SegmentId],
        result: &CompactionResult,
    ) -> CoreResult<Option<SegmentInfo>>;
}

/// Linearizable timestamp and id issuance.
#[async_trait]
pub trait Allocator: Send + Sync {
    /// Issues a hybrid timestamp greater than every previously issued one.
    async fn alloc_timestamp(&self) -> CoreResult<Timestamp>;

    /// Issues a never-reused identifier.
    async fn alloc_id(&self) -> CoreResult<UniqueId>;
}

/// Index metadata lookup.
#[async_trait]
pub trait IndexInfoProvider: Send + Sync {
    /// Reports whether the collection's vector field carries an on-disk index.
    async fn describe_index(&self, collection_id: CollectionId) -> CoreResult<bool>;
}

/// Membership query over segments pinned by external readers.
pub trait SegmentLockChecker: Send + Sync {
    /// Returns `true` if any task currently references the segment.
    fn has_segment_lock(&self, segment_id: SegmentId) -> bool;
}
