use datacoord_core::{CollectionId, SegmentId, SignalId};

/// Request to evaluate segments for compaction. Consumed once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionSignal {
    pub id: SignalId,
    /// Restricts evaluation to one collection. `None` means every collection.
    pub collection_id: Option<CollectionId>,
    /// Segment whose channel and partition should be evaluated.
    pub segment_id: Option<SegmentId>,
    /// Treat every eligible segment as a candidate, ignoring size thresholds.
    pub is_force: bool,
    /// Evaluate whole collections rather than one segment's neighborhood.
    pub is_global: bool,
}

impl CompactionSignal {
    /// Periodic sweep over every collection.
    pub fn global(id: SignalId) -> Self {
        Self {
            id,
            collection_id: None,
            segment_id: None,
            is_force: false,
            is_global: true,
        }
    }

    /// Evaluation of a single collection.
    pub fn collection(id: SignalId, collection_id: CollectionId, is_force: bool) -> Self {
        Self {
            id,
            collection_id: Some(collection_id),
            segment_id: None,
            is_force,
            is_global: true,
        }
    }

    /// Evaluation of the channel and partition a segment belongs to.
    pub fn segment(id: SignalId, collection_id: CollectionId, segment_id: SegmentId) -> Self {
        Self {
            id,
            collection_id: Some(collection_id),
            segment_id: Some(segment_id),
            is_force: false,
            is_global: false,
        }
    }

    /// Metric label for the signal's scope.
    pub fn kind(&self) -> &'static str {
        if self.is_global {
            "global"
        } else {
            "segment"
        }
    }

    /// Metric label for who raised the signal.
    pub fn trigger(&self) -> &'static str {
        if self.is_force {
            "force"
        } else {
            "auto"
        }
    }
}
