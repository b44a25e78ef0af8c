use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use datacoord_core::{CoreError, CoreResult, SegmentInfo};
use parking_lot::RwLock;

/// Key prefix under which segment documents are stored.
pub const SEGMENT_PREFIX: &str = "datacoord-meta/s";

/// Builds the catalog key of a segment.
pub fn segment_key(segment: &SegmentInfo) -> String {
    format!(
        "{SEGMENT_PREFIX}/{}/{}/{}",
        segment.collection_id, segment.partition_id, segment.id
    )
}

/// Durable backing store for segment metadata.
///
/// Writes are all-or-nothing: either every segment in a batch is persisted
/// or none is.
#[async_trait]
pub trait MetaCatalog: Send + Sync {
    /// Persists a batch of segments atomically.
    async fn save_segments(&self, segments: &[SegmentInfo]) -> CoreResult<()>;

    /// Removes a segment document.
    async fn remove_segment(&self, segment: &SegmentInfo) -> CoreResult<()>;

    /// Loads every persisted segment.
    async fn list_segments(&self) -> CoreResult<Vec<SegmentInfo>>;
}

/// In-memory catalog holding serialized segment documents.
#[derive(Default)]
pub struct MemoryCatalog {
    kvs: RwLock<BTreeMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Raw document stored under `key`.
    pub fn get_raw(&self, key: &str) -> Option<String> {
        self.kvs.read().get(key).cloned()
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.kvs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.kvs.read().is_empty()
    }

    fn check_writable(&self) -> CoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CoreError::internal("catalog write rejected"));
        }
        Ok(())
    }
}

#[async_trait]
impl MetaCatalog for MemoryCatalog {
    async fn save_segments(&self, segments: &[SegmentInfo]) -> CoreResult<()> {
        self.check_writable()?;

        // Serialize everything before touching the map so a bad document
        // leaves the catalog untouched.
        let docs = segments
            .iter()
            .map(|s| Ok((segment_key(s), serde_json::to_string(s)?)))
            .collect::<CoreResult<Vec<_>>>()?;

        let mut kvs = self.kvs.write();
        kvs.extend(docs);
        Ok(())
    }

    async fn remove_segment(&self, segment: &SegmentInfo) -> CoreResult<()> {
        self.check_writable()?;
        self.kvs.write().remove(&segment_key(segment));
        Ok(())
    }

    async fn list_segments(&self) -> CoreResult<Vec<SegmentInfo>> {
        let kvs = self.kvs.read();
        kvs.range(SEGMENT_PREFIX.to_string()..)
            .take_while(|(k, _)| k.starts_with(SEGMENT_PREFIX))
            .map(|(_, v)| serde_json::from_str(v).map_err(CoreError::from))
            .collect()
    }
}
