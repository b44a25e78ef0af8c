use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use datacoord_core::{CollectionId, CoreError, CoreResult, FieldId, IndexInfoProvider};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Vector index algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexType {
    Flat,
    IvfFlat,
    Hnsw,
    /// Graph index that lives on local disk.
    DiskAnn,
}

impl IndexType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexType::Flat => "flat",
            IndexType::IvfFlat => "ivf_flat",
            IndexType::Hnsw => "hnsw",
            IndexType::DiskAnn => "diskann",
        }
    }

    /// Whether index files are served from disk rather than memory.
    pub fn is_disk(&self) -> bool {
        matches!(self, IndexType::DiskAnn)
    }
}

impl FromStr for IndexType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "flat" => Ok(IndexType::Flat),
            "ivf_flat" => Ok(IndexType::IvfFlat),
            "hnsw" => Ok(IndexType::Hnsw),
            "diskann" => Ok(IndexType::DiskAnn),
            _ => Err(CoreError::invalid_state(format!("Invalid index type: {}", s))),
        }
    }
}

impl std::fmt::Display for IndexType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Index built on one field of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub collection_id: CollectionId,
    pub field_id: FieldId,
    pub index_name: String,
    pub index_type: IndexType,
}

/// In-memory index metadata keyed by collection.
#[derive(Default)]
pub struct IndexRegistry {
    indexes: RwLock<HashMap<CollectionId, Vec<IndexDescriptor>>>,
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an index. Names are unique per collection.
    pub fn create_index(&self, descriptor: IndexDescriptor) -> CoreResult<()> {
        let mut indexes = self.indexes.write();
        let entries = indexes.entry(descriptor.collection_id).or_default();
        if entries.iter().any(|d| d.index_name == descriptor.index_name) {
            return Err(CoreError::already_exists("index", descriptor.index_name));
        }
        entries.push(descriptor);
        Ok(())
    }

    pub fn drop_index(&self, collection_id: CollectionId, index_name: &str) -> CoreResult<()> {
        let mut indexes = self.indexes.write();
        let entries = indexes
            .get_mut(&collection_id)
            .ok_or_else(|| CoreError::not_found("index", index_name))?;
        let before = entries.len();
        entries.retain(|d| d.index_name != index_name);
        if entries.len() == before {
            return Err(CoreError::not_found("index", index_name));
        }
        Ok(())
    }

    pub fn list_indexes(&self, collection_id: CollectionId) -> Vec<IndexDescriptor> {
        self.indexes
            .read()
            .get(&collection_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl IndexInfoProvider for IndexRegistry {
    async fn describe_index(&self, collection_id: CollectionId) -> CoreResult<bool> {
        Ok(self
            .indexes
            .read()
            .get(&collection_id)
            .is_some_and(|entries| entries.iter().any(|d| d.index_type.is_disk())))
    }
}
