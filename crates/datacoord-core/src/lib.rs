//! Core domain types and traits for the data coordinator's compaction services.

pub mod collection;
pub mod compaction;
pub mod config;
pub mod error;
pub mod ids;
pub mod metrics;
pub mod segment;
pub mod traits;
pub mod tso;

pub use collection::{CollectionInfo, CollectionSchema, DataType, FieldSchema, COLLECTION_TTL_KEY, DIM_KEY};
pub use compaction::CompactionResult;
pub use config::{CommonConfig, CompactionConfig, DataCoordConfig, HandlerConfig, SegmentConfig};
pub use error::{CoreError, CoreResult};
pub use ids::{CollectionId, FieldId, LockTaskId, NodeId, PartitionId, PlanId, SegmentId, SignalId, UniqueId};
pub use segment::{Allocation, Binlog, FieldBinlog, SegmentInfo, SegmentState};
pub use traits::{Allocator, IndexInfoProvider, MetadataStore, SegmentLockChecker, SegmentMutator};
pub use tso::Timestamp;
