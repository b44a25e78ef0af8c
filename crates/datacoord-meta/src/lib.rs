//! In-memory metadata services backing the data coordinator.

mod allocator;
pub mod catalog;
mod index;
mod meta;
mod reference;

pub use allocator::LocalAllocator;
pub use catalog::{segment_key, MemoryCatalog, MetaCatalog};
pub use index::{IndexDescriptor, IndexRegistry, IndexType};
pub use meta::SegmentMeta;
pub use reference::{SegmentReferenceLock, SegmentReferenceManager};
