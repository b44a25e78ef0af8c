use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Raw identifier issued by the coordination service allocator.
pub type UniqueId = i64;

macro_rules! define_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(
            Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(UniqueId);

        impl $name {
            /// Wraps a raw allocator-issued identifier.
            #[must_use]
            pub const fn new(id: UniqueId) -> Self {
                Self(id)
            }

            /// Returns the raw identifier value.
            #[must_use]
            pub const fn get(self) -> UniqueId {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }

        impl From<UniqueId> for $name {
            fn from(value: UniqueId) -> Self {
                Self(value)
            }
        }

        impl From<$name> for UniqueId {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

define_id!(CollectionId, "Unique identifier for a collection.");
define_id!(
    PartitionId,
    "Unique identifier for a partition within a collection."
);
define_id!(SegmentId, "Unique identifier for a storage segment.");
define_id!(FieldId, "Identifier of a field within a collection schema.");
define_id!(PlanId, "Unique identifier for a compaction plan.");
define_id!(
    SignalId,
    "Identifier of the compaction signal a plan originated from."
);
define_id!(NodeId, "Identifier of a compute (data) node.");
define_id!(
    LockTaskId,
    "Identifier of an external task holding segment references."
);
