use thiserror::Error;

/// Canonical error type for data coordinator operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Entity was not found in the metadata store.
    #[error("{entity} `{id}` was not found")]
    NotFound {
        /// Entity type name (e.g. `"segment"`).
        entity: &'static str,
        /// Identifier of the missing entity.
        id: String,
    },

    /// Entity already exists and cannot be created again.
    #[error("{entity} `{id}` already exists")]
    AlreadyExists {
        /// Entity type name (e.g. `"segment"`).
        entity: &'static str,
        /// Identifier that conflicts.
        id: String,
    },

    /// Operation violates current state machine rules.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Human-readable explanation of the invalid state.
        message: String,
    },

    /// Collection schema or properties cannot support the operation.
    #[error("schema error: {message}")]
    Schema {
        /// Human-readable explanation of the schema problem.
        message: String,
    },

    /// Timestamp or id allocation failed.
    #[error("allocation failed: {message}")]
    Allocation {
        /// Details reported by the allocator.
        message: String,
    },

    /// Index information could not be resolved for a collection.
    #[error("index lookup failed: {message}")]
    IndexLookup {
        /// Details reported by the index service.
        message: String,
    },

    /// A compaction plan could not be handed to a compute node.
    #[error("dispatch failed: {message}")]
    Dispatch {
        /// Details of the dispatch failure.
        message: String,
    },

    /// No segment of the collection is eligible for compaction.
    #[error("no segments to compact in collection `{collection_id}`")]
    NothingToCompact {
        /// Collection that was evaluated.
        collection_id: String,
    },

    /// Unexpected internal error occurred.
    #[error("internal error: {message}")]
    Internal {
        /// Human-readable details for debugging purposes.
        message: String,
    },

    /// Serialization error occurred.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error occurred.
    #[error("deserialization error: {0}")]
    DeserializationError(String),
}

impl CoreError {
    /// Creates a `NotFound` variant.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Creates an `AlreadyExists` variant.
    #[must_use]
    pub fn already_exists(entity: &'static str, id: impl ToString) -> Self {
        Self::AlreadyExists {
            entity,
            id: id.to_string(),
        }
    }

    /// Creates an `InvalidState` variant.
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates a `Schema` variant.
    #[must_use]
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Creates an `Allocation` variant.
    #[must_use]
    pub fn allocation(message: impl Into<String>) -> Self {
        Self::Allocation {
            message: message.into(),
        }
    }

    /// Creates an `IndexLookup` variant.
    #[must_use]
    pub fn index_lookup(message: impl Into<String>) -> Self {
        Self::IndexLookup {
            message: message.into(),
        }
    }

    /// Creates a `Dispatch` variant.
    #[must_use]
    pub fn dispatch(message: impl Into<String>) -> Self {
        Self::Dispatch {
            message: message.into(),
        }
    }

    /// Creates a `NothingToCompact` variant.
    #[must_use]
    pub fn nothing_to_compact(collection_id: impl ToString) -> Self {
        Self::NothingToCompact {
            collection_id: collection_id.to_string(),
        }
    }

    /// Creates an `Internal` variant.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_eof() || err.is_syntax() {
            Self::DeserializationError(err.to_string())
        } else {
            Self::SerializationError(err.to_string())
        }
    }
}

/// Convenient result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
