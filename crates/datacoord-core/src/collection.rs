use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::error::{CoreError, CoreResult};
use crate::ids::{CollectionId, FieldId, PartitionId};

/// Collection property holding the time-to-live in seconds.
pub const COLLECTION_TTL_KEY: &str = "collection.ttl.seconds";

/// Type parameter holding a vector field's dimension.
pub const DIM_KEY: &str = "dim";

/// Field data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    VarChar,
    BinaryVector,
    FloatVector,
}

impl DataType {
    /// Returns the canonical snake_case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float => "float",
            Self::Double => "double",
            Self::VarChar => "var_char",
            Self::BinaryVector => "binary_vector",
            Self::FloatVector => "float_vector",
        }
    }

    /// Whether values of this type are vectors.
    #[must_use]
    pub const fn is_vector(&self) -> bool {
        matches!(self, Self::BinaryVector | Self::FloatVector)
    }
}

impl FromStr for DataType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bool" => Ok(Self::Bool),
            "int8" => Ok(Self::Int8),
            "int16" => Ok(Self::Int16),
            "int32" => Ok(Self::Int32),
            "int64" => Ok(Self::Int64),
            "float" => Ok(Self::Float),
            "double" => Ok(Self::Double),
            "var_char" => Ok(Self::VarChar),
            "binary_vector" => Ok(Self::BinaryVector),
            "float_vector" => Ok(Self::FloatVector),
            _ => Err(()),
        }
    }
}

/// Schema entry for a single field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldSchema {
    pub field_id: FieldId,
    pub name: String,
    pub data_type: DataType,
    /// Free-form type parameters such as `dim`.
    #[serde(default)]
    pub type_params: HashMap<String, String>,
}

impl FieldSchema {
    #[must_use]
    pub fn new(field_id: FieldId, name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            field_id,
            name: name.into(),
            data_type,
            type_params: HashMap::new(),
        }
    }

    /// Adds a type parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.type_params.insert(key.into(), value.into());
        self
    }
}

/// Ordered field list of a collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionSchema {
    pub name: String,
    pub fields: Vec<FieldSchema>,
}

impl CollectionSchema {
    /// Returns the first vector field.
    ///
    /// # Errors
    ///
    /// Returns a schema error if no field holds vectors.
    pub fn vector_field(&self) -> CoreResult<&FieldSchema> {
        self.fields
            .iter()
            .find(|f| f.data_type.is_vector())
            .ok_or_else(|| CoreError::schema(format!("collection `{}` has no vector field", self.name)))
    }

    /// Dimension of the vector field.
    ///
    /// # Errors
    ///
    /// Returns a schema error if there is no vector field, or its `dim`
    /// parameter is missing, unparseable, or not positive.
    pub fn vector_dimension(&self) -> CoreResult<i64> {
        let field = self.vector_field()?;
        let raw = field.type_params.get(DIM_KEY).ok_or_else(|| {
            warn!(collection = %self.name, field = %field.name, "Vector field has no dimension");
            CoreError::schema(format!("vector field `{}` has no dimension", field.name))
        })?;
        let dim: i64 = raw.parse().map_err(|_| {
            warn!(collection = %self.name, field = %field.name, dim = %raw, "Invalid vector dimension");
            CoreError::schema(format!(
                "vector field `{}` has invalid dimension `{raw}`",
                field.name
            ))
        })?;
        if dim <= 0 {
            return Err(CoreError::schema(format!(
                "vector field `{}` has non-positive dimension {dim}",
                field.name
            )));
        }
        Ok(dim)
    }

    /// Bytes occupied by one vector of the vector field.
    ///
    /// # Errors
    ///
    /// Propagates [`CollectionSchema::vector_dimension`] failures.
    pub fn bytes_per_vector(&self) -> CoreResult<i64> {
        let field = self.vector_field()?;
        let dim = self.vector_dimension()?;
        Ok(match field.data_type {
            DataType::BinaryVector => (dim / 8).max(1),
            _ => dim * 4,
        })
    }
}

/// Collection metadata consulted by the compaction trigger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionInfo {
    pub id: CollectionId,
    pub schema: CollectionSchema,
    #[serde(default)]
    pub partitions: Vec<PartitionId>,
    #[serde(default)]
    pub properties: HashMap<String, String>,
    /// Start position per insert channel.
    #[serde(default)]
    pub start_positions: Vec<(String, Vec<u8>)>,
}

impl CollectionInfo {
    #[must_use]
    pub fn new(id: CollectionId, schema: CollectionSchema) -> Self {
        Self {
            id,
            schema,
            partitions: Vec::new(),
            properties: HashMap::new(),
            start_positions: Vec::new(),
        }
    }

    /// Sets a string property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Time-to-live configured for the collection.
    ///
    /// Returns `Ok(None)` when the property is absent or `0`.
    ///
    /// # Errors
    ///
    /// Returns a schema error if the property is not a non-negative integer.
    pub fn ttl(&self) -> CoreResult<Option<Duration>> {
        let Some(raw) = self.properties.get(COLLECTION_TTL_KEY) else {
            return Ok(None);
        };
        let secs: i64 = raw.trim().parse().map_err(|_| {
            warn!(collection_id = %self.id, ttl = %raw, "Invalid collection ttl");
            CoreError::schema(format!(
                "collection `{}` has invalid ttl `{raw}`",
                self.id
            ))
        })?;
        if secs < 0 {
            warn!(collection_id = %self.id, ttl = secs, "Negative collection ttl");
            return Err(CoreError::schema(format!(
                "collection `{}` has negative ttl {secs}",
                self.id
            )));
        }
        Ok((secs > 0).then(|| Duration::from_secs(secs as u64)))
    }
}
