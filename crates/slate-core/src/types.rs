//! Logical schema model.
//!
//! A [`TableSchema`] is what a caller supplies to `createTable` and what the
//! meta table stores. Attribute types serialize as their textual form
//! (`"string"`, `"timeuuid"`, `"set<int>"`, ...); index elements and retention
//! policies use tagged JSON objects. Unknown envelope fields are ignored.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Attribute types
// ---------------------------------------------------------------------------

/// A declared attribute type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataType {
    String,
    Blob,
    Boolean,
    Int,
    Varint,
    Decimal,
    Float,
    Double,
    Timestamp,
    Timeuuid,
    Uuid,
    Json,
    /// A set of scalar elements, stored encoded. Nested sets are rejected.
    Set(Box<DataType>),
}

impl DataType {
    /// Returns `true` for types whose elements compare numerically.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Boolean
                | Self::Int
                | Self::Varint
                | Self::Float
                | Self::Double
                | Self::Timestamp
        )
    }

    /// Returns the element type for `set<T>`, or `None` for scalars.
    pub fn element_type(&self) -> Option<&DataType> {
        match self {
            Self::Set(inner) => Some(inner),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => f.write_str("string"),
            Self::Blob => f.write_str("blob"),
            Self::Boolean => f.write_str("boolean"),
            Self::Int => f.write_str("int"),
            Self::Varint => f.write_str("varint"),
            Self::Decimal => f.write_str("decimal"),
            Self::Float => f.write_str("float"),
            Self::Double => f.write_str("double"),
            Self::Timestamp => f.write_str("timestamp"),
            Self::Timeuuid => f.write_str("timeuuid"),
            Self::Uuid => f.write_str("uuid"),
            Self::Json => f.write_str("json"),
            Self::Set(inner) => write!(f, "set<{inner}>"),
        }
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let scalar = |s: &str| -> Option<DataType> {
            Some(match s {
                "string" => Self::String,
                "blob" => Self::Blob,
                "boolean" => Self::Boolean,
                "int" => Self::Int,
                "varint" => Self::Varint,
                "decimal" => Self::Decimal,
                "float" => Self::Float,
                "double" => Self::Double,
                "timestamp" => Self::Timestamp,
                "timeuuid" => Self::Timeuuid,
                "uuid" => Self::Uuid,
                "json" => Self::Json,
                _ => return None,
            })
        };

        if let Some(t) = scalar(s) {
            return Ok(t);
        }
        if let Some(inner) = s.strip_prefix("set<").and_then(|r| r.strip_suffix('>')) {
            let element = scalar(inner).ok_or_else(|| format!("invalid set element type: {inner}"))?;
            return Ok(Self::Set(Box::new(element)));
        }
        Err(format!("invalid attribute type: {s}"))
    }
}

impl Serialize for DataType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DataType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Index elements
// ---------------------------------------------------------------------------

/// Role of an attribute within an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexType {
    /// Partition key. At least one per table.
    Hash,
    /// Clustering key with a sort order.
    Range,
    /// Per-partition value stored in the static sidecar.
    Static,
    /// Projected (non-key) column of a secondary index.
    Proj,
}

/// Sort direction of a range key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }

    pub fn reversed(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }
}

/// One element of an index declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexElement {
    pub attribute: String,
    #[serde(rename = "type")]
    pub index_type: IndexType,
    /// Sort order; meaningful for `range` only. Normalization fills `desc`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<SortOrder>,
}

impl IndexElement {
    pub fn hash(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            index_type: IndexType::Hash,
            order: None,
        }
    }

    pub fn range(attribute: impl Into<String>, order: SortOrder) -> Self {
        Self {
            attribute: attribute.into(),
            index_type: IndexType::Range,
            order: Some(order),
        }
    }

    pub fn static_col(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            index_type: IndexType::Static,
            order: None,
        }
    }

    /// Returns `true` if the element contributes to the primary key.
    pub fn is_key(&self) -> bool {
        matches!(self.index_type, IndexType::Hash | IndexType::Range)
    }
}

// ---------------------------------------------------------------------------
// Retention policy
// ---------------------------------------------------------------------------

/// Revision retention policy, applied after every write.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Keep every revision.
    #[default]
    All,
    /// Keep the newest `count` revisions per hash-key group; the rest are
    /// tombstoned with a grace TTL.
    Latest {
        count: u32,
        #[serde(default)]
        grace_ttl: u64,
    },
    /// `latest`, plus superseded revisions are physically removed.
    LatestHash {
        count: u32,
        #[serde(default)]
        grace_ttl: u64,
    },
    /// Keep the newest `count` revisions per `interval`-second time bucket.
    Interval {
        count: u32,
        #[serde(default)]
        grace_ttl: u64,
        interval: u64,
    },
}

impl RetentionPolicy {
    /// Returns `true` for the no-op policy.
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }
}

// ---------------------------------------------------------------------------
// Table options
// ---------------------------------------------------------------------------

/// Advisory durability level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Durability {
    Low,
    #[default]
    Standard,
}

/// Table-level options.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableOptions {
    #[serde(default)]
    pub durability: Durability,
}

// ---------------------------------------------------------------------------
// Table schema
// ---------------------------------------------------------------------------

/// An author-supplied logical table schema.
///
/// This is the unit stored (serialized) in the meta table. The map-typed
/// fields use `BTreeMap` so serialization is key-sorted, which keeps the
/// schema content hash stable under re-serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Logical table name.
    pub table: String,

    /// Attribute name to declared type.
    pub attributes: BTreeMap<String, DataType>,

    /// Primary index: at least one `hash` element, optional `range` tail,
    /// optional `static` columns.
    pub index: Vec<IndexElement>,

    /// Secondary indexes by name.
    #[serde(default, rename = "secondaryIndexes")]
    pub secondary_indexes: BTreeMap<String, Vec<IndexElement>>,

    /// Revision retention policy. Defaults to keeping everything.
    #[serde(default, rename = "revisionRetentionPolicy")]
    pub revision_retention_policy: RetentionPolicy,

    /// Schema version; must increase strictly on migration.
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub options: TableOptions,
}

fn default_version() -> u32 {
    1
}

impl TableSchema {
    /// Iterates the primary-index key elements (hash and range) in order.
    pub fn key_elements(&self) -> impl Iterator<Item = &IndexElement> {
        self.index.iter().filter(|e| e.is_key())
    }

    /// Returns the declared type of an attribute.
    pub fn attribute_type(&self, name: &str) -> Option<&DataType> {
        self.attributes.get(name)
    }

    /// Returns `true` if any index element is `static`.
    pub fn has_static_columns(&self) -> bool {
        self.index
            .iter()
            .any(|e| e.index_type == IndexType::Static)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn data_type_round_trip() {
        for s in [
            "string",
            "blob",
            "boolean",
            "int",
            "varint",
            "decimal",
            "float",
            "double",
            "timestamp",
            "timeuuid",
            "uuid",
            "json",
            "set<int>",
            "set<string>",
            "set<timeuuid>",
        ] {
            let t: DataType = s.parse().unwrap();
            assert_eq!(t.to_string(), s);
        }
    }

    #[test]
    fn nested_set_rejected() {
        assert!("set<set<int>>".parse::<DataType>().is_err());
        assert!("set<frob>".parse::<DataType>().is_err());
        assert!("frob".parse::<DataType>().is_err());
    }

    #[test]
    fn schema_deserializes_with_defaults() {
        let schema: TableSchema = serde_json::from_value(serde_json::json!({
            "table": "simple",
            "attributes": {"key": "string", "tid": "timeuuid", "body": "blob"},
            "index": [
                {"attribute": "key", "type": "hash"},
                {"attribute": "tid", "type": "range", "order": "desc"}
            ]
        }))
        .unwrap();

        assert_eq!(schema.version, 1);
        assert_eq!(schema.revision_retention_policy, RetentionPolicy::All);
        assert!(schema.secondary_indexes.is_empty());
        assert_eq!(schema.options.durability, Durability::Standard);
    }

    #[test]
    fn retention_policy_tagged_form() {
        let p: RetentionPolicy =
            serde_json::from_str(r#"{"type":"latest_hash","count":3,"grace_ttl":60}"#).unwrap();
        assert_eq!(
            p,
            RetentionPolicy::LatestHash {
                count: 3,
                grace_ttl: 60
            }
        );

        let p: RetentionPolicy = serde_json::from_str(r#"{"type":"all"}"#).unwrap();
        assert!(p.is_all());
    }

    #[test]
    fn unknown_body_fields_ignored() {
        let schema: TableSchema = serde_json::from_value(serde_json::json!({
            "table": "t",
            "attributes": {"k": "string"},
            "index": [{"attribute": "k", "type": "hash"}],
            "somethingNew": true
        }))
        .unwrap();
        assert_eq!(schema.table, "t");
    }
}
