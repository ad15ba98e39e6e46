//! Derived schema info.
//!
//! [`SchemaInfo`] is the engine's working view of a normalized schema: the
//! key attributes in order, the injected bookkeeping columns, the secondary
//! index sub-schemas, and a stable content hash used to detect migrations.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::types::{DataType, IndexElement, IndexType, SortOrder, TableSchema};
use crate::validation::SchemaError;

/// Injected versioning column name.
pub const TID_COLUMN: &str = "_tid";
/// Injected soft-delete deadline column name (ms since epoch, NULL = live).
pub const EXIST_UNTIL_COLUMN: &str = "_exist_until";

/// Sub-schema of one declared secondary index.
///
/// The key columns are the declared index columns followed by the parent's
/// hash/range keys (minus the tid column), appended for uniqueness. `proj`
/// elements carry non-key projected columns.
#[derive(Debug, Clone, PartialEq)]
pub struct SecondaryIndexInfo {
    pub name: String,
    /// All elements: keys in order, then projections.
    pub elements: Vec<IndexElement>,
    /// Key attributes (hash and range) in order.
    pub ikeys: Vec<String>,
    pub ikey_map: BTreeMap<String, IndexElement>,
    /// Projected non-key attributes.
    pub proj: Vec<String>,
}

/// The derived, engine-facing view of a table schema.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaInfo {
    /// The normalized logical schema, exactly as stored in the meta table.
    pub schema: TableSchema,

    /// All attributes including injected bookkeeping columns.
    pub attributes: BTreeMap<String, DataType>,

    /// Primary index elements including the (possibly injected) tid tail.
    pub index: Vec<IndexElement>,

    /// Key attributes (hash and range) in declared order.
    pub ikeys: Vec<String>,
    pub ikey_map: BTreeMap<String, IndexElement>,

    /// Name of the versioning (timeuuid) column.
    pub tid: String,
    /// Whether the tid column was injected rather than author-declared.
    pub tid_injected: bool,

    /// Stable content hash of the normalized schema.
    pub hash: String,

    /// Secondary index sub-schemas by name.
    pub secondary: BTreeMap<String, SecondaryIndexInfo>,
}

impl SchemaInfo {
    /// Derives the engine view from a normalized schema.
    ///
    /// The input must already have passed
    /// [`validate_and_normalize`](crate::validation::validate_and_normalize).
    pub fn derive(schema: TableSchema) -> Result<Self, SchemaError> {
        let hash = content_hash(&schema)?;

        let mut attributes = schema.attributes.clone();
        let mut index = schema.index.clone();

        // The versioning key: reuse an author-declared descending timeuuid
        // range tail, otherwise inject one.
        let declared_tid = index
            .iter()
            .filter(|e| e.is_key())
            .next_back()
            .filter(|e| {
                e.index_type == IndexType::Range
                    && e.order == Some(SortOrder::Desc)
                    && schema.attribute_type(&e.attribute) == Some(&DataType::Timeuuid)
            })
            .map(|e| e.attribute.clone());

        let (tid, tid_injected) = match declared_tid {
            Some(attribute) => (attribute, false),
            None => {
                attributes.insert(TID_COLUMN.to_owned(), DataType::Timeuuid);
                index.push(IndexElement::range(TID_COLUMN, SortOrder::Desc));
                (TID_COLUMN.to_owned(), true)
            }
        };

        attributes.insert(EXIST_UNTIL_COLUMN.to_owned(), DataType::Timestamp);

        let ikeys: Vec<String> = index
            .iter()
            .filter(|e| e.is_key())
            .map(|e| e.attribute.clone())
            .collect();
        let ikey_map: BTreeMap<String, IndexElement> = index
            .iter()
            .filter(|e| e.is_key())
            .map(|e| (e.attribute.clone(), e.clone()))
            .collect();

        let mut secondary = BTreeMap::new();
        for (name, declared) in &schema.secondary_indexes {
            secondary.insert(
                name.clone(),
                derive_secondary(name, declared, &index, &tid),
            );
        }

        Ok(Self {
            schema,
            attributes,
            index,
            ikeys,
            ikey_map,
            tid,
            tid_injected,
            hash,
            secondary,
        })
    }

    /// Declared type of an attribute, bookkeeping columns included.
    pub fn attribute_type(&self, name: &str) -> Option<&DataType> {
        self.attributes.get(name)
    }

    /// Hash-key attributes in declared order.
    pub fn hash_keys(&self) -> Vec<&str> {
        self.index
            .iter()
            .filter(|e| e.index_type == IndexType::Hash)
            .map(|e| e.attribute.as_str())
            .collect()
    }

    /// Returns `true` if the attribute is declared `static`.
    pub fn is_static(&self, name: &str) -> bool {
        self.index
            .iter()
            .any(|e| e.index_type == IndexType::Static && e.attribute == name)
    }

    /// Returns `true` if any index element is `static`.
    pub fn has_static_columns(&self) -> bool {
        self.index
            .iter()
            .any(|e| e.index_type == IndexType::Static)
    }

    /// Column names of the data table: every attribute except static ones,
    /// in sorted order.
    pub fn data_columns(&self) -> Vec<&str> {
        self.attributes
            .keys()
            .map(String::as_str)
            .filter(|name| !self.is_static(name))
            .collect()
    }

    /// Column names of the static sidecar: hash keys then static attributes.
    pub fn static_columns(&self) -> Vec<&str> {
        let mut columns = self.hash_keys();
        columns.extend(
            self.index
                .iter()
                .filter(|e| e.index_type == IndexType::Static)
                .map(|e| e.attribute.as_str()),
        );
        columns
    }

    /// Columns of the secondary-index sidecar: primary key first (the parent
    /// keys minus tid), then every remaining indexed or projected attribute.
    pub fn secondary_table_columns(&self) -> Vec<&str> {
        let mut columns: Vec<&str> = self.secondary_table_pk();
        for info in self.secondary.values() {
            for element in &info.elements {
                let name = element.attribute.as_str();
                if !columns.contains(&name) {
                    columns.push(name);
                }
            }
        }
        columns
    }

    /// Primary key of the secondary-index sidecar: parent keys minus tid.
    pub fn secondary_table_pk(&self) -> Vec<&str> {
        self.ikeys
            .iter()
            .map(String::as_str)
            .filter(|k| *k != self.tid)
            .collect()
    }
}

fn derive_secondary(
    name: &str,
    declared: &[IndexElement],
    parent_index: &[IndexElement],
    tid: &str,
) -> SecondaryIndexInfo {
    let mut elements: Vec<IndexElement> = declared
        .iter()
        .filter(|e| e.is_key())
        .cloned()
        .collect();

    // Parent keys (minus tid) make secondary entries unique per logical row.
    for parent in parent_index.iter().filter(|e| e.is_key()) {
        if parent.attribute == tid {
            continue;
        }
        if !elements.iter().any(|e| e.attribute == parent.attribute) {
            elements.push(parent.clone());
        }
    }

    let ikeys: Vec<String> = elements.iter().map(|e| e.attribute.clone()).collect();
    let ikey_map: BTreeMap<String, IndexElement> = elements
        .iter()
        .map(|e| (e.attribute.clone(), e.clone()))
        .collect();

    let proj: Vec<String> = declared
        .iter()
        .filter(|e| e.index_type == IndexType::Proj)
        .map(|e| e.attribute.clone())
        .collect();
    elements.extend(
        declared
            .iter()
            .filter(|e| e.index_type == IndexType::Proj)
            .cloned(),
    );

    SecondaryIndexInfo {
        name: name.to_owned(),
        elements,
        ikeys,
        ikey_map,
        proj,
    }
}

/// Stable content hash of a normalized schema.
///
/// The schema serializes with sorted object keys (all maps are `BTreeMap`),
/// so equivalent schemas hash identically regardless of input key order.
pub fn content_hash(schema: &TableSchema) -> Result<String, SchemaError> {
    let canonical = serde_json::to_string(schema)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}
