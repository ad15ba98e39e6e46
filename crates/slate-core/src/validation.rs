//! Schema validation and normalization.
//!
//! [`validate_and_normalize`] is the single entry point: it rejects malformed
//! schemas and returns a canonical form (range orders filled in, defaults
//! applied) suitable for hashing and for storage in the meta table.

use std::collections::BTreeMap;

use crate::types::{DataType, IndexElement, IndexType, RetentionPolicy, SortOrder, TableSchema};

/// Error type for schema validation failures.
///
/// The storage layer maps every variant to a `bad_request` response.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("table name is required")]
    TableNameRequired,

    #[error("invalid identifier {name:?}: {reason}")]
    InvalidIdentifier { name: String, reason: &'static str },

    #[error("schema version must be at least 1")]
    InvalidVersion,

    #[error("index must contain at least one hash element")]
    MissingHashKey,

    #[error("index element references undeclared attribute {0:?}")]
    UnknownIndexAttribute(String),

    #[error("attribute {0:?} appears more than once in an index")]
    DuplicateIndexAttribute(String),

    #[error("proj elements are only valid in secondary indexes")]
    ProjInPrimaryIndex,

    #[error("static elements are only valid in the primary index")]
    StaticInSecondaryIndex,

    #[error("retention policy: {0}")]
    InvalidRetentionPolicy(&'static str),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, SchemaError>;

/// Checks a user-supplied name: ASCII alphanumeric/underscore, not starting
/// with a digit. A leading underscore is reserved for bookkeeping columns.
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(SchemaError::InvalidIdentifier {
            name: name.to_owned(),
            reason: "empty",
        });
    };
    if !first.is_ascii_alphabetic() {
        return Err(SchemaError::InvalidIdentifier {
            name: name.to_owned(),
            reason: "must start with a letter",
        });
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(SchemaError::InvalidIdentifier {
            name: name.to_owned(),
            reason: "allowed characters are [A-Za-z0-9_]",
        });
    }
    Ok(())
}

/// Validates a schema and returns its canonical form.
pub fn validate_and_normalize(mut schema: TableSchema) -> Result<TableSchema> {
    if schema.table.is_empty() {
        return Err(SchemaError::TableNameRequired);
    }
    validate_identifier(&schema.table)?;

    if schema.version < 1 {
        return Err(SchemaError::InvalidVersion);
    }

    for name in schema.attributes.keys() {
        validate_identifier(name)?;
    }

    validate_index(&mut schema.index, &schema.attributes, false)?;
    if !schema.index.iter().any(|e| e.index_type == IndexType::Hash) {
        return Err(SchemaError::MissingHashKey);
    }

    for (name, elements) in &mut schema.secondary_indexes {
        validate_identifier(name)?;
        validate_index(elements, &schema.attributes, true)?;
        if !elements.iter().any(|e| e.index_type == IndexType::Hash) {
            return Err(SchemaError::MissingHashKey);
        }
    }

    validate_retention(&schema.revision_retention_policy)?;

    Ok(schema)
}

fn validate_index(
    elements: &mut [IndexElement],
    attributes: &BTreeMap<String, DataType>,
    secondary: bool,
) -> Result<()> {
    let mut seen = std::collections::BTreeSet::new();
    for element in elements.iter_mut() {
        if !attributes.contains_key(&element.attribute) {
            return Err(SchemaError::UnknownIndexAttribute(element.attribute.clone()));
        }
        if !seen.insert(element.attribute.clone()) {
            return Err(SchemaError::DuplicateIndexAttribute(
                element.attribute.clone(),
            ));
        }
        match element.index_type {
            IndexType::Range => {
                // Range order defaults to descending.
                element.order.get_or_insert(SortOrder::Desc);
            }
            IndexType::Proj if !secondary => return Err(SchemaError::ProjInPrimaryIndex),
            IndexType::Static if secondary => return Err(SchemaError::StaticInSecondaryIndex),
            _ => {
                element.order = None;
            }
        }
    }
    Ok(())
}

fn validate_retention(policy: &RetentionPolicy) -> Result<()> {
    match policy {
        RetentionPolicy::All => Ok(()),
        RetentionPolicy::Latest { count, .. } | RetentionPolicy::LatestHash { count, .. } => {
            if *count == 0 {
                return Err(SchemaError::InvalidRetentionPolicy("count must be >= 1"));
            }
            Ok(())
        }
        RetentionPolicy::Interval {
            count, interval, ..
        } => {
            if *count == 0 {
                return Err(SchemaError::InvalidRetentionPolicy("count must be >= 1"));
            }
            if *interval == 0 {
                return Err(SchemaError::InvalidRetentionPolicy("interval must be > 0"));
            }
            Ok(())
        }
    }
}
