//! Schema migrator.
//!
//! Validates that a proposed schema diff is one SQLite can perform in place
//! (add column yes; drop column no; change the index of an existing column
//! no), then emits the additive DDL. Construction validates: a migrator that
//! builds successfully issues only allowed changes.

use tracing::{debug, info};

use slate_core::codec;
use slate_core::schema_info::SchemaInfo;
use slate_core::types::IndexElement;

use crate::error::{Result, StorageError};
use crate::sqlite::client::{Client, Statement};
use crate::sqlite::query;

/// A validated migration from one schema revision to the next.
#[derive(Debug)]
pub struct SchemaMigrator<'a> {
    current: &'a SchemaInfo,
    proposed: &'a SchemaInfo,
}

impl<'a> SchemaMigrator<'a> {
    /// Validates the diff across all four axes (table name, attributes,
    /// index, version). Fails before any DDL is issued.
    pub fn new(current: &'a SchemaInfo, proposed: &'a SchemaInfo) -> Result<Self> {
        if current.schema.table != proposed.schema.table {
            return Err(StorageError::unsupported("cannot change the table name"));
        }
        if proposed.schema.version <= current.schema.version {
            return Err(StorageError::bad_request(format!(
                "schema version must increase (current {}, proposed {})",
                current.schema.version, proposed.schema.version
            )));
        }

        // Attributes: adds only. Deletions are tolerated logically (the
        // column simply drops out of the default projection); type changes
        // are not expressible in place.
        for (name, data_type) in &proposed.schema.attributes {
            if let Some(existing) = current.schema.attributes.get(name) {
                if existing != data_type {
                    return Err(StorageError::unsupported(format!(
                        "cannot change type of attribute {name:?} ({existing} to {data_type})"
                    )));
                }
            }
        }
        for name in current.schema.attributes.keys() {
            if !proposed.schema.attributes.contains_key(name) {
                debug!(attribute = %name, "attribute dropped logically, column retained");
            }
        }

        // Index: the hash/range key sequence is frozen.
        let current_keys: Vec<&IndexElement> =
            current.schema.index.iter().filter(|e| e.is_key()).collect();
        let proposed_keys: Vec<&IndexElement> =
            proposed.schema.index.iter().filter(|e| e.is_key()).collect();
        if current_keys != proposed_keys {
            return Err(StorageError::unsupported(
                "cannot change hash or range keys",
            ));
        }

        // An attribute that survives the migration must keep its index role.
        // A static element moving to or from an attribute would strand the
        // value in the wrong physical table (a formerly-static column only
        // exists in the sidecar). Static elements enter with a new attribute
        // and leave with its removal, never on their own.
        let role_in = |schema: &SchemaInfo, name: &str| {
            schema
                .schema
                .index
                .iter()
                .find(|e| e.attribute == name)
                .map(|e| e.index_type)
        };
        for name in proposed.schema.attributes.keys() {
            if !current.schema.attributes.contains_key(name) {
                continue;
            }
            let before = role_in(current, name);
            let after = role_in(proposed, name);
            if before != after {
                return Err(StorageError::unsupported(format!(
                    "cannot change the index type of existing attribute {name:?}"
                )));
            }
        }

        // Secondary indexes are fixed at creation.
        if current.schema.secondary_indexes != proposed.schema.secondary_indexes {
            return Err(StorageError::unsupported(
                "cannot change secondary indexes after creation",
            ));
        }

        Ok(Self { current, proposed })
    }

    /// The additive DDL implementing the diff, in execution order.
    pub fn statements(&self, n: &str) -> Result<Vec<Statement>> {
        let mut statements = Vec::new();

        // A newly required static sidecar is materialized whole; otherwise
        // new static attributes become columns on the existing sidecar.
        let sidecar_is_new =
            self.proposed.has_static_columns() && !self.current.has_static_columns();
        if sidecar_is_new {
            statements.push(Statement::ddl(query::build_static_sql(self.proposed, n)?));
        }

        for (name, data_type) in &self.proposed.schema.attributes {
            if self.current.schema.attributes.contains_key(name) {
                continue;
            }
            if self.proposed.is_static(name) {
                if sidecar_is_new {
                    continue; // covered by the CREATE TABLE above
                }
                statements.push(Statement::ddl(format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    query::quote(&query::static_table(n)),
                    query::quote(name),
                    codec::physical_type(data_type)
                )));
            } else {
                statements.push(Statement::ddl(format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    query::quote(&query::data_table(n)),
                    query::quote(name),
                    codec::physical_type(data_type)
                )));
            }
        }

        Ok(statements)
    }

    /// Executes the migration. `duplicate column` errors from the engine are
    /// swallowed so re-running a migration is idempotent.
    pub fn execute(&self, client: &Client, n: &str) -> Result<()> {
        let statements = self.statements(n)?;
        info!(
            table = %n,
            from = self.current.schema.version,
            to = self.proposed.schema.version,
            statements = statements.len(),
            "migrating schema"
        );
        for statement in statements {
            match client.execute(&statement) {
                Ok(_) => {}
                Err(e) if e.is_duplicate_column() => {
                    debug!(sql = %statement.sql, "column already exists, skipping");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
