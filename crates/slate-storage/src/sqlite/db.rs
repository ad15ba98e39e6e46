//! [`Db`] -- table lifecycle and the read/write API.
//!
//! Operations resolve a schema (cache, then meta table), compile the request
//! (through the plan cache for reads), execute on the client, and convert
//! results back through the codecs. Every public operation returns a
//! `{status, headers, body}` envelope; errors map to 400/404/500 bodies.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tracing::{debug, info, warn};

use slate_core::codec::{self, SqlValue};
use slate_core::request::{Condition, DeleteRequest, GetRequest, Projection, PutRequest};
use slate_core::response::{Response, ResultSet};
use slate_core::schema_info::{EXIST_UNTIL_COLUMN, SchemaInfo, TID_COLUMN};
use slate_core::timeuuid;
use slate_core::types::TableSchema;
use slate_core::validation::validate_and_normalize;

use crate::config::StorageConfig;
use crate::error::{Result, StorageError};
use crate::sqlite::client::{Client, Row, Statement};
use crate::sqlite::migrate::SchemaMigrator;
use crate::sqlite::plan_cache::PlanCache;
use crate::sqlite::query::{self, SoftDeleteGate};
use crate::sqlite::retention;

/// Logical name of the meta table. Its data table materializes as
/// `global_schema_data`, the bootstrap root holding one serialized schema
/// per logical table.
const META_TABLE: &str = "global_schema";

/// The storage engine handle.
///
/// Cheap to share behind an `Arc`; all interior state is synchronized.
pub struct Db {
    client: Client,
    config: StorageConfig,
    plans: PlanCache,
    schemas: Mutex<HashMap<String, Arc<SchemaInfo>>>,
    /// Built-in schema info for the meta table, fixed at construction.
    meta: Arc<SchemaInfo>,
}

impl Db {
    /// Opens the engine and creates the meta table if absent.
    pub fn open(config: StorageConfig) -> Result<Self> {
        let client = Client::open(&config)?;
        let meta = meta_schema_info()?;
        let db = Self {
            client,
            config,
            plans: PlanCache::new(),
            schemas: Mutex::new(HashMap::new()),
            meta,
        };
        db.client
            .run(&query::build_create_sql(&db.meta, META_TABLE)?)?;
        debug!("meta table ready");
        Ok(db)
    }

    /// Opens an in-memory engine (tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::open(StorageConfig::in_memory())
    }

    // -- Operations ----------------------------------------------------------

    /// Creates the logical table, or migrates it in place when a table of
    /// the same name exists with a different schema hash.
    pub fn create_table(&self, domain: &str, schema: TableSchema) -> Response {
        respond(self.create_table_inner(domain, schema), "createTable")
    }

    /// Drops the logical table and its meta row. Idempotent: dropping an
    /// unknown table succeeds.
    pub fn drop_table(&self, domain: &str, table: &str) -> Response {
        respond(self.drop_table_inner(domain, table), "dropTable")
    }

    /// Returns the stored logical schema, with the meta revision's tid as an
    /// etag header.
    pub fn get_table_schema(&self, domain: &str, table: &str) -> Response {
        respond(self.get_table_schema_inner(domain, table), "getTableSchema")
    }

    /// Reads rows. An unknown table reads as empty (`404`, `items: []`).
    pub fn get(&self, domain: &str, req: &GetRequest) -> Response {
        respond(self.get_inner(domain, req), "get")
    }

    /// Writes one logical row (upsert by default), then applies the table's
    /// retention policy.
    pub fn put(&self, domain: &str, req: &PutRequest) -> Response {
        respond(self.put_inner(domain, req), "put")
    }

    /// Hard-deletes matching rows.
    pub fn delete(&self, domain: &str, req: &DeleteRequest) -> Response {
        respond(self.delete_inner(domain, req), "delete")
    }

    // -- Lifecycle internals -------------------------------------------------

    fn create_table_inner(&self, domain: &str, schema: TableSchema) -> Result<Response> {
        validate_domain(domain)?;
        let normalized = validate_and_normalize(schema)?;
        let proposed = Arc::new(SchemaInfo::derive(normalized)?);
        let n = self.physical_name(domain, &proposed.schema.table);

        match self.load_schema(&n)? {
            None => {
                let mut statements = query::build_create_sql(&proposed, &n)?;
                statements.extend(self.meta_put_statements(&n, &proposed)?);
                self.client.run(&statements)?;
                self.cache_schema(&n, Arc::clone(&proposed));
                info!(table = %n, "created table");
                Ok(Response::created())
            }
            Some(current) if current.hash == proposed.hash => {
                debug!(table = %n, "schema unchanged, create is a no-op");
                Ok(Response::created())
            }
            Some(current) => {
                let migrator = SchemaMigrator::new(&current, &proposed)?;
                migrator.execute(&self.client, &n)?;
                self.client.run(&self.meta_put_statements(&n, &proposed)?)?;
                self.plans.invalidate_prefix(&format!("{n}:"));
                self.client.flush_statement_caches();
                self.cache_schema(&n, Arc::clone(&proposed));
                info!(table = %n, version = proposed.schema.version, "migrated table");
                Ok(Response::created())
            }
        }
    }

    fn drop_table_inner(&self, domain: &str, table: &str) -> Result<Response> {
        validate_domain(domain)?;
        let n = self.physical_name(domain, table);
        let Some(info) = self.load_schema(&n)? else {
            debug!(table = %n, "drop of unknown table is a no-op");
            return Ok(Response::no_content());
        };

        let mut statements = query::build_drop_sql(&info, &n);
        let meta_delete = DeleteRequest {
            table: META_TABLE.to_owned(),
            attributes: [(
                "table".to_owned(),
                Condition::Eq(Value::String(n.clone())),
            )]
            .into(),
        };
        statements.push(query::build_delete_query(&meta_delete, META_TABLE, &self.meta)?);
        self.client.run(&statements)?;

        if let Ok(mut cache) = self.schemas.lock() {
            cache.remove(&n);
        }
        self.plans.invalidate_prefix(&format!("{n}:"));
        info!(table = %n, "dropped table");
        Ok(Response::no_content())
    }

    fn get_table_schema_inner(&self, domain: &str, table: &str) -> Result<Response> {
        validate_domain(domain)?;
        let n = self.physical_name(domain, table);
        let Some((schema, tid)) = self.read_meta_row(&n)? else {
            return Err(StorageError::not_found("table schema", n));
        };
        let mut response = Response::new(200, serde_json::to_value(&schema)?);
        if !tid.is_empty() {
            response = response.with_header("etag", tid);
        }
        Ok(response)
    }

    // -- Read/write internals ------------------------------------------------

    fn get_inner(&self, domain: &str, req: &GetRequest) -> Result<Response> {
        validate_domain(domain)?;
        let n = self.physical_name(domain, &req.table);
        let Some(info) = self.load_schema(&n)? else {
            // Missing table schema reads as empty.
            return Ok(Response::from_result_set(ResultSet::default()));
        };

        let key = PlanCache::key(&n, req)?;
        let plan = self.plans.get_or_build(key, || {
            query::build_get_query(&n, req, &info, SoftDeleteGate::SkipExpired)
        })?;

        let rows = match self.client.query(&plan) {
            Ok(rows) => rows,
            Err(e) if e.is_missing_table() => {
                debug!(table = %n, "missing physical table reads as empty");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let items = convert_rows(&info, rows)?;
        let next = (req.next.is_some() || req.limit.is_some())
            .then(|| req.next.unwrap_or(0) + items.len() as u64);
        Ok(Response::from_result_set(ResultSet {
            count: items.len(),
            items,
            next,
        }))
    }

    fn put_inner(&self, domain: &str, req: &PutRequest) -> Result<Response> {
        validate_domain(domain)?;
        let n = self.physical_name(domain, &req.table);
        let info = self
            .load_schema(&n)?
            .ok_or_else(|| StorageError::not_found("table schema", n.clone()))?;

        let now = now_ms();
        let plan = query::build_put_query(req, &n, &info, false, now)?;
        let mut statements = plan.statements.clone();
        if let Some(statement) = query::build_secondary_update_query(&info, &n, &plan.written) {
            statements.push(statement);
        }
        self.client.run(&statements)?;

        // Best-effort: retention never fails the caller's write.
        if let Err(e) = retention::apply(&self.client, &info, &n, &plan, now) {
            warn!(table = %n, error = %e, "retention sweep failed");
        }
        Ok(Response::created())
    }

    fn delete_inner(&self, domain: &str, req: &DeleteRequest) -> Result<Response> {
        validate_domain(domain)?;
        let n = self.physical_name(domain, &req.table);
        let info = self
            .load_schema(&n)?
            .ok_or_else(|| StorageError::not_found("table schema", n.clone()))?;

        let statement = query::build_delete_query(req, &n, &info)?;
        self.client.run(std::slice::from_ref(&statement))?;
        Ok(Response::no_content())
    }

    // -- Schema resolution ---------------------------------------------------

    fn physical_name(&self, domain: &str, table: &str) -> String {
        format!("{}_{}", self.config.resolve_group(domain), table)
    }

    fn load_schema(&self, n: &str) -> Result<Option<Arc<SchemaInfo>>> {
        if let Some(info) = self
            .schemas
            .lock()
            .ok()
            .and_then(|cache| cache.get(n).cloned())
        {
            return Ok(Some(info));
        }
        let Some((schema, _)) = self.read_meta_row(n)? else {
            return Ok(None);
        };
        let info = Arc::new(SchemaInfo::derive(validate_and_normalize(schema)?)?);
        self.cache_schema(n, Arc::clone(&info));
        Ok(Some(info))
    }

    fn cache_schema(&self, n: &str, info: Arc<SchemaInfo>) {
        if let Ok(mut cache) = self.schemas.lock() {
            cache.insert(n.to_owned(), info);
        }
    }

    /// Reads the newest meta revision for a physical table: the stored
    /// logical schema and the revision's canonical tid.
    fn read_meta_row(&self, n: &str) -> Result<Option<(TableSchema, String)>> {
        let req = GetRequest {
            table: META_TABLE.to_owned(),
            attributes: [(
                "table".to_owned(),
                Condition::Eq(Value::String(n.to_owned())),
            )]
            .into(),
            proj: Some(Projection::Many(vec![
                "value".to_owned(),
                TID_COLUMN.to_owned(),
            ])),
            limit: Some(1),
            ..GetRequest::default()
        };
        let statement =
            query::build_get_query(META_TABLE, &req, &self.meta, SoftDeleteGate::SkipExpired)?;
        let rows = self.client.query(&statement)?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };

        let mut schema: Option<TableSchema> = None;
        let mut tid = String::new();
        for (name, value) in row {
            match (name.as_str(), value) {
                ("value", SqlValue::Blob(bytes)) => schema = Some(serde_json::from_slice(&bytes)?),
                (TID_COLUMN, SqlValue::Text(sortable)) => {
                    tid = timeuuid::from_sortable(&sortable)
                        .map_err(|e| StorageError::Codec(e.into()))?;
                }
                _ => {}
            }
        }
        Ok(schema.map(|s| (s, tid)))
    }

    fn meta_put_statements(&self, n: &str, info: &SchemaInfo) -> Result<Vec<Statement>> {
        let req = PutRequest {
            table: META_TABLE.to_owned(),
            attributes: [
                ("table".to_owned(), Value::String(n.to_owned())),
                ("value".to_owned(), serde_json::to_value(&info.schema)?),
            ]
            .into(),
            condition: None,
        };
        let plan = query::build_put_query(&req, META_TABLE, &self.meta, false, now_ms())?;
        Ok(plan.statements)
    }
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db").finish_non_exhaustive()
    }
}

fn meta_schema_info() -> Result<Arc<SchemaInfo>> {
    let schema: TableSchema = serde_json::from_value(serde_json::json!({
        "table": META_TABLE,
        "attributes": {"table": "string", "value": "json"},
        "index": [{"attribute": "table", "type": "hash"}]
    }))?;
    Ok(Arc::new(SchemaInfo::derive(validate_and_normalize(
        schema,
    )?)?))
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Domains are not SQL identifiers (dots and dashes are routine); restrict
/// to a safe character set and rely on identifier quoting downstream.
fn validate_domain(domain: &str) -> Result<()> {
    let ok = !domain.is_empty()
        && domain
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if !ok {
        return Err(StorageError::bad_request(format!(
            "invalid domain {domain:?}"
        )));
    }
    Ok(())
}

/// Strips bookkeeping columns and codec-reads every remaining attribute.
fn convert_rows(
    info: &SchemaInfo,
    rows: Vec<Row>,
) -> Result<Vec<serde_json::Map<String, Value>>> {
    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        let mut item = serde_json::Map::new();
        for (name, value) in row {
            if name == EXIST_UNTIL_COLUMN
                || name == "_domain"
                || (info.tid_injected && name == info.tid)
            {
                continue;
            }
            let Some(data_type) = info.attribute_type(&name) else {
                continue;
            };
            item.insert(name, codec::read_value(data_type, value)?);
        }
        items.push(item);
    }
    Ok(items)
}

fn respond(result: Result<Response>, op: &str) -> Response {
    match result {
        Ok(response) => response,
        Err(e) => {
            if e.status() >= 500 {
                warn!(op, error = %e, "operation failed");
            } else {
                debug!(op, error = %e, "operation rejected");
            }
            e.to_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn schema(v: serde_json::Value) -> TableSchema {
        serde_json::from_value(v).unwrap()
    }

    fn simple_schema() -> TableSchema {
        schema(json!({
            "table": "simple",
            "attributes": {"key": "string", "tid": "timeuuid", "body": "blob"},
            "index": [
                {"attribute": "key", "type": "hash"},
                {"attribute": "tid", "type": "range", "order": "desc"}
            ]
        }))
    }

    #[test]
    fn meta_bootstrap() {
        let db = Db::open_in_memory().unwrap();
        let rows = db
            .client
            .query(&Statement::ddl("SELECT COUNT(*) AS n FROM \"global_schema_data\""))
            .unwrap();
        assert_eq!(rows[0][0].1, SqlValue::Integer(0));
    }

    #[test]
    fn create_is_idempotent_for_equal_hash() {
        let db = Db::open_in_memory().unwrap();
        assert_eq!(db.create_table("d", simple_schema()).status, 201);
        assert_eq!(db.create_table("d", simple_schema()).status, 201);
    }

    #[test]
    fn get_table_schema_round_trips_with_etag() {
        let db = Db::open_in_memory().unwrap();
        db.create_table("d", simple_schema());

        let resp = db.get_table_schema("d", "simple");
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body["table"], "simple");
        assert_eq!(resp.headers.get("etag").map(|t| t.len()), Some(36));

        let missing = db.get_table_schema("d", "nope");
        assert_eq!(missing.status, 404);
        assert_eq!(missing.body["type"], "notfound");
    }

    #[test]
    fn unknown_table_reads_as_empty() {
        let db = Db::open_in_memory().unwrap();
        let req: GetRequest =
            serde_json::from_value(json!({"table": "ghost", "attributes": {"key": "k"}}))
                .unwrap();
        let resp = db.get("d", &req);
        assert_eq!(resp.status, 404);
        assert_eq!(resp.body["count"], 0);
        assert_eq!(resp.items().unwrap().len(), 0);
    }

    #[test]
    fn put_to_unknown_table_is_404() {
        let db = Db::open_in_memory().unwrap();
        let req: PutRequest =
            serde_json::from_value(json!({"table": "ghost", "attributes": {"key": "k"}}))
                .unwrap();
        assert_eq!(db.put("d", &req).status, 404);
    }

    #[test]
    fn storage_group_prefix_applies() {
        let mut config = StorageConfig::in_memory();
        config.storage_groups = vec![crate::config::StorageGroup {
            name: "grouped".into(),
            domains: vec!["/^sub\\./".into()],
        }];
        let db = Db::open(config).unwrap();
        db.create_table("sub.example.org", simple_schema());

        // The physical name carries the group prefix, not the domain.
        let rows = db
            .client
            .query(&Statement::ddl(
                "SELECT COUNT(*) AS n FROM \"grouped_simple_data\"",
            ))
            .unwrap();
        assert_eq!(rows[0][0].1, SqlValue::Integer(0));
    }

    #[test]
    fn bad_domain_rejected() {
        let db = Db::open_in_memory().unwrap();
        let resp = db.create_table("bad\"domain", simple_schema());
        assert_eq!(resp.status, 400);
    }
}
