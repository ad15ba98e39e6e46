//! Query compiler: structured requests to parameterized SQL.
//!
//! Each builder returns a [`Statement`] (SQL text plus parameter vector) or a
//! list of them; nothing here touches a connection. Physical layout per
//! logical table `N`: `[N_data]` holds every non-static attribute with the
//! key attributes as primary key; `[N_static]` (hash keys + static columns)
//! exists iff the schema declares static columns; `[N_secondaryIndex]` (the
//! union of all secondary-index columns, keyed by the parent keys minus tid)
//! exists iff secondary indexes are declared, with one SQL index per logical
//! index.

use std::collections::BTreeMap;

use serde_json::Value;

use slate_core::codec::{self, SqlValue};
use slate_core::request::{
    Condition, DeleteRequest, GetRequest, Op, Projection, PutCondition, PutRequest, TTL_ATTRIBUTE,
};
use slate_core::schema_info::{EXIST_UNTIL_COLUMN, SchemaInfo, SecondaryIndexInfo};
use slate_core::timeuuid;
use slate_core::types::{DataType, IndexElement, IndexType, SortOrder};

use crate::error::{Result, StorageError};
use crate::sqlite::client::Statement;

/// SQL expression for the wall clock in Unix milliseconds. Inlining it keeps
/// soft-delete gates parameter-free, so compiled plans stay cacheable.
const NOW_MS_SQL: &str = "CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER)";

// ---------------------------------------------------------------------------
// Physical names
// ---------------------------------------------------------------------------

pub fn data_table(n: &str) -> String {
    format!("{n}_data")
}

pub fn static_table(n: &str) -> String {
    format!("{n}_static")
}

pub fn secondary_table(n: &str) -> String {
    format!("{n}_secondaryIndex")
}

fn index_name(n: &str, index: &str) -> String {
    format!("{n}_index_{index}")
}

/// Double-quotes an identifier. Physical names may contain domain characters
/// (dots, dashes); quoting keeps them inert in SQL text.
pub(crate) fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_type<'a>(info: &'a SchemaInfo, name: &str) -> Result<&'a DataType> {
    info.attribute_type(name)
        .ok_or_else(|| StorageError::Internal(format!("unknown column {name:?}")))
}

// ---------------------------------------------------------------------------
// DDL
// ---------------------------------------------------------------------------

/// DDL for `[N_data]`.
pub fn build_table_sql(info: &SchemaInfo, n: &str) -> Result<String> {
    let mut columns = Vec::new();
    for name in info.data_columns() {
        let data_type = column_type(info, name)?;
        columns.push(format!("{} {}", quote(name), codec::physical_type(data_type)));
    }
    let pk: Vec<String> = info.ikeys.iter().map(|k| quote(k)).collect();
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} ({}, PRIMARY KEY ({}))",
        quote(&data_table(n)),
        columns.join(", "),
        pk.join(", ")
    ))
}

/// DDL for `[N_static]`: hash keys plus static columns, keyed by the hash
/// keys alone (one row per partition).
pub fn build_static_sql(info: &SchemaInfo, n: &str) -> Result<String> {
    let mut columns = Vec::new();
    for name in info.static_columns() {
        let data_type = column_type(info, name)?;
        columns.push(format!("{} {}", quote(name), codec::physical_type(data_type)));
    }
    let pk: Vec<String> = info.hash_keys().iter().map(|k| quote(k)).collect();
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} ({}, PRIMARY KEY ({}))",
        quote(&static_table(n)),
        columns.join(", "),
        pk.join(", ")
    ))
}

/// DDL for `[N_secondaryIndex]` plus one SQL index per declared logical
/// index over that index's declared keys.
pub fn build_secondary_sql(info: &SchemaInfo, n: &str) -> Result<Vec<String>> {
    if info.secondary.is_empty() {
        return Ok(Vec::new());
    }

    let mut columns = Vec::new();
    for name in info.secondary_table_columns() {
        let data_type = column_type(info, name)?;
        columns.push(format!("{} {}", quote(name), codec::physical_type(data_type)));
    }
    let pk: Vec<String> = info
        .secondary_table_pk()
        .iter()
        .map(|k| quote(k))
        .collect();

    let mut ddl = vec![format!(
        "CREATE TABLE IF NOT EXISTS {} ({}, PRIMARY KEY ({}))",
        quote(&secondary_table(n)),
        columns.join(", "),
        pk.join(", ")
    )];

    for (name, declared) in &info.schema.secondary_indexes {
        let keys: Vec<String> = declared
            .iter()
            .filter(|e| e.is_key())
            .map(|e| {
                format!(
                    "{} {}",
                    quote(&e.attribute),
                    e.order.unwrap_or_default().as_sql()
                )
            })
            .collect();
        ddl.push(format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            quote(&index_name(n, name)),
            quote(&secondary_table(n)),
            keys.join(", ")
        ));
    }
    Ok(ddl)
}

/// All DDL statements materializing a logical table.
pub fn build_create_sql(info: &SchemaInfo, n: &str) -> Result<Vec<Statement>> {
    let mut statements = vec![Statement::ddl(build_table_sql(info, n)?)];
    if info.has_static_columns() {
        statements.push(Statement::ddl(build_static_sql(info, n)?));
    }
    for sql in build_secondary_sql(info, n)? {
        statements.push(Statement::ddl(sql));
    }
    Ok(statements)
}

/// Drops every physical table and index backing a logical table.
pub fn build_drop_sql(info: &SchemaInfo, n: &str) -> Vec<Statement> {
    let mut statements = Vec::new();
    for index in info.secondary.keys() {
        statements.push(Statement::ddl(format!(
            "DROP INDEX IF EXISTS {}",
            quote(&index_name(n, index))
        )));
    }
    if !info.secondary.is_empty() {
        statements.push(Statement::ddl(format!(
            "DROP TABLE IF EXISTS {}",
            quote(&secondary_table(n))
        )));
    }
    if info.has_static_columns() {
        statements.push(Statement::ddl(format!(
            "DROP TABLE IF EXISTS {}",
            quote(&static_table(n))
        )));
    }
    statements.push(Statement::ddl(format!(
        "DROP TABLE IF EXISTS {}",
        quote(&data_table(n))
    )));
    statements
}

// ---------------------------------------------------------------------------
// Predicates
// ---------------------------------------------------------------------------

/// Soft-delete gating of a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftDeleteGate {
    /// Skip rows whose tombstone deadline has passed (user reads).
    SkipExpired,
    /// Only rows that were never tombstoned (retention scans).
    LiveOnly,
    /// No gating (secondary sidecar reads).
    Off,
}

fn qualified(qualifier: &str, attribute: &str) -> String {
    if qualifier.is_empty() {
        quote(attribute)
    } else {
        format!("{qualifier}.{}", quote(attribute))
    }
}

/// WHERE clause implementing a soft-delete gate, if the gate filters at all.
fn gate_clause(gate: SoftDeleteGate, qualifier: &str) -> Option<String> {
    let exist_until = qualified(qualifier, EXIST_UNTIL_COLUMN);
    match gate {
        SoftDeleteGate::SkipExpired => Some(format!(
            "({exist_until} > {NOW_MS_SQL} OR {exist_until} IS NULL)"
        )),
        SoftDeleteGate::LiveOnly => Some(format!("{exist_until} IS NULL")),
        SoftDeleteGate::Off => None,
    }
}

fn push_condition(
    clauses: &mut Vec<String>,
    params: &mut Vec<SqlValue>,
    qualifier: &str,
    attribute: &str,
    data_type: &DataType,
    condition: &Condition,
) -> Result<()> {
    let column = qualified(qualifier, attribute);
    match condition.op().map_err(StorageError::bad_request)? {
        Op::Eq(v) => {
            clauses.push(format!("{column} = ?"));
            params.push(codec::write_value(data_type, v)?);
        }
        Op::Lt(v) => {
            clauses.push(format!("{column} < ?"));
            params.push(codec::write_value(data_type, v)?);
        }
        Op::Gt(v) => {
            clauses.push(format!("{column} > ?"));
            params.push(codec::write_value(data_type, v)?);
        }
        Op::Le(v) => {
            clauses.push(format!("{column} <= ?"));
            params.push(codec::write_value(data_type, v)?);
        }
        Op::Ge(v) => {
            clauses.push(format!("{column} >= ?"));
            params.push(codec::write_value(data_type, v)?);
        }
        Op::Between(lo, hi) => {
            clauses.push(format!("{column} BETWEEN ? AND ?"));
            params.push(codec::write_value(data_type, lo)?);
            params.push(codec::write_value(data_type, hi)?);
        }
    }
    Ok(())
}

/// Translates request predicates. Only key attributes of the routed index
/// are allowed.
fn build_where(
    attributes: &BTreeMap<String, Condition>,
    ikey_map: &BTreeMap<String, IndexElement>,
    info: &SchemaInfo,
    qualifier: &str,
    clauses: &mut Vec<String>,
    params: &mut Vec<SqlValue>,
) -> Result<()> {
    for (attribute, condition) in attributes {
        if !ikey_map.contains_key(attribute) {
            return Err(StorageError::bad_request(format!(
                "predicate on non-key attribute {attribute:?}"
            )));
        }
        let data_type = column_type(info, attribute)?;
        push_condition(clauses, params, qualifier, attribute, data_type, condition)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Get
// ---------------------------------------------------------------------------

fn resolve_projection(
    proj: &Option<Projection>,
    default: Vec<String>,
    available: impl Fn(&str) -> bool,
) -> Result<Vec<String>> {
    let requested: Vec<String> = match proj {
        None => return Ok(default),
        Some(Projection::One(name)) if name == "*" => return Ok(default),
        Some(Projection::One(name)) => vec![name.clone()],
        Some(Projection::Many(names)) => names.clone(),
    };
    for name in &requested {
        if !available(name) {
            return Err(StorageError::bad_request(format!(
                "unknown projection attribute {name:?}"
            )));
        }
    }
    Ok(requested)
}

/// Reconciles the requested order against the declared range keys: every
/// ordered attribute must be a range key, and the directions must be
/// uniformly declared or uniformly reversed (the engine cannot interleave).
/// Returns the full range-key ordering with the resolved direction.
fn resolve_order(
    requested: &BTreeMap<String, SortOrder>,
    range_elements: &[&IndexElement],
) -> Result<Vec<(String, SortOrder)>> {
    let declared_of = |e: &IndexElement| e.order.unwrap_or_default();

    let mut reversed: Option<bool> = None;
    for (attribute, direction) in requested {
        let Some(element) = range_elements.iter().find(|e| e.attribute == *attribute) else {
            return Err(StorageError::bad_request(format!(
                "order attribute {attribute:?} is not a range key"
            )));
        };
        let flip = *direction != declared_of(element);
        match reversed {
            Some(prev) if prev != flip => {
                return Err(StorageError::bad_request(
                    "order directions must be uniformly declared or uniformly reversed",
                ));
            }
            _ => reversed = Some(flip),
        }
    }

    let flip = reversed.unwrap_or(false);
    Ok(range_elements
        .iter()
        .map(|e| {
            let declared = declared_of(e);
            let direction = if flip { declared.reversed() } else { declared };
            (e.attribute.clone(), direction)
        })
        .collect())
}

fn append_paging(sql: &mut String, params: &mut Vec<SqlValue>, req: &GetRequest) {
    match (req.limit, req.next) {
        (Some(limit), Some(next)) => {
            sql.push_str(" LIMIT ? OFFSET ?");
            params.push(SqlValue::Integer(i64::from(limit)));
            params.push(SqlValue::Integer(next as i64));
        }
        (Some(limit), None) => {
            sql.push_str(" LIMIT ?");
            params.push(SqlValue::Integer(i64::from(limit)));
        }
        (None, Some(next)) => {
            sql.push_str(" LIMIT -1 OFFSET ?");
            params.push(SqlValue::Integer(next as i64));
        }
        (None, None) => {}
    }
}

/// Compiles a SELECT for a get request, routing through a secondary index
/// when one is named.
pub fn build_get_query(
    n: &str,
    req: &GetRequest,
    info: &SchemaInfo,
    gate: SoftDeleteGate,
) -> Result<Statement> {
    match &req.index {
        Some(index) => {
            let sub = info.secondary.get(index).ok_or_else(|| {
                StorageError::bad_request(format!("unknown secondary index {index:?}"))
            })?;
            build_secondary_get(n, req, info, sub)
        }
        None => build_data_get(n, req, info, gate),
    }
}

fn build_data_get(
    n: &str,
    req: &GetRequest,
    info: &SchemaInfo,
    gate: SoftDeleteGate,
) -> Result<Statement> {
    // Default projection: the author-declared attributes (bookkeeping columns
    // only appear when explicitly projected).
    let default: Vec<String> = info.schema.attributes.keys().cloned().collect();
    let projection = resolve_projection(&req.proj, default, |c| {
        info.attribute_type(c).is_some()
    })?;

    let needs_static = projection.iter().any(|c| info.is_static(c));

    let select: Vec<String> = projection
        .iter()
        .map(|c| {
            let qualifier = if info.is_static(c) { "s" } else { "d" };
            format!("{} AS {}", qualified(qualifier, c), quote(c))
        })
        .collect();

    let mut sql = format!(
        "SELECT {}{} FROM {} AS d",
        if req.distinct { "DISTINCT " } else { "" },
        select.join(", "),
        quote(&data_table(n))
    );

    if needs_static {
        let on: Vec<String> = info
            .hash_keys()
            .iter()
            .map(|k| format!("d.{} = s.{}", quote(k), quote(k)))
            .collect();
        sql.push_str(&format!(
            " LEFT OUTER JOIN {} AS s ON {}",
            quote(&static_table(n)),
            on.join(" AND ")
        ));
    }

    let mut clauses = Vec::new();
    let mut params = Vec::new();
    build_where(
        &req.attributes,
        &info.ikey_map,
        info,
        "d",
        &mut clauses,
        &mut params,
    )?;

    if let Some(clause) = gate_clause(gate, "d") {
        clauses.push(clause);
    }

    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }

    let range_elements: Vec<&IndexElement> = info
        .index
        .iter()
        .filter(|e| e.index_type == IndexType::Range)
        .collect();
    let order = resolve_order(&req.order, &range_elements)?;
    if !order.is_empty() {
        let terms: Vec<String> = order
            .iter()
            .map(|(c, dir)| format!("d.{} {}", quote(c), dir.as_sql()))
            .collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&terms.join(", "));
    }

    append_paging(&mut sql, &mut params, req);
    Ok(Statement::new(sql, params))
}

fn build_secondary_get(
    n: &str,
    req: &GetRequest,
    info: &SchemaInfo,
    sub: &SecondaryIndexInfo,
) -> Result<Statement> {
    let available = info.secondary_table_columns();

    let mut default: Vec<String> = sub.ikeys.clone();
    default.extend(sub.proj.iter().cloned());
    let projection = resolve_projection(&req.proj, default, |c| available.contains(&c))?;

    let select: Vec<String> = projection
        .iter()
        .map(|c| format!("d.{} AS {}", quote(c), quote(c)))
        .collect();

    let mut sql = format!(
        "SELECT {}{} FROM {} AS d",
        if req.distinct { "DISTINCT " } else { "" },
        select.join(", "),
        quote(&secondary_table(n))
    );

    let mut clauses = Vec::new();
    let mut params = Vec::new();
    build_where(
        &req.attributes,
        &sub.ikey_map,
        info,
        "d",
        &mut clauses,
        &mut params,
    )?;
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }

    let range_elements: Vec<&IndexElement> = sub
        .elements
        .iter()
        .filter(|e| e.index_type == IndexType::Range)
        .collect();
    let order = resolve_order(&req.order, &range_elements)?;
    if !order.is_empty() {
        let terms: Vec<String> = order
            .iter()
            .map(|(c, dir)| format!("d.{} {}", quote(c), dir.as_sql()))
            .collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&terms.join(", "));
    }

    append_paging(&mut sql, &mut params, req);
    Ok(Statement::new(sql, params))
}

// ---------------------------------------------------------------------------
// Put
// ---------------------------------------------------------------------------

/// A compiled put: the data-table statements plus the written storage values
/// the sidecar updates and the retention engine need.
#[derive(Debug, Clone)]
pub struct PutPlan {
    pub statements: Vec<Statement>,
    /// Canonical tid of the written revision.
    pub tid: String,
    /// Embedded time of the tid, Unix milliseconds.
    pub timestamp_ms: i64,
    /// Written attribute values in storage form.
    pub written: BTreeMap<String, SqlValue>,
}

/// Compiles the data-table statements of a put.
///
/// Default semantics are upsert: an UPDATE for the existing-row case plus an
/// `INSERT OR IGNORE` for the create case. `if = "not exists"` compiles to
/// the insert alone; an `if` predicate map compiles to a gated UPDATE.
pub fn build_put_query(
    req: &PutRequest,
    n: &str,
    info: &SchemaInfo,
    ignore_static: bool,
    now_ms: i64,
) -> Result<PutPlan> {
    let mut attributes = req.attributes.clone();

    // The TTL pseudo-attribute converts to a soft-delete deadline.
    if let Some(ttl) = attributes.remove(TTL_ATTRIBUTE) {
        let seconds = ttl
            .as_i64()
            .ok_or_else(|| StorageError::bad_request("_ttl must be an integer"))?;
        attributes.insert(
            EXIST_UNTIL_COLUMN.to_owned(),
            Value::from(now_ms + seconds * 1000),
        );
    }

    // Mint the versioning key when missing; its embedded time is the write
    // timestamp.
    let tid = match attributes.get(&info.tid) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => {
            return Err(StorageError::bad_request(format!(
                "{} must be a timeuuid string, got {other}",
                info.tid
            )));
        }
        None => {
            let minted = timeuuid::mint();
            attributes.insert(info.tid.clone(), Value::String(minted.clone()));
            minted
        }
    };
    let timestamp_ms = timeuuid::unix_millis(&tid)
        .map_err(|e| StorageError::Codec(e.into()))?;

    for name in attributes.keys() {
        if info.attribute_type(name).is_none() {
            return Err(StorageError::bad_request(format!(
                "undeclared attribute {name:?}"
            )));
        }
    }
    for key in &info.ikeys {
        if !attributes.contains_key(key) {
            return Err(StorageError::bad_request(format!(
                "missing key attribute {key:?}"
            )));
        }
    }

    let mut written = BTreeMap::new();
    for (name, value) in &attributes {
        let data_type = column_type(info, name)?;
        written.insert(name.clone(), codec::write_value(data_type, value)?);
    }

    let data_columns: Vec<String> = written
        .keys()
        .filter(|name| !info.is_static(name))
        .cloned()
        .collect();
    let static_columns: Vec<String> = written
        .keys()
        .filter(|name| info.is_static(name))
        .cloned()
        .collect();

    let mut statements = Vec::new();
    match &req.condition {
        Some(PutCondition::Literal(lit)) if lit == "not exists" => {
            statements.push(insert_or_ignore(n, &data_columns, &written));
        }
        Some(PutCondition::Literal(other)) => {
            return Err(StorageError::bad_request(format!(
                "unsupported if condition {other:?}"
            )));
        }
        Some(PutCondition::Predicates(predicates)) => {
            statements.push(conditional_update(
                n,
                info,
                &data_columns,
                &written,
                predicates,
            )?);
        }
        None => {
            if let Some(update) = plain_update(n, info, &data_columns, &written) {
                statements.push(update);
            }
            statements.push(insert_or_ignore(n, &data_columns, &written));
        }
    }

    if !ignore_static && !static_columns.is_empty() {
        statements.push(static_replace(n, info, &static_columns, &written));
    }

    Ok(PutPlan {
        statements,
        tid,
        timestamp_ms,
        written,
    })
}

fn insert_or_ignore(
    n: &str,
    columns: &[String],
    written: &BTreeMap<String, SqlValue>,
) -> Statement {
    let cols: Vec<String> = columns.iter().map(|c| quote(c)).collect();
    let placeholders: Vec<&str> = columns.iter().map(|_| "?").collect();
    let params: Vec<SqlValue> = columns
        .iter()
        .filter_map(|c| written.get(c).cloned())
        .collect();
    Statement::new(
        format!(
            "INSERT OR IGNORE INTO {} ({}) VALUES ({})",
            quote(&data_table(n)),
            cols.join(", "),
            placeholders.join(", ")
        ),
        params,
    )
}

/// The update half of the default upsert. `None` when only key attributes
/// are written (the insert alone suffices).
fn plain_update(
    n: &str,
    info: &SchemaInfo,
    columns: &[String],
    written: &BTreeMap<String, SqlValue>,
) -> Option<Statement> {
    let set_columns: Vec<&String> = columns
        .iter()
        .filter(|c| !info.ikeys.contains(*c))
        .collect();
    if set_columns.is_empty() {
        return None;
    }

    let mut params: Vec<SqlValue> = Vec::new();
    let set: Vec<String> = set_columns
        .iter()
        .map(|c| {
            params.push(written.get(*c).cloned().unwrap_or(SqlValue::Null));
            format!("{} = ?", quote(c))
        })
        .collect();
    let matches: Vec<String> = info
        .ikeys
        .iter()
        .map(|k| {
            params.push(written.get(k).cloned().unwrap_or(SqlValue::Null));
            format!("{} = ?", quote(k))
        })
        .collect();

    Some(Statement::new(
        format!(
            "UPDATE {} SET {} WHERE {}",
            quote(&data_table(n)),
            set.join(", "),
            matches.join(" AND ")
        ),
        params,
    ))
}

fn conditional_update(
    n: &str,
    info: &SchemaInfo,
    columns: &[String],
    written: &BTreeMap<String, SqlValue>,
    predicates: &BTreeMap<String, Condition>,
) -> Result<Statement> {
    let set_columns: Vec<&String> = columns
        .iter()
        .filter(|c| !info.ikeys.contains(*c))
        .collect();
    if set_columns.is_empty() {
        return Err(StorageError::bad_request(
            "conditional put requires non-key attributes",
        ));
    }

    let mut params: Vec<SqlValue> = Vec::new();
    let set: Vec<String> = set_columns
        .iter()
        .map(|c| {
            params.push(written.get(*c).cloned().unwrap_or(SqlValue::Null));
            format!("{} = ?", quote(c))
        })
        .collect();

    let mut clauses: Vec<String> = info
        .ikeys
        .iter()
        .map(|k| {
            params.push(written.get(k).cloned().unwrap_or(SqlValue::Null));
            format!("{} = ?", quote(k))
        })
        .collect();

    for (attribute, condition) in predicates {
        if info.attribute_type(attribute).is_none() || info.is_static(attribute) {
            return Err(StorageError::bad_request(format!(
                "if predicate on unknown attribute {attribute:?}"
            )));
        }
        let data_type = column_type(info, attribute)?;
        push_condition(&mut clauses, &mut params, "", attribute, data_type, condition)?;
    }

    if let Some(clause) = gate_clause(SoftDeleteGate::SkipExpired, "") {
        clauses.push(clause);
    }

    Ok(Statement::new(
        format!(
            "UPDATE {} SET {} WHERE {}",
            quote(&data_table(n)),
            set.join(", "),
            clauses.join(" AND ")
        ),
        params,
    ))
}

fn static_replace(
    n: &str,
    info: &SchemaInfo,
    static_columns: &[String],
    written: &BTreeMap<String, SqlValue>,
) -> Statement {
    let mut columns: Vec<String> = info
        .hash_keys()
        .iter()
        .map(|k| (*k).to_owned())
        .collect();
    columns.extend(static_columns.iter().cloned());

    let cols: Vec<String> = columns.iter().map(|c| quote(c)).collect();
    let placeholders: Vec<&str> = columns.iter().map(|_| "?").collect();
    let params: Vec<SqlValue> = columns
        .iter()
        .map(|c| written.get(c).cloned().unwrap_or(SqlValue::Null))
        .collect();

    Statement::new(
        format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            quote(&static_table(n)),
            cols.join(", "),
            placeholders.join(", ")
        ),
        params,
    )
}

/// Single `INSERT OR REPLACE` refreshing the secondary sidecar row for the
/// written logical row. `None` when the schema declares no secondary
/// indexes.
pub fn build_secondary_update_query(
    info: &SchemaInfo,
    n: &str,
    written: &BTreeMap<String, SqlValue>,
) -> Option<Statement> {
    if info.secondary.is_empty() {
        return None;
    }
    let columns = info.secondary_table_columns();
    let cols: Vec<String> = columns.iter().map(|c| quote(c)).collect();
    let placeholders: Vec<&str> = columns.iter().map(|_| "?").collect();
    let params: Vec<SqlValue> = columns
        .iter()
        .map(|c| written.get(*c).cloned().unwrap_or(SqlValue::Null))
        .collect();

    Some(Statement::new(
        format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            quote(&secondary_table(n)),
            cols.join(", "),
            placeholders.join(", ")
        ),
        params,
    ))
}

// ---------------------------------------------------------------------------
// Delete and retention statements
// ---------------------------------------------------------------------------

/// Hard delete: the soft-delete gate is off.
pub fn build_delete_query(req: &DeleteRequest, n: &str, info: &SchemaInfo) -> Result<Statement> {
    if req.attributes.is_empty() {
        return Err(StorageError::bad_request("delete requires predicates"));
    }
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    build_where(
        &req.attributes,
        &info.ikey_map,
        info,
        "",
        &mut clauses,
        &mut params,
    )?;
    Ok(Statement::new(
        format!(
            "DELETE FROM {} WHERE {}",
            quote(&data_table(n)),
            clauses.join(" AND ")
        ),
        params,
    ))
}

/// GC: purge rows whose tombstone deadline has passed.
pub fn build_delete_expired_query(n: &str) -> Statement {
    let exist_until = quote(EXIST_UNTIL_COLUMN);
    Statement::ddl(format!(
        "DELETE FROM {} WHERE {exist_until} IS NOT NULL AND {exist_until} <= {NOW_MS_SQL}",
        quote(&data_table(n))
    ))
}

/// Per-row delete keyed by the full primary key (used by `latest_hash` to
/// physically remove superseded revisions).
pub fn build_delete_older_query(n: &str, key_values: &[(String, SqlValue)]) -> Statement {
    let mut params = Vec::new();
    let matches: Vec<String> = key_values
        .iter()
        .map(|(k, v)| {
            params.push(v.clone());
            format!("{} = ?", quote(k))
        })
        .collect();
    Statement::new(
        format!(
            "DELETE FROM {} WHERE {}",
            quote(&data_table(n)),
            matches.join(" AND ")
        ),
        params,
    )
}

/// Tombstones one revision: sets its soft-delete deadline.
pub fn build_tombstone_query(
    n: &str,
    key_values: &[(String, SqlValue)],
    exist_until_ms: i64,
) -> Statement {
    let mut params = vec![SqlValue::Integer(exist_until_ms)];
    let matches: Vec<String> = key_values
        .iter()
        .map(|(k, v)| {
            params.push(v.clone());
            format!("{} = ?", quote(k))
        })
        .collect();
    Statement::new(
        format!(
            "UPDATE {} SET {} = ? WHERE {}",
            quote(&data_table(n)),
            quote(EXIST_UNTIL_COLUMN),
            matches.join(" AND ")
        ),
        params,
    )
}

/// Scan of the revisions in one hash-key group, newest first, filtered by
/// the given soft-delete gate. The retention engine scans with
/// [`SoftDeleteGate::LiveOnly`] so already-tombstoned rows are not counted
/// against the window.
pub fn build_revision_scan_query(
    info: &SchemaInfo,
    n: &str,
    hash_values: &[(String, SqlValue)],
    gate: SoftDeleteGate,
) -> Statement {
    let columns: Vec<String> = info.ikeys.iter().map(|k| quote(k)).collect();
    let mut params = Vec::new();
    let mut clauses: Vec<String> = hash_values
        .iter()
        .map(|(k, v)| {
            params.push(v.clone());
            format!("{} = ?", quote(k))
        })
        .collect();
    if let Some(clause) = gate_clause(gate, "") {
        clauses.push(clause);
    }

    Statement::new(
        format!(
            "SELECT {} FROM {} WHERE {} ORDER BY {} DESC",
            columns.join(", "),
            quote(&data_table(n)),
            clauses.join(" AND "),
            quote(&info.tid)
        ),
        params,
    )
}
