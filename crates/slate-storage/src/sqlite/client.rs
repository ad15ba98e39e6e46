//! SQLite client wrapper: connections, transactions, busy retry.
//!
//! Two connection affinities: a single writer (the mutex is the pool of
//! capacity one; file-backed SQLite serializes writers anyway, and a single
//! writer avoids cross-transaction BUSY storms) and a shared reader used for
//! prepared-statement SELECTs. `run` is the unit of atomicity: `BEGIN
//! IMMEDIATE` .. `COMMIT` around the given statements in declared order.

use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use rand::Rng;
use rusqlite::{Connection, OpenFlags, params_from_iter};
use tracing::{debug, info, warn};

use slate_core::SqlValue;

use crate::config::StorageConfig;
use crate::error::{Result, StorageError, is_busy};

/// Capacity of the per-connection prepared-statement cache. Evicted handles
/// are finalized by rusqlite.
pub const STATEMENT_CACHE_CAPACITY: usize = 500;

/// A compiled statement: SQL text plus its parameter vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// A parameterless statement (DDL).
    pub fn ddl(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }
}

/// A result row: column name/value pairs in select order.
pub type Row = Vec<(String, SqlValue)>;

#[derive(Debug, Clone)]
enum Target {
    File(PathBuf),
    /// Shared-cache URI so the writer and reader see one database.
    Memory(String),
}

struct WriterSlot {
    conn: Option<Connection>,
    last_used: Instant,
}

/// The connection pair plus retry configuration.
pub struct Client {
    writer: Mutex<WriterSlot>,
    reader: Mutex<Connection>,
    target: Target,
    pool_idle_timeout: Duration,
    retry_delay: u64,
    retry_limit: u32,
    show_sql: bool,
}

static NEXT_MEMORY_DB: AtomicU64 = AtomicU64::new(0);

impl Client {
    /// Opens the writer/reader connection pair for the configured database.
    pub fn open(config: &StorageConfig) -> Result<Self> {
        let target = if config.dbname == ":memory:" {
            let id = NEXT_MEMORY_DB.fetch_add(1, Ordering::Relaxed);
            Target::Memory(format!("file:slate-mem-{id}?mode=memory&cache=shared"))
        } else {
            Target::File(config.database_path())
        };

        let client = Self {
            writer: Mutex::new(WriterSlot {
                conn: None,
                last_used: Instant::now(),
            }),
            reader: Mutex::new(open_connection(&target)?),
            target,
            pool_idle_timeout: Duration::from_millis(config.pool_idle_timeout),
            retry_delay: config.retry_delay.max(1),
            retry_limit: config.retry_limit,
            show_sql: config.show_sql,
        };
        info!(dbname = %config.dbname, "opened database");
        Ok(client)
    }

    /// Runs the statements in declared order inside a single transaction.
    ///
    /// `COMMIT` is the sole externally visible point of atomicity; any
    /// mid-transaction failure rolls back and re-raises.
    pub fn run(&self, statements: &[Statement]) -> Result<()> {
        let mut slot = self
            .writer
            .lock()
            .map_err(|e| StorageError::Connection(format!("writer mutex poisoned: {e}")))?;
        let conn = writer_conn(&mut slot, &self.target, self.pool_idle_timeout)?;

        self.with_busy_retry(|| conn.execute_batch("BEGIN IMMEDIATE"))?;

        for statement in statements {
            if let Err(e) = self.exec_on(conn, statement) {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(e.into());
            }
        }
        if let Err(e) = conn.execute_batch("COMMIT") {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(e.into());
        }

        slot.last_used = Instant::now();
        Ok(())
    }

    /// Executes a single statement in autocommit mode (DDL, migrations).
    pub fn execute(&self, statement: &Statement) -> Result<usize> {
        let mut slot = self
            .writer
            .lock()
            .map_err(|e| StorageError::Connection(format!("writer mutex poisoned: {e}")))?;
        let conn = writer_conn(&mut slot, &self.target, self.pool_idle_timeout)?;

        let changed = self.with_busy_retry(|| self.exec_on(conn, statement))?;
        slot.last_used = Instant::now();
        Ok(changed)
    }

    /// Executes a SELECT on the reader connection through the
    /// prepared-statement cache.
    pub fn query(&self, statement: &Statement) -> Result<Vec<Row>> {
        let conn = self
            .reader
            .lock()
            .map_err(|e| StorageError::Connection(format!("reader mutex poisoned: {e}")))?;
        if self.show_sql {
            debug!(sql = %statement.sql, "querying");
        }

        self.with_busy_retry(|| {
            let mut stmt = conn.prepare_cached(&statement.sql)?;
            let names: Vec<String> = stmt
                .column_names()
                .iter()
                .map(|s| (*s).to_owned())
                .collect();

            let mut rows = stmt.query(params_from_iter(statement.params.iter().map(to_sql)))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut converted: Row = Vec::with_capacity(names.len());
                for (i, name) in names.iter().enumerate() {
                    converted.push((name.clone(), from_ref(row.get_ref(i)?)));
                }
                out.push(converted);
            }
            Ok(out)
        })
    }

    /// Drops every cached prepared statement on both connections (schema
    /// migration invalidation).
    pub fn flush_statement_caches(&self) {
        if let Ok(conn) = self.reader.lock() {
            conn.flush_prepared_statement_cache();
        }
        if let Ok(slot) = self.writer.lock() {
            if let Some(conn) = &slot.conn {
                conn.flush_prepared_statement_cache();
            }
        }
    }

    fn exec_on(&self, conn: &Connection, statement: &Statement) -> rusqlite::Result<usize> {
        if self.show_sql {
            debug!(sql = %statement.sql, "executing");
        }
        let mut stmt = conn.prepare_cached(&statement.sql)?;
        stmt.execute(params_from_iter(statement.params.iter().map(to_sql)))
    }

    /// Retries the operation on BUSY with a jittered sleep, up to
    /// `retry_limit` attempts.
    fn with_busy_retry<T>(&self, mut op: impl FnMut() -> rusqlite::Result<T>) -> Result<T> {
        let mut attempts = 0u32;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if is_busy(&e) => {
                    if attempts >= self.retry_limit {
                        warn!(attempts, "busy retries exhausted");
                        return Err(StorageError::RetriesExhausted { attempts });
                    }
                    attempts += 1;
                    let wait = rand::rng().random_range(1..=self.retry_delay);
                    debug!(attempts, wait_ms = wait, "database busy, backing off");
                    std::thread::sleep(Duration::from_millis(wait));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

/// Returns the writer connection, opening it lazily and recycling it after
/// the idle timeout.
fn writer_conn<'a>(
    slot: &'a mut WriterSlot,
    target: &Target,
    idle_timeout: Duration,
) -> Result<&'a Connection> {
    if slot.conn.is_some() && slot.last_used.elapsed() >= idle_timeout {
        debug!("recycling idle writer connection");
        slot.conn = None;
    }
    if slot.conn.is_none() {
        slot.conn = Some(open_connection(target)?);
        slot.last_used = Instant::now();
    }
    slot.conn
        .as_ref()
        .ok_or_else(|| StorageError::Connection("writer connection unavailable".into()))
}

fn open_connection(target: &Target) -> Result<Connection> {
    let conn = match target {
        Target::File(path) => Connection::open(path).map_err(|e| {
            StorageError::Connection(format!("failed to open {}: {e}", path.display()))
        })?,
        Target::Memory(uri) => Connection::open_with_flags(
            uri,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )
        .map_err(|e| StorageError::Connection(format!("failed to open {uri}: {e}")))?,
    };

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| StorageError::Connection(format!("failed to set pragmas: {e}")))?;
    conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_CAPACITY);

    Ok(conn)
}

fn to_sql(value: &SqlValue) -> rusqlite::types::Value {
    match value {
        SqlValue::Null => rusqlite::types::Value::Null,
        SqlValue::Integer(i) => rusqlite::types::Value::Integer(*i),
        SqlValue::Real(f) => rusqlite::types::Value::Real(*f),
        SqlValue::Text(s) => rusqlite::types::Value::Text(s.clone()),
        SqlValue::Blob(b) => rusqlite::types::Value::Blob(b.clone()),
    }
}

fn from_ref(value: rusqlite::types::ValueRef<'_>) -> SqlValue {
    match value {
        rusqlite::types::ValueRef::Null => SqlValue::Null,
        rusqlite::types::ValueRef::Integer(i) => SqlValue::Integer(i),
        rusqlite::types::ValueRef::Real(f) => SqlValue::Real(f),
        rusqlite::types::ValueRef::Text(t) => {
            SqlValue::Text(String::from_utf8_lossy(t).into_owned())
        }
        rusqlite::types::ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn test_client() -> Client {
        Client::open(&StorageConfig::in_memory()).unwrap()
    }

    #[test]
    fn writer_and_reader_share_the_database() {
        let client = test_client();
        client
            .run(&[
                Statement::ddl("CREATE TABLE t (k TEXT PRIMARY KEY, v INTEGER)"),
                Statement::new(
                    "INSERT INTO t (k, v) VALUES (?, ?)",
                    vec![SqlValue::Text("a".into()), SqlValue::Integer(1)],
                ),
            ])
            .unwrap();

        let rows = client
            .query(&Statement::ddl("SELECT k, v FROM t"))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], ("k".into(), SqlValue::Text("a".into())));
        assert_eq!(rows[0][1], ("v".into(), SqlValue::Integer(1)));
    }

    #[test]
    fn failed_statement_rolls_back_the_transaction() {
        let client = test_client();
        client
            .run(&[Statement::ddl(
                "CREATE TABLE t (k TEXT PRIMARY KEY, v INTEGER)",
            )])
            .unwrap();

        let result = client.run(&[
            Statement::new(
                "INSERT INTO t (k, v) VALUES (?, ?)",
                vec![SqlValue::Text("a".into()), SqlValue::Integer(1)],
            ),
            Statement::ddl("INSERT INTO nonexistent VALUES (1)"),
        ]);
        assert!(result.is_err());

        let rows = client.query(&Statement::ddl("SELECT k FROM t")).unwrap();
        assert_eq!(rows.len(), 0, "first insert must not survive the rollback");
    }

    #[test]
    fn statements_execute_in_declared_order() {
        let client = test_client();
        client
            .run(&[
                Statement::ddl("CREATE TABLE t (k TEXT PRIMARY KEY, v INTEGER)"),
                Statement::new(
                    "INSERT INTO t (k, v) VALUES ('a', 1)",
                    Vec::new(),
                ),
                Statement::new(
                    "UPDATE t SET v = 2 WHERE k = 'a'",
                    Vec::new(),
                ),
            ])
            .unwrap();

        let rows = client
            .query(&Statement::ddl("SELECT v FROM t WHERE k = 'a'"))
            .unwrap();
        assert_eq!(rows[0][0].1, SqlValue::Integer(2));
    }

    #[test]
    fn missing_table_surfaces_as_query_error() {
        let client = test_client();
        let err = client
            .query(&Statement::ddl("SELECT * FROM absent"))
            .unwrap_err();
        assert!(err.is_missing_table());
    }
}
