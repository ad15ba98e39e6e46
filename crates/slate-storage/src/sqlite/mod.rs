//! SQLite backend: client wrapper, query compiler, plan cache, table
//! lifecycle, retention engine, and schema migrator.

pub mod client;
pub mod db;
pub mod migrate;
pub mod plan_cache;
pub mod query;
pub mod retention;
