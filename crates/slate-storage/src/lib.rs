//! SQLite backend for the slate table engine.
//!
//! Exposes a schema-driven, wide-column-style data model (hash/range keys,
//! static columns, secondary indexes, timeuuid versioning, revision
//! retention) over a file-backed SQLite database. The entry point is
//! [`Db`]: open it with a [`StorageConfig`], then drive it with the typed
//! requests from [`slate_core`].

pub mod config;
pub mod error;
pub mod sqlite;

// Re-exports for convenience.
pub use config::{StorageConfig, StorageGroup};
pub use error::{Result, StorageError};
pub use sqlite::client::Statement;
pub use sqlite::db::Db;
