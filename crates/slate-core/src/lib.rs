//! Core types for the slate table engine.
//!
//! This crate contains the logical data model -- schemas, derived schema info,
//! value codecs, timeuuid handling, and the request/response envelopes. It is
//! backend-agnostic: SQL values cross into the storage crate as [`SqlValue`]
//! and nothing here touches a database connection.

pub mod codec;
pub mod request;
pub mod response;
pub mod schema_info;
pub mod timeuuid;
pub mod types;
pub mod validation;

// Re-exports for convenience.
pub use codec::{CodecError, SqlValue};
pub use request::{Condition, DeleteRequest, GetRequest, Projection, PutCondition, PutRequest};
pub use response::{Response, ResultSet};
pub use schema_info::{SchemaInfo, SecondaryIndexInfo};
pub use types::{
    DataType, Durability, IndexElement, IndexType, RetentionPolicy, SortOrder, TableOptions,
    TableSchema,
};
pub use validation::SchemaError;
