//! Storage error types.

use slate_core::response::Response;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A request failed validation (bad predicates, bad ordering, malformed
    /// schema, undeclared attributes).
    #[error("bad request: {title}")]
    BadRequest {
        /// Human-readable description of the violation.
        title: String,
    },

    /// The requested entity was not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g., "table schema").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// A proposed schema change cannot be performed in place.
    #[error("unsupported migration: {title}")]
    UnsupportedMigration {
        /// Which diff axis was violated.
        title: String,
    },

    /// Failed to establish or maintain a database connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// Busy retries were exhausted.
    #[error("database busy after {attempts} attempts")]
    RetriesExhausted {
        /// How many attempts were made.
        attempts: u32,
    },

    /// A raw SQLite error.
    #[error("query error: {0}")]
    Query(#[from] rusqlite::Error),

    /// JSON serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Schema validation or derivation failed.
    #[error("schema error: {0}")]
    Schema(#[from] slate_core::SchemaError),

    /// Value conversion failed.
    #[error("codec error: {0}")]
    Codec(#[from] slate_core::CodecError),

    /// Catch-all for unexpected internal errors.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the storage crate.
pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    // -- Constructors --------------------------------------------------------

    /// Creates a [`StorageError::BadRequest`] with the given title.
    pub fn bad_request(title: impl Into<String>) -> Self {
        Self::BadRequest {
            title: title.into(),
        }
    }

    /// Creates a [`StorageError::NotFound`] for the given entity kind and id.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a [`StorageError::UnsupportedMigration`] with the given title.
    pub fn unsupported(title: impl Into<String>) -> Self {
        Self::UnsupportedMigration {
            title: title.into(),
        }
    }

    // -- Predicates ----------------------------------------------------------

    /// Returns `true` if this is a [`StorageError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if the underlying engine reported a missing table.
    pub fn is_missing_table(&self) -> bool {
        matches!(self, Self::Query(e) if e.to_string().contains("no such table"))
    }

    /// Returns `true` if the underlying engine reported a duplicate column
    /// (idempotent re-migration).
    pub fn is_duplicate_column(&self) -> bool {
        matches!(self, Self::Query(e) if e.to_string().contains("duplicate column"))
    }

    // -- Envelope mapping ----------------------------------------------------

    /// The HTTP-style status for this error.
    pub fn status(&self) -> u16 {
        match self {
            Self::BadRequest { .. }
            | Self::UnsupportedMigration { .. }
            | Self::Schema(_)
            | Self::Codec(_) => 400,
            Self::NotFound { .. } => 404,
            Self::Connection(_)
            | Self::RetriesExhausted { .. }
            | Self::Query(_)
            | Self::Serialization(_)
            | Self::Internal(_) => 500,
        }
    }

    /// The error kind carried in the response body's `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest { .. }
            | Self::UnsupportedMigration { .. }
            | Self::Schema(_)
            | Self::Codec(_) => "bad_request",
            Self::NotFound { .. } => "notfound",
            _ => "engine",
        }
    }

    /// Renders the error as a response envelope.
    pub fn to_response(&self) -> Response {
        Response::error(self.status(), self.kind(), self.to_string())
    }
}

/// Returns `true` if a rusqlite error is a busy/locked condition worth
/// retrying.
pub(crate) fn is_busy(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(f, _)
            if matches!(
                f.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(StorageError::bad_request("x").status(), 400);
        assert_eq!(StorageError::not_found("table schema", "d_t").status(), 404);
        assert_eq!(StorageError::unsupported("index change").status(), 400);
        assert_eq!(StorageError::Internal("boom".into()).status(), 500);
    }

    #[test]
    fn response_shape() {
        let resp = StorageError::unsupported("cannot change hash keys").to_response();
        assert_eq!(resp.status, 400);
        assert_eq!(resp.body["type"], "bad_request");
    }
}
