//! Error types for graphmem-core.

use thiserror::Error;

/// Result type alias using graphmem-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during memory and table operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Table location is not an absolute local path
    #[error("Invalid table path '{0}': must be an absolute local path or file:// URI")]
    InvalidPath(String),

    /// Insert or merge called with zero rows
    #[error("Empty input for {operation}: at least one row is required")]
    EmptyInput { operation: String },

    /// Batch columns or value types disagree with the registered schema
    #[error("Schema mismatch: {message}. Expected columns: [{}]", .expected.join(", "))]
    SchemaMismatch {
        message: String,
        expected: Vec<String>,
    },

    /// Custom attribute collides with a base column or another attribute
    #[error("Schema conflict: column '{0}' is already defined")]
    SchemaConflict(String),

    /// Columns of one batch have different lengths
    #[error("Batch length mismatch: column '{column}' has {actual} values, expected {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    /// Attempt to patch an identity column
    #[error("Column '{0}' is an identity column and cannot be updated")]
    ImmutableColumn(String),

    /// No memory metadata at the given location
    #[error("Memory not found at {0}")]
    NotFound(String),

    /// A memory already exists at the given location
    #[error("Memory already exists at {0}")]
    AlreadyExists(String),

    /// Memory has been soft-deleted
    #[error("Memory {0} has been soft-deleted")]
    Deleted(String),

    /// A table could not be re-read; the cached snapshot is out of date
    #[error("Snapshot of {table} for memory {memory_id} could not be refreshed")]
    StaleSnapshot { memory_id: String, table: String },

    /// Failure reported by the table store; eligible for retry
    #[error("Table storage error during {operation}: {message}")]
    TransientStorage {
        operation: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a transient storage error.
    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransientStorage {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a transient storage error with source.
    pub fn transient_with_source(
        operation: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::TransientStorage {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a schema mismatch error.
    pub fn schema_mismatch(message: impl Into<String>, expected: Vec<String>) -> Self {
        Self::SchemaMismatch {
            message: message.into(),
            expected,
        }
    }

    /// Create an empty input error.
    pub fn empty_input(operation: impl Into<String>) -> Self {
        Self::EmptyInput {
            operation: operation.into(),
        }
    }

    /// Whether the retry policy may attempt the operation again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientStorage { .. })
    }

    /// Name the table operation a storage error came from.
    pub(crate) fn in_operation(self, operation: &str) -> Self {
        match self {
            Self::TransientStorage {
                message, source, ..
            } => Self::TransientStorage {
                operation: operation.to_string(),
                message,
                source,
            },
            other => other,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::transient_with_source("sqlite", e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::transient_with_source("io", e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_only_storage_errors_are_transient() {
        assert!(Error::transient("append", "database is locked").is_transient());
        assert!(!Error::InvalidPath("relative/path".into()).is_transient());
        assert!(!Error::empty_input("insert").is_transient());
        assert!(!Error::schema_mismatch("missing column", vec!["a".into()]).is_transient());
    }

    #[test]
    fn test_schema_mismatch_lists_expected_columns() {
        let err = Error::schema_mismatch(
            "missing column 'impact'",
            vec!["node_id".to_string(), "impact".to_string()],
        );
        let msg = err.to_string();
        assert!(msg.contains("missing column 'impact'"));
        assert!(msg.contains("[node_id, impact]"));
    }

    #[test]
    fn test_transient_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = Error::transient_with_source("create", io);
        assert!(err.source().is_some());
        assert!(err.to_string().contains("disk full"));
    }
}
