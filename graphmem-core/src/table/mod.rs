//! Transactional table store boundary.
//!
//! Everything above this module talks to storage through the [`TableStore`]
//! trait: a table is identified by an absolute local location and supports
//! snapshot reads, appends, update-only merges, deletes, compaction and
//! vacuum. Each successful write produces a new table version.
//!
//! [`SqliteTableStore`] is the bundled implementation; each table location
//! is a directory holding one SQLite database with versioned rows and a
//! commit log.

mod schema;
mod sqlite;
mod types;

pub use sqlite::{SqliteStoreConfig, SqliteTableStore};
pub use types::{DataType, Field, RecordBatch, TableSchema, Value};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const FILE_SCHEME: &str = "file://";

/// Validated location of a table: an absolute local filesystem path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableUri(PathBuf);

impl TableUri {
    /// Parse a `file://` URI or a bare absolute path.
    pub fn parse(uri: &str) -> Result<Self> {
        let path = uri.strip_prefix(FILE_SCHEME).unwrap_or(uri);
        if path.is_empty() || path.contains("://") {
            return Err(Error::InvalidPath(uri.to_string()));
        }
        Self::from_path(path).map_err(|_| Error::InvalidPath(uri.to_string()))
    }

    /// Wrap an absolute path.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_absolute() {
            return Err(Error::InvalidPath(path.display().to_string()));
        }
        Ok(Self(path.to_path_buf()))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Location of a child table under this one.
    pub fn join(&self, name: &str) -> TableUri {
        TableUri(self.0.join(name))
    }
}

impl fmt::Display for TableUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", FILE_SCHEME, self.0.display())
    }
}

/// How `create` treats an existing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Create if absent; no-op if the table already exists
    Ignore,
    /// Replace schema and contents
    Overwrite,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::Ignore => write!(f, "ignore"),
            WriteMode::Overwrite => write!(f, "overwrite"),
        }
    }
}

/// Outcome of an update-only merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeMetrics {
    /// Target rows rewritten
    pub rows_updated: usize,
    /// Source keys that matched no target row, in source order
    #[serde(skip)]
    pub unmatched_keys: Vec<Value>,
    /// Version committed by the merge, if any row changed
    pub version: Option<u64>,
}

/// Outcome of a compaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionMetrics {
    pub rows_rewritten: usize,
    pub clustered_by: Vec<String>,
    pub version: Option<u64>,
}

/// Outcome of a vacuum.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VacuumMetrics {
    /// Obsolete row versions older than the retention window
    pub rows_reclaimable: usize,
    /// Rows physically removed (zero on a dry run)
    pub rows_removed: usize,
    pub dry_run: bool,
}

/// One entry of a table's commit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub version: u64,
    pub operation: String,
    pub committed_at: DateTime<Utc>,
    pub rows_added: usize,
    pub rows_removed: usize,
}

/// Transactional table primitive.
///
/// Implementations provide snapshot isolation per table. Failures caused by
/// the backend (contention, I/O) are reported as
/// [`Error::TransientStorage`] so callers can retry them; contract
/// violations (schema, empty input) use their own variants.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Whether a table exists at the location.
    async fn exists(&self, uri: &TableUri) -> Result<bool>;

    /// Create a table from a batch, honoring the write mode.
    async fn create(&self, uri: &TableUri, batch: &RecordBatch, mode: WriteMode) -> Result<()>;

    /// Snapshot of the table's current rows.
    async fn read(&self, uri: &TableUri) -> Result<RecordBatch>;

    /// Append rows. The batch schema must equal the table schema.
    async fn append(&self, uri: &TableUri, batch: &RecordBatch) -> Result<()>;

    /// For each source row, overwrite the supplied columns of every target
    /// row whose `match_column` equals the source value. Unmatched source
    /// rows are dropped.
    async fn merge_update(
        &self,
        uri: &TableUri,
        batch: &RecordBatch,
        match_column: &str,
    ) -> Result<MergeMetrics>;

    /// Remove rows whose `column` value is one of `keys`. Returns the number
    /// of rows removed.
    async fn delete_where(&self, uri: &TableUri, column: &str, keys: &[Value]) -> Result<usize>;

    /// Rewrite live rows, optionally clustered by the given columns.
    async fn compact(
        &self,
        uri: &TableUri,
        cluster_columns: Option<&[String]>,
    ) -> Result<CompactionMetrics>;

    /// Reclaim row versions superseded more than `retention_hours` ago.
    async fn vacuum(
        &self,
        uri: &TableUri,
        retention_hours: u64,
        dry_run: bool,
    ) -> Result<VacuumMetrics>;

    /// Commit log, oldest first.
    async fn history(&self, uri: &TableUri) -> Result<Vec<CommitInfo>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_file_uri() {
        let uri = TableUri::parse("file:///tmp/memory/nodes").unwrap();
        assert_eq!(uri.path(), Path::new("/tmp/memory/nodes"));
        assert_eq!(uri.to_string(), "file:///tmp/memory/nodes");
    }

    #[test]
    fn test_parse_bare_absolute_path() {
        let uri = TableUri::parse("/var/data/index").unwrap();
        assert_eq!(uri.path(), Path::new("/var/data/index"));
    }

    #[test]
    fn test_rejects_relative_and_remote() {
        for bad in [
            "relative/nodes",
            "file://relative/nodes",
            "s3://bucket/nodes",
            "",
            "file://",
        ] {
            assert!(
                matches!(TableUri::parse(bad), Err(Error::InvalidPath(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_join() {
        let root = TableUri::parse("/data/mem").unwrap();
        assert_eq!(root.join("edges").path(), Path::new("/data/mem/edges"));
    }
}
