//! Retrying access to the table store.
//!
//! [`RetryingTableClient`] is the only component that issues table
//! operations. It validates every location before touching storage, applies
//! the [`RetryPolicy`] to writes and maintenance, and turns read failures
//! into an absent result.

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::table::{
    CommitInfo, CompactionMetrics, DataType, Field, MergeMetrics, RecordBatch, TableStore,
    TableUri, VacuumMetrics, Value, WriteMode,
};

/// Options for [`RetryingTableClient::compact_and_retain`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MaintenanceOptions {
    /// Cluster rows by these columns while compacting
    pub z_order_columns: Option<Vec<String>>,
    /// Keep superseded row versions younger than this
    pub retention_hours: u64,
    /// Report what vacuum would remove without removing it
    pub dry_run: bool,
}

impl Default for MaintenanceOptions {
    fn default() -> Self {
        Self {
            z_order_columns: None,
            retention_hours: 24,
            dry_run: true,
        }
    }
}

impl MaintenanceOptions {
    pub fn with_z_order(mut self, columns: Vec<String>) -> Self {
        self.z_order_columns = Some(columns);
        self
    }

    pub fn with_retention_hours(mut self, hours: u64) -> Self {
        self.retention_hours = hours;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Result of compaction plus vacuum on one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MaintenanceReport {
    pub compaction: CompactionMetrics,
    pub vacuum: VacuumMetrics,
}

/// Table client with URI validation and bounded retries.
#[derive(Clone)]
pub struct RetryingTableClient {
    store: Arc<dyn TableStore>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for RetryingTableClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingTableClient")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RetryingTableClient {
    /// Create a client with the default retry policy.
    pub fn new(store: Arc<dyn TableStore>) -> Self {
        Self {
            store,
            policy: RetryPolicy::default(),
        }
    }

    /// Create a client with a custom retry policy.
    pub fn with_policy(store: Arc<dyn TableStore>, policy: RetryPolicy) -> Result<Self> {
        policy.validate()?;
        Ok(Self { store, policy })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Create or overwrite a table.
    #[instrument(skip(self, batch), fields(rows = batch.num_rows()))]
    pub async fn create(&self, uri: &str, batch: &RecordBatch, mode: WriteMode) -> Result<()> {
        let uri = &TableUri::parse(uri)?;
        self.policy
            .run("create", move || self.store.create(uri, batch, mode))
            .await
    }

    /// Snapshot of a table, or `None` if it cannot be read.
    ///
    /// Unlike the write operations this never returns a storage error and is
    /// not retried; a missing table and a failed read look the same.
    pub async fn read(&self, uri: &str) -> Result<Option<RecordBatch>> {
        let uri = TableUri::parse(uri)?;
        match self.store.read(&uri).await {
            Ok(batch) => {
                debug!(%uri, rows = batch.num_rows(), "Table read");
                Ok(Some(batch))
            }
            Err(e) => {
                warn!(%uri, "Table read failed: {}", e);
                Ok(None)
            }
        }
    }

    /// Append rows. Zero rows is an error.
    #[instrument(skip(self, batch), fields(rows = batch.num_rows()))]
    pub async fn insert(&self, uri: &str, batch: &RecordBatch) -> Result<()> {
        let uri = &TableUri::parse(uri)?;
        if batch.is_empty() {
            return Err(Error::empty_input("insert"));
        }
        self.policy
            .run("insert", move || self.store.append(uri, batch))
            .await
    }

    /// Update-only merge keyed on `id_column`.
    ///
    /// Source rows whose id matches no target row are dropped and listed in
    /// [`MergeMetrics::unmatched_keys`].
    #[instrument(skip(self, batch), fields(rows = batch.num_rows()))]
    pub async fn merge_update(
        &self,
        uri: &str,
        batch: &RecordBatch,
        id_column: &str,
    ) -> Result<MergeMetrics> {
        let uri = &TableUri::parse(uri)?;
        if batch.is_empty() {
            return Err(Error::empty_input("merge_update"));
        }
        self.policy
            .run("merge_update", move || {
                self.store.merge_update(uri, batch, id_column)
            })
            .await
    }

    /// Overwrite the patch's columns on the rows it identifies.
    pub async fn patch_rows_by_id(
        &self,
        uri: &str,
        patch: &RecordBatch,
        id_column: &str,
    ) -> Result<MergeMetrics> {
        self.merge_update(uri, patch, id_column).await
    }

    /// Soft delete: set `deleted = true` on the identified rows.
    pub async fn mark_deleted_by_id(
        &self,
        uri: &str,
        id_column: &str,
        ids: &[String],
    ) -> Result<MergeMetrics> {
        let patch = RecordBatch::from_columns(vec![
            (
                Field::new(id_column, DataType::Utf8),
                ids.iter().map(|id| Value::from(id.as_str())).collect(),
            ),
            (
                Field::new("deleted", DataType::Boolean),
                vec![Value::Boolean(true); ids.len()],
            ),
        ])?;
        self.merge_update(uri, &patch, id_column).await
    }

    /// Physically remove rows whose `id_column` is one of `ids`.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn delete_rows_by_id(
        &self,
        uri: &str,
        id_column: &str,
        ids: &[String],
    ) -> Result<usize> {
        let uri = &TableUri::parse(uri)?;
        let keys: &[Value] = &ids.iter().map(|id| Value::from(id.as_str())).collect::<Vec<_>>();
        self.policy
            .run("delete", move || self.store.delete_where(uri, id_column, keys))
            .await
    }

    /// Compact a table, then vacuum versions older than the retention window.
    #[instrument(skip(self))]
    pub async fn compact_and_retain(
        &self,
        uri: &str,
        options: &MaintenanceOptions,
    ) -> Result<MaintenanceReport> {
        let uri = &TableUri::parse(uri)?;
        let cluster = options.z_order_columns.as_deref();

        self.policy
            .run("compact", move || async move {
                let compaction = self.store.compact(uri, cluster).await?;
                let vacuum = self
                    .store
                    .vacuum(uri, options.retention_hours, options.dry_run)
                    .await?;
                info!(
                    %uri,
                    rows_rewritten = compaction.rows_rewritten,
                    rows_reclaimable = vacuum.rows_reclaimable,
                    rows_removed = vacuum.rows_removed,
                    dry_run = vacuum.dry_run,
                    "Table maintenance complete"
                );
                Ok(MaintenanceReport { compaction, vacuum })
            })
            .await
    }

    /// Commit log of a table.
    pub async fn history(&self, uri: &str) -> Result<Vec<CommitInfo>> {
        let uri = &TableUri::parse(uri)?;
        self.policy
            .run("history", move || self.store.history(uri))
            .await
    }
}
