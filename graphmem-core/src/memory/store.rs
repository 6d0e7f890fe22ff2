//! Memory instances backed by three tables.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::types::*;
use crate::client::{MaintenanceOptions, MaintenanceReport, RetryingTableClient};
use crate::error::{Error, Result};
use crate::schema::{
    GraphSchema, DELETED, EDGE_ID, EDGE_IDENTITY_COLUMNS, NODE_ID, NODE_IDENTITY_COLUMNS,
};
use crate::table::{RecordBatch, TableSchema, TableUri, Value, WriteMode};

/// Table names under a memory's storage path.
pub const METADATA_TABLE: &str = "metadata";
pub const NODES_TABLE: &str = "nodes";
pub const EDGES_TABLE: &str = "edges";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Nodes,
    Edges,
}

impl Kind {
    fn id_column(self) -> &'static str {
        match self {
            Kind::Nodes => NODE_ID,
            Kind::Edges => EDGE_ID,
        }
    }

    fn identity_columns(self) -> &'static [&'static str] {
        match self {
            Kind::Nodes => NODE_IDENTITY_COLUMNS,
            Kind::Edges => EDGE_IDENTITY_COLUMNS,
        }
    }

    fn table_name(self) -> &'static str {
        match self {
            Kind::Nodes => NODES_TABLE,
            Kind::Edges => EDGES_TABLE,
        }
    }
}

/// Cached snapshots, replaced wholesale after each write.
#[derive(Debug)]
struct Snapshot {
    metadata: MemoryMetadata,
    nodes: Arc<RecordBatch>,
    edges: Arc<RecordBatch>,
    nodes_stale: bool,
    edges_stale: bool,
}

impl Snapshot {
    fn new(metadata: MemoryMetadata, nodes: RecordBatch, edges: RecordBatch) -> Self {
        Self {
            metadata,
            nodes: Arc::new(nodes),
            edges: Arc::new(edges),
            nodes_stale: false,
            edges_stale: false,
        }
    }

    fn stale_mut(&mut self, kind: Kind) -> &mut bool {
        match kind {
            Kind::Nodes => &mut self.nodes_stale,
            Kind::Edges => &mut self.edges_stale,
        }
    }
}

/// Results of [`Memory::optimize`].
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OptimizeReport {
    pub nodes: MaintenanceReport,
    pub edges: MaintenanceReport,
}

/// A graph-shaped memory: metadata plus node and edge tables.
///
/// The tables are the source of truth. Each instance keeps a snapshot of
/// both tables that is re-read after every write it performs; writes made
/// by other instances become visible after [`Memory::refresh`].
///
/// A node or edge write whose follow-up read fails still returns `Ok`,
/// since the write has committed. The snapshot is then marked stale until
/// the next successful re-read; see [`Memory::is_stale`].
#[derive(Debug)]
pub struct Memory {
    client: RetryingTableClient,
    id: String,
    storage_path: PathBuf,
    metadata_uri: String,
    nodes_uri: String,
    edges_uri: String,
    schema: GraphSchema,
    state: RwLock<Snapshot>,
    /// Serializes metadata read-modify-write cycles.
    metadata_writer: Mutex<()>,
}

fn table_uris(storage_path: &Path) -> Result<(String, String, String)> {
    let root = TableUri::from_path(storage_path)?;
    Ok((
        root.join(METADATA_TABLE).to_string(),
        root.join(NODES_TABLE).to_string(),
        root.join(EDGES_TABLE).to_string(),
    ))
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|_| Error::InvalidPath(path.display().to_string()))
}

impl Memory {
    /// Create a new memory rooted at `path`.
    ///
    /// Fails with [`Error::AlreadyExists`] if a memory is already stored
    /// there. Custom attribute declarations are checked before anything is
    /// written.
    #[instrument(skip_all, fields(path = %path.as_ref().display(), title = %new.title))]
    pub async fn create(
        client: RetryingTableClient,
        path: impl AsRef<Path>,
        new: NewMemory,
    ) -> Result<Self> {
        let storage_path = absolute(path.as_ref())?;
        let (metadata_uri, nodes_uri, edges_uri) = table_uris(&storage_path)?;
        let schema = GraphSchema::new(&new.node_attributes, &new.edge_attributes)?;

        if let Some(existing) = client.read(&metadata_uri).await? {
            if !existing.is_empty() {
                return Err(Error::AlreadyExists(storage_path.display().to_string()));
            }
        }

        let metadata = MemoryMetadata {
            id: Uuid::new_v4().to_string(),
            title: new.title,
            description: new.description,
            keywords: new.keywords,
            embedding: new.embedding,
            is_deleted: false,
            storage_path: storage_path.display().to_string(),
            node_attribute_names: schema.node_attribute_names(),
            edge_attribute_names: schema.edge_attribute_names(),
        };

        let metadata_batch = metadata.to_batch()?;
        let nodes = RecordBatch::empty(schema.nodes().clone());
        let edges = RecordBatch::empty(schema.edges().clone());
        futures::try_join!(
            client.create(&nodes_uri, &nodes, WriteMode::Ignore),
            client.create(&edges_uri, &edges, WriteMode::Ignore),
        )?;
        // Metadata last: its presence marks the memory as complete
        client
            .create(&metadata_uri, &metadata_batch, WriteMode::Ignore)
            .await?;

        info!(memory_id = %metadata.id, "Memory created");

        Ok(Self {
            client,
            id: metadata.id.clone(),
            storage_path,
            metadata_uri,
            nodes_uri,
            edges_uri,
            schema,
            state: RwLock::new(Snapshot::new(metadata, nodes, edges)),
            metadata_writer: Mutex::new(()),
        })
    }

    /// Load an existing memory from `path`.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn load(client: RetryingTableClient, path: impl AsRef<Path>) -> Result<Self> {
        let storage_path = absolute(path.as_ref())?;
        let (metadata_uri, nodes_uri, edges_uri) = table_uris(&storage_path)?;
        let not_found = || Error::NotFound(storage_path.display().to_string());

        let batch = client.read(&metadata_uri).await?.ok_or_else(not_found)?;
        let metadata = MemoryMetadata::from_batch(&batch)?
            .into_iter()
            .next()
            .ok_or_else(not_found)?;
        if metadata.is_deleted {
            return Err(Error::Deleted(metadata.id));
        }

        let (nodes, edges) = futures::join!(client.read(&nodes_uri), client.read(&edges_uri));
        let nodes = nodes?.ok_or_else(not_found)?;
        let edges = edges?.ok_or_else(not_found)?;

        let schema = GraphSchema::from_tables(
            nodes.schema().clone(),
            edges.schema().clone(),
            &metadata.node_attribute_names,
            &metadata.edge_attribute_names,
        )?;

        info!(
            memory_id = %metadata.id,
            nodes = nodes.num_rows(),
            edges = edges.num_rows(),
            "Memory loaded"
        );

        Ok(Self {
            client,
            id: metadata.id.clone(),
            storage_path,
            metadata_uri,
            nodes_uri,
            edges_uri,
            schema,
            state: RwLock::new(Snapshot::new(metadata, nodes, edges)),
            metadata_writer: Mutex::new(()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    pub fn metadata_uri(&self) -> &str {
        &self.metadata_uri
    }

    pub fn nodes_uri(&self) -> &str {
        &self.nodes_uri
    }

    pub fn edges_uri(&self) -> &str {
        &self.edges_uri
    }

    pub fn schema(&self) -> &GraphSchema {
        &self.schema
    }

    /// Cached metadata record.
    pub async fn metadata(&self) -> MemoryMetadata {
        self.state.read().await.metadata.clone()
    }

    pub async fn is_deleted(&self) -> bool {
        self.state.read().await.metadata.is_deleted
    }

    async fn ensure_active(&self) -> Result<()> {
        if self.is_deleted().await {
            return Err(Error::Deleted(self.id.clone()));
        }
        Ok(())
    }

    /// Overwrite the supplied metadata fields.
    ///
    /// Concurrent updates on one instance are applied one after another, so
    /// fields set by each of them all persist.
    #[instrument(skip(self, update), fields(memory_id = %self.id))]
    pub async fn update_metadata(&self, update: MetadataUpdate) -> Result<MemoryMetadata> {
        let _writer = self.metadata_writer.lock().await;

        let mut metadata = self.metadata().await;
        if metadata.is_deleted {
            return Err(Error::Deleted(self.id.clone()));
        }
        update.apply(&mut metadata);
        self.write_metadata(metadata).await
    }

    /// Mark the memory deleted. It can no longer be loaded or mutated.
    /// Calling this on an already deleted instance does nothing.
    #[instrument(skip(self), fields(memory_id = %self.id))]
    pub async fn soft_delete(&self) -> Result<()> {
        let _writer = self.metadata_writer.lock().await;

        let mut metadata = self.metadata().await;
        if metadata.is_deleted {
            debug!("Memory already soft-deleted");
            return Ok(());
        }

        metadata.is_deleted = true;
        self.write_metadata(metadata).await?;
        info!("Memory soft-deleted");
        Ok(())
    }

    /// Persist and cache a full metadata record. Callers hold `metadata_writer`.
    async fn write_metadata(&self, metadata: MemoryMetadata) -> Result<MemoryMetadata> {
        self.client
            .create(&self.metadata_uri, &metadata.to_batch()?, WriteMode::Overwrite)
            .await?;

        let mut state = self.state.write().await;
        state.metadata = metadata.clone();
        Ok(metadata)
    }

    // ==================== Nodes ====================

    /// Insert nodes, returning their generated ids in input order.
    #[instrument(skip(self, batch), fields(memory_id = %self.id, rows = batch.len()))]
    pub async fn add_nodes(&self, batch: NodeBatch) -> Result<Vec<String>> {
        self.ensure_active().await?;

        let ids = fresh_ids(batch.len());
        let record = batch.into_record_batch(&self.id, &ids, self.schema.nodes())?;
        self.insert(Kind::Nodes, &record).await?;
        Ok(ids)
    }

    /// Live nodes.
    pub async fn get_nodes(&self) -> RecordBatch {
        live(&*self.raw_nodes().await)
    }

    /// Live nodes whose id is in `ids`.
    pub async fn get_nodes_by_id(&self, ids: &[String]) -> RecordBatch {
        by_id(&self.get_nodes().await, NODE_ID, ids)
    }

    /// Overwrite attribute values on the given nodes.
    #[instrument(skip(self, ids, patch), fields(memory_id = %self.id, count = ids.len()))]
    pub async fn update_nodes(&self, ids: &[String], patch: AttributePatch) -> Result<PatchOutcome> {
        self.patch(Kind::Nodes, ids, patch).await
    }

    /// Soft-delete the given nodes.
    #[instrument(skip(self, ids), fields(memory_id = %self.id, count = ids.len()))]
    pub async fn delete_nodes(&self, ids: &[String]) -> Result<PatchOutcome> {
        self.mark_deleted(Kind::Nodes, ids).await
    }

    /// Cached node table, including soft-deleted rows.
    pub async fn raw_nodes(&self) -> Arc<RecordBatch> {
        self.state.read().await.nodes.clone()
    }

    // ==================== Edges ====================

    /// Insert edges, returning their generated ids in input order.
    #[instrument(skip(self, batch), fields(memory_id = %self.id, rows = batch.len()))]
    pub async fn add_edges(&self, batch: EdgeBatch) -> Result<Vec<String>> {
        self.ensure_active().await?;

        let ids = fresh_ids(batch.len());
        let record = batch.into_record_batch(&self.id, &ids, self.schema.edges())?;
        self.insert(Kind::Edges, &record).await?;
        Ok(ids)
    }

    pub async fn get_edges(&self) -> RecordBatch {
        live(&*self.raw_edges().await)
    }

    pub async fn get_edges_by_id(&self, ids: &[String]) -> RecordBatch {
        by_id(&self.get_edges().await, EDGE_ID, ids)
    }

    #[instrument(skip(self, ids, patch), fields(memory_id = %self.id, count = ids.len()))]
    pub async fn update_edges(&self, ids: &[String], patch: AttributePatch) -> Result<PatchOutcome> {
        self.patch(Kind::Edges, ids, patch).await
    }

    #[instrument(skip(self, ids), fields(memory_id = %self.id, count = ids.len()))]
    pub async fn delete_edges(&self, ids: &[String]) -> Result<PatchOutcome> {
        self.mark_deleted(Kind::Edges, ids).await
    }

    pub async fn raw_edges(&self) -> Arc<RecordBatch> {
        self.state.read().await.edges.clone()
    }

    // ==================== Maintenance ====================

    /// Re-read both tables, picking up writes from other instances.
    ///
    /// Fails with [`Error::StaleSnapshot`] naming the first table that could
    /// not be read. The other table is still refreshed.
    pub async fn refresh(&self) -> Result<()> {
        let nodes = self.refresh_table(Kind::Nodes).await?;
        let edges = self.refresh_table(Kind::Edges).await?;
        match (nodes, edges) {
            (true, true) => Ok(()),
            (false, _) => Err(self.stale(Kind::Nodes)),
            (true, false) => Err(self.stale(Kind::Edges)),
        }
    }

    /// Whether the last re-read of either table failed, leaving the
    /// snapshot behind the committed tables.
    pub async fn is_stale(&self) -> bool {
        let state = self.state.read().await;
        state.nodes_stale || state.edges_stale
    }

    /// Compact and vacuum the node and edge tables.
    ///
    /// Nodes are clustered by `node_id` unless `options` names columns.
    #[instrument(skip(self, options), fields(memory_id = %self.id))]
    pub async fn optimize(&self, options: MaintenanceOptions) -> Result<OptimizeReport> {
        self.ensure_active().await?;

        let node_options = match options.z_order_columns {
            Some(_) => options.clone(),
            None => options.clone().with_z_order(vec![NODE_ID.to_string()]),
        };
        let nodes = self
            .client
            .compact_and_retain(&self.nodes_uri, &node_options)
            .await?;
        let edges = self
            .client
            .compact_and_retain(&self.edges_uri, &options)
            .await?;

        self.refresh().await?;
        Ok(OptimizeReport { nodes, edges })
    }

    // ==================== Internals ====================

    fn uri(&self, kind: Kind) -> &str {
        match kind {
            Kind::Nodes => &self.nodes_uri,
            Kind::Edges => &self.edges_uri,
        }
    }

    fn table_schema(&self, kind: Kind) -> &TableSchema {
        match kind {
            Kind::Nodes => self.schema.nodes(),
            Kind::Edges => self.schema.edges(),
        }
    }

    async fn insert(&self, kind: Kind, record: &RecordBatch) -> Result<()> {
        self.client.insert(self.uri(kind), record).await?;
        self.refresh_table(kind).await?;
        Ok(())
    }

    async fn patch(&self, kind: Kind, ids: &[String], patch: AttributePatch) -> Result<PatchOutcome> {
        self.ensure_active().await?;
        if patch.is_empty() {
            return Err(Error::empty_input(format!("update of {:?}", kind).to_lowercase()));
        }

        let record = patch.into_record_batch(
            kind.id_column(),
            ids,
            self.table_schema(kind),
            kind.identity_columns(),
        )?;
        let metrics = self
            .client
            .patch_rows_by_id(self.uri(kind), &record, kind.id_column())
            .await?;
        self.refresh_table(kind).await?;

        let outcome = PatchOutcome::new(ids, metrics.unmatched_keys);
        if !outcome.unmatched.is_empty() {
            warn!(unmatched = ?outcome.unmatched, "Update ignored unknown ids");
        }
        Ok(outcome)
    }

    async fn mark_deleted(&self, kind: Kind, ids: &[String]) -> Result<PatchOutcome> {
        self.ensure_active().await?;

        let metrics = self
            .client
            .mark_deleted_by_id(self.uri(kind), kind.id_column(), ids)
            .await?;
        self.refresh_table(kind).await?;
        Ok(PatchOutcome::new(ids, metrics.unmatched_keys))
    }

    /// Replace one cached table with a fresh read, holding the write guard
    /// for the duration of the read. A failed read keeps the old snapshot,
    /// marks it stale and returns `false`.
    async fn refresh_table(&self, kind: Kind) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(batch) = self.client.read(self.uri(kind)).await? else {
            warn!(memory_id = %self.id, table = ?kind, "Cache refresh failed, snapshot is stale");
            *state.stale_mut(kind) = true;
            return Ok(false);
        };

        debug!(memory_id = %self.id, table = ?kind, rows = batch.num_rows(), "Cache refreshed");
        let batch = Arc::new(batch);
        match kind {
            Kind::Nodes => state.nodes = batch,
            Kind::Edges => state.edges = batch,
        }
        *state.stale_mut(kind) = false;
        Ok(true)
    }

    fn stale(&self, kind: Kind) -> Error {
        Error::StaleSnapshot {
            memory_id: self.id.clone(),
            table: kind.table_name().to_string(),
        }
    }
}

fn fresh_ids(n: usize) -> Vec<String> {
    (0..n).map(|_| Uuid::new_v4().to_string()).collect()
}

fn live(batch: &RecordBatch) -> RecordBatch {
    batch.filter_by(DELETED, |v| v.as_bool() == Some(false))
}

fn by_id(batch: &RecordBatch, id_column: &str, ids: &[String]) -> RecordBatch {
    let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
    batch.filter_by(id_column, |v: &Value| v.as_str().is_some_and(|id| wanted.contains(id)))
}
