//! Registry of memories.
//!
//! The index is a standalone table with the metadata schema. Adding a
//! memory copies its stored metadata row in; removing it deletes every
//! index row carrying that memory's id.

use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::client::RetryingTableClient;
use crate::error::{Error, Result};
use crate::memory::{Memory, MemoryMetadata};
use crate::schema::metadata_schema;
use crate::table::{RecordBatch, TableUri, WriteMode};

/// Table of memory metadata records.
#[derive(Debug)]
pub struct MemoryIndex {
    client: RetryingTableClient,
    uri: String,
    entries: RwLock<Arc<RecordBatch>>,
}

impl MemoryIndex {
    /// Create an empty index at `path`. An existing index is kept.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn create(client: RetryingTableClient, path: impl AsRef<Path>) -> Result<Self> {
        let uri = TableUri::from_path(path.as_ref())?.to_string();
        client
            .create(&uri, &RecordBatch::empty(metadata_schema()), WriteMode::Ignore)
            .await?;

        let index = Self {
            client,
            uri,
            entries: RwLock::new(Arc::new(RecordBatch::empty(metadata_schema()))),
        };
        index.refresh().await?;
        info!(uri = %index.uri, "Memory index created");
        Ok(index)
    }

    /// Open an existing index.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(client: RetryingTableClient, path: impl AsRef<Path>) -> Result<Self> {
        let uri = TableUri::from_path(path.as_ref())?.to_string();
        let batch = client
            .read(&uri)
            .await?
            .ok_or_else(|| Error::NotFound(uri.clone()))?;
        metadata_schema().validate_batch(&batch)?;

        Ok(Self {
            client,
            uri,
            entries: RwLock::new(Arc::new(batch)),
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Append the memory's stored metadata to the index.
    #[instrument(skip_all, fields(memory_id = %memory.id()))]
    pub async fn add(&self, memory: &Memory) -> Result<()> {
        let metadata = self.stored_metadata(memory).await?;
        self.client.insert(&self.uri, &metadata).await?;
        self.refresh().await?;
        info!("Memory added to index");
        Ok(())
    }

    /// Remove every index entry with the memory's id. Returns the number of
    /// rows removed.
    #[instrument(skip_all, fields(memory_id = %memory.id()))]
    pub async fn remove(&self, memory: &Memory) -> Result<usize> {
        let metadata = self.stored_metadata(memory).await?;
        let ids: Vec<String> = MemoryMetadata::from_batch(&metadata)?
            .into_iter()
            .map(|m| m.id)
            .collect();

        let removed = self.client.delete_rows_by_id(&self.uri, "id", &ids).await?;
        self.refresh().await?;
        info!(removed, "Memory removed from index");
        Ok(removed)
    }

    /// Current metadata table of a memory, as stored.
    async fn stored_metadata(&self, memory: &Memory) -> Result<RecordBatch> {
        self.client
            .read(memory.metadata_uri())
            .await?
            .filter(|batch| !batch.is_empty())
            .ok_or_else(|| Error::NotFound(memory.storage_path().display().to_string()))
    }

    /// Re-read the index table.
    pub async fn refresh(&self) -> Result<()> {
        let mut entries = self.entries.write().await;
        match self.client.read(&self.uri).await? {
            Some(batch) => {
                debug!(uri = %self.uri, rows = batch.num_rows(), "Index refreshed");
                *entries = Arc::new(batch);
            }
            None => warn!(uri = %self.uri, "Index refresh skipped, keeping previous snapshot"),
        }
        Ok(())
    }

    /// Cached index table.
    pub async fn entries(&self) -> Arc<RecordBatch> {
        self.entries.read().await.clone()
    }

    /// Indexed memories that are not soft-deleted.
    pub async fn live_entries(&self) -> Result<Vec<MemoryMetadata>> {
        let entries = self.entries().await;
        Ok(MemoryMetadata::from_batch(&*entries)?
            .into_iter()
            .filter(|m| !m.is_deleted)
            .collect())
    }

    /// Most recently added entry for a memory id.
    pub async fn get(&self, id: &str) -> Result<Option<MemoryMetadata>> {
        let entries = self.entries().await;
        Ok(MemoryMetadata::from_batch(&*entries)?
            .into_iter()
            .rev()
            .find(|m| m.id == id))
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.num_rows()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
