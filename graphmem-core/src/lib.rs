//! # graphmem-core
//!
//! Persistent graph memories on top of versioned tables.
//!
//! ## Core Components
//!
//! - **Table**: the [`TableStore`] boundary and its SQLite implementation
//! - **Client**: retrying table access with path validation
//! - **Schema**: base node/edge/metadata layouts and custom attributes
//! - **Memory**: one graph of nodes and edges with its metadata
//! - **Index**: a registry table of memory metadata
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use graphmem_core::{Memory, MemoryIndex, NewMemory, RetryingTableClient, SqliteTableStore};
//!
//! let client = RetryingTableClient::new(Arc::new(SqliteTableStore::new()));
//! let memory = Memory::create(client.clone(), "/data/notes", NewMemory::new("Notes")).await?;
//!
//! let index = MemoryIndex::create(client, "/data/index").await?;
//! index.add(&memory).await?;
//! ```

pub mod client;
pub mod error;
pub mod index;
pub mod memory;
pub mod retry;
pub mod schema;
pub mod table;

// Re-exports for convenience
pub use client::{MaintenanceOptions, MaintenanceReport, RetryingTableClient};
pub use error::{Error, Result};
pub use index::MemoryIndex;
pub use memory::{
    AttributePatch, EdgeBatch, Memory, MemoryMetadata, MetadataUpdate, NewMemory, NodeBatch,
    OptimizeReport, PatchOutcome,
};
pub use retry::RetryPolicy;
pub use schema::GraphSchema;
pub use table::{
    CommitInfo, CompactionMetrics, DataType, Field, MergeMetrics, RecordBatch, SqliteStoreConfig,
    SqliteTableStore, TableSchema, TableStore, TableUri, Value, VacuumMetrics, WriteMode,
};
