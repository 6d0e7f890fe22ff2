//! Graph memories stored as node, edge and metadata tables.
//!
//! A [`Memory`] owns three tables under its storage path:
//!
//! - **metadata**: a single row describing the memory
//! - **nodes**: base node columns plus custom attributes
//! - **edges**: base edge columns plus custom attributes
//!
//! Rows are never physically removed by memory operations. Deleting a node
//! or edge sets its `deleted` flag, and soft-deleting a memory flips
//! `is_deleted` in its metadata, after which it can no longer be loaded.
//!
//! ## Example
//!
//! ```rust,ignore
//! use graphmem_core::{Memory, NewMemory, NodeBatch, AttributePatch, DataType, Value};
//!
//! let memory = Memory::create(
//!     client,
//!     "/data/papers",
//!     NewMemory::new("Papers").with_node_attribute("impact", DataType::Int64),
//! )
//! .await?;
//!
//! let ids = memory
//!     .add_nodes(
//!         NodeBatch::new()
//!             .with_labels(vec!["attention".into()])
//!             .with_weights(vec![1.0])
//!             .with_descriptions(vec!["".into()])
//!             .with_keywords(vec![vec![]])
//!             .with_embeddings(vec![vec![0.1, 0.2]])
//!             .with_attribute("impact", vec![Value::Int64(10)]),
//!     )
//!     .await?;
//!
//! memory
//!     .update_nodes(&ids, AttributePatch::new().set("impact", vec![Value::Int64(11)]))
//!     .await?;
//! ```

mod store;
mod types;

pub use store::{Memory, OptimizeReport, EDGES_TABLE, METADATA_TABLE, NODES_TABLE};
pub use types::{
    AttributePatch, EdgeBatch, MemoryMetadata, MetadataUpdate, NewMemory, NodeBatch, PatchOutcome,
};
