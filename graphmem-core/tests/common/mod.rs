//! Common test utilities and helpers

#![allow(dead_code)]

use graphmem_core::{EdgeBatch, NodeBatch, RetryingTableClient, SqliteTableStore, Value};
use std::sync::Arc;

/// Client over a fresh SQLite table store with the default retry policy
pub fn sqlite_client() -> RetryingTableClient {
    RetryingTableClient::new(Arc::new(SqliteTableStore::new()))
}

/// Node batch with `n` rows and no custom attributes
pub fn node_batch(n: usize) -> NodeBatch {
    NodeBatch::new()
        .with_labels((0..n).map(|i| format!("node-{}", i)).collect())
        .with_weights((0..n).map(|i| i as f64).collect())
        .with_descriptions(vec!["generated".to_string(); n])
        .with_keywords(vec![vec!["test".to_string()]; n])
        .with_embeddings(vec![vec![0.25, 0.5, 0.75]; n])
}

/// Node batch with an `impact: int64` attribute set to 100 for every row
pub fn impact_node_batch(n: usize) -> NodeBatch {
    node_batch(n).with_attribute("impact", vec![Value::Int64(100); n])
}

/// Edge batch chaining the given node ids: ids[i] -> ids[i + 1]
pub fn chain_edges(node_ids: &[String]) -> EdgeBatch {
    let n = node_ids.len().saturating_sub(1);
    EdgeBatch::new()
        .with_endpoints(node_ids[..n].to_vec(), node_ids[1..].to_vec())
        .with_labels(vec!["next".to_string(); n])
        .with_weights(vec![1.0; n])
        .with_descriptions(vec![String::new(); n])
        .with_keywords(vec![Vec::new(); n])
        .with_embeddings(vec![Vec::new(); n])
}

/// Values of a column as strings
pub fn strings(batch: &graphmem_core::RecordBatch, column: &str) -> Vec<String> {
    batch
        .column(column)
        .unwrap_or_default()
        .into_iter()
        .map(|v| v.to_string())
        .collect()
}
