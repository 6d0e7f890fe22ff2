//! Node and edge batches, patches and soft deletes.

mod common;

use common::{chain_edges, impact_node_batch, node_batch, sqlite_client, strings};
use graphmem_core::{AttributePatch, DataType, Error, Memory, NewMemory, Value};
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use tempfile::TempDir;

async fn impact_memory(temp: &TempDir) -> Memory {
    Memory::create(
        sqlite_client(),
        temp.path(),
        NewMemory::new("Impact graph").with_node_attribute("impact", DataType::Int64),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_add_nodes_returns_unique_ids_in_order() {
    let temp = TempDir::new().unwrap();
    let memory = impact_memory(&temp).await;

    let ids = memory.add_nodes(impact_node_batch(25)).await.unwrap();
    assert_eq!(ids.len(), 25);
    assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 25);

    let nodes = memory.get_nodes().await;
    assert_eq!(nodes.num_rows(), 25);
    assert_eq!(strings(&nodes, "node_id"), ids);
    assert!(strings(&nodes, "memory_id").iter().all(|m| m == memory.id()));
    assert_eq!(nodes.value(3, "label"), Some(&Value::from("node-3")));
}

#[tokio::test]
async fn test_missing_attribute_inserts_nothing() {
    let temp = TempDir::new().unwrap();
    let memory = impact_memory(&temp).await;

    let err = memory.add_nodes(node_batch(5)).await.unwrap_err();
    match err {
        Error::SchemaMismatch { expected, .. } => assert!(expected.contains(&"impact".to_string())),
        other => panic!("unexpected error: {other}"),
    }

    memory.refresh().await.unwrap();
    assert_eq!(memory.raw_nodes().await.num_rows(), 0);
}

#[tokio::test]
async fn test_ragged_batch_is_length_mismatch() {
    let temp = TempDir::new().unwrap();
    let memory = impact_memory(&temp).await;

    let batch = node_batch(4).with_attribute("impact", vec![Value::Int64(1); 3]);
    let err = memory.add_nodes(batch).await.unwrap_err();
    assert!(matches!(err, Error::LengthMismatch { ref column, .. } if column == "impact"));
}

#[tokio::test]
async fn test_patch_keeps_height() {
    let temp = TempDir::new().unwrap();
    let memory = impact_memory(&temp).await;
    let ids = memory.add_nodes(impact_node_batch(100)).await.unwrap();

    let outcome = memory
        .update_nodes(&ids, AttributePatch::new().set("impact", vec![Value::Int64(1); 100]))
        .await
        .unwrap();
    assert_eq!(outcome.requested, ids);
    assert!(outcome.unmatched.is_empty());

    let nodes = memory.get_nodes().await;
    assert_eq!(nodes.num_rows(), 100);
    assert!(nodes
        .column("impact")
        .unwrap()
        .iter()
        .all(|v| **v == Value::Int64(1)));
    assert_eq!(memory.raw_nodes().await.num_rows(), 100);

    // Another instance sees the same table
    let loaded = Memory::load(sqlite_client(), temp.path()).await.unwrap();
    assert_eq!(loaded.get_nodes().await, nodes);
}

#[tokio::test]
async fn test_deleted_nodes_are_hidden() {
    let temp = TempDir::new().unwrap();
    let memory = impact_memory(&temp).await;
    let ids = memory.add_nodes(impact_node_batch(6)).await.unwrap();

    let doomed = ids[..2].to_vec();
    memory.delete_nodes(&doomed).await.unwrap();

    let live = memory.get_nodes().await;
    assert_eq!(live.num_rows(), 4);
    assert!(strings(&live, "node_id").iter().all(|id| !doomed.contains(id)));
    assert!(memory.get_nodes_by_id(&doomed).await.is_empty());
    assert_eq!(memory.get_nodes_by_id(&ids).await.num_rows(), 4);
    assert_eq!(memory.raw_nodes().await.num_rows(), 6);
}

#[tokio::test]
async fn test_deleted_edges_are_hidden() {
    let temp = TempDir::new().unwrap();
    let memory = Memory::create(sqlite_client(), temp.path(), NewMemory::new("Edges"))
        .await
        .unwrap();
    let nodes = memory.add_nodes(node_batch(11)).await.unwrap();
    let edges = memory.add_edges(chain_edges(&nodes)).await.unwrap();
    assert_eq!(edges.len(), 10);

    let outcome = memory.delete_edges(&edges).await.unwrap();
    assert!(outcome.unmatched.is_empty());

    assert!(memory.get_edges().await.is_empty());
    assert!(memory.get_edges_by_id(&edges).await.is_empty());
    assert_eq!(memory.raw_edges().await.num_rows(), 10);
}

#[tokio::test]
async fn test_edges_accept_unknown_endpoints() {
    let temp = TempDir::new().unwrap();
    let memory = Memory::create(sqlite_client(), temp.path(), NewMemory::new("Loose"))
        .await
        .unwrap();

    let ids = memory
        .add_edges(chain_edges(&["nowhere".to_string(), "elsewhere".to_string()]))
        .await
        .unwrap();

    let edge = memory.get_edges_by_id(&ids).await;
    assert_eq!(strings(&edge, "source_node_id"), vec!["nowhere"]);
    assert_eq!(strings(&edge, "target_node_id"), vec!["elsewhere"]);
}

#[tokio::test]
async fn test_edge_endpoints_are_immutable() {
    let temp = TempDir::new().unwrap();
    let memory = Memory::create(sqlite_client(), temp.path(), NewMemory::new("Fixed"))
        .await
        .unwrap();
    let nodes = memory.add_nodes(node_batch(2)).await.unwrap();
    let edges = memory.add_edges(chain_edges(&nodes)).await.unwrap();

    let err = memory
        .update_edges(
            &edges,
            AttributePatch::new().set("target_node_id", vec!["other".into()]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ImmutableColumn(ref c) if c == "target_node_id"));

    memory
        .update_edges(&edges, AttributePatch::new().set("label", vec!["follows".into()]))
        .await
        .unwrap();
    assert_eq!(strings(&memory.get_edges().await, "label"), vec!["follows"]);
}

#[tokio::test]
async fn test_concurrent_batches_all_land_in_snapshot() {
    let temp = TempDir::new().unwrap();
    let memory = impact_memory(&temp).await;

    let (first, second, third) = futures::join!(
        memory.add_nodes(impact_node_batch(5)),
        memory.add_nodes(impact_node_batch(7)),
        memory.add_nodes(impact_node_batch(3)),
    );
    let mut ids = first.unwrap();
    ids.extend(second.unwrap());
    ids.extend(third.unwrap());
    assert_eq!(ids.len(), 15);

    let cached: HashSet<String> = strings(&memory.get_nodes().await, "node_id").into_iter().collect();
    assert_eq!(cached, ids.iter().cloned().collect::<HashSet<_>>());
    assert!(!memory.is_stale().await);

    let loaded = Memory::load(sqlite_client(), temp.path()).await.unwrap();
    assert_eq!(loaded.get_nodes().await.num_rows(), 15);
}

#[tokio::test]
async fn test_non_finite_weight_is_rejected() {
    let temp = TempDir::new().unwrap();
    let memory = impact_memory(&temp).await;
    let ids = memory.add_nodes(impact_node_batch(2)).await.unwrap();

    let err = memory
        .update_nodes(
            &ids,
            AttributePatch::new().set("weight", vec![Value::Float64(f64::NAN), Value::Float64(1.0)]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SchemaMismatch { .. }));

    let loaded = Memory::load(sqlite_client(), temp.path()).await.unwrap();
    assert_eq!(loaded.get_nodes().await, memory.get_nodes().await);
}
