//! Memory index add/remove semantics.

mod common;

use common::sqlite_client;
use graphmem_core::{Memory, MemoryIndex, MetadataUpdate, NewMemory};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

#[tokio::test]
async fn test_add_then_remove_is_net_zero() {
    let temp = TempDir::new().unwrap();
    let index = MemoryIndex::create(sqlite_client(), temp.path().join("index"))
        .await
        .unwrap();
    let keep = Memory::create(sqlite_client(), temp.path().join("keep"), NewMemory::new("Keep"))
        .await
        .unwrap();
    let drop = Memory::create(sqlite_client(), temp.path().join("drop"), NewMemory::new("Drop"))
        .await
        .unwrap();

    index.add(&keep).await.unwrap();
    let before = index.entries().await;

    index.add(&drop).await.unwrap();
    assert_eq!(index.len().await, 2);
    assert_eq!(index.remove(&drop).await.unwrap(), 1);

    assert_eq!(index.entries().await, before);
}

#[tokio::test]
async fn test_remove_after_title_change() {
    let temp = TempDir::new().unwrap();
    let index = MemoryIndex::create(sqlite_client(), temp.path().join("index"))
        .await
        .unwrap();
    let memory = Memory::create(sqlite_client(), temp.path().join("m"), NewMemory::new("Draft"))
        .await
        .unwrap();
    index.add(&memory).await.unwrap();

    memory
        .update_metadata(MetadataUpdate::new().with_title("Published"))
        .await
        .unwrap();

    assert_eq!(index.remove(&memory).await.unwrap(), 1);
    assert!(index.is_empty().await);
}

#[tokio::test]
async fn test_reopened_index_sees_entries() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("index");
    let index = MemoryIndex::create(sqlite_client(), &path).await.unwrap();
    let memory = Memory::create(sqlite_client(), temp.path().join("m"), NewMemory::new("Kept"))
        .await
        .unwrap();
    index.add(&memory).await.unwrap();

    let reopened = MemoryIndex::open(sqlite_client(), &path).await.unwrap();
    let live = reopened.live_entries().await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].title, "Kept");
    assert_eq!(live[0].id, memory.id());
}
