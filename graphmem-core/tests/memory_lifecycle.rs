//! Memory create/load/update/soft-delete against the SQLite table store.

mod common;

use common::sqlite_client;
use graphmem_core::{DataType, Error, Memory, MetadataUpdate, NewMemory};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

#[tokio::test]
async fn test_create_then_load_roundtrip() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("papers");

    let created = Memory::create(
        sqlite_client(),
        &path,
        NewMemory::new("Papers")
            .with_description("Things to read")
            .with_keywords(vec!["ml".into(), "graphs".into()])
            .with_embedding(vec![0.1, 0.2, 0.3])
            .with_node_attribute("impact", DataType::Int64)
            .with_edge_attribute("kind", DataType::Utf8),
    )
    .await
    .unwrap();

    let loaded = Memory::load(sqlite_client(), &path).await.unwrap();
    let meta = loaded.metadata().await;

    assert_eq!(loaded.id(), created.id());
    assert_eq!(meta.title, "Papers");
    assert_eq!(meta.description, "Things to read");
    assert_eq!(meta.keywords, vec!["ml", "graphs"]);
    assert_eq!(meta.embedding, vec![0.1, 0.2, 0.3]);
    assert_eq!(meta.storage_path, path.display().to_string());
    assert_eq!(meta.node_attribute_names, vec!["impact"]);
    assert_eq!(meta.edge_attribute_names, vec!["kind"]);
    assert_eq!(loaded.schema(), created.schema());
}

#[tokio::test]
async fn test_soft_delete_blocks_load() {
    let temp = TempDir::new().unwrap();
    let memory = Memory::create(sqlite_client(), temp.path(), NewMemory::new("Scratch"))
        .await
        .unwrap();

    memory.soft_delete().await.unwrap();
    assert!(memory.is_deleted().await);

    let err = Memory::load(sqlite_client(), temp.path()).await.unwrap_err();
    assert!(matches!(err, Error::Deleted(ref id) if id == memory.id()));
}

#[tokio::test]
async fn test_second_soft_delete_writes_nothing() {
    let temp = TempDir::new().unwrap();
    let memory = Memory::create(sqlite_client(), temp.path(), NewMemory::new("Scratch"))
        .await
        .unwrap();

    memory.soft_delete().await.unwrap();
    let versions = sqlite_client()
        .history(memory.metadata_uri())
        .await
        .unwrap()
        .len();

    memory.soft_delete().await.unwrap();
    let after = sqlite_client()
        .history(memory.metadata_uri())
        .await
        .unwrap()
        .len();
    assert_eq!(after, versions);
}

#[tokio::test]
async fn test_update_metadata_only_touches_supplied_fields() {
    let temp = TempDir::new().unwrap();
    let memory = Memory::create(
        sqlite_client(),
        temp.path(),
        NewMemory::new("Before")
            .with_description("unchanged")
            .with_keywords(vec!["keep".into()]),
    )
    .await
    .unwrap();

    memory
        .update_metadata(
            MetadataUpdate::new()
                .with_title("After")
                .with_embedding(vec![1.0, 2.0]),
        )
        .await
        .unwrap();

    let meta = Memory::load(sqlite_client(), temp.path())
        .await
        .unwrap()
        .metadata()
        .await;
    assert_eq!(meta.title, "After");
    assert_eq!(meta.description, "unchanged");
    assert_eq!(meta.keywords, vec!["keep"]);
    assert_eq!(meta.embedding, vec![1.0, 2.0]);
    assert!(!meta.is_deleted);
}

#[tokio::test]
async fn test_concurrent_metadata_updates_all_persist() {
    let temp = TempDir::new().unwrap();
    let memory = Memory::create(sqlite_client(), temp.path(), NewMemory::new("Start"))
        .await
        .unwrap();

    let (title, description, keywords) = futures::join!(
        memory.update_metadata(MetadataUpdate::new().with_title("Renamed")),
        memory.update_metadata(MetadataUpdate::new().with_description("Described")),
        memory.update_metadata(MetadataUpdate::new().with_keywords(vec!["tagged".into()])),
    );
    title.unwrap();
    description.unwrap();
    keywords.unwrap();

    let cached = memory.metadata().await;
    let stored = Memory::load(sqlite_client(), temp.path())
        .await
        .unwrap()
        .metadata()
        .await;
    assert_eq!(stored, cached);
    assert_eq!(stored.title, "Renamed");
    assert_eq!(stored.description, "Described");
    assert_eq!(stored.keywords, vec!["tagged"]);
}

#[tokio::test]
async fn test_soft_delete_wins_over_concurrent_update() {
    for delete_first in [true, false] {
        let temp = TempDir::new().unwrap();
        let memory = Memory::create(sqlite_client(), temp.path(), NewMemory::new("Racing"))
            .await
            .unwrap();

        let update = memory.update_metadata(MetadataUpdate::new().with_title("Late"));
        let (deleted, updated) = if delete_first {
            futures::join!(memory.soft_delete(), update)
        } else {
            let (updated, deleted) = futures::join!(update, memory.soft_delete());
            (deleted, updated)
        };
        deleted.unwrap();
        match updated {
            Ok(meta) => assert!(!meta.is_deleted),
            Err(Error::Deleted(id)) => assert_eq!(id, memory.id()),
            Err(other) => panic!("unexpected error: {other}"),
        }

        assert!(memory.is_deleted().await);
        let err = Memory::load(sqlite_client(), temp.path()).await.unwrap_err();
        assert!(matches!(err, Error::Deleted(_)));
    }
}

#[tokio::test]
async fn test_create_with_non_finite_embedding_writes_nothing() {
    let temp = TempDir::new().unwrap();
    let err = Memory::create(
        sqlite_client(),
        temp.path(),
        NewMemory::new("Broken").with_embedding(vec![0.5, f32::NAN]),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::SchemaMismatch { .. }));

    let err = Memory::load(sqlite_client(), temp.path()).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}
