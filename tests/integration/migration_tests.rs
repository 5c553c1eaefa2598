use anyhow::Result;
use futures::TryStreamExt;
use tempfile::TempDir;

use docrag::config::StorageConfig;
use docrag::storage::migration::write_legacy_table;
use docrag::storage::schema::LegacyRow;
use docrag::storage::{keys, ChunkId, Layout, Metadata, NewChunk, VectorStore};
use docrag::RagError;

use crate::helpers::test_utils::axis_vector;

const DIM: usize = 4;

fn legacy_rows(ids: &[i64]) -> Vec<LegacyRow> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| LegacyRow {
            id: ChunkId::new(*id),
            content: format!("legacy chunk {}", id),
            metadata: Metadata::new().with(keys::SOURCE, format!("doc-{}.md", id)),
            embedding: axis_vector(DIM, i % DIM),
        })
        .collect()
}

fn manual() -> StorageConfig {
    StorageConfig {
        auto_migrate: false,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_legacy_store_serves_reads_until_migrated() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("legacy.lance");
    write_legacy_table(&path, DIM, &legacy_rows(&[3, 7, 11])).await?;

    let store = VectorStore::open(&path, DIM, &manual()).await?;
    assert_eq!(store.layout(), Layout::Legacy);
    assert_eq!(store.document_count().await?, 3);

    let hits = store.search_similar(&axis_vector(DIM, 1), 1).await?;
    assert_eq!(hits[0].id, ChunkId::new(7));
    assert_eq!(hits[0].content, "legacy chunk 7");

    let docs: Vec<_> = store.all_documents().await?.try_collect().await?;
    assert_eq!(docs.len(), 3);

    let err = store
        .add(vec![NewChunk::new("new", axis_vector(DIM, 0))])
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::ReadOnlyLegacyLayout));

    Ok(())
}

#[tokio::test]
async fn test_migration_preserves_ids_and_is_idempotent() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("legacy.lance");
    write_legacy_table(&path, DIM, &legacy_rows(&[3, 7, 11])).await?;

    let store = VectorStore::open(&path, DIM, &manual()).await?;

    let first = store.migrate().await?;
    assert!(first.found_legacy);
    assert_eq!(first.legacy_rows, 3);
    assert_eq!(first.copied_meta, 3);
    assert_eq!(first.copied_vectors, 3);
    assert_eq!(first.max_legacy_id, Some(ChunkId::new(11)));
    assert!(!first.legacy_dropped);
    assert_eq!(store.layout(), Layout::Current);
    assert_eq!(store.document_count().await?, 3);

    let second = store.migrate().await?;
    assert_eq!(second.copied_meta, 0);
    assert_eq!(second.copied_vectors, 0);
    assert_eq!(store.document_count().await?, 3, "Re-running must not duplicate rows");

    let chunks = store.get(&[ChunkId::new(7)]).await?;
    assert_eq!(chunks[0].content, "legacy chunk 7");
    assert_eq!(chunks[0].metadata.source(), Some("doc-7.md"));

    let hits = store.search_similar(&axis_vector(DIM, 2), 1).await?;
    assert_eq!(hits[0].id, ChunkId::new(11));

    let new_ids = store
        .add(vec![NewChunk::new("fresh", axis_vector(DIM, 3))])
        .await?;
    assert!(new_ids[0] > ChunkId::new(11), "New ids start past the legacy maximum");

    Ok(())
}

#[tokio::test]
async fn test_auto_migration_on_open_and_reopen() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("legacy.lance");
    write_legacy_table(&path, DIM, &legacy_rows(&[1, 2])).await?;

    {
        let store = VectorStore::new(&path, DIM).await?;
        assert_eq!(store.layout(), Layout::Current);
        assert_eq!(store.document_count().await?, 2);
    }

    // The version tag persists; reopening does not copy again
    let store = VectorStore::new(&path, DIM).await?;
    assert_eq!(store.layout(), Layout::Current);
    assert_eq!(store.document_count().await?, 2);

    Ok(())
}

#[tokio::test]
async fn test_drop_legacy_after_verified_migration() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("legacy.lance");
    write_legacy_table(&path, DIM, &legacy_rows(&[5])).await?;

    let options = StorageConfig {
        auto_migrate: false,
        drop_legacy_after_migration: true,
        ..Default::default()
    };
    let store = VectorStore::open(&path, DIM, &options).await?;
    let report = store.migrate().await?;

    assert!(report.legacy_dropped);
    assert_eq!(store.document_count().await?, 1);

    let again = store.migrate().await?;
    assert!(!again.found_legacy);

    Ok(())
}

#[tokio::test]
async fn test_failed_migration_keeps_legacy_readable() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("legacy.lance");

    // Duplicate ids cannot be migrated without losing a row
    let mut rows = legacy_rows(&[1, 2]);
    rows.push(LegacyRow {
        id: ChunkId::new(2),
        content: "duplicate".to_string(),
        metadata: Metadata::new(),
        embedding: axis_vector(DIM, 3),
    });
    write_legacy_table(&path, DIM, &rows).await?;

    let store = VectorStore::open(&path, DIM, &manual()).await?;
    let err = store.migrate().await.unwrap_err();
    assert!(matches!(err, RagError::SchemaMigrationFailed(_)));

    assert_eq!(store.layout(), Layout::Legacy);
    assert_eq!(store.document_count().await?, 3);
    assert!(!store.search_similar(&axis_vector(DIM, 0), 1).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_migrate_without_legacy_table_is_noop() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let store = VectorStore::new(&temp_dir.path().join("fresh.lance"), DIM).await?;

    let report = store.migrate().await?;
    assert!(!report.found_legacy);
    assert_eq!(report.legacy_rows, 0);
    assert_eq!(store.layout(), Layout::Current);

    Ok(())
}

#[tokio::test]
async fn test_deleted_chunks_stay_deleted_after_remigration() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("legacy.lance");
    write_legacy_table(&path, DIM, &legacy_rows(&[1, 2, 3])).await?;

    let store = VectorStore::new(&path, DIM).await?;
    assert_eq!(store.layout(), Layout::Current);
    assert_eq!(store.delete(&[ChunkId::new(1)]).await?, 1);

    let report = store.migrate().await?;
    assert!(report.found_legacy, "Legacy table is kept by default");
    assert_eq!(report.copied_meta, 0);
    assert_eq!(report.copied_vectors, 0);
    assert_eq!(store.document_count().await?, 2);
    assert!(store.get(&[ChunkId::new(1)]).await?.is_empty());

    drop(store);
    let reopened = VectorStore::new(&path, DIM).await?;
    assert_eq!(reopened.document_count().await?, 2);
    assert!(reopened.get(&[ChunkId::new(1)]).await?.is_empty());

    Ok(())
}
