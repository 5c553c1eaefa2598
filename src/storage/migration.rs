//! Upgrade from the legacy single-table layout.
//!
//! The legacy `documents` table stores content, metadata and embedding in
//! one row. Migration copies each row into `chunk_meta` and `chunk_vectors`
//! under its original id. Only ids missing from a target table are copied,
//! so the routine can be re-run after a partial failure. Once the store's
//! version tag is current it copies nothing. Rows copied by a failed attempt
//! are removed again and the legacy table is never touched unless the copy
//! has been verified.

use anyhow::Context;
use arrow_array::{RecordBatch, RecordBatchIterator};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, Table};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use super::schema::{self, LegacyRow, MetaRow};
use super::{ChunkId, VectorStore};
use crate::error::{RagError, Result};

/// Rows copied per insert.
const MIGRATION_BATCH_SIZE: usize = 1_000;

/// Outcome of a migration run.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationReport {
    /// Whether a legacy table was present at all
    pub found_legacy: bool,
    /// Rows in the legacy table
    pub legacy_rows: usize,
    /// Rows copied into the metadata table by this run
    pub copied_meta: usize,
    /// Rows copied into the vector table by this run
    pub copied_vectors: usize,
    /// Largest legacy id, used to advance the id high-water mark
    pub max_legacy_id: Option<ChunkId>,
    /// Whether the legacy table was dropped after verification
    pub legacy_dropped: bool,
    pub completed_at: DateTime<Utc>,
}

impl MigrationReport {
    fn nothing_to_do() -> Self {
        Self {
            found_legacy: false,
            legacy_rows: 0,
            copied_meta: 0,
            copied_vectors: 0,
            max_legacy_id: None,
            legacy_dropped: false,
            completed_at: Utc::now(),
        }
    }
}

/// Report for a store whose version tag is already current. A legacy table
/// kept from an earlier run is left alone, or dropped when configured.
pub(super) async fn already_current(db: &Connection, drop_legacy: bool) -> Result<MigrationReport> {
    let table_names = db
        .table_names()
        .execute()
        .await
        .map_err(|e| failed("listing tables", e))?;

    if !table_names.iter().any(|n| n == schema::LEGACY_TABLE) {
        return Ok(MigrationReport::nothing_to_do());
    }

    let mut report = MigrationReport::nothing_to_do();
    report.found_legacy = true;

    if drop_legacy {
        match db.drop_table(schema::LEGACY_TABLE).await {
            Ok(()) => {
                info!("Dropped legacy table left by an earlier migration");
                report.legacy_dropped = true;
            }
            Err(e) => warn!(error = %e, "Legacy table could not be dropped"),
        }
    }

    Ok(report)
}

fn failed(context: &str, err: impl std::fmt::Display) -> RagError {
    RagError::SchemaMigrationFailed(format!("{}: {}", context, err))
}

/// Copy the legacy table into the current layout. The caller holds the
/// store's write gate.
pub(super) async fn migrate_legacy(
    db: &Connection,
    meta: &Table,
    vectors: &Table,
    dimension: usize,
    drop_legacy: bool,
) -> Result<MigrationReport> {
    let table_names = db
        .table_names()
        .execute()
        .await
        .map_err(|e| failed("listing tables", e))?;

    if !table_names.iter().any(|n| n == schema::LEGACY_TABLE) {
        return Ok(MigrationReport::nothing_to_do());
    }

    let legacy = db
        .open_table(schema::LEGACY_TABLE)
        .execute()
        .await
        .map_err(|e| failed("opening legacy table", e))?;

    let rows = read_legacy_rows(&legacy, dimension).await?;
    let max_legacy_id = rows.iter().map(|r| r.id).max();

    let existing_meta: HashSet<i64> = VectorStore::read_ids(meta)
        .await
        .map_err(|e| failed("reading metadata ids", e))?
        .into_iter()
        .collect();
    let existing_vectors: HashSet<i64> = VectorStore::read_ids(vectors)
        .await
        .map_err(|e| failed("reading vector ids", e))?
        .into_iter()
        .collect();

    let missing_meta: Vec<&LegacyRow> = rows
        .iter()
        .filter(|r| !existing_meta.contains(&r.id.as_i64()))
        .collect();
    let missing_vectors: Vec<&LegacyRow> = rows
        .iter()
        .filter(|r| !existing_vectors.contains(&r.id.as_i64()))
        .collect();

    info!(
        legacy_rows = rows.len(),
        missing_meta = missing_meta.len(),
        missing_vectors = missing_vectors.len(),
        "Migrating legacy layout"
    );

    let mut copied_meta: Vec<ChunkId> = Vec::new();
    let mut copied_vectors: Vec<ChunkId> = Vec::new();

    let copy_result = copy_rows(
        meta,
        vectors,
        dimension,
        &missing_meta,
        &missing_vectors,
        &mut copied_meta,
        &mut copied_vectors,
    )
    .await;

    let verify_result = match copy_result {
        Ok(()) => verify(meta, vectors, &rows).await,
        Err(e) => Err(e),
    };

    if let Err(e) = verify_result {
        rollback(meta, vectors, &copied_meta, &copied_vectors).await;
        return Err(e);
    }

    let mut legacy_dropped = false;
    if drop_legacy {
        match db.drop_table(schema::LEGACY_TABLE).await {
            Ok(()) => legacy_dropped = true,
            Err(e) => warn!(error = %e, "Migration verified but legacy table could not be dropped"),
        }
    }

    info!(
        copied_meta = copied_meta.len(),
        copied_vectors = copied_vectors.len(),
        legacy_dropped,
        "Legacy layout migration verified"
    );

    Ok(MigrationReport {
        found_legacy: true,
        legacy_rows: rows.len(),
        copied_meta: copied_meta.len(),
        copied_vectors: copied_vectors.len(),
        max_legacy_id,
        legacy_dropped,
        completed_at: Utc::now(),
    })
}

async fn read_legacy_rows(legacy: &Table, dimension: usize) -> Result<Vec<LegacyRow>> {
    let total_rows = VectorStore::get_row_count_or_max(legacy).await;
    if total_rows == 0 {
        return Ok(Vec::new());
    }

    let batches: Vec<RecordBatch> = legacy
        .query()
        .limit(total_rows)
        .execute()
        .await
        .map_err(|e| failed("querying legacy table", e))?
        .try_collect()
        .await
        .map_err(|e| failed("reading legacy table", e))?;

    let mut rows = Vec::with_capacity(total_rows);
    let mut seen = HashSet::new();

    for batch in &batches {
        let ids = schema::int64_column(batch, schema::COL_ID).map_err(|e| failed("legacy table", e))?;
        let contents = schema::string_column(batch, schema::COL_CONTENT)
            .map_err(|e| failed("legacy table", e))?;
        let metadata = schema::optional_string_column(batch, schema::COL_METADATA);
        let embeddings = schema::vector_column(batch, schema::COL_LEGACY_EMBEDDING)
            .map_err(|e| failed("legacy table", e))?;

        for i in 0..batch.num_rows() {
            let id = ChunkId::new(ids.value(i));
            if !seen.insert(id) {
                return Err(failed("legacy table", format!("duplicate id {}", id)));
            }

            let embedding =
                schema::vector_at(embeddings, i).map_err(|e| failed("legacy embedding", e))?;
            if embedding.len() != dimension {
                return Err(failed(
                    "legacy embedding",
                    format!(
                        "row {} has dimension {}, store expects {}",
                        id,
                        embedding.len(),
                        dimension
                    ),
                ));
            }

            let metadata = match metadata {
                Some(column) => {
                    schema::metadata_at(column, i).map_err(|e| failed("legacy metadata", e))?
                }
                None => Default::default(),
            };

            rows.push(LegacyRow {
                id,
                content: contents.value(i).to_string(),
                metadata,
                embedding,
            });
        }
    }

    Ok(rows)
}

async fn copy_rows(
    meta: &Table,
    vectors: &Table,
    dimension: usize,
    missing_meta: &[&LegacyRow],
    missing_vectors: &[&LegacyRow],
    copied_meta: &mut Vec<ChunkId>,
    copied_vectors: &mut Vec<ChunkId>,
) -> Result<()> {
    for chunk in missing_meta.chunks(MIGRATION_BATCH_SIZE) {
        let rows: Vec<MetaRow<'_>> = chunk
            .iter()
            .map(|r| MetaRow {
                id: r.id,
                content: &r.content,
                metadata: &r.metadata,
            })
            .collect();
        let batch = schema::meta_batch(&rows).map_err(|e| failed("building metadata rows", e))?;
        meta.add(Box::new(RecordBatchIterator::new(
            vec![Ok(batch)],
            Arc::new(schema::meta_schema()),
        )))
        .execute()
        .await
        .map_err(|e| failed("copying metadata rows", e))?;
        copied_meta.extend(chunk.iter().map(|r| r.id));
    }

    for chunk in missing_vectors.chunks(MIGRATION_BATCH_SIZE) {
        let rows: Vec<(ChunkId, &[f32])> = chunk
            .iter()
            .map(|r| (r.id, r.embedding.as_slice()))
            .collect();
        let batch = schema::vector_batch(&rows, dimension)
            .map_err(|e| failed("building vector rows", e))?;
        vectors
            .add(Box::new(RecordBatchIterator::new(
                vec![Ok(batch)],
                Arc::new(schema::vector_schema(dimension)),
            )))
            .execute()
            .await
            .map_err(|e| failed("copying vector rows", e))?;
        copied_vectors.extend(chunk.iter().map(|r| r.id));
    }

    Ok(())
}

async fn verify(meta: &Table, vectors: &Table, rows: &[LegacyRow]) -> Result<()> {
    let meta_ids: HashSet<i64> = VectorStore::read_ids(meta)
        .await
        .map_err(|e| failed("verifying metadata ids", e))?
        .into_iter()
        .collect();
    let vector_ids: HashSet<i64> = VectorStore::read_ids(vectors)
        .await
        .map_err(|e| failed("verifying vector ids", e))?
        .into_iter()
        .collect();

    let missing = rows
        .iter()
        .filter(|r| !meta_ids.contains(&r.id.as_i64()) || !vector_ids.contains(&r.id.as_i64()))
        .count();

    if missing > 0 {
        return Err(failed(
            "verification",
            format!("{} legacy rows missing after copy", missing),
        ));
    }
    Ok(())
}

async fn rollback(meta: &Table, vectors: &Table, copied_meta: &[ChunkId], copied_vectors: &[ChunkId]) {
    if !copied_meta.is_empty() {
        let predicate = format!("{} IN ({})", schema::COL_ID, schema::id_list(copied_meta));
        if let Err(e) = meta.delete(&predicate).await {
            warn!(error = %e, "Failed to roll back migrated metadata rows");
        }
    }
    if !copied_vectors.is_empty() {
        let predicate = format!("{} IN ({})", schema::COL_ID, schema::id_list(copied_vectors));
        if let Err(e) = vectors.delete(&predicate).await {
            warn!(error = %e, "Failed to roll back migrated vector rows");
        }
    }
}

/// Create (or append to) a legacy single-table layout at `path`.
///
/// Exists so tools and tests can produce stores in the old format.
pub async fn write_legacy_table(path: &Path, dimension: usize, rows: &[LegacyRow]) -> Result<()> {
    let path_str = path.to_string_lossy();
    let db = connect(&path_str)
        .execute()
        .await
        .with_context(|| format!("Failed to connect to LanceDB at {}", path_str))?;

    let batch = schema::legacy_batch(rows, dimension)?;
    let batches = RecordBatchIterator::new(
        vec![Ok(batch)],
        Arc::new(schema::legacy_schema(dimension)),
    );

    let table_names = db
        .table_names()
        .execute()
        .await
        .context("Failed to list tables")?;

    if table_names.iter().any(|n| n == schema::LEGACY_TABLE) {
        db.open_table(schema::LEGACY_TABLE)
            .execute()
            .await
            .context("Failed to open legacy table")?
            .add(Box::new(batches))
            .execute()
            .await
            .context("Failed to append legacy rows")?;
    } else {
        db.create_table(schema::LEGACY_TABLE, Box::new(batches))
            .execute()
            .await
            .context("Failed to create legacy table")?;
    }

    Ok(())
}
