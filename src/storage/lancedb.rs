use anyhow::{anyhow, Context};
use arrow_array::{Array, RecordBatch, RecordBatchIterator};
use futures::future;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{connect, Connection, DistanceType, Table};
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::migration::{self, MigrationReport};
use super::schema::{self, MetaRow, StoreState};
use super::{ChunkId, Fingerprint, Layout, NewChunk, SimilarChunk, SourceReplacement, StoredChunk};
use crate::config::StorageConfig;
use crate::error::{RagError, Result};
use crate::metrics::CHUNKS_STORED;

/// Maximum number of rows to query when fetching all data.
/// Used as a fallback when count_rows fails.
const MAX_QUERY_ROWS: usize = 10_000_000;

/// Lazy sequence of `(id, content)` pairs read from the store.
pub type DocumentStream = BoxStream<'static, Result<(ChunkId, String)>>;

/// LanceDB-backed store for chunks and their embeddings.
///
/// Chunk text and metadata live in one table, vectors in another, joined on
/// `id`. Writers serialize on an internal gate; readers hold the shared side
/// of the same gate while planning, so a query never observes a batch whose
/// metadata rows are written but whose vectors are not.
pub struct VectorStore {
    db: Connection,
    db_path: PathBuf,
    dimension: usize,
    meta: Table,
    vectors: Table,
    layout: std::sync::RwLock<Layout>,
    gate: RwLock<()>,
    next_id: AtomicI64,
    revision: AtomicU64,
    drop_legacy_after_migration: bool,
}

impl VectorStore {
    /// Open (or create) a store with default storage options.
    pub async fn new(path: &Path, dimension: usize) -> Result<Self> {
        Self::open(path, dimension, &StorageConfig::default()).await
    }

    /// Open (or create) a store at `path` whose embeddings have `dimension`
    /// components.
    ///
    /// A legacy single-table layout is migrated when `auto_migrate` is set.
    /// If that migration fails the store still opens and serves reads from
    /// the legacy table; writes are refused until [`VectorStore::migrate`]
    /// succeeds.
    pub async fn open(path: &Path, dimension: usize, options: &StorageConfig) -> Result<Self> {
        if dimension == 0 {
            return Err(anyhow!("Embedding dimension must be greater than zero").into());
        }

        let db_path = path.to_path_buf();
        let path_str = path.to_string_lossy();

        info!("Opening LanceDB at: {}", path_str);

        let db = connect(&path_str)
            .execute()
            .await
            .with_context(|| format!("Failed to connect to LanceDB at {}", path_str))?;

        let table_names = db
            .table_names()
            .execute()
            .await
            .context("Failed to list tables")?;
        let has_legacy = table_names.iter().any(|n| n == schema::LEGACY_TABLE);

        let state = Self::read_state(&db, &table_names).await?;
        if let Some(state) = &state {
            if state.dimension != dimension {
                return Err(RagError::DimensionMismatch {
                    expected: state.dimension,
                    actual: dimension,
                });
            }
        }

        let meta = Self::get_or_create_table(
            &db,
            &table_names,
            schema::META_TABLE,
            schema::meta_schema(),
        )
        .await?;
        let vectors = Self::get_or_create_table(
            &db,
            &table_names,
            schema::VECTOR_TABLE,
            schema::vector_schema(dimension),
        )
        .await?;

        let layout = match &state {
            Some(s) if s.schema_version >= schema::CURRENT_SCHEMA_VERSION => Layout::Current,
            _ if has_legacy => Layout::Legacy,
            _ => Layout::Current,
        };

        // The stored high-water mark wins, but never trust it below what is on disk
        let max_on_disk = Self::max_id(&meta).await?.max(Self::max_id(&vectors).await?);
        let next_id = state
            .map(|s| s.next_chunk_id)
            .unwrap_or(1)
            .max(max_on_disk + 1);

        let store = Self {
            db,
            db_path,
            dimension,
            meta,
            vectors,
            layout: std::sync::RwLock::new(layout),
            gate: RwLock::new(()),
            next_id: AtomicI64::new(next_id),
            revision: AtomicU64::new(0),
            drop_legacy_after_migration: options.drop_legacy_after_migration,
        };

        if state.is_none() {
            let version = match layout {
                Layout::Legacy => schema::LEGACY_SCHEMA_VERSION,
                Layout::Current => schema::CURRENT_SCHEMA_VERSION,
            };
            store.write_state(version, next_id).await?;
        }

        if layout == Layout::Legacy && options.auto_migrate {
            match store.migrate().await {
                Ok(report) => info!(
                    legacy_rows = report.legacy_rows,
                    copied = report.copied_meta,
                    "Migrated legacy layout"
                ),
                Err(e) => warn!(
                    error = %e,
                    "Legacy layout migration failed, serving legacy table read-only"
                ),
            }
        }

        Ok(store)
    }

    async fn get_or_create_table(
        db: &Connection,
        existing: &[String],
        name: &str,
        table_schema: arrow_schema::Schema,
    ) -> Result<Table> {
        if existing.iter().any(|n| n == name) {
            debug!("Opening existing table: {}", name);
            Ok(db
                .open_table(name)
                .execute()
                .await
                .with_context(|| format!("Failed to open table {}", name))?)
        } else {
            debug!("Creating new table: {}", name);
            let batches = RecordBatchIterator::new(vec![], Arc::new(table_schema));
            Ok(db
                .create_table(name, Box::new(batches))
                .execute()
                .await
                .with_context(|| format!("Failed to create table {}", name))?)
        }
    }

    async fn read_state(db: &Connection, existing: &[String]) -> Result<Option<StoreState>> {
        if !existing.iter().any(|n| n == schema::STATE_TABLE) {
            return Ok(None);
        }

        let table = db
            .open_table(schema::STATE_TABLE)
            .execute()
            .await
            .context("Failed to open store state table")?;

        let batches: Vec<RecordBatch> = table
            .query()
            .limit(1)
            .execute()
            .await
            .context("Failed to query store state")?
            .try_collect()
            .await
            .context("Failed to collect store state")?;

        for batch in batches {
            if batch.num_rows() == 0 {
                continue;
            }
            let versions = schema::int32_column(&batch, schema::COL_SCHEMA_VERSION)?;
            let next_ids = schema::int64_column(&batch, schema::COL_NEXT_ID)?;
            let dimensions = schema::int32_column(&batch, schema::COL_DIMENSION)?;
            return Ok(Some(StoreState {
                schema_version: versions.value(0),
                next_chunk_id: next_ids.value(0),
                dimension: dimensions.value(0) as usize,
            }));
        }

        Ok(None)
    }

    /// Replace the single state row. Callers hold the write gate (or own the
    /// store exclusively during `open`).
    async fn write_state(&self, schema_version: i32, next_chunk_id: i64) -> Result<()> {
        let state = StoreState {
            schema_version,
            next_chunk_id,
            dimension: self.dimension,
        };
        let batch = schema::state_batch(&state)?;
        let batches =
            RecordBatchIterator::new(vec![Ok(batch)], Arc::new(schema::state_schema()));

        let table_names = self
            .db
            .table_names()
            .execute()
            .await
            .context("Failed to list tables")?;

        if table_names.iter().any(|n| n == schema::STATE_TABLE) {
            let table = self
                .db
                .open_table(schema::STATE_TABLE)
                .execute()
                .await
                .context("Failed to open store state table")?;
            table
                .delete("true")
                .await
                .context("Failed to clear store state")?;
            table
                .add(Box::new(batches))
                .execute()
                .await
                .context("Failed to write store state")?;
        } else {
            self.db
                .create_table(schema::STATE_TABLE, Box::new(batches))
                .execute()
                .await
                .context("Failed to create store state table")?;
        }

        debug!(schema_version, next_chunk_id, "Store state written");
        Ok(())
    }

    /// Largest id in `table`, or 0 when empty.
    async fn max_id(table: &Table) -> Result<i64> {
        let ids = Self::read_ids(table).await?;
        Ok(ids.into_iter().max().unwrap_or(0))
    }

    pub(super) async fn read_ids(table: &Table) -> Result<Vec<i64>> {
        let total_rows = Self::get_row_count_or_max(table).await;
        if total_rows == 0 {
            return Ok(Vec::new());
        }

        let batches: Vec<RecordBatch> = table
            .query()
            .select(Select::Columns(vec![schema::COL_ID.to_string()]))
            .limit(total_rows)
            .execute()
            .await
            .context("Failed to query ids")?
            .try_collect()
            .await
            .context("Failed to collect ids")?;

        let mut ids = Vec::with_capacity(total_rows);
        for batch in batches {
            let column = schema::int64_column(&batch, schema::COL_ID)?;
            ids.extend(column.values().iter().copied());
        }
        Ok(ids)
    }

    /// Get the row count for a table, with fallback to MAX_QUERY_ROWS on error.
    pub(super) async fn get_row_count_or_max(table: &Table) -> usize {
        match table.count_rows(None).await {
            Ok(count) => count,
            Err(e) => {
                warn!(
                    error = %e,
                    fallback = MAX_QUERY_ROWS,
                    "Failed to count rows, using fallback limit"
                );
                MAX_QUERY_ROWS
            }
        }
    }

    fn current_layout(&self) -> Layout {
        *self.layout.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_layout(&self, layout: Layout) {
        *self.layout.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = layout;
    }

    fn bump_revision(&self) {
        self.revision.fetch_add(1, Ordering::SeqCst);
    }

    async fn legacy_table(&self) -> Result<Table> {
        Ok(self
            .db
            .open_table(schema::LEGACY_TABLE)
            .execute()
            .await
            .context("Failed to open legacy table")?)
    }

    /// Table holding `id` and `content` for the active layout.
    async fn content_table(&self) -> Result<Table> {
        match self.current_layout() {
            Layout::Current => Ok(self.meta.clone()),
            Layout::Legacy => self.legacy_table().await,
        }
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        Ok(())
    }

    /// Insert a batch of chunks and return their newly assigned ids.
    ///
    /// The whole batch is validated before anything is written; one bad
    /// embedding rejects the batch with `DimensionMismatch`. Content is not
    /// deduplicated.
    pub async fn add(&self, chunks: Vec<NewChunk>) -> Result<Vec<ChunkId>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        for chunk in &chunks {
            self.check_dimension(&chunk.embedding)?;
        }

        let _guard = self.gate.write().await;
        self.add_unguarded(chunks).await
    }

    async fn add_unguarded(&self, chunks: Vec<NewChunk>) -> Result<Vec<ChunkId>> {
        if self.current_layout() == Layout::Legacy {
            return Err(RagError::ReadOnlyLegacyLayout);
        }
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let first = self.next_id.load(Ordering::SeqCst);
        let next = first + chunks.len() as i64;
        let ids: Vec<ChunkId> = (first..next).map(ChunkId::new).collect();

        // Advance the high-water mark before any row lands so ids are never reused
        self.write_state(schema::CURRENT_SCHEMA_VERSION, next).await?;
        self.next_id.store(next, Ordering::SeqCst);

        let meta_rows: Vec<MetaRow<'_>> = chunks
            .iter()
            .zip(&ids)
            .map(|(chunk, id)| MetaRow {
                id: *id,
                content: &chunk.content,
                metadata: &chunk.metadata,
            })
            .collect();
        let meta_batch = schema::meta_batch(&meta_rows)?;

        let vector_rows: Vec<(ChunkId, &[f32])> = chunks
            .iter()
            .zip(&ids)
            .map(|(chunk, id)| (*id, chunk.embedding.as_slice()))
            .collect();
        let vector_batch = schema::vector_batch(&vector_rows, self.dimension)?;

        self.meta
            .add(Box::new(RecordBatchIterator::new(
                vec![Ok(meta_batch)],
                Arc::new(schema::meta_schema()),
            )))
            .execute()
            .await
            .context("Failed to insert chunk metadata")?;

        let vector_insert = self
            .vectors
            .add(Box::new(RecordBatchIterator::new(
                vec![Ok(vector_batch)],
                Arc::new(schema::vector_schema(self.dimension)),
            )))
            .execute()
            .await;

        if let Err(e) = vector_insert {
            warn!(error = %e, "Vector insert failed, rolling back chunk metadata");
            let predicate = format!("{} IN ({})", schema::COL_ID, schema::id_list(&ids));
            if let Err(rollback) = self.meta.delete(&predicate).await {
                warn!(error = %rollback, "Failed to roll back chunk metadata");
            }
            return Err(anyhow::Error::new(e)
                .context("Failed to insert chunk vectors")
                .into());
        }

        self.bump_revision();
        CHUNKS_STORED.inc_by(ids.len() as f64);
        info!("Inserted {} chunks into store", ids.len());

        Ok(ids)
    }

    /// Nearest chunks to `query_embedding` by cosine similarity.
    ///
    /// Results are ordered by descending similarity; equal similarities are
    /// ordered by id.
    pub async fn search_similar(
        &self,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<SimilarChunk>> {
        self.check_dimension(query_embedding)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let _guard = self.gate.read().await;

        let (table, vector_column, joined) = match self.current_layout() {
            Layout::Current => (self.vectors.clone(), schema::COL_VECTOR, false),
            Layout::Legacy => (
                self.legacy_table().await?,
                schema::COL_LEGACY_EMBEDDING,
                true,
            ),
        };

        let row_count = table
            .count_rows(None)
            .await
            .context("Failed to count vectors")?;
        if row_count == 0 {
            return Ok(Vec::new());
        }

        let batches: Vec<RecordBatch> = table
            .vector_search(query_embedding.to_vec())
            .context("Failed to create vector search query")?
            .column(vector_column)
            .distance_type(DistanceType::Cosine)
            .limit(top_k)
            .execute()
            .await
            .context("Failed to execute vector search")?
            .try_collect()
            .await
            .context("Failed to collect search results")?;

        let mut hits: Vec<(ChunkId, f32, Option<String>)> = Vec::new();
        for batch in &batches {
            let ids = schema::int64_column(batch, schema::COL_ID)?;
            let distances = schema::float32_column(batch, schema::COL_DISTANCE)?;
            let contents = if joined {
                Some(schema::string_column(batch, schema::COL_CONTENT)?)
            } else {
                None
            };

            for i in 0..batch.num_rows() {
                let similarity = similarity_from_distance(distances.value(i));
                let content = contents.map(|c| c.value(i).to_string());
                hits.push((ChunkId::new(ids.value(i)), similarity, content));
            }
        }

        let mut contents = if joined {
            HashMap::new()
        } else {
            let ids: Vec<ChunkId> = hits.iter().map(|(id, _, _)| *id).collect();
            self.fetch_contents(&ids).await?
        };

        let mut results: Vec<SimilarChunk> = hits
            .into_iter()
            .filter_map(|(id, similarity, content)| {
                let content = content.or_else(|| contents.remove(&id))?;
                Some(SimilarChunk {
                    id,
                    content,
                    similarity,
                })
            })
            .collect();

        results.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(CmpOrdering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        results.truncate(top_k);

        debug!("Vector search returned {} results", results.len());
        Ok(results)
    }

    async fn fetch_contents(&self, ids: &[ChunkId]) -> Result<HashMap<ChunkId, String>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let batches: Vec<RecordBatch> = self
            .meta
            .query()
            .only_if(format!("{} IN ({})", schema::COL_ID, schema::id_list(ids)))
            .select(Select::Columns(vec![
                schema::COL_ID.to_string(),
                schema::COL_CONTENT.to_string(),
            ]))
            .limit(ids.len())
            .execute()
            .await
            .context("Failed to query chunk contents")?
            .try_collect()
            .await
            .context("Failed to collect chunk contents")?;

        let mut contents = HashMap::with_capacity(ids.len());
        for batch in batches {
            let id_col = schema::int64_column(&batch, schema::COL_ID)?;
            let content_col = schema::string_column(&batch, schema::COL_CONTENT)?;
            for i in 0..batch.num_rows() {
                contents.insert(
                    ChunkId::new(id_col.value(i)),
                    content_col.value(i).to_string(),
                );
            }
        }
        Ok(contents)
    }

    /// Number of chunks currently stored.
    pub async fn document_count(&self) -> Result<usize> {
        let _guard = self.gate.read().await;
        self.count_unguarded().await
    }

    async fn count_unguarded(&self) -> Result<usize> {
        let table = self.content_table().await?;
        Ok(table
            .count_rows(None)
            .await
            .context("Failed to count chunks")?)
    }

    /// Document count and write revision, read together.
    pub async fn fingerprint(&self) -> Result<Fingerprint> {
        let _guard = self.gate.read().await;
        Ok(Fingerprint {
            document_count: self.count_unguarded().await?,
            revision: self.revision(),
        })
    }

    /// Monotonic counter bumped by every mutation made through this handle.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Stream every `(id, content)` pair.
    ///
    /// Each call starts a fresh read of the current table version, so
    /// re-iterating observes later writes.
    pub async fn all_documents(&self) -> Result<DocumentStream> {
        let _guard = self.gate.read().await;

        let table = self.content_table().await?;
        let total_rows = Self::get_row_count_or_max(&table).await;
        if total_rows == 0 {
            return Ok(stream::empty().boxed());
        }

        let batches = table
            .query()
            .select(Select::Columns(vec![
                schema::COL_ID.to_string(),
                schema::COL_CONTENT.to_string(),
            ]))
            .limit(total_rows)
            .execute()
            .await
            .context("Failed to query all chunks")?;

        let documents = batches
            .map_err(|e| RagError::from(anyhow::Error::new(e).context("Failed to read chunk batch")))
            .and_then(|batch| future::ready(documents_from_batch(&batch)))
            .map_ok(|docs| stream::iter(docs.into_iter().map(Ok::<_, RagError>)))
            .try_flatten();

        Ok(documents.boxed())
    }

    /// Fetch chunks by id, in the order requested. Unknown ids are skipped.
    pub async fn get(&self, ids: &[ChunkId]) -> Result<Vec<StoredChunk>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let _guard = self.gate.read().await;
        let table = self.content_table().await?;

        let batches: Vec<RecordBatch> = table
            .query()
            .only_if(format!("{} IN ({})", schema::COL_ID, schema::id_list(ids)))
            .select(Select::Columns(vec![
                schema::COL_ID.to_string(),
                schema::COL_CONTENT.to_string(),
                schema::COL_METADATA.to_string(),
            ]))
            .limit(ids.len())
            .execute()
            .await
            .context("Failed to query chunks")?
            .try_collect()
            .await
            .context("Failed to collect chunks")?;

        let mut by_id = HashMap::new();
        for batch in batches {
            let id_col = schema::int64_column(&batch, schema::COL_ID)?;
            let content_col = schema::string_column(&batch, schema::COL_CONTENT)?;
            let metadata_col = schema::string_column(&batch, schema::COL_METADATA)?;
            for i in 0..batch.num_rows() {
                let id = ChunkId::new(id_col.value(i));
                by_id.insert(
                    id,
                    StoredChunk {
                        id,
                        content: content_col.value(i).to_string(),
                        metadata: schema::metadata_at(metadata_col, i)?,
                    },
                );
            }
        }

        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// Delete chunks by id. Returns how many existed.
    pub async fn delete(&self, ids: &[ChunkId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let _guard = self.gate.write().await;
        self.delete_unguarded(ids).await
    }

    async fn delete_unguarded(&self, ids: &[ChunkId]) -> Result<usize> {
        if self.current_layout() == Layout::Legacy {
            return Err(RagError::ReadOnlyLegacyLayout);
        }

        let predicate = format!("{} IN ({})", schema::COL_ID, schema::id_list(ids));
        let existing = self
            .meta
            .count_rows(Some(predicate.clone()))
            .await
            .context("Failed to count chunks to delete")?;

        self.vectors
            .delete(&predicate)
            .await
            .context("Failed to delete chunk vectors")?;
        self.meta
            .delete(&predicate)
            .await
            .context("Failed to delete chunk metadata")?;

        self.bump_revision();
        debug!("Deleted {} chunks", existing);
        Ok(existing)
    }

    /// Delete every chunk whose metadata names `source`. Returns the count.
    pub async fn delete_by_source(&self, source: &str) -> Result<usize> {
        let _guard = self.gate.write().await;
        let ids = self.ids_for_source(source).await?;
        if ids.is_empty() {
            return Ok(0);
        }
        self.delete_unguarded(&ids).await
    }

    async fn ids_for_source(&self, source: &str) -> Result<Vec<ChunkId>> {
        if self.current_layout() == Layout::Legacy {
            return Err(RagError::ReadOnlyLegacyLayout);
        }

        let predicate = format!("{} = {}", schema::COL_SOURCE, schema::sql_string(source));
        let total_rows = Self::get_row_count_or_max(&self.meta).await;
        if total_rows == 0 {
            return Ok(Vec::new());
        }

        let batches: Vec<RecordBatch> = self
            .meta
            .query()
            .only_if(predicate)
            .select(Select::Columns(vec![schema::COL_ID.to_string()]))
            .limit(total_rows)
            .execute()
            .await
            .context("Failed to query chunks by source")?
            .try_collect()
            .await
            .context("Failed to collect chunks by source")?;

        let mut ids = Vec::new();
        for batch in batches {
            let column = schema::int64_column(&batch, schema::COL_ID)?;
            ids.extend(column.values().iter().map(|&id| ChunkId::new(id)));
        }
        Ok(ids)
    }

    /// Swap every stored chunk of `source` for `chunks` as one write.
    ///
    /// The write gate is held from the hash check to the last delete, so
    /// readers observe either the previous version or the new one and
    /// concurrent replacements of the same source serialize. Returns `None`
    /// without writing when the stored hash already equals `source_hash`.
    /// New rows land before old rows are removed; if the removal fails the
    /// new rows are deleted again and the previous version stays.
    pub async fn replace_source(
        &self,
        source: &str,
        source_hash: &str,
        chunks: Vec<NewChunk>,
    ) -> Result<Option<SourceReplacement>> {
        for chunk in &chunks {
            self.check_dimension(&chunk.embedding)?;
        }

        let _guard = self.gate.write().await;

        if self.source_hash_unguarded(source).await?.as_deref() == Some(source_hash) {
            debug!(source, "Stored version already current");
            return Ok(None);
        }

        let previous = self.ids_for_source(source).await?;
        let chunk_ids = self.add_unguarded(chunks).await?;

        if !previous.is_empty() {
            if let Err(e) = self.delete_unguarded(&previous).await {
                warn!(source, error = %e, "Failed to remove previous version, discarding new chunks");
                if !chunk_ids.is_empty() {
                    if let Err(rollback) = self.delete_unguarded(&chunk_ids).await {
                        warn!(source, error = %rollback, "Failed to discard new chunks");
                    }
                }
                return Err(e);
            }
        }

        debug!(
            source,
            added = chunk_ids.len(),
            removed = previous.len(),
            "Source replaced"
        );
        Ok(Some(SourceReplacement {
            chunk_ids,
            removed: previous.len(),
        }))
    }

    /// The `source_hash` recorded for `source`, if any chunk of it is stored.
    pub async fn source_hash(&self, source: &str) -> Result<Option<String>> {
        let _guard = self.gate.read().await;
        self.source_hash_unguarded(source).await
    }

    async fn source_hash_unguarded(&self, source: &str) -> Result<Option<String>> {
        if self.current_layout() == Layout::Legacy {
            return Err(RagError::ReadOnlyLegacyLayout);
        }

        let batches: Vec<RecordBatch> = self
            .meta
            .query()
            .only_if(format!(
                "{} = {}",
                schema::COL_SOURCE,
                schema::sql_string(source)
            ))
            .select(Select::Columns(vec![schema::COL_SOURCE_HASH.to_string()]))
            .limit(1)
            .execute()
            .await
            .context("Failed to query source hash")?
            .try_collect()
            .await
            .context("Failed to collect source hash")?;

        for batch in batches {
            let Some(hashes) = schema::optional_string_column(&batch, schema::COL_SOURCE_HASH)
            else {
                continue;
            };
            if batch.num_rows() > 0 && !hashes.is_null(0) {
                return Ok(Some(hashes.value(0).to_string()));
            }
        }
        Ok(None)
    }

    /// Upgrade a legacy single-table layout to the current two-table layout.
    ///
    /// Idempotent: rows already copied are skipped and ids are preserved.
    /// The layout flips to current only after every legacy row is verified
    /// in both tables. Once the stored version tag is current nothing is
    /// copied again, so chunks deleted after migration stay deleted. Running
    /// it on a store without a legacy table is a no-op.
    pub async fn migrate(&self) -> Result<MigrationReport> {
        let _guard = self.gate.write().await;

        if self.current_layout() == Layout::Current {
            return migration::already_current(&self.db, self.drop_legacy_after_migration).await;
        }

        let report = migration::migrate_legacy(
            &self.db,
            &self.meta,
            &self.vectors,
            self.dimension,
            self.drop_legacy_after_migration,
        )
        .await?;

        if report.found_legacy {
            let mut next = self.next_id.load(Ordering::SeqCst);
            if let Some(max_legacy) = report.max_legacy_id {
                next = next.max(max_legacy.as_i64() + 1);
            }
            self.write_state(schema::CURRENT_SCHEMA_VERSION, next)
                .await
                .map_err(|e| RagError::SchemaMigrationFailed(e.to_string()))?;
            self.next_id.store(next, Ordering::SeqCst);
            self.set_layout(Layout::Current);
            self.bump_revision();
        }

        Ok(report)
    }

    /// Layout currently served.
    pub fn layout(&self) -> Layout {
        self.current_layout()
    }

    /// Embedding dimension this store validates against.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Get the database path
    pub fn path(&self) -> &Path {
        &self.db_path
    }
}

/// Cosine similarity from a cosine distance (`1 - cos(a, b)`).
///
/// A zero-norm vector has no direction and yields NaN distance; it ranks
/// as the least similar possible.
fn similarity_from_distance(distance: f32) -> f32 {
    if distance.is_nan() {
        return -1.0;
    }
    (1.0 - distance).clamp(-1.0, 1.0)
}

fn documents_from_batch(batch: &RecordBatch) -> Result<Vec<(ChunkId, String)>> {
    let ids = schema::int64_column(batch, schema::COL_ID)?;
    let contents = schema::string_column(batch, schema::COL_CONTENT)?;
    Ok((0..batch.num_rows())
        .map(|i| (ChunkId::new(ids.value(i)), contents.value(i).to_string()))
        .collect())
}
