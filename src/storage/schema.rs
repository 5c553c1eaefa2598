//! Arrow schemas for the on-disk layouts and record batch conversion.
//!
//! Current layout (schema version 2):
//! - `chunk_meta`: `id`, `content`, `metadata` (JSON), `source`, `source_hash`
//! - `chunk_vectors`: `id`, `vector`
//! - `store_state`: a single row holding the schema version and id high-water mark
//!
//! Legacy layout (schema version 1): one `documents` table with
//! `id`, `content`, `metadata` and `embedding` side by side.

use anyhow::{anyhow, Context, Result};
use arrow_array::types::Float32Type;
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int32Array, Int64Array, RecordBatch, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

use super::{ChunkId, Metadata};

pub const META_TABLE: &str = "chunk_meta";
pub const VECTOR_TABLE: &str = "chunk_vectors";
pub const STATE_TABLE: &str = "store_state";
pub const LEGACY_TABLE: &str = "documents";

pub const LEGACY_SCHEMA_VERSION: i32 = 1;
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

pub const COL_ID: &str = "id";
pub const COL_CONTENT: &str = "content";
pub const COL_METADATA: &str = "metadata";
pub const COL_SOURCE: &str = "source";
pub const COL_SOURCE_HASH: &str = "source_hash";
pub const COL_VECTOR: &str = "vector";
pub const COL_LEGACY_EMBEDDING: &str = "embedding";
pub const COL_SCHEMA_VERSION: &str = "schema_version";
pub const COL_NEXT_ID: &str = "next_chunk_id";
pub const COL_DIMENSION: &str = "dimension";
pub const COL_UPDATED_AT: &str = "updated_at";

/// LanceDB's distance column on vector search results.
pub const COL_DISTANCE: &str = "_distance";

fn vector_field(name: &str, dimension: usize) -> Field {
    Field::new(
        name,
        DataType::FixedSizeList(
            Arc::new(Field::new("item", DataType::Float32, true)),
            dimension as i32,
        ),
        false,
    )
}

pub fn meta_schema() -> Schema {
    Schema::new(vec![
        Field::new(COL_ID, DataType::Int64, false),
        Field::new(COL_CONTENT, DataType::Utf8, false),
        Field::new(COL_METADATA, DataType::Utf8, false),
        Field::new(COL_SOURCE, DataType::Utf8, true),
        Field::new(COL_SOURCE_HASH, DataType::Utf8, true),
    ])
}

pub fn vector_schema(dimension: usize) -> Schema {
    Schema::new(vec![
        Field::new(COL_ID, DataType::Int64, false),
        vector_field(COL_VECTOR, dimension),
    ])
}

pub fn state_schema() -> Schema {
    Schema::new(vec![
        Field::new(COL_SCHEMA_VERSION, DataType::Int32, false),
        Field::new(COL_NEXT_ID, DataType::Int64, false),
        Field::new(COL_DIMENSION, DataType::Int32, false),
        Field::new(COL_UPDATED_AT, DataType::Int64, false),
    ])
}

pub fn legacy_schema(dimension: usize) -> Schema {
    Schema::new(vec![
        Field::new(COL_ID, DataType::Int64, false),
        Field::new(COL_CONTENT, DataType::Utf8, false),
        Field::new(COL_METADATA, DataType::Utf8, true),
        vector_field(COL_LEGACY_EMBEDDING, dimension),
    ])
}

/// Persisted store bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreState {
    pub schema_version: i32,
    pub next_chunk_id: i64,
    pub dimension: usize,
}

/// A row of the metadata table.
pub struct MetaRow<'a> {
    pub id: ChunkId,
    pub content: &'a str,
    pub metadata: &'a Metadata,
}

/// Build a record batch for the metadata table.
pub fn meta_batch(rows: &[MetaRow<'_>]) -> Result<RecordBatch> {
    let ids: Vec<i64> = rows.iter().map(|r| r.id.as_i64()).collect();
    let contents: Vec<&str> = rows.iter().map(|r| r.content).collect();
    let metadata = rows
        .iter()
        .map(|r| r.metadata.to_json())
        .collect::<Result<Vec<String>>>()
        .context("Failed to serialize chunk metadata")?;
    let sources: Vec<Option<&str>> = rows.iter().map(|r| r.metadata.source()).collect();
    let hashes: Vec<Option<&str>> = rows.iter().map(|r| r.metadata.source_hash()).collect();

    RecordBatch::try_new(
        Arc::new(meta_schema()),
        vec![
            Arc::new(Int64Array::from(ids)),
            Arc::new(StringArray::from(contents)),
            Arc::new(StringArray::from(metadata)),
            Arc::new(StringArray::from(sources)),
            Arc::new(StringArray::from(hashes)),
        ],
    )
    .context("Failed to create metadata RecordBatch")
}

/// Build a record batch for the vector table.
pub fn vector_batch(rows: &[(ChunkId, &[f32])], dimension: usize) -> Result<RecordBatch> {
    let ids: Vec<i64> = rows.iter().map(|(id, _)| id.as_i64()).collect();
    let vectors = FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
        rows.iter()
            .map(|(_, vector)| Some(vector.iter().map(|&v| Some(v)))),
        dimension as i32,
    );

    RecordBatch::try_new(
        Arc::new(vector_schema(dimension)),
        vec![Arc::new(Int64Array::from(ids)), Arc::new(vectors)],
    )
    .context("Failed to create vector RecordBatch")
}

pub fn state_batch(state: &StoreState) -> Result<RecordBatch> {
    RecordBatch::try_new(
        Arc::new(state_schema()),
        vec![
            Arc::new(Int32Array::from(vec![state.schema_version])),
            Arc::new(Int64Array::from(vec![state.next_chunk_id])),
            Arc::new(Int32Array::from(vec![state.dimension as i32])),
            Arc::new(Int64Array::from(vec![chrono::Utc::now().timestamp_millis()])),
        ],
    )
    .context("Failed to create state RecordBatch")
}

/// A row of the legacy single-table layout.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyRow {
    pub id: ChunkId,
    pub content: String,
    pub metadata: Metadata,
    pub embedding: Vec<f32>,
}

pub fn legacy_batch(rows: &[LegacyRow], dimension: usize) -> Result<RecordBatch> {
    let ids: Vec<i64> = rows.iter().map(|r| r.id.as_i64()).collect();
    let contents: Vec<&str> = rows.iter().map(|r| r.content.as_str()).collect();
    let metadata = rows
        .iter()
        .map(|r| r.metadata.to_json().map(Some))
        .collect::<Result<Vec<Option<String>>>>()?;
    let embeddings = FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
        rows.iter()
            .map(|r| Some(r.embedding.iter().map(|&v| Some(v)))),
        dimension as i32,
    );

    RecordBatch::try_new(
        Arc::new(legacy_schema(dimension)),
        vec![
            Arc::new(Int64Array::from(ids)),
            Arc::new(StringArray::from(contents)),
            Arc::new(StringArray::from(metadata)),
            Arc::new(embeddings),
        ],
    )
    .context("Failed to create legacy RecordBatch")
}

// ============================================================================
// Column readers
// ============================================================================

pub fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow!("Missing {} column", name))
}

pub fn optional_string_column<'a>(batch: &'a RecordBatch, name: &str) -> Option<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
}

pub fn int64_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int64Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
        .ok_or_else(|| anyhow!("Missing {} column", name))
}

pub fn int32_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int32Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Int32Array>())
        .ok_or_else(|| anyhow!("Missing {} column", name))
}

pub fn float32_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Float32Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
        .ok_or_else(|| anyhow!("Missing {} column", name))
}

pub fn vector_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a FixedSizeListArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
        .ok_or_else(|| anyhow!("Missing {} column", name))
}

/// Read the vector stored at `row`.
pub fn vector_at(column: &FixedSizeListArray, row: usize) -> Result<Vec<f32>> {
    let values = column.value(row);
    let floats = values
        .as_any()
        .downcast_ref::<Float32Array>()
        .ok_or_else(|| anyhow!("Vector column does not hold f32 values"))?;
    Ok(floats.values().to_vec())
}

/// Read the metadata JSON at `row`, treating null as empty.
pub fn metadata_at(column: &StringArray, row: usize) -> Result<Metadata> {
    if column.is_null(row) {
        return Ok(Metadata::default());
    }
    Metadata::from_json(column.value(row))
        .with_context(|| format!("Invalid metadata JSON in row {}", row))
}

/// Render ids as a SQL `IN` list for LanceDB predicates.
pub fn id_list(ids: &[ChunkId]) -> String {
    ids.iter()
        .map(|id| id.as_i64().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Quote a string literal for a LanceDB predicate.
pub fn sql_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
