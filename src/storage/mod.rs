//! Persistent chunk storage.
//!
//! - `lancedb` - the [`VectorStore`] over LanceDB tables
//! - `schema` - Arrow schemas and record batch conversion
//! - `migration` - upgrade from the legacy single-table layout

mod lancedb;
pub mod migration;
pub mod schema;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use self::lancedb::{DocumentStream, VectorStore};
pub use migration::MigrationReport;

/// Stable chunk identity. Assigned on insert and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(i64);

impl ChunkId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn as_i64(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Well-known metadata keys written by the ingestion path.
pub mod keys {
    pub const SOURCE: &str = "source";
    pub const SOURCE_HASH: &str = "source_hash";
    pub const CHUNKING_STRATEGY: &str = "chunking_strategy";
    pub const CHUNK_INDEX: &str = "chunk_index";
    pub const TITLE: &str = "title";
    pub const SUMMARY: &str = "summary";
}

/// A single metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Open key-value metadata attached to a chunk.
///
/// Keys are not validated on insert; typed accessors check a value only
/// where it is consumed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, MetadataValue>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(MetadataValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.0.get(key) {
            Some(MetadataValue::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    /// Source document identifier, if recorded.
    pub fn source(&self) -> Option<&str> {
        self.get_str(keys::SOURCE)
    }

    /// Content hash of the source document, if recorded.
    pub fn source_hash(&self) -> Option<&str> {
        self.get_str(keys::SOURCE_HASH)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetadataValue)> {
        self.0.iter()
    }

    pub(crate) fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub(crate) fn from_json(raw: &str) -> anyhow::Result<Self> {
        if raw.is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(raw)?)
    }
}

/// A chunk ready to be inserted.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
}

impl NewChunk {
    pub fn new(content: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            content: content.into(),
            embedding,
            metadata: Metadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A chunk as read back from the store (without its embedding).
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    pub id: ChunkId,
    pub content: String,
    pub metadata: Metadata,
}

/// Outcome of [`VectorStore::replace_source`].
#[derive(Debug, Clone, PartialEq)]
pub struct SourceReplacement {
    /// Ids of the newly written chunks, in input order
    pub chunk_ids: Vec<ChunkId>,
    /// Chunks of the previous version that were removed
    pub removed: usize,
}

/// Vector similarity hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarChunk {
    pub id: ChunkId,
    pub content: String,
    /// Cosine similarity in `[-1, 1]`
    pub similarity: f32,
}

/// Point-in-time identity of the store contents, used to detect staleness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Fingerprint {
    pub document_count: usize,
    pub revision: u64,
}

/// Which on-disk layout the store is serving from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Single legacy table; read-only until migrated
    Legacy,
    /// Metadata table plus dedicated vector table
    Current,
}
