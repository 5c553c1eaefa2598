//! Document ingestion: chunk, embed and store, skipping unchanged sources.
//!
//! Each source document is identified by a caller-chosen id and fingerprinted
//! with a SHA-256 of its text. Re-ingesting an unchanged source is a no-op;
//! a changed source replaces all chunks previously stored for it.

use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::chunking::Chunker;
use crate::embeddings::EmbeddingProvider;
use crate::error::{with_timeout, RagError, Result};
use crate::storage::{keys, ChunkId, Metadata, NewChunk, VectorStore};

/// Texts sent to the provider per `embed_batch` call
const DEFAULT_BATCH_SIZE: usize = 64;

const DEFAULT_EMBEDDING_TIMEOUT: Duration = Duration::from_secs(60);

/// Hex-encoded SHA-256 of `text`.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// What an [`Ingestor::ingest`] call did.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub source: String,
    pub source_hash: String,
    /// Ids of the newly stored chunks, in document order
    pub chunk_ids: Vec<ChunkId>,
    /// Chunks removed because they belonged to an older version of the source
    pub replaced: usize,
    /// True when the stored version already matched and nothing was written
    pub unchanged: bool,
}

pub struct Ingestor {
    store: Arc<VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: Arc<dyn Chunker>,
    batch_size: usize,
    embedding_timeout: Duration,
}

impl Ingestor {
    pub fn new(
        store: Arc<VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        chunker: Arc<dyn Chunker>,
    ) -> Self {
        Self {
            store,
            embedder,
            chunker,
            batch_size: DEFAULT_BATCH_SIZE,
            embedding_timeout: DEFAULT_EMBEDDING_TIMEOUT,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Deadline applied to each embedding batch.
    pub fn with_embedding_timeout(mut self, timeout: Duration) -> Self {
        self.embedding_timeout = timeout;
        self
    }

    /// Ingest `text` as the current version of `source`.
    ///
    /// `metadata` is copied onto every chunk; the well-known `source`,
    /// `source_hash`, `chunk_index` and `chunking_strategy` keys are always
    /// set by the ingestor. Embeddings are computed before anything is
    /// removed, so a provider failure leaves the previous version in place.
    /// The swap itself is a single store write; concurrent ingests of the
    /// same source serialize on it.
    pub async fn ingest(&self, source: &str, text: &str, metadata: Metadata) -> Result<IngestReport> {
        let start = Instant::now();
        let source_hash = content_hash(text);

        if self.store.source_hash(source).await?.as_deref() == Some(source_hash.as_str()) {
            debug!(source, "Source unchanged; skipping ingestion");
            return Ok(IngestReport {
                source: source.to_string(),
                source_hash,
                chunk_ids: Vec::new(),
                replaced: 0,
                unchanged: true,
            });
        }

        let drafts = self.chunker.chunk(text);
        let contents: Vec<String> = drafts.iter().map(|d| d.content.clone()).collect();
        let embeddings = self.embed_all(&contents).await?;

        let expected = self.store.dimension();
        if let Some(bad) = embeddings.iter().find(|e| e.len() != expected) {
            return Err(RagError::DimensionMismatch {
                expected,
                actual: bad.len(),
            });
        }

        let chunks: Vec<NewChunk> = drafts
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(index, (draft, embedding))| {
                let mut chunk_metadata = metadata.clone();
                for (key, value) in draft.metadata.iter() {
                    chunk_metadata.insert(key.clone(), value.clone());
                }
                chunk_metadata.insert(keys::SOURCE, source);
                chunk_metadata.insert(keys::SOURCE_HASH, source_hash.as_str());
                chunk_metadata.insert(keys::CHUNK_INDEX, index as i64);
                chunk_metadata.insert(keys::CHUNKING_STRATEGY, self.chunker.strategy());

                NewChunk::new(draft.content, embedding).with_metadata(chunk_metadata)
            })
            .collect();

        let Some(replacement) = self
            .store
            .replace_source(source, &source_hash, chunks)
            .await?
        else {
            debug!(source, "Same version stored concurrently; nothing written");
            return Ok(IngestReport {
                source: source.to_string(),
                source_hash,
                chunk_ids: Vec::new(),
                replaced: 0,
                unchanged: true,
            });
        };
        let chunk_ids = replacement.chunk_ids;
        let replaced = replacement.removed;

        info!(
            source,
            chunks = chunk_ids.len(),
            replaced,
            provider = self.embedder.provider_name(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Source ingested"
        );

        Ok(IngestReport {
            source: source.to_string(),
            source_hash,
            chunk_ids,
            replaced,
            unchanged: false,
        })
    }

    async fn embed_all(&self, contents: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(contents.len());

        for batch in contents.chunks(self.batch_size) {
            let vectors = with_timeout("embedding batch", self.embedding_timeout, async {
                self.embedder
                    .embed_batch(batch)
                    .await
                    .map_err(|e| RagError::EmbeddingUnavailable(format!("{:#}", e)))
            })
            .await?;

            if vectors.len() != batch.len() {
                return Err(RagError::EmbeddingUnavailable(format!(
                    "provider returned {} embeddings for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }
            embeddings.extend(vectors);
        }

        Ok(embeddings)
    }
}
