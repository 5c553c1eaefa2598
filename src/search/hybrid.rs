//! Query entry point combining vector similarity and BM25 keyword matching.
//!
//! Hybrid mode runs both paths concurrently over an oversampled candidate
//! set and merges them with Reciprocal Rank Fusion.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::corpus::CorpusCache;
use super::fusion::RrfFusion;
use crate::config::{Config, SearchConfig, SearchMode};
use crate::embeddings::{EmbeddingProvider, QueryEmbeddingCache};
use crate::error::{with_timeout, RagError, Result};
use crate::metrics::{SEARCH_FAILURES, SEARCH_LATENCY, SEARCH_REQUESTS, SEARCH_RESULTS};
use crate::storage::{ChunkId, SimilarChunk, VectorStore};

/// A ranked chunk returned from a query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredResult {
    pub chunk_id: ChunkId,
    pub content: String,
    /// Cosine similarity, BM25 score or RRF score depending on the mode
    pub score: f32,
    /// 1-based rank from the vector path
    pub vector_rank: Option<usize>,
    /// 1-based rank from the keyword path
    pub keyword_rank: Option<usize>,
}

pub struct HybridRetriever {
    store: Arc<VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    corpus: Arc<CorpusCache>,
    query_cache: QueryEmbeddingCache,
    fusion: RrfFusion,
    config: SearchConfig,
}

impl HybridRetriever {
    /// Create a retriever with its own corpus cache.
    pub fn new(store: Arc<VectorStore>, embedder: Arc<dyn EmbeddingProvider>, config: &Config) -> Self {
        let corpus = Arc::new(
            CorpusCache::new(Arc::clone(&store), &config.corpus)
                .with_store_timeout(config.search.store_timeout()),
        );
        Self::with_corpus(store, embedder, corpus, config)
    }

    /// Create a retriever sharing an existing corpus cache.
    pub fn with_corpus(
        store: Arc<VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        corpus: Arc<CorpusCache>,
        config: &Config,
    ) -> Self {
        if embedder.dimension() != store.dimension() {
            warn!(
                provider = embedder.provider_name(),
                provider_dimension = embedder.dimension(),
                store_dimension = store.dimension(),
                "Embedding provider dimension differs from store; vector queries will fail"
            );
        }

        Self {
            store,
            embedder,
            corpus,
            query_cache: QueryEmbeddingCache::new(&config.embeddings.cache),
            fusion: RrfFusion::with_k(config.search.rrf_k),
            config: config.search.clone(),
        }
    }

    /// Set a custom RRF fusion algorithm.
    pub fn with_fusion(mut self, fusion: RrfFusion) -> Self {
        self.fusion = fusion;
        self
    }

    /// Default mode used by [`query_default`](Self::query_default).
    pub fn search_mode(&self) -> SearchMode {
        self.config.mode
    }

    pub fn corpus(&self) -> &Arc<CorpusCache> {
        &self.corpus
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    /// Query with the configured default mode and result limit.
    pub async fn query_default(&self, text: &str) -> Result<Vec<ScoredResult>> {
        self.query(text, self.config.mode, self.config.default_limit)
            .await
    }

    /// Return up to `top_k` chunks for `text`, best first.
    ///
    /// An empty store or `top_k == 0` yields an empty list in every mode
    /// without contacting the embedding provider. Keyword mode never uses
    /// the provider; vector and hybrid modes fail with
    /// [`RagError::EmbeddingUnavailable`] if it cannot embed the query.
    pub async fn query(&self, text: &str, mode: SearchMode, top_k: usize) -> Result<Vec<ScoredResult>> {
        let start = Instant::now();
        let mode_label = mode.to_string();
        SEARCH_REQUESTS.with_label_values(&[mode_label.as_str()]).inc();

        let result = self.run(text, mode, top_k).await;
        let elapsed = start.elapsed();

        match &result {
            Ok(results) => {
                SEARCH_LATENCY.observe(elapsed.as_secs_f64());
                SEARCH_RESULTS.observe(results.len() as f64);
                info!(
                    search_type = mode_label.as_str(),
                    query = text,
                    results = results.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Search completed"
                );
            }
            Err(e) => {
                SEARCH_FAILURES.with_label_values(&[failure_kind(e)]).inc();
                warn!(
                    search_type = mode_label.as_str(),
                    query = text,
                    error = %e,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Search failed"
                );
            }
        }

        result
    }

    async fn run(&self, text: &str, mode: SearchMode, top_k: usize) -> Result<Vec<ScoredResult>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let count = with_timeout(
            "document count",
            self.config.store_timeout(),
            self.store.document_count(),
        )
        .await?;
        if count == 0 {
            debug!("Store is empty; skipping {} search", mode);
            return Ok(Vec::new());
        }

        match mode {
            SearchMode::Vector => {
                let hits = self.vector_hits(text, top_k).await?;
                Ok(hits
                    .into_iter()
                    .enumerate()
                    .map(|(i, hit)| ScoredResult {
                        chunk_id: hit.id,
                        content: hit.content,
                        score: hit.similarity,
                        vector_rank: Some(i + 1),
                        keyword_rank: None,
                    })
                    .collect())
            }
            SearchMode::Keyword => {
                let mut hits = self.keyword_hits(text).await?;
                hits.truncate(top_k);

                let ids: Vec<ChunkId> = hits.iter().map(|(id, _)| *id).collect();
                let mut contents = self.contents(&ids).await?;

                Ok(hits
                    .into_iter()
                    .enumerate()
                    .filter_map(|(i, (id, score))| {
                        contents.remove(&id).map(|content| ScoredResult {
                            chunk_id: id,
                            content,
                            score,
                            vector_rank: None,
                            keyword_rank: Some(i + 1),
                        })
                    })
                    .collect())
            }
            SearchMode::Hybrid => self.hybrid(text, top_k).await,
        }
    }

    async fn hybrid(&self, text: &str, top_k: usize) -> Result<Vec<ScoredResult>> {
        let candidates = self.config.candidate_count(top_k);

        let (vector_hits, mut keyword_hits) =
            tokio::try_join!(self.vector_hits(text, candidates), self.keyword_hits(text))?;
        keyword_hits.truncate(candidates);

        let vector_ids: Vec<ChunkId> = vector_hits.iter().map(|h| h.id).collect();
        let keyword_ids: Vec<ChunkId> = keyword_hits.iter().map(|(id, _)| *id).collect();
        let fused = self.fusion.fuse(&vector_ids, &keyword_ids, top_k);

        debug!(
            candidates,
            vector = vector_ids.len(),
            keyword = keyword_ids.len(),
            fused = fused.len(),
            "Fused hybrid candidates"
        );

        let mut contents: HashMap<ChunkId, String> = vector_hits
            .into_iter()
            .map(|hit| (hit.id, hit.content))
            .collect();
        let missing: Vec<ChunkId> = fused
            .iter()
            .map(|hit| hit.chunk_id)
            .filter(|id| !contents.contains_key(id))
            .collect();
        if !missing.is_empty() {
            contents.extend(self.contents(&missing).await?);
        }

        Ok(fused
            .into_iter()
            .filter_map(|hit| {
                contents.remove(&hit.chunk_id).map(|content| ScoredResult {
                    chunk_id: hit.chunk_id,
                    content,
                    score: hit.score,
                    vector_rank: hit.vector_rank,
                    keyword_rank: hit.keyword_rank,
                })
            })
            .collect())
    }

    async fn vector_hits(&self, text: &str, limit: usize) -> Result<Vec<SimilarChunk>> {
        let embedding = with_timeout("query embedding", self.config.embedding_timeout(), async {
            self.query_cache
                .get_or_embed(self.embedder.as_ref(), text)
                .await
                .map_err(|e| RagError::EmbeddingUnavailable(format!("{:#}", e)))
        })
        .await?;

        with_timeout(
            "vector search",
            self.config.store_timeout(),
            self.store.search_similar(&embedding, limit),
        )
        .await
    }

    /// Every keyword match, best first. The corpus cache applies its own
    /// rebuild deadline.
    async fn keyword_hits(&self, text: &str) -> Result<Vec<(ChunkId, f32)>> {
        self.corpus.score(text).await
    }

    async fn contents(&self, ids: &[ChunkId]) -> Result<HashMap<ChunkId, String>> {
        let chunks = with_timeout(
            "chunk lookup",
            self.config.store_timeout(),
            self.store.get(ids),
        )
        .await?;
        Ok(chunks.into_iter().map(|c| (c.id, c.content)).collect())
    }
}

fn failure_kind(error: &RagError) -> &'static str {
    match error {
        RagError::DimensionMismatch { .. } => "dimension_mismatch",
        RagError::EmbeddingUnavailable(_) => "embedding_unavailable",
        RagError::CorpusCacheStale => "corpus_stale",
        RagError::Timeout { .. } => "timeout",
        RagError::SchemaMigrationFailed(_) => "migration",
        RagError::ReadOnlyLegacyLayout => "read_only",
        RagError::CorpusTooLarge { .. } => "corpus_too_large",
        RagError::Storage(_) => "storage",
    }
}
