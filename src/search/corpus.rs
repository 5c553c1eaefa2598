//! Cached, tokenized copy of the store contents for keyword scoring.
//!
//! The cache moves through three states: `Empty` before the first load,
//! `Loading` while a rebuild runs and `Ready` once a snapshot has been
//! published. Every access re-reads the store fingerprint; a snapshot taken
//! at a different fingerprint is never served. Rebuilds are serialized and
//! coalesced, and a new snapshot replaces the old one only once it is
//! complete.

use futures::TryStreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::bm25::{KeywordIndex, TokenizedDocument};
use super::tokenizer::Tokenizer;
use crate::config::{CorpusConfig, SearchConfig};
use crate::error::{with_timeout, RagError, Result};
use crate::metrics::{CORPUS_REBUILDS, CORPUS_REBUILD_LATENCY, CORPUS_TOKENS};
use crate::storage::{ChunkId, Fingerprint, VectorStore};

/// Observable state of a [`CorpusCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Nothing loaded yet, or invalidated
    Empty,
    /// A rebuild is in progress
    Loading,
    /// A snapshot is published
    Ready { documents: usize, tokens: usize },
}

/// Point-in-time tokenized corpus plus the keyword index built from it.
pub struct CorpusSnapshot {
    documents: Vec<TokenizedDocument>,
    fingerprint: Fingerprint,
    total_tokens: usize,
    index: KeywordIndex,
}

impl CorpusSnapshot {
    /// Store fingerprint observed when this snapshot was taken.
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    /// BM25 scores for the query tokens; see [`KeywordIndex::score`].
    pub fn score(&self, query_tokens: &[String]) -> Result<Vec<(ChunkId, f32)>> {
        Ok(self.index.score(query_tokens)?)
    }
}

pub struct CorpusCache {
    store: Arc<VectorStore>,
    tokenizer: Tokenizer,
    config: CorpusConfig,
    store_timeout: Duration,
    current: RwLock<Option<Arc<CorpusSnapshot>>>,
    rebuild_lock: Mutex<()>,
}

impl CorpusCache {
    pub fn new(store: Arc<VectorStore>, config: &CorpusConfig) -> Self {
        Self {
            store,
            tokenizer: Tokenizer::new(config.fold_plurals),
            config: config.clone(),
            store_timeout: SearchConfig::default().store_timeout(),
            current: RwLock::new(None),
            rebuild_lock: Mutex::new(()),
        }
    }

    /// Deadline for the fingerprint reads done on every access.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Tokenizer used for the snapshot; queries must use the same one.
    pub fn tokenizer(&self) -> Tokenizer {
        self.tokenizer
    }

    pub async fn status(&self) -> CacheStatus {
        if self.rebuild_lock.try_lock().is_err() {
            return CacheStatus::Loading;
        }
        match self.current.read().await.as_ref() {
            Some(snapshot) => CacheStatus::Ready {
                documents: snapshot.len(),
                tokens: snapshot.total_tokens(),
            },
            None => CacheStatus::Empty,
        }
    }

    /// Drop the published snapshot so the next access reloads.
    pub async fn invalidate(&self) {
        *self.current.write().await = None;
        CORPUS_TOKENS.set(0.0);
        debug!("Corpus snapshot invalidated");
    }

    /// Return a snapshot matching the store's current fingerprint,
    /// rebuilding it first if necessary.
    pub async fn snapshot(&self) -> Result<Arc<CorpusSnapshot>> {
        let fingerprint = self.fingerprint().await?;
        match self.fresh_snapshot(fingerprint).await {
            Ok(snapshot) => Ok(snapshot),
            Err(RagError::CorpusCacheStale) => self.rebuild().await,
            Err(e) => Err(e),
        }
    }

    /// Tokenize `query` and score it against a fresh snapshot.
    pub async fn score(&self, query: &str) -> Result<Vec<(ChunkId, f32)>> {
        let tokens = self.tokenizer.tokenize(query);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        self.snapshot().await?.score(&tokens)
    }

    async fn fingerprint(&self) -> Result<Fingerprint> {
        with_timeout("corpus fingerprint", self.store_timeout, self.store.fingerprint()).await
    }

    async fn fresh_snapshot(&self, fingerprint: Fingerprint) -> Result<Arc<CorpusSnapshot>> {
        match self.current.read().await.as_ref() {
            Some(snapshot) if snapshot.fingerprint == fingerprint => Ok(Arc::clone(snapshot)),
            Some(snapshot) => {
                debug!(
                    cached_count = snapshot.fingerprint.document_count,
                    cached_revision = snapshot.fingerprint.revision,
                    store_count = fingerprint.document_count,
                    store_revision = fingerprint.revision,
                    "Corpus snapshot is stale"
                );
                Err(RagError::CorpusCacheStale)
            }
            None => Err(RagError::CorpusCacheStale),
        }
    }

    async fn rebuild(&self) -> Result<Arc<CorpusSnapshot>> {
        let _rebuild = self.rebuild_lock.lock().await;

        // Another caller may have rebuilt while we waited
        let fingerprint = self.fingerprint().await?;
        if let Ok(snapshot) = self.fresh_snapshot(fingerprint).await {
            return Ok(snapshot);
        }

        let start = Instant::now();
        let timeout = self.config.rebuild_timeout();
        let snapshot = match with_timeout("corpus rebuild", timeout, self.load(fingerprint)).await {
            Ok(snapshot) => Arc::new(snapshot),
            Err(e) => {
                warn!(error = %e, "Corpus rebuild failed; keeping previous snapshot");
                return Err(e);
            }
        };

        *self.current.write().await = Some(Arc::clone(&snapshot));

        let elapsed = start.elapsed();
        CORPUS_REBUILDS.inc();
        CORPUS_REBUILD_LATENCY.observe(elapsed.as_secs_f64());
        CORPUS_TOKENS.set(snapshot.total_tokens as f64);
        info!(
            documents = snapshot.len(),
            tokens = snapshot.total_tokens,
            revision = fingerprint.revision,
            elapsed_ms = elapsed.as_millis() as u64,
            "Corpus snapshot rebuilt"
        );

        Ok(snapshot)
    }

    async fn load(&self, fingerprint: Fingerprint) -> Result<CorpusSnapshot> {
        if let Some(limit) = self.config.max_documents {
            if fingerprint.document_count > limit {
                return Err(RagError::CorpusTooLarge {
                    what: "documents",
                    limit,
                    actual: fingerprint.document_count,
                });
            }
        }

        let mut stream = self.store.all_documents().await?;
        let mut documents = Vec::with_capacity(fingerprint.document_count);
        let mut total_tokens = 0usize;

        while let Some((chunk_id, content)) = stream.try_next().await? {
            let tokens = self.tokenizer.tokenize(&content);
            total_tokens += tokens.len();
            documents.push(TokenizedDocument::new(chunk_id, tokens));
            self.check_limits(documents.len(), total_tokens)?;
        }

        let (documents, index) = tokio::task::spawn_blocking(move || {
            let index = KeywordIndex::build(&documents)?;
            Ok::<_, anyhow::Error>((documents, index))
        })
        .await
        .map_err(|e| anyhow::anyhow!("Keyword index build task failed: {}", e))??;

        Ok(CorpusSnapshot {
            documents,
            fingerprint,
            total_tokens,
            index,
        })
    }

    fn check_limits(&self, documents: usize, tokens: usize) -> Result<()> {
        if let Some(limit) = self.config.max_documents {
            if documents > limit {
                return Err(RagError::CorpusTooLarge {
                    what: "documents",
                    limit,
                    actual: documents,
                });
            }
        }
        if let Some(limit) = self.config.max_tokens {
            if tokens > limit {
                return Err(RagError::CorpusTooLarge {
                    what: "tokens",
                    limit,
                    actual: tokens,
                });
            }
        }
        Ok(())
    }
}
