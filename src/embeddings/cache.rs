//! Time-bounded cache of query embeddings.
//!
//! Repeated queries skip the provider round trip. Entries expire after the
//! configured TTL; when the cache is full the least recently used entry is
//! evicted.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

use super::provider::EmbeddingProvider;
use crate::config::CacheConfig;
use crate::metrics::{EMBEDDING_CACHE_HITS, EMBEDDING_LATENCY, EMBEDDING_REQUESTS};

struct CacheEntry {
    vector: Arc<Vec<f32>>,
    inserted_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() >= ttl
    }
}

pub struct QueryEmbeddingCache {
    /// `None` when caching is disabled
    entries: Option<Mutex<LruCache<String, CacheEntry>>>,
    ttl: Duration,
}

impl QueryEmbeddingCache {
    pub fn new(config: &CacheConfig) -> Self {
        let entries = if config.enabled {
            NonZeroUsize::new(config.max_entries).map(|capacity| Mutex::new(LruCache::new(capacity)))
        } else {
            None
        };

        Self {
            entries,
            ttl: Duration::from_secs(config.ttl_seconds),
        }
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self {
            entries: None,
            ttl: Duration::ZERO,
        }
    }

    /// Return the cached embedding for `text`, calling the provider on a miss.
    ///
    /// Provider errors are passed through and nothing is cached for them.
    pub async fn get_or_embed(
        &self,
        provider: &dyn EmbeddingProvider,
        text: &str,
    ) -> anyhow::Result<Arc<Vec<f32>>> {
        if let Some(vector) = self.get(text).await {
            EMBEDDING_CACHE_HITS.inc();
            return Ok(vector);
        }

        EMBEDDING_REQUESTS.inc();
        let timer = EMBEDDING_LATENCY.start_timer();
        let vector = Arc::new(provider.embed(text).await?);
        timer.observe_duration();

        self.insert(text, Arc::clone(&vector)).await;
        Ok(vector)
    }

    pub async fn get(&self, text: &str) -> Option<Arc<Vec<f32>>> {
        let mut entries = self.entries.as_ref()?.lock().await;
        let hit = entries
            .get(text)
            .map(|entry| (Arc::clone(&entry.vector), entry.is_expired(self.ttl)));
        match hit {
            Some((vector, false)) => Some(vector),
            Some((_, true)) => {
                entries.pop(text);
                None
            }
            None => None,
        }
    }

    async fn insert(&self, text: &str, vector: Arc<Vec<f32>>) {
        let Some(entries) = &self.entries else {
            return;
        };

        let entry = CacheEntry {
            vector,
            inserted_at: Instant::now(),
        };
        if let Some((evicted, _)) = entries.lock().await.push(text.to_string(), entry) {
            if evicted != text {
                debug!("Evicting query embedding for {:?}", evicted);
            }
        }
    }

    pub async fn len(&self) -> usize {
        match &self.entries {
            Some(entries) => entries.lock().await.len(),
            None => 0,
        }
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn clear(&self) {
        if let Some(entries) = &self.entries {
            entries.lock().await.clear();
        }
    }
}
