use anyhow::Result;
use std::sync::Arc;
use tempfile::TempDir;

use docrag::embeddings::EmbeddingProvider;
use docrag::{ChunkId, Config, HybridRetriever, MockEmbedder, NewChunk, VectorStore};

pub const TEST_DIMENSION: usize = 16;

pub struct TestHarness {
    pub temp_dir: TempDir,
    pub store: Arc<VectorStore>,
    pub embedder: Arc<MockEmbedder>,
    pub config: Config,
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        Self::with_embedder(MockEmbedder::new(TEST_DIMENSION)).await
    }

    pub async fn with_embedder(embedder: MockEmbedder) -> Result<Self> {
        docrag::logging::init_early_logging();

        let temp_dir = TempDir::new()?;
        let config = Config::default();

        let db_path = temp_dir.path().join("test.lance");
        let store = Arc::new(VectorStore::new(&db_path, TEST_DIMENSION).await?);

        Ok(Self {
            temp_dir,
            store,
            embedder: Arc::new(embedder),
            config,
        })
    }

    pub fn retriever(&self) -> HybridRetriever {
        HybridRetriever::new(
            Arc::clone(&self.store),
            Arc::clone(&self.embedder) as Arc<dyn EmbeddingProvider>,
            &self.config,
        )
    }

    /// Store `texts` with mock embeddings. Works even when the harness
    /// embedder is offline.
    pub async fn insert_texts(&self, texts: &[&str]) -> Result<Vec<ChunkId>> {
        let mut chunks = Vec::with_capacity(texts.len());
        for text in texts {
            chunks.push(NewChunk::new(*text, mock_vector(text).await));
        }
        Ok(self.store.add(chunks).await?)
    }
}

/// Deterministic embedding for `text`, identical to what an online
/// harness embedder returns.
pub async fn mock_vector(text: &str) -> Vec<f32> {
    MockEmbedder::new(TEST_DIMENSION)
        .embed(text)
        .await
        .expect("online mock embedder never fails")
}
