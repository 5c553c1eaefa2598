use anyhow::Result;
use async_trait::async_trait;

use docrag::embeddings::EmbeddingProvider;

/// Provider that returns vectors of the wrong length.
pub struct WrongDimensionEmbedder {
    pub dimension: usize,
}

#[async_trait]
impl EmbeddingProvider for WrongDimensionEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![0.5; self.dimension])
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![0.5; self.dimension]).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &'static str {
        "wrong-dimension"
    }
}

/// Provider that never answers within any reasonable deadline.
pub struct StalledEmbedder {
    pub dimension: usize,
}

#[async_trait]
impl EmbeddingProvider for StalledEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Ok(vec![0.0; self.dimension])
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Ok(vec![vec![0.0; self.dimension]; texts.len()])
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &'static str {
        "stalled"
    }
}
