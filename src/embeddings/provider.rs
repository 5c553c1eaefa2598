use anyhow::Result;
use async_trait::async_trait;

/// Core trait for embedding providers.
///
/// Implementations wrap a model (local or remote). Every returned vector
/// must have exactly [`dimension`](Self::dimension) components; callers
/// validate this before anything is stored or searched.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text, typically a query
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts, preserving input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Dimension of the vectors this provider produces
    fn dimension(&self) -> usize;

    /// Provider name for logging and metrics
    fn provider_name(&self) -> &'static str;
}
