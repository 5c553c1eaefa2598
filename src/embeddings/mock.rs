use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::provider::EmbeddingProvider;

/// Mock embedding provider for testing.
///
/// Vectors are seeded from a hash of the text, so equal texts always map to
/// the same unit vector. The provider can be switched offline to simulate
/// an unreachable model, and it counts the calls it receives.
pub struct MockEmbedder {
    dimension: usize,
    available: AtomicBool,
    calls: AtomicUsize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            available: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    /// A provider whose every call fails.
    pub fn unavailable(dimension: usize) -> Self {
        let embedder = Self::new(dimension);
        embedder.set_available(false);
        embedder
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of `embed`/`embed_batch` calls received, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn text_to_vector(&self, text: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut seed = hasher.finish();

        let mut vector = Vec::with_capacity(self.dimension);
        for _ in 0..self.dimension {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            // Map the top bits to [-1, 1)
            let value = ((seed >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0;
            vector.push(value);
        }

        let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for v in vector.iter_mut() {
                *v /= magnitude;
            }
        }

        vector
    }

    fn check_available(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.available.load(Ordering::SeqCst) {
            bail!("mock embedding provider is offline");
        }
        Ok(())
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.check_available()?;
        Ok(self.text_to_vector(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.check_available()?;
        Ok(texts.iter().map(|t| self.text_to_vector(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}
