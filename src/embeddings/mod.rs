//! Embedding provider contract and helpers.
//!
//! - `provider` - the [`EmbeddingProvider`] trait implemented by model backends
//! - `mock` - deterministic hash-seeded provider for tests and demos
//! - `cache` - TTL cache for query embeddings

mod cache;
mod mock;
mod provider;

pub use cache::QueryEmbeddingCache;
pub use mock::MockEmbedder;
pub use provider::EmbeddingProvider;
