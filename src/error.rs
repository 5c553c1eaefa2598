//! Error taxonomy for the retrieval engine.
//!
//! Input validation problems, external provider failures and storage-layer
//! failures are kept apart so callers can decide what to retry.

use std::time::Duration;

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, RagError>;

/// Errors surfaced by the store, the keyword index and the retriever.
#[derive(Debug, Error)]
pub enum RagError {
    /// Embedding length does not match the store's configured dimension.
    /// Never retried and never coerced.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The embedding provider failed. Retryable by the caller.
    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The corpus snapshot no longer matches the store. Handled internally by
    /// a rebuild and never returned from a public operation.
    #[error("corpus cache is stale")]
    CorpusCacheStale,

    /// A bounded wait elapsed.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The legacy-to-current layout upgrade could not complete. The legacy
    /// table is left untouched and stays readable.
    #[error("schema migration failed: {0}")]
    SchemaMigrationFailed(String),

    /// The store is still on the legacy layout and only serves reads.
    #[error("store is on the legacy layout; migrate before writing")]
    ReadOnlyLegacyLayout,

    /// Loading the corpus would exceed the configured memory bound.
    #[error("corpus too large: {what} {actual} exceeds limit {limit}")]
    CorpusTooLarge {
        what: &'static str,
        limit: usize,
        actual: usize,
    },

    /// Underlying storage or index failure.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl RagError {
    /// Whether a caller may reasonably retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RagError::EmbeddingUnavailable(_) | RagError::Timeout { .. }
        )
    }
}

/// Await `fut`, mapping an elapsed deadline to [`RagError::Timeout`].
pub(crate) async fn with_timeout<T, F>(
    operation: &'static str,
    after: Duration,
    fut: F,
) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(RagError::Timeout { operation, after }),
    }
}
