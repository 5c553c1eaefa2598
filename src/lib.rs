pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod metrics;
pub mod search;
pub mod storage;

pub use chunking::{ChunkDraft, Chunker, ParagraphChunker};
pub use config::{Config, SearchMode};
pub use embeddings::{EmbeddingProvider, MockEmbedder};
pub use error::{RagError, Result};
pub use ingest::{IngestReport, Ingestor};
pub use search::{CorpusCache, HybridRetriever, RrfFusion, ScoredResult};
pub use storage::{ChunkId, Metadata, MetadataValue, NewChunk, VectorStore};
