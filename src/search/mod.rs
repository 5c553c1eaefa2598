//! Retrieval over the stored chunks.
//!
//! This module contains:
//! - `tokenizer` - lower-case alphanumeric tokenization shared by corpus and queries
//! - `bm25` - in-memory BM25 keyword index using Tantivy
//! - `corpus` - fingerprint-checked corpus snapshot cache feeding the keyword index
//! - `fusion` - Reciprocal Rank Fusion of the vector and keyword rankings
//! - `hybrid` - the [`HybridRetriever`] query entry point

pub mod bm25;
pub mod corpus;
pub mod fusion;
pub mod hybrid;
pub mod tokenizer;

// Re-export commonly used types
pub use bm25::{KeywordIndex, TokenizedDocument};
pub use corpus::{CacheStatus, CorpusCache, CorpusSnapshot};
pub use fusion::{FusedHit, RrfFusion};
pub use hybrid::{HybridRetriever, ScoredResult};
pub use tokenizer::Tokenizer;
