//! Reciprocal Rank Fusion (RRF).
//!
//! Combines the vector and keyword rankings using
//! `score(d) = sum(1 / (k + rank))` over the lists containing `d`, with
//! 1-based ranks. Only ranks matter; raw similarity and BM25 values are not
//! comparable and are ignored.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::storage::ChunkId;

/// Default RRF constant (k parameter).
///
/// Higher values make the ranking smoother, lower values emphasize top ranks more.
pub const DEFAULT_RRF_K: f32 = 60.0;

/// A fused document with the ranks it held in each input list.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    pub chunk_id: ChunkId,
    pub score: f32,
    /// 1-based rank in the vector list, if present
    pub vector_rank: Option<usize>,
    /// 1-based rank in the keyword list, if present
    pub keyword_rank: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RrfFusion {
    /// The k constant in the RRF formula
    k: f32,
}

impl RrfFusion {
    /// Create RRF with default k=60.
    pub fn new() -> Self {
        Self { k: DEFAULT_RRF_K }
    }

    /// Create RRF with custom k value.
    pub fn with_k(k: f32) -> Self {
        Self { k }
    }

    pub fn k(&self) -> f32 {
        self.k
    }

    /// Fuse the vector and keyword rankings into one list of at most `limit` hits.
    ///
    /// Documents found by only one path still score. Ties are broken by the
    /// better vector rank (absent ranks last), then by lower chunk id. If an
    /// id repeats within one list only its first position counts.
    pub fn fuse(&self, vector: &[ChunkId], keyword: &[ChunkId], limit: usize) -> Vec<FusedHit> {
        if limit == 0 {
            return Vec::new();
        }

        let mut hits: HashMap<ChunkId, FusedHit> = HashMap::new();

        for (index, id) in vector.iter().enumerate() {
            let hit = hits.entry(*id).or_insert_with(|| FusedHit {
                chunk_id: *id,
                score: 0.0,
                vector_rank: None,
                keyword_rank: None,
            });
            if hit.vector_rank.is_none() {
                hit.vector_rank = Some(index + 1);
            }
        }

        for (index, id) in keyword.iter().enumerate() {
            let hit = hits.entry(*id).or_insert_with(|| FusedHit {
                chunk_id: *id,
                score: 0.0,
                vector_rank: None,
                keyword_rank: None,
            });
            if hit.keyword_rank.is_none() {
                hit.keyword_rank = Some(index + 1);
            }
        }

        let mut fused: Vec<FusedHit> = hits
            .into_values()
            .map(|mut hit| {
                let ranks: Vec<usize> = hit.vector_rank.into_iter().chain(hit.keyword_rank).collect();
                hit.score = rrf_score(&ranks, self.k);
                hit
            })
            .collect();

        fused.sort_by(compare_hits);
        fused.truncate(limit);
        fused
    }
}

impl Default for RrfFusion {
    fn default() -> Self {
        Self::new()
    }
}

fn compare_hits(a: &FusedHit, b: &FusedHit) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            let a_rank = a.vector_rank.unwrap_or(usize::MAX);
            let b_rank = b.vector_rank.unwrap_or(usize::MAX);
            a_rank.cmp(&b_rank)
        })
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}

/// Compute the RRF score for a set of 1-based ranks.
pub fn rrf_score(ranks: &[usize], k: f32) -> f32 {
    ranks.iter().map(|rank| 1.0 / (k + *rank as f32)).sum()
}
