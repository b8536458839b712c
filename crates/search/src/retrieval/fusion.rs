//! Weighted Reciprocal Rank Fusion (RRF) for combining dense and sparse results
//!
//! RRF only looks at ranks, so the cosine scores of the dense list and the
//! BM25 dot products of the sparse list never have to be normalized against
//! each other.

use docrag_common::RetrievedChunk;
use std::collections::HashMap;

/// RRF fusion parameters
#[derive(Debug, Clone)]
pub struct RRFusion {
    /// Constant k (typically 60)
    pub k: f32,

    /// Weight for dense results
    pub dense_weight: f32,

    /// Weight for sparse results
    pub sparse_weight: f32,
}

impl Default for RRFusion {
    fn default() -> Self {
        Self {
            k: 60.0,
            dense_weight: 0.6,
            sparse_weight: 0.4,
        }
    }
}

/// Result of fusion
#[derive(Debug, Clone)]
pub struct FusionResult {
    pub chunk: RetrievedChunk,
    pub dense_rank: Option<usize>,
    pub sparse_rank: Option<usize>,
    pub rrf_score: f32,
}

impl RRFusion {
    /// Create with custom weights
    pub fn with_weights(dense_weight: f32, sparse_weight: f32) -> Self {
        Self {
            dense_weight,
            sparse_weight,
            ..Self::default()
        }
    }

    /// Fuse dense and sparse candidate lists.
    ///
    /// Each list holds at most one entry per `chunk_id`, with `score` set to
    /// the raw store score. Ranks are 1-based by descending score; equal
    /// scores keep list order. The fused chunk carries the dense payload when
    /// both lists contain it.
    pub fn fuse(
        &self,
        mut dense_results: Vec<RetrievedChunk>,
        mut sparse_results: Vec<RetrievedChunk>,
        limit: usize,
    ) -> Vec<FusionResult> {
        dense_results.sort_by(|a, b| b.score.total_cmp(&a.score));
        sparse_results.sort_by(|a, b| b.score.total_cmp(&a.score));

        let mut results: Vec<FusionResult> = Vec::with_capacity(dense_results.len() + sparse_results.len());
        let mut positions: HashMap<String, usize> = HashMap::new();

        for (rank, mut chunk) in dense_results.into_iter().enumerate() {
            chunk.dense_score = chunk.score;
            chunk.sparse_score = 0.0;
            positions.insert(chunk.chunk_id.clone(), results.len());
            results.push(FusionResult {
                chunk,
                dense_rank: Some(rank + 1),
                sparse_rank: None,
                rrf_score: 0.0,
            });
        }

        for (rank, mut chunk) in sparse_results.into_iter().enumerate() {
            match positions.get(&chunk.chunk_id) {
                Some(&pos) => {
                    results[pos].sparse_rank = Some(rank + 1);
                    results[pos].chunk.sparse_score = chunk.score;
                }
                None => {
                    chunk.sparse_score = chunk.score;
                    chunk.dense_score = 0.0;
                    positions.insert(chunk.chunk_id.clone(), results.len());
                    results.push(FusionResult {
                        chunk,
                        dense_rank: None,
                        sparse_rank: Some(rank + 1),
                        rrf_score: 0.0,
                    });
                }
            }
        }

        for result in &mut results {
            let dense_rrf = result.dense_rank
                .map(|r| self.dense_weight / (self.k + r as f32))
                .unwrap_or(0.0);

            let sparse_rrf = result.sparse_rank
                .map(|r| self.sparse_weight / (self.k + r as f32))
                .unwrap_or(0.0);

            result.rrf_score = dense_rrf + sparse_rrf;
            result.chunk.score = result.rrf_score;
        }

        // Sort by RRF score descending, chunk id breaks ties
        results.sort_by(|a, b| {
            b.rrf_score
                .total_cmp(&a.rrf_score)
                .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
        });

        results.truncate(limit);
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_chunk(id: &str, score: f32, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            text: text.to_string(),
            file_id: 1,
            file_name: "guide.pdf".to_string(),
            page: 1,
            chunk_id: id.to_string(),
            chunk_index: 0,
            score,
            dense_score: 0.0,
            sparse_score: 0.0,
            source: String::new(),
        }
    }

    #[test]
    fn test_rrf_fusion() {
        let fusion = RRFusion::default();

        // Dense:  [A (0.9), B (0.8), C (0.7)]
        // Sparse: [B (9.0), A (7.0), D (6.0)]
        let dense = vec![
            make_chunk("a", 0.9, "A"),
            make_chunk("b", 0.8, "B"),
            make_chunk("c", 0.7, "C"),
        ];
        let sparse = vec![
            make_chunk("b", 9.0, "B"),
            make_chunk("a", 7.0, "A"),
            make_chunk("d", 6.0, "D"),
        ];

        let results = fusion.fuse(dense, sparse, 10);
        assert_eq!(results.len(), 4);

        // A: dense rank 1, sparse rank 2
        assert_eq!(results[0].chunk.chunk_id, "a");
        assert_eq!(results[1].chunk.chunk_id, "b");

        let expected = 0.6 / 61.0 + 0.4 / 62.0;
        assert!((results[0].rrf_score - expected).abs() < 1e-7);
        assert_eq!(results[0].chunk.dense_score, 0.9);
        assert_eq!(results[0].chunk.sparse_score, 7.0);
    }

    #[test]
    fn test_both_lists_beat_one() {
        let fusion = RRFusion::default();
        let dense = vec![make_chunk("x", 0.9, ""), make_chunk("y", 0.8, "")];
        let sparse = vec![make_chunk("y", 3.0, "")];

        let results = fusion.fuse(dense, sparse, 10);
        assert_eq!(results[0].chunk.chunk_id, "y");
    }

    #[test]
    fn test_ranks_follow_scores_not_insertion() {
        let fusion = RRFusion::default();
        let dense = vec![make_chunk("low", 0.1, ""), make_chunk("high", 0.9, "")];

        let results = fusion.fuse(dense, vec![], 10);
        assert_eq!(results[0].chunk.chunk_id, "high");
        assert_eq!(results[0].dense_rank, Some(1));
        assert_eq!(results[1].dense_rank, Some(2));
    }

    #[test]
    fn test_dense_payload_preferred() {
        let fusion = RRFusion::default();
        let dense = vec![make_chunk("a", 0.5, "dense text")];
        let sparse = vec![make_chunk("a", 2.0, "sparse text")];

        let results = fusion.fuse(dense, sparse, 10);
        assert_eq!(results[0].chunk.text, "dense text");
    }

    #[test]
    fn test_ties_broken_by_chunk_id_and_truncated() {
        // Same rank in opposite lists with equal weights gives equal scores
        let fusion = RRFusion::with_weights(0.5, 0.5);
        let dense = vec![make_chunk("m", 0.9, "")];
        let sparse = vec![make_chunk("b", 4.0, "")];

        let results = fusion.fuse(dense, sparse, 1);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.chunk_id, "b");
    }
}
