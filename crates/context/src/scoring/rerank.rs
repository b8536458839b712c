//! Cross-encoder re-ranking stage

use super::{score_in_batches, ScorerHandle};
use crate::stage::StageOutcome;
use docrag_common::RetrievedChunk;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Re-scores retrieved chunks with a cross-encoder and keeps the best
pub struct Reranker {
    handle: Arc<ScorerHandle>,
    batch_size: usize,
}

impl Reranker {
    pub fn new(handle: Arc<ScorerHandle>, batch_size: usize) -> Self {
        Self { handle, batch_size: batch_size.max(1) }
    }

    pub async fn is_available(&self) -> bool {
        self.handle.is_available().await
    }

    /// Replace each chunk's score with the cross-encoder score, sort
    /// descending and keep `top_k`.
    ///
    /// Without a model the input order is kept and truncated. A scoring
    /// failure does the same and reports the error.
    pub async fn rerank(
        &self,
        query: &str,
        mut chunks: Vec<RetrievedChunk>,
        top_k: usize,
    ) -> StageOutcome<Vec<RetrievedChunk>> {
        if chunks.is_empty() {
            return StageOutcome::ok(chunks);
        }

        let Some(encoder) = self.handle.get().await else {
            chunks.truncate(top_k);
            return StageOutcome::degraded(chunks);
        };

        let start = Instant::now();
        let input_count = chunks.len();

        match score_in_batches(encoder.as_ref(), query, &chunks, self.batch_size).await {
            Ok(scores) => {
                for (chunk, score) in chunks.iter_mut().zip(scores) {
                    chunk.score = score;
                }
                chunks.sort_by(|a, b| b.score.total_cmp(&a.score));
                chunks.truncate(top_k);

                info!(
                    input_count,
                    output_count = chunks.len(),
                    top_score = chunks.first().map(|c| c.score).unwrap_or_default(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Re-ranking completed"
                );
                StageOutcome::ok(chunks)
            }
            Err(e) => {
                warn!(error = %e, model = %encoder.model_name(), "Re-ranking failed, keeping retrieval order");
                chunks.truncate(top_k);
                StageOutcome::failed(chunks, e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::tests::chunk;
    use crate::scoring::MockCrossEncoder;

    fn reranker(encoder: MockCrossEncoder) -> Reranker {
        Reranker::new(Arc::new(ScorerHandle::ready(Arc::new(encoder))), 8)
    }

    #[tokio::test]
    async fn test_rerank_sorts_by_model_score() {
        let reranker = reranker(MockCrossEncoder::word_overlap());
        let chunks = vec![
            chunk("a", "nothing relevant", 0.9),
            chunk("b", "router reset steps", 0.5),
            chunk("c", "reset the device", 0.4),
        ];

        let outcome = reranker.rerank("router reset", chunks, 2).await;
        assert!(outcome.succeeded && !outcome.degraded);

        let ids: Vec<_> = outcome.output.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(outcome.output[0].score, 2.0);
    }

    #[tokio::test]
    async fn test_unavailable_model_truncates_in_order() {
        let reranker = Reranker::new(Arc::new(ScorerHandle::unavailable("bge-reranker")), 8);
        assert!(!reranker.is_available().await);

        let chunks: Vec<_> = (0..30).map(|i| chunk(&i.to_string(), "text", 1.0 - i as f32 / 100.0)).collect();
        let outcome = reranker.rerank("query", chunks, 20).await;

        assert!(outcome.succeeded && outcome.degraded);
        assert_eq!(outcome.output.len(), 20);
        assert_eq!(outcome.output[0].chunk_id, "0");
        assert_eq!(outcome.output[19].chunk_id, "19");
    }

    #[tokio::test]
    async fn test_scoring_failure_keeps_original_scores() {
        let reranker = reranker(MockCrossEncoder::failing());
        let chunks = vec![chunk("a", "first", 0.7), chunk("b", "second", 0.6), chunk("c", "third", 0.5)];

        let outcome = reranker.rerank("query", chunks, 2).await;
        assert!(!outcome.succeeded);
        assert!(outcome.error.is_some());
        assert_eq!(outcome.output.len(), 2);
        assert_eq!(outcome.output[0].score, 0.7);
    }

    #[tokio::test]
    async fn test_nan_score_is_a_failure() {
        let reranker = reranker(MockCrossEncoder::new(|_, _| f32::NAN));
        let outcome = reranker.rerank("query", vec![chunk("a", "text", 0.3)], 5).await;

        assert!(!outcome.succeeded);
        assert_eq!(outcome.output[0].score, 0.3);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let outcome = reranker(MockCrossEncoder::failing()).rerank("query", vec![], 5).await;
        assert!(outcome.succeeded);
        assert!(outcome.output.is_empty());
    }
}
