//! Cross-encoder verification stage

use super::{score_in_batches, ScorerHandle};
use crate::stage::StageOutcome;
use docrag_common::RetrievedChunk;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Filters chunks whose verification score falls below a threshold
pub struct Verifier {
    handle: Arc<ScorerHandle>,
    batch_size: usize,
}

impl Verifier {
    pub fn new(handle: Arc<ScorerHandle>, batch_size: usize) -> Self {
        Self { handle, batch_size: batch_size.max(1) }
    }

    pub async fn is_available(&self) -> bool {
        self.handle.is_available().await
    }

    /// Score every chunk, drop those below `threshold`, sort descending and
    /// keep `top_k`.
    pub async fn verify(
        &self,
        query: &str,
        mut chunks: Vec<RetrievedChunk>,
        threshold: f32,
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

        let scores = match score_in_batches(encoder.as_ref(), query, &chunks, self.batch_size).await {
            Ok(scores) => scores,
            Err(e) => {
                warn!(error = %e, model = %encoder.model_name(), "Verification failed, keeping input order");
                chunks.truncate(top_k);
                return StageOutcome::failed(chunks, e);
            }
        };

        let mut verified: Vec<RetrievedChunk> = chunks
            .into_iter()
            .zip(scores)
            .filter(|(_, score)| *score >= threshold)
            .map(|(mut chunk, score)| {
                chunk.score = score;
                chunk
            })
            .collect();

        verified.sort_by(|a, b| b.score.total_cmp(&a.score));
        verified.truncate(top_k);

        info!(
            input_count,
            output_count = verified.len(),
            filtered = input_count - verified.len(),
            threshold,
            duration_ms = start.elapsed().as_millis() as u64,
            "Verification completed"
        );

        StageOutcome::ok(verified)
    }

    /// Score one (query, passage) pair; 0.0 when the model is unavailable or fails
    pub async fn score_pair(&self, query: &str, text: &str) -> f32 {
        let Some(encoder) = self.handle.get().await else {
            return 0.0;
        };

        let pair = [(query.to_string(), text.to_string())];
        match encoder.score_batch(&pair).await {
            Ok(scores) => scores.first().copied().filter(|s| s.is_finite()).unwrap_or(0.0),
            Err(e) => {
                debug!(error = %e, "Pair scoring failed");
                0.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::tests::chunk;
    use crate::scoring::MockCrossEncoder;

    fn verifier(encoder: MockCrossEncoder) -> Verifier {
        Verifier::new(Arc::new(ScorerHandle::ready(Arc::new(encoder))), 16)
    }

    fn signed() -> MockCrossEncoder {
        MockCrossEncoder::new(|_, passage| match passage {
            "good" => 3.5,
            "fine" => 0.0,
            _ => -2.0,
        })
    }

    #[tokio::test]
    async fn test_filters_below_threshold() {
        let chunks = vec![chunk("a", "bad", 0.9), chunk("b", "fine", 0.8), chunk("c", "good", 0.1)];
        let outcome = verifier(signed()).verify("query", chunks, 0.0, 10).await;

        assert!(outcome.succeeded);
        let ids: Vec<_> = outcome.output.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
        assert!(outcome.output.iter().all(|c| c.score >= 0.0));
    }

    #[tokio::test]
    async fn test_everything_filtered() {
        let chunks = vec![chunk("a", "bad", 0.9), chunk("b", "worse", 0.8)];
        let outcome = verifier(signed()).verify("query", chunks, 0.0, 10).await;

        assert!(outcome.succeeded);
        assert!(outcome.output.is_empty());
    }

    #[tokio::test]
    async fn test_respects_top_k_and_batches() {
        let encoder = Arc::new(MockCrossEncoder::new(|_, passage| passage.len() as f32));
        let verifier = Verifier::new(Arc::new(ScorerHandle::ready(encoder.clone())), 16);

        let chunks: Vec<_> = (1..=20).map(|i| chunk(&i.to_string(), &"x".repeat(i), 0.0)).collect();
        let outcome = verifier.verify("query", chunks, 0.0, 10).await;

        assert_eq!(outcome.output.len(), 10);
        assert_eq!(outcome.output[0].chunk_id, "20");
        assert_eq!(encoder.batches(), 2);
    }

    #[tokio::test]
    async fn test_failure_passes_input_through() {
        let chunks: Vec<_> = (0..12).map(|i| chunk(&i.to_string(), "text", 0.5)).collect();
        let outcome = verifier(MockCrossEncoder::failing()).verify("query", chunks, 0.0, 10).await;

        assert!(!outcome.succeeded);
        assert_eq!(outcome.output.len(), 10);
        assert_eq!(outcome.output[0].chunk_id, "0");
    }

    #[tokio::test]
    async fn test_score_pair() {
        assert_eq!(verifier(signed()).score_pair("query", "good").await, 3.5);
        assert_eq!(verifier(MockCrossEncoder::failing()).score_pair("query", "good").await, 0.0);

        let unavailable = Verifier::new(Arc::new(ScorerHandle::unavailable("minilm")), 16);
        assert!(!unavailable.is_available().await);
        assert_eq!(unavailable.score_pair("query", "good").await, 0.0);
    }
}
