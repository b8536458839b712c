//! Cross-encoder scoring
//!
//! Provides:
//! - `CrossEncoder` trait for pairwise (query, passage) relevance models
//! - HTTP client for a scoring service
//! - Lazily initialized, process-wide model handles
//! - Batched scoring shared by the re-ranker and the verifier

mod rerank;
mod verify;

pub use rerank::Reranker;
pub use verify::Verifier;

use async_trait::async_trait;
use docrag_common::config::ScorerConfig;
use docrag_common::errors::{AppError, Result};
use docrag_common::RetrievedChunk;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// Pairwise relevance model
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// One score per (query, passage) pair, in input order
    async fn score_batch(&self, pairs: &[(String, String)]) -> Result<Vec<f32>>;

    fn model_name(&self) -> &str;
}

/// Client for a cross-encoder scoring service
pub struct HttpCrossEncoder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

#[derive(Serialize)]
struct ScoreRequest<'a> {
    pairs: Vec<[&'a str; 2]>,
}

#[derive(Deserialize)]
struct ScoreResponse {
    scores: Vec<f32>,
}

impl HttpCrossEncoder {
    /// Build the client and probe the service health endpoint
    pub async fn connect(config: &ScorerConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or_else(|| AppError::ScorerUnavailable { model: config.model.clone() })?
            .trim_end_matches('/')
            .to_string();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let healthy = client
            .get(format!("{}/health", endpoint))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false);

        if !healthy {
            return Err(AppError::ScorerUnavailable { model: config.model.clone() });
        }

        Ok(Self { client, endpoint, model: config.model.clone() })
    }
}

#[async_trait]
impl CrossEncoder for HttpCrossEncoder {
    async fn score_batch(&self, pairs: &[(String, String)]) -> Result<Vec<f32>> {
        let request = ScoreRequest {
            pairs: pairs.iter().map(|(q, p)| [q.as_str(), p.as_str()]).collect(),
        };

        let response = self.client
            .post(format!("{}/score", self.endpoint))
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Scoring { message: format!("Scoring request failed: {}", e) })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Scoring {
                message: format!("Scoring service error {}: {}", status, body),
            });
        }

        let result: ScoreResponse = response
            .json()
            .await
            .map_err(|e| AppError::Scoring { message: format!("Failed to parse scores: {}", e) })?;

        Ok(result.scores)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

type ScoreFn = Box<dyn Fn(&str, &str) -> f32 + Send + Sync>;

/// Mock cross-encoder scoring pairs with a closure
pub struct MockCrossEncoder {
    score: Option<ScoreFn>,
    batches: AtomicUsize,
}

impl MockCrossEncoder {
    pub fn new(score: impl Fn(&str, &str) -> f32 + Send + Sync + 'static) -> Self {
        Self { score: Some(Box::new(score)), batches: AtomicUsize::new(0) }
    }

    /// Scores by how many query words occur in the passage
    pub fn word_overlap() -> Self {
        Self::new(|query, passage| {
            let passage = passage.to_lowercase();
            query
                .to_lowercase()
                .split_whitespace()
                .filter(|word| passage.contains(word))
                .count() as f32
        })
    }

    /// Every batch fails
    pub fn failing() -> Self {
        Self { score: None, batches: AtomicUsize::new(0) }
    }

    /// Number of `score_batch` calls
    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CrossEncoder for MockCrossEncoder {
    async fn score_batch(&self, pairs: &[(String, String)]) -> Result<Vec<f32>> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        match &self.score {
            Some(score) => Ok(pairs.iter().map(|(q, p)| score(q, p)).collect()),
            None => Err(AppError::Scoring { message: "mock cross-encoder failure".to_string() }),
        }
    }

    fn model_name(&self) -> &str {
        "mock-cross-encoder"
    }
}

/// Loads a cross-encoder on first use
pub type ScorerLoader = Box<dyn Fn() -> BoxFuture<'static, Result<Arc<dyn CrossEncoder>>> + Send + Sync>;

/// Shared, lazily initialized model handle.
///
/// The loader runs at most once; concurrent first callers wait for the same
/// attempt. A failed load is remembered and the handle stays unavailable.
pub struct ScorerHandle {
    model: String,
    cell: OnceCell<Option<Arc<dyn CrossEncoder>>>,
    loader: Option<ScorerLoader>,
}

impl ScorerHandle {
    pub fn new(model: impl Into<String>, loader: ScorerLoader) -> Self {
        Self { model: model.into(), cell: OnceCell::new(), loader: Some(loader) }
    }

    /// Handle around an already loaded model
    pub fn ready(encoder: Arc<dyn CrossEncoder>) -> Self {
        Self {
            model: encoder.model_name().to_string(),
            cell: OnceCell::new_with(Some(Some(encoder))),
            loader: None,
        }
    }

    /// Handle that never has a model
    pub fn unavailable(model: impl Into<String>) -> Self {
        Self { model: model.into(), cell: OnceCell::new_with(Some(None)), loader: None }
    }

    /// Handle for a configured scoring service
    pub fn from_config(config: &ScorerConfig) -> Self {
        if config.endpoint.is_none() {
            return Self::unavailable(config.model.clone());
        }

        let config = config.clone();
        Self::new(
            config.model.clone(),
            Box::new(move || {
                let config = config.clone();
                Box::pin(async move {
                    let encoder = HttpCrossEncoder::connect(&config).await?;
                    Ok(Arc::new(encoder) as Arc<dyn CrossEncoder>)
                })
            }),
        )
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    /// The model, loading it on first call
    pub async fn get(&self) -> Option<Arc<dyn CrossEncoder>> {
        self.cell
            .get_or_init(|| async {
                let Some(loader) = &self.loader else {
                    return None;
                };
                match loader().await {
                    Ok(encoder) => {
                        info!(model = %self.model, "Cross-encoder model loaded");
                        Some(encoder)
                    }
                    Err(e) => {
                        warn!(model = %self.model, error = %e, "Cross-encoder model not available");
                        None
                    }
                }
            })
            .await
            .clone()
    }

    pub async fn is_available(&self) -> bool {
        self.get().await.is_some()
    }
}

/// Score chunks against a query in fixed-size batches.
///
/// Fails on the first batch error, on a score count mismatch and on any
/// non-finite score.
pub async fn score_in_batches(
    encoder: &dyn CrossEncoder,
    query: &str,
    chunks: &[RetrievedChunk],
    batch_size: usize,
) -> Result<Vec<f32>> {
    let pairs: Vec<(String, String)> = chunks
        .iter()
        .map(|chunk| (query.to_string(), chunk.text.clone()))
        .collect();

    let mut scores = Vec::with_capacity(pairs.len());
    for batch in pairs.chunks(batch_size.max(1)) {
        let batch_scores = encoder.score_batch(batch).await?;

        if batch_scores.len() != batch.len() {
            return Err(AppError::Scoring {
                message: format!("expected {} scores, got {}", batch.len(), batch_scores.len()),
            });
        }
        if let Some(bad) = batch_scores.iter().find(|s| !s.is_finite()) {
            return Err(AppError::Scoring { message: format!("non-finite score {}", bad) });
        }

        scores.extend(batch_scores);
    }

    Ok(scores)
}
