//! Query embedding clients
//!
//! Provides:
//! - The `Embedder` trait the dense side of hybrid retrieval searches with
//! - An OpenAI-compatible `/embeddings` client with retry on transient failures
//! - A deterministic mock for tests and offline runs

use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Inputs per `/embeddings` request
const MAX_INPUTS_PER_REQUEST: usize = 64;

/// Dense text encoder
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts, preserving order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn model_name(&self) -> &str;

    fn dimension(&self) -> usize;
}

/// Client for OpenAI-compatible embedding endpoints
pub struct OpenAiEmbedder {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimension: usize,
    timeout: Duration,
    max_retries: u32,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
            message: "embedding.api_key is required for the openai provider".to_string(),
        })?;

        let timeout = Duration::from_secs(config.timeout_secs);
        let base = config.api_base.as_deref().unwrap_or(DEFAULT_API_BASE);

        Ok(Self {
            http: reqwest::Client::builder().timeout(timeout).build()?,
            endpoint: format!("{}/embeddings", base.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            dimension: config.dimension,
            timeout,
            max_retries: config.max_retries,
        })
    }

    /// One request, retried with exponential backoff while the failure is
    /// transient and attempts remain
    async fn embed_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(100),
            max_elapsed_time: Some(self.timeout * (self.max_retries + 1)),
            ..ExponentialBackoff::default()
        };

        let mut attempts = 0u32;
        retry(policy, || {
            attempts += 1;
            let attempt = attempts;
            async move {
                self.request(texts).await.map_err(|failure| match failure {
                    Failure::Transient(e) if attempt <= self.max_retries => {
                        tracing::warn!(
                            attempt,
                            max_retries = self.max_retries,
                            error = %e,
                            "Embedding request failed, retrying"
                        );
                        backoff::Error::transient(e)
                    }
                    Failure::Transient(e) | Failure::Permanent(e) => backoff::Error::permanent(e),
                })
            }
        })
        .await
    }

    async fn request(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, Failure> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest { model: &self.model, input: texts })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Failure::Transient(AppError::EmbeddingTimeout {
                        timeout_ms: self.timeout.as_millis() as u64,
                    })
                } else {
                    Failure::Transient(embedding_error(format!("request failed: {}", e)))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = embedding_error(format!("endpoint returned {}: {}", status, body));
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                Failure::Transient(error)
            } else {
                Failure::Permanent(error)
            });
        }

        let mut body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Failure::Permanent(embedding_error(format!("malformed response: {}", e))))?;

        if body.data.len() != texts.len() {
            return Err(Failure::Permanent(embedding_error(format!(
                "{} inputs produced {} embeddings",
                texts.len(),
                body.data.len()
            ))));
        }

        body.data.sort_by_key(|item| item.index);
        Ok(body.data.into_iter().map(|item| item.embedding).collect())
    }
}

enum Failure {
    Transient(AppError),
    Permanent(AppError),
}

fn embedding_error(message: String) -> AppError {
    AppError::EmbeddingError { message }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_with_retry(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| embedding_error("endpoint returned no embedding".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for group in texts.chunks(MAX_INPUTS_PER_REQUEST) {
            vectors.extend(self.embed_with_retry(group).await?);
        }
        Ok(vectors)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic unit-length vectors seeded from the SHA-256 of the text
pub struct MockEmbedder {
    dimension: usize,
    fail: bool,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension, fail: false }
    }

    /// Every call fails with an embedding error
    pub fn failing(dimension: usize) -> Self {
        Self { dimension, fail: true }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let mut rng = StdRng::from_seed(Sha256::digest(text.as_bytes()).into());
        let raw: Vec<f32> = (0..self.dimension).map(|_| rng.gen_range(-1.0..1.0)).collect();

        let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            return raw;
        }
        raw.into_iter().map(|x| x / norm).collect()
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.fail {
            return Err(embedding_error("mock embedder configured to fail".to_string()));
        }
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Build the configured embedder; unknown providers fall back to the mock
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        "mock" => Ok(Arc::new(MockEmbedder::new(config.dimension))),
        other => {
            tracing::warn!(provider = other, "Unknown embedding provider, using mock");
            Ok(Arc::new(MockEmbedder::new(config.dimension)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_vectors_are_unit_length() {
        let embedder = MockEmbedder::new(64);
        let vector = embedder.embed("router factory reset").await.unwrap();

        assert_eq!(vector.len(), 64);
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_mock_is_deterministic() {
        let embedder = MockEmbedder::new(32);
        let a = embedder.embed("installation guide").await.unwrap();
        let b = embedder.embed("installation guide").await.unwrap();
        let c = embedder.embed("release notes").await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_batch_matches_single_calls() {
        let embedder = MockEmbedder::new(16);
        let texts = vec!["warranty terms".to_string(), "firmware update".to_string()];

        let batch = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1], embedder.embed("firmware update").await.unwrap());
    }

    #[tokio::test]
    async fn test_failing_mock_is_a_retrieval_failure() {
        let embedder = MockEmbedder::failing(8);
        let err = embedder.embed("anything").await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_openai_requires_key() {
        let config = EmbeddingConfig::default();
        assert!(create_embedder(&config).is_err());

        let config = EmbeddingConfig { provider: "mock".to_string(), dimension: 16, ..EmbeddingConfig::default() };
        assert_eq!(create_embedder(&config).unwrap().dimension(), 16);
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let config = EmbeddingConfig {
            api_key: Some("sk-test".to_string()),
            api_base: Some("http://localhost:8080/v1/".to_string()),
            ..EmbeddingConfig::default()
        };
        let embedder = OpenAiEmbedder::new(&config).unwrap();
        assert_eq!(embedder.endpoint, "http://localhost:8080/v1/embeddings");
    }
}
