//! Configuration management for DocRAG services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with DOCRAG__)
//! - Configuration files (config/default, config/{DOCRAG_ENV}, config/local)
//! - Default values

mod rag;

pub use rag::RagConfig;

use crate::errors::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Language model configuration (query expansion)
    #[serde(default)]
    pub llm: LlmConfig,

    /// Vector store configuration
    #[serde(default)]
    pub vector_store: VectorStoreConfig,

    /// Cross-encoder scoring configuration
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Query expansion configuration
    #[serde(default)]
    pub expansion: ExpansionConfig,

    /// Default pipeline configuration
    #[serde(default)]
    pub rag: RagConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for logs
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Emit pipeline stage telemetry
    #[serde(default = "default_enabled")]
    pub telemetry_enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Provider: openai, none
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    /// Chat completions endpoint
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    /// API key
    pub api_key: Option<String>,

    /// Model name
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Sampling temperature
    #[serde(default = "default_llm_temperature")]
    pub temperature: f32,

    /// Maximum output tokens
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VectorStoreConfig {
    /// Provider: qdrant, memory
    #[serde(default = "default_store_provider")]
    pub provider: String,

    /// Qdrant gRPC URL
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Qdrant API key
    pub api_key: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,

    /// Prefix for per-user collection names
    #[serde(default = "default_collection_prefix")]
    pub collection_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScoringConfig {
    /// Re-ranking model service
    #[serde(default = "default_reranker")]
    pub reranker: ScorerConfig,

    /// Verification model service
    #[serde(default = "default_verifier")]
    pub verifier: ScorerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScorerConfig {
    /// Scoring service base URL (unset disables the model)
    pub endpoint: Option<String>,

    /// Model name reported in logs
    pub model: String,

    /// Pairs per scoring call
    pub batch_size: usize,

    /// Request timeout in seconds
    #[serde(default = "default_scorer_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExpansionConfig {
    /// Cache TTL in seconds
    #[serde(default = "default_expansion_ttl")]
    pub cache_ttl_secs: u64,

    /// Maximum cached queries
    #[serde(default = "default_expansion_capacity")]
    pub cache_max_entries: usize,

    /// Upper bound for one expansion LLM call in seconds
    #[serde(default = "default_expansion_timeout")]
    pub timeout_secs: u64,
}

// Default value functions
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "docrag".to_string() }
fn default_enabled() -> bool { true }
fn default_embedding_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { crate::DEFAULT_EMBEDDING_MODEL.to_string() }
fn default_embedding_dimension() -> usize { crate::DEFAULT_EMBEDDING_DIMENSION }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 3 }
fn default_llm_provider() -> String { "openai".to_string() }
fn default_llm_endpoint() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_llm_model() -> String { "gpt-4o-mini".to_string() }
fn default_llm_timeout() -> u64 { 30 }
fn default_llm_temperature() -> f32 { 0.3 }
fn default_llm_max_tokens() -> usize { 300 }
fn default_store_provider() -> String { "qdrant".to_string() }
fn default_store_url() -> String { "http://localhost:6334".to_string() }
fn default_store_timeout() -> u64 { 10 }
fn default_collection_prefix() -> String { "user".to_string() }
fn default_scorer_timeout() -> u64 { 30 }
fn default_reranker() -> ScorerConfig {
    ScorerConfig {
        endpoint: None,
        model: "BAAI/bge-reranker-base".to_string(),
        batch_size: 8,
        timeout_secs: default_scorer_timeout(),
    }
}
fn default_verifier() -> ScorerConfig {
    ScorerConfig {
        endpoint: None,
        model: "cross-encoder/ms-marco-MiniLM-L-6-v2".to_string(),
        batch_size: 16,
        timeout_secs: default_scorer_timeout(),
    }
}
fn default_expansion_ttl() -> u64 { 3600 }
fn default_expansion_capacity() -> usize { 1000 }
fn default_expansion_timeout() -> u64 { 15 }

/// Prefix of environment overrides, e.g. `DOCRAG__RAG__MAX_TOKENS`
pub const ENV_PREFIX: &str = "DOCRAG";

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self> {
        let env = std::env::var("DOCRAG_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with DOCRAG__ prefix
            // e.g., DOCRAG__RAG__MAX_TOKENS=6000
            .add_source(environment())

            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(environment())
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate nested settings that the deserializer cannot check
    pub fn validate(&self) -> Result<()> {
        self.rag.validate()?;

        for (name, scorer) in [("reranker", &self.scoring.reranker), ("verifier", &self.scoring.verifier)] {
            if scorer.batch_size == 0 || scorer.batch_size > 64 {
                return Err(crate::errors::AppError::Validation {
                    message: format!("{} batch_size must be within 1..=64", name),
                    field: Some(format!("scoring.{}.batch_size", name)),
                });
            }
        }

        Ok(())
    }

    /// Collection holding one user's indexed chunks
    pub fn collection_for_user(&self, user_id: i64) -> String {
        format!("{}_{}_knowledge", self.vector_store.collection_prefix, user_id)
    }

    /// Get the expansion cache TTL as Duration
    pub fn expansion_ttl(&self) -> Duration {
        Duration::from_secs(self.expansion.cache_ttl_secs)
    }

    /// Get the expansion LLM timeout as Duration
    pub fn expansion_timeout(&self) -> Duration {
        Duration::from_secs(self.expansion.timeout_secs)
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
            telemetry_enabled: default_enabled(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            endpoint: default_llm_endpoint(),
            api_key: None,
            model: default_llm_model(),
            timeout_secs: default_llm_timeout(),
            temperature: default_llm_temperature(),
            max_tokens: default_llm_max_tokens(),
        }
    }
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            provider: default_store_provider(),
            url: default_store_url(),
            api_key: None,
            timeout_secs: default_store_timeout(),
            collection_prefix: default_collection_prefix(),
        }
    }
}

impl Default for ScorerConfig {
    fn default() -> Self {
        default_reranker()
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            reranker: default_reranker(),
            verifier: default_verifier(),
        }
    }
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_expansion_ttl(),
            cache_max_entries: default_expansion_capacity(),
            timeout_secs: default_expansion_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.expansion.cache_ttl_secs, 3600);
        assert_eq!(config.expansion.cache_max_entries, 1000);
        assert_eq!(config.rag, RagConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_collection_naming() {
        let config = AppConfig::default();
        assert_eq!(config.collection_for_user(42), "user_42_knowledge");
    }

    #[test]
    fn test_empty_sections_deserialize() {
        let config: AppConfig = serde_json::from_str(r#"{"rag": {"max_tokens": 6000}}"#).unwrap();
        assert_eq!(config.rag.max_tokens, 6000);
        assert_eq!(config.rag.rerank_top_k, 20);
        assert_eq!(config.scoring.reranker.batch_size, 8);
        assert_eq!(config.scoring.verifier.batch_size, 16);
    }

    #[test]
    fn test_environment_overrides() {
        let mut vars = config::Map::new();
        vars.insert("DOCRAG__RAG__MAX_TOKENS".to_string(), "6000".to_string());
        vars.insert("DOCRAG__VECTOR_STORE__PROVIDER".to_string(), "memory".to_string());
        vars.insert("APP__RAG__VERIFY_TOP_K".to_string(), "3".to_string());

        let config: AppConfig = Config::builder()
            .add_source(environment().source(Some(vars)))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.rag.max_tokens, 6000);
        assert_eq!(config.vector_store.provider, "memory");
        assert_eq!(config.rag.verify_top_k, 10);
    }

    #[test]
    fn test_rejects_oversized_batch() {
        let mut config = AppConfig::default();
        config.scoring.verifier.batch_size = 128;
        assert!(config.validate().is_err());
    }
}
