//! Per-request pipeline configuration

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Pipeline knobs. `Default` is the full pipeline, `fast()` trades quality for latency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RagConfig {
    pub enable_expansion: bool,

    #[validate(range(min = 1, max = 16))]
    pub num_expansions: usize,

    #[validate(range(min = 1))]
    pub hybrid_top_k: usize,

    #[validate(range(min = 1))]
    pub dense_top_k: usize,

    #[validate(range(min = 1))]
    pub sparse_top_k: usize,

    pub enable_reranking: bool,

    #[validate(range(min = 1))]
    pub rerank_top_k: usize,

    pub enable_verification: bool,

    #[validate(range(min = 1))]
    pub verify_top_k: usize,

    /// Minimum verification score a chunk needs to survive
    #[validate(custom(function = "validate_finite"))]
    pub verify_threshold: f32,

    /// Token budget for the assembled context (4 characters per token)
    #[validate(range(min = 1))]
    pub max_tokens: usize,

    pub enable_dedup: bool,
    pub enable_merge: bool,
}

fn validate_finite(value: f32) -> Result<(), ValidationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::new("not_finite"))
    }
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            enable_expansion: true,
            num_expansions: 4,
            hybrid_top_k: 50,
            dense_top_k: 30,
            sparse_top_k: 30,
            enable_reranking: true,
            rerank_top_k: 20,
            enable_verification: true,
            verify_top_k: 10,
            verify_threshold: 0.0,
            max_tokens: 8000,
            enable_dedup: true,
            enable_merge: true,
        }
    }
}

impl RagConfig {
    /// Latency-oriented preset: fewer expansions, no cross-encoder stages
    pub fn fast() -> Self {
        Self {
            num_expansions: 2,
            hybrid_top_k: 30,
            enable_reranking: false,
            enable_verification: false,
            max_tokens: 5000,
            ..Self::default()
        }
    }
}
