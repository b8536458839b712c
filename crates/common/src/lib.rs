//! DocRAG Common Library
//!
//! Shared code for the retrieval core crates including:
//! - Retrieved chunk model
//! - Error types and failure classes
//! - Configuration management and pipeline presets
//! - Embedding client abstraction
//! - Language model client abstraction
//! - Metrics and stage telemetry

pub mod chunk;
pub mod config;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;

// Re-export commonly used types
pub use chunk::{ChunkPayload, RetrievedChunk};
pub use config::{AppConfig, RagConfig};
pub use embeddings::Embedder;
pub use errors::{AppError, FailureClass, Result};
pub use llm::LanguageModel;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;
