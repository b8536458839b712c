//! Error types for the DocRAG retrieval core
//!
//! Provides a single error enum with:
//! - Distinct variants for each collaborator failure
//! - Failure classes that decide whether a pipeline stage degrades or aborts
//! - Error codes for machine-readable identification
//! - Stage error codes for telemetry records

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    InvalidFormat,

    // Resource errors (4xxx)
    CollectionNotFound,
    NoRelevantDocuments,

    // Expansion errors (5xxx)
    LanguageModelError,
    LanguageModelTimeout,
    LanguageModelUnavailable,

    // Retrieval errors (6xxx)
    VectorStoreError,
    EmbeddingError,
    EmbeddingTimeout,

    // Scoring errors (7xxx)
    ScoringError,
    ScorerUnavailable,

    // Assembly errors (8xxx)
    AssemblyError,

    // Internal errors (9xxx)
    UpstreamError,
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::InvalidFormat => 1002,

            // Resources (4xxx)
            ErrorCode::CollectionNotFound => 4001,
            ErrorCode::NoRelevantDocuments => 4002,

            // Expansion (5xxx)
            ErrorCode::LanguageModelError => 5001,
            ErrorCode::LanguageModelTimeout => 5002,
            ErrorCode::LanguageModelUnavailable => 5003,

            // Retrieval (6xxx)
            ErrorCode::VectorStoreError => 6001,
            ErrorCode::EmbeddingError => 6002,
            ErrorCode::EmbeddingTimeout => 6003,

            // Scoring (7xxx)
            ErrorCode::ScoringError => 7001,
            ErrorCode::ScorerUnavailable => 7002,

            // Assembly (8xxx)
            ErrorCode::AssemblyError => 8001,

            // Internal (9xxx)
            ErrorCode::UpstreamError => 9001,
            ErrorCode::InternalError => 9002,
            ErrorCode::ConfigurationError => 9003,
            ErrorCode::SerializationError => 9004,
        }
    }
}

/// Which pipeline concern a failure belongs to.
///
/// Expansion, scoring and assembly failures are recovered inside the
/// pipeline; retrieval failures abort the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Expansion,
    Retrieval,
    Scoring,
    Assembly,
    Caller,
    Internal,
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>
    },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    // Resource errors
    #[error("Collection not found: {collection}")]
    CollectionNotFound { collection: String },

    #[error("No relevant documents found")]
    NoRelevantDocuments,

    // Language model errors (query expansion)
    #[error("Language model error: {message}")]
    LanguageModel { message: String },

    #[error("Language model timeout after {timeout_ms}ms")]
    LanguageModelTimeout { timeout_ms: u64 },

    #[error("Language model not configured")]
    LanguageModelUnavailable,

    // Retrieval errors
    #[error("Vector store error: {message}")]
    VectorStore { message: String },

    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    #[error("Embedding timeout after {timeout_ms}ms")]
    EmbeddingTimeout { timeout_ms: u64 },

    // Scoring errors
    #[error("Scoring error: {message}")]
    Scoring { message: String },

    #[error("Scoring model unavailable: {model}")]
    ScorerUnavailable { model: String },

    // Assembly errors
    #[error("Context assembly error: {message}")]
    Assembly { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::CollectionNotFound { .. } => ErrorCode::CollectionNotFound,
            AppError::NoRelevantDocuments => ErrorCode::NoRelevantDocuments,
            AppError::LanguageModel { .. } => ErrorCode::LanguageModelError,
            AppError::LanguageModelTimeout { .. } => ErrorCode::LanguageModelTimeout,
            AppError::LanguageModelUnavailable => ErrorCode::LanguageModelUnavailable,
            AppError::VectorStore { .. } => ErrorCode::VectorStoreError,
            AppError::EmbeddingError { .. } => ErrorCode::EmbeddingError,
            AppError::EmbeddingTimeout { .. } => ErrorCode::EmbeddingTimeout,
            AppError::Scoring { .. } => ErrorCode::ScoringError,
            AppError::ScorerUnavailable { .. } => ErrorCode::ScorerUnavailable,
            AppError::Assembly { .. } => ErrorCode::AssemblyError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the failure class for this error
    pub fn failure_class(&self) -> FailureClass {
        match self {
            AppError::LanguageModel { .. } |
            AppError::LanguageModelTimeout { .. } |
            AppError::LanguageModelUnavailable => FailureClass::Expansion,

            AppError::CollectionNotFound { .. } |
            AppError::VectorStore { .. } |
            AppError::EmbeddingError { .. } |
            AppError::EmbeddingTimeout { .. } => FailureClass::Retrieval,

            AppError::Scoring { .. } |
            AppError::ScorerUnavailable { .. } => FailureClass::Scoring,

            AppError::Assembly { .. } => FailureClass::Assembly,

            AppError::Validation { .. } |
            AppError::InvalidFormat { .. } |
            AppError::NoRelevantDocuments => FailureClass::Caller,

            AppError::HttpClient(_) |
            AppError::Internal { .. } |
            AppError::Configuration { .. } |
            AppError::Serialization(_) |
            AppError::Other(_) => FailureClass::Internal,
        }
    }

    /// Check if this error must abort the request
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.failure_class(),
            FailureClass::Retrieval | FailureClass::Caller | FailureClass::Internal
        )
    }

    /// Check if this error means "nothing to answer from" for the caller
    pub fn is_no_documents(&self) -> bool {
        matches!(
            self,
            AppError::NoRelevantDocuments | AppError::CollectionNotFound { .. }
        )
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string()
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string()
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        let field = err.field_errors().keys().next().map(|f| f.to_string());
        AppError::Validation {
            message: err.to_string(),
            field,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::CollectionNotFound { collection: "user_1_knowledge".into() };
        assert_eq!(err.code(), ErrorCode::CollectionNotFound);
        assert_eq!(err.code().as_code(), 4001);
        assert!(err.is_no_documents());
    }

    #[test]
    fn test_failure_classes() {
        let expansion = AppError::LanguageModelTimeout { timeout_ms: 5000 };
        assert_eq!(expansion.failure_class(), FailureClass::Expansion);
        assert!(!expansion.is_fatal());

        let retrieval = AppError::VectorStore { message: "connection refused".into() };
        assert_eq!(retrieval.failure_class(), FailureClass::Retrieval);
        assert!(retrieval.is_fatal());

        let scoring = AppError::ScorerUnavailable { model: "bge-reranker".into() };
        assert_eq!(scoring.failure_class(), FailureClass::Scoring);
        assert!(!scoring.is_fatal());
    }

    #[test]
    fn test_validation_error_keeps_message() {
        let err = AppError::Validation {
            message: "rerank_top_k must be at least 1".into(),
            field: Some("rerank_top_k".into()),
        };
        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert!(err.to_string().contains("rerank_top_k"));
    }
}
