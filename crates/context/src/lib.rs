//! DocRAG Context Engine
//!
//! Retrieval pipeline stages on top of hybrid search:
//! - Query expansion with a TTL cache
//! - Cross-encoder re-ranking and verification
//! - Context assembly with source attribution
//! - Pipeline orchestration with stage telemetry

pub mod assembly;
pub mod expansion;
pub mod pipeline;
pub mod scoring;
pub mod stage;

pub use assembly::{AssembledContext, ContextAssembler, FileSource, DEFAULT_SEPARATOR};
pub use expansion::{ExpansionCache, QueryExpander};
pub use pipeline::{PipelineServices, RagPipeline, RagRequest};
pub use scoring::{CrossEncoder, Reranker, ScorerHandle, Verifier};
pub use stage::{Stage, StageOutcome, StageRecord, StageSink};
