//! DocRAG Search
//!
//! Candidate generation for the retrieval pipeline:
//! - BM25-style sparse query encoding
//! - Vector store boundary (Qdrant and in-memory)
//! - Hybrid dense + sparse retrieval fused with weighted RRF

pub mod retrieval;

pub use retrieval::{
    HybridRequest, HybridRetriever, MemoryStore, QdrantStore, Retriever, ScopeFilter,
    SparseEncoder, SparseVector, VectorStore,
};
