//! Hybrid retrieval system
//!
//! Provides:
//! - Sparse lexical encoding (hashed BM25 term weights)
//! - Dense and sparse search against a per-user vector collection
//! - Weighted Reciprocal Rank Fusion of the two result lists

mod fusion;
mod hybrid;
mod memory;
mod sparse;
mod store;

pub use fusion::{FusionResult, RRFusion};
pub use hybrid::HybridRetriever;
pub use memory::MemoryStore;
pub use sparse::{EncodeRole, SparseEncoder, SparseVector, DEFAULT_VOCAB_SIZE};
pub use store::{
    create_vector_store, CollectionInfo, QdrantStore, QueryVector, StoreHit, StoreQuery,
    VectorStore, DENSE_VECTOR_NAME, SPARSE_VECTOR_NAME,
};

use docrag_common::errors::Result;
use docrag_common::RetrievedChunk;
use qdrant_client::qdrant::{Condition, Filter};
use serde::{Deserialize, Serialize};

/// Restricts retrieval to a subset of a user's files
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "file_ids", rename_all = "snake_case")]
pub enum ScopeFilter {
    /// Every file in the collection
    #[default]
    All,
    /// Only these files
    Include(Vec<i64>),
    /// Every file except these
    Exclude(Vec<i64>),
}

impl ScopeFilter {
    /// Whether the filter actually restricts anything.
    /// An empty id list means no filter.
    pub fn is_unrestricted(&self) -> bool {
        match self {
            ScopeFilter::All => true,
            ScopeFilter::Include(ids) | ScopeFilter::Exclude(ids) => ids.is_empty(),
        }
    }

    /// Whether a chunk from `file_id` passes the filter
    pub fn allows(&self, file_id: i64) -> bool {
        match self {
            ScopeFilter::Include(ids) if !ids.is_empty() => ids.contains(&file_id),
            ScopeFilter::Exclude(ids) if !ids.is_empty() => !ids.contains(&file_id),
            _ => true,
        }
    }

    /// Qdrant filter clause, or `None` when unrestricted
    pub fn to_qdrant(&self) -> Option<Filter> {
        match self {
            ScopeFilter::Include(ids) if !ids.is_empty() => {
                Some(Filter::must([Condition::matches("file_id", ids.clone())]))
            }
            ScopeFilter::Exclude(ids) if !ids.is_empty() => {
                Some(Filter::must_not([Condition::matches("file_id", ids.clone())]))
            }
            _ => None,
        }
    }
}

/// Hybrid retrieval request parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridRequest {
    /// Owner of the collection to search
    pub user_id: i64,

    /// Original user query
    pub query: String,

    /// Reformulations to search with, original first.
    /// Empty means the original query alone.
    pub expanded_queries: Vec<String>,

    /// File scope
    pub scope: ScopeFilter,

    /// Final number of fused results
    pub top_k: usize,

    /// Dense hits per query
    pub dense_top_k: usize,

    /// Sparse hits per query
    pub sparse_top_k: usize,
}

impl HybridRequest {
    /// Queries to run, falling back to the original alone
    pub fn queries(&self) -> Vec<String> {
        if self.expanded_queries.is_empty() {
            vec![self.query.clone()]
        } else {
            self.expanded_queries.clone()
        }
    }
}

/// Common trait for candidate retrievers
#[async_trait::async_trait]
pub trait Retriever: Send + Sync {
    /// Retrieve chunks sorted by fused score descending
    async fn retrieve(&self, request: &HybridRequest) -> Result<Vec<RetrievedChunk>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdrant_client::qdrant::condition::ConditionOneOf;
    use qdrant_client::qdrant::r#match::MatchValue;

    #[test]
    fn test_empty_scope_is_unrestricted() {
        assert!(ScopeFilter::All.is_unrestricted());
        assert!(ScopeFilter::Include(vec![]).is_unrestricted());
        assert!(ScopeFilter::Exclude(vec![]).to_qdrant().is_none());
        assert!(ScopeFilter::Include(vec![]).allows(99));
    }

    #[test]
    fn test_scope_allows() {
        let include = ScopeFilter::Include(vec![1, 2]);
        assert!(include.allows(1));
        assert!(!include.allows(3));

        let exclude = ScopeFilter::Exclude(vec![1]);
        assert!(!exclude.allows(1));
        assert!(exclude.allows(3));
    }

    fn matched_file_ids(condition: &Condition) -> Option<(&str, Vec<i64>)> {
        match condition.condition_one_of.as_ref()? {
            ConditionOneOf::Field(field) => match field.r#match.as_ref()?.match_value.as_ref()? {
                MatchValue::Integers(ids) => Some((field.key.as_str(), ids.integers.clone())),
                _ => None,
            },
            _ => None,
        }
    }

    #[test]
    fn test_qdrant_filter_shape() {
        let exclude = ScopeFilter::Exclude(vec![4, 5]).to_qdrant().unwrap();
        assert!(exclude.must.is_empty());
        assert_eq!(matched_file_ids(&exclude.must_not[0]), Some(("file_id", vec![4, 5])));

        let include = ScopeFilter::Include(vec![9]).to_qdrant().unwrap();
        assert!(include.must_not.is_empty());
        assert_eq!(matched_file_ids(&include.must[0]), Some(("file_id", vec![9])));
    }

    #[test]
    fn test_queries_default_to_original() {
        let request = HybridRequest {
            user_id: 1,
            query: "warranty terms".to_string(),
            expanded_queries: vec![],
            scope: ScopeFilter::All,
            top_k: 10,
            dense_top_k: 5,
            sparse_top_k: 5,
        };
        assert_eq!(request.queries(), vec!["warranty terms".to_string()]);
    }
}
