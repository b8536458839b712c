//! Hybrid retrieval combining dense and sparse search
//!
//! Every expanded query runs one dense and one sparse search. Hits are merged
//! per list across queries and the two lists are fused with weighted RRF.

use super::{
    fusion::RRFusion,
    sparse::SparseEncoder,
    store::{CollectionInfo, QueryVector, StoreHit, StoreQuery, VectorStore, DENSE_VECTOR_NAME, SPARSE_VECTOR_NAME},
    HybridRequest, Retriever,
};
use docrag_common::errors::{AppError, Result};
use docrag_common::{metrics, Embedder, RetrievedChunk};
use futures::future::try_join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Hybrid retriever over a per-user vector collection
pub struct HybridRetriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    encoder: SparseEncoder,
    fusion: RRFusion,
    collection_prefix: String,
}

/// Hits of one expanded query
struct QueryHits {
    dense: Vec<StoreHit>,
    sparse: Vec<StoreHit>,
    sparse_fell_back: bool,
}

impl HybridRetriever {
    /// Create a new hybrid retriever
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        collection_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            embedder,
            encoder: SparseEncoder::default(),
            fusion: RRFusion::default(),
            collection_prefix: collection_prefix.into(),
        }
    }

    /// Override fusion weights
    pub fn with_fusion(mut self, fusion: RRFusion) -> Self {
        self.fusion = fusion;
        self
    }

    /// Override the sparse encoder
    pub fn with_encoder(mut self, encoder: SparseEncoder) -> Self {
        self.encoder = encoder;
        self
    }

    /// Collection holding one user's chunks
    pub fn collection_name(&self, user_id: i64) -> String {
        format!("{}_{}_knowledge", self.collection_prefix, user_id)
    }

    async fn embed(&self, query: &str) -> Result<Vec<f32>> {
        let start = Instant::now();
        let result = self.embedder.embed(query).await;
        metrics::record_embedding(
            start.elapsed().as_secs_f64(),
            self.embedder.model_name(),
            result.is_ok(),
        );
        result
    }

    async fn search_query(
        &self,
        collection: &str,
        info: CollectionInfo,
        query: &str,
        request: &HybridRequest,
    ) -> Result<QueryHits> {
        let embedding = self.embed(query).await?;

        let dense_query = |limit: usize| StoreQuery {
            collection: collection.to_string(),
            vector: QueryVector::Dense(embedding.clone()),
            using: info.named_dense.then_some(DENSE_VECTOR_NAME),
            filter: request.scope.clone(),
            limit,
        };

        let dense = self.store.search(&dense_query(request.dense_top_k)).await?;

        if !info.has_sparse {
            debug!(collection = %collection, "Sparse vectors not available, using dense fallback");
            let sparse = self.store.search(&dense_query(request.sparse_top_k)).await?;
            return Ok(QueryHits { dense, sparse, sparse_fell_back: true });
        }

        let sparse_vector = self.encoder.encode_query(query);
        if sparse_vector.is_empty() {
            return Ok(QueryHits { dense, sparse: Vec::new(), sparse_fell_back: false });
        }

        let sparse_query = StoreQuery {
            collection: collection.to_string(),
            vector: QueryVector::Sparse(sparse_vector),
            using: Some(SPARSE_VECTOR_NAME),
            filter: request.scope.clone(),
            limit: request.sparse_top_k,
        };

        match self.store.search(&sparse_query).await {
            Ok(sparse) => Ok(QueryHits { dense, sparse, sparse_fell_back: false }),
            Err(e) => {
                warn!(error = %e, collection = %collection, "Sparse search failed, falling back to dense");
                let sparse = self.store.search(&dense_query(request.sparse_top_k)).await?;
                Ok(QueryHits { dense, sparse, sparse_fell_back: true })
            }
        }
    }
}

/// Merge hits into an insertion-ordered list keyed by chunk id.
/// A later hit replaces an earlier one only with a strictly higher score.
fn merge_hits(
    merged: &mut Vec<RetrievedChunk>,
    positions: &mut HashMap<String, usize>,
    hits: Vec<StoreHit>,
) {
    for hit in hits {
        let chunk = hit.into_chunk();
        match positions.get(&chunk.chunk_id) {
            Some(&pos) => {
                if chunk.score > merged[pos].score {
                    merged[pos] = chunk;
                }
            }
            None => {
                positions.insert(chunk.chunk_id.clone(), merged.len());
                merged.push(chunk);
            }
        }
    }
}

#[async_trait::async_trait]
impl Retriever for HybridRetriever {
    async fn retrieve(&self, request: &HybridRequest) -> Result<Vec<RetrievedChunk>> {
        let start = Instant::now();
        let collection = self.collection_name(request.user_id);

        let info = self
            .store
            .collection_info(&collection)
            .await?
            .ok_or_else(|| AppError::CollectionNotFound { collection: collection.clone() })?;

        let queries = request.queries();

        // Fan out; try_join_all keeps results in query order
        let per_query = try_join_all(
            queries
                .iter()
                .map(|query| self.search_query(&collection, info, query, request)),
        )
        .await?;

        let mut dense = Vec::new();
        let mut dense_positions = HashMap::new();
        let mut sparse = Vec::new();
        let mut sparse_positions = HashMap::new();
        let mut fallbacks = 0;

        for hits in per_query {
            if hits.sparse_fell_back {
                fallbacks += 1;
            }
            merge_hits(&mut dense, &mut dense_positions, hits.dense);
            merge_hits(&mut sparse, &mut sparse_positions, hits.sparse);
        }

        let dense_count = dense.len();
        let sparse_count = sparse.len();

        let chunks: Vec<RetrievedChunk> = self
            .fusion
            .fuse(dense, sparse, request.top_k)
            .into_iter()
            .map(|r| r.chunk)
            .collect();

        metrics::record_search(start.elapsed().as_secs_f64(), queries.len() * 2, fallbacks);

        info!(
            user_id = request.user_id,
            num_queries = queries.len(),
            dense_results = dense_count,
            sparse_results = sparse_count,
            sparse_fallbacks = fallbacks,
            final_results = chunks.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Hybrid retrieval completed"
        );

        Ok(chunks)
    }
}
