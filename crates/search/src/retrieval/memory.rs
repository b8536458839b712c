use super::sparse::{EncodeRole, SparseEncoder, SparseVector};
use super::store::{CollectionInfo, QueryVector, StoreHit, StoreQuery, VectorStore};
use async_trait::async_trait;
use docrag_common::errors::{AppError, Result};
use docrag_common::{ChunkPayload, Embedder};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// One stored point
#[derive(Debug, Clone)]
pub struct MemoryPoint {
    pub id: String,
    pub dense: Vec<f32>,
    pub sparse: SparseVector,
    pub payload: ChunkPayload,
}

struct MemoryCollection {
    info: CollectionInfo,
    points: Vec<MemoryPoint>,
}

/// In-memory vector store for development and testing.
///
/// Uses brute-force cosine similarity for dense queries and dot product for
/// sparse queries. Ties keep insertion order.
pub struct MemoryStore {
    collections: RwLock<HashMap<String, MemoryCollection>>,
    unavailable: AtomicBool,
    sparse_failing: AtomicBool,
    dense_searches: AtomicUsize,
    sparse_searches: AtomicUsize,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
            sparse_failing: AtomicBool::new(false),
            dense_searches: AtomicUsize::new(0),
            sparse_searches: AtomicUsize::new(0),
        }
    }

    /// Create or replace a collection with the given layout
    pub async fn create_collection(&self, name: &str, info: CollectionInfo) {
        self.collections.write().await.insert(
            name.to_string(),
            MemoryCollection { info, points: Vec::new() },
        );
    }

    /// Insert points, replacing any point with the same id
    pub async fn upsert(&self, collection: &str, points: Vec<MemoryPoint>) -> Result<()> {
        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| AppError::CollectionNotFound { collection: collection.to_string() })?;

        for point in points {
            match target.points.iter_mut().find(|p| p.id == point.id) {
                Some(existing) => *existing = point,
                None => target.points.push(point),
            }
        }
        Ok(())
    }

    /// Embed and sparse-encode payload texts, then upsert them keyed by `chunk_id`
    pub async fn index_payloads(
        &self,
        collection: &str,
        embedder: &dyn Embedder,
        encoder: &SparseEncoder,
        payloads: Vec<ChunkPayload>,
    ) -> Result<()> {
        let texts: Vec<String> = payloads.iter().map(|p| p.text.clone()).collect();
        let dense = embedder.embed_batch(&texts).await?;
        let sparse = encoder.encode_batch(&texts, EncodeRole::Document);

        let points = payloads
            .into_iter()
            .zip(dense)
            .zip(sparse)
            .map(|((payload, dense), sparse)| MemoryPoint {
                id: payload.chunk_id.clone(),
                dense,
                sparse,
                payload,
            })
            .collect();

        self.upsert(collection, points).await
    }

    /// Make every call fail as if the store were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make sparse searches fail while dense searches keep working
    pub fn set_sparse_failing(&self, failing: bool) {
        self.sparse_failing.store(failing, Ordering::SeqCst);
    }

    /// Number of dense searches served
    pub fn dense_searches(&self) -> usize {
        self.dense_searches.load(Ordering::SeqCst)
    }

    /// Number of sparse searches served
    pub fn sparse_searches(&self) -> usize {
        self.sparse_searches.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::VectorStore {
                message: "memory store marked unavailable".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn collection_info(&self, collection: &str) -> Result<Option<CollectionInfo>> {
        self.check_available()?;
        Ok(self.collections.read().await.get(collection).map(|c| c.info))
    }

    async fn search(&self, query: &StoreQuery) -> Result<Vec<StoreHit>> {
        self.check_available()?;

        let collections = self.collections.read().await;
        let collection = collections.get(&query.collection).ok_or_else(|| {
            AppError::CollectionNotFound { collection: query.collection.clone() }
        })?;

        let mut hits: Vec<StoreHit> = match &query.vector {
            QueryVector::Dense(vector) => {
                self.dense_searches.fetch_add(1, Ordering::SeqCst);
                collection
                    .points
                    .iter()
                    .filter(|p| query.filter.allows(p.payload.file_id))
                    .map(|p| hit(p, cosine_similarity(vector, &p.dense)))
                    .collect()
            }
            QueryVector::Sparse(vector) => {
                if !collection.info.has_sparse || self.sparse_failing.load(Ordering::SeqCst) {
                    return Err(AppError::VectorStore {
                        message: format!("sparse search unsupported on {}", query.collection),
                    });
                }
                self.sparse_searches.fetch_add(1, Ordering::SeqCst);
                collection
                    .points
                    .iter()
                    .filter(|p| query.filter.allows(p.payload.file_id))
                    .map(|p| (p, vector.dot(&p.sparse)))
                    .filter(|(_, score)| *score > 0.0)
                    .map(|(p, score)| hit(p, score))
                    .collect()
            }
        };

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(query.limit);
        Ok(hits)
    }
}

fn hit(point: &MemoryPoint, score: f32) -> StoreHit {
    StoreHit {
        id: point.id.clone(),
        score,
        payload: point.payload.clone(),
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 means identical direction.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::ScopeFilter;

    fn payload(chunk_id: &str, file_id: i64, text: &str) -> ChunkPayload {
        ChunkPayload {
            text: text.to_string(),
            file_id,
            file_name: format!("file-{}.pdf", file_id),
            page: 1,
            chunk_id: chunk_id.to_string(),
            chunk_index: 0,
            source: String::new(),
        }
    }

    fn point(id: &str, file_id: i64, dense: Vec<f32>) -> MemoryPoint {
        MemoryPoint {
            id: id.to_string(),
            dense,
            sparse: SparseVector::default(),
            payload: payload(id, file_id, id),
        }
    }

    fn dense_query(vector: Vec<f32>, filter: ScopeFilter, limit: usize) -> StoreQuery {
        StoreQuery {
            collection: "c".to_string(),
            vector: QueryVector::Dense(vector),
            using: None,
            filter,
            limit,
        }
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &[0.0, 1.0, 0.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &[0.0, 0.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_dense_search_sorted_and_filtered() {
        let store = MemoryStore::new();
        store.create_collection("c", CollectionInfo::default()).await;
        store
            .upsert("c", vec![
                point("far", 1, vec![0.0, 1.0]),
                point("close", 1, vec![1.0, 0.0]),
                point("medium", 2, vec![0.5, 0.5]),
            ])
            .await
            .unwrap();

        let hits = store.search(&dense_query(vec![1.0, 0.0], ScopeFilter::All, 3)).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["close", "medium", "far"]);

        let hits = store
            .search(&dense_query(vec![1.0, 0.0], ScopeFilter::Exclude(vec![1]), 3))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "medium");
        assert_eq!(store.dense_searches(), 2);
    }

    #[tokio::test]
    async fn test_upsert_replaces_same_id() {
        let store = MemoryStore::new();
        store.create_collection("c", CollectionInfo::default()).await;
        store.upsert("c", vec![point("a", 1, vec![1.0])]).await.unwrap();
        store.upsert("c", vec![point("a", 2, vec![1.0])]).await.unwrap();

        let hits = store.search(&dense_query(vec![1.0], ScopeFilter::All, 10)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload.file_id, 2);
    }

    #[tokio::test]
    async fn test_sparse_requires_sparse_field() {
        let store = MemoryStore::new();
        store.create_collection("c", CollectionInfo { named_dense: true, has_sparse: false }).await;

        let query = StoreQuery {
            collection: "c".to_string(),
            vector: QueryVector::Sparse(SparseVector { indices: vec![1], values: vec![1.0] }),
            using: Some("sparse"),
            filter: ScopeFilter::All,
            limit: 5,
        };
        assert!(store.search(&query).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_collection_and_outage() {
        let store = MemoryStore::new();
        assert!(store.collection_info("nope").await.unwrap().is_none());

        let err = store.search(&dense_query(vec![1.0], ScopeFilter::All, 1)).await.unwrap_err();
        assert!(matches!(err, AppError::CollectionNotFound { .. }));

        store.set_unavailable(true);
        let err = store.collection_info("nope").await.unwrap_err();
        assert!(err.is_fatal());
    }
}
