//! Vector store boundary
//!
//! The retriever only needs two things from a store: the layout of a
//! collection and top-k search by one query vector. Qdrant is reached
//! through `qdrant-client`.

use super::sparse::SparseVector;
use super::{MemoryStore, ScopeFilter};
use async_trait::async_trait;
use docrag_common::config::VectorStoreConfig;
use docrag_common::errors::{AppError, Result};
use docrag_common::{ChunkPayload, RetrievedChunk};
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    vectors_config, CollectionParams, PointId, Query, QueryPoints, QueryPointsBuilder, ScoredPoint,
    Value, VectorInput,
};
use qdrant_client::Qdrant;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Named dense vector field in hybrid collections
pub const DENSE_VECTOR_NAME: &str = "dense";

/// Named sparse vector field in hybrid collections
pub const SPARSE_VECTOR_NAME: &str = "sparse";

/// Vector layout of an existing collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionInfo {
    /// Dense vectors live under the named `dense` field
    pub named_dense: bool,
    /// A `sparse` field exists
    pub has_sparse: bool,
}

/// Query vector of one search
#[derive(Debug, Clone, PartialEq)]
pub enum QueryVector {
    Dense(Vec<f32>),
    Sparse(SparseVector),
}

/// One top-k search
#[derive(Debug, Clone)]
pub struct StoreQuery {
    pub collection: String,
    pub vector: QueryVector,
    /// Named vector field, `None` for the default unnamed vector
    pub using: Option<&'static str>,
    pub filter: ScopeFilter,
    pub limit: usize,
}

/// One scored point
#[derive(Debug, Clone, PartialEq)]
pub struct StoreHit {
    pub id: String,
    pub score: f32,
    pub payload: ChunkPayload,
}

impl StoreHit {
    /// Convert into a chunk whose working score is the raw store score.
    /// Points indexed without a `chunk_id` are identified by their point id.
    pub fn into_chunk(self) -> RetrievedChunk {
        let mut payload = self.payload;
        if payload.chunk_id.is_empty() {
            payload.chunk_id = self.id;
        }
        RetrievedChunk::from_payload(payload, self.score)
    }
}

/// Trait for vector storage backends
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Layout of a collection, `None` when it does not exist
    async fn collection_info(&self, collection: &str) -> Result<Option<CollectionInfo>>;

    /// Top-k search, highest score first
    async fn search(&self, query: &StoreQuery) -> Result<Vec<StoreHit>>;
}

/// Qdrant client over gRPC
pub struct QdrantStore {
    client: Qdrant,
}

impl QdrantStore {
    pub fn new(config: &VectorStoreConfig) -> Result<Self> {
        let client = Qdrant::from_url(&config.url)
            .api_key(config.api_key.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Invalid Qdrant client settings: {}", e),
            })?;

        Ok(Self { client })
    }

    fn query_points(query: &StoreQuery) -> QueryPoints {
        let vector = match &query.vector {
            QueryVector::Dense(values) => VectorInput::from(values.clone()),
            QueryVector::Sparse(sparse) => {
                VectorInput::new_sparse(sparse.indices.clone(), sparse.values.clone())
            }
        };

        let mut builder = QueryPointsBuilder::new(query.collection.clone())
            .query(Query::new_nearest(vector))
            .limit(query.limit as u64)
            .with_payload(true);
        if let Some(using) = query.using {
            builder = builder.using(using);
        }
        if let Some(filter) = query.filter.to_qdrant() {
            builder = builder.filter(filter);
        }
        builder.build()
    }
}

fn store_error(context: &str, err: impl std::fmt::Display) -> AppError {
    AppError::VectorStore {
        message: format!("{}: {}", context, err),
    }
}

/// Layout of a described collection
fn layout(params: &CollectionParams) -> CollectionInfo {
    // A single unnamed dense vector is described by `Params`
    let named_dense = match params.vectors_config.as_ref().and_then(|v| v.config.as_ref()) {
        Some(vectors_config::Config::ParamsMap(map)) => map.map.contains_key(DENSE_VECTOR_NAME),
        _ => false,
    };
    let has_sparse = params
        .sparse_vectors_config
        .as_ref()
        .map(|sparse| sparse.map.contains_key(SPARSE_VECTOR_NAME))
        .unwrap_or(false);

    CollectionInfo { named_dense, has_sparse }
}

fn point_id(id: Option<PointId>) -> Option<String> {
    match id?.point_id_options? {
        PointIdOptions::Num(num) => Some(num.to_string()),
        PointIdOptions::Uuid(uuid) => Some(uuid),
    }
}

fn json_value(value: Value) -> serde_json::Value {
    match value.kind {
        Some(Kind::StringValue(s)) => serde_json::Value::String(s),
        Some(Kind::IntegerValue(n)) => n.into(),
        // Integral doubles come from clients that write every number as a float
        Some(Kind::DoubleValue(d)) if d.fract() == 0.0 && d.abs() < i64::MAX as f64 => (d as i64).into(),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(d)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Some(Kind::BoolValue(b)) => b.into(),
        Some(Kind::StructValue(s)) => serde_json::Value::Object(
            s.fields.into_iter().map(|(k, v)| (k, json_value(v))).collect(),
        ),
        Some(Kind::ListValue(list)) => {
            serde_json::Value::Array(list.values.into_iter().map(json_value).collect())
        }
        Some(Kind::NullValue(_)) | None => serde_json::Value::Null,
    }
}

fn chunk_payload(payload: HashMap<String, Value>) -> Option<ChunkPayload> {
    // Points without payload cannot be turned into chunks
    if payload.is_empty() {
        return None;
    }
    let object = payload.into_iter().map(|(k, v)| (k, json_value(v))).collect();
    serde_json::from_value(serde_json::Value::Object(object)).ok()
}

fn into_hit(point: ScoredPoint) -> Option<StoreHit> {
    let payload = chunk_payload(point.payload)?;
    let id = point_id(point.id).unwrap_or_default();
    Some(StoreHit { id, score: point.score, payload })
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn collection_info(&self, collection: &str) -> Result<Option<CollectionInfo>> {
        let exists = self
            .client
            .collection_exists(collection)
            .await
            .map_err(|e| store_error("Collection lookup failed", e))?;
        if !exists {
            return Ok(None);
        }

        let response = self
            .client
            .collection_info(collection)
            .await
            .map_err(|e| store_error("Collection lookup failed", e))?;

        let params = response
            .result
            .and_then(|info| info.config)
            .and_then(|config| config.params)
            .unwrap_or_default();

        Ok(Some(layout(&params)))
    }

    async fn search(&self, query: &StoreQuery) -> Result<Vec<StoreHit>> {
        let response = self
            .client
            .query(Self::query_points(query))
            .await
            .map_err(|e| store_error("Search failed", e))?;

        Ok(response.result.into_iter().filter_map(into_hit).collect())
    }
}

/// Create a vector store based on configuration
pub fn create_vector_store(config: &VectorStoreConfig) -> Result<Arc<dyn VectorStore>> {
    match config.provider.as_str() {
        "qdrant" => Ok(Arc::new(QdrantStore::new(config)?)),
        "memory" => Ok(Arc::new(MemoryStore::new())),
        other => Err(AppError::Configuration {
            message: format!("Unknown vector store provider: {}", other),
        }),
    }
}
