//! Retrieved chunk model shared by every pipeline stage

use serde::{Deserialize, Serialize};

/// Retrieved chunk with relevance scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    /// Chunk text
    pub text: String,

    /// Source document ID
    pub file_id: i64,

    /// Source document name
    pub file_name: String,

    /// Page within the source document (0 when unknown)
    pub page: i32,

    /// Opaque unique chunk ID
    pub chunk_id: String,

    /// Position within the source document
    pub chunk_index: i32,

    /// Working relevance score, overwritten by fusion, re-ranking and verification
    pub score: f32,

    /// Raw dense similarity score from the vector store
    pub dense_score: f32,

    /// Raw sparse similarity score from the vector store
    pub sparse_score: f32,

    /// Free-form provenance
    pub source: String,
}

impl RetrievedChunk {
    /// Build a chunk from a store payload with the given working score
    pub fn from_payload(payload: ChunkPayload, score: f32) -> Self {
        Self {
            text: payload.text,
            file_id: payload.file_id,
            file_name: payload.file_name,
            page: payload.page,
            chunk_id: payload.chunk_id,
            chunk_index: payload.chunk_index,
            score,
            dense_score: 0.0,
            sparse_score: 0.0,
            source: payload.source,
        }
    }
}

/// Payload stored next to each vector point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    #[serde(default)]
    pub text: String,

    #[serde(default)]
    pub file_id: i64,

    #[serde(default = "default_file_name")]
    pub file_name: String,

    #[serde(default)]
    pub page: i32,

    #[serde(default)]
    pub chunk_id: String,

    #[serde(default)]
    pub chunk_index: i32,

    #[serde(default)]
    pub source: String,
}

fn default_file_name() -> String { "Unknown".to_string() }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_defaults() {
        let payload: ChunkPayload = serde_json::from_str(r#"{"text": "hello"}"#).unwrap();
        assert_eq!(payload.file_name, "Unknown");
        assert_eq!(payload.page, 0);
        assert!(payload.chunk_id.is_empty());
    }

    #[test]
    fn test_from_payload() {
        let payload = ChunkPayload {
            text: "Section 2".to_string(),
            file_id: 7,
            file_name: "manual.pdf".to_string(),
            page: 3,
            chunk_id: "7-3-1".to_string(),
            chunk_index: 1,
            source: "manual.pdf".to_string(),
        };

        let chunk = RetrievedChunk::from_payload(payload, 0.5);
        assert_eq!(chunk.file_id, 7);
        assert_eq!(chunk.score, 0.5);
        assert_eq!(chunk.dense_score, 0.0);
    }
}
