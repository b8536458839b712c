//! BM25-style sparse encoder
//!
//! Terms are hashed into a fixed vocabulary of buckets, so no vocabulary has
//! to be stored or shared between indexing and querying. Distinct terms that
//! land in the same bucket add their weights together.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

/// Default number of hash buckets
pub const DEFAULT_VOCAB_SIZE: u32 = 30_000;

const MIN_TOKEN_CHARS: usize = 2;
const MAX_TOKEN_CHARS: usize = 50;

/// English and French function words
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for",
    "from", "has", "he", "in", "is", "it", "its", "of", "on",
    "that", "the", "to", "was", "were", "will", "with",
    "le", "la", "les", "de", "du", "des", "un", "une", "et",
    "est", "en", "au", "aux", "pour", "par", "sur", "dans",
    "ce", "cette", "ces", "qui", "que", "quoi", "dont", "ou",
];

/// Sparse vector in the vector store's `{indices, values}` form
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    /// Unique bucket indices, ascending
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    /// No lexical signal
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Dot product of two sorted sparse vectors
    pub fn dot(&self, other: &SparseVector) -> f32 {
        let (mut i, mut j) = (0, 0);
        let mut sum = 0.0;
        while i < self.indices.len() && j < other.indices.len() {
            match self.indices[i].cmp(&other.indices[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    sum += self.values[i] * other.values[j];
                    i += 1;
                    j += 1;
                }
            }
        }
        sum
    }
}

/// What the text being encoded is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeRole {
    /// Indexed chunk text: saturated, length-normalized term frequency
    Document,
    /// Search query: `1 + ln(1 + f)`
    Query,
}

/// Hashed BM25 encoder
#[derive(Debug, Clone)]
pub struct SparseEncoder {
    k1: f32,
    b: f32,
    vocab_size: u32,
    /// Fixed corpus-wide average; not learned from the collection
    avg_doc_len: f32,
}

impl Default for SparseEncoder {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            vocab_size: DEFAULT_VOCAB_SIZE,
            avg_doc_len: 500.0,
        }
    }
}

impl SparseEncoder {
    /// Encoder with a custom bucket count
    pub fn with_vocab_size(vocab_size: u32) -> Self {
        Self {
            vocab_size: vocab_size.max(1),
            ..Self::default()
        }
    }

    /// Encode one text
    pub fn encode(&self, text: &str, role: EncodeRole) -> SparseVector {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return SparseVector::default();
        }

        let doc_len = tokens.len() as f32;
        let mut counts: HashMap<&str, u32> = HashMap::new();
        for token in &tokens {
            *counts.entry(token.as_str()).or_default() += 1;
        }

        let mut buckets: BTreeMap<u32, f32> = BTreeMap::new();
        for (term, count) in counts {
            let f = count as f32;
            let weight = match role {
                EncodeRole::Document => {
                    let norm = 1.0 - self.b + self.b * (doc_len / self.avg_doc_len);
                    f * (self.k1 + 1.0) / (f + self.k1 * norm)
                }
                EncodeRole::Query => 1.0 + f.ln_1p(),
            };
            *buckets.entry(self.bucket(term)).or_default() += weight;
        }

        let (indices, values) = buckets.into_iter().unzip();
        SparseVector { indices, values }
    }

    /// Encode a query
    pub fn encode_query(&self, text: &str) -> SparseVector {
        self.encode(text, EncodeRole::Query)
    }

    /// Encode several texts with the same role
    pub fn encode_batch(&self, texts: &[String], role: EncodeRole) -> Vec<SparseVector> {
        texts.iter().map(|text| self.encode(text, role)).collect()
    }

    /// First 8 bytes of SHA-256, big-endian, modulo the bucket count
    fn bucket(&self, term: &str) -> u32 {
        let digest = Sha256::digest(term.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(prefix) % u64::from(self.vocab_size)) as u32
    }
}

fn tokenize(text: &str) -> Vec<String> {
    let normalized: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { ' ' })
        .collect();

    normalized
        .split_whitespace()
        .filter(|token| {
            let len = token.chars().count();
            (MIN_TOKEN_CHARS..=MAX_TOKEN_CHARS).contains(&len) && !STOP_WORDS.contains(token)
        })
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_filters() {
        let tokens = tokenize("The Warranty-period is 2 years, c'est la garantie!");
        assert_eq!(tokens, vec!["warranty", "period", "years", "garantie"]);
    }

    #[test]
    fn test_indices_sorted_and_aligned() {
        let encoder = SparseEncoder::default();
        let vector = encoder.encode(
            "installation requires network access and installation media",
            EncodeRole::Document,
        );

        assert_eq!(vector.indices.len(), vector.values.len());
        assert!(vector.indices.windows(2).all(|w| w[0] < w[1]));
        assert!(vector.indices.iter().all(|&i| i < DEFAULT_VOCAB_SIZE));
    }

    #[test]
    fn test_empty_and_stop_words() {
        let encoder = SparseEncoder::default();
        assert!(encoder.encode("", EncodeRole::Query).is_empty());
        assert!(encoder.encode("   ", EncodeRole::Document).is_empty());
        assert!(encoder.encode("the and of la", EncodeRole::Query).is_empty());
    }

    #[test]
    fn test_query_weights() {
        let encoder = SparseEncoder::default();
        let vector = encoder.encode_query("backup backup");
        assert_eq!(vector.values.len(), 1);
        assert!((vector.values[0] - (1.0 + 2f32.ln_1p())).abs() < 1e-6);
    }

    #[test]
    fn test_document_weights() {
        let encoder = SparseEncoder::default();
        let vector = encoder.encode("firmware", EncodeRole::Document);
        // f=1, docLen=1: 2.5 / (1 + 1.5 * (0.25 + 0.75/500))
        let expected = 2.5 / (1.0 + 1.5 * (0.25 + 0.75 * (1.0 / 500.0)));
        assert!((vector.values[0] - expected).abs() < 1e-5);
    }

    #[test]
    fn test_deterministic_buckets() {
        let a = SparseEncoder::default().encode_query("router configuration");
        let b = SparseEncoder::default().encode_query("router configuration");
        assert_eq!(a, b);
    }

    #[test]
    fn test_collisions_are_additive() {
        let encoder = SparseEncoder::with_vocab_size(1);
        let vector = encoder.encode_query("alpha beta");
        assert_eq!(vector.indices, vec![0]);
        assert!((vector.values[0] - 2.0 * (1.0 + 1f32.ln_1p())).abs() < 1e-6);
    }

    #[test]
    fn test_batch_and_dot() {
        let encoder = SparseEncoder::default();
        let texts = vec!["router reset".to_string(), "router firmware".to_string()];
        let vectors = encoder.encode_batch(&texts, EncodeRole::Document);
        assert_eq!(vectors.len(), 2);

        let query = encoder.encode_query("router");
        assert!(query.dot(&vectors[0]) > 0.0);
        assert_eq!(query.dot(&SparseVector::default()), 0.0);
    }
}
