//! Query expansion
//!
//! Provides:
//! - LLM-generated reformulations of the user query
//! - Lenient parsing of model output (JSON array, then line list)
//! - Rule-based fallback when the model fails or is not configured
//! - Process-wide TTL cache of expansion results

mod cache;

pub use cache::{cache_key, CacheEntry, ExpansionCache};

use docrag_common::errors::{AppError, Result};
use docrag_common::LanguageModel;
use regex_lite::Regex;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Where an expansion list came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpansionSource {
    /// Empty query, nothing to expand
    Skipped,
    Cache,
    Model,
    /// Rule-based reformulations after a model failure
    Fallback,
}

/// Expansion result with provenance
#[derive(Debug)]
pub struct Expansion {
    /// Original query first, then distinct reformulations
    pub queries: Vec<String>,
    pub source: ExpansionSource,
    /// Model failure that forced the fallback
    pub error: Option<AppError>,
}

/// Query expander with cache
pub struct QueryExpander {
    llm: Option<Arc<dyn LanguageModel>>,
    cache: Arc<ExpansionCache>,
    timeout: Duration,
}

impl QueryExpander {
    pub fn new(
        llm: Option<Arc<dyn LanguageModel>>,
        cache: Arc<ExpansionCache>,
        timeout: Duration,
    ) -> Self {
        Self { llm, cache, timeout }
    }

    /// Expand a query into at most `n` reformulations after the original
    pub async fn expand(&self, query: &str, n: usize, use_cache: bool) -> Vec<String> {
        self.expand_with_source(query, n, use_cache).await.queries
    }

    /// Expand and report where the result came from
    pub async fn expand_with_source(&self, query: &str, n: usize, use_cache: bool) -> Expansion {
        let start = Instant::now();
        let query = query.trim();

        if query.is_empty() {
            return Expansion {
                queries: vec![query.to_string()],
                source: ExpansionSource::Skipped,
                error: None,
            };
        }

        if use_cache {
            if let Some(cached) = self.cache.get(query).await {
                debug!(query_length = query.len(), "Query expansion cache hit");
                return Expansion {
                    queries: cached,
                    source: ExpansionSource::Cache,
                    error: None,
                };
            }
        }

        let (candidates, source, error) = match self.generate(query, n).await {
            Ok(candidates) => (candidates, ExpansionSource::Model, None),
            Err(e) => {
                warn!(error = %e, "LLM expansion failed, using rule-based fallback");
                (fallback_expansions(query), ExpansionSource::Fallback, Some(e))
            }
        };

        let queries = with_original(query, candidates, n);

        if use_cache {
            self.cache.insert(query, queries.clone()).await;
        }

        info!(
            num_expansions = queries.len() - 1,
            source = ?source,
            duration_ms = start.elapsed().as_millis() as u64,
            "Query expansion completed"
        );

        Expansion { queries, source, error }
    }

    async fn generate(&self, query: &str, n: usize) -> Result<Vec<String>> {
        let llm = self.llm.as_ref().ok_or(AppError::LanguageModelUnavailable)?;
        let prompt = expansion_prompt(query, n);

        let content = tokio::time::timeout(self.timeout, llm.complete(&prompt))
            .await
            .map_err(|_| AppError::LanguageModelTimeout {
                timeout_ms: self.timeout.as_millis() as u64,
            })??;

        Ok(parse_expansions(&content))
    }
}

fn expansion_prompt(query: &str, n: usize) -> String {
    format!(
        "You are a search query expansion assistant. Given a user's search query, \
         generate {n} alternative phrasings that would help find relevant documents.\n\
         \n\
         Requirements:\n\
         - Include synonyms and paraphrases\n\
         - Add domain-specific technical terms if applicable\n\
         - Expand abbreviations if present\n\
         - Keep queries concise and search-friendly\n\
         - Focus on the core intent of the query\n\
         \n\
         User Query: \"{query}\"\n\
         \n\
         Return ONLY a JSON array of {n} alternative queries, nothing else.\n\
         Example format: [\"query 1\", \"query 2\", \"query 3\", \"query 4\"]"
    )
}

fn array_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)\[.*?\]").expect("array pattern is valid"))
}

fn acceptable(candidate: &str) -> bool {
    let len = candidate.chars().count();
    len > 3 && len < 500
}

/// Extract reformulations from raw model output.
///
/// The first bracketed JSON array wins; otherwise the text is read as a
/// newline/comma separated list with enumerators and quotes stripped.
pub fn parse_expansions(content: &str) -> Vec<String> {
    if let Some(found) = array_pattern().find(content) {
        if let Ok(serde_json::Value::Array(items)) = serde_json::from_str(found.as_str()) {
            return items
                .iter()
                .filter_map(|item| item.as_str())
                .map(str::trim)
                .filter(|item| acceptable(item))
                .map(str::to_string)
                .collect();
        }
    }

    content
        .split(['\n', ','])
        .map(|line| {
            line.trim()
                .trim_start_matches(|c: char| c.is_ascii_digit() || matches!(c, '.' | ')' | '-' | '*'))
                .trim_start()
                .trim_matches(|c: char| c == '"' || c == '\'')
        })
        .filter(|line| acceptable(line))
        .map(str::to_string)
        .collect()
}

/// Rule-based reformulations
pub fn fallback_expansions(query: &str) -> Vec<String> {
    let lowered = query.to_lowercase();
    let words: Vec<&str> = lowered.split_whitespace().collect();
    let mut expansions = Vec::new();

    if words.len() > 1 {
        expansions.push(words.iter().rev().copied().collect::<Vec<_>>().join(" "));
    }

    if words.len() <= 3 {
        expansions.push(format!("what is {}", query));
        expansions.push(format!("explain {}", query));
    }

    expansions.truncate(4);
    expansions
}

/// Original first, then up to `n` case-insensitively distinct candidates
fn with_original(query: &str, candidates: Vec<String>, n: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    seen.insert(query.to_lowercase());

    let mut queries = vec![query.to_string()];
    for candidate in candidates {
        if queries.len() > n {
            break;
        }
        if seen.insert(candidate.to_lowercase()) {
            queries.push(candidate);
        }
    }
    queries
}
