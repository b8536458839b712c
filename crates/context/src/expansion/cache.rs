//! In-process TTL cache for query expansions

use docrag_common::metrics;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const CACHE_NAME: &str = "expansion";

/// Cached expansion list
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Vec<String>,
    pub expires_at: Instant,
}

/// Expansion cache keyed by the normalized query.
///
/// Expired entries are dropped when read. A full cache first purges expired
/// entries and then, if still full, the quarter of entries closest to expiry.
pub struct ExpansionCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
}

/// SHA-256 hex digest of the lowercased, trimmed query
pub fn cache_key(query: &str) -> String {
    hex::encode(Sha256::digest(query.trim().to_lowercase().as_bytes()))
}

impl ExpansionCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Cached expansions for a query, if present and unexpired
    pub async fn get(&self, query: &str) -> Option<Vec<String>> {
        let key = cache_key(query);
        let mut entries = self.entries.lock().await;

        let hit = match entries.get(&key) {
            Some(entry) if Instant::now() <= entry.expires_at => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        };

        metrics::record_cache(hit.is_some(), CACHE_NAME);
        hit
    }

    /// Store expansions for a query
    pub async fn insert(&self, query: &str, value: Vec<String>) {
        let key = cache_key(query);
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        if entries.len() >= self.max_entries {
            let evicted = Self::evict(&mut entries, self.max_entries, now);
            if evicted > 0 {
                metrics::record_cache_eviction(evicted, CACHE_NAME);
                tracing::debug!(evicted, "Expansion cache evicted entries");
            }
        }

        entries.insert(key, CacheEntry { value, expires_at: now + self.ttl });
    }

    fn evict(entries: &mut HashMap<String, CacheEntry>, max_entries: usize, now: Instant) -> usize {
        let before = entries.len();
        entries.retain(|_, entry| now <= entry.expires_at);

        if entries.len() >= max_entries {
            let mut by_expiry: Vec<(String, Instant)> = entries
                .iter()
                .map(|(key, entry)| (key.clone(), entry.expires_at))
                .collect();
            by_expiry.sort_by_key(|(_, expires_at)| *expires_at);

            let count = (entries.len() / 4).max(1);
            for (key, _) in by_expiry.into_iter().take(count) {
                entries.remove(&key);
            }
        }

        before - entries.len()
    }

    /// Number of stored entries, expired ones included
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(s: &str) -> Vec<String> {
        vec![s.to_string()]
    }

    #[test]
    fn test_cache_key_normalizes() {
        assert_eq!(cache_key("  Router Reset "), cache_key("router reset"));
        assert_ne!(cache_key("router reset"), cache_key("router"));
        assert_eq!(cache_key("x").len(), 64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let cache = ExpansionCache::new(Duration::from_secs(60), 10);
        cache.insert("query", value("query")).await;

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get("QUERY").await, Some(value("query")));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("query").await, None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cache_purges_expired_first() {
        let cache = ExpansionCache::new(Duration::from_secs(10), 4);
        cache.insert("a", value("a")).await;
        cache.insert("b", value("b")).await;

        tokio::time::advance(Duration::from_secs(11)).await;
        cache.insert("c", value("c")).await;
        cache.insert("d", value("d")).await;

        // Full: a and b are expired and go, c and d stay
        cache.insert("e", value("e")).await;
        assert_eq!(cache.len().await, 3);
        assert!(cache.get("c").await.is_some());
        assert!(cache.get("d").await.is_some());
        assert!(cache.get("e").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cache_evicts_oldest_quarter() {
        let cache = ExpansionCache::new(Duration::from_secs(3600), 8);
        for i in 0..8 {
            cache.insert(&format!("q{}", i), value("v")).await;
            tokio::time::advance(Duration::from_secs(1)).await;
        }

        cache.insert("new", value("v")).await;

        // 8 / 4 = 2 oldest-expiring entries removed
        assert_eq!(cache.len().await, 7);
        assert!(cache.get("q0").await.is_none());
        assert!(cache.get("q1").await.is_none());
        assert!(cache.get("q2").await.is_some());
        assert!(cache.get("new").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_small_cache_evicts_at_least_one() {
        let cache = ExpansionCache::new(Duration::from_secs(3600), 2);
        cache.insert("first", value("1")).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.insert("second", value("2")).await;
        cache.insert("third", value("3")).await;

        assert_eq!(cache.len().await, 2);
        assert!(cache.get("first").await.is_none());
    }
}
