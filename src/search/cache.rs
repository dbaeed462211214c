//! LRU + TTL cache over search results.
//!
//! Keys capture everything that affects a query's answer: the normalized
//! query string, mode, limit, fusion weight, score floor, preview flag, and
//! filter. Invalidation is coarse: any index mutation flushes the whole
//! cache, because the ranker does not track which documents contributed to
//! which cached answer.

use crate::config::CacheConfig;
use crate::search::types::{SearchFilter, SearchOptions, SearchResult};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

/// Cache key; float fields are stored as bit patterns so the key is `Eq`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    query: String,
    mode: crate::search::types::SearchMode,
    limit: usize,
    vector_weight_bits: u32,
    min_score_bits: u32,
    include_content: bool,
    filter: Option<SearchFilter>,
}

impl QueryKey {
    pub fn new(query: &str, options: &SearchOptions) -> Self {
        Self {
            query: normalize_query(query),
            mode: options.mode,
            limit: options.limit,
            vector_weight_bits: options.vector_weight.to_bits(),
            min_score_bits: options.min_score.to_bits(),
            include_content: options.include_content,
            filter: options.filter.clone(),
        }
    }
}

/// Lowercases, trims, and collapses internal whitespace.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Hit/miss counters for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

struct CacheEntry {
    results: Vec<SearchResult>,
    cached_at: Instant,
}

/// Bounded result cache with per-entry TTL.
pub struct QueryCache {
    entries: LruCache<QueryKey, CacheEntry>,
    ttl: Duration,
    hits: u64,
    misses: u64,
}

impl QueryCache {
    pub fn new(config: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            ttl: Duration::from_secs(config.ttl_secs),
            hits: 0,
            misses: 0,
        }
    }

    /// Looks up a key, refreshing recency. Expired entries count as misses
    /// and are evicted.
    pub fn get(&mut self, key: &QueryKey) -> Option<Vec<SearchResult>> {
        let expired = match self.entries.peek(key) {
            Some(entry) => entry.cached_at.elapsed() > self.ttl,
            None => {
                self.misses += 1;
                return None;
            }
        };
        if expired {
            self.entries.pop(key);
            self.misses += 1;
            return None;
        }
        self.hits += 1;
        self.entries.get(key).map(|entry| entry.results.clone())
    }

    pub fn insert(&mut self, key: QueryKey, results: Vec<SearchResult>) {
        self.entries.put(
            key,
            CacheEntry {
                results,
                cached_at: Instant::now(),
            },
        );
    }

    /// Drops every entry. Called on any index mutation.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::types::{Provenance, SearchMode};

    fn result(path: &str) -> SearchResult {
        SearchResult {
            path: path.into(),
            score: 1.0,
            provenance: Provenance::Lexical,
            matched_terms: None,
            similarity: None,
            content_preview: None,
            language: None,
        }
    }

    fn cache(capacity: usize, ttl_secs: u64) -> QueryCache {
        QueryCache::new(&CacheConfig { capacity, ttl_secs })
    }

    #[test]
    fn test_normalize_query() {
        assert_eq!(normalize_query("  Hello   World "), "hello world");
        assert_eq!(normalize_query("AUTH user"), "auth user");
        assert_eq!(normalize_query(""), "");
    }

    #[test]
    fn test_hit_and_miss_counters() {
        let mut cache = cache(4, 60);
        let key = QueryKey::new("auth", &SearchOptions::default());

        assert!(cache.get(&key).is_none());
        cache.insert(key.clone(), vec![result("a.rs")]);
        assert_eq!(cache.get(&key).unwrap().len(), 1);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_key_varies_with_options() {
        let mut cache = cache(8, 60);
        let lexical = QueryKey::new(
            "auth",
            &SearchOptions {
                mode: SearchMode::Lexical,
                ..SearchOptions::default()
            },
        );
        let hybrid = QueryKey::new("auth", &SearchOptions::default());
        cache.insert(lexical.clone(), vec![result("lex.rs")]);

        assert!(cache.get(&hybrid).is_none());
        assert!(cache.get(&lexical).is_some());
    }

    #[test]
    fn test_equivalent_queries_share_key() {
        let opts = SearchOptions::default();
        assert_eq!(QueryKey::new("Auth  User", &opts), QueryKey::new("auth user", &opts));
    }

    #[test]
    fn test_ttl_expiry() {
        let mut cache = cache(4, 0);
        let key = QueryKey::new("auth", &SearchOptions::default());
        cache.insert(key.clone(), vec![result("a.rs")]);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_eviction() {
        let mut cache = cache(2, 60);
        let opts = SearchOptions::default();
        let k1 = QueryKey::new("one", &opts);
        let k2 = QueryKey::new("two", &opts);
        let k3 = QueryKey::new("three", &opts);

        cache.insert(k1.clone(), vec![]);
        cache.insert(k2.clone(), vec![]);
        // Touch k1 so k2 is the eviction candidate.
        cache.get(&k1);
        cache.insert(k3, vec![]);

        assert!(cache.get(&k1).is_some());
        assert!(cache.get(&k2).is_none());
    }

    #[test]
    fn test_clear() {
        let mut cache = cache(4, 60);
        let key = QueryKey::new("auth", &SearchOptions::default());
        cache.insert(key.clone(), vec![result("a.rs")]);
        cache.clear();
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }
}
