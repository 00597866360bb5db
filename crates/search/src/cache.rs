// crates/search/src/cache.rs
//! LRU + TTL cache for search results, and query analytics.

use crate::{SearchHit, SearchQuery};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_MAX_SIZE: usize = 1000;
const DEFAULT_TTL_SECS: u64 = 300;
const QUERY_TIME_WINDOW: usize = 1000;

/// Cached search pages keyed by the query's canonical serialization.
/// Hits move the key to most-recently-used; inserts evict from the LRU
/// end once over capacity.
#[derive(Debug)]
pub struct QueryCache {
    max_size: usize,
    ttl: Duration,
    inner: Mutex<CacheInner>,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, (Instant, Vec<SearchHit>)>,
    access_order: VecDeque<String>,
}

impl QueryCache {
    pub fn new(max_size: usize, ttl_seconds: u64) -> Self {
        Self {
            max_size: if max_size == 0 { DEFAULT_MAX_SIZE } else { max_size },
            ttl: Duration::from_secs(if ttl_seconds == 0 {
                DEFAULT_TTL_SECS
            } else {
                ttl_seconds
            }),
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn get(&self, query: &SearchQuery) -> Option<Vec<SearchHit>> {
        let key = query.cache_key();
        let mut inner = self.inner.lock().unwrap();

        let expired = match inner.entries.get(&key) {
            Some((inserted, _)) => inserted.elapsed() > self.ttl,
            None => return None,
        };

        if expired {
            inner.entries.remove(&key);
            inner.access_order.retain(|k| k != &key);
            return None;
        }

        // Move to MRU position.
        inner.access_order.retain(|k| k != &key);
        inner.access_order.push_back(key.clone());

        inner.entries.get(&key).map(|(_, hits)| hits.clone())
    }

    pub fn put(&self, query: &SearchQuery, hits: Vec<SearchHit>) {
        let key = query.cache_key();
        let mut inner = self.inner.lock().unwrap();

        if inner.entries.contains_key(&key) {
            inner.access_order.retain(|k| k != &key);
        }
        inner.entries.insert(key.clone(), (Instant::now(), hits));
        inner.access_order.push_back(key);

        while inner.entries.len() > self.max_size {
            match inner.access_order.pop_front() {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.clear();
        inner.access_order.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE, DEFAULT_TTL_SECS)
    }
}

/// Search metrics: volume, cache effectiveness, and the query-time
/// distribution over the last thousand queries.
#[derive(Debug, Default)]
pub struct SearchAnalytics {
    inner: Mutex<AnalyticsInner>,
}

#[derive(Debug, Default)]
struct AnalyticsInner {
    total_searches: u64,
    cache_hits: u64,
    cache_misses: u64,
    query_times: VecDeque<Duration>,
}

/// Point-in-time view of the analytics counters.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsSnapshot {
    pub total_searches: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub avg_query_time: Duration,
    pub query_time_p50: Duration,
    pub query_time_p95: Duration,
    pub query_time_p99: Duration,
}

impl SearchAnalytics {
    pub fn record_search(&self, elapsed: Duration, cache_hit: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.total_searches += 1;
        if cache_hit {
            inner.cache_hits += 1;
        } else {
            inner.cache_misses += 1;
        }
        inner.query_times.push_back(elapsed);
        while inner.query_times.len() > QUERY_TIME_WINDOW {
            inner.query_times.pop_front();
        }
    }

    pub fn snapshot(&self) -> AnalyticsSnapshot {
        let inner = self.inner.lock().unwrap();

        let lookups = inner.cache_hits + inner.cache_misses;
        let cache_hit_rate = if lookups > 0 {
            inner.cache_hits as f64 / lookups as f64
        } else {
            0.0
        };

        let mut sorted: Vec<Duration> = inner.query_times.iter().copied().collect();
        sorted.sort();
        let percentile = |p: f64| -> Duration {
            if sorted.is_empty() {
                return Duration::ZERO;
            }
            let idx = ((sorted.len() as f64 * p) as usize).min(sorted.len() - 1);
            sorted[idx]
        };
        let avg = if sorted.is_empty() {
            Duration::ZERO
        } else {
            sorted.iter().sum::<Duration>() / sorted.len() as u32
        };

        AnalyticsSnapshot {
            total_searches: inner.total_searches,
            cache_hits: inner.cache_hits,
            cache_misses: inner.cache_misses,
            cache_hit_rate,
            avg_query_time: avg,
            query_time_p50: percentile(0.50),
            query_time_p95: percentile(0.95),
            query_time_p99: percentile(0.99),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(post_id: &str) -> SearchHit {
        SearchHit {
            post_id: post_id.into(),
            title: "t".into(),
            author: "a".into(),
            subreddit: "r/rust".into(),
            url: String::new(),
            file_path: format!("/data/{post_id}.md"),
            created_utc: 0,
            upvotes: 0,
            reply_count: 0,
            content_preview: String::new(),
            snippet: String::new(),
            rank_score: 0.0,
            tags: Vec::new(),
        }
    }

    #[test]
    fn test_put_get_round_trip() {
        let cache = QueryCache::default();
        let query = SearchQuery::text("rust");
        cache.put(&query, vec![hit("a")]);

        let cached = cache.get(&query).unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].post_id, "a");
    }

    #[test]
    fn test_get_within_ttl_is_idempotent() {
        let cache = QueryCache::default();
        let query = SearchQuery::text("rust");
        cache.put(&query, vec![hit("a")]);
        assert_eq!(cache.get(&query), cache.get(&query));
    }

    #[test]
    fn test_different_queries_do_not_collide() {
        let cache = QueryCache::default();
        cache.put(&SearchQuery::text("rust"), vec![hit("a")]);
        assert!(cache.get(&SearchQuery::text("python")).is_none());
    }

    #[test]
    fn test_lru_eviction_order() {
        let cache = QueryCache::new(2, 300);
        let q1 = SearchQuery::text("one");
        let q2 = SearchQuery::text("two");
        let q3 = SearchQuery::text("three");

        cache.put(&q1, vec![hit("a")]);
        cache.put(&q2, vec![hit("b")]);
        // Touch q1 so q2 becomes least recently used.
        cache.get(&q1);
        cache.put(&q3, vec![hit("c")]);

        assert!(cache.get(&q1).is_some());
        assert!(cache.get(&q2).is_none(), "LRU entry evicted");
        assert!(cache.get(&q3).is_some());
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = QueryCache::new(10, 1);
        let query = SearchQuery::text("rust");
        cache.put(&query, vec![hit("a")]);
        std::thread::sleep(Duration::from_millis(1100));
        assert!(cache.get(&query).is_none());
    }

    #[test]
    fn test_analytics_hit_rate_and_percentiles() {
        let analytics = SearchAnalytics::default();
        analytics.record_search(Duration::from_millis(10), false);
        analytics.record_search(Duration::from_millis(20), true);
        analytics.record_search(Duration::from_millis(30), true);
        analytics.record_search(Duration::from_millis(40), true);

        let snap = analytics.snapshot();
        assert_eq!(snap.total_searches, 4);
        assert_eq!(snap.cache_hits, 3);
        assert_eq!(snap.cache_misses, 1);
        assert!((snap.cache_hit_rate - 0.75).abs() < f64::EPSILON);
        assert_eq!(snap.query_time_p50, Duration::from_millis(30));
        assert!(snap.query_time_p99 >= snap.query_time_p50);
    }
}
