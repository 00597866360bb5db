// crates/core/src/cache.rs
//! TTL-bounded response cache for fetched post JSON.
//!
//! Keys are caller-composed (the fetch layer uses URL plus an
//! authenticated flag). Eviction happens inline on insert: expired
//! entries first, then oldest-by-insertion until under capacity.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_TTL_SECS: u64 = 300;
const DEFAULT_MAX_ENTRIES: usize = 1000;

#[derive(Debug)]
pub struct ResponseCache<V> {
    ttl: Duration,
    max_entries: usize,
    entries: Mutex<HashMap<String, (Instant, V)>>,
}

impl<V: Clone> ResponseCache<V> {
    /// Zero values fall back to the defaults (300 s TTL, 1000 entries).
    pub fn new(ttl_seconds: u64, max_entries: usize) -> Self {
        let ttl_seconds = if ttl_seconds == 0 {
            DEFAULT_TTL_SECS
        } else {
            ttl_seconds
        };
        let max_entries = if max_entries == 0 {
            DEFAULT_MAX_ENTRIES
        } else {
            max_entries
        };
        Self {
            ttl: Duration::from_secs(ttl_seconds),
            max_entries,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached value if present and fresh.
    pub fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some((inserted, value)) if inserted.elapsed() < self.ttl => Some(value.clone()),
            _ => None,
        }
    }

    /// Insert a value, evicting expired then oldest entries as needed.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();

        entries.retain(|_, (inserted, _)| now.duration_since(*inserted) < self.ttl);

        entries.insert(key.into(), (now, value));

        while entries.len() > self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, (inserted, _))| *inserted)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    entries.remove(&k);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

impl<V: Clone> Default for ResponseCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL_SECS, DEFAULT_MAX_ENTRIES)
    }
}

impl<V: Clone> From<&crate::config::CacheConfig> for ResponseCache<V> {
    fn from(config: &crate::config::CacheConfig) -> Self {
        Self::new(config.ttl_seconds, config.max_entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_within_ttl_returns_same_value() {
        let cache: ResponseCache<String> = ResponseCache::new(300, 10);
        cache.insert("k", "v".to_string());
        assert_eq!(cache.get("k"), Some("v".to_string()));
        assert_eq!(cache.get("k"), Some("v".to_string()));
    }

    #[test]
    fn test_miss_on_absent_key() {
        let cache: ResponseCache<i32> = ResponseCache::new(300, 10);
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn test_expired_entry_not_returned() {
        let cache: ResponseCache<i32> = ResponseCache::new(1, 10);
        cache.insert("k", 1);
        std::thread::sleep(Duration::from_millis(1100));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache: ResponseCache<i32> = ResponseCache::new(300, 3);
        cache.insert("a", 1);
        std::thread::sleep(Duration::from_millis(5));
        cache.insert("b", 2);
        std::thread::sleep(Duration::from_millis(5));
        cache.insert("c", 3);
        std::thread::sleep(Duration::from_millis(5));
        cache.insert("d", 4);

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("a"), None, "oldest entry should be evicted");
        assert_eq!(cache.get("d"), Some(4));
    }

    #[test]
    fn test_insert_cleans_expired_entries() {
        let cache: ResponseCache<i32> = ResponseCache::new(1, 10);
        cache.insert("old", 1);
        std::thread::sleep(Duration::from_millis(1100));
        cache.insert("new", 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_zero_config_falls_back_to_defaults() {
        let cache: ResponseCache<i32> = ResponseCache::new(0, 0);
        assert_eq!(cache.ttl, Duration::from_secs(300));
        assert_eq!(cache.max_entries, 1000);
    }
}
