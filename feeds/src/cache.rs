//! Upstream response caching with TTL support.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::debug;

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    cached_at: DateTime<Utc>,
    ttl: Option<Duration>,
}

impl<T> CacheEntry<T> {
    fn is_valid(&self, now: DateTime<Utc>) -> bool {
        match self.ttl {
            Some(ttl) => now.signed_duration_since(self.cached_at) < ttl,
            None => true,
        }
    }
}

/// Thread-safe keyed cache. Entries without a TTL never expire.
pub struct ResponseCache<T> {
    entries: DashMap<String, CacheEntry<T>>,
    default_ttl: Option<Duration>,
}

impl<T: Clone> ResponseCache<T> {
    /// Create a cache whose entries expire after `default_ttl`.
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl: Some(default_ttl),
        }
    }

    /// Get a value if present and not expired.
    pub fn get(&self, key: &str) -> Option<T> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_valid(Utc::now()) {
                debug!(key = key, "Cache hit");
                return Some(entry.value.clone());
            }
            debug!(key = key, "Cache entry expired");
            drop(entry);
            self.entries.remove(key);
        }
        None
    }

    /// Insert with the default TTL.
    pub fn insert(&self, key: impl Into<String>, value: T) {
        self.insert_with_ttl(key, value, self.default_ttl);
    }

    /// Insert with a custom TTL; `None` keeps the entry until removed.
    pub fn insert_with_ttl(&self, key: impl Into<String>, value: T, ttl: Option<Duration>) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                value,
                cached_at: Utc::now(),
                ttl,
            },
        );
    }

    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries.
    pub fn evict_expired(&self) {
        let now = Utc::now();
        self.entries.retain(|_, entry| entry.is_valid(now));
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let now = Utc::now();
        let total = self.entries.len();
        let valid = self.entries.iter().filter(|e| e.is_valid(now)).count();

        CacheStats {
            total_entries: total,
            valid_entries: valid,
            expired_entries: total - valid,
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
}
