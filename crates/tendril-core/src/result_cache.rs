//! Bounded LRU cache for derived results
//!
//! Entries are bounded by count and, optionally, by total byte size and age.
//! The cache does no locking of its own; owners that share it wrap it in a
//! mutex.

use std::hash::Hash;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    size_bytes: usize,
    inserted_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, ttl: Option<Duration>) -> bool {
        ttl.is_some_and(|ttl| self.inserted_at.elapsed() > ttl)
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
    pub entries: usize,
    pub capacity: usize,
    pub total_bytes: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bytes: Option<usize>,
}

pub struct ResultCache<K: Hash + Eq, V> {
    entries: LruCache<K, CacheEntry<V>>,
    capacity: usize,
    max_bytes: Option<usize>,
    ttl: Option<Duration>,
    total_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<K: Hash + Eq + Clone, V> ResultCache<K, V> {
    /// A cache holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        ResultCache {
            entries: LruCache::unbounded(),
            capacity: capacity.max(1),
            max_bytes: None,
            ttl: None,
            total_bytes: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    /// Look up `key`, marking it most recently used. Expired entries are
    /// dropped and reported as misses.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let expired = match self.entries.peek(key) {
            Some(entry) => entry.is_expired(self.ttl),
            None => {
                self.misses += 1;
                return None;
            }
        };

        if expired {
            self.remove(key);
            self.misses += 1;
            return None;
        }

        self.hits += 1;
        self.entries.get(key).map(|entry| &entry.value)
    }

    /// Look up without touching recency or the hit counters.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries
            .peek(key)
            .filter(|entry| !entry.is_expired(self.ttl))
            .map(|entry| &entry.value)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.peek(key).is_some()
    }

    /// Store `value`, replacing any previous value under `key`, then evict
    /// least recently used entries until both bounds hold. An entry larger
    /// than the whole byte budget is itself evicted. Returns the number of
    /// entries evicted.
    pub fn insert(&mut self, key: K, value: V, size_bytes: usize) -> usize {
        if let Some(old) = self.entries.pop(&key) {
            self.total_bytes -= old.size_bytes;
        }

        self.entries.put(
            key,
            CacheEntry {
                value,
                size_bytes,
                inserted_at: Instant::now(),
            },
        );
        self.total_bytes += size_bytes;

        let mut evicted = 0;
        while self.over_budget() {
            let Some((_, entry)) = self.entries.pop_lru() else {
                break;
            };
            self.total_bytes -= entry.size_bytes;
            evicted += 1;
        }

        if evicted > 0 {
            self.evictions += evicted as u64;
            tracing::debug!(
                "Result cache evicted {} entries ({} remain, {} bytes)",
                evicted,
                self.entries.len(),
                self.total_bytes
            );
        }
        evicted
    }

    fn over_budget(&self) -> bool {
        self.entries.len() > self.capacity
            || self.max_bytes.is_some_and(|max| self.total_bytes > max)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let entry = self.entries.pop(key)?;
        self.total_bytes -= entry.size_bytes;
        Some(entry.value)
    }

    /// Keep only the entries for which `keep` returns true. Returns the
    /// number removed.
    pub fn retain(&mut self, mut keep: impl FnMut(&K, &V) -> bool) -> usize {
        let doomed: Vec<K> = self
            .entries
            .iter()
            .filter(|(k, entry)| !keep(k, &entry.value))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        let lookups = self.hits + self.misses;
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            hit_rate: if lookups > 0 {
                self.hits as f64 / lookups as f64
            } else {
                0.0
            },
            entries: self.entries.len(),
            capacity: self.capacity,
            total_bytes: self.total_bytes,
            max_bytes: self.max_bytes,
        }
    }
}

impl<K: Hash + Eq, V> std::fmt::Debug for ResultCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("entries", &self.entries.len())
            .field("capacity", &self.capacity)
            .field("total_bytes", &self.total_bytes)
            .finish()
    }
}
