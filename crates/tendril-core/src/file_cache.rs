//! Content-hash-addressed per-file cache
//!
//! Keyed by path, validated by the SHA-256 of the file bytes. A cheap
//! mtime+size check lets callers skip reading files that have not been
//! touched since they were cached.

use std::path::{Path, PathBuf};
use std::time::Duration;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Bumped when the persisted entry layout changes.
const FINGERPRINT_FORMAT: u32 = 1;

/// Lowercase hex SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HashEntry<V> {
    pub content_hash: String,
    pub modified_ms: i64,
    pub size_bytes: u64,
    /// When the entry was written, unix milliseconds.
    pub stored_at_ms: i64,
    pub value: V,
}

#[derive(Serialize, Deserialize)]
struct PersistedEntries<V> {
    format: u32,
    entries: Vec<(PathBuf, HashEntry<V>)>,
}

/// Safe to share between threads; lookups and inserts never block each
/// other on different paths.
#[derive(Debug)]
pub struct FileHashCache<V> {
    entries: DashMap<PathBuf, HashEntry<V>>,
}

impl<V: Clone> FileHashCache<V> {
    pub fn new() -> Self {
        FileHashCache {
            entries: DashMap::new(),
        }
    }

    /// Value cached for `path` if it was stored under the same content hash.
    pub fn get(&self, path: &Path, hash: &str) -> Option<V> {
        self.entries
            .get(path)
            .filter(|entry| entry.content_hash == hash)
            .map(|entry| entry.value.clone())
    }

    /// Value cached for `path` if its modification time and size are
    /// unchanged.
    pub fn get_unchanged(&self, path: &Path, modified_ms: i64, size_bytes: u64) -> Option<V> {
        self.entries
            .get(path)
            .filter(|entry| entry.modified_ms == modified_ms && entry.size_bytes == size_bytes)
            .map(|entry| entry.value.clone())
    }

    pub fn entry(&self, path: &Path) -> Option<HashEntry<V>> {
        self.entries.get(path).map(|entry| entry.value().clone())
    }

    pub fn stored_hash(&self, path: &Path) -> Option<String> {
        self.entries.get(path).map(|entry| entry.content_hash.clone())
    }

    pub fn insert(
        &self,
        path: impl Into<PathBuf>,
        content_hash: impl Into<String>,
        modified_ms: i64,
        size_bytes: u64,
        value: V,
    ) {
        self.entries.insert(
            path.into(),
            HashEntry {
                content_hash: content_hash.into(),
                modified_ms,
                size_bytes,
                stored_at_ms: crate::now_ms(),
                value,
            },
        );
    }

    /// Record a new mtime/size for an entry whose content is unchanged.
    /// Returns false when `path` is not cached.
    pub fn touch(&self, path: &Path, modified_ms: i64, size_bytes: u64) -> bool {
        match self.entries.get_mut(path) {
            Some(mut entry) => {
                entry.modified_ms = modified_ms;
                entry.size_bytes = size_bytes;
                entry.stored_at_ms = crate::now_ms();
                true
            }
            None => false,
        }
    }

    pub fn invalidate(&self, path: &Path) -> bool {
        self.entries.remove(path).is_some()
    }

    /// Keep only paths for which `keep` returns true. Returns the number
    /// removed.
    pub fn retain_paths(&self, mut keep: impl FnMut(&Path) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|path, _| keep(path.as_path()));
        before - self.entries.len()
    }

    /// Drop entries stored more than `age` ago. Returns the number removed.
    pub fn prune_older_than(&self, age: Duration) -> usize {
        let cutoff = crate::now_ms() - age.as_millis() as i64;
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.stored_at_ms >= cutoff);
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::debug!("Pruned {} file cache entries older than {:?}", removed, age);
        }
        removed
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

    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.entries.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }
}

impl<V: Clone + Serialize + DeserializeOwned> FileHashCache<V> {
    /// Persist every entry with bincode.
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let mut entries: Vec<(PathBuf, HashEntry<V>)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let persisted = PersistedEntries {
            format: FINGERPRINT_FORMAT,
            entries,
        };
        let encoded = bincode::serialize(&persisted)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, encoded)?;

        tracing::debug!("Saved {} file cache entries to {}", self.len(), path.display());
        Ok(())
    }

    /// Load a persisted cache. Missing, unreadable or incompatible files
    /// yield an empty cache.
    pub fn load(path: &Path) -> Self {
        let cache = Self::new();

        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return cache,
            Err(e) => {
                tracing::warn!("Cannot read file cache {}: {}", path.display(), e);
                return cache;
            }
        };

        match bincode::deserialize::<PersistedEntries<V>>(&bytes) {
            Ok(persisted) if persisted.format == FINGERPRINT_FORMAT => {
                for (file, entry) in persisted.entries {
                    cache.entries.insert(file, entry);
                }
                tracing::debug!("Loaded {} file cache entries from {}", cache.len(), path.display());
            }
            Ok(persisted) => {
                tracing::warn!(
                    "Ignoring file cache {}: format {} (expected {})",
                    path.display(),
                    persisted.format,
                    FINGERPRINT_FORMAT
                );
            }
            Err(e) => {
                tracing::warn!("Ignoring unreadable file cache {}: {}", path.display(), e);
            }
        }
        cache
    }
}

impl<V: Clone> Default for FileHashCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
