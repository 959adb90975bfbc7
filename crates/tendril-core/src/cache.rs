//! On-disk cache for the signal graph

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::graph::SignalGraph;
use crate::model::{ConnectionSite, EmissionSite, GraphMetadata, SignalDefinition};

/// Cache directory: .tendril/
pub const CACHE_DIR: &str = ".tendril";

/// Graph cache file
pub const GRAPH_CACHE: &str = "signal_graph.json";

/// Bumped whenever the persisted layout or the extraction rules change.
pub const GRAPH_SCHEMA_VERSION: &str = "1.0.0";

/// Get cache directory path
pub fn cache_dir(root: &Path) -> PathBuf {
    root.join(CACHE_DIR)
}

/// Get graph cache file path
pub fn graph_cache_path(root: &Path) -> PathBuf {
    root.join(CACHE_DIR).join(GRAPH_CACHE)
}

/// Ensure cache directory exists
pub fn ensure_cache_dir(root: &Path) -> std::io::Result<()> {
    let cache = cache_dir(root);
    if !cache.exists() {
        std::fs::create_dir_all(&cache)?;
    }
    Ok(())
}

/// Clear cache directory
pub fn clear_cache(root: &Path) -> std::io::Result<()> {
    let cache = cache_dir(root);
    if cache.exists() {
        std::fs::remove_dir_all(&cache)?;
    }
    Ok(())
}

#[derive(Serialize)]
struct PersistedGraphRef<'a> {
    version: &'a str,
    metadata: &'a GraphMetadata,
    definitions: &'a BTreeMap<String, Vec<SignalDefinition>>,
    emissions: &'a BTreeMap<String, Vec<EmissionSite>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    connections: Option<&'a BTreeMap<String, Vec<ConnectionSite>>>,
}

#[derive(Deserialize)]
struct PersistedGraph {
    version: String,
    metadata: GraphMetadata,
    definitions: BTreeMap<String, Vec<SignalDefinition>>,
    emissions: BTreeMap<String, Vec<EmissionSite>>,
    #[serde(default)]
    connections: Option<BTreeMap<String, Vec<ConnectionSite>>>,
}

/// Reads and writes versioned graph JSON. A file written under another
/// schema version is treated as absent, never partially loaded.
#[derive(Debug, Clone)]
pub struct GraphSerializer {
    version: String,
}

impl GraphSerializer {
    pub fn new() -> Self {
        Self::with_version(GRAPH_SCHEMA_VERSION)
    }

    pub fn with_version(version: impl Into<String>) -> Self {
        GraphSerializer {
            version: version.into(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Write `graph` as pretty JSON, stamped with the current schema version.
    pub fn save(&self, graph: &SignalGraph, path: &Path) -> crate::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut metadata = graph.metadata.clone();
        metadata.version = self.version.clone();

        let persisted = PersistedGraphRef {
            version: &self.version,
            metadata: &metadata,
            definitions: &graph.definitions,
            emissions: &graph.emissions,
            connections: graph.connections.as_ref(),
        };

        let json_str = serde_json::to_string_pretty(&persisted)?;
        std::fs::write(path, json_str)?;

        tracing::debug!("Signal graph cache saved: {}", path.display());
        Ok(())
    }

    /// Load a cached graph. Missing, unreadable, malformed, or
    /// version-mismatched files all yield `None`.
    pub fn load(&self, path: &Path) -> Option<SignalGraph> {
        let json_str = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("Cannot read graph cache {}: {}", path.display(), e);
                return None;
            }
        };

        match self.decode(&json_str) {
            Ok(graph) => {
                tracing::debug!("Signal graph cache loaded from: {}", path.display());
                Some(graph)
            }
            Err(e) => {
                tracing::warn!("Discarding graph cache {}: {}", path.display(), e);
                None
            }
        }
    }

    /// True when the cache is unusable or older than the newest source file.
    pub fn is_stale(&self, path: &Path, latest_source_mtime_ms: i64) -> bool {
        match self.load(path) {
            Some(graph) => graph.metadata.timestamp < latest_source_mtime_ms,
            None => true,
        }
    }

    fn decode(&self, json_str: &str) -> crate::Result<SignalGraph> {
        let value: serde_json::Value = serde_json::from_str(json_str)?;

        let stored = value.get("version").and_then(|v| v.as_str()).unwrap_or("<missing>");
        if stored != self.version {
            tracing::warn!(
                "Graph cache version mismatch: stored {}, current {}",
                stored,
                self.version
            );
            return Err(crate::TendrilError::Validation(format!(
                "version {stored} does not match {}",
                self.version
            )));
        }

        let persisted: PersistedGraph = serde_json::from_value(value)?;
        if persisted.metadata.version != persisted.version {
            return Err(crate::TendrilError::Validation(format!(
                "metadata version {} does not match {}",
                persisted.metadata.version, persisted.version
            )));
        }

        validate_keys(&persisted.definitions, |d| &d.name)?;
        validate_keys(&persisted.emissions, |e| &e.signal)?;
        if let Some(connections) = &persisted.connections {
            validate_keys(connections, |c| &c.signal)?;
        }

        Ok(SignalGraph {
            metadata: persisted.metadata,
            definitions: persisted.definitions,
            emissions: persisted.emissions,
            connections: persisted.connections,
        })
    }
}

impl Default for GraphSerializer {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_keys<T>(
    map: &BTreeMap<String, Vec<T>>,
    name_of: impl Fn(&T) -> &String,
) -> crate::Result<()> {
    for (key, records) in map {
        if let Some(bad) = records.iter().find(|r| name_of(r) != key) {
            return Err(crate::TendrilError::Validation(format!(
                "record for {} stored under key {}",
                name_of(bad),
                key
            )));
        }
    }
    Ok(())
}
