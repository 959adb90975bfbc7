//! Cached, timeout-guarded artifact rendering

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tendril_core::{ErrorCategory, ResultCache, TendrilError, now_ms};
use tokio_util::sync::CancellationToken;

use crate::metrics::RenderMetrics;
use crate::renderer::{
    ArtifactMetadata, DEFAULT_RENDERER_VERSION, MetadataOverrides, Renderer, escape_html,
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_CAPACITY: usize = 64;
pub const DEFAULT_ERROR_LOG_SIZE: usize = 50;

const SHUT_DOWN_MESSAGE: &str = "render engine is shut down";

/// Hex digits of the data hash kept in cache keys.
const DATA_HASH_LEN: usize = 16;

/// One cached render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactCacheEntry {
    pub metadata: ArtifactMetadata,
    pub html: String,
    pub data_hash: String,
    pub schema_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RenderFailure {
    Timeout { after_ms: u64 },
    Error { message: String },
    UnknownRenderer,
}

impl std::fmt::Display for RenderFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderFailure::Timeout { after_ms } => write!(f, "timed out after {after_ms}ms"),
            RenderFailure::Error { message } => write!(f, "{message}"),
            RenderFailure::UnknownRenderer => write!(f, "no renderer registered"),
        }
    }
}

impl RenderFailure {
    /// The failure in the shared error taxonomy. Timeouts are resource
    /// exhaustion; a missing renderer is a caller error.
    pub fn to_error(&self, artifact_type: &str) -> TendrilError {
        match self {
            RenderFailure::Timeout { after_ms } => TendrilError::Resource {
                artifact_type: artifact_type.to_string(),
                timeout_ms: *after_ms,
            },
            RenderFailure::Error { message } => TendrilError::Internal {
                context: format!("rendering {artifact_type}"),
                message: message.clone(),
            },
            RenderFailure::UnknownRenderer => {
                TendrilError::Validation(format!("no renderer registered for {artifact_type}"))
            }
        }
    }
}

/// What `render_artifact` hands back. `error` is set when `html` is a
/// placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedArtifact {
    pub html: String,
    pub cached: bool,
    pub metadata: ArtifactMetadata,
    pub data_hash: String,
    pub schema_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RenderFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderErrorRecord {
    pub artifact_type: String,
    pub failure: RenderFailure,
    pub category: ErrorCategory,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactCacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub evictions: u64,
    pub total_bytes: usize,
    pub per_type: BTreeMap<String, usize>,
}

struct Registration {
    renderer: Arc<dyn Renderer>,
    version: String,
}

/// Renders artifacts through registered renderers, caching successful output
/// by (type, data hash, renderer version).
///
/// Every call returns HTML. Failures (timeout, renderer error, unknown type)
/// produce an escaped placeholder, are logged and counted, and are never
/// cached. Concurrent calls for the same key are not coalesced; each one
/// renders and the last to finish owns the cache slot.
pub struct ArtifactEngine {
    renderers: RwLock<HashMap<String, Registration>>,
    cache: Mutex<ResultCache<String, ArtifactCacheEntry>>,
    metrics: Mutex<RenderMetrics>,
    errors: Mutex<VecDeque<RenderErrorRecord>>,
    error_log_size: usize,
    timeout: Duration,
    shutdown: CancellationToken,
}

impl ArtifactEngine {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        ArtifactEngine {
            renderers: RwLock::new(HashMap::new()),
            cache: Mutex::new(ResultCache::new(capacity)),
            metrics: Mutex::new(RenderMetrics::default()),
            errors: Mutex::new(VecDeque::new()),
            error_log_size: DEFAULT_ERROR_LOG_SIZE,
            timeout: DEFAULT_TIMEOUT,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_error_log_size(mut self, size: usize) -> Self {
        self.error_log_size = size.max(1);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register `renderer` under its artifact type at `version`. Replacing a
    /// registration drops every cached entry of that type rendered under a
    /// different version.
    pub fn register_renderer(&self, renderer: Arc<dyn Renderer>, version: impl Into<String>) {
        let version = version.into();
        let artifact_type = renderer.artifact_type().to_string();

        let previous = self.renderers.write().insert(
            artifact_type.clone(),
            Registration {
                renderer,
                version: version.clone(),
            },
        );

        if let Some(previous) = previous {
            if previous.version != version {
                let dropped = self.cache.lock().retain(|_, entry| {
                    entry.metadata.artifact_type != artifact_type || entry.schema_version == version
                });
                tracing::info!(
                    "Renderer {} moved {} -> {}, dropped {} cached artifacts",
                    artifact_type,
                    previous.version,
                    version,
                    dropped
                );
            }
        }
    }

    /// Register at [`DEFAULT_RENDERER_VERSION`].
    pub fn register(&self, renderer: Arc<dyn Renderer>) {
        self.register_renderer(renderer, DEFAULT_RENDERER_VERSION);
    }

    pub fn renderer_version(&self, artifact_type: &str) -> Option<String> {
        self.renderers
            .read()
            .get(artifact_type)
            .map(|r| r.version.clone())
    }

    pub fn artifact_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.renderers.read().keys().cloned().collect();
        types.sort();
        types
    }

    pub async fn render_artifact(
        &self,
        artifact_type: &str,
        data: &Value,
        overrides: Option<&MetadataOverrides>,
    ) -> RenderedArtifact {
        let data_hash = data_hash(data);

        let registration = self
            .renderers
            .read()
            .get(artifact_type)
            .map(|r| (Arc::clone(&r.renderer), r.version.clone()));
        let Some((renderer, version)) = registration else {
            let metadata = ArtifactMetadata {
                artifact_type: artifact_type.to_string(),
                title: artifact_type.to_string(),
                description: String::new(),
                timestamp: now_ms(),
            };
            return self.failed(metadata, data_hash, String::new(), RenderFailure::UnknownRenderer, overrides);
        };

        let key = cache_key(artifact_type, &data_hash, &version);
        let hit = self.cache.lock().get(&key).cloned();
        if let Some(entry) = hit {
            self.metrics.lock().record_hit();
            tracing::debug!("Artifact cache hit for {}", key);
            let mut metadata = entry.metadata;
            if let Some(overrides) = overrides {
                overrides.apply(&mut metadata);
            }
            return RenderedArtifact {
                html: entry.html,
                cached: true,
                metadata,
                data_hash: entry.data_hash,
                schema_version: entry.schema_version,
                error: None,
            };
        }
        self.metrics.lock().record_miss();

        let mut metadata = ArtifactMetadata {
            artifact_type: artifact_type.to_string(),
            title: renderer.title().to_string(),
            description: renderer.description().to_string(),
            timestamp: now_ms(),
        };
        if let Some(overrides) = overrides {
            overrides.apply(&mut metadata);
        }

        let cancel = self.shutdown.child_token();
        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            result = tokio::time::timeout(self.timeout, renderer.render(data, cancel.clone())) => Some(result),
        };
        let Some(outcome) = outcome else {
            let failure = RenderFailure::Error {
                message: SHUT_DOWN_MESSAGE.to_string(),
            };
            return self.failed(metadata, data_hash, version, failure, None);
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.metrics.lock().record_render(elapsed_ms);

        match outcome {
            Ok(Ok(html)) => {
                tracing::debug!("Rendered {} in {}ms ({} bytes)", key, elapsed_ms, html.len());
                let entry = ArtifactCacheEntry {
                    metadata: metadata.clone(),
                    html: html.clone(),
                    data_hash: data_hash.clone(),
                    schema_version: version.clone(),
                };
                let evicted = self.cache.lock().insert(key, entry, html.len());
                if evicted > 0 {
                    tracing::debug!("Evicted {} cached artifacts", evicted);
                }
                RenderedArtifact {
                    html,
                    cached: false,
                    metadata,
                    data_hash,
                    schema_version: version,
                    error: None,
                }
            }
            Ok(Err(e)) => {
                let failure = RenderFailure::Error {
                    message: format!("{e:#}"),
                };
                self.failed(metadata, data_hash, version, failure, None)
            }
            Err(_) => {
                cancel.cancel();
                let failure = RenderFailure::Timeout {
                    after_ms: self.timeout.as_millis() as u64,
                };
                self.failed(metadata, data_hash, version, failure, None)
            }
        }
    }

    fn failed(
        &self,
        mut metadata: ArtifactMetadata,
        data_hash: String,
        schema_version: String,
        failure: RenderFailure,
        overrides: Option<&MetadataOverrides>,
    ) -> RenderedArtifact {
        if let Some(overrides) = overrides {
            overrides.apply(&mut metadata);
        }
        let error = failure.to_error(&metadata.artifact_type);
        let category = error.category();
        tracing::warn!(?category, "Render failed: {}", error);

        {
            let mut metrics = self.metrics.lock();
            match failure {
                RenderFailure::Timeout { .. } => metrics.record_timeout(),
                RenderFailure::Error { .. } | RenderFailure::UnknownRenderer => {
                    metrics.record_error()
                }
            }
        }
        {
            let mut errors = self.errors.lock();
            errors.push_back(RenderErrorRecord {
                artifact_type: metadata.artifact_type.clone(),
                failure: failure.clone(),
                category,
                timestamp: now_ms(),
            });
            while errors.len() > self.error_log_size {
                errors.pop_front();
            }
        }

        RenderedArtifact {
            html: placeholder(&metadata, &failure),
            cached: false,
            metadata,
            data_hash,
            schema_version,
            error: Some(failure),
        }
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
        tracing::info!("Artifact cache cleared");
    }

    pub fn cache_stats(&self) -> ArtifactCacheStats {
        let cache = self.cache.lock();
        let stats = cache.stats();
        let mut per_type: BTreeMap<String, usize> = BTreeMap::new();
        for key in cache.keys() {
            if let Some(entry) = cache.peek(&key) {
                *per_type.entry(entry.metadata.artifact_type.clone()).or_default() += 1;
            }
        }
        ArtifactCacheStats {
            entries: stats.entries,
            capacity: stats.capacity,
            evictions: stats.evictions,
            total_bytes: stats.total_bytes,
            per_type,
        }
    }

    pub fn metrics(&self) -> RenderMetrics {
        self.metrics.lock().clone()
    }

    /// Most recent failures, oldest first.
    pub fn recent_errors(&self) -> Vec<RenderErrorRecord> {
        self.errors.lock().iter().cloned().collect()
    }

    /// Cancel every in-flight render. Later misses fail immediately; cache
    /// hits are still served.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Default for ArtifactEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Truncated hex sha256 of the compact JSON encoding. Object keys serialize
/// sorted, so equal values hash equally.
pub fn data_hash(data: &Value) -> String {
    let digest = Sha256::digest(data.to_string().as_bytes());
    let mut hex = String::with_capacity(DATA_HASH_LEN);
    for byte in digest.iter().take(DATA_HASH_LEN / 2) {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

pub fn cache_key(artifact_type: &str, data_hash: &str, version: &str) -> String {
    format!("{artifact_type}:{data_hash}:{version}")
}

fn placeholder(metadata: &ArtifactMetadata, failure: &RenderFailure) -> String {
    let class = match failure {
        RenderFailure::Timeout { .. } => "artifact-error artifact-timeout",
        RenderFailure::Error { .. } | RenderFailure::UnknownRenderer => "artifact-error",
    };
    format!(
        "<div class=\"{class}\" data-artifact-type=\"{kind}\">\n  <h3>{title} could not be rendered</h3>\n  <p>Renderer <code>{kind}</code>: {reason}</p>\n</div>\n",
        kind = escape_html(&metadata.artifact_type),
        title = escape_html(&metadata.title),
        reason = escape_html(&failure.to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_data_hash_ignores_key_order() {
        let a = json!({"alpha": 1, "beta": [1, 2]});
        let mut b = serde_json::Map::new();
        b.insert("beta".to_string(), json!([1, 2]));
        b.insert("alpha".to_string(), json!(1));

        assert_eq!(data_hash(&a), data_hash(&Value::Object(b)));
        assert_eq!(data_hash(&a).len(), DATA_HASH_LEN);
        assert_ne!(data_hash(&a), data_hash(&json!({"alpha": 2, "beta": [1, 2]})));
    }

    #[test]
    fn test_cache_key_layout() {
        assert_eq!(cache_key("signal_table", "00ff", "2.0.0"), "signal_table:00ff:2.0.0");
    }

    #[test]
    fn test_placeholder_escapes_reason() {
        let metadata = ArtifactMetadata {
            artifact_type: "cluster_map".to_string(),
            title: "Clusters".to_string(),
            description: String::new(),
            timestamp: 0,
        };
        let html = placeholder(
            &metadata,
            &RenderFailure::Error {
                message: "bad <input>".to_string(),
            },
        );
        insta::assert_snapshot!(html, @r###"
        <div class="artifact-error" data-artifact-type="cluster_map">
          <h3>Clusters could not be rendered</h3>
          <p>Renderer <code>cluster_map</code>: bad &lt;input&gt;</p>
        </div>
        "###);
    }
}
