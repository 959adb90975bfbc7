//! ArtifactEngine behaviour with scripted renderers

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use tendril_core::ErrorCategory;

use crate::*;

/// Echoes the payload and counts invocations.
#[derive(Default)]
struct CountingRenderer {
    calls: AtomicUsize,
}

impl CountingRenderer {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Renderer for CountingRenderer {
    fn artifact_type(&self) -> &str {
        "echo"
    }

    fn title(&self) -> &str {
        "Echo"
    }

    async fn render(&self, data: &Value, _cancel: CancellationToken) -> anyhow::Result<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("<pre data-call=\"{n}\">{}</pre>", escape_html(&data.to_string())))
    }
}

/// Never finishes on its own; records when its token is cancelled.
#[derive(Default)]
struct StuckRenderer {
    calls: AtomicUsize,
    cancelled: Arc<AtomicBool>,
}

#[async_trait]
impl Renderer for StuckRenderer {
    fn artifact_type(&self) -> &str {
        "stuck"
    }

    fn title(&self) -> &str {
        "Stuck"
    }

    async fn render(&self, _data: &Value, cancel: CancellationToken) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let flag = Arc::clone(&self.cancelled);
        tokio::spawn(async move {
            cancel.cancelled().await;
            flag.store(true, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok("too late".to_string())
    }
}

struct FailingRenderer;

#[async_trait]
impl Renderer for FailingRenderer {
    fn artifact_type(&self) -> &str {
        "broken"
    }

    fn title(&self) -> &str {
        "Broken <chart>"
    }

    async fn render(&self, _data: &Value, _cancel: CancellationToken) -> anyhow::Result<String> {
        anyhow::bail!("payload missing <nodes>")
    }
}

fn engine_with_echo(capacity: usize) -> (ArtifactEngine, Arc<CountingRenderer>) {
    let engine = ArtifactEngine::with_capacity(capacity);
    let echo = Arc::new(CountingRenderer::default());
    engine.register(echo.clone());
    (engine, echo)
}

#[tokio::test]
async fn test_second_render_is_a_cache_hit() {
    let (engine, echo) = engine_with_echo(8);
    let data = json!({"signals": ["a", "b"]});

    let first = engine.render_artifact("echo", &data, None).await;
    let second = engine.render_artifact("echo", &data, None).await;

    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(first.html, second.html);
    assert_eq!(first.data_hash, second.data_hash);
    assert_eq!(second.schema_version, DEFAULT_RENDERER_VERSION);
    assert_eq!(echo.calls(), 1);

    let metrics = engine.metrics();
    assert_eq!(metrics.cache_hits, 1);
    assert_eq!(metrics.cache_misses, 1);
    assert_eq!(metrics.render_count, 1);
    assert_eq!(metrics.hit_rate, 0.5);
}

#[tokio::test]
async fn test_version_bump_forces_a_miss() {
    let (engine, echo) = engine_with_echo(8);
    let data = json!({"n": 1});
    engine.render_artifact("echo", &data, None).await;

    engine.register_renderer(echo.clone(), "1.1.0");
    assert_eq!(engine.renderer_version("echo").as_deref(), Some("1.1.0"));
    assert_eq!(engine.cache_stats().entries, 0);

    let again = engine.render_artifact("echo", &data, None).await;
    assert!(!again.cached);
    assert_eq!(again.schema_version, "1.1.0");
    assert_eq!(echo.calls(), 2);

    // Re-registering at the same version keeps the cache.
    engine.register_renderer(echo.clone(), "1.1.0");
    assert!(engine.render_artifact("echo", &data, None).await.cached);
}

#[tokio::test]
async fn test_different_data_renders_separately() {
    let (engine, echo) = engine_with_echo(8);
    let a = engine.render_artifact("echo", &json!([1]), None).await;
    let b = engine.render_artifact("echo", &json!([2]), None).await;

    assert!(!b.cached);
    assert_ne!(a.data_hash, b.data_hash);
    assert_eq!(echo.calls(), 2);
    assert_eq!(engine.cache_stats().entries, 2);
}

#[tokio::test]
async fn test_timeout_yields_placeholder_and_cancels() {
    let engine = ArtifactEngine::new().with_timeout(Duration::from_millis(50));
    let stuck = Arc::new(StuckRenderer::default());
    engine.register(stuck.clone());

    let artifact = engine.render_artifact("stuck", &json!({}), None).await;

    assert!(!artifact.cached);
    assert_eq!(artifact.error, Some(RenderFailure::Timeout { after_ms: 50 }));
    assert!(artifact.html.contains("class=\"artifact-error artifact-timeout\""));
    assert!(artifact.html.contains("timed out after 50ms"));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(stuck.cancelled.load(Ordering::SeqCst));

    let metrics = engine.metrics();
    assert_eq!(metrics.timeouts, 1);
    assert_eq!(metrics.errors, 0);

    let record = &engine.recent_errors()[0];
    assert_eq!(record.category, ErrorCategory::Resource);
    assert_eq!(
        record.failure.to_error("stuck").to_string(),
        "stuck render exceeded 50ms"
    );

    // Failures are not cached.
    assert_eq!(engine.cache_stats().entries, 0);
    engine.render_artifact("stuck", &json!({}), None).await;
    assert_eq!(stuck.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_renderer_error_is_escaped_and_logged() {
    let engine = ArtifactEngine::new().with_error_log_size(2);
    engine.register(Arc::new(FailingRenderer));

    for i in 0..3 {
        let artifact = engine.render_artifact("broken", &json!(i), None).await;
        assert!(artifact.html.contains("artifact-error"));
        assert!(!artifact.html.contains("artifact-timeout"));
        assert!(artifact.html.contains("payload missing &lt;nodes&gt;"));
        assert!(artifact.html.contains("Broken &lt;chart&gt;"));
    }

    let errors = engine.recent_errors();
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|e| e.artifact_type == "broken"));
    assert_eq!(
        errors[0].failure,
        RenderFailure::Error {
            message: "payload missing <nodes>".to_string()
        }
    );
    assert_eq!(engine.metrics().errors, 3);
    assert_eq!(errors[0].category, ErrorCategory::Internal);
}

#[tokio::test]
async fn test_unknown_renderer_yields_placeholder() {
    let engine = ArtifactEngine::new();
    let artifact = engine.render_artifact("heatmap", &json!(null), None).await;

    assert_eq!(artifact.error, Some(RenderFailure::UnknownRenderer));
    assert!(artifact.html.contains("data-artifact-type=\"heatmap\""));
    assert_eq!(engine.metrics().render_count, 0);
    let errors = engine.recent_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].category, ErrorCategory::Validation);
}

#[tokio::test]
async fn test_shutdown_cancels_in_flight_renders() {
    let engine = Arc::new(ArtifactEngine::new().with_timeout(Duration::from_secs(30)));
    let stuck = Arc::new(StuckRenderer::default());
    engine.register(stuck.clone());
    let echo = Arc::new(CountingRenderer::default());
    engine.register(echo.clone());

    let cached = engine.render_artifact("echo", &json!(1), None).await;
    assert_eq!(cached.error, None);

    let pending = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.render_artifact("stuck", &json!({}), None).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!engine.is_shut_down());
    engine.shutdown();
    assert!(engine.is_shut_down());

    let artifact = tokio::time::timeout(Duration::from_secs(2), pending)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        artifact.error,
        Some(RenderFailure::Error {
            message: "render engine is shut down".to_string()
        })
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(stuck.cancelled.load(Ordering::SeqCst));

    // Misses fail fast, hits are still served.
    let miss = engine.render_artifact("echo", &json!(2), None).await;
    assert!(miss.error.is_some());
    assert!(engine.render_artifact("echo", &json!(1), None).await.cached);
    assert_eq!(echo.calls(), 1);
    assert_eq!(engine.metrics().timeouts, 0);
}

#[tokio::test]
async fn test_capacity_evicts_least_recently_used() {
    let (engine, echo) = engine_with_echo(3);
    for i in 0..3 {
        engine.render_artifact("echo", &json!(i), None).await;
    }
    // Touch 0 so 1 becomes the oldest.
    assert!(engine.render_artifact("echo", &json!(0), None).await.cached);

    engine.render_artifact("echo", &json!(3), None).await;
    let stats = engine.cache_stats();
    assert_eq!(stats.entries, 3);
    assert_eq!(stats.evictions, 1);

    assert!(engine.render_artifact("echo", &json!(0), None).await.cached);
    assert!(!engine.render_artifact("echo", &json!(1), None).await.cached);
    assert_eq!(echo.calls(), 5);
}

#[tokio::test]
async fn test_metadata_overrides() {
    let (engine, _) = engine_with_echo(8);
    let overrides = MetadataOverrides {
        title: Some("Custom".to_string()),
        description: Some("From the caller".to_string()),
    };

    let artifact = engine.render_artifact("echo", &json!(1), Some(&overrides)).await;
    assert_eq!(artifact.metadata.title, "Custom");
    assert_eq!(artifact.metadata.description, "From the caller");
    assert_eq!(artifact.metadata.artifact_type, "echo");

    let plain = engine.render_artifact("echo", &json!(1), None).await;
    assert!(plain.cached);
    assert_eq!(plain.metadata.title, "Custom");
}

#[tokio::test]
async fn test_stats_per_type_and_clear() {
    let (engine, _) = engine_with_echo(8);
    for renderer in builtin_renderers() {
        engine.register(renderer);
    }
    assert_eq!(engine.artifact_types(), vec!["cluster_map", "echo", "signal_table"]);

    engine.render_artifact("echo", &json!(1), None).await;
    engine.render_artifact("echo", &json!(2), None).await;
    let hierarchy = json!({"clusters": [], "modularity": 0.0});
    let map = engine.render_artifact(CLUSTER_MAP, &hierarchy, None).await;
    assert_eq!(map.error, None);

    let stats = engine.cache_stats();
    assert_eq!(stats.entries, 3);
    assert_eq!(stats.per_type.get("echo"), Some(&2));
    assert_eq!(stats.per_type.get(CLUSTER_MAP), Some(&1));
    assert!(stats.total_bytes > 0);

    engine.clear_cache();
    assert_eq!(engine.cache_stats().entries, 0);
    assert!(!engine.render_artifact("echo", &json!(1), None).await.cached);
}

#[tokio::test]
async fn test_concurrent_renders_share_the_engine() {
    let (engine, echo) = engine_with_echo(16);
    let engine = Arc::new(engine);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.render_artifact("echo", &json!(i % 4), None).await })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap().error, None);
    }

    assert_eq!(engine.cache_stats().entries, 4);
    // No coalescing: every key renders at least once.
    assert!(echo.calls() >= 4);
    let metrics = engine.metrics();
    assert_eq!(metrics.cache_hits + metrics.cache_misses, 8);
}
