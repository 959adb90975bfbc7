//! Integration tests for Tendril
//!
//! These tests drive the pipeline end to end: scan, build, cache, cluster,
//! render, and the CLI binary on a small Qt-style project.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use tempfile::TempDir;
use tendril_core::{GraphSerializer, HierarchicalClusterer, graph_cache_path};
use tendril_indexer::{ProjectScanner, ScanConfig, ScanMode, SignalGraphBuilder};
use tendril_render::{ArtifactEngine, CLUSTER_MAP, SIGNAL_TABLE, builtin_renderers};

const EVENT_BUS: &str = r#"from PySide6.QtCore import QObject, Signal


class EventBus(QObject):
    player_died = Signal(object, str, arguments=['player', 'cause'])
    player_spawned = Signal(object)
    score_changed = Signal(int)
    level_loaded = Signal(str)
"#;

const PLAYER: &str = r#"class Player:
    def __init__(self, bus):
        self.bus = bus

    def die(self, cause):
        self.bus.player_died.emit(self, cause)

    def spawn(self):
        self.bus.player_spawned.emit(self)
"#;

const HUD: &str = r#"from functools import partial


def wire(bus, hud):
    bus.player_died.connect(hud.on_player_died)
    bus.player_spawned.connect(lambda p: hud.show(p))
    bus.score_changed.connect(partial(hud.flash, "score"))
"#;

const SCORE: &str = r#"def add_points(bus, points):
    bus.score_changed.emit(points)
    bus.combo_broken.emit()
"#;

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn game_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "game/event_bus.py", EVENT_BUS);
    write(dir.path(), "game/player.py", PLAYER);
    write(dir.path(), "game/hud.py", HUD);
    write(dir.path(), "game/score.py", SCORE);
    write(dir.path(), ".venv/lib/qt.py", "ignored = Signal()\n");
    dir
}

fn tendril(root: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_tendril"))
        .arg("--root")
        .arg(root)
        .args(args)
        .output()
        .expect("failed to run tendril")
}

#[tokio::test]
async fn test_pipeline_end_to_end() {
    let dir = game_project();
    let scanner = Arc::new(ProjectScanner::new(ScanConfig::default()).unwrap());
    let outcome = scanner
        .scan_async(dir.path().to_path_buf(), ScanMode::Full)
        .await
        .unwrap();
    assert_eq!(outcome.stats.files_discovered, 4);

    let graph = SignalGraphBuilder::new().build_full_graph(&outcome.files).graph;
    assert_eq!(
        graph.all_signal_names(),
        vec!["combo_broken", "level_loaded", "player_died", "player_spawned", "score_changed"]
    );
    assert_eq!(graph.undefined_signals(), vec!["combo_broken".to_string()]);
    assert_eq!(graph.unemitted_signals(), vec!["level_loaded".to_string()]);
    assert_eq!(graph.connections("score_changed")[0].handler, "hud.flash");

    // Cache round trip.
    let cache = graph_cache_path(dir.path());
    let serializer = GraphSerializer::new();
    serializer.save(&graph, &cache).unwrap();
    let loaded = serializer.load(&cache).unwrap();
    assert!(loaded.same_contents(&graph));
    assert!(!serializer.is_stale(&cache, scanner.latest_source_mtime(dir.path()).unwrap()));

    // Every node lands in exactly one top-level cluster.
    let (nodes, links) = graph.cluster_view();
    let hierarchy = HierarchicalClusterer::new(3, 8).cluster_hierarchical(&nodes, &links);
    let clustered: usize = hierarchy.clusters.iter().map(|c| c.size).sum();
    assert_eq!(clustered, nodes.len());
    assert!(hierarchy.clusters.iter().all(|c| !c.label.is_empty()));

    // Render both artifacts, then hit the cache.
    let engine = ArtifactEngine::new();
    for renderer in builtin_renderers() {
        engine.register(renderer);
    }
    let table_data = serde_json::to_value(&graph).unwrap();
    let table = engine.render_artifact(SIGNAL_TABLE, &table_data, None).await;
    assert_eq!(table.error, None);
    assert!(table.html.contains("<td>combo_broken</td>"));
    let map = engine
        .render_artifact(CLUSTER_MAP, &serde_json::to_value(&hierarchy).unwrap(), None)
        .await;
    assert_eq!(map.error, None);
    assert!(engine.render_artifact(SIGNAL_TABLE, &table_data, None).await.cached);
}

#[test]
fn test_cli_version() {
    let dir = TempDir::new().unwrap();
    let output = tendril(dir.path(), &["version"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Tendril v"));
}

#[test]
fn test_cli_index_then_query() {
    let dir = game_project();

    let index = tendril(dir.path(), &["index"]);
    assert!(index.status.success(), "{}", String::from_utf8_lossy(&index.stderr));
    assert!(graph_cache_path(dir.path()).exists());

    let undefined = tendril(dir.path(), &["query", "undefined"]);
    assert!(undefined.status.success());
    assert_eq!(String::from_utf8_lossy(&undefined.stdout).trim(), "combo_broken");

    let show = tendril(dir.path(), &["query", "show", "player_died"]);
    assert!(show.status.success());
    let report: serde_json::Value = serde_json::from_slice(&show.stdout).unwrap();
    assert_eq!(report["definitions"][0]["params"], serde_json::json!(["player", "cause"]));
    assert_eq!(report["connections"][0]["handler"], "hud.on_player_died");

    let unknown = tendril(dir.path(), &["query", "show", "nope"]);
    assert!(!unknown.status.success());
}

#[test]
fn test_cli_cluster_and_render() {
    let dir = game_project();

    let cluster = tendril(dir.path(), &["cluster", "--max-depth", "2", "--min-size", "3"]);
    assert!(cluster.status.success(), "{}", String::from_utf8_lossy(&cluster.stderr));
    let hierarchy: serde_json::Value = serde_json::from_slice(&cluster.stdout).unwrap();
    assert!(hierarchy["clusters"].as_array().is_some_and(|c| !c.is_empty()));

    let out = dir.path().join("site");
    let render = tendril(dir.path(), &["render", "--out", out.to_str().unwrap()]);
    assert!(render.status.success(), "{}", String::from_utf8_lossy(&render.stderr));
    let table = std::fs::read_to_string(out.join("signal_table.html")).unwrap();
    assert!(table.starts_with("<!DOCTYPE html>"));
    assert!(table.contains("signal-table"));
    assert!(out.join("cluster_map.html").exists());
}

#[test]
fn test_cli_clear_removes_cache() {
    let dir = game_project();
    assert!(tendril(dir.path(), &["index"]).status.success());
    assert!(graph_cache_path(dir.path()).exists());

    assert!(tendril(dir.path(), &["clear"]).status.success());
    assert!(!graph_cache_path(dir.path()).exists());
}

#[test]
fn test_cli_missing_root_fails() {
    let dir = TempDir::new().unwrap();
    let output = tendril(&dir.path().join("missing"), &["index"]);
    assert!(!output.status.success());
}
