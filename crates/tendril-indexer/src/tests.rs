//! Scan-to-graph tests across the indexer modules

use std::sync::Arc;

use crate::test_utils::{signal_project, write_file};
use crate::*;

#[test]
fn test_scan_then_build_full_graph() {
    let dir = signal_project(4);
    let scanner = ProjectScanner::new(ScanConfig::default()).unwrap();
    let outcome = scanner.scan(dir.path(), ScanMode::Full).unwrap();

    let output = SignalGraphBuilder::new().build_full_graph(&outcome.files);
    let graph = &output.graph;

    assert_eq!(graph.metadata.file_count, 4);
    assert_eq!(graph.metadata.signal_count, 4);
    assert_eq!(graph.metadata.emission_count, 4);
    assert_eq!(graph.metadata.connection_count, Some(4));
    assert!(graph.undefined_signals().is_empty());
    assert!(graph.unemitted_signals().is_empty());

    let connections = graph.connections("updated_3");
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].file_path.to_str(), Some("game/module_0.py"));
    assert_eq!(connections[0].target.as_deref(), Some("peer"));
    assert_eq!(connections[0].handler, "self.on_peer");
}

#[test]
fn test_incremental_rescan_builds_same_graph() {
    let dir = signal_project(3);
    let scanner = ProjectScanner::new(ScanConfig::default()).unwrap();
    let builder = SignalGraphBuilder::new();

    let first = scanner.scan(dir.path(), ScanMode::Incremental).unwrap();
    let before = builder.build_full_graph(&first.files);

    let second = scanner.scan(dir.path(), ScanMode::Incremental).unwrap();
    assert_eq!(second.stats.files_parsed, 0);
    let after = builder.build_full_graph(&second.files);

    assert!(before.graph.same_contents(&after.graph));
}

#[test]
fn test_edited_file_changes_the_graph() {
    let dir = signal_project(2);
    let scanner = ProjectScanner::new(ScanConfig::default()).unwrap();
    scanner.scan(dir.path(), ScanMode::Incremental).unwrap();

    write_file(
        dir.path(),
        "game/module_1.py",
        "from PySide6.QtCore import Signal\n\nalarm = Signal()\nalarm.emit()\nbus.missing.emit()\n",
    );
    let outcome = scanner.scan(dir.path(), ScanMode::Incremental).unwrap();
    let graph = SignalGraphBuilder::new().build_partial_graph(&outcome.files).graph;

    assert!(graph.definitions("updated_1").is_empty());
    assert_eq!(graph.definitions("alarm").len(), 1);
    assert_eq!(graph.undefined_signals(), vec!["missing".to_string()]);
}

#[test]
fn test_config_file_drives_scan() {
    let dir = signal_project(2);
    write_file(dir.path(), "vendor/lib.py", "x = Signal()\n");
    write_file(
        dir.path(),
        CONFIG_FILE,
        "[scan]\nexclude_globs = [\"vendor/**\"]\nparallel_threshold = 1\nmax_workers = 2\n",
    );

    let config = TendrilConfig::load(dir.path()).unwrap();
    let scanner = ProjectScanner::new(config.scan).unwrap();
    let outcome = scanner.scan(dir.path(), ScanMode::Full).unwrap();

    assert_eq!(outcome.stats.files_discovered, 2);
    assert_eq!(outcome.stats.worker_count, 2);
}

#[test]
fn test_broken_syntax_still_contributes() {
    let dir = signal_project(1);
    write_file(
        dir.path(),
        "game/broken.py",
        "fired = Signal(int)\nfired.emit(1)\n\n\ndef broken(:\n",
    );
    let scanner = ProjectScanner::new(ScanConfig::default()).unwrap();
    let outcome = scanner.scan(dir.path(), ScanMode::Full).unwrap();
    assert_eq!(outcome.stats.files_failed, 0);

    let files: Vec<Arc<ParsedFile>> = outcome.files;
    let output = SignalGraphBuilder::new().build_full_graph(&files);
    assert_eq!(output.stats.files_failed, 0);
    assert_eq!(output.graph.emissions("fired").len(), 1);
}
