//! CLI command implementations

use anyhow::Context;
use clap::Subcommand;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tendril_core::{ClusterHierarchy, CommunityDetector, GraphSerializer, HierarchicalClusterer, SignalGraph};
use tendril_indexer::{ProjectScanner, ScanMode, SignalGraphBuilder, TendrilConfig, fingerprint_path};
use tendril_render::{ArtifactEngine, CLUSTER_MAP, SIGNAL_TABLE, builtin_renderers, page};
use tendril_watcher::WatcherService;

#[derive(Subcommand, Debug, Clone)]
pub enum Query {
    /// Signals emitted somewhere but never defined
    Undefined,
    /// Signals defined but never emitted
    Unemitted,
    /// Every known signal name
    Signals,
    /// Definitions, emissions and connections of one signal
    Show { name: String },
}

fn load_config(root: &Path) -> anyhow::Result<TendrilConfig> {
    TendrilConfig::load(root).with_context(|| format!("Loading configuration for {}", root.display()))
}

/// Reuse the cached full graph when it is newer than every source file;
/// otherwise scan, build and save.
async fn load_or_build(
    root: &Path,
    config: &TendrilConfig,
    full: bool,
    force: bool,
) -> anyhow::Result<SignalGraph> {
    let serializer = GraphSerializer::new();
    let cache_path = tendril_core::graph_cache_path(root);

    let mut scanner = ProjectScanner::new(config.scan.clone())?;
    if config.scan.persist_fingerprints {
        scanner = scanner.with_fingerprint_store(fingerprint_path(root));
    }
    let scanner = Arc::new(scanner);

    if !force {
        let latest = scanner.latest_source_mtime(root)?;
        if let Some(graph) = serializer.load(&cache_path) {
            if graph.is_full() && graph.metadata.timestamp >= latest {
                tracing::info!("Using cached signal graph from {}", cache_path.display());
                return Ok(graph);
            }
            tracing::info!("Signal graph cache is stale, rebuilding");
        }
    }

    let mode = if full { ScanMode::Full } else { ScanMode::Incremental };
    let outcome = scanner.scan_async(root.to_path_buf(), mode).await?;
    let output = SignalGraphBuilder::new().build_full_graph(&outcome.files);

    eprintln!(
        "Scanned {} files ({} parsed, {} skipped, {} failed) in {}ms",
        outcome.stats.files_discovered,
        outcome.stats.files_parsed,
        outcome.stats.files_skipped,
        outcome.stats.files_failed,
        outcome.stats.duration_ms
    );
    eprintln!(
        "Built graph: {} signals, {} emissions, {} connections ({} files failed) in {}ms",
        output.graph.metadata.signal_count,
        output.stats.emissions_found,
        output.stats.connections_found,
        output.stats.files_failed,
        output.stats.duration_ms
    );

    serializer.save(&output.graph, &cache_path)?;
    Ok(output.graph)
}

pub async fn index(root: PathBuf, full: bool, force: bool) -> anyhow::Result<()> {
    tracing::info!("Indexing project: {}", root.display());
    let config = load_config(&root)?;
    let graph = load_or_build(&root, &config, full, force).await?;

    println!(
        "{} signals across {} files ({} undefined, {} unemitted)",
        graph.metadata.signal_count,
        graph.metadata.file_count,
        graph.undefined_signals().len(),
        graph.unemitted_signals().len()
    );
    Ok(())
}

pub async fn query(root: PathBuf, query: Query) -> anyhow::Result<()> {
    let config = load_config(&root)?;
    let graph = load_or_build(&root, &config, false, false).await?;

    match query {
        Query::Undefined => print_lines(&graph.undefined_signals()),
        Query::Unemitted => print_lines(&graph.unemitted_signals()),
        Query::Signals => print_lines(&graph.all_signal_names()),
        Query::Show { name } => {
            if !graph.all_signal_names().contains(&name) {
                anyhow::bail!("Unknown signal: {}", name);
            }
            let report = json!({
                "signal": name,
                "definitions": graph.definitions(&name),
                "emissions": graph.emissions(&name),
                "connections": graph.connections(&name),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

fn print_lines(names: &[String]) {
    for name in names {
        println!("{name}");
    }
}

fn hierarchy(
    graph: &SignalGraph,
    config: &TendrilConfig,
    max_depth: Option<usize>,
    min_size: Option<usize>,
) -> ClusterHierarchy {
    let (nodes, links) = graph.cluster_view();
    let clusterer = HierarchicalClusterer::new(
        max_depth.unwrap_or(config.cluster.max_depth),
        min_size.unwrap_or(config.cluster.min_subcluster_size),
    )
    .with_detector(CommunityDetector::with_max_passes(config.cluster.max_passes));
    clusterer.cluster_hierarchical(&nodes, &links)
}

pub async fn cluster(
    root: PathBuf,
    max_depth: Option<usize>,
    min_size: Option<usize>,
) -> anyhow::Result<()> {
    let config = load_config(&root)?;
    let graph = load_or_build(&root, &config, false, false).await?;
    let hierarchy = hierarchy(&graph, &config, max_depth, min_size);
    println!("{}", serde_json::to_string_pretty(&hierarchy)?);
    Ok(())
}

pub async fn render(root: PathBuf, out: Option<PathBuf>, open: bool) -> anyhow::Result<()> {
    let config = load_config(&root)?;
    let graph = load_or_build(&root, &config, false, false).await?;
    let hierarchy = hierarchy(&graph, &config, None, None);

    let engine = Arc::new(
        ArtifactEngine::with_capacity(config.render.cache_capacity)
            .with_timeout(Duration::from_millis(config.render.timeout_ms))
            .with_error_log_size(config.render.error_log_size),
    );
    for renderer in builtin_renderers() {
        engine.register(renderer);
    }
    let interrupt = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling renders");
                engine.shutdown();
            }
        })
    };

    let out_dir = out.unwrap_or_else(|| root.join(&config.render.output_dir));
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("Creating output directory {}", out_dir.display()))?;

    let jobs = [
        (CLUSTER_MAP, serde_json::to_value(&hierarchy)?),
        (SIGNAL_TABLE, serde_json::to_value(&graph)?),
    ];
    let mut written = Vec::new();
    for (artifact_type, data) in &jobs {
        let artifact = engine.render_artifact(artifact_type, data, None).await;
        if engine.is_shut_down() {
            anyhow::bail!("Render interrupted");
        }
        if let Some(failure) = &artifact.error {
            tracing::warn!("{} rendered as placeholder: {}", artifact_type, failure);
        }
        let path = out_dir.join(format!("{artifact_type}.html"));
        std::fs::write(&path, page(&artifact.metadata.title, &artifact.html))
            .with_context(|| format!("Writing {}", path.display()))?;
        println!("Wrote {}", path.display());
        written.push(path);
    }

    interrupt.abort();

    let metrics = engine.metrics();
    tracing::info!(
        "Rendered {} artifacts in {}ms ({} timeouts, {} errors)",
        metrics.render_count,
        metrics.total_render_ms,
        metrics.timeouts,
        metrics.errors
    );

    if open {
        if let Some(first) = written.first() {
            open::that(first).with_context(|| format!("Opening {}", first.display()))?;
        }
    }
    Ok(())
}

pub async fn watch(root: PathBuf) -> anyhow::Result<()> {
    let config = load_config(&root)?;
    let mut service = WatcherService::new(&root, &config)?;

    let mut updates = service.subscribe();
    tokio::spawn(async move {
        while let Ok(update) = updates.recv().await {
            println!(
                "#{}: {} signals after {} changed files",
                update.sequence,
                update.signal_count,
                update.changed_paths.len()
            );
        }
    });

    tracing::info!("Watching {} (Ctrl-C to stop)", root.display());
    tokio::select! {
        result = service.run() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Stopping watcher");
            Ok(())
        }
    }
}

pub fn clear(root: PathBuf) -> anyhow::Result<()> {
    tracing::info!("Clearing cache for: {}", root.display());

    tendril_core::clear_cache(&root)?;

    tracing::info!("Cache cleared");
    Ok(())
}
