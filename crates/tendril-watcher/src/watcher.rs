//! Filesystem watcher driving incremental rebuilds of the signal graph

use anyhow::Result;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tendril_core::{GraphSerializer, SignalGraph, graph_cache_path};
use tendril_indexer::{ProjectScanner, ScanMode, SignalGraphBuilder, SourceLanguage, TendrilConfig};
use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::{debug, error, info, warn};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Events emitted by the file watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
}

impl WatchEvent {
    pub fn path(&self) -> &Path {
        match self {
            WatchEvent::Created(path) | WatchEvent::Modified(path) | WatchEvent::Removed(path) => path,
        }
    }
}

/// Broadcast after every successful rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphUpdate {
    pub sequence: u64,
    pub signal_count: usize,
    pub changed_paths: Vec<PathBuf>,
}

/// Python source watcher. Only create/modify/remove events for source files
/// outside excluded directories reach the receiver.
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    event_rx: mpsc::UnboundedReceiver<WatchEvent>,
    watched_paths: HashSet<PathBuf>,
    root_path: PathBuf,
}

impl FileWatcher {
    pub fn new(root_path: impl AsRef<Path>, exclude_dirs: Vec<String>) -> Result<Self> {
        let root_path = root_path.as_ref().to_path_buf();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        // Notify may report canonical paths (symlinked temp dirs on macOS).
        let mut roots = vec![root_path.clone()];
        if let Ok(canonical) = root_path.canonicalize() {
            if canonical != root_path {
                roots.push(canonical);
            }
        }

        let watcher = notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
            match res {
                Ok(event) => {
                    debug!("File system event: {:?}", event);
                    Self::handle_notify_event(event, &roots, &exclude_dirs, &event_tx);
                }
                Err(e) => {
                    error!("File system watch error: {}", e);
                }
            }
        })?;

        Ok(Self {
            watcher,
            event_rx,
            watched_paths: HashSet::new(),
            root_path,
        })
    }

    fn handle_notify_event(
        event: notify::Event,
        roots: &[PathBuf],
        exclude_dirs: &[String],
        event_tx: &mpsc::UnboundedSender<WatchEvent>,
    ) {
        let make: fn(PathBuf) -> WatchEvent = match event.kind {
            notify::EventKind::Create(_) => WatchEvent::Created,
            notify::EventKind::Modify(_) => WatchEvent::Modified,
            notify::EventKind::Remove(_) => WatchEvent::Removed,
            _ => return,
        };
        for path in event.paths {
            let root = roots
                .iter()
                .find(|root| path.starts_with(root))
                .map_or(Path::new(""), PathBuf::as_path);
            if !is_source_file(&path) || should_ignore_path(&path, root, exclude_dirs) {
                continue;
            }
            if let Err(e) = event_tx.send(make(path)) {
                warn!("Failed to forward watch event: {}", e);
            }
        }
    }

    pub fn watch_directory(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        info!("Watching directory: {:?}", path);

        self.watcher.watch(path, RecursiveMode::Recursive)?;
        self.watched_paths.insert(path.to_path_buf());
        Ok(())
    }

    pub fn unwatch(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        info!("Stopping watch for: {:?}", path);

        self.watcher.unwatch(path)?;
        self.watched_paths.remove(path);
        Ok(())
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn event_receiver(&mut self) -> &mut mpsc::UnboundedReceiver<WatchEvent> {
        &mut self.event_rx
    }

    pub fn is_watching(&self, path: &Path) -> bool {
        self.watched_paths.contains(path)
    }
}

/// Owns the watcher and the scan/build/save pipeline it triggers.
pub struct WatcherService {
    watcher: FileWatcher,
    root: PathBuf,
    scanner: Arc<ProjectScanner>,
    builder: SignalGraphBuilder,
    serializer: GraphSerializer,
    graph: Arc<RwLock<Option<SignalGraph>>>,
    updates: broadcast::Sender<GraphUpdate>,
    sequence: AtomicU64,
    debounce: Duration,
}

impl WatcherService {
    pub fn new(root: impl AsRef<Path>, config: &TendrilConfig) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let watcher = FileWatcher::new(&root, config.scan.exclude_dirs.clone())?;

        let mut scanner = ProjectScanner::new(config.scan.clone())?;
        if config.scan.persist_fingerprints {
            scanner = scanner.with_fingerprint_store(tendril_indexer::fingerprint_path(&root));
        }
        let (updates, _) = broadcast::channel(64);

        Ok(Self {
            watcher,
            root,
            scanner: Arc::new(scanner),
            builder: SignalGraphBuilder::new(),
            serializer: GraphSerializer::new(),
            graph: Arc::new(RwLock::new(None)),
            updates,
            sequence: AtomicU64::new(0),
            debounce: DEFAULT_DEBOUNCE,
        })
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GraphUpdate> {
        self.updates.subscribe()
    }

    /// Shared handle to the latest graph; `None` until the first rebuild.
    pub fn graph(&self) -> Arc<RwLock<Option<SignalGraph>>> {
        Arc::clone(&self.graph)
    }

    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn start_watching(&mut self) -> Result<()> {
        let root = self.root.clone();
        self.watcher.watch_directory(&root)?;
        info!("Started watching project directory: {:?}", root);
        Ok(())
    }

    /// Incremental scan, full build, save to the graph cache and broadcast.
    pub async fn rebuild(&self, changed_paths: Vec<PathBuf>) -> Result<GraphUpdate> {
        let outcome = self
            .scanner
            .scan_async(self.root.clone(), ScanMode::Incremental)
            .await?;
        let output = self.builder.build_full_graph(&outcome.files);

        self.serializer
            .save(&output.graph, &graph_cache_path(&self.root))?;

        let update = GraphUpdate {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            signal_count: output.graph.metadata.signal_count,
            changed_paths,
        };
        *self.graph.write().await = Some(output.graph);

        info!(
            "Rebuild #{}: {} signals ({} files parsed, {} skipped)",
            update.sequence, update.signal_count, outcome.stats.files_parsed, outcome.stats.files_skipped
        );
        // No receivers is fine.
        let _ = self.updates.send(update.clone());
        Ok(update)
    }

    /// Rebuild once, then after every debounced batch of changes until the
    /// event stream closes.
    pub async fn run(&mut self) -> Result<()> {
        self.start_watching()?;
        if let Err(e) = self.rebuild(Vec::new()).await {
            error!("Initial build failed: {:#}", e);
        }

        while let Some(batch) = self.next_batch().await {
            debug!("Processing {} changed paths", batch.len());
            if let Err(e) = self.rebuild(batch).await {
                error!("Rebuild failed: {:#}", e);
            }
        }
        Ok(())
    }

    /// Wait for one event, then keep collecting until the stream is quiet
    /// for the debounce window.
    async fn next_batch(&mut self) -> Option<Vec<PathBuf>> {
        let debounce = self.debounce;
        let events = self.watcher.event_receiver();

        let first = events.recv().await?;
        let mut changed: BTreeSet<PathBuf> = BTreeSet::new();
        changed.insert(first.path().to_path_buf());

        while let Ok(Some(event)) = tokio::time::timeout(debounce, events.recv()).await {
            changed.insert(event.path().to_path_buf());
        }
        Some(changed.into_iter().collect())
    }
}

fn is_source_file(path: &Path) -> bool {
    SourceLanguage::from_path(path).is_some()
}

/// Only components below `root` are matched against `exclude_dirs`, so a
/// project that itself lives under e.g. `build/` is still watched.
fn should_ignore_path(path: &Path, root: &Path, exclude_dirs: &[String]) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.components().any(|component| {
        component
            .as_os_str()
            .to_str()
            .is_some_and(|name| exclude_dirs.iter().any(|d| d == name))
    })
}
