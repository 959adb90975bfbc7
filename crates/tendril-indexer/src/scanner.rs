//! Project scanning: discovery, incremental reuse and (parallel) parsing

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, UNIX_EPOCH};

use anyhow::Context;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use tendril_core::{FileHashCache, SourceFile, TendrilError, content_hash};
use tokio::sync::broadcast;
use tree_sitter::Parser;

use crate::config::ScanConfig;
use crate::extractor::ParsedFile;
use crate::memory::MemoryProbe;
use crate::parser_pool::{ParseRequest, ParseResult, ParserPool, SourceLanguage, parse_with};

/// Fingerprint store file inside the cache directory.
pub const FINGERPRINTS_FILE: &str = "fingerprints.bin";

pub fn fingerprint_path(root: &Path) -> PathBuf {
    tendril_core::cache_dir(root).join(FINGERPRINTS_FILE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Re-parse every file.
    Full,
    /// Reuse parse results for files whose content is unchanged.
    Incremental,
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanMode::Full => write!(f, "full"),
            ScanMode::Incremental => write!(f, "incremental"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStats {
    pub files_discovered: usize,
    pub files_parsed: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    /// Parsed files whose content differs from the last persisted run.
    pub files_changed: usize,
    /// 0 when parsing stayed on the calling thread.
    pub worker_count: usize,
    pub duration_ms: u64,
    pub peak_memory_bytes: u64,
}

/// Scanner lifecycle, published for observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ScanEvent {
    #[serde(rename_all = "camelCase")]
    Started {
        root: PathBuf,
        mode: ScanMode,
        timestamp_ms: i64,
    },
    #[serde(rename_all = "camelCase")]
    Completed {
        discovered: usize,
        parsed: usize,
        skipped: usize,
        tree_count: usize,
        duration_ms: u64,
    },
    Failed { error: String },
}

/// The AST forest of one scan pass, sorted by path.
#[derive(Debug)]
pub struct ScanOutcome {
    pub files: Vec<Arc<ParsedFile>>,
    pub stats: ScanStats,
}

/// A file that needs parsing this pass.
struct Pending {
    relative: PathBuf,
    language: SourceLanguage,
    content: Arc<str>,
    hash: String,
    modified_ms: i64,
    size_bytes: u64,
}

enum Lookup {
    Reused(Arc<ParsedFile>),
    Pending(Pending),
}

struct FingerprintStore {
    path: PathBuf,
    entries: FileHashCache<SourceFile>,
}

pub struct ProjectScanner {
    config: ScanConfig,
    excludes: GlobSet,
    /// Keyed by absolute path.
    parsed: FileHashCache<Arc<ParsedFile>>,
    /// Keyed by root-relative path.
    fingerprints: Option<FingerprintStore>,
    events: broadcast::Sender<ScanEvent>,
}

fn modified_ms(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn check_root(root: &Path) -> tendril_core::Result<()> {
    let meta = std::fs::metadata(root).map_err(|e| TendrilError::filesystem(root, e))?;
    if !meta.is_dir() {
        return Err(TendrilError::filesystem(
            root,
            std::io::Error::new(std::io::ErrorKind::NotADirectory, "not a directory"),
        ));
    }
    std::fs::read_dir(root).map_err(|e| TendrilError::filesystem(root, e))?;
    Ok(())
}

impl ProjectScanner {
    pub fn new(config: ScanConfig) -> anyhow::Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.exclude_globs {
            builder.add(
                Glob::new(pattern).with_context(|| format!("Invalid exclude pattern {pattern:?}"))?,
            );
        }
        let excludes = builder.build()?;
        let (events, _) = broadcast::channel(64);

        Ok(ProjectScanner {
            config,
            excludes,
            parsed: FileHashCache::new(),
            fingerprints: None,
            events,
        })
    }

    /// Persist content fingerprints at `path` between runs.
    pub fn with_fingerprint_store(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries: FileHashCache<SourceFile> = FileHashCache::load(&path);
        let max_age = Duration::from_secs(self.config.fingerprint_max_age_days * 24 * 60 * 60);
        entries.prune_older_than(max_age);
        self.fingerprints = Some(FingerprintStore { path, entries });
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.events.subscribe()
    }

    /// Number of parse results held for incremental reuse.
    pub fn cached_files(&self) -> usize {
        self.parsed.len()
    }

    fn publish(&self, event: ScanEvent) {
        tracing::debug!("Scan event: {:?}", event);
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Scan `root`. Only an inaccessible root is an error; files that cannot
    /// be read or parsed are logged, counted and left out.
    pub fn scan(&self, root: &Path, mode: ScanMode) -> tendril_core::Result<ScanOutcome> {
        let started = Instant::now();
        self.publish(ScanEvent::Started {
            root: root.to_path_buf(),
            mode,
            timestamp_ms: tendril_core::now_ms(),
        });
        tracing::info!("Scanning {} ({} mode)", root.display(), mode);

        match self.run(root, mode, started) {
            Ok(outcome) => {
                let stats = &outcome.stats;
                tracing::info!(
                    "Scan complete: {} discovered, {} parsed, {} skipped, {} failed in {}ms",
                    stats.files_discovered,
                    stats.files_parsed,
                    stats.files_skipped,
                    stats.files_failed,
                    stats.duration_ms
                );
                self.publish(ScanEvent::Completed {
                    discovered: stats.files_discovered,
                    parsed: stats.files_parsed,
                    skipped: stats.files_skipped,
                    tree_count: outcome.files.len(),
                    duration_ms: stats.duration_ms,
                });
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!("Scan of {} failed: {}", root.display(), e);
                self.publish(ScanEvent::Failed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Run [`scan`](Self::scan) on the blocking thread pool.
    pub async fn scan_async(
        self: &Arc<Self>,
        root: PathBuf,
        mode: ScanMode,
    ) -> tendril_core::Result<ScanOutcome> {
        let scanner = Arc::clone(self);
        tokio::task::spawn_blocking(move || scanner.scan(&root, mode))
            .await
            .map_err(|e| TendrilError::Internal {
                context: "scan task".to_string(),
                message: e.to_string(),
            })?
    }

    fn run(
        &self,
        root: &Path,
        mode: ScanMode,
        started: Instant,
    ) -> tendril_core::Result<ScanOutcome> {
        check_root(root)?;
        let mut probe = MemoryProbe::start();

        let discovered = self.discover(root);
        let mut stats = ScanStats {
            files_discovered: discovered.len(),
            ..ScanStats::default()
        };

        let mut files: Vec<Arc<ParsedFile>> = Vec::with_capacity(discovered.len());
        let mut pending: HashMap<PathBuf, Pending> = HashMap::new();
        for absolute in &discovered {
            let relative = absolute.strip_prefix(root).unwrap_or(absolute).to_path_buf();
            match self.lookup(absolute, relative, mode) {
                Ok(Lookup::Reused(file)) => {
                    stats.files_skipped += 1;
                    files.push(file);
                }
                Ok(Lookup::Pending(item)) => {
                    pending.insert(absolute.clone(), item);
                }
                Err(e) => {
                    stats.files_failed += 1;
                    tracing::warn!("Skipping {}: {:#}", absolute.display(), e);
                }
            }
        }

        stats.files_changed = match &self.fingerprints {
            Some(store) => pending
                .values()
                .filter(|p| store.entries.stored_hash(&p.relative).as_deref() != Some(p.hash.as_str()))
                .count(),
            None => pending.len(),
        };

        let requests: Vec<ParseRequest> = pending
            .iter()
            .map(|(absolute, item)| ParseRequest {
                language: item.language,
                path: absolute.clone(),
                content: Arc::clone(&item.content),
            })
            .collect();

        stats.worker_count = self.config.worker_count(requests.len());
        probe.sample();
        let results = if stats.worker_count == 0 {
            parse_sequential(requests)
        } else {
            tracing::debug!(
                "Parsing {} files on {} workers",
                requests.len(),
                stats.worker_count
            );
            ParserPool::new(stats.worker_count).parse_batch(requests)
        };
        probe.sample();

        for (absolute, result) in results {
            let Some(item) = pending.remove(&absolute) else {
                continue;
            };
            match result {
                Ok(parsed) => {
                    let file = Arc::new(adopt(item, parsed));
                    self.parsed.insert(
                        absolute,
                        file.source.content_hash.clone(),
                        file.source.modified_ms,
                        file.source.size_bytes,
                        Arc::clone(&file),
                    );
                    stats.files_parsed += 1;
                    files.push(file);
                }
                Err(e) => {
                    stats.files_failed += 1;
                    let err = TendrilError::Parsing {
                        path: absolute,
                        message: format!("{e:#}"),
                    };
                    tracing::warn!("{}", err);
                }
            }
        }

        let live: HashSet<&Path> = discovered.iter().map(PathBuf::as_path).collect();
        let dropped = self.parsed.retain_paths(|p| live.contains(&p));
        if dropped > 0 {
            tracing::debug!("Dropped {} cached files no longer on disk", dropped);
        }

        files.sort_by(|a, b| a.path().cmp(b.path()));
        self.update_fingerprints(&files);

        probe.sample();
        stats.peak_memory_bytes = probe.peak();
        stats.duration_ms = started.elapsed().as_millis() as u64;

        Ok(ScanOutcome { files, stats })
    }

    /// Decide whether `absolute` can be reused from the cache or must be parsed.
    fn lookup(&self, absolute: &Path, relative: PathBuf, mode: ScanMode) -> anyhow::Result<Lookup> {
        let meta = std::fs::metadata(absolute)?;
        let modified_ms = modified_ms(&meta);
        let size_bytes = meta.len();

        if mode == ScanMode::Incremental {
            if let Some(hit) = self.parsed.get_unchanged(absolute, modified_ms, size_bytes) {
                return Ok(Lookup::Reused(hit));
            }
        }

        let bytes = std::fs::read(absolute)?;
        let hash = content_hash(&bytes);

        if mode == ScanMode::Incremental {
            if let Some(hit) = self.parsed.get(absolute, &hash) {
                self.parsed.touch(absolute, modified_ms, size_bytes);
                return Ok(Lookup::Reused(hit));
            }
        }

        let language = SourceLanguage::from_path(absolute)
            .ok_or_else(|| anyhow::anyhow!("unsupported file type"))?;
        let content = String::from_utf8(bytes).context("file is not valid UTF-8")?;

        Ok(Lookup::Pending(Pending {
            relative,
            language,
            content: Arc::from(content),
            hash,
            modified_ms,
            size_bytes,
        }))
    }

    fn update_fingerprints(&self, files: &[Arc<ParsedFile>]) {
        let Some(store) = &self.fingerprints else {
            return;
        };

        for file in files {
            let source = &file.source;
            if store.entries.stored_hash(&source.path).as_deref() == Some(source.content_hash.as_str()) {
                store
                    .entries
                    .touch(&source.path, source.modified_ms, source.size_bytes);
            } else {
                store.entries.insert(
                    source.path.clone(),
                    source.content_hash.clone(),
                    source.modified_ms,
                    source.size_bytes,
                    source.clone(),
                );
            }
        }

        let live: HashSet<&Path> = files.iter().map(|f| f.path()).collect();
        store.entries.retain_paths(|p| live.contains(&p));

        if let Err(e) = store.entries.save(&store.path) {
            tracing::warn!("Failed to save fingerprints to {}: {}", store.path.display(), e);
        }
    }

    /// Sorted absolute paths of every supported, non-excluded file.
    fn discover(&self, root: &Path) -> Vec<PathBuf> {
        let mut builder = WalkBuilder::new(root);
        builder
            .hidden(true)
            .git_ignore(true)
            .git_exclude(true)
            .require_git(false)
            .follow_links(self.config.follow_links);

        let excluded_dirs = self.config.exclude_dirs.clone();
        let globs = self.excludes.clone();
        let base = root.to_path_buf();
        builder.filter_entry(move |entry| {
            if entry.depth() == 0 {
                return true;
            }
            let path = entry.path();
            let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
            if is_dir {
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
                if excluded_dirs.iter().any(|d| d == name) {
                    return false;
                }
            }
            let relative = path.strip_prefix(&base).unwrap_or(path);
            !globs.is_match(relative)
        });

        let mut files = Vec::new();
        for result in builder.build() {
            match result {
                Ok(entry) => {
                    if !entry.file_type().is_some_and(|t| t.is_file()) {
                        continue;
                    }
                    if SourceLanguage::from_path(entry.path()).is_some() {
                        files.push(entry.into_path());
                    }
                }
                Err(e) => tracing::warn!("Walk error under {}: {}", root.display(), e),
            }
        }
        files.sort();
        tracing::debug!("Discovered {} source files under {}", files.len(), root.display());
        files
    }

    /// Newest modification time among source files under `root`, in unix
    /// milliseconds; 0 for a project without source files.
    pub fn latest_source_mtime(&self, root: &Path) -> tendril_core::Result<i64> {
        check_root(root)?;
        Ok(self
            .discover(root)
            .iter()
            .filter_map(|p| std::fs::metadata(p).ok())
            .map(|m| modified_ms(&m))
            .max()
            .unwrap_or(0))
    }
}

fn adopt(item: Pending, parsed: ParseResult) -> ParsedFile {
    let file = ParsedFile {
        source: SourceFile {
            path: item.relative,
            size_bytes: item.size_bytes,
            modified_ms: item.modified_ms,
            content_hash: item.hash,
            parse_duration_ms: parsed.duration_ms,
        },
        language: item.language,
        tree: parsed.tree,
        content: parsed.content,
    };
    tracing::debug!(
        "Parsed {} in {}ms",
        file.source.path.display(),
        file.source.parse_duration_ms
    );
    file
}

fn parse_sequential(requests: Vec<ParseRequest>) -> Vec<(PathBuf, anyhow::Result<ParseResult>)> {
    let mut parser = Parser::new();
    requests
        .into_iter()
        .map(|request| {
            let path = request.path.clone();
            (path, parse_with(&mut parser, request))
        })
        .collect()
}
