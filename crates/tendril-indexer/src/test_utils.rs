//! Fixtures shared by the indexer tests

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tendril_core::{ConnectionSite, EmissionSite, SignalDefinition, SourceFile, content_hash};

use crate::extractor::{ParsedFile, SignalExtractor};
use crate::languages::PythonSignalExtractor;
use crate::parser_pool::{ParseRequest, SourceLanguage, parse_source};

/// Parse `source` as the python file `path` without touching disk.
pub fn parsed(path: &str, source: &str) -> ParsedFile {
    let path = PathBuf::from(path);
    let content: Arc<str> = Arc::from(source);
    let result = parse_source(ParseRequest {
        language: SourceLanguage::Python,
        path: path.clone(),
        content: Arc::clone(&content),
    })
    .unwrap();

    ParsedFile {
        source: SourceFile {
            path,
            size_bytes: source.len() as u64,
            modified_ms: 0,
            content_hash: content_hash(source.as_bytes()),
            parse_duration_ms: result.duration_ms,
        },
        language: SourceLanguage::Python,
        tree: result.tree,
        content,
    }
}

pub const EVENT_BUS: &str = r#"from PySide6.QtCore import QObject, Signal


class EventBus(QObject):
    player_died = Signal(object, str, arguments=['player', 'cause'])
    score_changed = Signal(int)
"#;

pub const PLAYER: &str = r#"def award(bus, points):
    bus.score_changed.emit(points)
    bus.ghost.emit()
"#;

pub const HUD: &str = r#"def wire(bus, hud):
    bus.player_died.connect(hud.on_player_died)
    bus.score_changed.connect(hud.on_score)
"#;

/// Three files: a bus module with two definitions, an emitter of one defined
/// and one undefined signal, and a file connecting both definitions.
pub fn forest() -> Vec<Arc<ParsedFile>> {
    vec![
        Arc::new(parsed("game/player.py", PLAYER)),
        Arc::new(parsed("game/hud.py", HUD)),
        Arc::new(parsed("game/event_bus.py", EVENT_BUS)),
    ]
}

/// Python extraction that fails for every file whose path ends with `path`.
pub struct FailingExtractor {
    path: PathBuf,
    inner: PythonSignalExtractor,
}

impl FailingExtractor {
    pub fn on(path: &str) -> Self {
        FailingExtractor {
            path: PathBuf::from(path),
            inner: PythonSignalExtractor,
        }
    }

    fn check(&self, file: &ParsedFile) -> anyhow::Result<()> {
        if file.path().ends_with(&self.path) {
            anyhow::bail!("refusing to extract {}", file.path().display());
        }
        Ok(())
    }
}

impl SignalExtractor for FailingExtractor {
    fn extract_signals(&self, file: &ParsedFile) -> anyhow::Result<Vec<SignalDefinition>> {
        self.check(file)?;
        self.inner.extract_signals(file)
    }

    fn extract_emissions(&self, file: &ParsedFile) -> anyhow::Result<Vec<EmissionSite>> {
        self.check(file)?;
        self.inner.extract_emissions(file)
    }

    fn extract_connections(&self, file: &ParsedFile) -> anyhow::Result<Vec<ConnectionSite>> {
        self.check(file)?;
        self.inner.extract_connections(file)
    }
}

pub fn write_file(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

/// A temp project with `count` python modules under `game/`, each defining
/// and emitting its own signal and connecting to the previous module's.
pub fn signal_project(count: usize) -> TempDir {
    let dir = TempDir::new().unwrap();
    for i in 0..count {
        let previous = if i == 0 { count.saturating_sub(1) } else { i - 1 };
        let content = format!(
            "from PySide6.QtCore import QObject, Signal\n\n\n\
             class Module{i}(QObject):\n    \
             updated_{i} = Signal(int)\n\n    \
             def tick(self, peer):\n        \
             self.updated_{i}.emit(1)\n        \
             peer.updated_{previous}.connect(self.on_peer)\n"
        );
        write_file(dir.path(), &format!("game/module_{i}.py"), &content);
    }
    dir
}
