//! Core data structures for the signal graph

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One file seen during a scan pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFile {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Modification time in unix milliseconds.
    pub modified_ms: i64,
    /// Lowercase hex SHA-256 of the file bytes.
    pub content_hash: String,
    pub parse_duration_ms: u64,
}

/// Where a signal is declared: on a project-wide event bus or on an
/// ordinary class/module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignalSource {
    GlobalBus,
    Local,
}

/// A signal declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalDefinition {
    pub name: String,
    /// Parameter names in declaration order.
    pub params: Vec<String>,
    /// Parameter name -> declared type, when the declaration carries types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param_types: Option<BTreeMap<String, String>>,
    pub file_path: PathBuf,
    pub line: u32,
    pub source: SignalSource,
}

/// A place where a signal is fired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmissionSite {
    pub signal: String,
    pub file_path: PathBuf,
    pub line: u32,
    /// Trimmed source line containing the emission.
    pub context: String,
    /// Object the signal is accessed through (`self`, `EventBus`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emitter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
}

/// How a subscription names its handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HandlerKind {
    /// `sig.connect(self.on_died)`
    Direct,
    /// `sig.connect(lambda *a: ...)`
    Lambda,
    /// `sig.connect(partial(on_died, ctx))`
    Wrapped,
}

/// A place where a handler subscribes to a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSite {
    pub signal: String,
    pub file_path: PathBuf,
    pub line: u32,
    pub context: String,
    /// Object the signal is accessed through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub handler: String,
    pub handler_kind: HandlerKind,
    pub is_lambda: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<Vec<String>>,
}

/// Header stamped on every built or persisted graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphMetadata {
    pub version: String,
    /// Build time in unix milliseconds.
    pub timestamp: i64,
    pub file_count: usize,
    pub signal_count: usize,
    pub emission_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_count: Option<usize>,
}

/// Counters collected while building a graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStats {
    pub files_processed: usize,
    pub files_failed: usize,
    pub signals_discovered: usize,
    pub emissions_found: usize,
    pub connections_found: usize,
    pub duration_ms: u64,
    pub peak_memory_delta_bytes: i64,
}

// ── Clustering view ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    Signal,
    File,
}

/// A vertex handed to the community detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degree: Option<usize>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<NodeKind>,
}

impl GraphNode {
    pub fn new(id: impl Into<String>) -> Self {
        GraphNode {
            id: id.into(),
            cluster: None,
            degree: None,
            kind: None,
        }
    }

    pub fn with_kind(id: impl Into<String>, kind: NodeKind) -> Self {
        GraphNode {
            kind: Some(kind),
            ..GraphNode::new(id)
        }
    }
}

/// An undirected, optionally weighted link between two node ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphLink {
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

impl GraphLink {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        GraphLink {
            source: source.into(),
            target: target.into(),
            weight: None,
        }
    }

    pub fn weighted(source: impl Into<String>, target: impl Into<String>, weight: f64) -> Self {
        GraphLink {
            weight: Some(weight),
            ..GraphLink::new(source, target)
        }
    }
}

/// A flat community.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: usize,
    /// Member node ids in input order.
    pub members: Vec<String>,
    pub size: usize,
}
