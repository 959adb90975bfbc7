//! Tendril Core — signal graph model, clustering, serialization and cache primitives

pub mod cache;
pub mod community;
pub mod error;
pub mod file_cache;
pub mod graph;
pub mod hierarchy;
pub mod labels;
pub mod model;
pub mod result_cache;


#[cfg(test)]
pub mod test_utils;

pub use cache::{
    CACHE_DIR, GRAPH_CACHE, GRAPH_SCHEMA_VERSION, GraphSerializer, cache_dir, clear_cache,
    ensure_cache_dir, graph_cache_path,
};
pub use community::{CommunityDetector, CommunityResult};
pub use error::{ErrorCategory, Result, TendrilError};
pub use file_cache::{FileHashCache, HashEntry, content_hash};
pub use graph::SignalGraph;
pub use hierarchy::{ClusterHierarchy, HierarchicalCluster, HierarchicalClusterer};
pub use model::{
    BuildStats, Cluster, ConnectionSite, EmissionSite, GraphLink, GraphMetadata, GraphNode,
    HandlerKind, NodeKind, SignalDefinition, SignalSource, SourceFile,
};
pub use result_cache::{CacheStats, ResultCache};

/// Current wall-clock time in unix milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
