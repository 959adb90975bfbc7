//! Cached, timeout-guarded HTML artifacts for signal graphs

pub mod engine;
pub mod metrics;
pub mod renderer;
pub mod renderers;

#[cfg(test)]
mod tests;

pub use engine::{
    ArtifactCacheEntry, ArtifactCacheStats, ArtifactEngine, DEFAULT_CAPACITY,
    DEFAULT_ERROR_LOG_SIZE, DEFAULT_TIMEOUT, RenderErrorRecord, RenderFailure, RenderedArtifact,
    cache_key, data_hash,
};
pub use metrics::RenderMetrics;
pub use renderer::{
    ArtifactMetadata, DEFAULT_RENDERER_VERSION, MetadataOverrides, Renderer, escape_html,
};
pub use renderers::{
    CLUSTER_MAP, ClusterMapRenderer, SIGNAL_TABLE, SignalTableRenderer, builtin_renderers, page,
};
