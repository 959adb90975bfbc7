//! Aggregation of per-file extraction results into a project-wide graph

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tendril_core::{
    BuildStats, ConnectionSite, EmissionSite, GRAPH_SCHEMA_VERSION, SignalDefinition, SignalGraph,
};

use crate::extractor::{ParsedFile, SignalExtractor};
use crate::languages::extractor_for;
use crate::memory::MemoryProbe;

#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub graph: SignalGraph,
    pub stats: BuildStats,
}

/// Builds partial (definitions + emissions) and full (+ connections) graphs.
/// Each file is extracted independently; a file whose extraction fails is
/// logged, counted and contributes nothing.
pub struct SignalGraphBuilder {
    /// Overrides the per-language default when set.
    extractor: Option<Arc<dyn SignalExtractor>>,
    version: String,
}

impl SignalGraphBuilder {
    pub fn new() -> Self {
        SignalGraphBuilder {
            extractor: None,
            version: GRAPH_SCHEMA_VERSION.to_string(),
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn SignalExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    fn extractor(&self, file: &ParsedFile) -> Arc<dyn SignalExtractor> {
        match &self.extractor {
            Some(extractor) => Arc::clone(extractor),
            None => extractor_for(file.language),
        }
    }

    pub fn build_partial_graph(&self, forest: &[Arc<ParsedFile>]) -> BuildOutput {
        let started = Instant::now();
        let mut probe = MemoryProbe::start();
        let files = sorted(forest);

        let mut graph = SignalGraph::new(self.version.clone());
        let mut failed: HashSet<&Path> = HashSet::new();
        self.definitions_and_emissions(&files, &mut graph, &mut failed);

        probe.sample();
        self.finish(graph, files.len(), failed.len(), started, probe)
    }

    pub fn build_full_graph(&self, forest: &[Arc<ParsedFile>]) -> BuildOutput {
        let started = Instant::now();
        let mut probe = MemoryProbe::start();
        let files = sorted(forest);

        let mut graph = SignalGraph::new(self.version.clone());
        let mut failed: HashSet<&Path> = HashSet::new();
        self.definitions_and_emissions(&files, &mut graph, &mut failed);
        probe.sample();

        let mut connections: BTreeMap<String, Vec<ConnectionSite>> = BTreeMap::new();
        for file in &files {
            if failed.contains(file.path()) {
                continue;
            }
            match self.extractor(file).extract_connections(file) {
                Ok(sites) => {
                    tracing::debug!("{}: {} connections", file.path().display(), sites.len());
                    for site in sites {
                        connections.entry(site.signal.clone()).or_default().push(site);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "Connection extraction failed for {}: {:#}",
                        file.path().display(),
                        e
                    );
                    failed.insert(file.path());
                }
            }
        }
        graph.connections = Some(connections);

        probe.sample();
        self.finish(graph, files.len(), failed.len(), started, probe)
    }

    fn definitions_and_emissions<'a>(
        &self,
        files: &[&'a ParsedFile],
        graph: &mut SignalGraph,
        failed: &mut HashSet<&'a Path>,
    ) {
        for &file in files {
            match extract_pair(self.extractor(file).as_ref(), file) {
                Ok((definitions, emissions)) => {
                    tracing::debug!(
                        "{}: {} definitions, {} emissions",
                        file.path().display(),
                        definitions.len(),
                        emissions.len()
                    );
                    for def in definitions {
                        graph.add_definition(def);
                    }
                    for site in emissions {
                        graph.add_emission(site);
                    }
                }
                Err(e) => {
                    tracing::warn!("Extraction failed for {}: {:#}", file.path().display(), e);
                    failed.insert(file.path());
                }
            }
        }
    }

    fn finish(
        &self,
        mut graph: SignalGraph,
        file_count: usize,
        files_failed: usize,
        started: Instant,
        probe: MemoryProbe,
    ) -> BuildOutput {
        graph.refresh_counts(file_count);
        let stats = BuildStats {
            files_processed: file_count,
            files_failed,
            signals_discovered: graph.definitions.len(),
            emissions_found: graph.emission_count(),
            connections_found: graph.connection_count(),
            duration_ms: started.elapsed().as_millis() as u64,
            peak_memory_delta_bytes: probe.delta(),
        };

        tracing::info!(
            "Built {} graph: {} signals, {} emissions, {} connections from {} files ({} failed) in {}ms",
            if graph.is_full() { "full" } else { "partial" },
            graph.metadata.signal_count,
            stats.emissions_found,
            stats.connections_found,
            file_count,
            files_failed,
            stats.duration_ms
        );

        BuildOutput { graph, stats }
    }
}

impl Default for SignalGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Both record kinds or neither.
fn extract_pair(
    extractor: &dyn SignalExtractor,
    file: &ParsedFile,
) -> anyhow::Result<(Vec<SignalDefinition>, Vec<EmissionSite>)> {
    Ok((extractor.extract_signals(file)?, extractor.extract_emissions(file)?))
}

/// The forest ordered by path so the result is independent of scan order.
fn sorted(forest: &[Arc<ParsedFile>]) -> Vec<&ParsedFile> {
    let mut files: Vec<&ParsedFile> = forest.iter().map(Arc::as_ref).collect();
    files.sort_by(|a, b| a.path().cmp(b.path()));
    files
}
