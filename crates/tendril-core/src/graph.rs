//! Project-wide signal graph: definitions, emissions and connections keyed by signal name

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::model::*;

/// The signal graph. A partial graph carries definitions and emissions only;
/// a full graph also carries connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalGraph {
    pub metadata: GraphMetadata,
    pub definitions: BTreeMap<String, Vec<SignalDefinition>>,
    pub emissions: BTreeMap<String, Vec<EmissionSite>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connections: Option<BTreeMap<String, Vec<ConnectionSite>>>,
}

impl SignalGraph {
    /// An empty partial graph stamped with `version`.
    pub fn new(version: impl Into<String>) -> Self {
        SignalGraph {
            metadata: GraphMetadata {
                version: version.into(),
                timestamp: crate::now_ms(),
                file_count: 0,
                signal_count: 0,
                emission_count: 0,
                connection_count: None,
            },
            definitions: BTreeMap::new(),
            emissions: BTreeMap::new(),
            connections: None,
        }
    }

    pub fn is_full(&self) -> bool {
        self.connections.is_some()
    }

    pub fn add_definition(&mut self, def: SignalDefinition) {
        self.definitions.entry(def.name.clone()).or_default().push(def);
    }

    pub fn add_emission(&mut self, site: EmissionSite) {
        self.emissions.entry(site.signal.clone()).or_default().push(site);
    }

    /// Append a connection, promoting the graph to a full graph if needed.
    pub fn add_connection(&mut self, site: ConnectionSite) {
        self.connections
            .get_or_insert_with(BTreeMap::new)
            .entry(site.signal.clone())
            .or_default()
            .push(site);
    }

    pub fn definitions(&self, name: &str) -> &[SignalDefinition] {
        self.definitions
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn emissions(&self, name: &str) -> &[EmissionSite] {
        self.emissions
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Connections for `name`; empty for partial graphs.
    pub fn connections(&self, name: &str) -> &[ConnectionSite] {
        self.connections
            .as_ref()
            .and_then(|c| c.get(name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn definition_count(&self) -> usize {
        self.definitions.values().map(Vec::len).sum()
    }

    pub fn emission_count(&self) -> usize {
        self.emissions.values().map(Vec::len).sum()
    }

    pub fn connection_count(&self) -> usize {
        self.connections
            .as_ref()
            .map_or(0, |c| c.values().map(Vec::len).sum())
    }

    /// Sorted union of signal names across every present map.
    pub fn all_signal_names(&self) -> Vec<String> {
        let mut names: BTreeSet<&String> = self.definitions.keys().collect();
        names.extend(self.emissions.keys());
        if let Some(connections) = &self.connections {
            names.extend(connections.keys());
        }
        names.into_iter().cloned().collect()
    }

    /// Signals that are emitted somewhere but never declared.
    pub fn undefined_signals(&self) -> Vec<String> {
        self.emissions
            .iter()
            .filter(|(name, sites)| !sites.is_empty() && self.definitions(name).is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Signals that are declared but never emitted.
    pub fn unemitted_signals(&self) -> Vec<String> {
        self.definitions
            .iter()
            .filter(|(name, defs)| !defs.is_empty() && self.emissions(name).is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Compare record maps, ignoring build timestamps.
    pub fn same_contents(&self, other: &SignalGraph) -> bool {
        self.definitions == other.definitions
            && self.emissions == other.emissions
            && self.connections == other.connections
    }

    /// Bipartite file/signal view for clustering. Each (file, signal) pair
    /// joined by at least one record becomes one link weighted by the number
    /// of records joining them.
    pub fn cluster_view(&self) -> (Vec<GraphNode>, Vec<GraphLink>) {
        let mut weights: BTreeMap<(String, String), f64> = BTreeMap::new();
        let mut bump = |file: &std::path::Path, signal: &str| {
            let key = (file_node_id(file), signal_node_id(signal));
            *weights.entry(key).or_insert(0.0) += 1.0;
        };

        for def in self.definitions.values().flatten() {
            bump(&def.file_path, &def.name);
        }
        for site in self.emissions.values().flatten() {
            bump(&site.file_path, &site.signal);
        }
        if let Some(connections) = &self.connections {
            for site in connections.values().flatten() {
                bump(&site.file_path, &site.signal);
            }
        }

        let mut nodes: Vec<GraphNode> = self
            .all_signal_names()
            .iter()
            .map(|name| GraphNode::with_kind(signal_node_id(name), NodeKind::Signal))
            .collect();
        let files: BTreeSet<&String> = weights.keys().map(|(file, _)| file).collect();
        nodes.extend(
            files
                .into_iter()
                .map(|file| GraphNode::with_kind(file.clone(), NodeKind::File)),
        );

        let links = weights
            .into_iter()
            .map(|((file, signal), weight)| GraphLink::weighted(file, signal, weight))
            .collect();

        (nodes, links)
    }

    /// Recompute the count fields of the metadata from the maps.
    pub fn refresh_counts(&mut self, file_count: usize) {
        self.metadata.file_count = file_count;
        self.metadata.signal_count = self.all_signal_names().len();
        self.metadata.emission_count = self.emission_count();
        self.metadata.connection_count = self.connections.as_ref().map(|_| self.connection_count());
    }
}

pub fn signal_node_id(name: &str) -> String {
    format!("signal:{name}")
}

pub fn file_node_id(path: &std::path::Path) -> String {
    format!("file:{}", path.display())
}
