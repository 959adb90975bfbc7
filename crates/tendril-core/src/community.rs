//! Greedy modularity-optimization community detection
//!
//! Every node starts in its own community. Each pass visits the nodes in input
//! order and moves a node into the neighbouring community with the largest
//! strictly positive modularity gain. Passes repeat until one produces no
//! moves. This is a single-level local search, not multi-level Louvain:
//! communities are never re-aggregated into super-nodes.

use std::collections::{BTreeMap, HashMap};

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::model::{Cluster, GraphLink, GraphNode};

const GAIN_EPSILON: f64 = 1e-12;

/// Outcome of one detection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityResult {
    pub clusters: Vec<Cluster>,
    /// Q = Σ_c (e_c/m − (k_c/2m)²), in [-1, 1]; 0 for edgeless graphs.
    pub modularity: f64,
    /// Node id -> cluster id.
    pub assignments: BTreeMap<String, usize>,
}

impl CommunityResult {
    /// Fill `cluster` and `degree` on nodes known to this result.
    pub fn annotate(&self, nodes: &mut [GraphNode], links: &[GraphLink]) {
        let mut degree: HashMap<&str, usize> = HashMap::new();
        for link in links.iter().filter(|l| l.source != l.target) {
            *degree.entry(link.source.as_str()).or_default() += 1;
            *degree.entry(link.target.as_str()).or_default() += 1;
        }
        for node in nodes.iter_mut() {
            node.cluster = self.assignments.get(&node.id).copied();
            node.degree = Some(degree.get(node.id.as_str()).copied().unwrap_or(0));
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommunityDetector {
    max_passes: usize,
}

impl CommunityDetector {
    pub fn new() -> Self {
        CommunityDetector { max_passes: 100 }
    }

    pub fn with_max_passes(max_passes: usize) -> Self {
        CommunityDetector {
            max_passes: max_passes.max(1),
        }
    }

    pub fn detect_communities(&self, nodes: &[GraphNode], links: &[GraphLink]) -> CommunityResult {
        if nodes.is_empty() {
            return CommunityResult {
                clusters: Vec::new(),
                modularity: 0.0,
                assignments: BTreeMap::new(),
            };
        }

        let graph = build_graph(nodes, links);
        let n = graph.node_count();

        // Weighted degree of every node, and total edge weight m.
        let mut k = vec![0.0_f64; n];
        let mut m = 0.0_f64;
        for edge in graph.edge_references() {
            let w = *edge.weight();
            k[edge.source().index()] += w;
            k[edge.target().index()] += w;
            m += w;
        }

        let mut community: Vec<usize> = (0..n).collect();
        if m > 0.0 {
            let adjacency = sorted_adjacency(&graph);
            let mut tot = k.clone();
            self.local_moves(&adjacency, &k, m, &mut community, &mut tot);
        }

        let modularity = modularity(&graph, &community, &k, m);
        let (clusters, assignments) = collect_clusters(nodes, &community);

        tracing::debug!(
            "Detected {} communities over {} nodes (Q = {:.4})",
            clusters.len(),
            n,
            modularity
        );

        CommunityResult {
            clusters,
            modularity,
            assignments,
        }
    }

    fn local_moves(
        &self,
        adjacency: &[Vec<(usize, f64)>],
        k: &[f64],
        m: f64,
        community: &mut [usize],
        tot: &mut [f64],
    ) {
        let two_m = 2.0 * m;

        for pass in 0..self.max_passes {
            let mut moved = 0usize;

            for node in 0..adjacency.len() {
                if adjacency[node].is_empty() {
                    continue;
                }
                let current = community[node];
                let k_i = k[node];

                // Edge weight from `node` into each neighbouring community,
                // in first-seen order for deterministic tie breaking.
                let mut order: Vec<usize> = Vec::new();
                let mut w_to: HashMap<usize, f64> = HashMap::new();
                for &(neighbour, w) in &adjacency[node] {
                    let c = community[neighbour];
                    let slot = w_to.entry(c).or_insert_with(|| {
                        order.push(c);
                        0.0
                    });
                    *slot += w;
                }

                tot[current] -= k_i;
                let gain = |c: usize| w_to.get(&c).copied().unwrap_or(0.0) - tot[c] * k_i / two_m;

                let mut best = current;
                let mut best_gain = gain(current);
                for &c in &order {
                    let g = gain(c);
                    if g > best_gain + GAIN_EPSILON {
                        best = c;
                        best_gain = g;
                    }
                }

                tot[best] += k_i;
                if best != current {
                    community[node] = best;
                    moved += 1;
                }
            }

            tracing::trace!("Community pass {} moved {} nodes", pass, moved);
            if moved == 0 {
                return;
            }
        }

        tracing::debug!(
            "Community detection stopped after {} passes without converging",
            self.max_passes
        );
    }
}

impl Default for CommunityDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Build an undirected graph over `nodes`. Duplicate links merge by summing
/// weight; self-loops and links to unknown ids are dropped.
fn build_graph(nodes: &[GraphNode], links: &[GraphLink]) -> UnGraph<String, f64> {
    let mut graph = UnGraph::with_capacity(nodes.len(), links.len());
    let mut index: HashMap<&str, NodeIndex> = HashMap::with_capacity(nodes.len());
    for node in nodes {
        if index.contains_key(node.id.as_str()) {
            continue;
        }
        let idx = graph.add_node(node.id.clone());
        index.insert(node.id.as_str(), idx);
    }

    for link in links {
        let (Some(&a), Some(&b)) = (index.get(link.source.as_str()), index.get(link.target.as_str()))
        else {
            tracing::debug!("Ignoring link to unknown node: {} - {}", link.source, link.target);
            continue;
        };
        if a == b {
            continue;
        }
        let w = link.weight.unwrap_or(1.0);
        if w <= 0.0 {
            continue;
        }
        match graph.find_edge(a, b) {
            Some(edge) => graph[edge] += w,
            None => {
                graph.add_edge(a, b, w);
            }
        }
    }

    graph
}

fn sorted_adjacency(graph: &UnGraph<String, f64>) -> Vec<Vec<(usize, f64)>> {
    graph
        .node_indices()
        .map(|idx| {
            let mut neighbours: Vec<(usize, f64)> = graph
                .edges(idx)
                .map(|e| {
                    let other = if e.source() == idx { e.target() } else { e.source() };
                    (other.index(), *e.weight())
                })
                .collect();
            neighbours.sort_by_key(|(other, _)| *other);
            neighbours
        })
        .collect()
}

fn modularity(graph: &UnGraph<String, f64>, community: &[usize], k: &[f64], m: f64) -> f64 {
    if m <= 0.0 {
        return 0.0;
    }
    let mut internal: HashMap<usize, f64> = HashMap::new();
    let mut degree_sum: HashMap<usize, f64> = HashMap::new();

    for edge in graph.edge_references() {
        let (a, b) = (edge.source().index(), edge.target().index());
        if community[a] == community[b] {
            *internal.entry(community[a]).or_default() += *edge.weight();
        }
    }
    for (node, &c) in community.iter().enumerate() {
        *degree_sum.entry(c).or_default() += k[node];
    }

    let q: f64 = degree_sum
        .iter()
        .map(|(c, k_c)| {
            let e_c = internal.get(c).copied().unwrap_or(0.0);
            e_c / m - (k_c / (2.0 * m)).powi(2)
        })
        .sum();
    q.clamp(-1.0, 1.0)
}

/// Renumber communities 0..k in order of each one's first member.
fn collect_clusters(
    nodes: &[GraphNode],
    community: &[usize],
) -> (Vec<Cluster>, BTreeMap<String, usize>) {
    let mut renumber: HashMap<usize, usize> = HashMap::new();
    let mut clusters: Vec<Cluster> = Vec::new();
    let mut assignments = BTreeMap::new();

    // Graph indices follow first occurrence of each id in `nodes`.
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for node in nodes {
        if seen.contains_key(node.id.as_str()) {
            continue;
        }
        let idx = seen.len();
        seen.insert(node.id.as_str(), idx);

        let next_id = clusters.len();
        let id = *renumber.entry(community[idx]).or_insert(next_id);
        if id == clusters.len() {
            clusters.push(Cluster {
                id,
                members: Vec::new(),
                size: 0,
            });
        }
        clusters[id].members.push(node.id.clone());
        clusters[id].size += 1;
        assignments.insert(node.id.clone(), id);
    }

    (clusters, assignments)
}
