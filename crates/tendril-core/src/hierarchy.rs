//! Hierarchical clustering: oversized communities are re-clustered on their
//! induced subgraph, recursively, up to a depth bound.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::community::CommunityDetector;
use crate::labels::label_clusters;
use crate::model::{GraphLink, GraphNode};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchicalCluster {
    pub id: String,
    pub label: String,
    pub size: usize,
    pub members: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// 1 for top-level clusters.
    pub depth: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<HierarchicalCluster>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterHierarchy {
    pub clusters: Vec<HierarchicalCluster>,
    /// Modularity of the top-level partition.
    pub modularity: f64,
}

impl ClusterHierarchy {
    /// Depth-first walk over every cluster at every level.
    pub fn iter(&self) -> impl Iterator<Item = &HierarchicalCluster> {
        let mut stack: Vec<&HierarchicalCluster> = self.clusters.iter().rev().collect();
        std::iter::from_fn(move || {
            let next = stack.pop()?;
            stack.extend(next.children.iter().rev());
            Some(next)
        })
    }
}

#[derive(Debug, Clone)]
pub struct HierarchicalClusterer {
    detector: CommunityDetector,
    max_depth: usize,
    min_subcluster_size: usize,
}

impl HierarchicalClusterer {
    pub fn new(max_depth: usize, min_subcluster_size: usize) -> Self {
        HierarchicalClusterer {
            detector: CommunityDetector::new(),
            max_depth: max_depth.max(1),
            min_subcluster_size,
        }
    }

    pub fn with_detector(mut self, detector: CommunityDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn cluster_hierarchical(&self, nodes: &[GraphNode], links: &[GraphLink]) -> ClusterHierarchy {
        let top = self.detector.detect_communities(nodes, links);
        let groups: Vec<Vec<String>> = top.clusters.into_iter().map(|c| c.members).collect();
        let clusters = self.build_level(groups, links, None, 1);

        tracing::info!(
            "Clustered {} nodes into {} top-level clusters (max depth {})",
            nodes.len(),
            clusters.len(),
            self.max_depth
        );

        ClusterHierarchy {
            clusters,
            modularity: top.modularity,
        }
    }

    fn build_level(
        &self,
        groups: Vec<Vec<String>>,
        links: &[GraphLink],
        parent: Option<&str>,
        depth: usize,
    ) -> Vec<HierarchicalCluster> {
        let ids: Vec<String> = (0..groups.len())
            .map(|i| match parent {
                Some(p) => format!("{p}.{i}"),
                None => format!("c{i}"),
            })
            .collect();
        let labels = label_clusters(&groups, &ids);

        groups
            .into_iter()
            .zip(ids)
            .zip(labels)
            .map(|((members, id), label)| {
                let children = if members.len() > self.min_subcluster_size && depth < self.max_depth {
                    self.split(&members, links, &id, depth + 1)
                } else {
                    Vec::new()
                };
                HierarchicalCluster {
                    size: members.len(),
                    parent: parent.map(str::to_string),
                    id,
                    label,
                    members,
                    depth,
                    children,
                }
            })
            .collect()
    }

    /// Re-cluster `members` on their induced subgraph. Returns no children
    /// when the subgraph does not split.
    fn split(
        &self,
        members: &[String],
        links: &[GraphLink],
        parent_id: &str,
        depth: usize,
    ) -> Vec<HierarchicalCluster> {
        let member_set: HashSet<&str> = members.iter().map(String::as_str).collect();
        let sub_nodes: Vec<GraphNode> = members.iter().map(GraphNode::new).collect();
        let sub_links: Vec<GraphLink> = links
            .iter()
            .filter(|l| {
                member_set.contains(l.source.as_str()) && member_set.contains(l.target.as_str())
            })
            .cloned()
            .collect();

        let result = self.detector.detect_communities(&sub_nodes, &sub_links);
        if result.clusters.len() < 2 {
            return Vec::new();
        }

        tracing::debug!(
            "Split {} ({} members) into {} sub-clusters",
            parent_id,
            members.len(),
            result.clusters.len()
        );

        let groups = result.clusters.into_iter().map(|c| c.members).collect();
        self.build_level(groups, &sub_links, Some(parent_id), depth)
    }
}
