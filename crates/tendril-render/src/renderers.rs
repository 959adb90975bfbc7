//! Built-in renderers for cluster hierarchies and signal tables

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tendril_core::{ClusterHierarchy, HierarchicalCluster, SignalGraph};
use tokio_util::sync::CancellationToken;

use crate::renderer::{Renderer, escape_html};

pub const CLUSTER_MAP: &str = "cluster_map";
pub const SIGNAL_TABLE: &str = "signal_table";

/// Clusters rendered between cancellation checks.
const CHECK_EVERY: usize = 64;

/// Every built-in renderer.
pub fn builtin_renderers() -> Vec<Arc<dyn Renderer>> {
    vec![Arc::new(ClusterMapRenderer), Arc::new(SignalTableRenderer)]
}

/// Nested list of a [`ClusterHierarchy`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ClusterMapRenderer;

#[async_trait]
impl Renderer for ClusterMapRenderer {
    fn artifact_type(&self) -> &str {
        CLUSTER_MAP
    }

    fn title(&self) -> &str {
        "Signal clusters"
    }

    fn description(&self) -> &str {
        "Communities of files and signals, nested by re-clustering"
    }

    async fn render(&self, data: &Value, cancel: CancellationToken) -> anyhow::Result<String> {
        let hierarchy: ClusterHierarchy = serde_json::from_value(data.clone())?;

        let mut html = String::new();
        writeln!(
            html,
            "<section class=\"cluster-map\" data-modularity=\"{:.4}\">",
            hierarchy.modularity
        )?;
        let mut rendered = 0usize;
        write_clusters(&mut html, &hierarchy.clusters, 1, &mut rendered, &cancel).await?;
        html.push_str("</section>\n");
        Ok(html)
    }
}

async fn write_clusters(
    html: &mut String,
    clusters: &[HierarchicalCluster],
    level: usize,
    rendered: &mut usize,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    // Iterative so the future stays unboxed.
    let indent = |depth: usize| "  ".repeat(depth);
    let mut stack: Vec<(&[HierarchicalCluster], usize, usize)> = vec![(clusters, 0, level)];

    writeln!(html, "{}<ul>", indent(level))?;
    while let Some((siblings, index, depth)) = stack.pop() {
        let Some(cluster) = siblings.get(index) else {
            writeln!(html, "{}</ul>", indent(depth))?;
            if depth > level {
                writeln!(html, "{}</li>", indent(depth - 1))?;
            }
            continue;
        };
        stack.push((siblings, index + 1, depth));

        *rendered += 1;
        if *rendered % CHECK_EVERY == 0 {
            tokio::task::yield_now().await;
        }
        if cancel.is_cancelled() {
            anyhow::bail!("render cancelled");
        }

        write!(
            html,
            "{}<li data-cluster=\"{}\"><span class=\"cluster-label\">{}</span> <span class=\"cluster-size\">{}</span>",
            indent(depth),
            escape_html(&cluster.id),
            escape_html(&cluster.label),
            cluster.size
        )?;
        if cluster.children.is_empty() {
            html.push_str("</li>\n");
        } else {
            html.push('\n');
            writeln!(html, "{}<ul>", indent(depth + 1))?;
            stack.push((&cluster.children, 0, depth + 1));
        }
    }
    Ok(())
}

/// One row per signal with definition, emission and connection counts.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignalTableRenderer;

#[async_trait]
impl Renderer for SignalTableRenderer {
    fn artifact_type(&self) -> &str {
        SIGNAL_TABLE
    }

    fn title(&self) -> &str {
        "Signals"
    }

    fn description(&self) -> &str {
        "Definition, emission and connection counts per signal"
    }

    async fn render(&self, data: &Value, cancel: CancellationToken) -> anyhow::Result<String> {
        let graph: SignalGraph = serde_json::from_value(data.clone())?;
        let undefined = graph.undefined_signals();
        let unemitted = graph.unemitted_signals();
        let full = graph.is_full();

        let mut html = String::from("<table class=\"signal-table\">\n");
        html.push_str("  <thead><tr><th>Signal</th><th>Defined</th><th>Emitted</th>");
        if full {
            html.push_str("<th>Connected</th>");
        }
        html.push_str("<th>Notes</th></tr></thead>\n  <tbody>\n");

        for (i, name) in graph.all_signal_names().iter().enumerate() {
            if i % CHECK_EVERY == CHECK_EVERY - 1 {
                tokio::task::yield_now().await;
            }
            if cancel.is_cancelled() {
                anyhow::bail!("render cancelled");
            }

            let mut notes = Vec::new();
            if undefined.contains(name) {
                notes.push("undefined");
            }
            if unemitted.contains(name) {
                notes.push("unemitted");
            }
            let class = if notes.is_empty() { "" } else { " class=\"signal-warning\"" };

            write!(
                html,
                "    <tr{}><td>{}</td><td>{}</td><td>{}</td>",
                class,
                escape_html(name),
                graph.definitions(name).len(),
                graph.emissions(name).len()
            )?;
            if full {
                write!(html, "<td>{}</td>", graph.connections(name).len())?;
            }
            writeln!(html, "<td>{}</td></tr>", notes.join(", "))?;
        }

        html.push_str("  </tbody>\n</table>\n");
        Ok(html)
    }
}

/// Wrap a rendered fragment in a standalone HTML page.
pub fn page(title: &str, fragment: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n<style>\n{STYLE}</style>\n</head>\n<body>\n<h1>{title}</h1>\n{fragment}</body>\n</html>\n",
        title = escape_html(title),
    )
}

const STYLE: &str = "body { font-family: system-ui, sans-serif; margin: 2rem; }
.cluster-size { color: #777; }
.signal-table td, .signal-table th { padding: 0.2rem 0.8rem; text-align: left; }
.signal-warning { background: #fff3cd; }
.artifact-error { border: 1px solid #c00; padding: 0.5rem 1rem; }
.artifact-timeout { border-style: dashed; }
";
