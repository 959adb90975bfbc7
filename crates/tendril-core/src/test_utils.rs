//! Fixtures shared by the tendril-core unit tests

use std::path::PathBuf;

use crate::graph::SignalGraph;
use crate::model::*;

pub fn definition(name: &str, file: &str, line: u32) -> SignalDefinition {
    SignalDefinition {
        name: name.to_string(),
        params: Vec::new(),
        param_types: None,
        file_path: PathBuf::from(file),
        line,
        source: SignalSource::Local,
    }
}

pub fn emission(signal: &str, file: &str, line: u32) -> EmissionSite {
    EmissionSite {
        signal: signal.to_string(),
        file_path: PathBuf::from(file),
        line,
        context: format!("self.{signal}.emit()"),
        emitter: Some("self".to_string()),
        args: None,
    }
}

pub fn connection(signal: &str, file: &str, line: u32) -> ConnectionSite {
    ConnectionSite {
        signal: signal.to_string(),
        file_path: PathBuf::from(file),
        line,
        context: format!("bus.{signal}.connect(self.on_{signal})"),
        target: Some("bus".to_string()),
        handler: format!("self.on_{signal}"),
        handler_kind: HandlerKind::Direct,
        is_lambda: false,
        flags: None,
    }
}

/// A small full graph: a bus module declaring two signals, a player module
/// emitting one of them and a HUD listening to both.
pub fn sample_graph() -> SignalGraph {
    let mut graph = SignalGraph::new(crate::GRAPH_SCHEMA_VERSION);

    let mut died = definition("player_died", "game/event_bus.py", 4);
    died.params = vec!["player".to_string(), "cause".to_string()];
    died.param_types = Some(
        [("player", "object"), ("cause", "str")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    );
    died.source = SignalSource::GlobalBus;
    graph.add_definition(died);

    let mut score = definition("score_changed", "game/event_bus.py", 5);
    score.params = vec!["arg0".to_string()];
    score.source = SignalSource::GlobalBus;
    graph.add_definition(score);

    let mut emit = emission("score_changed", "game/player.py", 21);
    emit.emitter = Some("EventBus".to_string());
    emit.args = Some(vec!["self.score".to_string()]);
    graph.add_emission(emit);

    graph.add_connection(connection("player_died", "game/hud.py", 12));
    let mut lambda = connection("score_changed", "game/hud.py", 13);
    lambda.handler = "lambda".to_string();
    lambda.handler_kind = HandlerKind::Lambda;
    lambda.is_lambda = true;
    lambda.flags = Some(vec!["Qt.QueuedConnection".to_string()]);
    graph.add_connection(lambda);

    graph.refresh_counts(3);
    graph
}

pub fn nodes(ids: &[&str]) -> Vec<GraphNode> {
    ids.iter().map(|id| GraphNode::new(*id)).collect()
}

fn links(pairs: &[(&str, &str)]) -> Vec<GraphLink> {
    pairs.iter().map(|(a, b)| GraphLink::new(*a, *b)).collect()
}

/// Two disjoint triangles a1-a2-a3 and b1-b2-b3.
pub fn two_triangles() -> (Vec<GraphNode>, Vec<GraphLink>) {
    (
        nodes(&["a1", "a2", "a3", "b1", "b2", "b3"]),
        links(&[
            ("a1", "a2"),
            ("a2", "a3"),
            ("a1", "a3"),
            ("b1", "b2"),
            ("b2", "b3"),
            ("b1", "b3"),
        ]),
    )
}

/// Two triangles joined by the bridge a3-b1.
pub fn barbell_of_triangles() -> (Vec<GraphNode>, Vec<GraphLink>) {
    let (ns, mut ls) = two_triangles();
    ls.push(GraphLink::new("a3", "b1"));
    (ns, ls)
}

/// Ten nodes that settle into two five-member communities, each of which
/// splits again when re-clustered on its own.
pub fn loose_pair() -> (Vec<GraphNode>, Vec<GraphLink>) {
    (
        nodes(&["v0", "v1", "v2", "v3", "v4", "v5", "v6", "v7", "v8", "v9"]),
        links(&[
            ("v0", "v4"),
            ("v0", "v5"),
            ("v0", "v6"),
            ("v0", "v8"),
            ("v0", "v9"),
            ("v1", "v2"),
            ("v1", "v3"),
            ("v1", "v4"),
            ("v1", "v7"),
            ("v3", "v4"),
            ("v3", "v5"),
            ("v3", "v6"),
            ("v3", "v7"),
            ("v3", "v8"),
            ("v4", "v7"),
            ("v5", "v8"),
            ("v6", "v8"),
            ("v7", "v9"),
        ]),
    )
}

/// Complete graph on `n` nodes named `k0..`.
pub fn complete_graph(n: usize) -> (Vec<GraphNode>, Vec<GraphLink>) {
    let ids: Vec<String> = (0..n).map(|i| format!("k{i}")).collect();
    let ns = ids.iter().map(GraphNode::new).collect();
    let mut ls = Vec::new();
    for i in 0..n {
        for j in (i + 1)..n {
            ls.push(GraphLink::new(&ids[i], &ids[j]));
        }
    }
    (ns, ls)
}
