//! Cluster labels from term-frequency / inverse-cluster-frequency scoring

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

/// Lowercase runs, capitalised words, acronyms and digit runs.
static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Z]?[a-z]+|[A-Z]+|[0-9]+").expect("word pattern compiles"));

const STOPWORDS: &[&str] = &["src", "lib", "py", "pyi", "init", "on", "the", "test", "tests"];

const LABEL_TERMS: usize = 3;

/// Split a node id (`signal:<name>` or `file:<path>`) into label tokens.
pub fn tokens_for_node(id: &str) -> Vec<String> {
    if let Some(name) = id.strip_prefix("signal:") {
        return words(name);
    }
    if let Some(path) = id.strip_prefix("file:") {
        let path = std::path::Path::new(path);
        let mut out = Vec::new();
        if let Some(parent) = path.parent() {
            for component in parent.components() {
                if let std::path::Component::Normal(part) = component {
                    out.extend(words(&part.to_string_lossy()));
                }
            }
        }
        if let Some(stem) = path.file_stem() {
            out.extend(words(&stem.to_string_lossy()));
        }
        return out;
    }
    words(id)
}

fn words(text: &str) -> Vec<String> {
    WORD.find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|w| w.len() >= 2 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Label each cluster among its siblings. `clusters` holds the member ids of
/// each sibling; the result is parallel to it.
pub fn label_clusters(clusters: &[Vec<String>], fallback_ids: &[String]) -> Vec<String> {
    let term_counts: Vec<HashMap<String, usize>> = clusters
        .iter()
        .map(|members| {
            let mut counts = HashMap::new();
            for member in members {
                for token in tokens_for_node(member) {
                    *counts.entry(token).or_insert(0) += 1;
                }
            }
            counts
        })
        .collect();

    let mut cluster_frequency: HashMap<&str, usize> = HashMap::new();
    for counts in &term_counts {
        let distinct: HashSet<&str> = counts.keys().map(String::as_str).collect();
        for token in distinct {
            *cluster_frequency.entry(token).or_insert(0) += 1;
        }
    }

    let siblings = clusters.len() as f64;
    term_counts
        .iter()
        .enumerate()
        .map(|(i, counts)| {
            let total: usize = counts.values().sum();
            if total == 0 {
                let id = fallback_ids.get(i).map(String::as_str).unwrap_or("?");
                return format!("cluster {id}");
            }

            // BTreeMap keeps ties in alphabetical order after the stable sort.
            let scored: BTreeMap<&str, f64> = counts
                .iter()
                .map(|(token, &count)| {
                    let tf = count as f64 / total as f64;
                    let cf = cluster_frequency.get(token.as_str()).copied().unwrap_or(0) as f64;
                    let icf = ((1.0 + siblings) / (1.0 + cf)).ln() + 1.0;
                    (token.as_str(), tf * icf)
                })
                .collect();

            let mut ranked: Vec<(&str, f64)> = scored.into_iter().collect();
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
            ranked
                .iter()
                .take(LABEL_TERMS)
                .map(|(token, _)| *token)
                .collect::<Vec<_>>()
                .join(" · ")
        })
        .collect()
}
