//! Project configuration loaded from `tendril.toml`

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "tendril.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TendrilConfig {
    pub scan: ScanConfig,
    pub cluster: ClusterConfig,
    pub render: RenderConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Directory names skipped anywhere in the tree.
    pub exclude_dirs: Vec<String>,
    /// Glob patterns matched against root-relative paths.
    pub exclude_globs: Vec<String>,
    /// Below this many files to parse, parsing stays on the calling thread.
    pub parallel_threshold: usize,
    /// Upper bound on parser threads; `None` uses available parallelism.
    pub max_workers: Option<usize>,
    pub follow_links: bool,
    /// Keep content fingerprints in `.tendril/` between runs.
    pub persist_fingerprints: bool,
    pub fingerprint_max_age_days: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            exclude_dirs: [
                "__pycache__",
                ".git",
                ".hg",
                ".tendril",
                ".venv",
                "venv",
                "env",
                "node_modules",
                "site-packages",
                "build",
                "dist",
                ".mypy_cache",
                ".pytest_cache",
                ".tox",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            exclude_globs: Vec::new(),
            parallel_threshold: 8,
            max_workers: None,
            follow_links: false,
            persist_fingerprints: true,
            fingerprint_max_age_days: 30,
        }
    }
}

impl ScanConfig {
    /// Parser threads to use for `files` pending parses.
    pub fn worker_count(&self, files: usize) -> usize {
        if files < self.parallel_threshold.max(1) {
            return 0;
        }
        let max = self.max_workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get().max(2))
                .unwrap_or(2)
        });
        max.max(1).min(files)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub max_depth: usize,
    pub min_subcluster_size: usize,
    pub max_passes: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            max_depth: 3,
            min_subcluster_size: 8,
            max_passes: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub timeout_ms: u64,
    pub cache_capacity: usize,
    pub error_log_size: usize,
    /// Relative to the project root.
    pub output_dir: PathBuf,
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            timeout_ms: 5_000,
            cache_capacity: 64,
            error_log_size: 50,
            output_dir: PathBuf::from(".tendril/artifacts"),
        }
    }
}

impl TendrilConfig {
    /// Load `tendril.toml` from `root`. A missing file yields the defaults;
    /// a malformed one is an error.
    pub fn load(root: &Path) -> anyhow::Result<Self> {
        let path = root.join(CONFIG_FILE);
        if !path.exists() {
            tracing::debug!("No {} in {}, using defaults", CONFIG_FILE, root.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;

        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = TendrilConfig::load(dir.path()).unwrap();
        assert_eq!(config, TendrilConfig::default());
        assert_eq!(config.scan.parallel_threshold, 8);
        assert_eq!(config.render.timeout_ms, 5_000);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config = TendrilConfig::from_toml(
            r#"
[scan]
exclude_globs = ["legacy/**"]
max_workers = 3

[cluster]
max_depth = 2
"#,
        )
        .unwrap();

        assert_eq!(config.scan.exclude_globs, vec!["legacy/**"]);
        assert_eq!(config.scan.max_workers, Some(3));
        assert!(config.scan.exclude_dirs.contains(&"__pycache__".to_string()));
        assert_eq!(config.cluster.max_depth, 2);
        assert_eq!(config.cluster.min_subcluster_size, 8);
        assert_eq!(config.render.cache_capacity, 64);
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[scan\nparallel_threshold = ").unwrap();
        assert!(TendrilConfig::load(dir.path()).is_err());
    }

    #[test]
    fn test_worker_count_threshold() {
        let config = ScanConfig {
            max_workers: Some(4),
            ..ScanConfig::default()
        };
        assert_eq!(config.worker_count(5), 0);
        assert_eq!(config.worker_count(8), 4);
        assert_eq!(config.worker_count(10), 4);

        let narrow = ScanConfig {
            parallel_threshold: 2,
            max_workers: Some(16),
            ..ScanConfig::default()
        };
        assert_eq!(narrow.worker_count(3), 3);
    }
}
