//! Error taxonomy shared by the scan, build, cache and render stages

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse failure classes. Only `Filesystem` is fatal to a pipeline run;
/// every other class is recovered where it happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCategory {
    Filesystem,
    Parsing,
    Validation,
    Resource,
    Internal,
}

#[derive(Debug, Error)]
pub enum TendrilError {
    /// Project root missing, not a directory, or unreadable.
    #[error("project root {path} is not accessible: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parsing { path: PathBuf, message: String },

    #[error("invalid cached data: {0}")]
    Validation(String),

    #[error("{artifact_type} render exceeded {timeout_ms}ms")]
    Resource { artifact_type: String, timeout_ms: u64 },

    #[error("{context}: {message}")]
    Internal { context: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("encoding error: {0}")]
    Bincode(#[from] bincode::Error),
}

impl TendrilError {
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TendrilError::Filesystem {
            path: path.into(),
            source,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            TendrilError::Filesystem { .. } | TendrilError::Io(_) => ErrorCategory::Filesystem,
            TendrilError::Parsing { .. } => ErrorCategory::Parsing,
            TendrilError::Validation(_) | TendrilError::Json(_) | TendrilError::Bincode(_) => {
                ErrorCategory::Validation
            }
            TendrilError::Resource { .. } => ErrorCategory::Resource,
            TendrilError::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, TendrilError>;
