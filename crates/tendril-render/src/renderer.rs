//! Renderer collaborator trait and artifact metadata

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_RENDERER_VERSION: &str = "1.0.0";

/// Turns a JSON payload into an HTML fragment.
///
/// `cancel` fires when the engine gives up on the render (timeout or
/// shutdown). Long-running renderers should check it and return early; the
/// engine drops the future either way.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Identifier the engine dispatches on, e.g. `cluster_map`.
    fn artifact_type(&self) -> &str;

    fn title(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    async fn render(&self, data: &Value, cancel: CancellationToken) -> anyhow::Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactMetadata {
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub title: String,
    pub description: String,
    /// Render time in unix milliseconds.
    pub timestamp: i64,
}

/// Caller-supplied replacements for the renderer's own title and description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl MetadataOverrides {
    pub fn title(title: impl Into<String>) -> Self {
        MetadataOverrides {
            title: Some(title.into()),
            description: None,
        }
    }

    pub(crate) fn apply(&self, metadata: &mut ArtifactMetadata) {
        if let Some(title) = &self.title {
            metadata.title = title.clone();
        }
        if let Some(description) = &self.description {
            metadata.description = description.clone();
        }
    }
}

/// Escape text for interpolation into HTML element content or attributes.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
