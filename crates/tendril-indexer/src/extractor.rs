//! Extractor collaborator: parsed files in, signal records out

use std::path::Path;
use std::sync::Arc;

use tendril_core::{ConnectionSite, EmissionSite, SignalDefinition, SourceFile};
use tree_sitter::{Node, Tree};

use crate::parser_pool::SourceLanguage;

/// One parsed file of the AST forest.
#[derive(Debug)]
pub struct ParsedFile {
    pub source: SourceFile,
    pub language: SourceLanguage,
    pub tree: Tree,
    pub content: Arc<str>,
}

impl ParsedFile {
    pub fn path(&self) -> &Path {
        &self.source.path
    }

    pub fn text(&self, node: Node<'_>) -> anyhow::Result<&str> {
        Ok(node.utf8_text(self.content.as_bytes())?)
    }

    /// Trimmed source line holding the start of `node`.
    pub fn line_text(&self, node: &Node<'_>) -> &str {
        let content: &str = &self.content;
        let at = node.start_byte().min(content.len());
        let start = content[..at].rfind('\n').map_or(0, |i| i + 1);
        let end = content[at..].find('\n').map_or(content.len(), |i| at + i);
        content[start..end].trim()
    }
}

/// The node kinds signal extraction looks at. Everything else is `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyntaxKind {
    Call,
    Attribute,
    Identifier,
    Lambda,
    Assignment,
    ClassDefinition,
    KeywordArgument,
    Other,
}

impl SyntaxKind {
    pub fn of(node: &Node<'_>) -> Self {
        match node.kind() {
            "call" => SyntaxKind::Call,
            "attribute" => SyntaxKind::Attribute,
            "identifier" => SyntaxKind::Identifier,
            "lambda" => SyntaxKind::Lambda,
            "assignment" => SyntaxKind::Assignment,
            "class_definition" => SyntaxKind::ClassDefinition,
            "keyword_argument" => SyntaxKind::KeywordArgument,
            _ => SyntaxKind::Other,
        }
    }
}

/// Pulls definition, emission and connection records out of one file.
/// Implementations must be deterministic and free of side effects.
pub trait SignalExtractor: Send + Sync {
    fn extract_signals(&self, file: &ParsedFile) -> anyhow::Result<Vec<SignalDefinition>>;
    fn extract_emissions(&self, file: &ParsedFile) -> anyhow::Result<Vec<EmissionSite>>;
    fn extract_connections(&self, file: &ParsedFile) -> anyhow::Result<Vec<ConnectionSite>>;
}
