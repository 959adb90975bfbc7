//! Project scanning, parsing and signal graph construction

pub mod builder;
pub mod config;
pub mod extractor;
pub mod languages;
pub mod memory;
pub mod parser_pool;
pub mod scanner;

#[cfg(test)]
pub mod tests;

#[cfg(test)]
pub mod test_utils;

pub use builder::{BuildOutput, SignalGraphBuilder};
pub use config::{CONFIG_FILE, ClusterConfig, RenderConfig, ScanConfig, TendrilConfig};
pub use extractor::{ParsedFile, SignalExtractor, SyntaxKind};
pub use languages::{PythonSignalExtractor, extractor_for};
pub use memory::{MemoryProbe, resident_bytes};
pub use parser_pool::{ParseRequest, ParseResult, ParserPool, SourceLanguage};
pub use scanner::{
    FINGERPRINTS_FILE, ProjectScanner, ScanEvent, ScanMode, ScanOutcome, ScanStats,
    fingerprint_path,
};
