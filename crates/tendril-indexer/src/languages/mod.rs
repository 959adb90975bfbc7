//! Per-language signal extractors

pub mod python;

use std::sync::Arc;

use crate::extractor::SignalExtractor;
use crate::parser_pool::SourceLanguage;

pub use python::PythonSignalExtractor;

/// The extractor for files written in `language`.
pub fn extractor_for(language: SourceLanguage) -> Arc<dyn SignalExtractor> {
    match language {
        SourceLanguage::Python => Arc::new(PythonSignalExtractor::new()),
    }
}
