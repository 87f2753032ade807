//! Extraction errors
//!
//! None of these reach the pipeline: [`crate::summarize`] turns every one
//! into a full-source fallback.

/// Extraction failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    #[error("no grammar for {0}")]
    UnsupportedLanguage(String),

    #[error("parser initialization failed: {0}")]
    ParserInit(String),

    #[error("parse failed")]
    ParseFailed,

    #[error("syntax error near line {line}")]
    SyntaxError { line: usize },

    #[error("no top-level declarations")]
    Empty,
}
