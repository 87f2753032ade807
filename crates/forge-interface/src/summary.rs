//! Rendered interface summary with full-source fallback

use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{declarations, Declaration, ExtractError, Language};

/// What the test author is shown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceSummary {
    /// Detected language
    pub language: Option<Language>,
    /// Extracted declarations; empty on fallback
    pub declarations: Vec<Declaration>,
    /// Why extraction fell back to the full source, if it did
    pub fallback_reason: Option<String>,
    source: String,
}

impl InterfaceSummary {
    /// Whether the summary is the unmodified source
    #[inline]
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.fallback_reason.is_some()
    }

    /// Text handed to the test generator
    #[must_use]
    pub fn render(&self) -> String {
        let Some(language) = self.language.filter(|_| !self.is_fallback()) else {
            return self.source.clone();
        };
        let mut out = String::new();
        for (i, decl) in self.declarations.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            render_decl(&mut out, decl, language, 0);
        }
        out
    }
}

impl std::fmt::Display for InterfaceSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

fn render_decl(out: &mut String, decl: &Declaration, language: Language, depth: usize) {
    let indent = "    ".repeat(depth);
    let marker = language.comment_marker();
    if let Some(doc) = &decl.doc {
        for line in doc.lines() {
            if line.is_empty() {
                let _ = writeln!(out, "{indent}{marker}");
            } else {
                let _ = writeln!(out, "{indent}{marker} {line}");
            }
        }
    }
    let _ = writeln!(out, "{indent}{}", decl.signature);
    for member in &decl.members {
        render_decl(out, member, language, depth + 1);
    }
}

/// Summarize the code about to be written to `path`.
///
/// Falls back to the full source when the language is unknown, the code has
/// syntax errors, or no declarations are found.
#[must_use]
pub fn summarize(path: &Path, source: &str) -> InterfaceSummary {
    let language = Language::from_path(path);
    let result = match language {
        Some(lang) => declarations(source, lang).and_then(|decls| {
            if decls.is_empty() {
                Err(ExtractError::Empty)
            } else {
                Ok(decls)
            }
        }),
        None => Err(ExtractError::UnsupportedLanguage(
            path.extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default(),
        )),
    };

    match result {
        Ok(declarations) => InterfaceSummary {
            language,
            declarations,
            fallback_reason: None,
            source: source.to_string(),
        },
        Err(e) => {
            tracing::debug!(path = %path.display(), "interface extraction fell back: {}", e);
            InterfaceSummary {
                language,
                declarations: Vec::new(),
                fallback_reason: Some(e.to_string()),
                source: source.to_string(),
            }
        }
    }
}
