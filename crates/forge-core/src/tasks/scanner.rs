//! Quality-breach scanner
//!
//! Walks the project and turns code-quality gaps into tasks:
//! - Python functions without docstrings (low)
//! - Python functions without a return annotation (low)
//! - Rust `pub fn` items without doc comments (low)
//! - TSX/JSX buttons styled without a `hover:` state (medium)
//!
//! Higher severities come first. Each (file, rule) pair is offered at most
//! once per scanner.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use forge_interface::{declarations, DeclKind, Declaration, Language};

use super::TaskSource;
use crate::error::ForgeError;
use crate::types::{MutationTask, Severity, TaskOrigin};

const SKIPPED_DIRS: &[&str] = &["target", "node_modules", "tests", "__pycache__", "venv"];

/// Python function without a docstring
pub const MISSING_DOCSTRING: &str = "missing-docstring";
/// Python function without a `->` return annotation
pub const MISSING_TYPE_HINTS: &str = "missing-type-hints";
/// Rust `pub fn` without a doc comment
pub const UNDOCUMENTED_PUB_FN: &str = "undocumented-pub-fn";
/// Styled button without a hover state
pub const BUTTON_WITHOUT_HOVER: &str = "button-without-hover";

/// Breach task source over a project tree
#[derive(Debug, Clone)]
pub struct BreachScanner {
    root: PathBuf,
    offered: Arc<Mutex<HashSet<(PathBuf, &'static str)>>>,
}

/// One rule violated by one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Breach {
    pub(crate) path: PathBuf,
    pub(crate) rule: &'static str,
    pub(crate) severity: Severity,
    /// Offending functions, or `line N` for markup
    pub(crate) names: Vec<String>,
}

impl Breach {
    fn description(&self) -> String {
        let names = self.names.join(", ");
        match self.rule {
            MISSING_DOCSTRING => format!("Add docstrings to the undocumented functions: {names}"),
            MISSING_TYPE_HINTS => format!(
                "Add parameter and return type hints to the functions: {names}"
            ),
            BUTTON_WITHOUT_HOVER => format!(
                "Add hover states to the buttons at {names}"
            ),
            _ => format!("Add doc comments to the undocumented public functions: {names}"),
        }
    }
}

impl BreachScanner {
    /// Scanner over the tree at `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            offered: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Every breach in the tree, most severe first, then in path order
    pub(crate) fn scan(root: &Path) -> Vec<Breach> {
        let mut files = Vec::new();
        collect(root, root, &mut files);
        files.sort();
        let mut breaches: Vec<Breach> = files
            .into_iter()
            .flat_map(|relative| inspect(root, relative))
            .collect();
        // stable: path order survives within a severity
        breaches.sort_by(|a, b| b.severity.cmp(&a.severity));
        breaches
    }
}

#[async_trait]
impl TaskSource for BreachScanner {
    async fn next_task(&self) -> Result<Option<MutationTask>, ForgeError> {
        let root = self.root.clone();
        let breaches = tokio::task::spawn_blocking(move || Self::scan(&root))
            .await
            .map_err(|e| ForgeError::Join(e.to_string()))?;

        let mut offered = self.offered.lock();
        let Some(breach) = breaches
            .into_iter()
            .find(|b| !offered.contains(&(b.path.clone(), b.rule)))
        else {
            return Ok(None);
        };
        offered.insert((breach.path.clone(), breach.rule));
        tracing::debug!(path = %breach.path.display(), rule = breach.rule, "quality breach");

        let description = breach.description();
        Ok(Some(
            MutationTask::new(breach.path, description)
                .with_origin(TaskOrigin::QualityBreach {
                    rule: breach.rule.to_string(),
                })
                .with_severity(breach.severity),
        ))
    }

    async fn mark_complete(&self, _task: &MutationTask) -> Result<bool, ForgeError> {
        // breaches disappear once the code is fixed
        Ok(false)
    }
}

fn collect(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let Ok(kind) = entry.file_type() else {
            continue;
        };
        let path = entry.path();
        if kind.is_dir() {
            if !name.starts_with('.') && !SKIPPED_DIRS.contains(&name.as_ref()) {
                collect(root, &path, out);
            }
        } else if kind.is_file() {
            if let Ok(relative) = path.strip_prefix(root) {
                out.push(relative.to_path_buf());
            }
        }
    }
}

fn inspect(root: &Path, relative: PathBuf) -> Vec<Breach> {
    let markup = matches!(
        relative.extension().and_then(|e| e.to_str()),
        Some("tsx" | "jsx")
    );
    let Some(language) = Language::from_path(&relative) else {
        return Vec::new();
    };
    if !markup && !matches!(language, Language::Python | Language::Rust) {
        return Vec::new();
    }
    let Ok(source) = fs::read_to_string(root.join(&relative)) else {
        return Vec::new();
    };
    let breach = |rule, severity, names: Vec<String>| {
        (!names.is_empty()).then(|| Breach {
            path: relative.clone(),
            rule,
            severity,
            names,
        })
    };

    if markup {
        return breach(BUTTON_WITHOUT_HOVER, Severity::Medium, plain_buttons(&source))
            .into_iter()
            .collect();
    }

    let Ok(decls) = declarations(&source, language) else {
        return Vec::new();
    };
    let mut functions = Vec::new();
    for decl in &decls {
        flatten_functions(decl, &mut functions);
    }
    let names = |flagged: &dyn Fn(&Declaration) -> bool| {
        functions
            .iter()
            .filter(|d| flagged(d))
            .map(|d| d.name.clone())
            .collect::<Vec<_>>()
    };

    match language {
        Language::Python => [
            breach(
                MISSING_DOCSTRING,
                Severity::Low,
                names(&|d: &Declaration| !d.name.starts_with("__") && d.doc.is_none()),
            ),
            breach(
                MISSING_TYPE_HINTS,
                Severity::Low,
                names(&|d: &Declaration| !d.signature.contains("->")),
            ),
        ]
        .into_iter()
        .flatten()
        .collect(),
        _ => breach(
            UNDOCUMENTED_PUB_FN,
            Severity::Low,
            names(&|d: &Declaration| d.signature.starts_with("pub") && d.doc.is_none()),
        )
        .into_iter()
        .collect(),
    }
}

fn flatten_functions<'d>(decl: &'d Declaration, out: &mut Vec<&'d Declaration>) {
    if matches!(decl.kind, DeclKind::Function | DeclKind::Method) {
        out.push(decl);
    }
    for member in &decl.members {
        flatten_functions(member, out);
    }
}

/// `line N` of every styled `<button` line lacking a `hover:` class
fn plain_buttons(source: &str) -> Vec<String> {
    source
        .lines()
        .enumerate()
        .filter(|(_, line)| line.contains("<button") && line.contains("className") && !line.contains("hover:"))
        .map(|(index, _)| format!("line {}", index + 1))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("tests")).unwrap();
        fs::create_dir_all(root.join(".venv")).unwrap();
        fs::write(
            root.join("src/ok.py"),
            "def add(a: int, b: int) -> int:\n    \"\"\"Sum.\"\"\"\n    return a + b\n",
        )
        .unwrap();
        fs::write(
            root.join("src/bad.py"),
            "def sub(a, b):\n    return a - b\n\nclass K:\n    def __init__(self) -> None:\n        pass\n\n    def run(self) -> None:\n        pass\n",
        )
        .unwrap();
        fs::write(
            root.join("src/lib.rs"),
            "/// Documented.\npub fn good() {}\n\npub fn bare() {}\n\nfn private() {}\n",
        )
        .unwrap();
        fs::write(root.join("tests/test_x.py"), "def test_x():\n    pass\n").unwrap();
        fs::write(root.join(".venv/site.py"), "def hidden():\n    pass\n").unwrap();
        dir
    }

    #[test]
    fn finds_breaches_outside_skipped_dirs() {
        let dir = project();
        let breaches = BreachScanner::scan(dir.path());
        assert_eq!(breaches.len(), 3);

        assert_eq!(breaches[0].path, PathBuf::from("src/bad.py"));
        assert_eq!(breaches[0].rule, MISSING_DOCSTRING);
        assert_eq!(breaches[0].names, vec!["sub", "run"]);

        assert_eq!(breaches[1].path, PathBuf::from("src/bad.py"));
        assert_eq!(breaches[1].rule, MISSING_TYPE_HINTS);
        assert_eq!(breaches[1].names, vec!["sub"]);

        assert_eq!(breaches[2].path, PathBuf::from("src/lib.rs"));
        assert_eq!(breaches[2].rule, UNDOCUMENTED_PUB_FN);
        assert_eq!(breaches[2].names, vec!["bare"]);
    }

    #[test]
    fn unhovered_buttons_come_first() {
        let dir = project();
        fs::create_dir_all(dir.path().join("ui")).unwrap();
        fs::write(
            dir.path().join("ui/Panel.tsx"),
            "export const Panel = () => (\n  <div>\n    <button className=\"p-2 hover:bg-gray-100\">ok</button>\n    <button className=\"p-2\">plain</button>\n    <button>bare</button>\n  </div>\n);\n",
        )
        .unwrap();

        let breaches = BreachScanner::scan(dir.path());
        assert_eq!(breaches.len(), 4);
        assert_eq!(breaches[0].path, PathBuf::from("ui/Panel.tsx"));
        assert_eq!(breaches[0].rule, BUTTON_WITHOUT_HOVER);
        assert_eq!(breaches[0].severity, Severity::Medium);
        assert_eq!(breaches[0].names, vec!["line 4"]);
        assert!(breaches[0].description().contains("line 4"));
    }

    #[tokio::test]
    async fn each_breach_is_offered_once() {
        let dir = project();
        let scanner = BreachScanner::new(dir.path());

        let first = scanner.next_task().await.unwrap().unwrap();
        assert_eq!(first.severity, Severity::Low);
        assert!(matches!(first.origin, TaskOrigin::QualityBreach { .. }));
        assert!(first.description.contains("sub"));
        assert!(!scanner.mark_complete(&first).await.unwrap());

        let second = scanner.next_task().await.unwrap().unwrap();
        assert_eq!(second.target, PathBuf::from("src/bad.py"));
        assert!(second.description.contains("type hints"));

        let third = scanner.next_task().await.unwrap().unwrap();
        assert_eq!(third.target, PathBuf::from("src/lib.rs"));
        assert!(scanner.next_task().await.unwrap().is_none());
    }
}
