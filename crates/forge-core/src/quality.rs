//! Pre-apply quality check of generated code
//!
//! Python: runs of dense lines and functions whose bodies are mostly setup.
//! TSX/JSX: Birkhoff order over complexity of the markup and arbitrary pixel
//! sizes. Other languages pass unchecked. Code that does not parse skips the
//! structural checks; lint and tests judge it later.

use std::collections::HashMap;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tree_sitter::Node;

use forge_interface::Language;

use crate::error::ForgeError;

#[allow(clippy::expect_used)]
static ELEMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[a-zA-Z0-9]+").expect("element pattern is valid"));
#[allow(clippy::expect_used)]
static CLASS_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"className=["']([^"']+)["']"#).expect("class pattern is valid")
});
#[allow(clippy::expect_used)]
static ARBITRARY_PX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-\[[0-9]+px\]").expect("pixel pattern is valid"));

/// Utility classes that add order to a layout
const SYMMETRIC: &[&str] = &["flex", "grid", "justify-center", "items-center", "mx-auto", "text-center"];

/// Thresholds of the check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QualityConfig {
    /// Run the check at all
    pub enabled: bool,
    /// Regenerations requested while breaches remain
    pub repair_rounds: u32,
    /// Longest run of non-blank, non-comment lines
    pub max_block_lines: usize,
    /// Highest setup-to-execution statement ratio of a function body
    pub max_setup_ratio: f64,
    /// Lowest order-to-complexity measure of markup
    pub min_order_measure: f64,
    /// Markup with at most this many elements is not measured
    pub min_elements: usize,
    /// Most arbitrary `-[Npx]` sizes allowed
    pub max_arbitrary_px: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            repair_rounds: 1,
            max_block_lines: 12,
            max_setup_ratio: 1.7,
            min_order_measure: 0.3,
            min_elements: 5,
            max_arbitrary_px: 3,
        }
    }
}

impl QualityConfig {
    /// Check disabled
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ForgeError> {
        if self.max_block_lines == 0 {
            return Err(ForgeError::Config("quality.max_block_lines must be at least 1".into()));
        }
        if !(self.max_setup_ratio > 0.0) {
            return Err(ForgeError::Config("quality.max_setup_ratio must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.min_order_measure) {
            return Err(ForgeError::Config(
                "quality.min_order_measure must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

/// One violated threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Breach {
    /// Too many consecutive code lines
    DenseBlock {
        /// First line of the run (1-based)
        line: usize,
        /// Allowed run length
        limit: usize,
    },
    /// Function body dominated by assignments and asserts
    TopHeavy {
        /// Function name
        function: String,
        /// Setup statements per execution statement
        ratio: f64,
    },
    /// Markup with too little repetition and symmetry
    LowOrder {
        /// Order over complexity
        measure: f64,
    },
    /// Too many hand-picked pixel sizes
    ArbitraryPixels {
        /// Occurrences of `-[Npx]`
        count: usize,
    },
}

impl std::fmt::Display for Breach {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DenseBlock { line, limit } => write!(
                f,
                "dense code block at line {line} (more than {limit} lines without a blank line); add vertical whitespace"
            ),
            Self::TopHeavy { function, ratio } => write!(
                f,
                "function '{function}' is top-heavy setup (ratio {ratio:.2}); extract helper functions"
            ),
            Self::LowOrder { measure } => write!(
                f,
                "markup order measure {measure:.2} is too low; reuse classes and symmetric layout utilities"
            ),
            Self::ArbitraryPixels { count } => write!(
                f,
                "{count} arbitrary pixel sizes; use the design scale instead"
            ),
        }
    }
}

/// Breaches of `code` about to be written to `target`
#[must_use]
pub fn assess(target: &Path, code: &str, config: &QualityConfig) -> Vec<Breach> {
    if !config.enabled {
        return Vec::new();
    }
    let extension = target
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    match extension {
        "py" => python(code, config),
        "tsx" | "jsx" => markup(code, config),
        _ => Vec::new(),
    }
}

/// Feedback handed to the generator with the breaching code
#[must_use]
pub fn repair_prompt(breaches: &[Breach]) -> String {
    let mut out = String::from("The generated code failed the quality check. Fix the following:");
    for breach in breaches {
        out.push_str("\n- ");
        out.push_str(&breach.to_string());
    }
    out
}

fn python(code: &str, config: &QualityConfig) -> Vec<Breach> {
    let mut breaches = Vec::new();
    if let Some(line) = dense_block(code, config.max_block_lines) {
        breaches.push(Breach::DenseBlock {
            line,
            limit: config.max_block_lines,
        });
    }

    let mut parser = tree_sitter::Parser::new();
    if parser
        .set_language(&Language::Python.tree_sitter_language())
        .is_err()
    {
        return breaches;
    }
    let Some(tree) = parser.parse(code, None) else {
        return breaches;
    };
    let root = tree.root_node();
    if root.has_error() {
        return breaches;
    }
    let mut functions = Vec::new();
    collect_functions(root, &mut functions);
    for function in functions {
        let Some(body) = function.child_by_field_name("body") else {
            continue;
        };
        let (setup, exec) = statement_mix(body);
        if exec == 0 {
            continue;
        }
        #[allow(clippy::cast_precision_loss)]
        let ratio = setup as f64 / exec as f64;
        if ratio > config.max_setup_ratio {
            let name = function
                .child_by_field_name("name")
                .and_then(|n| n.utf8_text(code.as_bytes()).ok())
                .unwrap_or_default();
            breaches.push(Breach::TopHeavy {
                function: name.to_string(),
                ratio,
            });
        }
    }
    breaches
}

/// First line of a run longer than `limit`
fn dense_block(code: &str, limit: usize) -> Option<usize> {
    let mut run = 0;
    for (index, line) in code.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            run = 0;
            continue;
        }
        run += 1;
        if run > limit {
            return Some(index + 2 - run);
        }
    }
    None
}

fn collect_functions<'t>(node: Node<'t>, out: &mut Vec<Node<'t>>) {
    if node.kind() == "function_definition" {
        out.push(node);
    }
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        collect_functions(child, out);
    }
}

/// Setup and execution statements directly in `body`
fn statement_mix(body: Node<'_>) -> (usize, usize) {
    let (mut setup, mut exec) = (0, 0);
    let mut cursor = body.walk();
    for statement in body.named_children(&mut cursor) {
        match statement.kind() {
            "assert_statement" => setup += 1,
            "for_statement" | "while_statement" | "return_statement" | "if_statement" => exec += 1,
            "expression_statement" => match statement.named_child(0).map(|n| n.kind()) {
                Some("assignment") => setup += 1,
                Some("augmented_assignment") => {}
                _ => exec += 1,
            },
            _ => {}
        }
    }
    (setup, exec)
}

fn markup(code: &str, config: &QualityConfig) -> Vec<Breach> {
    let mut breaches = Vec::new();
    let elements = ELEMENT.find_iter(code).count();
    let classes: Vec<&str> = CLASS_ATTR
        .captures_iter(code)
        .filter_map(|c| c.get(1))
        .flat_map(|m| m.as_str().split_whitespace())
        .collect();

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for class in &classes {
        *counts.entry(class).or_default() += 1;
    }
    let complexity = (elements + counts.len()).max(1);
    let repeated: usize = counts.values().filter(|&&n| n > 2).sum();
    let symmetric = classes.iter().filter(|c| SYMMETRIC.contains(c)).count() * 5;
    let order = repeated + symmetric;

    #[allow(clippy::cast_precision_loss)]
    let measure = order as f64 / complexity as f64;
    if elements > config.min_elements && measure < config.min_order_measure {
        breaches.push(Breach::LowOrder { measure });
    }

    let pixels = ARBITRARY_PX.find_iter(code).count();
    if pixels > config.max_arbitrary_px {
        breaches.push(Breach::ArbitraryPixels { count: pixels });
    }
    breaches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(path: &str, code: &str) -> Vec<Breach> {
        assess(Path::new(path), code, &QualityConfig::default())
    }

    #[test]
    fn short_python_passes() {
        assert!(check("a.py", "def add(a, b):\n    return a + b\n").is_empty());
    }

    #[test]
    fn dense_python_block() {
        let code: String = (0..13).map(|i| format!("x{i} = {i}\n")).collect();
        assert_eq!(
            check("a.py", &code),
            vec![Breach::DenseBlock { line: 1, limit: 12 }]
        );

        let split = code.replacen("x6 = 6\n", "x6 = 6\n\n", 1);
        assert!(check("a.py", &split).is_empty());
        let commented = code.replacen("x6 = 6\n", "# halfway\n", 1);
        assert!(check("a.py", &commented).is_empty());
    }

    #[test]
    fn top_heavy_function() {
        let code = "def load(path):\n    a = 1\n    b = 2\n    assert a\n\n    c = 3\n    return a + b + c\n";
        match check("a.py", code).as_slice() {
            [Breach::TopHeavy { function, ratio }] => {
                assert_eq!(function, "load");
                assert!((ratio - 4.0).abs() < 1e-9);
            }
            other => panic!("unexpected {other:?}"),
        }

        let balanced = "def load(path):\n    a = 1\n    print(a)\n    return a\n";
        assert!(check("a.py", balanced).is_empty());
    }

    #[test]
    fn unparsable_python_only_gets_line_checks() {
        assert!(check("a.py", "def broken(:\n    a = 1\n").is_empty());
    }

    #[test]
    fn flat_markup_is_low_order() {
        let code = r#"<div><span className="a1">x</span><span className="b2">y</span>
<p className="c3">z</p><em className="d4">w</em><b className="e5">v</b><i className="f6">u</i></div>"#;
        assert!(matches!(check("View.tsx", code).as_slice(), [Breach::LowOrder { .. }]));

        let ordered = r#"<div className="flex items-center"><span className="p-2">x</span>
<span className="p-2">y</span><span className="p-2">z</span><span>a</span><span>b</span><span>c</span></div>"#;
        assert!(check("View.tsx", ordered).is_empty());
    }

    #[test]
    fn arbitrary_pixels() {
        let code = r#"<div className="w-[13px] h-[21px] mt-[7px] mb-[9px]">x</div>"#;
        assert_eq!(
            check("View.jsx", code),
            vec![Breach::ArbitraryPixels { count: 4 }]
        );
    }

    #[test]
    fn disabled_and_other_languages_pass() {
        let code: String = (0..20).map(|i| format!("x{i} = {i}\n")).collect();
        assert!(assess(Path::new("a.py"), &code, &QualityConfig::disabled()).is_empty());
        assert!(check("a.rs", &code).is_empty());
    }

    #[test]
    fn repair_prompt_lists_breaches() {
        let prompt = repair_prompt(&[Breach::ArbitraryPixels { count: 4 }]);
        assert!(prompt.starts_with("The generated code failed the quality check"));
        assert!(prompt.contains("\n- 4 arbitrary pixel sizes"));
    }
}
