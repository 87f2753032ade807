//! Declaration extraction
//!
//! Walks the top level of a parsed file and keeps, per declaration:
//! - the signature: source text up to the body, whitespace collapsed
//! - the doc comment or docstring
//! - for containers (impl, trait, class), the signatures of their members
//!
//! Type-like declarations (struct, enum, interface, type alias) carry no
//! executable body and are kept whole.

use serde::{Deserialize, Serialize};
use tree_sitter::Node;

use crate::{ExtractError, Language};

/// Kind of a top-level declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeclKind {
    Function,
    Method,
    Type,
    Trait,
    Impl,
    Class,
    Constant,
    Module,
}

/// One declaration of the interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Declaration {
    /// Declaration kind
    pub kind: DeclKind,
    /// Declared name (the implemented type for impl blocks)
    pub name: String,
    /// Signature without body
    pub signature: String,
    /// Documentation, markers stripped
    pub doc: Option<String>,
    /// Member declarations of containers
    pub members: Vec<Declaration>,
}

/// Parse `source` and collect its top-level declarations
///
/// # Errors
/// Returns [`ExtractError`] if the grammar cannot be loaded, parsing fails,
/// or the tree contains syntax errors.
pub fn declarations(source: &str, language: Language) -> Result<Vec<Declaration>, ExtractError> {
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&language.tree_sitter_language())
        .map_err(|e| ExtractError::ParserInit(e.to_string()))?;

    let tree = parser.parse(source, None).ok_or(ExtractError::ParseFailed)?;
    let root = tree.root_node();
    if root.has_error() {
        return Err(ExtractError::SyntaxError {
            line: first_error_line(root),
        });
    }

    let walker = Walker {
        source: source.as_bytes(),
        language,
    };
    let mut out = Vec::new();
    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        if let Some(decl) = walker.declaration(child) {
            out.push(decl);
        }
    }
    Ok(out)
}

fn first_error_line(node: Node<'_>) -> usize {
    if node.is_error() || node.is_missing() {
        return node.start_position().row + 1;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.has_error() {
            return first_error_line(child);
        }
    }
    node.start_position().row + 1
}

struct Walker<'s> {
    source: &'s [u8],
    language: Language,
}

impl<'s> Walker<'s> {
    fn text(&self, node: Node<'_>) -> &'s str {
        node.utf8_text(self.source).unwrap_or("")
    }

    fn declaration(&self, node: Node<'_>) -> Option<Declaration> {
        match self.language {
            Language::Rust => self.rust(node),
            Language::Python => self.python(node),
            Language::TypeScript | Language::Tsx | Language::JavaScript => self.script(node, node),
            Language::Go => self.go(node),
        }
    }

    // ---------------------------------------------------------------- Rust

    fn rust(&self, node: Node<'_>) -> Option<Declaration> {
        let doc = self.preceding_doc(node);
        let decl = match node.kind() {
            "function_item" | "function_signature_item" => {
                self.with_body(node, DeclKind::Function, self.field_text(node, "name"))
            }
            "struct_item" | "enum_item" | "union_item" | "type_item" => {
                self.whole(node, DeclKind::Type, self.field_text(node, "name"))
            }
            "const_item" | "static_item" => {
                self.whole(node, DeclKind::Constant, self.field_text(node, "name"))
            }
            "trait_item" => {
                let mut decl = self.with_body(node, DeclKind::Trait, self.field_text(node, "name"));
                decl.members = self.members(node, |w, member| w.rust_member(member));
                decl
            }
            "impl_item" => {
                let mut decl = self.with_body(node, DeclKind::Impl, self.field_text(node, "type"));
                decl.members = self.members(node, |w, member| w.rust_member(member));
                decl
            }
            "mod_item" => self.with_body(node, DeclKind::Module, self.field_text(node, "name")),
            _ => return None,
        };
        Some(Declaration { doc, ..decl })
    }

    fn rust_member(&self, node: Node<'_>) -> Option<Declaration> {
        let mut decl = match node.kind() {
            "function_item" | "function_signature_item" => {
                self.with_body(node, DeclKind::Method, self.field_text(node, "name"))
            }
            "associated_type" | "const_item" | "type_item" => {
                self.whole(node, DeclKind::Constant, self.field_text(node, "name"))
            }
            _ => return None,
        };
        decl.doc = self.preceding_doc(node);
        Some(decl)
    }

    // -------------------------------------------------------------- Python

    fn python(&self, node: Node<'_>) -> Option<Declaration> {
        match node.kind() {
            "decorated_definition" => {
                let inner = node.child_by_field_name("definition")?;
                let mut decl = self.python(inner)?;
                decl.signature = format!("{} {}", self.signature_from(node, inner), decl.signature);
                Some(decl)
            }
            "function_definition" => {
                let mut decl =
                    self.with_body(node, DeclKind::Function, self.field_text(node, "name"));
                decl.doc = self.docstring(node);
                Some(decl)
            }
            "class_definition" => {
                let mut decl = self.with_body(node, DeclKind::Class, self.field_text(node, "name"));
                decl.doc = self.docstring(node);
                decl.members = self.members(node, |w, member| {
                    w.python(member).map(|mut m| {
                        if m.kind == DeclKind::Function {
                            m.kind = DeclKind::Method;
                        }
                        m
                    })
                });
                Some(decl)
            }
            _ => None,
        }
    }

    /// First statement of the body, if it is a bare string
    fn docstring(&self, node: Node<'_>) -> Option<String> {
        let body = node.child_by_field_name("body")?;
        let first = body.named_child(0)?;
        if first.kind() != "expression_statement" {
            return None;
        }
        let string = first.named_child(0)?;
        if string.kind() != "string" {
            return None;
        }
        let doc = strip_quotes(self.text(string));
        (!doc.is_empty()).then_some(doc)
    }

    // ----------------------------------------------- TypeScript / JavaScript

    fn script(&self, node: Node<'_>, outer: Node<'_>) -> Option<Declaration> {
        let decl = match node.kind() {
            "export_statement" => {
                let inner = node.child_by_field_name("declaration")?;
                let mut decl = self.script(inner, outer)?;
                let prefix = self
                    .text(node)
                    .get(..inner.start_byte() - node.start_byte())
                    .map_or("export", str::trim);
                decl.signature = format!("{prefix} {}", decl.signature);
                return Some(decl);
            }
            "function_declaration" | "generator_function_declaration" | "function_signature" => {
                self.with_body(node, DeclKind::Function, self.field_text(node, "name"))
            }
            "interface_declaration" | "type_alias_declaration" | "enum_declaration" => {
                self.whole(node, DeclKind::Type, self.field_text(node, "name"))
            }
            "class_declaration" | "abstract_class_declaration" => {
                let mut decl = self.with_body(node, DeclKind::Class, self.field_text(node, "name"));
                decl.members = self.members(node, |w, member| w.script_member(member));
                decl
            }
            _ => return None,
        };
        Some(Declaration {
            doc: self.preceding_doc(outer),
            ..decl
        })
    }

    fn script_member(&self, node: Node<'_>) -> Option<Declaration> {
        let mut decl = match node.kind() {
            "method_definition" | "abstract_method_signature" | "method_signature" => {
                self.with_body(node, DeclKind::Method, self.field_text(node, "name"))
            }
            "public_field_definition" | "field_definition" => self.script_field(node),
            _ => return None,
        };
        decl.doc = self.preceding_doc(node);
        Some(decl)
    }

    /// Class field up to its initializer; function values keep only their parameters
    fn script_field(&self, node: Node<'_>) -> Declaration {
        let name = self.field_text(node, "name");
        let Some(value) = node.child_by_field_name("value") else {
            return self.whole(node, DeclKind::Constant, name);
        };
        let head = self.signature_from(node, value);
        let head = head.trim_end_matches('=').trim_end();
        let signature = match value.kind() {
            "arrow_function" | "function_expression" | "function" => {
                match value.child_by_field_name("body") {
                    Some(body) => format!("{head} = {}", self.signature_from(value, body)),
                    None => head.to_string(),
                }
            }
            "number" | "string" | "true" | "false" | "null" | "undefined" => {
                format!("{head} = {}", collapse(self.text(value)))
            }
            _ => head.to_string(),
        };
        Declaration {
            kind: DeclKind::Constant,
            name,
            signature,
            doc: None,
            members: Vec::new(),
        }
    }

    // ------------------------------------------------------------------ Go

    fn go(&self, node: Node<'_>) -> Option<Declaration> {
        let decl = match node.kind() {
            "function_declaration" => {
                self.with_body(node, DeclKind::Function, self.field_text(node, "name"))
            }
            "method_declaration" => {
                self.with_body(node, DeclKind::Method, self.field_text(node, "name"))
            }
            "type_declaration" => {
                let name = {
                    let mut cursor = node.walk();
                    let spec = node
                        .named_children(&mut cursor)
                        .find(|c| c.kind() == "type_spec" || c.kind() == "type_alias");
                    spec.map(|s| self.field_text(s, "name")).unwrap_or_default()
                };
                self.whole(node, DeclKind::Type, name)
            }
            _ => return None,
        };
        Some(Declaration {
            doc: self.preceding_doc(node),
            ..decl
        })
    }

    // -------------------------------------------------------------- shared

    fn field_text(&self, node: Node<'_>, field: &str) -> String {
        node.child_by_field_name(field)
            .map(|n| self.text(n).to_string())
            .unwrap_or_default()
    }

    fn with_body(&self, node: Node<'_>, kind: DeclKind, name: String) -> Declaration {
        let signature = match node.child_by_field_name("body") {
            Some(body) => self.signature_from(node, body),
            None => collapse(self.text(node)),
        };
        Declaration {
            kind,
            name,
            signature,
            doc: None,
            members: Vec::new(),
        }
    }

    fn whole(&self, node: Node<'_>, kind: DeclKind, name: String) -> Declaration {
        Declaration {
            kind,
            name,
            signature: collapse(self.text(node)),
            doc: None,
            members: Vec::new(),
        }
    }

    /// Text of `node` from its start up to where `body` begins
    fn signature_from(&self, node: Node<'_>, body: Node<'_>) -> String {
        let text = self.text(node);
        let cut = body.start_byte().saturating_sub(node.start_byte()).min(text.len());
        let head = text.get(..cut).unwrap_or(text);
        collapse(head.trim_end().trim_end_matches('{'))
    }

    fn members(
        &self,
        node: Node<'_>,
        each: impl Fn(&Self, Node<'_>) -> Option<Declaration>,
    ) -> Vec<Declaration> {
        let Some(body) = node.child_by_field_name("body") else {
            return Vec::new();
        };
        let mut cursor = body.walk();
        body.named_children(&mut cursor)
            .filter_map(|member| each(self, member))
            .collect()
    }

    /// Contiguous comments (and, for Rust, attributes) right above `node`
    fn preceding_doc(&self, node: Node<'_>) -> Option<String> {
        let mut lines: Vec<String> = Vec::new();
        let mut expected_row = node.start_position().row;
        let mut current = node.prev_named_sibling();

        while let Some(prev) = current {
            if prev.end_position().row + 1 < expected_row {
                break;
            }
            match prev.kind() {
                "attribute_item" | "decorator" => {}
                "line_comment" | "block_comment" | "comment" => {
                    let text = self.text(prev);
                    if self.language == Language::Rust && !is_rust_doc(text) {
                        break;
                    }
                    let mut block = doc_lines(text);
                    block.append(&mut lines);
                    lines = block;
                }
                _ => break,
            }
            expected_row = prev.start_position().row;
            current = prev.prev_named_sibling();
        }

        let doc = lines.join("\n").trim().to_string();
        (!doc.is_empty()).then_some(doc)
    }
}

fn is_rust_doc(text: &str) -> bool {
    (text.starts_with("///") && !text.starts_with("////")) || text.starts_with("/**")
}

/// Comment text with markers removed, one entry per line
fn doc_lines(text: &str) -> Vec<String> {
    let text = text.trim();
    if let Some(inner) = text.strip_prefix("/*") {
        let inner = inner.trim_start_matches('*').trim_end_matches("*/");
        return inner
            .lines()
            .map(|line| line.trim().trim_start_matches('*').trim().to_string())
            .filter(|line| !line.is_empty())
            .collect();
    }
    text.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches('/')
                .trim_start_matches('!')
                .trim_start_matches('#')
                .trim()
                .to_string()
        })
        .collect()
}

fn strip_quotes(literal: &str) -> String {
    let body = literal.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    let stripped = ["\"\"\"", "'''", "\"", "'"]
        .iter()
        .find_map(|q| body.strip_prefix(q).and_then(|b| b.strip_suffix(q)))
        .unwrap_or(body);
    stripped
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Collapse runs of whitespace into single spaces
fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
