use std::path::Path;

use forge_interface::{summarize, DeclKind};

#[test]
fn test_rust_signatures_without_bodies() {
    let source = r#"
use std::fmt;

/// Adds two numbers.
pub fn add(a: i32, b: i32) -> i32 {
    a + b
}

pub struct Point {
    pub x: i32,
}

impl Point {
    /// Origin point.
    pub fn origin() -> Self {
        Point { x: 0 }
    }
}
"#;
    let summary = summarize(Path::new("src/math.rs"), source);
    assert!(!summary.is_fallback(), "{:?}", summary.fallback_reason);

    let rendered = summary.render();
    assert!(rendered.contains("/// Adds two numbers."));
    assert!(rendered.contains("pub fn add(a: i32, b: i32) -> i32"));
    assert!(rendered.contains("pub struct Point { pub x: i32, }"));
    assert!(rendered.contains("impl Point"));
    assert!(rendered.contains("    /// Origin point."));
    assert!(rendered.contains("    pub fn origin() -> Self"));
    assert!(!rendered.contains("a + b"));
    assert!(!rendered.contains("Point { x: 0 }"));
    assert!(!rendered.contains("use std::fmt"));

    let kinds: Vec<DeclKind> = summary.declarations.iter().map(|d| d.kind).collect();
    assert_eq!(kinds, vec![DeclKind::Function, DeclKind::Type, DeclKind::Impl]);
    assert_eq!(summary.declarations[2].name, "Point");
    assert_eq!(summary.declarations[2].members[0].kind, DeclKind::Method);
}

#[test]
fn test_python_docstrings_and_methods() {
    let source = r#"import math

def area(r: float) -> float:
    """Area of a circle."""
    return math.pi * r * r

class Stack:
    """LIFO container."""

    def push(self, item):
        self.items.append(item)
"#;
    let summary = summarize(Path::new("shapes.py"), source);
    assert!(!summary.is_fallback());

    let rendered = summary.render();
    assert!(rendered.contains("# Area of a circle."));
    assert!(rendered.contains("def area(r: float) -> float:"));
    assert!(rendered.contains("# LIFO container."));
    assert!(rendered.contains("class Stack:"));
    assert!(rendered.contains("    def push(self, item):"));
    assert!(!rendered.contains("math.pi"));
    assert!(!rendered.contains("append"));
}

#[test]
fn test_python_decorators_kept_in_signature() {
    let source = "@cache\ndef fib(n):\n    return n if n < 2 else fib(n - 1) + fib(n - 2)\n";
    let summary = summarize(Path::new("fib.py"), source);
    let rendered = summary.render();
    assert!(rendered.contains("@cache def fib(n):"));
    assert!(!rendered.contains("return"));
}

#[test]
fn test_typescript_exports() {
    let source = r#"/** Greets someone. */
export function greet(name: string): string {
  return `hi ${name}`;
}

export interface User {
  id: number;
}
"#;
    let summary = summarize(Path::new("greet.ts"), source);
    assert!(!summary.is_fallback(), "{:?}", summary.fallback_reason);
    let rendered = summary.render();
    assert!(rendered.contains("// Greets someone."));
    assert!(rendered.contains("export function greet(name: string): string"));
    assert!(rendered.contains("export interface User { id: number; }"));
    assert!(!rendered.contains("return"));
}

#[test]
fn test_class_fields_drop_initializer_bodies() {
    let source = r#"export class Button {
  label: string = "ok";
  private cache = new Map<string, number>([["seed", 42]]);
  /** Click handler. */
  handler = (event: MouseEvent): void => {
    const secret = computeSecret(event);
    this.fire(secret);
  };
}
"#;
    let summary = summarize(Path::new("button.ts"), source);
    assert!(!summary.is_fallback(), "{:?}", summary.fallback_reason);
    let rendered = summary.render();
    assert!(rendered.contains("label: string = \"ok\""), "{rendered}");
    assert!(rendered.contains("private cache"), "{rendered}");
    assert!(rendered.contains("handler = (event: MouseEvent): void =>"), "{rendered}");
    assert!(rendered.contains("Click handler."), "{rendered}");
    assert!(!rendered.contains("computeSecret"), "{rendered}");
    assert!(!rendered.contains("this.fire"), "{rendered}");
    assert!(!rendered.contains("seed"), "{rendered}");
}

#[test]
fn test_go_functions() {
    let source = "package main\n\n// Sum adds.\nfunc Sum(a, b int) int {\n\treturn a + b\n}\n";
    let summary = summarize(Path::new("sum.go"), source);
    let rendered = summary.render();
    assert!(rendered.contains("// Sum adds."));
    assert!(rendered.contains("func Sum(a, b int) int"));
    assert!(!rendered.contains("return"));
}

#[test]
fn test_syntax_error_falls_back_to_source() {
    let source = "def broken(:\n    pass\n";
    let summary = summarize(Path::new("broken.py"), source);
    assert!(summary.is_fallback());
    assert_eq!(summary.render(), source);
}

#[test]
fn test_unknown_language_falls_back() {
    let summary = summarize(Path::new("notes.txt"), "just words");
    assert!(summary.is_fallback());
    assert_eq!(summary.render(), "just words");
}

#[test]
fn test_no_declarations_falls_back() {
    let summary = summarize(Path::new("config.py"), "x = 1\n");
    assert!(summary.is_fallback());
    assert_eq!(summary.render(), "x = 1\n");
}
