//! Source parser: Python text → tree-sitter syntax tree.
//!
//! Tree-sitter recovers from syntax errors by inserting `ERROR`/`MISSING`
//! nodes. A tree carrying any of them is rejected as a parse failure so that
//! a half-understood file never replaces a good snapshot in the store.

use std::path::Path;

use tracing::debug;
use tree_sitter::{Node, Parser, Tree};

use crate::{GraphError, Result, SourcePos};

/// File extensions handled by the parser.
pub const PYTHON_EXTENSIONS: &[&str] = &["py", "pyi"];

/// A successfully parsed source unit.
#[derive(Debug)]
pub struct ParsedSource {
    pub source: String,
    pub tree: Tree,
}

impl ParsedSource {
    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }
}

pub fn is_python_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| PYTHON_EXTENSIONS.contains(&ext))
}

/// Parse Python source. `path` is only used for error messages.
pub fn parse_python(source: &str, path: &Path) -> Result<ParsedSource> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| GraphError::TreeSitter(format!("Failed to set language: {e}")))?;

    let tree = parser.parse(source, None).ok_or_else(|| GraphError::Parse {
        path: path.display().to_string(),
        line: 0,
        column: 0,
        message: "tree-sitter parse returned None".to_string(),
    })?;

    let root = tree.root_node();
    if root.has_error() {
        let (pos, message) = first_error(root, source).unwrap_or((
            SourcePos { line: 1, column: 1 },
            "syntax error".to_string(),
        ));
        debug!(path = %path.display(), line = pos.line, column = pos.column, %message, "Syntax error");
        return Err(GraphError::Parse {
            path: path.display().to_string(),
            line: pos.line,
            column: pos.column,
            message,
        });
    }

    Ok(ParsedSource {
        source: source.to_string(),
        tree,
    })
}

/// Locate the first `ERROR` or `MISSING` node in document order.
fn first_error(node: Node<'_>, source: &str) -> Option<(SourcePos, String)> {
    if node.is_missing() {
        return Some((
            node.start_position().into(),
            format!("missing `{}`", node.kind()),
        ));
    }
    if node.is_error() {
        let snippet: String = source[node.byte_range()].chars().take(40).collect();
        return Some((
            node.start_position().into(),
            format!("unexpected `{}`", snippet.trim()),
        ));
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(found) = first_error(child, source) {
            return Some(found);
        }
    }
    None
}
