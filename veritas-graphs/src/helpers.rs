use std::time::Instant;

use tree_sitter::Node;

use crate::SourcePos;

/// Extract the source text for a tree-sitter node.
pub fn node_text<'a>(node: Node<'_>, source: &'a str) -> &'a str {
    &source[node.byte_range()]
}

/// Find the first child with a specific kind.
pub fn find_child_by_kind<'a>(node: Node<'a>, kind: &str) -> Option<Node<'a>> {
    let mut cursor = node.walk();
    node.children(&mut cursor)
        .find(|child| child.kind() == kind)
}

/// Find a child by field name.
pub fn child_by_field<'a>(node: Node<'a>, field: &str) -> Option<Node<'a>> {
    node.child_by_field_name(field)
}

/// Named children of a node, collected so callers can recurse freely.
pub fn named_children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

/// Build a dotted name from a prefix and a trailing segment.
pub fn dotted_name(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

/// 1-based start position of a node.
pub fn node_pos(node: Node<'_>) -> SourcePos {
    node.start_position().into()
}

/// Text of an `identifier` or `attribute` chain made only of identifiers
/// (`a.b.c`). Anything else (calls, subscripts, literals) yields `None`.
pub fn dotted_expr(node: Node<'_>, source: &str) -> Option<String> {
    match node.kind() {
        "identifier" => Some(node_text(node, source).to_string()),
        "attribute" => {
            let object = child_by_field(node, "object")?;
            let attr = child_by_field(node, "attribute")?;
            let prefix = dotted_expr(object, source)?;
            Some(format!("{prefix}.{}", node_text(attr, source)))
        }
        _ => None,
    }
}

/// Name of a decorator with call arguments and the leading `@` stripped
/// (`@functools.lru_cache(maxsize=2)` → `functools.lru_cache`).
pub fn decorator_name(decorator: Node<'_>, source: &str) -> Option<String> {
    let expr = decorator.named_child(0)?;
    let target = if expr.kind() == "call" {
        child_by_field(expr, "function")?
    } else {
        expr
    };
    dotted_expr(target, source)
}

/// Deadline for a single extraction pass.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub fn new(at: Option<Instant>) -> Self {
        Self { at }
    }

    pub fn expired(self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }
}
