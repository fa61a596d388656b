//! Usage extractor: target script syntax tree → usage events.
//!
//! Receiver types are inferred locally and only from direct assignments of
//! an instantiation (`v = Cache(...)`). Any other rebinding clears the type,
//! and function bodies never see the types of enclosing scopes.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Instant;

use tree_sitter::Node;

use crate::helpers::{Deadline, child_by_field, dotted_expr, named_children, node_pos, node_text};
use crate::parse::ParsedSource;
use crate::{CallArgs, GraphError, Result, SourcePos, UsageEvent, UsageKind};

/// Names that resolve to Python builtins and never reach the graph.
const BUILTINS: &[&str] = &[
    "__import__", "abs", "all", "any", "ascii", "bin", "bool", "breakpoint", "bytearray",
    "bytes", "callable", "chr", "classmethod", "compile", "complex", "delattr", "dict", "dir",
    "divmod", "enumerate", "eval", "exec", "filter", "float", "format", "frozenset", "getattr",
    "globals", "hasattr", "hash", "help", "hex", "id", "input", "int", "isinstance",
    "issubclass", "iter", "len", "list", "locals", "map", "max", "memoryview", "min", "next",
    "object", "oct", "open", "ord", "pow", "print", "property", "range", "repr", "reversed",
    "round", "set", "setattr", "slice", "sorted", "staticmethod", "str", "sum", "super",
    "tuple", "type", "vars", "zip", "None", "True", "False", "NotImplemented", "Ellipsis",
    "BaseException", "Exception", "ArithmeticError", "AssertionError", "AttributeError",
    "EOFError", "FileExistsError", "FileNotFoundError", "ImportError", "IndexError",
    "KeyError", "KeyboardInterrupt", "LookupError", "ModuleNotFoundError", "NameError",
    "NotImplementedError", "OSError", "IOError", "OverflowError", "PermissionError",
    "RecursionError", "RuntimeError", "StopIteration", "StopAsyncIteration", "SyntaxError",
    "SystemExit", "TimeoutError", "TypeError", "UnicodeError", "ValueError",
    "ZeroDivisionError", "DeprecationWarning", "UserWarning", "Warning",
];

/// Expression kinds whose members belong to builtin types.
const LITERALS: &[&str] = &[
    "string",
    "concatenated_string",
    "integer",
    "float",
    "true",
    "false",
    "none",
    "ellipsis",
    "list",
    "dictionary",
    "set",
    "tuple",
    "list_comprehension",
    "dictionary_comprehension",
    "set_comprehension",
    "generator_expression",
];

const COMPREHENSIONS: &[&str] = &[
    "list_comprehension",
    "set_comprehension",
    "dictionary_comprehension",
    "generator_expression",
];

/// Extract every external usage from a target script, ordered by position.
pub fn extract_usages(
    parsed: &ParsedSource,
    path: &Path,
    deadline: Option<Instant>,
) -> Result<Vec<UsageEvent>> {
    let mut walker = UsageWalker {
        source: &parsed.source,
        deadline: Deadline::new(deadline),
        timed_out: false,
        aliases: HashMap::new(),
        local_defs: HashSet::new(),
        scopes: vec![HashMap::new()],
        events: Vec::new(),
    };
    collect_defined_names(parsed.root(), &parsed.source, &mut walker.local_defs);
    walker.visit(parsed.root());

    if walker.timed_out {
        return Err(GraphError::Timeout {
            path: path.display().to_string(),
        });
    }

    let mut events = walker.events;
    events.sort_by_key(|e| (e.line, e.column));
    Ok(events)
}

struct Receiver {
    text: String,
    inferred: Option<String>,
}

struct UsageWalker<'s> {
    source: &'s str,
    deadline: Deadline,
    timed_out: bool,
    /// Import alias → fully-qualified target.
    aliases: HashMap<String, String>,
    /// Classes and functions the script defines itself.
    local_defs: HashSet<String>,
    /// Variable → inferred class key, innermost scope last.
    scopes: Vec<HashMap<String, Option<String>>>,
    events: Vec<UsageEvent>,
}

impl UsageWalker<'_> {
    fn visit(&mut self, node: Node<'_>) {
        if self.timed_out {
            return;
        }
        if self.deadline.expired() {
            self.timed_out = true;
            return;
        }

        match node.kind() {
            "import_statement" | "import_from_statement" => self.visit_import(node),
            "future_import_statement" | "global_statement" | "nonlocal_statement" | "comment" => {}
            "function_definition" => self.visit_function(node),
            "class_definition" => self.visit_class(node),
            "lambda" => self.visit_lambda(node),
            "assignment" => self.visit_assignment(node),
            "augmented_assignment" => {
                if let Some(right) = child_by_field(node, "right") {
                    self.visit(right);
                }
                if let Some(left) = child_by_field(node, "left") {
                    if left.kind() == "identifier" {
                        self.bind(node_text(left, self.source), None);
                    } else {
                        self.visit(left);
                    }
                }
            }
            "named_expression" => {
                let value = child_by_field(node, "value");
                if let Some(value) = value {
                    self.visit(value);
                }
                let ty = value.and_then(|v| self.infer_type(v));
                if let Some(name) = child_by_field(node, "name") {
                    self.bind(node_text(name, self.source), ty);
                }
            }
            "for_statement" | "for_in_clause" => self.visit_for(node),
            "as_pattern" => {
                if let Some(value) = node.named_child(0) {
                    self.visit(value);
                }
                if let Some(alias) = child_by_field(node, "alias") {
                    self.bind_targets(alias);
                }
            }
            "delete_statement" => {
                for child in named_children(node) {
                    self.bind_targets(child);
                }
            }
            kind if COMPREHENSIONS.contains(&kind) => self.visit_comprehension(node),
            "call" => self.visit_call(node),
            "attribute" => self.member_usage(node, None),
            _ => {
                for child in named_children(node) {
                    self.visit(child);
                }
            }
        }
    }

    // ── Scopes ───────────────────────────────────────────────────

    fn bind(&mut self, name: &str, ty: Option<String>) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), ty);
        }
    }

    /// Bound as a variable in any enclosing scope.
    fn is_bound(&self, name: &str) -> bool {
        self.scopes.iter().any(|s| s.contains_key(name))
    }

    /// Inferred type of a variable, looked up in the innermost scope only.
    fn type_of(&self, name: &str) -> Option<String> {
        self.scopes.last()?.get(name).cloned().flatten()
    }

    /// Clear every name bound by an assignment target.
    fn bind_targets(&mut self, target: Node<'_>) {
        match target.kind() {
            "identifier" => self.bind(node_text(target, self.source), None),
            "pattern_list" | "tuple_pattern" | "list_pattern" | "tuple" | "list"
            | "expression_list" | "parenthesized_expression" | "list_splat_pattern"
            | "as_pattern_target" => {
                for child in named_children(target) {
                    self.bind_targets(child);
                }
            }
            // Stores into attributes still evaluate the object.
            "attribute" => {
                if let Some(object) = child_by_field(target, "object") {
                    self.visit(object);
                }
            }
            _ => self.visit(target),
        }
    }

    // ── Statements ───────────────────────────────────────────────

    fn visit_import(&mut self, node: Node<'_>) {
        if node.kind() == "import_statement" {
            for child in named_children(node) {
                match child.kind() {
                    "dotted_name" => {
                        let full = node_text(child, self.source).to_string();
                        let head = full.split('.').next().unwrap_or(&full).to_string();
                        self.aliases.insert(head.clone(), head);
                        self.push_import(full, node_pos(child));
                    }
                    "aliased_import" => {
                        let (Some(name), Some(alias)) =
                            (child_by_field(child, "name"), child_by_field(child, "alias"))
                        else {
                            continue;
                        };
                        let target = node_text(name, self.source).to_string();
                        self.aliases
                            .insert(node_text(alias, self.source).to_string(), target.clone());
                        self.push_import(target, node_pos(child));
                    }
                    _ => {}
                }
            }
            return;
        }

        let Some(module_node) = child_by_field(node, "module_name") else {
            return;
        };
        let base = node_text(module_node, self.source).to_string();

        let mut cursor = node.walk();
        let names: Vec<Node<'_>> = node.children_by_field_name("name", &mut cursor).collect();
        if names.is_empty() {
            // from m import *
            self.push_import(base, node_pos(module_node));
            return;
        }
        for name_node in names {
            let (imported, alias) = if name_node.kind() == "aliased_import" {
                let Some(name) = child_by_field(name_node, "name") else {
                    continue;
                };
                let alias = child_by_field(name_node, "alias")
                    .map(|a| node_text(a, self.source).to_string());
                (node_text(name, self.source).to_string(), alias)
            } else {
                (node_text(name_node, self.source).to_string(), None)
            };
            let target = format!("{base}.{imported}");
            self.aliases
                .insert(alias.unwrap_or_else(|| imported.clone()), target.clone());
            self.push_import(target, node_pos(name_node));
        }
    }

    fn visit_function(&mut self, node: Node<'_>) {
        let params = child_by_field(node, "parameters");
        if let Some(params) = params {
            // Defaults are evaluated in the enclosing scope.
            for param in named_children(params) {
                if let Some(value) = child_by_field(param, "value") {
                    self.visit(value);
                }
            }
        }
        if let Some(name) = child_by_field(node, "name") {
            self.bind(node_text(name, self.source), None);
        }

        self.scopes.push(HashMap::new());
        if let Some(params) = params {
            for name in param_names(params, self.source) {
                self.bind(&name, None);
            }
        }
        if let Some(body) = child_by_field(node, "body") {
            self.visit(body);
        }
        self.scopes.pop();
    }

    fn visit_class(&mut self, node: Node<'_>) {
        if let Some(bases) = child_by_field(node, "superclasses") {
            self.visit(bases);
        }
        if let Some(name) = child_by_field(node, "name") {
            self.bind(node_text(name, self.source), None);
        }
        self.scopes.push(HashMap::new());
        if let Some(body) = child_by_field(node, "body") {
            self.visit(body);
        }
        self.scopes.pop();
    }

    fn visit_lambda(&mut self, node: Node<'_>) {
        self.scopes.push(HashMap::new());
        if let Some(params) = child_by_field(node, "parameters") {
            for name in param_names(params, self.source) {
                self.bind(&name, None);
            }
        }
        if let Some(body) = child_by_field(node, "body") {
            self.visit(body);
        }
        self.scopes.pop();
    }

    fn visit_assignment(&mut self, node: Node<'_>) {
        // a = b = Cache() assigns every target the same value.
        let mut targets = Vec::new();
        let mut value = None;
        let mut current = node;
        loop {
            if let Some(left) = child_by_field(current, "left") {
                targets.push(left);
            }
            match child_by_field(current, "right") {
                Some(right) if right.kind() == "assignment" => current = right,
                right => {
                    value = right;
                    break;
                }
            }
        }

        if let Some(value) = value {
            self.visit(value);
        }
        let ty = value.and_then(|v| self.infer_type(v));
        for target in targets {
            if target.kind() == "identifier" {
                self.bind(node_text(target, self.source), ty.clone());
            } else {
                self.bind_targets(target);
            }
        }
    }

    fn visit_for(&mut self, node: Node<'_>) {
        let left = child_by_field(node, "left");
        let mut cursor = node.walk();
        let rights: Vec<Node<'_>> = node.children_by_field_name("right", &mut cursor).collect();
        for right in &rights {
            self.visit(*right);
        }
        if let Some(left) = left {
            self.bind_targets(left);
        }
        for child in named_children(node) {
            if Some(child) != left && !rights.contains(&child) {
                self.visit(child);
            }
        }
    }

    /// Comprehension variables live in their own scope. Clauses run before
    /// the element expression even though they follow it in the source.
    fn visit_comprehension(&mut self, node: Node<'_>) {
        self.scopes.push(HashMap::new());
        let children = named_children(node);
        let is_clause = |n: &Node<'_>| matches!(n.kind(), "for_in_clause" | "if_clause");
        for child in children.iter().filter(|c| is_clause(c)) {
            self.visit(*child);
        }
        for child in children.iter().filter(|c| !is_clause(c)) {
            self.visit(*child);
        }
        self.scopes.pop();
    }

    // ── Expressions ──────────────────────────────────────────────

    fn visit_call(&mut self, node: Node<'_>) {
        let arguments = child_by_field(node, "arguments");
        let args = arguments
            .map(|a| call_args(a, self.source))
            .unwrap_or_default();

        if let Some(function) = child_by_field(node, "function") {
            match function.kind() {
                "identifier" => {
                    let name = node_text(function, self.source);
                    if let Some(path) = self.resolve_name(name) {
                        let kind = call_kind(&path);
                        self.push(kind, path, None, Some(args), node_pos(function));
                    }
                }
                "attribute" => self.member_usage(function, Some(args)),
                _ => self.visit(function),
            }
        }
        if let Some(arguments) = arguments {
            self.visit(arguments);
        }
    }

    /// `obj.member` read or `obj.member(...)` call (when `args` is set).
    fn member_usage(&mut self, node: Node<'_>, args: Option<CallArgs>) {
        let (Some(object), Some(member)) =
            (child_by_field(node, "object"), child_by_field(node, "attribute"))
        else {
            return;
        };
        let member_name = node_text(member, self.source).to_string();

        // `mod.func()` / `pkg.Class.method()` through an import alias.
        if let Some(dotted) = dotted_expr(node, self.source) {
            let (head, rest) = dotted.split_once('.').unwrap_or((dotted.as_str(), ""));
            if self.local_defs.contains(head) {
                return;
            }
            if !self.is_bound(head) {
                if let Some(target) = self.aliases.get(head) {
                    let path = format!("{target}.{rest}");
                    let kind = match args {
                        Some(_) => call_kind(&path),
                        None => UsageKind::AttributeAccess,
                    };
                    self.push(kind, path, None, args, node_pos(node));
                    return;
                }
                if BUILTINS.contains(&head) {
                    return;
                }
            }
        }

        let kind = if args.is_some() {
            UsageKind::Call
        } else {
            UsageKind::AttributeAccess
        };
        let object_text = node_text(object, self.source).to_string();
        let receiver = match object.kind() {
            "identifier" => {
                if object_text == "self" || object_text == "cls" {
                    return;
                }
                Receiver {
                    inferred: self.type_of(&object_text),
                    text: object_text,
                }
            }
            k if LITERALS.contains(&k) => {
                self.visit(object);
                return;
            }
            "call" if is_super_call(object, self.source) => {
                self.visit(object);
                return;
            }
            "call" => {
                let inferred = self.infer_type(object);
                self.visit(object);
                Receiver {
                    text: object_text,
                    inferred,
                }
            }
            _ => {
                self.visit(object);
                Receiver {
                    text: object_text,
                    inferred: None,
                }
            }
        };
        self.push(kind, member_name, Some(receiver), args, node_pos(member));
    }

    /// Resolve a bare called name. `None` when it is script-local, a
    /// variable, or a builtin.
    fn resolve_name(&self, name: &str) -> Option<String> {
        if self.is_bound(name) {
            return None;
        }
        if let Some(target) = self.aliases.get(name) {
            return Some(target.clone());
        }
        if self.local_defs.contains(name) || BUILTINS.contains(&name) {
            return None;
        }
        Some(name.to_string())
    }

    /// Class key of an instantiation expression, if it is one.
    fn infer_type(&self, value: Node<'_>) -> Option<String> {
        let value = if value.kind() == "parenthesized_expression" {
            value.named_child(0)?
        } else {
            value
        };
        if value.kind() != "call" {
            return None;
        }
        let function = child_by_field(value, "function")?;
        let path = match function.kind() {
            "identifier" => self.resolve_name(node_text(function, self.source))?,
            "attribute" => {
                let dotted = dotted_expr(function, self.source)?;
                let (head, rest) = dotted.split_once('.')?;
                if self.is_bound(head) {
                    return None;
                }
                format!("{}.{rest}", self.aliases.get(head)?)
            }
            _ => return None,
        };
        (call_kind(&path) == UsageKind::Instantiate).then_some(path)
    }

    // ── Events ───────────────────────────────────────────────────

    fn push_import(&mut self, target: String, pos: SourcePos) {
        self.push(UsageKind::Import, target, None, None, pos);
    }

    fn push(
        &mut self,
        kind: UsageKind,
        symbol_path: String,
        receiver: Option<Receiver>,
        args: Option<CallArgs>,
        pos: SourcePos,
    ) {
        let (has_receiver, receiver_text, receiver_inferred_type) = match receiver {
            Some(r) => (true, Some(r.text), r.inferred),
            None => (false, None, None),
        };
        self.events.push(UsageEvent {
            kind,
            symbol_path,
            receiver_inferred_type,
            has_receiver,
            receiver_text,
            args,
            line: pos.line,
            column: pos.column,
        });
    }
}

/// Calls whose callee starts with an uppercase letter are instantiations.
fn call_kind(path: &str) -> UsageKind {
    let last = path.rsplit('.').next().unwrap_or(path);
    if last.chars().next().is_some_and(char::is_uppercase) {
        UsageKind::Instantiate
    } else {
        UsageKind::Call
    }
}

fn is_super_call(node: Node<'_>, source: &str) -> bool {
    child_by_field(node, "function")
        .is_some_and(|f| f.kind() == "identifier" && node_text(f, source) == "super")
}

fn call_args(arguments: Node<'_>, source: &str) -> CallArgs {
    let mut args = CallArgs::default();
    if arguments.kind() == "generator_expression" {
        args.positional = 1;
        return args;
    }
    for child in named_children(arguments) {
        match child.kind() {
            "keyword_argument" => {
                if let Some(name) = child_by_field(child, "name") {
                    args.keywords.push(node_text(name, source).to_string());
                }
            }
            "list_splat" => args.star_args = true,
            "dictionary_splat" => args.star_kwargs = true,
            "comment" => {}
            _ => args.positional += 1,
        }
    }
    args
}

/// Names bound by a `parameters` / `lambda_parameters` node.
fn param_names(params: Node<'_>, source: &str) -> Vec<String> {
    let mut out = Vec::new();
    for child in named_children(params) {
        let name_node = match child.kind() {
            "identifier" => Some(child),
            "default_parameter" | "typed_default_parameter" => child_by_field(child, "name"),
            "typed_parameter" => child.named_child(0).and_then(|n| match n.kind() {
                "identifier" => Some(n),
                _ => n.named_child(0),
            }),
            "list_splat_pattern" | "dictionary_splat_pattern" => child.named_child(0),
            _ => None,
        };
        if let Some(n) = name_node {
            out.push(node_text(n, source).to_string());
        }
    }
    out
}

/// Every class and function name the script defines, at any depth.
fn collect_defined_names(node: Node<'_>, source: &str, out: &mut HashSet<String>) {
    if matches!(node.kind(), "class_definition" | "function_definition") {
        if let Some(name) = child_by_field(node, "name") {
            out.insert(node_text(name, source).to_string());
        }
    }
    for child in named_children(node) {
        collect_defined_names(child, source, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_python;

    fn usages(source: &str) -> Vec<UsageEvent> {
        let parsed = parse_python(source, Path::new("script.py")).unwrap();
        extract_usages(&parsed, Path::new("script.py"), None).unwrap()
    }

    fn summary(events: &[UsageEvent]) -> Vec<(UsageKind, String, Option<String>)> {
        events
            .iter()
            .map(|e| {
                (
                    e.kind,
                    e.display_symbol(),
                    e.receiver_inferred_type.clone(),
                )
            })
            .collect()
    }

    #[test]
    fn cache_script_events() {
        let source = r#"from cachelib.cache import Cache

c = Cache(10)
c.get("k")
c.put("k", 1)
"#;
        let events = usages(source);
        let typed = Some("cachelib.cache.Cache".to_string());
        assert_eq!(
            summary(&events),
            vec![
                (UsageKind::Import, "cachelib.cache.Cache".to_string(), None),
                (UsageKind::Instantiate, "cachelib.cache.Cache".to_string(), None),
                (UsageKind::Call, "c.get".to_string(), typed.clone()),
                (UsageKind::Call, "c.put".to_string(), typed),
            ]
        );
        let put = &events[3];
        assert_eq!((put.line, put.column), (5, 3));
        assert_eq!(put.symbol_path, "put");
        assert_eq!(put.args.as_ref().unwrap().positional, 2);
    }

    #[test]
    fn argument_shapes() {
        let source = r"import pkg.mod as m
m.helper(1, 2, *rest, key=3, other=4, **extra)
";
        let events = usages(source);
        let call = &events[1];
        assert_eq!(call.kind, UsageKind::Call);
        assert_eq!(call.symbol_path, "pkg.mod.helper");
        assert!(!call.has_receiver);
        let args = call.args.as_ref().unwrap();
        assert_eq!(args.positional, 2);
        assert_eq!(args.keywords, vec!["key", "other"]);
        assert!(args.star_args);
        assert!(args.star_kwargs);
    }

    #[test]
    fn rebinding_clears_type() {
        let source = r"from lib import Cache, load
a = Cache()
a = load()
a.get()
b = Cache()
for b in items:
    b.get()
c = Cache()
with open('f') as c:
    c.get()
d = Cache()
d += 1
d.get()
e, f = Cache(), Cache()
e.get()
";
        let events = usages(source);
        let receiver_calls: Vec<_> = events
            .iter()
            .filter(|e| e.has_receiver)
            .map(|e| (e.display_symbol(), e.receiver_inferred_type.clone()))
            .collect();
        assert_eq!(
            receiver_calls,
            vec![
                ("a.get".to_string(), None),
                ("b.get".to_string(), None),
                ("c.get".to_string(), None),
                ("d.get".to_string(), None),
                ("e.get".to_string(), None),
            ]
        );
    }

    #[test]
    fn function_scopes_do_not_inherit_types() {
        let source = r"from lib import Cache
c = Cache()
def work(c):
    c.get()
def other():
    c.get()
    local = Cache()
    local.get()
";
        let events = usages(source);
        let receiver_types: Vec<_> = events
            .iter()
            .filter(|e| e.has_receiver)
            .map(|e| e.receiver_inferred_type.clone())
            .collect();
        assert_eq!(
            receiver_types,
            vec![None, None, Some("lib.Cache".to_string())]
        );
    }

    #[test]
    fn skips_local_builtin_literal_and_self_usages() {
        let source = r#"class Helper:
    def run(self):
        self.value = 1
        self.go()
        return cls_name

def build():
    return Helper()

build()
Helper.run(None)
print(len("abc"))
", ".join(["a"])
str.lower("X")
"#;
        let events = usages(source);
        assert!(events.is_empty(), "unexpected events: {events:?}");
    }

    #[test]
    fn inline_instantiation_types_receiver() {
        let source = "from lib import Cache\nCache(size=2).get('k')\n";
        let events = usages(source);
        assert_eq!(
            summary(&events),
            vec![
                (UsageKind::Import, "lib.Cache".to_string(), None),
                (UsageKind::Instantiate, "lib.Cache".to_string(), None),
                (
                    UsageKind::Call,
                    "Cache(size=2).get".to_string(),
                    Some("lib.Cache".to_string())
                ),
            ]
        );
    }

    #[test]
    fn attribute_reads_and_unknown_receivers() {
        let source = r"import config
from lib import Widget
w = Widget()
print(w.width, config.DEBUG)
unknown.method()
";
        let events = usages(source);
        assert_eq!(
            summary(&events),
            vec![
                (UsageKind::Import, "config".to_string(), None),
                (UsageKind::Import, "lib.Widget".to_string(), None),
                (UsageKind::Instantiate, "lib.Widget".to_string(), None),
                (
                    UsageKind::AttributeAccess,
                    "w.width".to_string(),
                    Some("lib.Widget".to_string())
                ),
                (UsageKind::AttributeAccess, "config.DEBUG".to_string(), None),
                (UsageKind::Call, "unknown.method".to_string(), None),
            ]
        );
    }

    #[test]
    fn comprehension_variables_shadow_outer_types() {
        let source = "from lib import Cache\nc = Cache()\nvalues = [c.put(1) for c in caches]\n";
        let events = usages(source);
        let put = events.iter().find(|e| e.symbol_path == "put").unwrap();
        assert_eq!(put.receiver_inferred_type, None);
    }

    #[test]
    fn events_sorted_by_position() {
        let source = "from lib import A, B\nb = B(A())\n";
        let events = usages(source);
        let positions: Vec<(usize, usize)> = events.iter().map(|e| (e.line, e.column)).collect();
        let mut sorted = positions.clone();
        sorted.sort_unstable();
        assert_eq!(positions, sorted);
        assert_eq!(events.last().unwrap().symbol_path, "lib.A");
    }

    #[test]
    fn expired_deadline_times_out() {
        let parsed = parse_python("x = 1\n", Path::new("s.py")).unwrap();
        let err = extract_usages(&parsed, Path::new("s.py"), Some(Instant::now())).unwrap_err();
        assert!(matches!(err, GraphError::Timeout { .. }));
    }
}
