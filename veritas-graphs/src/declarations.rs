//! Declaration extractor: syntax tree → class, method, function, attribute
//! and import records for one file.
//!
//! Only module-level definitions (including those nested in `if`/`try`/`with`
//! blocks) and classes nested in classes are recorded. Functions defined
//! inside functions are local and never reach the graph.

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path};
use std::time::Instant;

use tree_sitter::Node;

use crate::helpers::{
    Deadline, child_by_field, decorator_name, dotted_expr, dotted_name, find_child_by_kind,
    named_children, node_pos, node_text,
};
use crate::parse::ParsedSource;
use crate::{
    AttributeDecl, AttributeKind, ClassDecl, FileDeclarations, FunctionDecl, GraphError,
    ImportDecl, MethodDecl, Param, ParamKind, Result,
};

/// Statements that open a block without opening a scope.
const CONTROL_FLOW: &[&str] = &[
    "block",
    "if_statement",
    "elif_clause",
    "else_clause",
    "try_statement",
    "except_clause",
    "except_group_clause",
    "finally_clause",
    "with_statement",
    "for_statement",
    "while_statement",
];

/// Compute the dotted module path of a file from its repository-relative path.
///
/// Returns the module path and whether the file is a package `__init__`.
/// A leading directory listed in `source_roots` (e.g. `src`) is stripped.
pub fn module_path_for(relative: &Path, source_roots: &[String]) -> (String, bool) {
    let mut parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    let mut is_package = false;
    if let Some(last) = parts.pop() {
        let stem = Path::new(&last)
            .file_stem()
            .map_or_else(|| last.clone(), |s| s.to_string_lossy().into_owned());
        if stem == "__init__" {
            is_package = true;
        } else {
            parts.push(stem);
        }
    }

    for root in source_roots {
        let root_parts: Vec<&str> = root.split('/').filter(|s| !s.is_empty()).collect();
        if !root_parts.is_empty()
            && parts.len() > root_parts.len()
            && parts.iter().zip(&root_parts).all(|(a, b)| a == b)
        {
            parts.drain(..root_parts.len());
            break;
        }
    }

    (parts.join("."), is_package)
}

/// Extract every declaration record from a parsed file.
///
/// `path` is only used in error messages. When `deadline` passes mid-walk the
/// extraction is abandoned with [`GraphError::Timeout`].
pub fn extract_declarations(
    parsed: &ParsedSource,
    path: &Path,
    module_path: &str,
    is_package: bool,
    deadline: Option<Instant>,
) -> Result<FileDeclarations> {
    let mut walker = DeclarationWalker {
        source: &parsed.source,
        path,
        module_path,
        is_package,
        deadline: Deadline::new(deadline),
        aliases: HashMap::new(),
        local_classes: HashSet::new(),
        out: FileDeclarations {
            module_path: module_path.to_string(),
            ..FileDeclarations::default()
        },
    };

    let mut statements = Vec::new();
    flatten_statements(parsed.root(), &mut statements);

    for stmt in &statements {
        match stmt.kind() {
            "import_statement" | "import_from_statement" => walker.collect_import(*stmt),
            "class_definition" => walker.note_local_class(*stmt),
            "decorated_definition" => {
                if let Some(def) = child_by_field(*stmt, "definition") {
                    if def.kind() == "class_definition" {
                        walker.note_local_class(def);
                    }
                }
            }
            _ => {}
        }
    }

    for stmt in statements {
        walker.check_deadline()?;
        match stmt.kind() {
            "class_definition" => walker.visit_class(stmt, "")?,
            "function_definition" => walker.visit_function(stmt),
            "decorated_definition" => {
                if let Some(def) = child_by_field(stmt, "definition") {
                    match def.kind() {
                        "class_definition" => walker.visit_class(def, "")?,
                        "function_definition" => walker.visit_function(def),
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    Ok(walker.out)
}

struct DeclarationWalker<'s> {
    source: &'s str,
    path: &'s Path,
    module_path: &'s str,
    is_package: bool,
    deadline: Deadline,
    /// Local name → fully-qualified target.
    aliases: HashMap<String, String>,
    /// Module-level class names defined in this file.
    local_classes: HashSet<String>,
    out: FileDeclarations,
}

impl DeclarationWalker<'_> {
    fn check_deadline(&self) -> Result<()> {
        if self.deadline.expired() {
            return Err(GraphError::Timeout {
                path: self.path.display().to_string(),
            });
        }
        Ok(())
    }

    fn note_local_class(&mut self, node: Node<'_>) {
        if let Some(name) = child_by_field(node, "name") {
            self.local_classes
                .insert(node_text(name, self.source).to_string());
        }
    }

    // ── Imports ──────────────────────────────────────────────────

    fn collect_import(&mut self, node: Node<'_>) {
        let line = node_pos(node).line;
        if node.kind() == "import_statement" {
            for child in named_children(node) {
                match child.kind() {
                    // `import a.b` binds `a`
                    "dotted_name" => {
                        let full = node_text(child, self.source);
                        let head = full.split('.').next().unwrap_or(full).to_string();
                        self.push_import(Some(head.clone()), head, line);
                    }
                    "aliased_import" => {
                        let (Some(name), Some(alias)) =
                            (child_by_field(child, "name"), child_by_field(child, "alias"))
                        else {
                            continue;
                        };
                        self.push_import(
                            Some(node_text(alias, self.source).to_string()),
                            node_text(name, self.source).to_string(),
                            line,
                        );
                    }
                    _ => {}
                }
            }
            return;
        }

        let Some(module_node) = child_by_field(node, "module_name") else {
            return;
        };
        let base = if module_node.kind() == "relative_import" {
            self.resolve_relative(module_node)
        } else {
            node_text(module_node, self.source).to_string()
        };

        if find_child_by_kind(node, "wildcard_import").is_some() {
            self.push_import(None, base, line);
            return;
        }

        let mut cursor = node.walk();
        let names: Vec<Node<'_>> = node.children_by_field_name("name", &mut cursor).collect();
        for name_node in names {
            let (imported, alias) = match name_node.kind() {
                "aliased_import" => {
                    let Some(name) = child_by_field(name_node, "name") else {
                        continue;
                    };
                    let alias = child_by_field(name_node, "alias")
                        .map(|a| node_text(a, self.source).to_string());
                    (node_text(name, self.source).to_string(), alias)
                }
                _ => (node_text(name_node, self.source).to_string(), None),
            };
            let alias = alias.unwrap_or_else(|| imported.clone());
            self.push_import(Some(alias), dotted_name(&base, &imported), line);
        }
    }

    fn push_import(&mut self, alias: Option<String>, target: String, line: usize) {
        if let Some(alias) = &alias {
            self.aliases.insert(alias.clone(), target.clone());
        }
        self.out.imports.push(ImportDecl {
            alias,
            target,
            line,
        });
    }

    /// Resolve `from ..pkg import x` style module names against this file's package.
    fn resolve_relative(&self, node: Node<'_>) -> String {
        let level = find_child_by_kind(node, "import_prefix")
            .map_or(1, |p| node_text(p, self.source).chars().filter(|c| *c == '.').count());
        let suffix = find_child_by_kind(node, "dotted_name").map(|n| node_text(n, self.source));
        resolve_relative_module(self.module_path, self.is_package, level, suffix)
    }

    /// Map a dotted name used in this file to its candidate key.
    fn resolve_dotted(&self, dotted: &str) -> String {
        let (head, rest) = match dotted.split_once('.') {
            Some((h, r)) => (h, Some(r)),
            None => (dotted, None),
        };
        if let Some(target) = self.aliases.get(head) {
            return match rest {
                Some(r) => format!("{target}.{r}"),
                None => target.clone(),
            };
        }
        if self.local_classes.contains(head) {
            return dotted_name(self.module_path, dotted);
        }
        dotted.to_string()
    }

    // ── Classes ──────────────────────────────────────────────────

    fn visit_class(&mut self, node: Node<'_>, outer: &str) -> Result<()> {
        let Some(name_node) = child_by_field(node, "name") else {
            return Ok(());
        };
        let name = node_text(name_node, self.source).to_string();
        let local_name = dotted_name(outer, &name);
        let qualified_name = dotted_name(self.module_path, &local_name);

        let (bases, mut is_abstract) = match child_by_field(node, "superclasses") {
            Some(args) => self.class_bases(args),
            None => (Vec::new(), false),
        };

        let mut methods: Vec<MethodDecl> = Vec::new();
        let mut attributes: Vec<AttributeDecl> = Vec::new();
        let mut method_bodies: Vec<(Node<'_>, String)> = Vec::new();
        let mut nested: Vec<Node<'_>> = Vec::new();

        let mut body = Vec::new();
        if let Some(block) = child_by_field(node, "body") {
            flatten_statements(block, &mut body);
        }

        for stmt in body {
            self.check_deadline()?;
            match stmt.kind() {
                "function_definition" => {
                    if let Some((method, receiver)) = self.method_decl(stmt, &[]) {
                        if let Some(receiver) = receiver {
                            method_bodies.push((stmt, receiver));
                        }
                        merge_method(&mut methods, method);
                    }
                }
                "decorated_definition" => {
                    let decorators = decorator_names(stmt, self.source);
                    let Some(def) = child_by_field(stmt, "definition") else {
                        continue;
                    };
                    match def.kind() {
                        "function_definition" => {
                            if let Some((method, receiver)) = self.method_decl(def, &decorators) {
                                if let Some(receiver) = receiver {
                                    method_bodies.push((def, receiver));
                                }
                                merge_method(&mut methods, method);
                            }
                        }
                        "class_definition" => nested.push(def),
                        _ => {}
                    }
                }
                "class_definition" => nested.push(stmt),
                "expression_statement" => {
                    for child in named_children(stmt) {
                        self.class_body_attributes(child, &mut attributes);
                    }
                }
                _ => {}
            }
        }

        for (def, receiver) in method_bodies {
            self.check_deadline()?;
            if let Some(body) = child_by_field(def, "body") {
                self.instance_attributes(body, &receiver, &mut attributes);
            }
        }

        let method_names: HashSet<&str> = methods.iter().map(|m| m.name.as_str()).collect();
        let mut seen = HashSet::new();
        attributes.retain(|a| !method_names.contains(a.name.as_str()) && seen.insert(a.name.clone()));

        is_abstract |= methods.iter().any(|m| m.is_abstract);

        let decl = ClassDecl {
            name: local_name.clone(),
            qualified_name,
            bases,
            is_abstract,
            methods,
            attributes,
            line: node_pos(node).line,
        };
        match self
            .out
            .classes
            .iter_mut()
            .find(|c| c.qualified_name == decl.qualified_name)
        {
            Some(existing) => *existing = decl,
            None => self.out.classes.push(decl),
        }

        for inner in nested {
            self.visit_class(inner, &local_name)?;
        }
        Ok(())
    }

    /// Resolve the superclass list. Returns base keys and whether the class
    /// is declared abstract through `ABC` or `metaclass=ABCMeta`.
    fn class_bases(&self, args: Node<'_>) -> (Vec<String>, bool) {
        let mut bases = Vec::new();
        let mut is_abstract = false;
        for arg in named_children(args) {
            match arg.kind() {
                "keyword_argument" => {
                    let is_metaclass = child_by_field(arg, "name")
                        .is_some_and(|n| node_text(n, self.source) == "metaclass");
                    let value = child_by_field(arg, "value")
                        .and_then(|v| dotted_expr(v, self.source))
                        .map(|v| self.resolve_dotted(&v));
                    if is_metaclass && value.is_some_and(|v| last_segment(&v) == "ABCMeta") {
                        is_abstract = true;
                    }
                }
                "list_splat" | "dictionary_splat" | "comment" => {}
                _ => {
                    let Some(base) = self.base_key(arg) else {
                        continue;
                    };
                    if base == "abc.ABC" || base == "ABC" {
                        is_abstract = true;
                    }
                    bases.push(base);
                }
            }
        }
        (bases, is_abstract)
    }

    fn base_key(&self, expr: Node<'_>) -> Option<String> {
        let expr = if expr.kind() == "subscript" {
            child_by_field(expr, "value")?
        } else {
            expr
        };
        match dotted_expr(expr, self.source) {
            Some(dotted) if dotted == "object" => None,
            Some(dotted) => Some(self.resolve_dotted(&dotted)),
            // Dynamic base (call, attribute of a call, ...): keep the literal.
            None => Some(node_text(expr, self.source).to_string()),
        }
    }

    /// Build a method record. The second element is the receiver parameter
    /// name, `None` for static methods.
    fn method_decl(
        &self,
        node: Node<'_>,
        decorators: &[String],
    ) -> Option<(MethodDecl, Option<String>)> {
        let name = node_text(child_by_field(node, "name")?, self.source).to_string();
        let mut params = child_by_field(node, "parameters")
            .map(|p| extract_params(p, self.source))
            .unwrap_or_default();

        let has = |wanted: &[&str]| {
            decorators
                .iter()
                .any(|d| wanted.contains(&last_segment(d)))
        };
        let is_static = has(&["staticmethod"]);
        let is_class_method = has(&["classmethod"]);
        let is_property = has(&["property", "cached_property", "setter", "getter", "deleter"]);
        let is_abstract = has(&[
            "abstractmethod",
            "abstractproperty",
            "abstractclassmethod",
            "abstractstaticmethod",
        ]);

        let receiver = if !is_static
            && params
                .first()
                .is_some_and(Param::is_positional)
        {
            Some(params.remove(0).name)
        } else {
            None
        };

        Some((
            MethodDecl {
                name,
                params,
                is_static,
                is_class_method,
                is_property,
                is_abstract,
                line: node_pos(node).line,
            },
            receiver.filter(|_| !is_class_method),
        ))
    }

    /// `name = …`, `name: T = …` and `name: T` directly in a class body.
    fn class_body_attributes(&self, node: Node<'_>, out: &mut Vec<AttributeDecl>) {
        if node.kind() != "assignment" {
            return;
        }
        if let Some(left) = child_by_field(node, "left") {
            let mut names = Vec::new();
            collect_identifiers(left, self.source, &mut names);
            for (name, line) in names {
                out.push(AttributeDecl {
                    name,
                    kind: AttributeKind::Class,
                    line,
                });
            }
        }
        // a = b = 1
        if let Some(right) = child_by_field(node, "right") {
            self.class_body_attributes(right, out);
        }
    }

    /// Every `<receiver>.<name> = …` anywhere inside a method body.
    fn instance_attributes(&self, node: Node<'_>, receiver: &str, out: &mut Vec<AttributeDecl>) {
        if matches!(node.kind(), "assignment" | "augmented_assignment") {
            if let Some(left) = child_by_field(node, "left") {
                self.receiver_targets(left, receiver, out);
            }
        }
        for child in named_children(node) {
            self.instance_attributes(child, receiver, out);
        }
    }

    fn receiver_targets(&self, target: Node<'_>, receiver: &str, out: &mut Vec<AttributeDecl>) {
        match target.kind() {
            "attribute" => {
                let (Some(object), Some(attr)) =
                    (child_by_field(target, "object"), child_by_field(target, "attribute"))
                else {
                    return;
                };
                if object.kind() == "identifier" && node_text(object, self.source) == receiver {
                    out.push(AttributeDecl {
                        name: node_text(attr, self.source).to_string(),
                        kind: AttributeKind::Instance,
                        line: node_pos(target).line,
                    });
                }
            }
            "pattern_list" | "tuple_pattern" | "list_pattern" | "tuple" | "list"
            | "parenthesized_expression" | "list_splat_pattern" => {
                for child in named_children(target) {
                    self.receiver_targets(child, receiver, out);
                }
            }
            _ => {}
        }
    }

    // ── Functions ────────────────────────────────────────────────

    fn visit_function(&mut self, node: Node<'_>) {
        let Some(name_node) = child_by_field(node, "name") else {
            return;
        };
        let name = node_text(name_node, self.source).to_string();
        let params = child_by_field(node, "parameters")
            .map(|p| extract_params(p, self.source))
            .unwrap_or_default();
        let decl = FunctionDecl {
            qualified_name: dotted_name(self.module_path, &name),
            name,
            params,
            line: node_pos(node).line,
        };
        // Later definitions shadow earlier ones.
        match self.out.functions.iter_mut().find(|f| f.name == decl.name) {
            Some(existing) => *existing = decl,
            None => self.out.functions.push(decl),
        }
    }
}

/// Collect statements reachable from `node` without entering a new scope.
fn flatten_statements<'t>(node: Node<'t>, out: &mut Vec<Node<'t>>) {
    for child in named_children(node) {
        if CONTROL_FLOW.contains(&child.kind()) {
            flatten_statements(child, out);
        } else {
            out.push(child);
        }
    }
}

fn decorator_names(decorated: Node<'_>, source: &str) -> Vec<String> {
    named_children(decorated)
        .into_iter()
        .filter(|c| c.kind() == "decorator")
        .filter_map(|d| decorator_name(d, source))
        .collect()
}

fn last_segment(dotted: &str) -> &str {
    dotted.rsplit('.').next().unwrap_or(dotted)
}

/// Later definitions of the same method replace earlier ones; a property
/// stays a property across its setter/deleter definitions.
fn merge_method(methods: &mut Vec<MethodDecl>, method: MethodDecl) {
    match methods.iter_mut().find(|m| m.name == method.name) {
        Some(existing) => {
            let was_property = existing.is_property;
            let line = existing.line;
            *existing = method;
            existing.is_property |= was_property;
            if existing.is_property {
                existing.line = line;
            }
        }
        None => methods.push(method),
    }
}

fn collect_identifiers(node: Node<'_>, source: &str, out: &mut Vec<(String, usize)>) {
    match node.kind() {
        "identifier" => out.push((node_text(node, source).to_string(), node_pos(node).line)),
        "pattern_list" | "tuple_pattern" | "list_pattern" | "tuple" | "list" => {
            for child in named_children(node) {
                collect_identifiers(child, source, out);
            }
        }
        _ => {}
    }
}

pub(crate) fn resolve_relative_module(
    module_path: &str,
    is_package: bool,
    level: usize,
    suffix: Option<&str>,
) -> String {
    let mut parts: Vec<&str> = if module_path.is_empty() {
        Vec::new()
    } else {
        module_path.split('.').collect()
    };
    if !is_package {
        parts.pop();
    }
    for _ in 1..level {
        parts.pop();
    }
    let base = parts.join(".");
    match suffix {
        Some(s) => dotted_name(&base, s),
        None => base,
    }
}

/// Parameter list in declaration order with kinds classified.
pub(crate) fn extract_params(params: Node<'_>, source: &str) -> Vec<Param> {
    let mut out = Vec::new();
    let mut keyword_only = false;
    let positional = |kw: bool| {
        if kw {
            ParamKind::Keyword
        } else {
            ParamKind::Positional
        }
    };

    for child in named_children(params) {
        match child.kind() {
            "identifier" => out.push(Param {
                name: node_text(child, source).to_string(),
                has_default: false,
                kind: positional(keyword_only),
            }),
            "default_parameter" | "typed_default_parameter" => {
                let name = child_by_field(child, "name").map_or("", |n| node_text(n, source));
                out.push(Param {
                    name: name.to_string(),
                    has_default: true,
                    kind: positional(keyword_only),
                });
            }
            "typed_parameter" => {
                let Some(inner) = child.named_child(0) else {
                    continue;
                };
                match inner.kind() {
                    "list_splat_pattern" => {
                        keyword_only = true;
                        out.push(splat_param(inner, source, ParamKind::VarArgs));
                    }
                    "dictionary_splat_pattern" => {
                        out.push(splat_param(inner, source, ParamKind::VarKwargs));
                    }
                    _ => out.push(Param {
                        name: node_text(inner, source).to_string(),
                        has_default: false,
                        kind: positional(keyword_only),
                    }),
                }
            }
            "list_splat_pattern" => {
                keyword_only = true;
                out.push(splat_param(child, source, ParamKind::VarArgs));
            }
            "dictionary_splat_pattern" => {
                out.push(splat_param(child, source, ParamKind::VarKwargs));
            }
            "keyword_separator" => keyword_only = true,
            "positional_separator" => {
                for param in out.iter_mut().filter(|p| p.kind == ParamKind::Positional) {
                    param.kind = ParamKind::PositionalOnly;
                }
            }
            _ => {}
        }
    }
    out
}

fn splat_param(node: Node<'_>, source: &str, kind: ParamKind) -> Param {
    let name = node
        .named_child(0)
        .map_or_else(
            || node_text(node, source).trim_start_matches('*').to_string(),
            |n| node_text(n, source).to_string(),
        );
    Param {
        name,
        has_default: false,
        kind,
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::parse::parse_python;

    fn extract(source: &str, module_path: &str) -> FileDeclarations {
        let parsed = parse_python(source, Path::new("test.py")).unwrap();
        extract_declarations(&parsed, Path::new("test.py"), module_path, false, None).unwrap()
    }

    fn class<'a>(decls: &'a FileDeclarations, name: &str) -> &'a ClassDecl {
        decls
            .classes
            .iter()
            .find(|c| c.name == name)
            .unwrap_or_else(|| panic!("class {name} not found in {decls:?}"))
    }

    #[test]
    fn module_paths() {
        let roots = vec!["src".to_string()];
        assert_eq!(
            module_path_for(Path::new("pkg/core.py"), &roots),
            ("pkg.core".to_string(), false)
        );
        assert_eq!(
            module_path_for(Path::new("src/pkg/__init__.py"), &roots),
            ("pkg".to_string(), true)
        );
        assert_eq!(
            module_path_for(Path::new("src/tool.pyi"), &roots),
            ("tool".to_string(), false)
        );
        assert_eq!(
            module_path_for(Path::new("src/__init__.py"), &roots),
            ("src".to_string(), true)
        );
    }

    #[test]
    fn classes_methods_and_params() {
        let source = r"
class Widget:
    def __init__(self, name, size=1):
        self.name = name

    def render(self, target, *, scale=1.0, **options):
        pass

    @staticmethod
    def build(spec, *parts):
        pass

    @classmethod
    def default(cls):
        return cls('w')

    @property
    def area(self):
        return 0
";
        let decls = extract(source, "ui.widgets");
        let widget = class(&decls, "Widget");
        assert_eq!(widget.qualified_name, "ui.widgets.Widget");
        assert!(widget.bases.is_empty());

        let names: Vec<&str> = widget.methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["__init__", "render", "build", "default", "area"]);

        let init = &widget.methods[0];
        assert_eq!(init.params.len(), 2);
        assert!(init.params[0].is_required());
        assert!(!init.params[1].is_required());

        let render = &widget.methods[1];
        let kinds: Vec<ParamKind> = render.params.iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            vec![ParamKind::Positional, ParamKind::Keyword, ParamKind::VarKwargs]
        );

        let build = &widget.methods[2];
        assert!(build.is_static);
        assert_eq!(build.params[0].name, "spec");
        assert_eq!(build.params[1].kind, ParamKind::VarArgs);

        assert!(widget.methods[3].is_class_method);
        assert!(widget.methods[3].params.is_empty());
        assert!(widget.methods[4].is_property);
    }

    #[test]
    fn typed_parameters() {
        let source = "def f(a: int, b: str = 'x', *args: int, c: bool, **kw: str):\n    pass\n";
        let decls = extract(source, "m");
        let f = &decls.functions[0];
        assert_eq!(f.qualified_name, "m.f");
        let shape: Vec<(&str, bool, ParamKind)> = f
            .params
            .iter()
            .map(|p| (p.name.as_str(), p.has_default, p.kind))
            .collect();
        assert_eq!(
            shape,
            vec![
                ("a", false, ParamKind::Positional),
                ("b", true, ParamKind::Positional),
                ("args", false, ParamKind::VarArgs),
                ("c", false, ParamKind::Keyword),
                ("kw", false, ParamKind::VarKwargs),
            ]
        );
    }

    #[test]
    fn positional_only_marker() {
        let source = "class C:\n    def m(self, a, /, b, *, c=1):\n        pass\n";
        let decls = extract(source, "m");
        let kinds: Vec<(&str, ParamKind)> = class(&decls, "C").methods[0]
            .params
            .iter()
            .map(|p| (p.name.as_str(), p.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("a", ParamKind::PositionalOnly),
                ("b", ParamKind::Positional),
                ("c", ParamKind::Keyword),
            ]
        );
    }

    #[test]
    fn bases_resolve_through_imports_and_module() {
        let source = r"
import shapes.base as sb
from typing import Generic, TypeVar
from shapes.core import Shape

T = TypeVar('T')

class Local:
    pass

class A(Shape, Local, object):
    pass

class B(sb.Base, Generic[T]):
    pass

class C(make_base()):
    pass
";
        let decls = extract(source, "pkg.mod");
        assert_eq!(class(&decls, "A").bases, vec!["shapes.core.Shape", "pkg.mod.Local"]);
        assert_eq!(
            class(&decls, "B").bases,
            vec!["shapes.base.Base", "typing.Generic"]
        );
        assert_eq!(class(&decls, "C").bases, vec!["make_base()"]);
    }

    #[test]
    fn instance_and_class_attributes() {
        let source = r"
class Cache:
    limit = 10
    label: str = 'c'
    hits: int

    def __init__(self, size):
        if size > 0:
            self.size = size
        self.store, self.order = {}, []
        self.count: int = 0

    def bump(self):
        self.count += 1
        self.extra = other.value = 1

    def clear(this):
        this.cleared = True
";
        let decls = extract(source, "cache");
        let cache = class(&decls, "Cache");
        let attrs: Vec<(&str, AttributeKind)> = cache
            .attributes
            .iter()
            .map(|a| (a.name.as_str(), a.kind))
            .collect();
        assert_eq!(
            attrs,
            vec![
                ("limit", AttributeKind::Class),
                ("label", AttributeKind::Class),
                ("hits", AttributeKind::Class),
                ("size", AttributeKind::Instance),
                ("store", AttributeKind::Instance),
                ("order", AttributeKind::Instance),
                ("count", AttributeKind::Instance),
                ("extra", AttributeKind::Instance),
                ("cleared", AttributeKind::Instance),
            ]
        );
    }

    #[test]
    fn abstract_classes() {
        let source = r"
from abc import ABC, ABCMeta, abstractmethod
import abc

class A(ABC):
    pass

class B(metaclass=ABCMeta):
    pass

class C:
    @abc.abstractmethod
    def run(self):
        ...

class D:
    pass
";
        let decls = extract(source, "m");
        assert!(class(&decls, "A").is_abstract);
        assert!(class(&decls, "B").is_abstract);
        assert!(class(&decls, "B").bases.is_empty());
        assert!(class(&decls, "C").is_abstract);
        assert!(class(&decls, "C").methods[0].is_abstract);
        assert!(!class(&decls, "D").is_abstract);
    }

    #[test]
    fn imports_and_relative_resolution() {
        let source = r"
import os
import os.path as osp
import collections.abc
from .core import Cache as C, Entry
from .. import util
from . import *
";
        let parsed = parse_python(source, Path::new("pkg/sub/__init__.py")).unwrap();
        let decls =
            extract_declarations(&parsed, Path::new("pkg/sub/__init__.py"), "pkg.sub", true, None)
                .unwrap();
        let imports: Vec<(Option<&str>, &str)> = decls
            .imports
            .iter()
            .map(|i| (i.alias.as_deref(), i.target.as_str()))
            .collect();
        assert_eq!(
            imports,
            vec![
                (Some("os"), "os"),
                (Some("osp"), "os.path"),
                (Some("collections"), "collections"),
                (Some("C"), "pkg.sub.core.Cache"),
                (Some("Entry"), "pkg.sub.core.Entry"),
                (Some("util"), "pkg.util"),
                (None, "pkg.sub"),
            ]
        );
    }

    #[test]
    fn relative_module_from_plain_module() {
        assert_eq!(
            resolve_relative_module("pkg.sub.mod", false, 1, Some("core")),
            "pkg.sub.core"
        );
        assert_eq!(resolve_relative_module("pkg.sub.mod", false, 2, None), "pkg");
    }

    #[test]
    fn nested_classes_and_conditional_definitions() {
        let source = r"
try:
    import fast as impl
except ImportError:
    import slow as impl

if True:
    class Outer:
        class Inner:
            def go(self):
                pass

def helper():
    def local():
        pass
    class Hidden:
        pass
";
        let decls = extract(source, "m");
        assert!(decls.classes.iter().any(|c| c.qualified_name == "m.Outer"));
        let inner = class(&decls, "Outer.Inner");
        assert_eq!(inner.qualified_name, "m.Outer.Inner");
        assert_eq!(inner.methods[0].name, "go");
        assert!(!decls.classes.iter().any(|c| c.name == "Hidden"));
        let fns: Vec<&str> = decls.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(fns, vec!["helper"]);
        assert_eq!(decls.imports.len(), 2);
    }

    #[test]
    fn property_setter_stays_property() {
        let source = r"
class P:
    @property
    def value(self):
        return self._v

    @value.setter
    def value(self, v):
        self._v = v
";
        let decls = extract(source, "m");
        let p = class(&decls, "P");
        assert_eq!(p.methods.len(), 1);
        assert!(p.methods[0].is_property);
        assert_eq!(p.attributes[0].name, "_v");
    }

    #[test]
    fn expired_deadline_times_out() {
        let parsed = parse_python("class A:\n    pass\n", Path::new("slow.py")).unwrap();
        let err = extract_declarations(
            &parsed,
            Path::new("slow.py"),
            "slow",
            false,
            Some(Instant::now()),
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::Timeout { path } if path == "slow.py"));
    }

    proptest! {
        #[test]
        fn module_path_is_dotted(segments in prop::collection::vec("[a-z][a-z0-9_]{0,8}", 1..5)) {
            let relative = format!("{}.py", segments.join("/"));
            let (module, is_package) = module_path_for(Path::new(&relative), &[]);
            prop_assert!(!is_package);
            prop_assert!(!module.contains('/'));
            prop_assert_eq!(module, segments.join("."));
        }
    }
}
