pub mod declarations;
mod helpers;
pub mod parse;
pub mod usages;

use serde::{Deserialize, Serialize};

pub use declarations::{extract_declarations, module_path_for};
pub use parse::{ParsedSource, is_python_file, parse_python};
pub use usages::extract_usages;

/// Error type for the extraction engine.
#[derive(thiserror::Error, Debug)]
pub enum GraphError {
    #[error("Parse error in {path} at {line}:{column}: {message}")]
    Parse {
        path: String,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("Extraction of {path} exceeded its time budget")]
    Timeout { path: String },

    #[error("Tree-sitter error: {0}")]
    TreeSitter(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GraphError>;

// ── Source positions ───────────────────────────────────────────────

/// 1-based line/column position inside a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourcePos {
    pub line: usize,
    pub column: usize,
}

impl From<tree_sitter::Point> for SourcePos {
    fn from(p: tree_sitter::Point) -> Self {
        Self {
            line: p.row + 1,
            column: p.column + 1,
        }
    }
}

// ── Parameters ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    /// Declared before a `/` marker: can only be passed positionally.
    PositionalOnly,
    /// Can be passed positionally (or by name).
    Positional,
    /// Keyword-only: declared after a bare `*` or `*args`.
    Keyword,
    /// `*args`
    VarArgs,
    /// `**kwargs`
    VarKwargs,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub has_default: bool,
    pub kind: ParamKind,
}

impl Param {
    pub fn is_required(&self) -> bool {
        !self.has_default
            && matches!(
                self.kind,
                ParamKind::PositionalOnly | ParamKind::Positional | ParamKind::Keyword
            )
    }

    /// Fills a positional slot at the call site.
    pub fn is_positional(&self) -> bool {
        matches!(self.kind, ParamKind::PositionalOnly | ParamKind::Positional)
    }
}

/// Render a parameter list the way it would read in a `def` line.
pub fn render_params(params: &[Param]) -> String {
    let mut parts = Vec::with_capacity(params.len());
    let mut keyword_marker_written = false;
    let mut open_positional_only = false;
    for p in params {
        if open_positional_only && p.kind != ParamKind::PositionalOnly {
            parts.push("/".to_string());
            open_positional_only = false;
        }
        match p.kind {
            ParamKind::PositionalOnly => {
                open_positional_only = true;
                parts.push(with_default(&p.name, p.has_default));
            }
            ParamKind::Positional => parts.push(with_default(&p.name, p.has_default)),
            ParamKind::Keyword => {
                let has_var_args = params.iter().any(|q| q.kind == ParamKind::VarArgs);
                if !has_var_args && !keyword_marker_written {
                    parts.push("*".to_string());
                    keyword_marker_written = true;
                }
                parts.push(with_default(&p.name, p.has_default));
            }
            ParamKind::VarArgs => parts.push(format!("*{}", p.name)),
            ParamKind::VarKwargs => parts.push(format!("**{}", p.name)),
        }
    }
    if open_positional_only {
        parts.push("/".to_string());
    }
    format!("({})", parts.join(", "))
}

fn with_default(name: &str, has_default: bool) -> String {
    if has_default {
        format!("{name}=…")
    } else {
        name.to_string()
    }
}

// ── Declaration records ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    /// Assigned through `self.<name> = …` inside a method.
    Instance,
    /// Assigned in the class body.
    Class,
}

impl AttributeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Instance => "instance",
            Self::Class => "class",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDecl {
    pub name: String,
    pub kind: AttributeKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct MethodDecl {
    pub name: String,
    /// Declared parameters, without the implicit `self`/`cls` receiver.
    pub params: Vec<Param>,
    pub is_static: bool,
    pub is_class_method: bool,
    pub is_property: bool,
    pub is_abstract: bool,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDecl {
    pub name: String,
    /// `module_path.ClassName`
    pub qualified_name: String,
    /// Candidate keys of the base classes, in declaration order.
    pub bases: Vec<String>,
    pub is_abstract: bool,
    pub methods: Vec<MethodDecl>,
    pub attributes: Vec<AttributeDecl>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    /// `module_path.function_name`
    pub qualified_name: String,
    pub params: Vec<Param>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportDecl {
    /// Name bound in the importing module (`None` for `from m import *`).
    pub alias: Option<String>,
    /// Fully-qualified import target.
    pub target: String,
    pub line: usize,
}

/// Everything the declaration extractor found in one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDeclarations {
    pub module_path: String,
    pub classes: Vec<ClassDecl>,
    pub functions: Vec<FunctionDecl>,
    pub imports: Vec<ImportDecl>,
}

impl FileDeclarations {
    /// Number of graph nodes (classes, methods, attributes, functions) in this file.
    pub fn node_count(&self) -> usize {
        self.functions.len()
            + self
                .classes
                .iter()
                .map(|c| 1 + c.methods.len() + c.attributes.len())
                .sum::<usize>()
    }
}

// ── Usage events ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageKind {
    Import,
    Instantiate,
    Call,
    AttributeAccess,
}

impl UsageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::Instantiate => "instantiate",
            Self::Call => "call",
            Self::AttributeAccess => "attribute_access",
        }
    }
}

impl std::fmt::Display for UsageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of the arguments at a call site. Values are never evaluated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallArgs {
    pub positional: usize,
    pub keywords: Vec<String>,
    /// A `*iterable` splat was passed.
    pub star_args: bool,
    /// A `**mapping` splat was passed.
    pub star_kwargs: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub kind: UsageKind,
    /// Dotted path of the symbol. For receiver-based events this is the member name.
    pub symbol_path: String,
    /// Candidate key of the receiver's class, `None` when it could not be inferred.
    pub receiver_inferred_type: Option<String>,
    /// Whether the usage went through a receiver (`obj.member`).
    pub has_receiver: bool,
    /// Source text of the receiver expression, for reporting.
    pub receiver_text: Option<String>,
    pub args: Option<CallArgs>,
    pub line: usize,
    pub column: usize,
}

impl UsageEvent {
    pub fn position(&self) -> SourcePos {
        SourcePos {
            line: self.line,
            column: self.column,
        }
    }

    /// Human-facing symbol: `receiver.member` for receiver events, the path otherwise.
    pub fn display_symbol(&self) -> String {
        match &self.receiver_text {
            Some(recv) if self.has_receiver => format!("{recv}.{}", self.symbol_path),
            _ => self.symbol_path.clone(),
        }
    }
}
