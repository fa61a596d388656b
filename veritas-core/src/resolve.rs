//! Dotted-path symbol resolution against the graph store.
//!
//! A path is tried, in order, as an exact class, function or module key; then
//! through package re-exports recorded in stored import tables; then, for a
//! bare name only, as the short name of exactly one class or function.

use std::collections::{HashSet, VecDeque};

use tracing::trace;

use crate::store::GraphStore;
use crate::types::{ClassView, FunctionView};

/// Re-export hops followed before giving up.
pub const MAX_REEXPORT_DEPTH: usize = 8;

/// What a dotted path names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Symbol {
    Class(ClassView),
    Function(FunctionView),
    Module(String),
}

impl Symbol {
    pub fn key(&self) -> &str {
        match self {
            Self::Class(c) => &c.key,
            Self::Function(f) => &f.key,
            Self::Module(m) => m,
        }
    }

    pub fn into_class(self) -> Option<ClassView> {
        match self {
            Self::Class(c) => Some(c),
            _ => None,
        }
    }
}

/// How a path reached its symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Exact key or package re-export.
    Qualified,
    /// Bare name matched to the only class or function carrying it.
    ShortName,
}

#[derive(Debug)]
pub struct SymbolResolver<'a, S: GraphStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: GraphStore + ?Sized> SymbolResolver<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, path: &str) -> crate::error::Result<Option<Symbol>> {
        Ok(self.resolve_traced(path).await?.map(|(symbol, _)| symbol))
    }

    /// Like `resolve`, also reporting which rule matched.
    pub async fn resolve_traced(
        &self,
        path: &str,
    ) -> crate::error::Result<Option<(Symbol, Resolution)>> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::from([(path.to_string(), 0)]);

        while let Some((candidate, depth)) = queue.pop_front() {
            if !visited.insert(candidate.clone()) {
                continue;
            }
            if let Some(symbol) = self.exact(&candidate).await? {
                if candidate != path {
                    trace!(path, resolved = symbol.key(), "Resolved through re-export");
                }
                return Ok(Some((symbol, Resolution::Qualified)));
            }
            if depth < MAX_REEXPORT_DEPTH {
                for next in self.reexports(&candidate).await? {
                    queue.push_back((next, depth + 1));
                }
            }
        }

        if path.contains('.') {
            return Ok(None);
        }
        Ok(self
            .unique_short_name(path)
            .await?
            .map(|symbol| (symbol, Resolution::ShortName)))
    }

    /// Resolve a path that must name a class.
    pub async fn resolve_class(
        &self,
        path: &str,
    ) -> crate::error::Result<Option<(ClassView, Resolution)>> {
        Ok(self
            .resolve_traced(path)
            .await?
            .and_then(|(symbol, resolution)| Some((symbol.into_class()?, resolution))))
    }

    /// Split `Module.Class.member` into the class and the member name, when
    /// everything before the last dot resolves to a class.
    pub async fn resolve_member_path(
        &self,
        path: &str,
    ) -> crate::error::Result<Option<(ClassView, String, Resolution)>> {
        let Some((prefix, member)) = path.rsplit_once('.') else {
            return Ok(None);
        };
        Ok(self
            .resolve_class(prefix)
            .await?
            .map(|(class, resolution)| (class, member.to_string(), resolution)))
    }

    async fn exact(&self, key: &str) -> crate::error::Result<Option<Symbol>> {
        if let Some(class) = self.store.resolve_class(key).await? {
            return Ok(Some(Symbol::Class(class)));
        }
        if let Some(function) = self.store.resolve_function(key).await? {
            return Ok(Some(Symbol::Function(function)));
        }
        if self.store.resolve_module(key).await? {
            return Ok(Some(Symbol::Module(key.to_string())));
        }
        Ok(None)
    }

    /// Paths that `path` may stand for through a package's import table,
    /// longest module prefix first.
    async fn reexports(&self, path: &str) -> crate::error::Result<Vec<String>> {
        let segments: Vec<&str> = path.split('.').collect();
        let mut out = Vec::new();
        for split in (1..segments.len()).rev() {
            let module = segments[..split].join(".");
            let imports = self.store.file_imports_for_module(&module).await?;
            for import in imports {
                match import.alias.as_deref() {
                    Some(alias) if alias == segments[split] => {
                        let mut next = import.target.clone();
                        for rest in &segments[split + 1..] {
                            next.push('.');
                            next.push_str(rest);
                        }
                        out.push(next);
                    }
                    // `from x import *`
                    None => out.push(format!("{}.{}", import.target, segments[split..].join("."))),
                    Some(_) => {}
                }
            }
        }
        Ok(out)
    }

    async fn unique_short_name(&self, name: &str) -> crate::error::Result<Option<Symbol>> {
        let classes = self.store.classes_named(name).await?;
        let functions = self.store.functions_named(name).await?;
        Ok(match (classes.len(), functions.len()) {
            (1, 0) => classes.into_iter().next().map(Symbol::Class),
            (0, 1) => functions.into_iter().next().map(Symbol::Function),
            _ => None,
        })
    }
}
