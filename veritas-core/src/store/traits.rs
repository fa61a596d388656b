use serde_json::{Map, Value};
use veritas_graphs::{FileDeclarations, ImportDecl};

use crate::hierarchy::{self, Ancestor, Lineage};
use crate::types::{
    AttributeView, ClassView, FileRecord, FunctionView, MethodView, RemovalCounts,
    RepositoryRecord, StoreStats, UpsertCounts,
};

/// Result of looking a member up along an inheritance chain.
#[derive(Debug, Clone)]
pub struct MemberLookup<T> {
    /// First match in breadth-first order.
    pub member: Option<T>,
    /// Dangling ancestor that ended the search before any match. Whatever
    /// lies beyond it could shadow later classes, so the miss is not proof.
    pub stopped_at: Option<String>,
    /// The chain that was searched.
    pub lineage: Lineage,
}

impl<T> MemberLookup<T> {
    fn found(member: T, lineage: Lineage) -> Self {
        Self {
            member: Some(member),
            stopped_at: None,
            lineage,
        }
    }

    fn missing(stopped_at: Option<String>, lineage: Lineage) -> Self {
        Self {
            member: None,
            stopped_at,
            lineage,
        }
    }
}

/// The knowledge-graph store. Ingestion writes through it; validation only reads.
#[async_trait::async_trait]
pub trait GraphStore: Send + Sync {
    // ── Repositories ───────────────────────────────────────────────

    /// Insert or update a repository by key.
    async fn upsert_repository(&self, repo: &RepositoryRecord) -> crate::error::Result<()>;

    async fn get_repository(&self, key: &str) -> crate::error::Result<Option<RepositoryRecord>>;

    async fn list_repositories(&self) -> crate::error::Result<Vec<RepositoryRecord>>;

    /// Delete a repository and everything its files own.
    async fn remove_repository(&self, key: &str) -> crate::error::Result<RemovalCounts>;

    // ── Files ──────────────────────────────────────────────────────

    /// Atomically replace every node and edge owned by `file` with `decls`.
    ///
    /// Concurrent calls for distinct file keys are allowed; a second writer
    /// for a key that is already being written gets `StoreError::WriteConflict`.
    async fn upsert_file(
        &self,
        file: &FileRecord,
        decls: &FileDeclarations,
    ) -> crate::error::Result<UpsertCounts>;

    /// Flag a file as failed or timed out, leaving its previous snapshot intact.
    async fn mark_file_failed(&self, file: &FileRecord) -> crate::error::Result<()>;

    /// Flag files whose extraction never ran (cancelled ingestion). Every file
    /// is claimed as in `upsert_file`.
    async fn mark_files_pending(&self, files: &[FileRecord]) -> crate::error::Result<()>;

    /// Delete a file and everything it owns.
    async fn remove_file(&self, file_key: &str) -> crate::error::Result<UpsertCounts>;

    async fn file_state(&self, file_key: &str) -> crate::error::Result<Option<FileRecord>>;

    async fn list_files(&self, repository_key: &str) -> crate::error::Result<Vec<FileRecord>>;

    // ── Lookups ────────────────────────────────────────────────────

    async fn resolve_class(&self, key: &str) -> crate::error::Result<Option<ClassView>>;

    async fn resolve_function(&self, key: &str) -> crate::error::Result<Option<FunctionView>>;

    /// Whether any stored file has this module path or lives below it.
    async fn resolve_module(&self, module_path: &str) -> crate::error::Result<bool>;

    /// Method declared directly on `class_key` (no inheritance).
    async fn find_method(
        &self,
        class_key: &str,
        name: &str,
    ) -> crate::error::Result<Option<MethodView>>;

    /// Attribute declared directly on `class_key` (no inheritance).
    async fn find_attribute(
        &self,
        class_key: &str,
        name: &str,
    ) -> crate::error::Result<Option<AttributeView>>;

    async fn list_classes(&self, repository_key: &str) -> crate::error::Result<Vec<ClassView>>;

    async fn list_methods(&self, class_key: &str) -> crate::error::Result<Vec<MethodView>>;

    async fn list_attributes(&self, class_key: &str)
    -> crate::error::Result<Vec<AttributeView>>;

    /// Import table of the file(s) with this module path.
    async fn file_imports_for_module(
        &self,
        module_path: &str,
    ) -> crate::error::Result<Vec<ImportDecl>>;

    /// Classes whose (local) name matches exactly.
    async fn classes_named(&self, name: &str) -> crate::error::Result<Vec<ClassView>>;

    /// Module-level functions whose name matches exactly.
    async fn functions_named(&self, name: &str) -> crate::error::Result<Vec<FunctionView>>;

    /// `(class_key, base_key)` pairs, optionally limited to one repository.
    async fn inheritance_edges(
        &self,
        repository_key: Option<&str>,
    ) -> crate::error::Result<Vec<(String, String)>>;

    /// Run a read-only SQL statement and return rows as JSON objects.
    async fn raw_query(&self, sql: &str) -> crate::error::Result<Vec<Map<String, Value>>>;

    async fn stats(&self) -> crate::error::Result<StoreStats>;

    // ── Inheritance-aware lookups ──────────────────────────────────

    /// Breadth-first search for a method over the class and its ancestors.
    /// The search stops at the first dangling ancestor.
    async fn resolve_method(
        &self,
        class_key: &str,
        name: &str,
    ) -> crate::error::Result<MemberLookup<MethodView>> {
        let lineage = hierarchy::lineage(self, class_key).await?;
        for ancestor in &lineage.ancestors {
            match ancestor {
                Ancestor::Resolved(class) => {
                    if let Some(method) = self.find_method(class, name).await? {
                        return Ok(MemberLookup::found(method, lineage));
                    }
                }
                Ancestor::Dangling(base) => {
                    let base = base.clone();
                    return Ok(MemberLookup::missing(Some(base), lineage));
                }
            }
        }
        Ok(MemberLookup::missing(None, lineage))
    }

    /// Breadth-first search for an attribute, with the same stopping rule.
    async fn resolve_attribute(
        &self,
        class_key: &str,
        name: &str,
    ) -> crate::error::Result<MemberLookup<AttributeView>> {
        let lineage = hierarchy::lineage(self, class_key).await?;
        for ancestor in &lineage.ancestors {
            match ancestor {
                Ancestor::Resolved(class) => {
                    if let Some(attr) = self.find_attribute(class, name).await? {
                        return Ok(MemberLookup::found(attr, lineage));
                    }
                }
                Ancestor::Dangling(base) => {
                    let base = base.clone();
                    return Ok(MemberLookup::missing(Some(base), lineage));
                }
            }
        }
        Ok(MemberLookup::missing(None, lineage))
    }
}
