use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::{Map, Value};
use tracing::{debug, info};
use veritas_graphs::{AttributeKind, ClassDecl, FileDeclarations, ImportDecl, Param};

use crate::error::StoreError;
use crate::types::{
    AttributeView, ClassView, FileRecord, FileStatus, FunctionView, MethodView, RemovalCounts,
    RepositoryRecord, StoreStats, UpsertCounts,
};

use super::GraphStore;
use super::schema;

/// SQLite-backed implementation of `GraphStore`.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
    /// File keys with a write in progress.
    in_flight: Mutex<HashSet<String>>,
}

/// Exclusive claim on one file key. Released on drop.
#[derive(Debug)]
pub struct FileWriteGuard<'a> {
    store: &'a SqliteStore,
    file_key: String,
}

impl Drop for FileWriteGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.store.in_flight.lock() {
            in_flight.remove(&self.file_key);
        }
    }
}

impl SqliteStore {
    /// Open (or create) a store at the given path.
    pub fn open(path: &Path) -> crate::error::Result<Self> {
        let conn = Connection::open(path).map_err(StoreError::Sqlite)?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(path.to_path_buf()),
            in_flight: Mutex::new(HashSet::new()),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> crate::error::Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::Sqlite)?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: None,
            in_flight: Mutex::new(HashSet::new()),
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> crate::error::Result<()> {
        let conn = self.lock();

        conn.execute_batch(
            "PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(StoreError::Sqlite)?;

        // Ignored for in-memory databases
        let _ = conn.execute_batch("PRAGMA journal_mode = WAL;");

        conn.execute_batch(schema::SCHEMA_SQL)
            .map_err(StoreError::Sqlite)?;
        conn.execute_batch(schema::VIEWS_SQL)
            .map_err(StoreError::Sqlite)?;

        conn.execute(
            "INSERT OR IGNORE INTO veritas_meta (key, value) VALUES ('schema_version', ?1)",
            params![schema::SCHEMA_VERSION],
        )
        .map_err(StoreError::Sqlite)?;

        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("veritas store mutex poisoned")
    }

    /// Claim `file_key` for writing. A key that is already claimed yields
    /// `StoreError::WriteConflict`.
    pub fn begin_file_write(&self, file_key: &str) -> Result<FileWriteGuard<'_>, StoreError> {
        let mut in_flight = self
            .in_flight
            .lock()
            .expect("veritas write set mutex poisoned");
        if !in_flight.insert(file_key.to_string()) {
            return Err(StoreError::WriteConflict {
                file_key: file_key.to_string(),
            });
        }
        Ok(FileWriteGuard {
            store: self,
            file_key: file_key.to_string(),
        })
    }

    // ── Row mapping ────────────────────────────────────────────────

    fn row_to_repository(row: &rusqlite::Row<'_>) -> rusqlite::Result<RepositoryRecord> {
        let ingested_at: String = row.get("ingested_at")?;
        Ok(RepositoryRecord {
            key: row.get("key")?,
            name: row.get("name")?,
            url: row.get("url")?,
            git_ref: row.get("git_ref")?,
            commit_id: row.get("commit_id")?,
            ingested_at: parse_time(&ingested_at),
        })
    }

    fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
        let status: String = row.get("status")?;
        let updated_at: String = row.get("updated_at")?;
        Ok(FileRecord {
            key: row.get("key")?,
            repository_key: row.get("repository_key")?,
            relative_path: row.get("relative_path")?,
            module_path: row.get("module_path")?,
            language: row.get("language")?,
            last_hash: row.get("last_hash")?,
            status: status.parse().unwrap_or(FileStatus::Pending),
            error: row.get("error")?,
            updated_at: parse_time(&updated_at),
        })
    }

    /// Class row without its bases; callers fill them in.
    fn row_to_class(row: &rusqlite::Row<'_>) -> rusqlite::Result<ClassView> {
        Ok(ClassView {
            key: row.get("key")?,
            name: row.get("name")?,
            module_path: row.get("module_path")?,
            file_key: row.get("file_key")?,
            bases: Vec::new(),
            is_abstract: row.get("is_abstract")?,
            line: row.get("line")?,
        })
    }

    fn row_to_method(row: &rusqlite::Row<'_>) -> rusqlite::Result<MethodView> {
        let params: String = row.get("params")?;
        Ok(MethodView {
            key: row.get("key")?,
            class_key: row.get("class_key")?,
            name: row.get("name")?,
            params: parse_params(&params),
            is_static: row.get("is_static")?,
            is_class_method: row.get("is_class_method")?,
            is_property: row.get("is_property")?,
            is_abstract: row.get("is_abstract")?,
            line: row.get("line")?,
        })
    }

    fn row_to_attribute(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttributeView> {
        let kind: String = row.get("kind")?;
        Ok(AttributeView {
            key: row.get("key")?,
            class_key: row.get("class_key")?,
            name: row.get("name")?,
            kind: if kind == AttributeKind::Class.as_str() {
                AttributeKind::Class
            } else {
                AttributeKind::Instance
            },
            line: row.get("line")?,
        })
    }

    fn row_to_function(row: &rusqlite::Row<'_>) -> rusqlite::Result<FunctionView> {
        let params: String = row.get("params")?;
        Ok(FunctionView {
            key: row.get("key")?,
            file_key: row.get("file_key")?,
            name: row.get("name")?,
            module_path: row.get("module_path")?,
            params: parse_params(&params),
            line: row.get("line")?,
        })
    }

    fn load_bases(conn: &Connection, class_key: &str) -> rusqlite::Result<Vec<String>> {
        let mut stmt = conn.prepare_cached(
            "SELECT base_key FROM class_bases WHERE class_key = ?1 ORDER BY position",
        )?;
        let bases = stmt.query_map([class_key], |row| row.get(0))?.collect();
        bases
    }

    fn query_classes(
        conn: &Connection,
        sql: &str,
        arg: &str,
    ) -> rusqlite::Result<Vec<ClassView>> {
        let mut stmt = conn.prepare(sql)?;
        let mut classes: Vec<ClassView> = stmt
            .query_map([arg], Self::row_to_class)?
            .collect::<rusqlite::Result<_>>()?;
        for class in &mut classes {
            class.bases = Self::load_bases(conn, &class.key)?;
        }
        Ok(classes)
    }
}

// ── File writes ────────────────────────────────────────────────────

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

fn parse_params(json: &str) -> Vec<Param> {
    serde_json::from_str(json).unwrap_or_default()
}

fn keys_of(conn: &Connection, sql: &str, arg: &str) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let keys = stmt.query_map([arg], |row| row.get(0))?.collect();
    keys
}

fn count_of(conn: &Connection, sql: &str, arg: &str) -> rusqlite::Result<u64> {
    conn.query_row(sql, [arg], |row| row.get(0))
}

fn key_exists(conn: &Connection, table: &str, key: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        &format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE key = ?1)"),
        [key],
        |row| row.get(0),
    )
}

/// File other than `file_key` that owns `key` in `table`.
fn owner_elsewhere(
    conn: &Connection,
    table: &str,
    key: &str,
    file_key: &str,
) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        &format!("SELECT file_key FROM {table} WHERE key = ?1 AND file_key <> ?2"),
        params![key, file_key],
        |row| row.get(0),
    )
    .optional()
}

/// Classify one keyed upsert: new row, changed row, or untouched.
fn tally(counts: &mut UpsertCounts, existed: bool, changed: bool) {
    if !existed {
        counts.added += 1;
    } else if changed {
        counts.updated += 1;
    }
}

/// Write the file row itself. Parsed rows replace every column; other
/// statuses only touch status, error and timestamp so the previous
/// snapshot's hash survives.
fn write_file_row(conn: &Connection, file: &FileRecord) -> rusqlite::Result<()> {
    let sql = if file.status == FileStatus::Parsed {
        "INSERT INTO files (key, repository_key, relative_path, module_path, language,
                            last_hash, status, error, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(key) DO UPDATE SET
            repository_key = excluded.repository_key,
            relative_path = excluded.relative_path,
            module_path = excluded.module_path,
            language = excluded.language,
            last_hash = excluded.last_hash,
            status = excluded.status,
            error = excluded.error,
            updated_at = excluded.updated_at"
    } else {
        "INSERT INTO files (key, repository_key, relative_path, module_path, language,
                            last_hash, status, error, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(key) DO UPDATE SET
            status = excluded.status,
            error = excluded.error,
            updated_at = excluded.updated_at"
    };
    conn.execute(
        sql,
        params![
            file.key,
            file.repository_key,
            file.relative_path,
            file.module_path,
            file.language,
            file.last_hash,
            file.status.as_str(),
            file.error,
            file.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Replace everything owned by `file` with `decls`. Runs inside the caller's
/// transaction.
///
/// A class or function key already owned by another file (a second
/// repository or ref with the same module layout) keeps its owner. The
/// file's hash is cleared so a later run retries once the owner is gone.
fn write_file(
    conn: &Connection,
    file: &FileRecord,
    decls: &FileDeclarations,
) -> Result<UpsertCounts, StoreError> {
    let mut counts = UpsertCounts::default();
    let mut parsed = file.clone();
    parsed.status = FileStatus::Parsed;
    parsed.error = None;
    write_file_row(conn, &parsed)?;

    // Classes gone from this file take their members and bases with them.
    let old_classes = keys_of(conn, "SELECT key FROM classes WHERE file_key = ?1", &file.key)?;
    let new_classes: HashSet<&str> = decls
        .classes
        .iter()
        .map(|c| c.qualified_name.as_str())
        .collect();
    for stale in old_classes
        .iter()
        .filter(|k| !new_classes.contains(k.as_str()))
    {
        counts.removed += 1
            + count_of(conn, "SELECT COUNT(*) FROM methods WHERE class_key = ?1", stale)?
            + count_of(conn, "SELECT COUNT(*) FROM attributes WHERE class_key = ?1", stale)?;
        conn.execute("DELETE FROM classes WHERE key = ?1", [stale])?;
    }

    for class in &decls.classes {
        if let Some(owner) = owner_elsewhere(conn, "classes", &class.qualified_name, &file.key)? {
            debug!(class = %class.qualified_name, owner = %owner, "Class owned by another file; skipped");
            counts.conflicts += 1;
            continue;
        }
        counts += write_class(conn, &file.key, &decls.module_path, class)?;
    }

    let old_functions = keys_of(conn, "SELECT key FROM functions WHERE file_key = ?1", &file.key)?;
    let new_functions: HashSet<&str> = decls
        .functions
        .iter()
        .map(|f| f.qualified_name.as_str())
        .collect();
    for stale in old_functions
        .iter()
        .filter(|k| !new_functions.contains(k.as_str()))
    {
        counts.removed += 1;
        conn.execute("DELETE FROM functions WHERE key = ?1", [stale])?;
    }
    for function in &decls.functions {
        if let Some(owner) =
            owner_elsewhere(conn, "functions", &function.qualified_name, &file.key)?
        {
            debug!(function = %function.qualified_name, owner = %owner, "Function owned by another file; skipped");
            counts.conflicts += 1;
            continue;
        }
        let existed = key_exists(conn, "functions", &function.qualified_name)?;
        let params_json = serde_json::to_string(&function.params)?;
        let changed = conn.execute(
            "INSERT INTO functions (key, file_key, name, module_path, params, line)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(key) DO UPDATE SET
                file_key = excluded.file_key,
                name = excluded.name,
                module_path = excluded.module_path,
                params = excluded.params,
                line = excluded.line
             WHERE file_key IS NOT excluded.file_key
                OR params IS NOT excluded.params
                OR line IS NOT excluded.line",
            params![
                function.qualified_name,
                file.key,
                function.name,
                decls.module_path,
                params_json,
                function.line,
            ],
        )?;
        tally(&mut counts, existed, changed > 0);
    }

    write_imports(conn, &file.key, &decls.imports)?;
    if counts.conflicts > 0 {
        conn.execute("UPDATE files SET last_hash = NULL WHERE key = ?1", [&file.key])?;
    }
    Ok(counts)
}

fn write_class(
    conn: &Connection,
    file_key: &str,
    module_path: &str,
    class: &ClassDecl,
) -> Result<UpsertCounts, StoreError> {
    let mut counts = UpsertCounts::default();
    let key = class.qualified_name.as_str();

    let existed = key_exists(conn, "classes", key)?;
    let old_bases = SqliteStore::load_bases(conn, key)?;
    let changed = conn.execute(
        "INSERT INTO classes (key, file_key, name, module_path, is_abstract, line)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(key) DO UPDATE SET
            file_key = excluded.file_key,
            name = excluded.name,
            module_path = excluded.module_path,
            is_abstract = excluded.is_abstract,
            line = excluded.line
         WHERE file_key IS NOT excluded.file_key
            OR is_abstract IS NOT excluded.is_abstract
            OR line IS NOT excluded.line",
        params![key, file_key, class.name, module_path, class.is_abstract, class.line],
    )?;
    let bases_changed = old_bases != class.bases;
    tally(&mut counts, existed, changed > 0 || bases_changed);

    if bases_changed {
        conn.execute("DELETE FROM class_bases WHERE class_key = ?1", [key])?;
        for (position, base) in class.bases.iter().enumerate() {
            conn.execute(
                "INSERT INTO class_bases (class_key, position, base_key) VALUES (?1, ?2, ?3)",
                params![key, position, base],
            )?;
        }
    }

    // Methods
    let old_methods = keys_of(conn, "SELECT key FROM methods WHERE class_key = ?1", key)?;
    let new_methods: HashSet<String> = class
        .methods
        .iter()
        .map(|m| format!("{key}.{}", m.name))
        .collect();
    for stale in old_methods.difference(&new_methods) {
        counts.removed += 1;
        conn.execute("DELETE FROM methods WHERE key = ?1", [stale])?;
    }
    for method in &class.methods {
        let method_key = format!("{key}.{}", method.name);
        let existed = key_exists(conn, "methods", &method_key)?;
        let params_json = serde_json::to_string(&method.params)?;
        let changed = conn.execute(
            "INSERT INTO methods (key, class_key, name, params, is_static, is_class_method,
                                  is_property, is_abstract, line)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(key) DO UPDATE SET
                params = excluded.params,
                is_static = excluded.is_static,
                is_class_method = excluded.is_class_method,
                is_property = excluded.is_property,
                is_abstract = excluded.is_abstract,
                line = excluded.line
             WHERE params IS NOT excluded.params
                OR is_static IS NOT excluded.is_static
                OR is_class_method IS NOT excluded.is_class_method
                OR is_property IS NOT excluded.is_property
                OR is_abstract IS NOT excluded.is_abstract
                OR line IS NOT excluded.line",
            params![
                method_key,
                key,
                method.name,
                params_json,
                method.is_static,
                method.is_class_method,
                method.is_property,
                method.is_abstract,
                method.line,
            ],
        )?;
        tally(&mut counts, existed, changed > 0);
    }

    // Attributes
    let old_attrs = keys_of(conn, "SELECT key FROM attributes WHERE class_key = ?1", key)?;
    let new_attrs: HashSet<String> = class
        .attributes
        .iter()
        .map(|a| format!("{key}.{}", a.name))
        .collect();
    for stale in old_attrs.difference(&new_attrs) {
        counts.removed += 1;
        conn.execute("DELETE FROM attributes WHERE key = ?1", [stale])?;
    }
    for attr in &class.attributes {
        let attr_key = format!("{key}.{}", attr.name);
        let existed = key_exists(conn, "attributes", &attr_key)?;
        let changed = conn.execute(
            "INSERT INTO attributes (key, class_key, name, kind, line)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(key) DO UPDATE SET
                kind = excluded.kind,
                line = excluded.line
             WHERE kind IS NOT excluded.kind
                OR line IS NOT excluded.line",
            params![attr_key, key, attr.name, attr.kind.as_str(), attr.line],
        )?;
        tally(&mut counts, existed, changed > 0);
    }

    Ok(counts)
}

fn write_imports(
    conn: &Connection,
    file_key: &str,
    imports: &[ImportDecl],
) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM file_imports WHERE file_key = ?1", [file_key])?;
    let mut stmt = conn.prepare_cached(
        "INSERT INTO file_imports (file_key, position, alias, target, line)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for (position, import) in imports.iter().enumerate() {
        stmt.execute(params![file_key, position, import.alias, import.target, import.line])?;
    }
    Ok(())
}

fn edge_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String)> {
    Ok((row.get(0)?, row.get(1)?))
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("<blob {} bytes>", b.len())),
    }
}

#[async_trait::async_trait]
impl GraphStore for SqliteStore {
    // ── Repositories ───────────────────────────────────────────────

    async fn upsert_repository(&self, repo: &RepositoryRecord) -> crate::error::Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO repositories (key, name, url, git_ref, commit_id, ingested_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(key) DO UPDATE SET
                name = excluded.name,
                url = excluded.url,
                git_ref = excluded.git_ref,
                commit_id = excluded.commit_id,
                ingested_at = excluded.ingested_at",
            params![
                repo.key,
                repo.name,
                repo.url,
                repo.git_ref,
                repo.commit_id,
                repo.ingested_at.to_rfc3339(),
            ],
        )
        .map_err(StoreError::Sqlite)?;
        Ok(())
    }

    async fn get_repository(&self, key: &str) -> crate::error::Result<Option<RepositoryRecord>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT * FROM repositories WHERE key = ?1",
            [key],
            Self::row_to_repository,
        )
        .optional()
        .map_err(|e| StoreError::Sqlite(e).into())
    }

    async fn list_repositories(&self) -> crate::error::Result<Vec<RepositoryRecord>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM repositories ORDER BY key")
            .map_err(StoreError::Sqlite)?;
        let repos = stmt
            .query_map([], Self::row_to_repository)
            .map_err(StoreError::Sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?;
        Ok(repos)
    }

    async fn remove_repository(&self, key: &str) -> crate::error::Result<RemovalCounts> {
        let conn = self.lock();
        let tx = conn.unchecked_transaction().map_err(StoreError::Sqlite)?;

        if !key_exists(&tx, "repositories", key).map_err(StoreError::Sqlite)? {
            return Err(StoreError::NotFound(format!("repository {key}")).into());
        }
        let files_removed = count_of(
            &tx,
            "SELECT COUNT(*) FROM files WHERE repository_key = ?1",
            key,
        )
        .map_err(StoreError::Sqlite)?;
        let nodes_removed = count_of(
            &tx,
            "SELECT COUNT(*) FROM file_nodes n JOIN files f ON f.key = n.file_key
             WHERE f.repository_key = ?1",
            key,
        )
        .map_err(StoreError::Sqlite)?;

        tx.execute("DELETE FROM repositories WHERE key = ?1", [key])
            .map_err(StoreError::Sqlite)?;
        tx.commit().map_err(StoreError::Sqlite)?;

        info!(repository = key, files_removed, nodes_removed, "Repository removed");
        Ok(RemovalCounts {
            files_removed,
            nodes_removed,
        })
    }

    // ── Files ──────────────────────────────────────────────────────

    async fn upsert_file(
        &self,
        file: &FileRecord,
        decls: &FileDeclarations,
    ) -> crate::error::Result<UpsertCounts> {
        let _claim = self.begin_file_write(&file.key)?;
        let conn = self.lock();
        let tx = conn.unchecked_transaction().map_err(StoreError::Sqlite)?;
        let counts = write_file(&tx, file, decls)?;
        tx.commit().map_err(StoreError::Sqlite)?;

        debug!(
            file = %file.key,
            added = counts.added,
            updated = counts.updated,
            removed = counts.removed,
            conflicts = counts.conflicts,
            "File upserted"
        );
        Ok(counts)
    }

    async fn mark_file_failed(&self, file: &FileRecord) -> crate::error::Result<()> {
        let _claim = self.begin_file_write(&file.key)?;
        let conn = self.lock();
        write_file_row(&conn, file).map_err(StoreError::Sqlite)?;
        Ok(())
    }

    async fn mark_files_pending(&self, files: &[FileRecord]) -> crate::error::Result<()> {
        let _claims = files
            .iter()
            .map(|f| self.begin_file_write(&f.key))
            .collect::<Result<Vec<_>, _>>()?;
        let conn = self.lock();
        let tx = conn.unchecked_transaction().map_err(StoreError::Sqlite)?;
        for file in files {
            let mut pending = file.clone();
            pending.status = FileStatus::Pending;
            write_file_row(&tx, &pending).map_err(StoreError::Sqlite)?;
        }
        tx.commit().map_err(StoreError::Sqlite)?;
        Ok(())
    }

    async fn remove_file(&self, file_key: &str) -> crate::error::Result<UpsertCounts> {
        let _claim = self.begin_file_write(file_key)?;
        let conn = self.lock();
        let tx = conn.unchecked_transaction().map_err(StoreError::Sqlite)?;
        let removed = count_of(
            &tx,
            "SELECT COUNT(*) FROM file_nodes WHERE file_key = ?1",
            file_key,
        )
        .map_err(StoreError::Sqlite)?;
        tx.execute("DELETE FROM files WHERE key = ?1", [file_key])
            .map_err(StoreError::Sqlite)?;
        tx.commit().map_err(StoreError::Sqlite)?;
        Ok(UpsertCounts {
            removed,
            ..UpsertCounts::default()
        })
    }

    async fn file_state(&self, file_key: &str) -> crate::error::Result<Option<FileRecord>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT * FROM files WHERE key = ?1",
            [file_key],
            Self::row_to_file,
        )
        .optional()
        .map_err(|e| StoreError::Sqlite(e).into())
    }

    async fn list_files(&self, repository_key: &str) -> crate::error::Result<Vec<FileRecord>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM files WHERE repository_key = ?1 ORDER BY relative_path")
            .map_err(StoreError::Sqlite)?;
        let files = stmt
            .query_map([repository_key], Self::row_to_file)
            .map_err(StoreError::Sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?;
        Ok(files)
    }

    // ── Lookups ────────────────────────────────────────────────────

    async fn resolve_class(&self, key: &str) -> crate::error::Result<Option<ClassView>> {
        let conn = self.lock();
        let classes = Self::query_classes(&conn, "SELECT * FROM classes WHERE key = ?1", key)
            .map_err(StoreError::Sqlite)?;
        Ok(classes.into_iter().next())
    }

    async fn resolve_function(&self, key: &str) -> crate::error::Result<Option<FunctionView>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT * FROM functions WHERE key = ?1",
            [key],
            Self::row_to_function,
        )
        .optional()
        .map_err(|e| StoreError::Sqlite(e).into())
    }

    async fn resolve_module(&self, module_path: &str) -> crate::error::Result<bool> {
        let conn = self.lock();
        let found: bool = conn
            .query_row(
                "SELECT EXISTS(
                    SELECT 1 FROM files
                    WHERE module_path = ?1
                       OR substr(module_path, 1, length(?1) + 1) = ?1 || '.'
                 )",
                [module_path],
                |row| row.get(0),
            )
            .map_err(StoreError::Sqlite)?;
        Ok(found)
    }

    async fn find_method(
        &self,
        class_key: &str,
        name: &str,
    ) -> crate::error::Result<Option<MethodView>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT * FROM methods WHERE class_key = ?1 AND name = ?2",
            params![class_key, name],
            Self::row_to_method,
        )
        .optional()
        .map_err(|e| StoreError::Sqlite(e).into())
    }

    async fn find_attribute(
        &self,
        class_key: &str,
        name: &str,
    ) -> crate::error::Result<Option<AttributeView>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT * FROM attributes WHERE class_key = ?1 AND name = ?2",
            params![class_key, name],
            Self::row_to_attribute,
        )
        .optional()
        .map_err(|e| StoreError::Sqlite(e).into())
    }

    async fn list_classes(&self, repository_key: &str) -> crate::error::Result<Vec<ClassView>> {
        let conn = self.lock();
        let classes = Self::query_classes(
            &conn,
            "SELECT c.* FROM classes c JOIN files f ON f.key = c.file_key
             WHERE f.repository_key = ?1 ORDER BY c.key",
            repository_key,
        )
        .map_err(StoreError::Sqlite)?;
        Ok(classes)
    }

    async fn list_methods(&self, class_key: &str) -> crate::error::Result<Vec<MethodView>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM methods WHERE class_key = ?1 ORDER BY line, name")
            .map_err(StoreError::Sqlite)?;
        let methods = stmt
            .query_map([class_key], Self::row_to_method)
            .map_err(StoreError::Sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?;
        Ok(methods)
    }

    async fn list_attributes(
        &self,
        class_key: &str,
    ) -> crate::error::Result<Vec<AttributeView>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM attributes WHERE class_key = ?1 ORDER BY line, name")
            .map_err(StoreError::Sqlite)?;
        let attrs = stmt
            .query_map([class_key], Self::row_to_attribute)
            .map_err(StoreError::Sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?;
        Ok(attrs)
    }

    async fn file_imports_for_module(
        &self,
        module_path: &str,
    ) -> crate::error::Result<Vec<ImportDecl>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT i.alias, i.target, i.line FROM file_imports i
                 JOIN files f ON f.key = i.file_key
                 WHERE f.module_path = ?1
                 ORDER BY i.file_key, i.position",
            )
            .map_err(StoreError::Sqlite)?;
        let imports = stmt
            .query_map([module_path], |row| {
                Ok(ImportDecl {
                    alias: row.get(0)?,
                    target: row.get(1)?,
                    line: row.get(2)?,
                })
            })
            .map_err(StoreError::Sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?;
        Ok(imports)
    }

    async fn classes_named(&self, name: &str) -> crate::error::Result<Vec<ClassView>> {
        let conn = self.lock();
        let classes = Self::query_classes(
            &conn,
            "SELECT * FROM classes WHERE name = ?1 ORDER BY key",
            name,
        )
        .map_err(StoreError::Sqlite)?;
        Ok(classes)
    }

    async fn functions_named(&self, name: &str) -> crate::error::Result<Vec<FunctionView>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM functions WHERE name = ?1 ORDER BY key")
            .map_err(StoreError::Sqlite)?;
        let functions = stmt
            .query_map([name], Self::row_to_function)
            .map_err(StoreError::Sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?;
        Ok(functions)
    }

    async fn inheritance_edges(
        &self,
        repository_key: Option<&str>,
    ) -> crate::error::Result<Vec<(String, String)>> {
        let conn = self.lock();
        let edges = if let Some(repo) = repository_key {
            let mut stmt = conn
                .prepare(
                    "SELECT b.class_key, b.base_key FROM class_bases b
                     JOIN classes c ON c.key = b.class_key
                     JOIN files f ON f.key = c.file_key
                     WHERE f.repository_key = ?1
                     ORDER BY b.class_key, b.position",
                )
                .map_err(StoreError::Sqlite)?;
            stmt.query_map([repo], edge_row)
                .map_err(StoreError::Sqlite)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(StoreError::Sqlite)?
        } else {
            let mut stmt = conn
                .prepare("SELECT class_key, base_key FROM class_bases ORDER BY class_key, position")
                .map_err(StoreError::Sqlite)?;
            stmt.query_map([], edge_row)
                .map_err(StoreError::Sqlite)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(StoreError::Sqlite)?
        };
        Ok(edges)
    }

    async fn raw_query(&self, sql: &str) -> crate::error::Result<Vec<Map<String, Value>>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(sql).map_err(StoreError::Sqlite)?;
        if !stmt.readonly() {
            return Err(StoreError::ReadOnlyQuery(sql.trim().to_string()).into());
        }

        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();
        let mut rows = stmt.query([]).map_err(StoreError::Sqlite)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(StoreError::Sqlite)? {
            let mut object = Map::new();
            for (i, column) in columns.iter().enumerate() {
                let value = row.get_ref(i).map_err(StoreError::Sqlite)?;
                object.insert(column.clone(), json_value(value));
            }
            out.push(object);
        }
        Ok(out)
    }

    // ── Metrics ────────────────────────────────────────────────────

    async fn stats(&self) -> crate::error::Result<StoreStats> {
        let conn = self.lock();
        let count = |sql: &str| -> crate::error::Result<u64> {
            conn.query_row(sql, [], |row| row.get(0))
                .map_err(|e| StoreError::Sqlite(e).into())
        };

        let db_size_bytes = self
            .db_path
            .as_ref()
            .and_then(|p| std::fs::metadata(p).ok())
            .map_or(0, |m| m.len());

        Ok(StoreStats {
            repositories: count("SELECT COUNT(*) FROM repositories")?,
            files: count("SELECT COUNT(*) FROM files")?,
            files_failed: count(
                "SELECT COUNT(*) FROM files WHERE status IN ('failed', 'timed_out')",
            )?,
            files_pending: count("SELECT COUNT(*) FROM files WHERE status = 'pending'")?,
            classes: count("SELECT COUNT(*) FROM classes")?,
            methods: count("SELECT COUNT(*) FROM methods")?,
            attributes: count("SELECT COUNT(*) FROM attributes")?,
            functions: count("SELECT COUNT(*) FROM functions")?,
            db_size_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use veritas_graphs::{MethodDecl, extract_declarations, parse_python};

    use super::*;
    use crate::error::VeritasError;
    use crate::hierarchy::find_cycles;
    use crate::types::{PYTHON, file_key};

    const REPO: &str = "github.com/acme/widgets@main";

    fn decls(module: &str, source: &str) -> FileDeclarations {
        let path = Path::new("fixture.py");
        let parsed = parse_python(source, path).unwrap();
        extract_declarations(&parsed, path, module, false, None).unwrap()
    }

    fn file(relative_path: &str, module_path: &str) -> FileRecord {
        FileRecord {
            key: file_key(REPO, relative_path),
            repository_key: REPO.to_string(),
            relative_path: relative_path.to_string(),
            module_path: module_path.to_string(),
            language: PYTHON.to_string(),
            last_hash: Some("1".to_string()),
            status: FileStatus::Parsed,
            error: None,
            updated_at: Utc::now(),
        }
    }

    async fn store() -> SqliteStore {
        let store = SqliteStore::in_memory().unwrap();
        store
            .upsert_repository(&RepositoryRecord {
                key: REPO.to_string(),
                name: "widgets".to_string(),
                url: "https://github.com/acme/widgets".to_string(),
                git_ref: "main".to_string(),
                commit_id: None,
                ingested_at: Utc::now(),
            })
            .await
            .unwrap();
        store
    }

    const CACHE_V1: &str = "\
class Cache:
    def __init__(self):
        self.data = {}

    def get(self, key):
        return self.data.get(key)

    def clear(self):
        self.data = {}

def make_cache():
    return Cache()
";

    const CACHE_V2: &str = "\
class Cache:
    def __init__(self):
        self.data = {}

    def get(self, key, default=None):
        return self.data.get(key, default)

    def put(self, key, value):
        self.data[key] = value

def make_cache():
    return Cache()
";

    #[tokio::test]
    async fn upsert_file_is_idempotent() {
        let store = store().await;
        let record = file("cache.py", "cache");
        let d = decls("cache", CACHE_V1);

        let first = store.upsert_file(&record, &d).await.unwrap();
        // class + 3 methods + 1 attribute + 1 function
        assert_eq!(first.added, 6);
        assert_eq!(first.removed, 0);

        let second = store.upsert_file(&record, &d).await.unwrap();
        assert_eq!(second, UpsertCounts::default());

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.classes, 1);
        assert_eq!(stats.methods, 3);
        assert_eq!(stats.attributes, 1);
        assert_eq!(stats.functions, 1);
    }

    #[tokio::test]
    async fn upsert_file_replaces_changed_members() {
        let store = store().await;
        let record = file("cache.py", "cache");
        store
            .upsert_file(&record, &decls("cache", CACHE_V1))
            .await
            .unwrap();

        let counts = store
            .upsert_file(&record, &decls("cache", CACHE_V2))
            .await
            .unwrap();
        assert_eq!(counts.added, 1, "put");
        assert_eq!(counts.updated, 1, "get signature");
        assert_eq!(counts.removed, 1, "clear");

        assert!(store.find_method("cache.Cache", "clear").await.unwrap().is_none());
        let get = store.find_method("cache.Cache", "get").await.unwrap().unwrap();
        assert_eq!(get.params.len(), 2);
        assert!(get.params[1].has_default);
    }

    #[tokio::test]
    async fn dropping_a_class_cascades_to_members() {
        let store = store().await;
        let record = file("cache.py", "cache");
        store
            .upsert_file(&record, &decls("cache", CACHE_V1))
            .await
            .unwrap();

        let counts = store
            .upsert_file(&record, &decls("cache", "def make_cache():\n    return None\n"))
            .await
            .unwrap();
        // class + 3 methods + 1 attribute
        assert_eq!(counts.removed, 5);
        assert!(store.resolve_class("cache.Cache").await.unwrap().is_none());
        assert_eq!(store.stats().await.unwrap().methods, 0);
    }

    #[tokio::test]
    async fn shared_keys_keep_their_first_owner() {
        let store = store().await;
        let vendored = file("vendor/cache.py", "cache");
        let original = file("cache.py", "cache");
        store.upsert_file(&original, &decls("cache", CACHE_V1)).await.unwrap();

        let counts = store.upsert_file(&vendored, &decls("cache", CACHE_V1)).await.unwrap();
        assert_eq!(counts.conflicts, 2);
        assert_eq!(counts.added, 0);

        let class = store.resolve_class("cache.Cache").await.unwrap().unwrap();
        assert_eq!(class.file_key, original.key);
        let state = store.file_state(&vendored.key).await.unwrap().unwrap();
        assert_eq!(state.status, FileStatus::Parsed);
        assert_eq!(state.last_hash, None);

        // Removing the loser leaves the owner's nodes alone.
        let removed = store.remove_file(&vendored.key).await.unwrap();
        assert_eq!(removed.removed, 0);
        assert_eq!(store.list_methods("cache.Cache").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn resolve_method_walks_inherited_chain() {
        let store = store().await;
        store
            .upsert_file(
                &file("shapes.py", "shapes"),
                &decls(
                    "shapes",
                    "\
class Shape:
    def area(self):
        return 0

class Square(Shape):
    def __init__(self, side):
        self.side = side
",
                ),
            )
            .await
            .unwrap();

        let lookup = store.resolve_method("shapes.Square", "area").await.unwrap();
        assert_eq!(lookup.member.unwrap().class_key, "shapes.Shape");
        assert!(lookup.lineage.is_complete());
        assert_eq!(lookup.lineage.classes(), vec!["shapes.Square", "shapes.Shape"]);

        let missing = store.resolve_method("shapes.Square", "draw").await.unwrap();
        assert!(missing.member.is_none());
        assert!(missing.lineage.is_complete());

        let attr = store.resolve_attribute("shapes.Square", "side").await.unwrap();
        assert!(attr.member.is_some());
    }

    #[tokio::test]
    async fn dangling_base_makes_lineage_incomplete() {
        let store = store().await;
        store
            .upsert_file(
                &file("views.py", "views"),
                &decls(
                    "views",
                    "from django.views import View\n\nclass Home(View):\n    def get(self):\n        pass\n",
                ),
            )
            .await
            .unwrap();

        let lookup = store.resolve_method("views.Home", "dispatch").await.unwrap();
        assert!(lookup.member.is_none());
        assert_eq!(lookup.lineage.dangling(), vec!["django.views.View"]);
        assert_eq!(lookup.stopped_at.as_deref(), Some("django.views.View"));
        assert!(!lookup.lineage.is_complete());
    }

    #[tokio::test]
    async fn dangling_base_ends_member_search() {
        let store = store().await;
        store
            .upsert_file(
                &file("m.py", "m"),
                &decls(
                    "m",
                    "\
from ext import External

class A:
    label = 'a'

    def foo(self, x):
        pass

class B(External, A):
    pass

class C(A, External):
    pass
",
                ),
            )
            .await
            .unwrap();

        let shadowed = store.resolve_method("m.B", "foo").await.unwrap();
        assert!(shadowed.member.is_none());
        assert_eq!(shadowed.stopped_at.as_deref(), Some("ext.External"));
        let attr = store.resolve_attribute("m.B", "label").await.unwrap();
        assert!(attr.member.is_none());
        assert_eq!(attr.stopped_at.as_deref(), Some("ext.External"));

        let reached = store.resolve_method("m.C", "foo").await.unwrap();
        assert_eq!(reached.member.unwrap().key, "m.A.foo");
        assert_eq!(reached.stopped_at, None);
    }

    #[tokio::test]
    async fn inheritance_cycle_terminates() {
        let store = store().await;
        store
            .upsert_file(
                &file("a.py", "a"),
                &decls("a", "from b import B\n\nclass A(B):\n    pass\n"),
            )
            .await
            .unwrap();
        store
            .upsert_file(
                &file("b.py", "b"),
                &decls("b", "from a import A\n\nclass B(A):\n    def run(self):\n        pass\n"),
            )
            .await
            .unwrap();

        let lookup = store.resolve_method("a.A", "missing").await.unwrap();
        assert!(lookup.member.is_none());
        assert!(lookup.lineage.cycle);
        assert_eq!(lookup.lineage.classes(), vec!["a.A", "b.B"]);

        let found = store.resolve_method("a.A", "run").await.unwrap();
        assert_eq!(found.member.unwrap().key, "b.B.run");

        let edges = store.inheritance_edges(Some(REPO)).await.unwrap();
        assert_eq!(find_cycles(&edges), vec![vec!["a.A".to_string(), "b.B".to_string()]]);
    }

    #[tokio::test]
    async fn failed_file_keeps_previous_snapshot() {
        let store = store().await;
        let record = file("cache.py", "cache");
        store
            .upsert_file(&record, &decls("cache", CACHE_V1))
            .await
            .unwrap();

        let mut failed = record.clone();
        failed.status = FileStatus::Failed;
        failed.last_hash = Some("2".to_string());
        failed.error = Some("Parse error".to_string());
        store.mark_file_failed(&failed).await.unwrap();

        let state = store.file_state(&record.key).await.unwrap().unwrap();
        assert_eq!(state.status, FileStatus::Failed);
        assert_eq!(state.last_hash.as_deref(), Some("1"));
        assert!(store.find_method("cache.Cache", "get").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn pending_files_are_recorded() {
        let store = store().await;
        store
            .mark_files_pending(&[file("a.py", "a"), file("b.py", "b")])
            .await
            .unwrap();
        let files = store.list_files(REPO).await.unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.status == FileStatus::Pending));
        assert_eq!(store.stats().await.unwrap().files_pending, 2);
    }

    #[tokio::test]
    async fn remove_repository_cascades() {
        let store = store().await;
        store
            .upsert_file(&file("cache.py", "cache"), &decls("cache", CACHE_V1))
            .await
            .unwrap();

        let removed = store.remove_repository(REPO).await.unwrap();
        assert_eq!(removed.files_removed, 1);
        assert_eq!(removed.nodes_removed, 6);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.repositories, 0);
        assert_eq!(stats.files, 0);
        assert_eq!(stats.classes + stats.methods + stats.attributes + stats.functions, 0);

        let err = store.remove_repository(REPO).await.unwrap_err();
        assert!(matches!(err, VeritasError::Store(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn remove_file_reports_owned_nodes() {
        let store = store().await;
        let record = file("cache.py", "cache");
        store
            .upsert_file(&record, &decls("cache", CACHE_V1))
            .await
            .unwrap();
        let counts = store.remove_file(&record.key).await.unwrap();
        assert_eq!(counts.removed, 6);
        assert!(store.file_state(&record.key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_writer_on_same_key_conflicts() {
        let store = store().await;
        let record = file("cache.py", "cache");
        let d = decls("cache", CACHE_V1);

        let claim = store.begin_file_write(&record.key).unwrap();
        let err = store.upsert_file(&record, &d).await.unwrap_err();
        assert!(matches!(
            err,
            VeritasError::Store(StoreError::WriteConflict { .. })
        ));

        // A different key is unaffected.
        store
            .upsert_file(&file("other.py", "other"), &d)
            .await
            .unwrap();

        drop(claim);
        store.upsert_file(&record, &d).await.unwrap();
    }

    #[tokio::test]
    async fn modules_and_imports_resolve() {
        let store = store().await;
        store
            .upsert_file(
                &file("pkg/__init__.py", "pkg"),
                &decls("pkg", "from pkg.core import Cache\n"),
            )
            .await
            .unwrap();
        store
            .upsert_file(&file("pkg/core.py", "pkg.core"), &decls("pkg.core", CACHE_V1))
            .await
            .unwrap();

        assert!(store.resolve_module("pkg").await.unwrap());
        assert!(store.resolve_module("pkg.core").await.unwrap());
        assert!(!store.resolve_module("pk").await.unwrap());

        let imports = store.file_imports_for_module("pkg").await.unwrap();
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].alias.as_deref(), Some("Cache"));
        assert_eq!(imports[0].target, "pkg.core.Cache");

        assert_eq!(store.classes_named("Cache").await.unwrap().len(), 1);
        assert_eq!(store.functions_named("make_cache").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn raw_query_is_read_only() {
        let store = store().await;
        store
            .upsert_file(&file("cache.py", "cache"), &decls("cache", CACHE_V1))
            .await
            .unwrap();

        let rows = store
            .raw_query("SELECT name, line FROM methods ORDER BY line")
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["name"], Value::from("__init__"));
        assert_eq!(rows[0]["line"], Value::from(2));

        let err = store.raw_query("DELETE FROM methods").await.unwrap_err();
        assert!(matches!(err, VeritasError::Store(StoreError::ReadOnlyQuery(_))));
        assert_eq!(store.stats().await.unwrap().methods, 3);
    }

    fn method(name: &str) -> MethodDecl {
        MethodDecl {
            name: name.to_string(),
            params: Vec::new(),
            is_static: false,
            is_class_method: false,
            is_property: false,
            is_abstract: false,
            line: 1,
        }
    }

    proptest! {
        #[test]
        fn second_upsert_changes_nothing(
            names in proptest::collection::hash_set("[a-z]{1,8}", 0..12),
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let store = store().await;
                let record = file("m.py", "m");
                let d = FileDeclarations {
                    module_path: "m".to_string(),
                    classes: vec![ClassDecl {
                        name: "K".to_string(),
                        qualified_name: "m.K".to_string(),
                        bases: vec!["m.Base".to_string()],
                        is_abstract: false,
                        methods: names.iter().map(|n| method(n)).collect(),
                        attributes: Vec::new(),
                        line: 1,
                    }],
                    functions: Vec::new(),
                    imports: Vec::new(),
                };
                let first = store.upsert_file(&record, &d).await.unwrap();
                assert_eq!(first.added as usize, d.node_count());
                let second = store.upsert_file(&record, &d).await.unwrap();
                assert_eq!(second, UpsertCounts::default());
            });
        }
    }
}
