/// Current schema version.
pub const SCHEMA_VERSION: &str = "1";

/// Full SQL schema for the Veritas `SQLite` database.
///
/// Ownership cascades: repository → files → classes/functions/imports →
/// methods/attributes/bases. Base keys are not foreign keys since an
/// inheritance edge may point at a class that was never ingested.
pub const SCHEMA_SQL: &str = r"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS veritas_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS repositories (
    key TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    url TEXT NOT NULL,
    git_ref TEXT NOT NULL,
    commit_id TEXT,
    ingested_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS files (
    key TEXT PRIMARY KEY,
    repository_key TEXT NOT NULL REFERENCES repositories(key) ON DELETE CASCADE,
    relative_path TEXT NOT NULL,
    module_path TEXT NOT NULL,
    language TEXT NOT NULL,
    last_hash TEXT,
    status TEXT NOT NULL,
    error TEXT,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_files_repository ON files(repository_key);
CREATE INDEX IF NOT EXISTS idx_files_module ON files(module_path);

CREATE TABLE IF NOT EXISTS classes (
    key TEXT PRIMARY KEY,
    file_key TEXT NOT NULL REFERENCES files(key) ON DELETE CASCADE,
    name TEXT NOT NULL,
    module_path TEXT NOT NULL,
    is_abstract INTEGER NOT NULL DEFAULT 0,
    line INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_classes_file ON classes(file_key);
CREATE INDEX IF NOT EXISTS idx_classes_name ON classes(name);

-- Class ─INHERITS→ Class, in declaration order (may dangle)
CREATE TABLE IF NOT EXISTS class_bases (
    class_key TEXT NOT NULL REFERENCES classes(key) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    base_key TEXT NOT NULL,
    PRIMARY KEY (class_key, position)
);
CREATE INDEX IF NOT EXISTS idx_class_bases_base ON class_bases(base_key);

CREATE TABLE IF NOT EXISTS methods (
    key TEXT PRIMARY KEY,
    class_key TEXT NOT NULL REFERENCES classes(key) ON DELETE CASCADE,
    name TEXT NOT NULL,
    params TEXT NOT NULL DEFAULT '[]',
    is_static INTEGER NOT NULL DEFAULT 0,
    is_class_method INTEGER NOT NULL DEFAULT 0,
    is_property INTEGER NOT NULL DEFAULT 0,
    is_abstract INTEGER NOT NULL DEFAULT 0,
    line INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_methods_class ON methods(class_key);

CREATE TABLE IF NOT EXISTS attributes (
    key TEXT PRIMARY KEY,
    class_key TEXT NOT NULL REFERENCES classes(key) ON DELETE CASCADE,
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    line INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_attributes_class ON attributes(class_key);

CREATE TABLE IF NOT EXISTS functions (
    key TEXT PRIMARY KEY,
    file_key TEXT NOT NULL REFERENCES files(key) ON DELETE CASCADE,
    name TEXT NOT NULL,
    module_path TEXT NOT NULL,
    params TEXT NOT NULL DEFAULT '[]',
    line INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_functions_file ON functions(file_key);
CREATE INDEX IF NOT EXISTS idx_functions_name ON functions(name);

-- Import table of each file, used to follow package re-exports
CREATE TABLE IF NOT EXISTS file_imports (
    file_key TEXT NOT NULL REFERENCES files(key) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    alias TEXT,
    target TEXT NOT NULL,
    line INTEGER NOT NULL,
    PRIMARY KEY (file_key, position)
);
";

/// Projected views for `raw_query` users.
pub const VIEWS_SQL: &str = r"
-- Inheritance edges with a flag for dangling bases
CREATE VIEW IF NOT EXISTS inheritance AS
SELECT
    b.class_key,
    b.base_key,
    b.position,
    EXISTS (SELECT 1 FROM classes c WHERE c.key = b.base_key) AS resolved
FROM class_bases b;

-- Every graph node with its owning file
CREATE VIEW IF NOT EXISTS file_nodes AS
SELECT file_key, 'class' AS kind, key FROM classes
UNION ALL
SELECT file_key, 'function' AS kind, key FROM functions
UNION ALL
SELECT c.file_key, 'method' AS kind, m.key FROM methods m JOIN classes c ON c.key = m.class_key
UNION ALL
SELECT c.file_key, 'attribute' AS kind, a.key FROM attributes a JOIN classes c ON c.key = a.class_key;
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_executes_on_in_memory_sqlite() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        conn.execute_batch(SCHEMA_SQL).unwrap();
        conn.execute_batch(VIEWS_SQL).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        for table in [
            "veritas_meta",
            "repositories",
            "files",
            "classes",
            "class_bases",
            "methods",
            "attributes",
            "functions",
            "file_imports",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA_SQL).unwrap();
        conn.execute_batch(SCHEMA_SQL).unwrap();
        conn.execute_batch(VIEWS_SQL).unwrap();
        conn.execute_batch(VIEWS_SQL).unwrap();
    }
}
