/// Top-level Veritas error type.
///
/// All fallible operations in `veritas-core` return [`Result<T, VeritasError>`](Result).
/// Each variant wraps a layer-specific error enum so callers can match on
/// the error source without losing type information.
#[derive(thiserror::Error, Debug)]
pub enum VeritasError {
    /// Error from the graph store layer (`SQLite` operations, schema).
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Error while ingesting a repository (fetching, walking files).
    #[error("Ingestion error: {0}")]
    Ingest(#[from] IngestError),

    /// Error while validating a target script.
    #[error("Validation error: {0}")]
    Validate(#[from] ValidateError),

    /// Error from the extraction engine (tree-sitter parsing, budgets).
    #[error("Extraction error: {0}")]
    Graph(#[from] veritas_graphs::GraphError),

    /// Error in configuration parsing or validation.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors from the SQLite-backed graph store.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Underlying `SQLite` operation failed.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Another writer currently holds this file key.
    #[error("Concurrent write in progress for {file_key}")]
    WriteConflict { file_key: String },

    /// A referenced record was not found in the store.
    #[error("Not found: {0}")]
    NotFound(String),

    /// `raw_query` was handed a statement that can modify the database.
    #[error("Only read-only statements are accepted: {0}")]
    ReadOnlyQuery(String),

    /// JSON serialization/deserialization of stored columns failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors during repository ingestion that abort the whole run.
///
/// Per-file problems (parse failures, budgets) never surface here; they are
/// recorded on the file and listed in the ingest report.
#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    /// The repository could not be fetched (clone, checkout, missing path).
    #[error("Fetch failed for {url}: {message}")]
    Fetch { url: String, message: String },

    /// An include/exclude glob pattern is malformed.
    #[error("Invalid glob pattern `{pattern}`: {message}")]
    Pattern { pattern: String, message: String },

    /// Filesystem I/O error while walking the repository.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The background extraction task panicked or was aborted.
    #[error("Extraction task failed: {0}")]
    Task(String),
}

/// Errors while validating a target script.
#[derive(thiserror::Error, Debug)]
pub enum ValidateError {
    /// The script file could not be read.
    #[error("Cannot read script {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
}

/// Errors in Veritas configuration parsing and validation.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The configuration file does not exist at the expected path.
    #[error("Config file not found: {0}")]
    NotFound(String),

    /// Configuration values are present but semantically invalid.
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// Configuration file syntax could not be parsed (TOML error).
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Convenience alias for `Result<T, VeritasError>`.
pub type Result<T> = std::result::Result<T, VeritasError>;
