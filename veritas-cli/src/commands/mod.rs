pub mod ingest;
pub mod init;
pub mod list;
pub mod query;
pub mod remove;
pub mod status;
pub mod validate;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Subcommand;

use veritas_core::config::{CONFIG_DIR, VeritasConfig, config_path};
use veritas_core::store::sqlite::SqliteStore;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a Veritas workspace (.veritas/ with config and database)
    Init(init::InitArgs),
    /// Ingest a repository (local path or git URL) into the knowledge graph
    Ingest(ingest::IngestArgs),
    /// Validate a Python script against the knowledge graph
    Validate(validate::ValidateArgs),
    /// List ingested repositories
    Repos(list::ReposArgs),
    /// List classes of a repository
    Classes(list::ClassesArgs),
    /// List methods and attributes of a class
    Methods(list::MethodsArgs),
    /// Run a read-only SQL query against the graph database
    Query(query::QueryArgs),
    /// Remove a repository and everything it owns
    Remove(remove::RemoveArgs),
    /// Show knowledge-graph statistics
    Status(status::StatusArgs),
}

pub async fn run(cmd: Command, quiet: bool) -> anyhow::Result<()> {
    match cmd {
        Command::Init(args) => init::run(args),
        Command::Ingest(args) => ingest::run(args, quiet).await,
        Command::Validate(args) => validate::run(args).await,
        Command::Repos(args) => list::repos(args).await,
        Command::Classes(args) => list::classes(args).await,
        Command::Methods(args) => list::methods(args).await,
        Command::Query(args) => query::run(args).await,
        Command::Remove(args) => remove::run(args).await,
        Command::Status(args) => status::run(args).await,
    }
}

/// Returned by `validate --deny-hallucinations` when the report has any.
#[derive(Debug)]
pub struct HallucinationsFound(pub usize);

impl std::fmt::Display for HallucinationsFound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} hallucinated usage(s) found", self.0)
    }
}

impl std::error::Error for HallucinationsFound {}

/// An initialized workspace with its config and open store.
#[derive(Debug)]
pub struct Workspace {
    pub root: PathBuf,
    pub config: VeritasConfig,
    pub store: SqliteStore,
}

/// Database location for a workspace root, honoring `[store] path`.
pub fn resolve_db_path(root: &Path, config: &VeritasConfig) -> PathBuf {
    config.db_path(root)
}

/// Load the config and open the database of the workspace at `path`.
pub fn open_workspace(path: &Path) -> anyhow::Result<Workspace> {
    let root = std::fs::canonicalize(path)
        .with_context(|| format!("Cannot resolve path: {}", path.display()))?;

    let config_file = config_path(&root);
    if !root.join(CONFIG_DIR).exists() || !config_file.exists() {
        anyhow::bail!(
            "Veritas is not initialized in {}. Run `veritas init` first.",
            root.display()
        );
    }

    let config = VeritasConfig::load_required(&config_file)
        .map_err(veritas_core::error::VeritasError::from)
        .with_context(|| format!("Cannot load config: {}", config_file.display()))?;

    let db_path = resolve_db_path(&root, &config);
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("Cannot open database: {}", db_path.display()))?;

    Ok(Workspace {
        root,
        config,
        store,
    })
}
