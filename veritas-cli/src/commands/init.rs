use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use veritas_core::config::{CONFIG_DIR, VeritasConfig, config_path};
use veritas_core::store::sqlite::SqliteStore;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Workspace directory (default: current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Custom database location
    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Overwrite an existing config file with defaults
    #[arg(long)]
    pub force: bool,
}

pub fn run(args: InitArgs) -> anyhow::Result<()> {
    let root = std::fs::canonicalize(&args.path)
        .with_context(|| format!("Cannot resolve path: {}", args.path.display()))?;

    let config_file = config_path(&root);
    let mut config = if config_file.exists() && !args.force {
        VeritasConfig::load(&config_file)
            .map_err(veritas_core::error::VeritasError::from)
            .with_context(|| format!("Cannot load config: {}", config_file.display()))?
    } else {
        VeritasConfig::default()
    };
    if let Some(db_path) = args.db_path {
        config.store.path = db_path;
    }

    std::fs::create_dir_all(root.join(CONFIG_DIR))
        .with_context(|| format!("Cannot create {}", root.join(CONFIG_DIR).display()))?;
    let text = config
        .to_toml()
        .map_err(veritas_core::error::VeritasError::from)
        .context("Cannot serialize config")?;
    std::fs::write(&config_file, text)
        .with_context(|| format!("Cannot write config: {}", config_file.display()))?;

    let db_path = super::resolve_db_path(&root, &config);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create {}", parent.display()))?;
    }
    SqliteStore::open(&db_path)
        .with_context(|| format!("Cannot open database: {}", db_path.display()))?;

    println!("Veritas initialized in {}", root.display());
    println!("  Config:   {}", config_file.display());
    println!("  Database: {}", db_path.display());
    Ok(())
}
