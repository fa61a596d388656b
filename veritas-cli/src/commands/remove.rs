use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use veritas_core::store::GraphStore;

#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Repository key, as shown by `veritas repos`
    pub repository: String,

    /// Workspace directory (default: current directory)
    #[arg(long, default_value = ".")]
    pub path: PathBuf,
}

pub async fn run(args: RemoveArgs) -> anyhow::Result<()> {
    let workspace = super::open_workspace(&args.path)?;
    let counts = workspace
        .store
        .remove_repository(&args.repository)
        .await
        .with_context(|| format!("Cannot remove {}", args.repository))?;

    println!("Removed {}", args.repository);
    println!("  Files: {}", counts.files_removed);
    println!("  Nodes: {}", counts.nodes_removed);
    Ok(())
}
