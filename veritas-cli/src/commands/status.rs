use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use veritas_core::store::GraphStore;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Workspace directory (default: current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

pub async fn run(args: StatusArgs) -> anyhow::Result<()> {
    let workspace = super::open_workspace(&args.path)?;
    let store = &workspace.store;
    let stats = store.stats().await.context("Failed to read store stats")?;

    println!("Veritas status for {}", workspace.root.display());
    println!();
    println!(
        "  Database: {}",
        super::resolve_db_path(&workspace.root, &workspace.config).display()
    );
    if stats.db_size_bytes > 0 {
        println!("  Size:     {}", format_bytes(stats.db_size_bytes));
    }
    println!();

    println!("  Repositories: {}", stats.repositories);
    println!(
        "  Files:        {} ({} failed, {} pending)",
        stats.files, stats.files_failed, stats.files_pending
    );
    println!();
    println!("  Nodes:");
    println!("    {:<12} {:>8}", "classes", stats.classes);
    println!("    {:<12} {:>8}", "methods", stats.methods);
    println!("    {:<12} {:>8}", "attributes", stats.attributes);
    println!("    {:<12} {:>8}", "functions", stats.functions);

    let edges = store.inheritance_edges(None).await?;
    let cycles = veritas_core::hierarchy::find_cycles(&edges);
    if !cycles.is_empty() {
        println!();
        println!("  Inheritance cycles ({}):", cycles.len());
        for cycle in &cycles {
            println!("    - {}", cycle.join(" -> "));
        }
    }
    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1_048_576), "3.0 MB");
    }
}
