use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Context;
use clap::Args;
use tracing::warn;

use veritas_core::fetch::{AutoFetcher, DEFAULT_REF};
use veritas_core::ingest::Ingestor;
use veritas_core::progress::IndicatifReporter;
use veritas_core::types::IngestReport;

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Repository to ingest: a local directory or a git URL
    pub repository: String,

    /// Branch, tag or commit to ingest
    #[arg(long = "ref", default_value = DEFAULT_REF)]
    pub git_ref: String,

    /// Workspace directory (default: current directory)
    #[arg(long, default_value = ".")]
    pub path: PathBuf,

    /// Extraction threads (overrides `[ingest] workers`)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Output format: text, json
    #[arg(long, default_value = "text")]
    pub format: String,
}

pub async fn run(args: IngestArgs, quiet: bool) -> anyhow::Result<()> {
    let mut workspace = super::open_workspace(&args.path)?;
    if let Some(workers) = args.workers {
        workspace.config.ingest.workers = workers;
    }

    let visible = !quiet && std::io::stderr().is_terminal();
    let ingestor = Ingestor::new(workspace.config.clone())
        .with_progress(Arc::new(IndicatifReporter::new(visible)));

    // Ctrl-C stops at the next file boundary; unprocessed files stay pending.
    let cancel = ingestor.cancel_flag();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing files in flight");
            cancel.store(true, Ordering::Relaxed);
        }
    });

    let result = ingestor
        .ingest(&workspace.store, &AutoFetcher::default(), &args.repository, &args.git_ref)
        .await;
    interrupt.abort();
    let report = result.with_context(|| format!("Ingestion of {} failed", args.repository))?;

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_text(&report),
    }
    Ok(())
}

fn print_text(report: &IngestReport) {
    let verb = if report.cancelled { "partially ingested" } else { "ingested" };
    println!("{} {verb}", report.repository_key);
    println!();
    println!("  Files:     {} total", report.files_total);
    println!("    parsed     {:>6}", report.files_parsed);
    println!("    unchanged  {:>6}", report.files_unchanged);
    println!("    failed     {:>6}", report.files_failed);
    println!("    pending    {:>6}", report.files_pending);
    println!("    removed    {:>6}", report.files_removed);
    println!(
        "  Nodes:     +{} ~{} -{}",
        report.nodes_added, report.nodes_updated, report.nodes_removed
    );
    println!("  Duration:  {} ms", report.duration_ms);

    if !report.failures.is_empty() {
        println!();
        println!("  Failures ({}):", report.failures.len());
        for failure in &report.failures {
            println!(
                "    - {} [{}]: {}",
                failure.relative_path, failure.status, failure.message
            );
        }
    }
    if !report.warnings.is_empty() {
        println!();
        println!("  Warnings ({}):", report.warnings.len());
        for warning in &report.warnings {
            println!("    - {warning}");
        }
    }
}
