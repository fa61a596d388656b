use clap::Parser;

use veritas_core::error::{ConfigError, IngestError, StoreError, VeritasError};

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "veritas",
    version,
    about = "Build a knowledge graph of Python repositories and catch hallucinated API usage"
)]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,
}

/// Classify an error into an exit code.
///
///   0  — success
///   1  — general/unknown error
///   2  — configuration error
///   3  — workspace, repository or script not found
///   4  — database error
///   10 — hallucinations found with `--deny-hallucinations`
fn classify_exit_code(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<commands::HallucinationsFound>().is_some() {
        return 10;
    }
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<VeritasError>() {
            return match e {
                VeritasError::Config(_) => 2,
                VeritasError::Store(StoreError::NotFound(_))
                | VeritasError::Ingest(IngestError::Fetch { .. })
                | VeritasError::Validate(_) => 3,
                VeritasError::Store(_) => 4,
                _ => 1,
            };
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return 2;
        }
    }

    let lower = format!("{err:#}").to_lowercase();
    if lower.contains("not initialized") || lower.contains("cannot resolve path") {
        3
    } else if lower.contains("config") {
        2
    } else if lower.contains("database") || lower.contains("sqlite") {
        4
    } else {
        1
    }
}

fn main() {
    let cli = Cli::parse();

    let filter = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (_, 0) => "warn",
        (_, 1) => "info",
        (_, 2) => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: Failed to create runtime: {e}");
            std::process::exit(1);
        }
    };

    match runtime.block_on(commands::run(cli.command, cli.quiet)) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(classify_exit_code(&e));
        }
    }
}
