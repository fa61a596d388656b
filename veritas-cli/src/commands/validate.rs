use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use veritas_core::report::{render_text, to_json};
use veritas_core::validate::{INLINE_SCRIPT, Validator};

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Python script to validate
    #[arg(required_unless_present = "code", conflicts_with = "code")]
    pub script: Option<PathBuf>,

    /// Validate this source text instead of a file
    #[arg(long)]
    pub code: Option<String>,

    /// Workspace directory (default: current directory)
    #[arg(long, default_value = ".")]
    pub path: PathBuf,

    /// Output format: text, json
    #[arg(long, default_value = "text")]
    pub format: String,

    /// Exit with status 10 when any usage is HALLUCINATED
    #[arg(long)]
    pub deny_hallucinations: bool,
}

pub async fn run(args: ValidateArgs) -> anyhow::Result<()> {
    let workspace = super::open_workspace(&args.path)?;
    let validator = Validator::new(&workspace.store, workspace.config.validate.clone());

    let report = match (&args.script, &args.code) {
        (Some(script), _) => validator
            .validate_script(script)
            .await
            .with_context(|| format!("Cannot validate {}", script.display()))?,
        (None, Some(code)) => validator
            .validate_text(code, INLINE_SCRIPT)
            .await
            .context("Cannot validate inline script")?,
        (None, None) => anyhow::bail!("Nothing to validate: pass a script path or --code"),
    };

    match args.format.as_str() {
        "json" => println!("{}", to_json(&report)?),
        _ => print!("{}", render_text(&report)),
    }

    if args.deny_hallucinations && report.summary.hallucinated > 0 {
        return Err(super::HallucinationsFound(report.summary.hallucinated).into());
    }
    Ok(())
}
