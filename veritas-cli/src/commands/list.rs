use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use veritas_core::store::GraphStore;
use veritas_graphs::render_params;

#[derive(Args, Debug)]
pub struct ReposArgs {
    /// Workspace directory (default: current directory)
    #[arg(long, default_value = ".")]
    pub path: PathBuf,

    /// Output format: text, json
    #[arg(long, default_value = "text")]
    pub format: String,
}

#[derive(Args, Debug)]
pub struct ClassesArgs {
    /// Repository key, as shown by `veritas repos`
    pub repository: String,

    /// Workspace directory (default: current directory)
    #[arg(long, default_value = ".")]
    pub path: PathBuf,

    /// Output format: text, json
    #[arg(long, default_value = "text")]
    pub format: String,
}

#[derive(Args, Debug)]
pub struct MethodsArgs {
    /// Fully-qualified class key (e.g. `pkg.module.Class`)
    pub class: String,

    /// Workspace directory (default: current directory)
    #[arg(long, default_value = ".")]
    pub path: PathBuf,

    /// Output format: text, json
    #[arg(long, default_value = "text")]
    pub format: String,
}

pub async fn repos(args: ReposArgs) -> anyhow::Result<()> {
    let workspace = super::open_workspace(&args.path)?;
    let repos = workspace
        .store
        .list_repositories()
        .await
        .context("Failed to list repositories")?;

    if args.format == "json" {
        println!("{}", serde_json::to_string_pretty(&repos)?);
        return Ok(());
    }
    if repos.is_empty() {
        println!("No repositories ingested yet. Run `veritas ingest <repository>`.");
        return Ok(());
    }
    for repo in &repos {
        let commit = repo
            .commit_id
            .as_deref()
            .map_or("(no commit)", |c| &c[..c.len().min(12)]);
        println!(
            "{:<48} {:<12} {}",
            repo.key,
            commit,
            repo.ingested_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

pub async fn classes(args: ClassesArgs) -> anyhow::Result<()> {
    let workspace = super::open_workspace(&args.path)?;
    if workspace.store.get_repository(&args.repository).await?.is_none() {
        anyhow::bail!(
            "Repository not found: {}. Run `veritas repos` to list ingested repositories.",
            args.repository
        );
    }
    let classes = workspace
        .store
        .list_classes(&args.repository)
        .await
        .context("Failed to list classes")?;

    if args.format == "json" {
        println!("{}", serde_json::to_string_pretty(&classes)?);
        return Ok(());
    }
    for class in &classes {
        let bases = if class.bases.is_empty() {
            String::new()
        } else {
            format!("({})", class.bases.join(", "))
        };
        let marker = if class.is_abstract { "  [abstract]" } else { "" };
        println!("{}{bases}{marker}", class.key);
    }
    println!();
    println!("{} class(es)", classes.len());
    Ok(())
}

pub async fn methods(args: MethodsArgs) -> anyhow::Result<()> {
    let workspace = super::open_workspace(&args.path)?;
    let store = &workspace.store;
    let Some(class) = store.resolve_class(&args.class).await? else {
        anyhow::bail!("Class not found: {}", args.class);
    };
    let methods = store.list_methods(&class.key).await?;
    let attributes = store.list_attributes(&class.key).await?;

    if args.format == "json" {
        let value = serde_json::json!({
            "class": class,
            "methods": methods,
            "attributes": attributes,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("{}", class.key);
    if !class.bases.is_empty() {
        println!("  Bases: {}", class.bases.join(", "));
    }
    println!();
    println!("  Methods ({}):", methods.len());
    for method in &methods {
        let mut tags = Vec::new();
        if method.is_static {
            tags.push("static");
        }
        if method.is_class_method {
            tags.push("classmethod");
        }
        if method.is_property {
            tags.push("property");
        }
        if method.is_abstract {
            tags.push("abstract");
        }
        let tags = if tags.is_empty() {
            String::new()
        } else {
            format!("  [{}]", tags.join(", "))
        };
        println!("    {}{}{tags}", method.name, render_params(&method.params));
    }
    println!();
    println!("  Attributes ({}):", attributes.len());
    for attr in &attributes {
        println!("    {:<24} {}", attr.name, attr.kind.as_str());
    }
    Ok(())
}
