use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use serde_json::{Map, Value};

use veritas_core::store::GraphStore;

#[derive(Args, Debug)]
pub struct QueryArgs {
    /// Read-only SQL statement (SELECT, WITH, read-only PRAGMA)
    pub sql: String,

    /// Workspace directory (default: current directory)
    #[arg(long, default_value = ".")]
    pub path: PathBuf,

    /// Output format: text, json
    #[arg(long, default_value = "text")]
    pub format: String,
}

pub async fn run(args: QueryArgs) -> anyhow::Result<()> {
    let workspace = super::open_workspace(&args.path)?;
    let rows = workspace
        .store
        .raw_query(&args.sql)
        .await
        .context("Query failed")?;

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&rows)?),
        _ => print_table(&rows),
    }
    Ok(())
}

fn print_table(rows: &[Map<String, Value>]) {
    let Some(first) = rows.first() else {
        println!("(no rows)");
        return;
    };
    let columns: Vec<&String> = first.keys().collect();
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| columns.iter().map(|c| cell(row.get(*c))).collect())
        .collect();
    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| {
            cells
                .iter()
                .map(|r| r[i].chars().count())
                .chain(std::iter::once(c.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |values: Vec<&str>| {
        values
            .iter()
            .zip(&widths)
            .map(|(v, &w)| format!("{v:<w$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };
    println!("{}", line(columns.iter().map(|c| c.as_str()).collect()));
    println!(
        "{}",
        widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("  ")
    );
    for row in &cells {
        println!("{}", line(row.iter().map(String::as_str).collect()));
    }
    println!();
    println!("{} row(s)", rows.len());
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "NULL".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
