use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use sheetbind_spec::{ConfigBundle, ConfigIssue, generate_schema_json_pretty};

#[derive(Parser, Debug)]
#[command(
    name = "sheetbind-lint",
    about = "Validate sheetbind config bundles",
    version
)]
struct Cli {
    /// Config bundle files (.json, .yaml or .yml).
    #[arg(required_unless_present = "schema")]
    files: Vec<PathBuf>,

    /// Emit a machine-readable JSON report instead of text.
    #[arg(long)]
    json: bool,

    /// Print the bundle JSON Schema and exit.
    #[arg(long)]
    schema: bool,
}

#[derive(Serialize)]
struct FileReport {
    file: String,
    ok: bool,
    issues: Vec<ConfigIssue>,
}

fn lint_file(path: &PathBuf) -> Result<FileReport> {
    let bundle = ConfigBundle::load(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    let issues = match bundle.validate() {
        Ok(()) => Vec::new(),
        Err(err) => err.into_issues(),
    };
    Ok(FileReport {
        file: path.display().to_string(),
        ok: issues.is_empty(),
        issues,
    })
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    if cli.schema {
        println!("{}", generate_schema_json_pretty());
        return Ok(ExitCode::SUCCESS);
    }

    let mut reports = Vec::with_capacity(cli.files.len());
    for path in &cli.files {
        reports.push(lint_file(path)?);
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            if report.ok {
                println!("{}: ok", report.file);
            } else {
                println!("{}: {} issue(s)", report.file, report.issues.len());
                for issue in &report.issues {
                    println!("  - {issue}");
                }
            }
        }
    }

    if reports.iter().all(|r| r.ok) {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
