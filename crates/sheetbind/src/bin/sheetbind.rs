use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use sheetbind::{
    ConfigBundleResolver, HiddenMetadata, InvoiceData, MetadataFallbackResolver, ModeFlags,
    RecordingSink, ResolvedBundle, ResolvedMetadata, RunOptions, RunReport, RunStatus, SinkEvent,
    TableResolution, run_sheets,
};
use sheetbind_spec::ConfigBundle;
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "sheetbind",
    about = "Resolve invoice sheet configs against invoice data",
    version
)]
struct Cli {
    #[command(flatten)]
    input: Input,

    /// Log filter directive (e.g. `debug`, `sheetbind=info`). Defaults to
    /// `RUST_LOG`, then `warn`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct Input {
    /// Config bundle (.json, .yaml or .yml).
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Invoice data JSON.
    #[arg(long, short = 'i', global = true)]
    invoice: Option<PathBuf>,

    /// Render in DAF mode.
    #[arg(long, global = true)]
    daf: bool,

    /// Render in custom mode.
    #[arg(long, global = true)]
    custom: bool,

    /// Pallet count for footers without their own.
    #[arg(long, global = true, default_value_t = 0)]
    pallets: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the resolved bundles and rows of one sheet.
    Resolve {
        sheet: String,
        /// Table key for processed-table sources.
        #[arg(long)]
        table: Option<String>,
    },
    /// Print the resolved invoice number, reference and date.
    Metadata,
    /// Process every configured sheet and print the run report.
    Run {
        /// Include everything the sheets rendered, not just the report.
        #[arg(long)]
        events: bool,
    },
}

impl Input {
    fn load(&self) -> Result<(ConfigBundle, InvoiceData, RunOptions)> {
        let config_path = self.config.as_ref().context("--config is required")?;
        let invoice_path = self.invoice.as_ref().context("--invoice is required")?;
        let config = ConfigBundle::load(config_path)
            .with_context(|| format!("failed to load {}", config_path.display()))?;
        let invoice = InvoiceData::load(invoice_path)
            .with_context(|| format!("failed to load {}", invoice_path.display()))?;
        let options =
            RunOptions::new(ModeFlags::new(self.daf, self.custom)).with_pallets(self.pallets);
        Ok((config, invoice, options))
    }
}

fn init_tracing(directive: Option<&str>) -> Result<()> {
    let filter = match directive {
        Some(directive) => EnvFilter::try_new(directive)
            .with_context(|| format!("invalid log filter `{directive}`"))?,
        None => EnvFilter::builder()
            .with_default_directive(Level::WARN.into())
            .from_env_lossy(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

#[derive(Serialize)]
struct SheetOutput<'a> {
    bundles: ResolvedBundle<'a>,
    table: TableResolution,
}

#[derive(Serialize)]
struct MetadataOutput {
    resolved: ResolvedMetadata,
    hidden_sheet: HiddenMetadata,
}

#[derive(Serialize)]
struct RunOutput<'a> {
    report: &'a RunReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    events: Option<&'a [SinkEvent]>,
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref())?;
    let (config, invoice, options) = cli.input.load()?;

    match cli.command {
        Command::Resolve { sheet, table } => {
            let resolver = ConfigBundleResolver::new(&config, &sheet, &invoice, &options);
            let bundle = resolver.resolve(table.as_deref())?;
            let resolution = resolver.resolve_table(table.as_deref())?;
            print_json(&SheetOutput {
                bundles: bundle,
                table: resolution,
            })?;
        }
        Command::Metadata => {
            let resolver = MetadataFallbackResolver::new(&invoice);
            print_json(&MetadataOutput {
                resolved: resolver.resolve(),
                hidden_sheet: resolver.side_channel(),
            })?;
        }
        Command::Run { events } => {
            let mut sink = RecordingSink::new();
            let report = run_sheets(&config, &invoice, &options, &mut sink);
            print_json(&RunOutput {
                report: &report,
                events: events.then_some(sink.events.as_slice()),
            })?;
            if report.status != RunStatus::Success {
                return Ok(ExitCode::FAILURE);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
