//! `cryptzone` CLI: runs the encrypted-table round trip for each storage format.
//!
//! For every format a fresh warehouse session is opened, a basic table and an
//! encrypted table are created, a 128-bit key zones the encrypted table's
//! directory, the dataset is written and read back, and the session is torn
//! down again.

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod config;

use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::builder::FalseyValueParser;
use clap::{ArgAction, Parser, Subcommand};
use cryptzone_core::catalog::{CreateTable, SkipList, TableDescriptor};
use cryptzone_core::codec::{CodecRegistry, StorageFormat};
use cryptzone_core::error::{CatalogError, WarehouseError};
use cryptzone_core::types::Dataset;
use cryptzone_core::verify::{VerificationOutcome, scenarios};
use cryptzone_core::warehouse::Warehouse;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{StorageKind, SuiteConfig, default_formats};

const BASIC_TABLE: &str = "junit_unparted_basic";
const ENCRYPTED_TABLE: &str = "encrypted_table";
const ENCRYPTED_DIR: &str = "encryptedTable";

// ── ANSI color helpers ───────────────────────────────────────────────

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";

// ── CLI structure ────────────────────────────────────────────────────

/// Encrypted-zone round-trip verification.
#[derive(Parser)]
#[command(
    name = "cryptzone",
    version,
    about = "Write a dataset into an encrypted zone in every storage format and read it back",
    long_about = None,
    after_help = "Environment variables:\n  \
        CRYPTZONE_STORAGE      memory or local (default: memory)\n  \
        CRYPTZONE_ROOT         storage root for local storage\n  \
        CRYPTZONE_LOG_LEVEL    log filter (default: warn)\n  \
        CRYPTZONE_LOG_JSON     emit logs as JSON\n  \
        CRYPTZONE_ENCRYPTION   whether zones encrypt (default: true)\n  \
        CRYPTZONE_KEY_BITS     zone key length (default: 128)\n  \
        CRYPTZONE_DISABLED     skip-list, e.g. parquet:read_*,orc:*\n\n\
        Examples:\n  \
        cryptzone run\n  \
        cryptzone run --format textfile,rcfile --key-bits 256\n  \
        cryptzone --storage local --root ./data run --json"
)]
struct Cli {
    /// Storage backend.
    #[arg(long, env = "CRYPTZONE_STORAGE", value_enum, default_value = "memory")]
    storage: StorageKind,

    /// Root directory for local storage.
    #[arg(long, env = "CRYPTZONE_ROOT", default_value = "./cryptzone-data")]
    root: PathBuf,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, env = "CRYPTZONE_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, env = "CRYPTZONE_LOG_JSON", value_parser = FalseyValueParser::new())]
    log_json: bool,

    /// Disable colored output.
    #[arg(long, env = "NO_COLOR", value_parser = FalseyValueParser::new())]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the encrypted-table round trip for each format.
    Run {
        /// Formats to exercise (comma separated). Defaults to every format
        /// with a codec plus every skip-listed format.
        #[arg(long, short, value_delimiter = ',')]
        format: Vec<StorageFormat>,
        /// Whether zones actually encrypt. When false every format is skipped.
        #[arg(long, env = "CRYPTZONE_ENCRYPTION", default_value_t = true, action = ArgAction::Set)]
        encryption: bool,
        /// Zone key length in bits.
        #[arg(long, env = "CRYPTZONE_KEY_BITS", default_value_t = 128)]
        key_bits: u32,
        /// Skip-list replacing the default (`format:scenario` entries).
        #[arg(long, env = "CRYPTZONE_DISABLED")]
        disabled: Option<SkipList>,
        /// Side length of the dataset grid.
        #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(i32).range(1..=1000))]
        loop_size: i32,
        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List storage formats and their status.
    Formats,
}

// ── Results ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum Status {
    Pass,
    Skip,
    Fail,
    Unsupported,
}

impl Status {
    fn label(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Skip => "SKIP",
            Self::Fail => "FAIL",
            Self::Unsupported => "UNSUPPORTED",
        }
    }

    fn color(self) -> &'static str {
        match self {
            Self::Pass => GREEN,
            Self::Skip | Self::Unsupported => YELLOW,
            Self::Fail => RED,
        }
    }
}

#[derive(Debug, Serialize)]
struct FormatResult {
    format: StorageFormat,
    status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    rows: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    #[serde(skip)]
    elapsed: Option<Duration>,
}

impl FormatResult {
    fn new(format: StorageFormat, status: Status, detail: impl Into<String>) -> Self {
        Self {
            format,
            status,
            rows: None,
            detail: Some(detail.into()),
            elapsed: None,
        }
    }
}

// ── Entry point ──────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    let color = !cli.no_color;
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            if color {
                eprintln!("{RED}{BOLD}error:{RESET} {e:#}");
            } else {
                eprintln!("error: {e:#}");
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Returns whether every exercised format passed or was skipped.
async fn run(cli: Cli) -> Result<bool> {
    let color = !cli.no_color;
    match cli.command {
        Commands::Run {
            format,
            encryption,
            key_bits,
            disabled,
            loop_size,
            json,
        } => {
            let skip_list = disabled.unwrap_or_else(SkipList::encryption_suite);
            let formats = if format.is_empty() {
                default_formats(&CodecRegistry::with_defaults(), &skip_list)
            } else {
                format
            };
            let config = SuiteConfig {
                storage: cli.storage,
                root: cli.root,
                encryption_supported: encryption,
                key_bits,
                skip_list,
                formats,
                loop_size,
            };
            cmd_run(&config, json, color).await
        }
        Commands::Formats => {
            cmd_formats(color);
            Ok(true)
        }
    }
}

// ── Commands ─────────────────────────────────────────────────────────

async fn cmd_run(config: &SuiteConfig, json: bool, color: bool) -> Result<bool> {
    info!(
        storage = ?config.storage,
        formats = config.formats.len(),
        encryption = config.encryption_supported,
        "suite starting"
    );

    let mut results = Vec::with_capacity(config.formats.len());
    for &format in &config.formats {
        let result = run_format(config, format).await?;
        if !json {
            print_result(&result, color);
        }
        results.push(result);
    }

    let ok = results
        .iter()
        .all(|r| matches!(r.status, Status::Pass | Status::Skip));
    if json {
        let rendered = serde_json::to_string_pretty(&results).context("rendering results")?;
        println!("{rendered}");
    } else {
        let passed = results.iter().filter(|r| r.status == Status::Pass).count();
        let skipped = results.iter().filter(|r| r.status == Status::Skip).count();
        println!();
        let failed = results.len().saturating_sub(passed).saturating_sub(skipped);
        println!("{passed} passed, {skipped} skipped, {failed} failed");
    }
    Ok(ok)
}

/// Set up, verify and tear down one format's session.
///
/// Setup failures other than an unsupported format abort the run.
async fn run_format(config: &SuiteConfig, format: StorageFormat) -> Result<FormatResult> {
    let backend = config.open_backend().await?;
    let warehouse = Warehouse::open(backend, config.warehouse_config())
        .await
        .context("opening warehouse")?;
    let verifier = warehouse.verifier(scenarios::READ_ENCRYPTED_TABLE);

    if let Some(reason) = verifier.skip_reason(format) {
        return Ok(FormatResult::new(format, Status::Skip, reason.to_string()));
    }
    if !warehouse.codecs().supports(format) {
        return Ok(FormatResult::new(
            format,
            Status::Unsupported,
            format!("no codec registered for {format}"),
        ));
    }

    let setup = setup_tables(&warehouse, config, format).await;
    let result = match setup {
        Ok(table) => {
            let dataset = Dataset::basic(config.loop_size);
            match verifier.verify(&table, &dataset).await {
                Ok(VerificationOutcome::Passed(report)) => FormatResult {
                    format,
                    status: Status::Pass,
                    rows: Some(report.rows_matched),
                    detail: (!report.protected).then(|| "table was not protected".to_owned()),
                    elapsed: Some(report.elapsed),
                },
                Ok(VerificationOutcome::Skipped(reason)) => {
                    FormatResult::new(format, Status::Skip, reason.to_string())
                }
                Err(e) => FormatResult::new(format, Status::Fail, e.to_string()),
            }
        }
        Err(WarehouseError::Catalog(CatalogError::UnsupportedFormat { .. })) => {
            FormatResult::new(format, Status::Unsupported, "catalog rejected the format")
        }
        Err(e) => {
            let report = warehouse.teardown(&[BASIC_TABLE, ENCRYPTED_TABLE]).await;
            if !report.is_clean() {
                warn!(format = %format, errors = ?report.errors, "teardown after failed setup");
            }
            return Err(e).with_context(|| format!("setting up tables for {format}"));
        }
    };

    let report = warehouse.teardown(&[BASIC_TABLE, ENCRYPTED_TABLE]).await;
    if !report.is_clean() {
        warn!(format = %format, errors = ?report.errors, "teardown incomplete");
    }
    Ok(result)
}

/// Create the basic table and the encrypted table, returning the latter.
async fn setup_tables(
    warehouse: &Warehouse,
    config: &SuiteConfig,
    format: StorageFormat,
) -> Result<TableDescriptor, WarehouseError> {
    warehouse
        .catalog()
        .create_table(CreateTable::new(BASIC_TABLE, Dataset::basic_columns()).stored_as(format))
        .await?;

    let location = format!("{}{ENCRYPTED_DIR}", warehouse.catalog().warehouse_dir());
    warehouse
        .create_encrypted_table(
            CreateTable::new(ENCRYPTED_TABLE, Dataset::basic_columns())
                .stored_as(format)
                .location(location),
            &config.key_name(),
            config.key_bits,
        )
        .await
}

fn cmd_formats(color: bool) {
    let codecs = CodecRegistry::with_defaults();
    let skip_list = SkipList::encryption_suite();
    for format in StorageFormat::ALL {
        let status = if codecs.supports(format) {
            "codec"
        } else {
            "no codec"
        };
        let skipped: Vec<&str> = skip_list
            .entries()
            .filter(|(f, _)| *f == format)
            .map(|(_, pattern)| pattern)
            .collect();
        let name = format.name();
        let ext = format.extension();
        if color {
            print!("{BOLD}{name:<14}{RESET} .{ext:<9} {status}");
        } else {
            print!("{name:<14} .{ext:<9} {status}");
        }
        if skipped.is_empty() {
            println!();
        } else if color {
            println!("  {DIM}skipped: {}{RESET}", skipped.join(", "));
        } else {
            println!("  skipped: {}", skipped.join(", "));
        }
    }
}

fn print_result(result: &FormatResult, color: bool) {
    let label = result.status.label();
    let mut line = if color {
        format!(
            "{}{BOLD}{label:<11}{RESET} {}",
            result.status.color(),
            result.format
        )
    } else {
        format!("{label:<11} {}", result.format)
    };
    if let Some(rows) = result.rows {
        let _ = write!(line, " ({rows} rows");
        if let Some(elapsed) = result.elapsed {
            let _ = write!(line, " in {}ms", elapsed.as_millis());
        }
        line.push(')');
    }
    if let Some(detail) = &result.detail {
        let _ = write!(line, ": {detail}");
    }
    println!("{line}");
}
