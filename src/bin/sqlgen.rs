//! sqlgen — regenerate annotated data-access functions
//!
//! # Usage
//!
//! ```bash
//! # Regenerate Users.cpp and Users.h against app.db
//! sqlgen app.db Users.cpp
//!
//! # Attach a second database as `logs`
//! sqlgen app.db Users.cpp logs logs.db
//!
//! # Show what would happen, as JSON
//! sqlgen app.db Users.cpp --dry-run --format json
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use colored::*;
use sqlgen::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sqlgen")]
#[command(version)]
#[command(about = "Generate SQLite data-access functions from annotated C++ comments", long_about = None)]
#[command(after_help = "EXAMPLES:
    sqlgen app.db src/Users.cpp
    sqlgen app.db src/Users.cpp --header include/Users.h
    sqlgen app.db src/Users.cpp logs logs.db --dry-run")]
struct Cli {
    /// Main database file
    #[arg(env = "SQLGEN_DATABASE")]
    database: String,

    /// Source file to regenerate
    source: PathBuf,

    /// Databases to attach, as `name path` pairs
    attach: Vec<String>,

    /// Declarations file (defaults to the source with a `.h` extension)
    #[arg(long)]
    header: Option<PathBuf>,

    /// Tool configuration file (defaults to ./sqlgen.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Generate and report without writing files
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Report format
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Fail when any block could not be generated
    #[arg(long)]
    strict: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("sqlgen=debug")
    } else {
        EnvFilter::try_from_env("SQLGEN_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: &Cli) -> Result<bool> {
    let attachments = attachment_pairs(&cli.attach)?;
    let tool_config = ToolConfig::load(cli.config.as_deref())?;
    let header_path = cli
        .header
        .clone()
        .unwrap_or_else(|| cli.source.with_extension("h"));

    if cli.verbose {
        println!("{} {}", "Source:".dimmed(), cli.source.display().to_string().yellow());
        println!("{} {}", "Header:".dimmed(), header_path.display().to_string().yellow());
    }

    let source = fs::read_to_string(&cli.source)
        .with_context(|| format!("cannot read {}", cli.source.display()))?;
    let header = fs::read_to_string(&header_path)
        .with_context(|| format!("cannot read {}", header_path.display()))?;

    let mut db = SqliteDatabase::open(&cli.database, &attachments, tool_config.database.clone())?;
    let output = Generator::new(&mut db)
        .with_defaults(tool_config.codegen.clone())
        .generate(&source, &header);
    if let Err(e) = db.detach_all() {
        tracing::warn!(error = %e, "detach failed");
    }

    if !cli.dry_run {
        backup(&cli.source)?;
        backup(&header_path)?;
        write_if_changed(&cli.source, &source, &output.source)?;
        write_if_changed(&header_path, &header, &output.header)?;
    }

    let ok = output.report.is_success(cli.strict);
    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output.report)?),
        OutputFormat::Text => print_report(&output.report, ok, cli.verbose),
    }
    Ok(ok)
}

fn attachment_pairs(args: &[String]) -> Result<Vec<(String, String)>> {
    if args.len() % 2 != 0 {
        bail!("attachments must be given as `name path` pairs");
    }
    Ok(args
        .chunks(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect())
}

/// Copy `path` to `<path>.<YYYYmmdd-HHMMSS>.sqlgenbackup`.
fn backup(path: &Path) -> Result<PathBuf> {
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let target = PathBuf::from(format!("{}.{}.sqlgenbackup", path.display(), stamp));
    fs::copy(path, &target)
        .with_context(|| format!("cannot back up {} to {}", path.display(), target.display()))?;
    Ok(target)
}

fn write_if_changed(path: &Path, before: &str, after: &str) -> Result<()> {
    if before != after {
        fs::write(path, after).with_context(|| format!("cannot write {}", path.display()))?;
    }
    Ok(())
}

fn print_report(report: &Report, ok: bool, verbose: bool) {
    for warning in &report.warnings {
        eprintln!("{} {}", "warning:".yellow().bold(), warning);
    }
    for failure in &report.failures {
        eprintln!("{} {}: {}", "ERROR".red().bold(), failure.function.cyan(), failure.message);
    }
    for error in &report.file_errors {
        eprintln!("{} {}", "Error:".red().bold(), error);
    }

    if verbose {
        for name in &report.generated {
            println!("  {} {}", "✓".green(), name);
        }
    }

    if ok {
        println!("{}", "SQLGen: Ok.".green().bold());
    } else {
        println!(
            "{} {} of {} function(s) generated",
            "SQLGen: Failed.".red().bold(),
            report.generated.len(),
            report.attempted
        );
    }
}
