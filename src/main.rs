//! unrpa CLI - Command-line tool for extracting Ren'Py archives.
//!
//! This is the main entry point for the unrpa command-line application.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::error::ErrorKind;
use clap::parser::ValueSource;
use clap::{ArgAction, CommandFactory, FromArgMatches, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::level_filters::LevelFilter;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use unrpa::prelude::*;

/// unrpa - extract files from Ren'Py RPA archives
#[derive(Parser, Debug)]
#[command(name = "unrpa")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the RPA archive
    archive: PathBuf,

    /// Increase log verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Print nothing except fatal errors
    #[arg(short, long)]
    silent: bool,

    /// List the archive contents instead of extracting
    #[arg(short, long, conflicts_with = "silent")]
    list: bool,

    /// Directory to extract into (defaults to the current directory)
    #[arg(short, long, env = "UNRPA_OUTPUT")]
    path: Option<PathBuf>,

    /// Create the destination directory if it does not exist
    #[arg(short, long, requires = "path")]
    mkdir: bool,

    /// Read the archive as this version (1, 2 or 3) instead of detecting it
    #[arg(short, long, value_name = "VERSION")]
    force: Option<Version>,

    /// Keep going when a file fails and report all failures at the end
    #[arg(long)]
    continue_on_error: bool,

    /// Extract files on multiple threads
    #[arg(short = 'j', long)]
    parallel: bool,
}

/// Parse arguments, rejecting `--list` with a `--path` given on the command line.
///
/// A destination taken from `UNRPA_OUTPUT` is ignored in list mode.
fn parse_cli<I, T>(args: I) -> std::result::Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let mut command = Cli::command();
    let matches = command.try_get_matches_from_mut(args)?;
    let cli = Cli::from_arg_matches(&matches).map_err(|e| e.format(&mut command))?;

    if cli.list && matches.value_source("path") == Some(ValueSource::CommandLine) {
        return Err(command.error(
            ErrorKind::ArgumentConflict,
            "the argument '--list' cannot be used with '--path <PATH>'",
        ));
    }

    Ok(cli)
}

fn main() -> ExitCode {
    let cli = parse_cli(std::env::args_os()).unwrap_or_else(|e| e.exit());
    init_tracing(&cli);

    match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            if let Some(hint) = err.downcast_ref::<unrpa::Error>().and_then(|e| e.hint()) {
                eprintln!("hint: {hint}");
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(cli: &Cli) {
    let level = if cli.silent {
        LevelFilter::OFF
    } else {
        match cli.verbose {
            0 => LevelFilter::INFO,
            1 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    };

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<ExitCode> {
    let start = Instant::now();
    let archive = RpaArchive::open_with(&cli.archive, cli.force)
        .with_context(|| format!("Failed to open {}", cli.archive.display()))?;

    info!(
        "Loaded {} entries from {} archive in {:?}",
        archive.len(),
        archive.version(),
        start.elapsed()
    );

    if cli.list {
        cmd_list(&archive);
        return Ok(ExitCode::SUCCESS);
    }

    cmd_extract(&archive, cli)
}

fn cmd_list(archive: &RpaArchive) {
    let paths = archive.list_paths();
    for path in &paths {
        println!("{path}");
    }

    info!("Total: {} entries", paths.len());
}

fn cmd_extract(archive: &RpaArchive, cli: &Cli) -> Result<ExitCode> {
    let destination = prepare_destination(cli.path.as_deref(), cli.mkdir)?;
    let options = ExtractOptions {
        continue_on_error: cli.continue_on_error,
    };

    info!(
        "Extracting {} entries to {}...",
        archive.len(),
        destination.display()
    );

    let pb = if cli.silent {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(archive.len() as u64)
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {wide_msg}")?
            .progress_chars("#>-"),
    );

    let on_progress = |progress: Progress<'_>| {
        debug!(
            "[{:>5.1}%] {}",
            progress.fraction() * 100.0,
            progress.path
        );
        pb.set_message(progress.path.to_string());
        pb.inc(1);
    };

    let start = Instant::now();
    let result = if cli.parallel {
        archive.extract_all_parallel(&destination, &options, on_progress)
    } else {
        archive.extract_all_with_progress(&destination, &options, on_progress)
    };
    pb.finish_and_clear();

    let report = result.context("Extraction aborted")?;

    info!(
        "Extracted {} entries ({} bytes) in {:?}",
        report.extracted().count(),
        report.bytes_written(),
        start.elapsed()
    );

    if report.is_complete() {
        return Ok(ExitCode::SUCCESS);
    }

    if !cli.silent {
        let mut failed = 0;
        for outcome in report.failures() {
            if let Err(e) = &outcome.result {
                eprintln!("failed: {}: {}", outcome.path, e);
            }
            failed += 1;
        }
        eprintln!(
            "{} of {} entries could not be extracted",
            failed,
            report.outcomes.len()
        );
    }

    Ok(ExitCode::FAILURE)
}

/// Resolve the extraction root, creating it only when asked to.
fn prepare_destination(path: Option<&Path>, mkdir: bool) -> Result<PathBuf> {
    let Some(path) = path else {
        return std::env::current_dir().context("Failed to resolve the current directory");
    };

    if path.is_dir() {
        return Ok(path.to_path_buf());
    }
    if path.exists() {
        bail!("Destination {} is not a directory", path.display());
    }
    if !mkdir {
        bail!(
            "Destination {} does not exist (use --mkdir to create it)",
            path.display()
        );
    }

    fs::create_dir_all(path).with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(path.to_path_buf())
}
