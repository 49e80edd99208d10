//! mirror - Command-line interface for the mirror engine.
//!
//! Prepares a run, shows the pending work, asks for confirmation and then
//! applies it on the engine's worker thread while rendering progress to
//! stderr. Ctrl+C stops the run after the file in flight.

mod logging;
mod shutdown;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use dialoguer::{theme::ColorfulTheme, Confirm};
use mirror_engine::{
    file_signature, format_bytes, format_duration, format_speed, spawn_backup,
    BackupOrchestrator, ChecksumAlgorithm, DiffResult, EngineError, EngineSettings, OpState,
    Preparation,
    ProgressEvent, ProgressSink, RunOutcome, RunState, TransferStats,
};

const EXIT_OK: i32 = 0;
/// Completed with per-file errors, cancelled or declined
const EXIT_INCOMPLETE: i32 = 1;
/// Pre-flight or usage error
const EXIT_USAGE: i32 = 2;

const RENDER_INTERVAL: Duration = Duration::from_millis(200);

/// mirror - Keep a destination directory identical to a source directory
#[derive(Parser, Debug)]
#[command(name = "mirror")]
#[command(version)]
#[command(about = "Mirror a source directory into a destination directory")]
#[command(args_conflicts_with_subcommands = true)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Source directory
    #[arg(value_name = "SOURCE")]
    source: Option<PathBuf>,

    /// Destination directory (created if missing)
    #[arg(value_name = "DEST")]
    destination: Option<PathBuf>,

    /// Glob pattern to exclude, in addition to the configured ones (repeatable)
    #[arg(long = "exclude", value_name = "PATTERN")]
    exclude: Vec<String>,

    /// Skip files smaller than this many bytes
    #[arg(long, value_name = "BYTES")]
    min_size: Option<u64>,

    /// Skip files larger than this many bytes
    #[arg(long, value_name = "BYTES")]
    max_size: Option<u64>,

    /// Copy chunk size in bytes (default: chosen from the destination drive)
    #[arg(long, value_name = "BYTES")]
    chunk_size: Option<usize>,

    /// Execute through the priority scheduler
    #[arg(long)]
    scheduler: bool,

    /// Byte-compare every written file after the run
    #[arg(long)]
    verify: bool,

    /// Do not ask for confirmation
    #[arg(short, long)]
    yes: bool,

    /// Only print what would be done
    #[arg(long)]
    dry_run: bool,

    /// Settings file (TOML)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: String,

    /// Print every operation
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the hash, size and timestamps of a file
    Signature {
        /// File to inspect
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Hash algorithm: md5, sha256 or blake3
        #[arg(long, value_name = "ALGORITHM", default_value = "sha256")]
        hash: ChecksumAlgorithm,
    },
}

#[derive(Default)]
struct RenderState {
    last_render: Option<Instant>,
    line_open: bool,
    total: u64,
    stats: Option<TransferStats>,
}

/// Progress renderer shared by the scan and transfer phases.
struct CliProgress {
    verbose: bool,
    state: Mutex<RenderState>,
}

impl CliProgress {
    fn new(verbose: bool) -> Self {
        CliProgress {
            verbose,
            state: Mutex::new(RenderState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, RenderState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Bytes the transfer phase is expected to write.
    fn set_total(&self, total: u64) {
        self.state().total = total;
    }

    /// Terminate an in-place progress line, if one is open.
    fn finish_line(&self) {
        let mut state = self.state();
        Self::close_line(&mut state);
    }

    fn close_line(state: &mut RenderState) {
        if state.line_open {
            eprintln!();
            state.line_open = false;
        }
    }

    // Throttle in-place updates to avoid spam (max once per 200ms)
    fn due(state: &mut RenderState) -> bool {
        let now = Instant::now();
        match state.last_render {
            Some(last) if now.duration_since(last) < RENDER_INTERVAL => false,
            _ => {
                state.last_render = Some(now);
                true
            }
        }
    }

    fn print_progress_bar(percent: u32) -> String {
        let percent = percent.min(100);
        let filled = (percent / 5) as usize;
        let empty = 20 - filled;
        format!(
            "[{}{}] {}%",
            "=".repeat(filled),
            " ".repeat(empty),
            percent
        )
    }

    fn progress_line(transferred: u64, total: u64, stats: Option<&TransferStats>) -> String {
        let percent = if total == 0 {
            100
        } else {
            (transferred as f64 / total as f64 * 100.0) as u32
        };
        let mut line = format!(
            "Progress: {} | {}/{}",
            Self::print_progress_bar(percent),
            format_bytes(transferred),
            format_bytes(total)
        );
        if let Some(stats) = stats {
            line.push_str(&format!(
                " | {} | ETA {}",
                format_speed(stats.speed),
                format_duration(stats.eta_secs)
            ));
        }
        line
    }
}

impl ProgressSink for CliProgress {
    fn emit(&self, event: ProgressEvent) {
        let mut state = self.state();
        match event {
            ProgressEvent::Status(message) => {
                Self::close_line(&mut state);
                eprintln!("{}", message);
            }
            ProgressEvent::Scanning { count, .. } => {
                if Self::due(&mut state) {
                    eprint!("\r  {} files scanned", count);
                    state.line_open = true;
                }
            }
            ProgressEvent::OperationStarted { kind, relpath } => {
                if self.verbose {
                    Self::close_line(&mut state);
                    eprintln!("{:>7}: {}", kind, relpath);
                }
            }
            ProgressEvent::Bytes { transferred } => {
                if Self::due(&mut state) {
                    let line = Self::progress_line(transferred, state.total, state.stats.as_ref());
                    eprint!("\r{:<90}", line);
                    state.line_open = true;
                }
            }
            ProgressEvent::Stats(stats) => {
                state.stats = Some(stats);
            }
            ProgressEvent::OperationFinished { relpath, state: op } => match op {
                OpState::Failed => {
                    Self::close_line(&mut state);
                    eprintln!("  Failed: {}", relpath);
                }
                OpState::Succeeded if self.verbose => {
                    Self::close_line(&mut state);
                    eprintln!("   Done: {}", relpath);
                }
                _ => {}
            },
        }
    }
}

/// Parse arguments, install logging, then run the CLI off the async runtime
#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = logging::init(&args.log_level) {
        eprintln!("Warning: logging disabled: {}", e);
    }

    let exit_code = match tokio::task::spawn_blocking(move || run_cli(&args)).await {
        Ok(Ok(code)) => code,
        Ok(Err(e)) => {
            eprintln!("Error: {:#}", e);
            EXIT_USAGE
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            EXIT_USAGE
        }
    };

    std::process::exit(exit_code);
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args) -> Result<i32> {
    if let Some(Command::Signature { file, hash }) = &args.command {
        return run_signature(file, *hash);
    }

    let (source, destination) = match (&args.source, &args.destination) {
        (Some(source), Some(destination)) => (source, destination),
        _ => bail!("SOURCE and DEST are required (see --help)"),
    };

    let settings = build_settings(args)?;
    let progress = CliProgress::new(args.verbose);
    let mut orchestrator = BackupOrchestrator::new(settings);

    eprintln!("Preparing backup...");
    eprintln!("  Source: {}", source.display());
    eprintln!("  Destination: {}", destination.display());

    // Covers the scan as well as the run; prepare clears the token first
    let cancel = orchestrator.cancellation_token();
    shutdown::cancel_on_ctrl_c(cancel.clone());

    let preparation = orchestrator.prepare(source, destination, Some(&progress));
    progress.finish_line();
    let preparation = match preparation {
        Ok(preparation) => preparation,
        Err(err) => return preparation_failure(err),
    };

    println!("{}", preparation.message);
    if args.dry_run || args.verbose {
        print_diff(&preparation.diff);
    }
    if args.dry_run {
        return Ok(EXIT_OK);
    }

    let needs_confirmation = !args.yes && !preparation.diff.is_noop();
    if needs_confirmation && !confirm(&preparation)? {
        eprintln!("Backup aborted.");
        return Ok(EXIT_INCOMPLETE);
    }
    if cancel.is_cancelled() {
        eprintln!("Backup aborted.");
        return Ok(EXIT_INCOMPLETE);
    }

    progress.set_total(preparation.transfer_bytes);
    let started = Instant::now();
    let handle = spawn_backup(orchestrator, preparation.diff).context("Failed to start backup")?;

    for event in handle.events().iter() {
        progress.emit(event);
    }
    progress.finish_line();

    let outcome = handle.join().context("Backup failed")?;
    Ok(print_outcome(&outcome, started.elapsed()))
}

/// A cancelled scan is an incomplete run; anything else is a pre-flight error
fn preparation_failure(err: EngineError) -> Result<i32> {
    if matches!(err, EngineError::Cancelled) {
        eprintln!("Scan cancelled.");
        return Ok(EXIT_INCOMPLETE);
    }
    Err(anyhow::Error::new(err).context("Preparation failed"))
}

/// Settings file values, overridden by command-line flags
fn build_settings(args: &Args) -> Result<EngineSettings> {
    let mut settings = match &args.config {
        Some(path) => EngineSettings::load(path)?,
        None => EngineSettings::default(),
    };

    for pattern in &args.exclude {
        if !settings.exclude_patterns.contains(pattern) {
            settings.exclude_patterns.push(pattern.clone());
        }
    }
    if args.min_size.is_some() {
        settings.min_size = args.min_size;
    }
    if args.max_size.is_some() {
        settings.max_size = args.max_size;
    }
    if args.chunk_size.is_some() {
        settings.chunk_size = args.chunk_size;
    }
    settings.use_scheduler |= args.scheduler;
    settings.verify_after_copy |= args.verify;

    Ok(settings)
}

fn print_diff(diff: &DiffResult) {
    let sections = [
        ("To copy", "+", &diff.to_copy),
        ("To update", "~", &diff.to_update),
        ("To delete", "-", &diff.to_delete),
    ];
    for (title, marker, paths) in sections {
        if paths.is_empty() {
            continue;
        }
        println!("{} ({}):", title, paths.len());
        for path in paths {
            println!("  {} {}", marker, path);
        }
    }
}

fn confirm(preparation: &Preparation) -> Result<bool> {
    let prompt = format!(
        "Transfer {} and apply {} changes?",
        format_bytes(preparation.transfer_bytes),
        preparation.diff.action_count()
    );
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()
        .context("Failed to read confirmation")
}

/// Print the run summary and return the exit code it maps to
fn print_outcome(outcome: &RunOutcome, elapsed: Duration) -> i32 {
    let report = &outcome.report;

    eprintln!();
    match outcome.state {
        RunState::Completed => eprintln!("Backup complete!"),
        RunState::Cancelled => eprintln!("Backup cancelled."),
        _ => eprintln!("Backup failed."),
    }
    eprintln!(
        "Summary: {} copied, {} updated, {} deleted, {} errors",
        report.copied_files.len(),
        report.updated_files.len(),
        report.deleted_files.len(),
        report.error_count()
    );
    eprintln!("Bytes copied: {}", format_bytes(report.transferred_bytes()));
    eprintln!("Elapsed: {}", format_duration(elapsed.as_secs_f64()));

    if !report.errors.is_empty() {
        eprintln!();
        eprintln!("Errors:");
        for entry in &report.errors {
            eprintln!("  [{}] {}", entry.time.format("%H:%M:%S"), entry.error);
        }
    }

    match &outcome.report_path {
        Some(path) => eprintln!("Report: {}", path.display()),
        None => eprintln!("Report: not written"),
    }

    if outcome.succeeded() && report.error_count() == 0 {
        EXIT_OK
    } else {
        EXIT_INCOMPLETE
    }
}

fn run_signature(file: &Path, algorithm: ChecksumAlgorithm) -> Result<i32> {
    let signature = file_signature(file, algorithm)
        .with_context(|| format!("Cannot read {}", file.display()))?;

    println!("File:     {}", file.display());
    println!("Hash:     {}", signature.hash.to_string_with_algo());
    println!(
        "Size:     {} ({} bytes)",
        format_bytes(signature.size),
        signature.size
    );
    println!("Modified: {}", format_timestamp(signature.mtime));
    if let Some(ctime) = signature.ctime {
        println!("Changed:  {}", format_timestamp(ctime));
    }
    Ok(EXIT_OK)
}

fn format_timestamp(epoch_secs: f64) -> String {
    let whole = epoch_secs.floor();
    let nanos = ((epoch_secs - whole) * 1e9) as u32;
    match DateTime::from_timestamp(whole as i64, nanos) {
        Some(utc) => utc
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        None => format!("{:.3}", epoch_secs),
    }
}
