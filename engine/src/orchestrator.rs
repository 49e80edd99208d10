//! Run orchestration.
//!
//! A run has two phases:
//! - [`BackupOrchestrator::prepare`] validates the roots, scans both trees,
//!   checks free space and computes the [`DiffResult`]. Nothing is written.
//! - [`BackupOrchestrator::perform`] applies the difference: deletions
//!   first, then copies, then updates (or in scheduler order when
//!   `use_scheduler` is set).
//!
//! Execution is best effort. A failing file is recorded in the report and
//! the batch moves on. The cancellation token is checked before every
//! operation; an operation already started runs to completion. The report
//! is finalized and written to the destination root however the run ends.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{error, info, info_span, warn};

use crate::cancel::CancellationToken;
use crate::copier::{prune_empty_parents, Copier};
use crate::diff::{diff, files_identical};
use crate::error::EngineError;
use crate::exclude::ExclusionRules;
use crate::model::{DiffResult, Inventory, OpState, OperationKind, RunState};
use crate::progress::{emit, format_bytes, ProgressEvent, ProgressSink};
use crate::report::BackupReport;
use crate::scan::DirectoryScanner;
use crate::scheduler::OperationScheduler;
use crate::settings::EngineSettings;
use crate::throughput::ThroughputTracker;
use crate::validate::validate;
use crate::volume::{SystemVolumeProbe, VolumeProbe};

/// Successful outcome of [`BackupOrchestrator::prepare`].
#[derive(Debug, Clone, PartialEq)]
pub struct Preparation {
    /// Human-readable summary of the pending work
    pub message: String,
    pub diff: DiffResult,
    /// Total size of the included source files
    pub source_bytes: u64,
    /// Bytes that `perform` will copy or update
    pub transfer_bytes: u64,
}

impl Preparation {
    /// `(ok, message, diff)` view of the preparation.
    pub fn summary(&self) -> (bool, &str, &DiffResult) {
        (true, &self.message, &self.diff)
    }
}

/// Result of [`BackupOrchestrator::perform`].
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// `Completed`, `Cancelled` or `Failed`
    pub state: RunState,
    pub report: BackupReport,
    /// Where the report was written, if writing it succeeded
    pub report_path: Option<PathBuf>,
}

impl RunOutcome {
    /// True only when every operation was attempted. Per-file errors may
    /// still be present in the report.
    pub fn succeeded(&self) -> bool {
        self.state == RunState::Completed
    }
}

/// Drives a mirror run from validation to report.
pub struct BackupOrchestrator<P: VolumeProbe = SystemVolumeProbe> {
    settings: EngineSettings,
    probe: P,
    rules: Option<ExclusionRules>,
    cancel: CancellationToken,
    state: RunState,
    source: Option<PathBuf>,
    destination: Option<PathBuf>,
    source_inventory: Inventory,
    dest_inventory: Inventory,
    report: Option<BackupReport>,
}

impl BackupOrchestrator<SystemVolumeProbe> {
    pub fn new(settings: EngineSettings) -> Self {
        BackupOrchestrator::with_probe(settings, SystemVolumeProbe)
    }
}

impl<P: VolumeProbe> BackupOrchestrator<P> {
    /// Create an orchestrator that queries `probe` about the destination.
    pub fn with_probe(settings: EngineSettings, probe: P) -> Self {
        BackupOrchestrator {
            settings,
            probe,
            rules: None,
            cancel: CancellationToken::new(),
            state: RunState::Ready,
            source: None,
            destination: None,
            source_inventory: Inventory::new(),
            dest_inventory: Inventory::new(),
            report: None,
        }
    }

    /// Use `rules` instead of the ones compiled from the settings.
    pub fn set_exclusion_rules(&mut self, rules: ExclusionRules) {
        self.rules = Some(rules);
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Report of the prepared run, until `perform` takes it over.
    pub fn report(&self) -> Option<&BackupReport> {
        self.report.as_ref()
    }

    /// A handle to this orchestrator's stop flag, usable from other threads.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request cancellation of the current scan or run.
    pub fn stop(&self) {
        info!("stop requested");
        self.cancel.cancel();
    }

    /// Validate the roots, scan both trees and compute the difference.
    ///
    /// # Errors
    /// - path errors from validation
    /// - `InsufficientSpace` if the destination volume cannot hold the
    ///   included source files
    /// - `ScanRootUnreadable` if a root cannot be listed
    /// - `Cancelled` if `stop` was called while scanning
    /// - `InvalidPattern` if the configured exclusions do not compile
    pub fn prepare(
        &mut self,
        source: &Path,
        destination: &Path,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<Preparation, EngineError> {
        let _span = info_span!(
            "prepare",
            source = %source.display(),
            destination = %destination.display()
        )
        .entered();

        self.cancel.reset();
        self.report = None;
        self.state = RunState::Scanning;

        match self.prepare_inner(source, destination, progress) {
            Ok(preparation) => {
                self.state = RunState::Diffed;
                info!(message = %preparation.message, "prepared");
                Ok(preparation)
            }
            Err(err) => {
                self.state = if matches!(err, EngineError::Cancelled) {
                    RunState::Cancelled
                } else {
                    RunState::Failed
                };
                self.report = None;
                error!(error = %err.detailed(), "preparation failed");
                Err(err)
            }
        }
    }

    fn prepare_inner(
        &mut self,
        source: &Path,
        destination: &Path,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<Preparation, EngineError> {
        let paths = validate(source, destination)?;
        self.report = Some(BackupReport::new());

        let mut rules = match &self.rules {
            Some(rules) => rules.rebased_onto(&paths.source),
            None => self.settings.exclusion_rules()?.rebased_onto(&paths.source),
        };
        // The report lives at the destination root and is never mirrored.
        let report_name = self.settings.report_file_name.as_str();
        if paths.source.join(report_name).exists() {
            warn!(file = report_name, "source file shares the report name and is skipped");
        }
        rules.add_excluded_path(report_name);
        let interval = self.settings.scan_progress_interval;

        emit(progress, ProgressEvent::Status("Scanning source directory...".to_string()));
        let source_scan = DirectoryScanner::new(&rules, &self.cancel)
            .with_progress(progress, interval)
            .scan(&paths.source)?;
        if !source_scan.complete {
            return Err(EngineError::Cancelled);
        }

        let required = source_scan.total_bytes();
        match self.probe.free_space(&paths.destination) {
            Ok(available) if available < required => {
                return Err(EngineError::InsufficientSpace {
                    required,
                    available,
                });
            }
            Ok(available) => {
                info!(required = %format_bytes(required), available = %format_bytes(available), "space check passed");
            }
            Err(e) => warn!(error = %e, "cannot query free space, skipping check"),
        }

        let dest_inventory = if paths.destination.is_dir() {
            emit(
                progress,
                ProgressEvent::Status("Scanning destination directory...".to_string()),
            );
            let dest_scan = DirectoryScanner::new(&rules, &self.cancel)
                .with_progress(progress, interval)
                .scan(&paths.destination)?;
            if !dest_scan.complete {
                return Err(EngineError::Cancelled);
            }
            dest_scan.inventory
        } else {
            Inventory::new()
        };

        emit(progress, ProgressEvent::Status("Analyzing differences...".to_string()));
        let diff = diff(&source_scan.inventory, &dest_inventory);

        let message = summary_message(&diff);
        let transfer_bytes = diff
            .to_copy
            .iter()
            .chain(&diff.to_update)
            .filter_map(|relpath| source_scan.inventory.get(relpath))
            .map(|record| record.size)
            .sum();
        self.source = Some(paths.source);
        self.destination = Some(paths.destination);
        self.source_inventory = source_scan.inventory;
        self.dest_inventory = dest_inventory;

        Ok(Preparation {
            message,
            diff,
            source_bytes: required,
            transfer_bytes,
        })
    }

    /// Apply `diff` to the destination prepared by [`prepare`](Self::prepare).
    ///
    /// Returns the run outcome whatever happened during execution; per-file
    /// failures and run-level faults end up in the report.
    ///
    /// # Errors
    /// `NotPrepared` if the last `prepare` did not succeed or its result was
    /// already performed.
    pub fn perform(
        &mut self,
        diff: &DiffResult,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<RunOutcome, EngineError> {
        let (source, destination) = match (&self.source, &self.destination) {
            (Some(source), Some(destination)) if self.state == RunState::Diffed => {
                (source.clone(), destination.clone())
            }
            _ => return Err(EngineError::NotPrepared),
        };

        let _span = info_span!(
            "perform",
            source = %source.display(),
            destination = %destination.display()
        )
        .entered();

        self.state = RunState::Executing;
        let mut report = self.report.take().unwrap_or_default();

        let state = match self.execute(diff, &source, &destination, &mut report, progress) {
            Ok(true) => RunState::Completed,
            Ok(false) => {
                info!("backup cancelled");
                RunState::Cancelled
            }
            Err(err) => {
                error!(error = %err.detailed(), "backup aborted");
                report.record_error(err.detailed());
                RunState::Failed
            }
        };

        if state == RunState::Completed && self.settings.verify_after_copy {
            emit(progress, ProgressEvent::Status("Verifying files...".to_string()));
            self.verify(&source, &destination, &mut report);
        }

        report.finish();
        let report_path = match report.save(&destination, &self.settings.report_file_name) {
            Ok(path) => Some(path),
            Err(err) => {
                error!(error = %err.detailed(), "could not save report");
                None
            }
        };

        info!(
            ?state,
            copied = report.copied_files.len(),
            updated = report.updated_files.len(),
            deleted = report.deleted_files.len(),
            errors = report.error_count(),
            "backup finished"
        );
        self.state = state;
        Ok(RunOutcome {
            state,
            report,
            report_path,
        })
    }

    /// Prepare and perform in one call, without a confirmation step.
    pub fn run(
        &mut self,
        source: &Path,
        destination: &Path,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<RunOutcome, EngineError> {
        let preparation = self.prepare(source, destination, progress)?;
        self.perform(&preparation.diff, progress)
    }

    /// Returns `Ok(false)` when cancelled before the batch finished.
    fn execute(
        &self,
        diff: &DiffResult,
        source: &Path,
        destination: &Path,
        report: &mut BackupReport,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<bool, EngineError> {
        fs::create_dir_all(destination).map_err(|e| EngineError::DirectoryCreationFailed {
            path: destination.to_path_buf(),
            source: e,
        })?;

        let chunk_size = self
            .settings
            .chunk_size
            .unwrap_or_else(|| self.probe.suggested_chunk_size(destination));
        info!(chunk_size, "starting transfer");

        let mut execution = Execution {
            copier: Copier::new(chunk_size),
            source,
            destination,
            source_inventory: &self.source_inventory,
            progress,
            report,
            transferred: 0,
        };

        if self.settings.use_scheduler {
            self.execute_scheduled(diff, &mut execution)
        } else {
            self.execute_flat(diff, &mut execution)
        }
    }

    fn execute_flat(
        &self,
        diff: &DiffResult,
        execution: &mut Execution<'_>,
    ) -> Result<bool, EngineError> {
        let mut tracker = ThroughputTracker::new(self.settings.scheduler.throughput_config());
        let total: u64 = diff
            .to_copy
            .iter()
            .chain(&diff.to_update)
            .map(|relpath| execution.expected_size(relpath))
            .sum();
        tracker.set_total(total);
        tracker.start();

        let steps = diff
            .to_delete
            .iter()
            .map(|relpath| (OperationKind::Delete, relpath))
            .chain(diff.to_copy.iter().map(|relpath| (OperationKind::Copy, relpath)))
            .chain(diff.to_update.iter().map(|relpath| (OperationKind::Update, relpath)));

        for (kind, relpath) in steps {
            if self.cancel.is_cancelled() {
                return Ok(false);
            }
            execution.apply(kind, relpath, &mut tracker);
        }

        emit(execution.progress, ProgressEvent::Stats(tracker.stats()));
        Ok(true)
    }

    fn execute_scheduled(
        &self,
        diff: &DiffResult,
        execution: &mut Execution<'_>,
    ) -> Result<bool, EngineError> {
        let mut scheduler = OperationScheduler::new(self.settings.scheduler.scheduler_config());
        for relpath in &diff.to_delete {
            let size = self.dest_inventory.get(relpath).map_or(0, |r| r.size);
            scheduler.enqueue(OperationKind::Delete, relpath, size);
        }
        for relpath in &diff.to_update {
            scheduler.enqueue(OperationKind::Update, relpath, execution.expected_size(relpath));
        }
        for relpath in &diff.to_copy {
            scheduler.enqueue(OperationKind::Copy, relpath, execution.expected_size(relpath));
        }
        scheduler.start();

        loop {
            if self.cancel.is_cancelled() {
                return Ok(false);
            }
            let operation = match scheduler.dequeue() {
                Some(operation) => operation,
                None => break,
            };
            execution.apply(operation.kind, &operation.path, scheduler.tracker_mut());
            scheduler.complete(&operation.path);
        }

        if !scheduler.is_empty() {
            return Err(EngineError::Unknown {
                message: format!(
                    "{} operations left with unresolved dependencies",
                    scheduler.len()
                ),
            });
        }

        emit(execution.progress, ProgressEvent::Stats(scheduler.stats()));
        Ok(true)
    }

    fn verify(&self, source: &Path, destination: &Path, report: &mut BackupReport) {
        let chunk_size = self
            .settings
            .chunk_size
            .unwrap_or(crate::diff::COMPARE_CHUNK_SIZE);
        let written: Vec<String> = report
            .copied_files
            .iter()
            .chain(&report.updated_files)
            .map(|entry| entry.path.clone())
            .collect();

        for relpath in written {
            if self.cancel.is_cancelled() {
                break;
            }
            match files_identical(&source.join(&relpath), &destination.join(&relpath), chunk_size) {
                Ok(true) => {}
                Ok(false) => report.record_error(format!("Verification failed: {}", relpath)),
                Err(e) => report.record_error(format!("Verification error: {}: {}", relpath, e)),
            }
        }
    }
}

fn summary_message(diff: &DiffResult) -> String {
    if diff.is_noop() {
        return "No files need to be updated".to_string();
    }
    let transfers = diff.to_copy.len() + diff.to_update.len();
    let mut message = format!("Found {} files to process", transfers);
    if !diff.to_delete.is_empty() {
        message.push_str(&format!(", {} to delete", diff.to_delete.len()));
    }
    message
}

/// State shared by the operations of one run.
struct Execution<'a> {
    copier: Copier,
    source: &'a Path,
    destination: &'a Path,
    source_inventory: &'a Inventory,
    progress: Option<&'a dyn ProgressSink>,
    report: &'a mut BackupReport,
    /// Bytes accounted for by finished transfers
    transferred: u64,
}

impl Execution<'_> {
    fn expected_size(&self, relpath: &str) -> u64 {
        match self.source_inventory.get(relpath) {
            Some(record) => record.size,
            None => fs::metadata(self.source.join(relpath)).map_or(0, |m| m.len()),
        }
    }

    /// Run one operation and record its outcome. Never fails the batch.
    fn apply(&mut self, kind: OperationKind, relpath: &str, tracker: &mut ThroughputTracker) -> OpState {
        emit(
            self.progress,
            ProgressEvent::OperationStarted {
                kind,
                relpath: relpath.to_string(),
            },
        );

        let result = match kind {
            OperationKind::Delete => self.delete(relpath),
            OperationKind::Copy | OperationKind::Update => self.transfer(kind, relpath, tracker),
            OperationKind::Move => Err(EngineError::Unknown {
                message: format!("Move is not part of a mirror run: {}", relpath),
            }),
        };

        let state = match result {
            Ok(()) => OpState::Succeeded,
            Err(err) => {
                warn!(%relpath, %kind, error = %err, "operation failed");
                self.report.record_error(err.detailed());
                OpState::Failed
            }
        };

        emit(
            self.progress,
            ProgressEvent::OperationFinished {
                relpath: relpath.to_string(),
                state,
            },
        );
        state
    }

    fn delete(&mut self, relpath: &str) -> Result<(), EngineError> {
        let target = self.destination.join(relpath);
        self.copier.delete(&target)?;
        prune_empty_parents(&target, self.destination);
        self.report.record_delete(relpath);
        info!(%relpath, "deleted");
        Ok(())
    }

    fn transfer(
        &mut self,
        kind: OperationKind,
        relpath: &str,
        tracker: &mut ThroughputTracker,
    ) -> Result<(), EngineError> {
        let src = self.source.join(relpath);
        let dst = self.destination.join(relpath);
        let base = self.transferred;
        let progress = self.progress;

        let result = self.copier.copy(&src, &dst, &mut |copied| {
            let transferred = base + copied;
            emit(progress, ProgressEvent::Bytes { transferred });
            if tracker.record(transferred) {
                emit(progress, ProgressEvent::Stats(tracker.stats()));
            }
        });

        match result {
            Ok(bytes) => {
                self.transferred = base + bytes;
                if kind == OperationKind::Update {
                    self.report.record_update(relpath, bytes);
                } else {
                    self.report.record_copy(relpath, bytes);
                }
                info!(%relpath, %kind, bytes, "transferred");
                Ok(())
            }
            Err(err) => {
                // count the file as processed so the ETA keeps converging
                self.transferred = base + self.expected_size(relpath);
                Err(err)
            }
        }
    }
}
