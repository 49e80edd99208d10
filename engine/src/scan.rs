//! Directory scanning.
//!
//! Walks a root and produces a flat [`Inventory`] of regular files keyed by
//! relative path. Excluded directories are pruned, not descended into.
//! Directories and symlinks are never inventoried. A file whose metadata
//! cannot be read is logged and left out; only an unreadable root is fatal.

use std::fs;
use std::path::Path;

use tracing::{info, info_span, warn};
use walkdir::WalkDir;

use crate::cancel::CancellationToken;
use crate::error::EngineError;
use crate::exclude::ExclusionRules;
use crate::model::{relpath_key, FileRecord, Inventory};
use crate::progress::{emit, ProgressEvent, ProgressSink};

/// Default number of files between two `Scanning` progress events.
pub const DEFAULT_PROGRESS_INTERVAL: usize = 100;

/// Result of a scan.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    /// Files found, keyed by relative path
    pub inventory: Inventory,
    /// False when the scan stopped early on cancellation. A partial
    /// inventory must not drive a real run.
    pub complete: bool,
    /// Entries that were skipped because they could not be read
    pub unreadable: usize,
    /// Files left out by the exclusion rules
    pub excluded: usize,
}

impl ScanOutcome {
    /// Sum of the sizes of all inventoried files.
    pub fn total_bytes(&self) -> u64 {
        self.inventory.values().map(|r| r.size).sum()
    }
}

/// Walks one root at a time with a fixed set of rules.
pub struct DirectoryScanner<'a> {
    rules: &'a ExclusionRules,
    cancel: &'a CancellationToken,
    progress: Option<&'a dyn ProgressSink>,
    progress_interval: usize,
}

impl<'a> DirectoryScanner<'a> {
    pub fn new(rules: &'a ExclusionRules, cancel: &'a CancellationToken) -> Self {
        DirectoryScanner {
            rules,
            cancel,
            progress: None,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Attach a progress sink, notified every `interval` files.
    pub fn with_progress(mut self, sink: Option<&'a dyn ProgressSink>, interval: usize) -> Self {
        self.progress = sink;
        self.progress_interval = interval.max(1);
        self
    }

    /// Scan `root`.
    ///
    /// # Errors
    /// Returns `ScanRootUnreadable` if `root` itself cannot be listed.
    pub fn scan(&self, root: &Path) -> Result<ScanOutcome, EngineError> {
        let _span = info_span!("scan", root = %root.display()).entered();

        fs::read_dir(root).map_err(|e| EngineError::ScanRootUnreadable {
            path: root.to_path_buf(),
            source: e,
        })?;

        let mut outcome = ScanOutcome {
            complete: true,
            ..ScanOutcome::default()
        };

        let rules = self.rules;
        let walker = WalkDir::new(root)
            .follow_links(false)
            .min_depth(1)
            .into_iter()
            .filter_entry(|entry| {
                if !entry.file_type().is_dir() {
                    return true;
                }
                let relpath = entry
                    .path()
                    .strip_prefix(root)
                    .map(relpath_key)
                    .unwrap_or_default();
                !rules.excludes_dir(&relpath, entry.path())
            });

        for entry in walker {
            if self.cancel.is_cancelled() {
                info!(files = outcome.inventory.len(), "scan cancelled");
                outcome.complete = false;
                break;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(path = ?err.path(), error = %err, "cannot access entry, skipping");
                    outcome.unreadable += 1;
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let relpath = match entry.path().strip_prefix(root) {
                Ok(rel) => relpath_key(rel),
                Err(_) => continue,
            };

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    warn!(%relpath, error = %err, "cannot stat file, skipping");
                    outcome.unreadable += 1;
                    continue;
                }
            };

            if self.rules.excludes_file(&relpath, entry.path(), metadata.len()) {
                outcome.excluded += 1;
                continue;
            }

            let record = FileRecord::from_metadata(relpath.clone(), &metadata);
            outcome.inventory.insert(relpath.clone(), record);

            let count = outcome.inventory.len();
            if count % self.progress_interval == 0 {
                emit(self.progress, ProgressEvent::Scanning { relpath, count });
            }
        }

        info!(
            files = outcome.inventory.len(),
            excluded = outcome.excluded,
            unreadable = outcome.unreadable,
            complete = outcome.complete,
            "scan finished"
        );
        Ok(outcome)
    }
}
