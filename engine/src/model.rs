//! Core data model for mirror runs.
//!
//! This module defines the structures passed between the pipeline stages:
//! - FileRecord / Inventory: one scan of a root, keyed by relative path
//! - DiffResult: the classification of every relative path
//! - OperationKind, RunState, OpState: enums describing work and progress

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::Metadata;
use std::path::{Component, Path};

use filetime::FileTime;
use serde::Serialize;

/// A single regular file seen during a scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileRecord {
    /// Path relative to the scanned root, `/`-separated
    pub relpath: String,

    /// File size in bytes
    pub size: u64,

    /// Modification time in fractional seconds since the Unix epoch
    pub mtime: f64,
}

impl FileRecord {
    /// Build a record from filesystem metadata.
    pub fn from_metadata(relpath: String, metadata: &Metadata) -> Self {
        FileRecord {
            relpath,
            size: metadata.len(),
            mtime: mtime_seconds(metadata),
        }
    }
}

/// Flat inventory of a scanned tree: relative path -> record.
pub type Inventory = BTreeMap<String, FileRecord>;

/// Modification time of `metadata` as fractional epoch seconds.
pub fn mtime_seconds(metadata: &Metadata) -> f64 {
    let mtime = FileTime::from_last_modification_time(metadata);
    mtime.unix_seconds() as f64 + f64::from(mtime.nanoseconds()) / 1e9
}

/// Render `path` (relative to some root) as a `/`-separated key.
///
/// Only normal components are kept, so the key is stable across platforms.
pub fn relpath_key(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Outcome of comparing a source inventory against a destination inventory.
///
/// The four sets are disjoint. Every source path lands in exactly one of
/// `to_copy`, `to_update` or `unchanged`; `to_delete` holds the destination
/// paths with no source counterpart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffResult {
    /// Present in source only
    pub to_copy: BTreeSet<String>,
    /// Present in both, but size or mtime differ
    pub to_update: BTreeSet<String>,
    /// Present in destination only
    pub to_delete: BTreeSet<String>,
    /// Present in both and considered equal
    pub unchanged: BTreeSet<String>,
}

impl DiffResult {
    /// Number of paths that require a copy, update or delete.
    pub fn action_count(&self) -> usize {
        self.to_copy.len() + self.to_update.len() + self.to_delete.len()
    }

    /// True when the destination already mirrors the source.
    pub fn is_noop(&self) -> bool {
        self.action_count() == 0
    }
}

/// Kind of a filesystem operation, ordered by urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OperationKind {
    /// Remove an entry from the destination (frees space, runs first)
    Delete,
    /// Relocate an entry within the destination
    Move,
    /// Overwrite an existing destination file
    Update,
    /// Create a destination file that does not exist yet
    Copy,
}

impl OperationKind {
    /// Base scheduling priority of this kind.
    pub fn base_priority(self) -> f64 {
        match self {
            OperationKind::Delete => 100.0,
            OperationKind::Move => 80.0,
            OperationKind::Update => 60.0,
            OperationKind::Copy => 40.0,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Delete => write!(f, "Delete"),
            OperationKind::Move => write!(f, "Move"),
            OperationKind::Update => write!(f, "Update"),
            OperationKind::Copy => write!(f, "Copy"),
        }
    }
}

/// State of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    /// Created, nothing scanned yet
    Ready,
    /// Validating roots and building inventories
    Scanning,
    /// Difference computed, waiting for `perform`
    Diffed,
    /// Applying operations
    Executing,
    /// Every operation was attempted (some may have failed)
    Completed,
    /// Stopped through the cancellation token
    Cancelled,
    /// Aborted by a run-level error
    Failed,
}

impl RunState {
    /// Returns true if this state is terminal (no further changes expected).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Cancelled | RunState::Failed
        )
    }
}

/// State of a single operation inside an executing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OpState {
    /// Not yet attempted
    Pending,
    /// Applied successfully
    Succeeded,
    /// Attempted and failed; recorded in the report
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_relpath_key_uses_forward_slashes() {
        let path: PathBuf = ["docs", "notes", "a.txt"].iter().collect();
        assert_eq!(relpath_key(&path), "docs/notes/a.txt");
        assert_eq!(relpath_key(Path::new("./b.txt")), "b.txt");
    }

    #[test]
    fn test_diff_result_counts_actions() {
        let mut diff = DiffResult::default();
        assert!(diff.is_noop());

        diff.to_copy.insert("a.txt".to_string());
        diff.to_delete.insert("stale.txt".to_string());
        diff.unchanged.insert("same.txt".to_string());
        assert_eq!(diff.action_count(), 2);
        assert!(!diff.is_noop());
    }

    #[test]
    fn test_run_state_terminal() {
        assert!(!RunState::Executing.is_terminal());
        assert!(RunState::Cancelled.is_terminal());
        assert!(RunState::Failed.is_terminal());
    }
}
