//! Audit report of a run.
//!
//! A [`BackupReport`] is created when a run is prepared, filled in while it
//! executes and written as pretty-printed JSON at the destination root when
//! it ends, whatever the outcome. The engine never reads it back.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::EngineError;

/// Default file name of the persisted report.
pub const DEFAULT_REPORT_FILE: &str = "backup_report.json";

/// A file written to the destination.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferEntry {
    pub path: String,
    pub size: u64,
    pub time: DateTime<Local>,
}

/// A failure recorded during the run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEntry {
    pub time: DateTime<Local>,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupReport {
    pub start_time: DateTime<Local>,
    pub end_time: Option<DateTime<Local>>,
    pub copied_files: Vec<TransferEntry>,
    pub updated_files: Vec<TransferEntry>,
    pub deleted_files: Vec<String>,
    pub errors: Vec<ErrorEntry>,
}

impl Default for BackupReport {
    fn default() -> Self {
        BackupReport::new()
    }
}

impl BackupReport {
    pub fn new() -> Self {
        BackupReport {
            start_time: Local::now(),
            end_time: None,
            copied_files: Vec::new(),
            updated_files: Vec::new(),
            deleted_files: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn record_copy(&mut self, path: &str, size: u64) {
        self.copied_files.push(TransferEntry {
            path: path.to_string(),
            size,
            time: Local::now(),
        });
    }

    pub fn record_update(&mut self, path: &str, size: u64) {
        self.updated_files.push(TransferEntry {
            path: path.to_string(),
            size,
            time: Local::now(),
        });
    }

    pub fn record_delete(&mut self, path: &str) {
        self.deleted_files.push(path.to_string());
    }

    /// Append a timestamped error entry.
    pub fn record_error(&mut self, error: impl Into<String>) {
        let error = error.into();
        warn!(%error, "recorded error");
        self.errors.push(ErrorEntry {
            time: Local::now(),
            error,
        });
    }

    /// Stamp the end time. Later calls keep the first stamp.
    pub fn finish(&mut self) {
        if self.end_time.is_none() {
            self.end_time = Some(Local::now());
        }
    }

    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Number of files copied or updated.
    pub fn transferred_count(&self) -> usize {
        self.copied_files.len() + self.updated_files.len()
    }

    pub fn transferred_bytes(&self) -> u64 {
        self.copied_files
            .iter()
            .chain(&self.updated_files)
            .map(|entry| entry.size)
            .sum()
    }

    /// Serialize the report as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the report to `dir/file_name` and return the written path.
    pub fn save(&self, dir: &Path, file_name: &str) -> Result<PathBuf, EngineError> {
        let path = dir.join(file_name);
        let json = self.to_json()?;
        fs::write(&path, json).map_err(|e| EngineError::ReportWrite {
            path: path.clone(),
            source: e,
        })?;
        info!(path = %path.display(), "report saved");
        Ok(path)
    }
}
