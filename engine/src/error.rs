//! Error types for the mirror engine.
//!
//! `EngineError` covers both run-level failures (path validation, free space,
//! unreadable scan roots) and the per-file failures produced by the copier.
//! Run-level errors abort `prepare` before anything is written. Per-file
//! errors are caught at the file boundary by the orchestrator and recorded in
//! the run's `BackupReport`; they never stop the batch.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::progress::format_bytes;

/// Errors produced by the engine.
///
/// Variants carrying an `io::Error` expose it through `source()` so callers
/// can walk the chain or pull the OS error code via [`EngineError::raw_os_error`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// Source directory does not exist
    #[error("Source path does not exist: {}", .path.display())]
    SourceNotFound { path: PathBuf },

    /// Source exists but is a file or special entry
    #[error("Source path must be a directory: {}", .path.display())]
    SourceNotDirectory { path: PathBuf },

    /// Destination exists but is not a directory
    #[error("Destination path must be a directory: {}", .path.display())]
    DestinationNotDirectory { path: PathBuf },

    /// Source and destination resolve to the same directory
    #[error("Source and destination paths cannot be the same: {}", .path.display())]
    SamePath { path: PathBuf },

    /// Destination is nested inside the source tree
    #[error("Destination cannot be a subdirectory of source: {}", .destination.display())]
    DestinationInsideSource { destination: PathBuf },

    /// Source is nested inside the destination tree
    #[error("Source cannot be a subdirectory of destination: {}", .source_path.display())]
    SourceInsideDestination { source_path: PathBuf },

    /// A root path could not be resolved to an absolute path
    #[error("Failed to resolve path: {}", .path.display())]
    PathResolution { path: PathBuf, source: io::Error },

    /// Destination volume cannot hold the source tree
    #[error(
        "Insufficient space. Need: {}, Available: {}",
        size(.required),
        size(.available)
    )]
    InsufficientSpace { required: u64, available: u64 },

    /// The scan root itself could not be listed
    #[error("Failed to read directory: {}", .path.display())]
    ScanRootUnreadable { path: PathBuf, source: io::Error },

    /// Source file is missing or cannot be opened for reading
    #[error("Failed to read file: {}", .path.display())]
    SourceUnreadable { path: PathBuf, source: io::Error },

    /// Destination file cannot be created or its metadata cannot be set
    #[error("Failed to write file: {}", .path.display())]
    DestinationUnwritable { path: PathBuf, source: io::Error },

    /// I/O fault after the transfer started; partial content may remain
    #[error("Transfer interrupted: {}", .path.display())]
    TransferInterrupted { path: PathBuf, source: io::Error },

    /// Failed to create a directory
    #[error("Failed to create directory: {}", .path.display())]
    DirectoryCreationFailed { path: PathBuf, source: io::Error },

    /// Entry is read-only and may not be overwritten or removed
    #[error("Path is not writable: {}", .path.display())]
    NotWritable { path: PathBuf },

    /// Removing a file or directory failed
    #[error("Failed to delete: {}", .path.display())]
    DeleteFailed { path: PathBuf, source: io::Error },

    /// Writing the run report failed
    #[error("Failed to write report: {}", .path.display())]
    ReportWrite { path: PathBuf, source: io::Error },

    /// Encoding the run report failed
    #[error("Failed to encode report")]
    ReportEncode {
        #[from]
        source: serde_json::Error,
    },

    /// Exclusion pattern is not a valid glob
    #[error("Invalid exclusion pattern '{pattern}'")]
    InvalidPattern {
        pattern: String,
        source: glob::PatternError,
    },

    /// Settings file could not be read or parsed
    #[error("Invalid settings in {}: {message}", .path.display())]
    Settings { path: PathBuf, message: String },

    /// `perform` was called without a successful `prepare`
    #[error("Backup has not been prepared")]
    NotPrepared,

    /// The run was stopped through its cancellation token
    #[error("Operation cancelled")]
    Cancelled,

    /// Catch-all for unexpected errors
    #[error("Engine error: {message}")]
    Unknown { message: String },
}

fn size(bytes: &u64) -> String {
    format_bytes(*bytes)
}

/// Coarse classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing, mistyped, identical or nested roots
    Path,
    /// Not enough free space at the destination
    Space,
    /// Enumerating a directory failed
    Scan,
    /// Copying a single file failed
    Transfer,
    /// Removing a destination entry failed
    Delete,
    /// Persisting the run report failed
    Report,
    /// Settings or exclusion rules are invalid
    Config,
    /// Run was cancelled
    Cancelled,
    /// Anything else
    Unknown,
}

impl EngineError {
    /// Which bucket of the error taxonomy this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SourceNotFound { .. }
            | Self::SourceNotDirectory { .. }
            | Self::DestinationNotDirectory { .. }
            | Self::SamePath { .. }
            | Self::DestinationInsideSource { .. }
            | Self::SourceInsideDestination { .. }
            | Self::PathResolution { .. } => ErrorKind::Path,
            Self::InsufficientSpace { .. } => ErrorKind::Space,
            Self::ScanRootUnreadable { .. } => ErrorKind::Scan,
            Self::SourceUnreadable { .. }
            | Self::DestinationUnwritable { .. }
            | Self::TransferInterrupted { .. }
            | Self::DirectoryCreationFailed { .. } => ErrorKind::Transfer,
            Self::NotWritable { .. } | Self::DeleteFailed { .. } => ErrorKind::Delete,
            Self::ReportWrite { .. } | Self::ReportEncode { .. } => ErrorKind::Report,
            Self::InvalidPattern { .. } | Self::Settings { .. } => ErrorKind::Config,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::NotPrepared | Self::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::PathResolution { source, .. }
            | Self::ScanRootUnreadable { source, .. }
            | Self::SourceUnreadable { source, .. }
            | Self::DestinationUnwritable { source, .. }
            | Self::TransferInterrupted { source, .. }
            | Self::DirectoryCreationFailed { source, .. }
            | Self::DeleteFailed { source, .. }
            | Self::ReportWrite { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// Full message including the underlying I/O cause, for report entries.
    pub fn detailed(&self) -> String {
        match std::error::Error::source(self) {
            Some(cause) => format!("{}: {}", self, cause),
            None => self.to_string(),
        }
    }
}

impl From<io::Error> for EngineError {
    fn from(err: io::Error) -> Self {
        EngineError::Unknown {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_groups_variants() {
        let err = EngineError::SourceNotFound {
            path: PathBuf::from("/missing"),
        };
        assert_eq!(err.kind(), ErrorKind::Path);

        let err = EngineError::InsufficientSpace {
            required: 2048,
            available: 1024,
        };
        assert_eq!(err.kind(), ErrorKind::Space);
        assert_eq!(
            err.to_string(),
            "Insufficient space. Need: 2.00 KB, Available: 1.00 KB"
        );
    }

    #[test]
    fn test_detailed_includes_io_cause() {
        let err = EngineError::DeleteFailed {
            path: PathBuf::from("stale.txt"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "locked"),
        };
        assert_eq!(err.kind(), ErrorKind::Delete);
        assert_eq!(err.detailed(), "Failed to delete: stale.txt: locked");
    }

    #[test]
    fn test_raw_os_error_passthrough() {
        let err = EngineError::SourceUnreadable {
            path: PathBuf::from("a.txt"),
            source: io::Error::from_raw_os_error(2),
        };
        assert_eq!(err.raw_os_error(), Some(2));
        assert_eq!(EngineError::Cancelled.raw_os_error(), None);
    }
}
