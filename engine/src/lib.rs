//! # Mirror Engine - Directory Mirroring Library
//!
//! A headless engine that keeps a destination directory tree identical to a
//! source tree. Designed as the foundation for multiple front ends (CLI,
//! automation, GUI).
//!
//! ## Overview
//!
//! A run is split into a read-only `prepare` phase and a writing `perform`
//! phase so the caller can show the pending work and ask for confirmation
//! in between. The engine features:
//! - Root validation (missing, identical or nested roots are rejected)
//! - Directory scanning with glob, name, path and size exclusions
//! - Size/mtime diffing with a 2 second tolerance
//! - Chunked copies that preserve timestamps and permissions
//! - Optional priority/dependency scheduling with speed and ETA tracking
//! - Cooperative cancellation and best-effort execution
//! - A JSON report written at the destination root after every run
//!
//! ## Basic Usage
//!
//! ```no_run
//! use mirror_engine::{BackupOrchestrator, EngineSettings};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut orchestrator = BackupOrchestrator::new(EngineSettings::default());
//!
//! // Validate, scan and diff; nothing is written yet
//! let preparation = orchestrator.prepare(Path::new("/data"), Path::new("/mnt/backup"), None)?;
//! println!("{}", preparation.message);
//!
//! // Apply the difference
//! let outcome = orchestrator.perform(&preparation.diff, None)?;
//! println!("{:?}, {} errors", outcome.state, outcome.report.error_count());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Core data structures (FileRecord, DiffResult, state enums)
//! - **error**: Error types and their classification
//! - **validate**: Source/destination validation
//! - **exclude**, **scan**: Exclusion rules and directory scanning
//! - **diff**: Inventory comparison and the strong file comparator
//! - **copier**: Chunked copy and safe deletion
//! - **scheduler**, **throughput**: Operation ordering and speed/ETA
//! - **orchestrator**, **worker**: Run lifecycle, foreground or background
//! - **report**: Run audit report
//! - **settings**: TOML-loadable configuration
//! - **volume**: Free space and drive type of the destination
//! - **checksums**: File hashes and signatures

pub mod cancel;
pub mod checksums;
pub mod copier;
pub mod diff;
pub mod error;
pub mod exclude;
pub mod model;
pub mod orchestrator;
pub mod progress;
pub mod report;
pub mod scan;
pub mod scheduler;
pub mod settings;
pub mod throughput;
pub mod validate;
pub mod volume;
pub mod worker;

// Re-export main types and functions
pub use cancel::CancellationToken;
pub use checksums::{
    compute_file_checksum, file_signature, ChecksumAlgorithm, ChecksumValue, FileSignature,
};
pub use copier::Copier;
pub use diff::{diff, files_identical, needs_update, MTIME_TOLERANCE_SECS};
pub use error::{EngineError, ErrorKind};
pub use exclude::ExclusionRules;
pub use model::{DiffResult, FileRecord, Inventory, OpState, OperationKind, RunState};
pub use orchestrator::{BackupOrchestrator, Preparation, RunOutcome};
pub use progress::{
    format_bytes, format_duration, format_speed, ChannelSink, ProgressEvent, ProgressSink,
    TransferStats,
};
pub use report::BackupReport;
pub use scan::{DirectoryScanner, ScanOutcome};
pub use scheduler::{FileOperation, OperationScheduler};
pub use settings::EngineSettings;
pub use throughput::ThroughputTracker;
pub use validate::{validate, ValidatedPaths};
pub use volume::{DriveKind, SystemVolumeProbe, VolumeProbe};
pub use worker::{spawn_backup, BackupHandle};
