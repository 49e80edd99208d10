//! Background execution of a prepared run.
//!
//! [`spawn_backup`] moves a prepared orchestrator onto its own thread so the
//! caller stays free to render progress and to request a stop. Progress
//! events arrive on an unbounded channel; the worker never blocks on it.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver};
use tracing::error;

use crate::cancel::CancellationToken;
use crate::error::EngineError;
use crate::model::DiffResult;
use crate::orchestrator::{BackupOrchestrator, RunOutcome};
use crate::progress::{ChannelSink, ProgressEvent};
use crate::volume::VolumeProbe;

/// Handle to a run executing on a worker thread.
pub struct BackupHandle {
    events: Receiver<ProgressEvent>,
    cancel: CancellationToken,
    thread: JoinHandle<Result<RunOutcome, EngineError>>,
}

impl BackupHandle {
    /// Progress events of the run. The channel disconnects when the run ends.
    pub fn events(&self) -> &Receiver<ProgressEvent> {
        &self.events
    }

    /// Ask the run to stop before its next operation.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the run to end.
    pub fn join(self) -> Result<RunOutcome, EngineError> {
        match self.thread.join() {
            Ok(result) => result,
            Err(_) => {
                error!("backup worker panicked");
                Err(EngineError::Unknown {
                    message: "backup worker panicked".to_string(),
                })
            }
        }
    }
}

/// Run `perform(diff)` of a prepared orchestrator on a background thread.
///
/// # Errors
/// Returns `Unknown` if the thread cannot be spawned.
pub fn spawn_backup<P>(
    mut orchestrator: BackupOrchestrator<P>,
    diff: DiffResult,
) -> Result<BackupHandle, EngineError>
where
    P: VolumeProbe + Send + 'static,
{
    let (sender, events) = unbounded();
    let cancel = orchestrator.cancellation_token();

    let thread = thread::Builder::new()
        .name("mirror-worker".to_string())
        .spawn(move || {
            let sink = ChannelSink::new(sender);
            orchestrator.perform(&diff, Some(&sink))
        })
        .map_err(|e| EngineError::Unknown {
            message: format!("failed to spawn backup worker: {}", e),
        })?;

    Ok(BackupHandle {
        events,
        cancel,
        thread,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::EngineSettings;
    use crate::model::RunState;
    use std::fs;

    #[test]
    fn test_worker_runs_prepared_backup() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("a.txt"), b"hello").unwrap();

        let mut orchestrator = BackupOrchestrator::new(EngineSettings::default());
        let prep = orchestrator.prepare(&src, &dst, None).expect("Prepare should succeed");

        let handle = spawn_backup(orchestrator, prep.diff).expect("Worker should start");
        let events: Vec<ProgressEvent> = handle.events().iter().collect();
        let outcome = handle.join().expect("Worker should finish");

        assert_eq!(outcome.state, RunState::Completed);
        assert_eq!(fs::read(dst.join("a.txt")).unwrap(), b"hello");
        assert!(events
            .iter()
            .any(|e| matches!(e, ProgressEvent::OperationFinished { .. })));
    }

    #[test]
    fn test_stop_before_start_cancels_run() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("a.txt"), b"hello").unwrap();

        let mut orchestrator = BackupOrchestrator::new(EngineSettings::default());
        let prep = orchestrator.prepare(&src, &dst, None).unwrap();
        orchestrator.stop();

        let handle = spawn_backup(orchestrator, prep.diff).unwrap();
        let outcome = handle.join().unwrap();
        assert_eq!(outcome.state, RunState::Cancelled);
        assert!(!dst.join("a.txt").exists());
    }
}
