//! Ctrl+C handling.

use mirror_engine::CancellationToken;
use tokio::runtime::Handle;
use tokio::signal;
use tracing::{debug, warn};

/// Exit status used when a second Ctrl+C aborts the process.
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Cancel `token` on the first Ctrl+C and exit on the second.
///
/// Needs a Tokio runtime on the calling thread; returns false without
/// installing anything when there is none.
pub fn cancel_on_ctrl_c(token: CancellationToken) -> bool {
    let handle = match Handle::try_current() {
        Ok(handle) => handle,
        Err(_) => {
            debug!("no async runtime, Ctrl+C handler not installed");
            return false;
        }
    };

    handle.spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            return;
        }
        eprintln!();
        eprintln!("Stopping after the current file... (press Ctrl+C again to abort)");
        token.cancel();

        if signal::ctrl_c().await.is_ok() {
            eprintln!("Aborted.");
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    });
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_needs_a_runtime() {
        assert!(!cancel_on_ctrl_c(CancellationToken::new()));

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("Failed to build runtime");
        let token = CancellationToken::new();
        let installed = runtime.block_on(async { cancel_on_ctrl_c(token.clone()) });
        assert!(installed, "Handler should be installed inside a runtime");
        assert!(!token.is_cancelled());
    }
}
