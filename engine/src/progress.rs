//! Progress reporting.
//!
//! The engine pushes [`ProgressEvent`]s into a [`ProgressSink`], which keeps it
//! decoupled from any specific front end (CLI, GUI, etc.). Sinks are called
//! synchronously from the worker, at high frequency, so implementations must
//! return quickly. [`ChannelSink`] forwards events to another thread through
//! an unbounded channel and never blocks.

use crossbeam_channel::Sender;
use serde::Serialize;

use crate::model::{OpState, OperationKind};

/// Derived transfer statistics, emitted periodically during a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransferStats {
    /// Recency-weighted transfer speed in bytes per second
    pub speed: f64,
    /// Smoothed estimate of the remaining time in seconds
    pub eta_secs: f64,
    /// Bytes transferred so far
    pub processed: u64,
    /// Bytes the run expects to transfer
    pub total: u64,
    /// `processed / total` as a percentage (0-100)
    pub percent: f64,
    /// Seconds since the first recorded progress
    pub elapsed_secs: f64,
}

/// A single progress notification.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Phase change or other human-readable status line
    Status(String),
    /// Scanner reached another batch of files
    Scanning { relpath: String, count: usize },
    /// An operation is about to start
    OperationStarted { kind: OperationKind, relpath: String },
    /// Cumulative bytes transferred in this run
    Bytes { transferred: u64 },
    /// Throttled speed/ETA snapshot
    Stats(TransferStats),
    /// An operation finished
    OperationFinished { relpath: String, state: OpState },
}

/// Receiver of progress events.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn emit(&self, event: ProgressEvent) {
        self(event)
    }
}

/// A sink that forwards events to a channel.
pub struct ChannelSink {
    sender: Sender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(sender: Sender<ProgressEvent>) -> Self {
        ChannelSink { sender }
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        // Receiver gone means nobody is listening anymore; keep working.
        let _ = self.sender.send(event);
    }
}

/// Emit `event` if a sink is attached.
pub(crate) fn emit(sink: Option<&dyn ProgressSink>, event: ProgressEvent) {
    if let Some(sink) = sink {
        sink.emit(event);
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

/// Format speed as human-readable string
pub fn format_speed(bytes_per_second: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_second.max(0.0) as u64))
}

/// Format a number of seconds as `1h 2m 3s`, `2m 3s` or `3s`.
pub fn format_duration(seconds: f64) -> String {
    let secs = seconds.max(0.0).round() as u64;
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1023), "1023.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
    }

    #[test]
    fn test_format_speed_and_duration() {
        assert_eq!(format_speed(1024.0), "1.00 KB/s");
        assert_eq!(format_duration(30.0), "30s");
        assert_eq!(format_duration(90.0), "1m 30s");
        assert_eq!(format_duration(3661.0), "1h 1m 1s");
    }

    #[test]
    fn test_closure_sink_receives_events() {
        let seen = Mutex::new(Vec::new());
        let sink = |event: ProgressEvent| seen.lock().unwrap().push(event);

        emit(Some(&sink), ProgressEvent::Bytes { transferred: 42 });
        emit(None, ProgressEvent::Bytes { transferred: 7 });

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen, vec![ProgressEvent::Bytes { transferred: 42 }]);
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let sink = ChannelSink::new(tx);
        sink.emit(ProgressEvent::Status("scanning".to_string()));
        assert_eq!(
            rx.try_recv().ok(),
            Some(ProgressEvent::Status("scanning".to_string()))
        );

        drop(rx);
        sink.emit(ProgressEvent::Status("ignored".to_string()));
    }
}
