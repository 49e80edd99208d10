//! Transfer speed and ETA estimation.
//!
//! Instantaneous speed is sampled at most once per update interval. The
//! reported speed is a recency-weighted average of the newest samples, each
//! weighted by `1 / (age_secs + 1)`. The ETA is `remaining / speed`, blended
//! exponentially with the previous estimate to keep the display steady.
//!
//! All methods taking an `Instant` have a `*_at` form so callers (and tests)
//! control the clock.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::progress::TransferStats;

/// Tuning knobs for a [`ThroughputTracker`].
#[derive(Debug, Clone, PartialEq)]
pub struct ThroughputConfig {
    /// Number of newest samples used for the weighted average
    pub window: usize,
    /// Hard cap on retained samples
    pub max_samples: usize,
    /// Minimum time between two samples
    pub update_interval: Duration,
    /// Weight of the new ETA when blending with the previous one
    pub eta_smoothing: f64,
}

impl Default for ThroughputConfig {
    fn default() -> Self {
        ThroughputConfig {
            window: 20,
            max_samples: 100,
            update_interval: Duration::from_secs(1),
            eta_smoothing: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SpeedSample {
    at: Instant,
    speed: f64,
}

/// Bytes-over-time tracker producing [`TransferStats`].
#[derive(Debug, Clone)]
pub struct ThroughputTracker {
    config: ThroughputConfig,
    samples: VecDeque<SpeedSample>,
    started: Option<Instant>,
    last_sample: Option<(Instant, u64)>,
    processed: u64,
    total: u64,
    speed: f64,
    eta: f64,
}

impl Default for ThroughputTracker {
    fn default() -> Self {
        ThroughputTracker::new(ThroughputConfig::default())
    }
}

impl ThroughputTracker {
    pub fn new(config: ThroughputConfig) -> Self {
        let capacity = config.max_samples.max(1);
        ThroughputTracker {
            config,
            samples: VecDeque::with_capacity(capacity),
            started: None,
            last_sample: None,
            processed: 0,
            total: 0,
            speed: 0.0,
            eta: 0.0,
        }
    }

    pub fn start(&mut self) {
        self.start_at(Instant::now());
    }

    /// Reset the samples and mark `now` as the zero point.
    pub fn start_at(&mut self, now: Instant) {
        self.samples.clear();
        self.started = Some(now);
        self.last_sample = Some((now, self.processed));
        self.speed = 0.0;
        self.eta = 0.0;
    }

    pub fn set_total(&mut self, total: u64) {
        self.total = total;
    }

    pub fn add_total(&mut self, bytes: u64) {
        self.total = self.total.saturating_add(bytes);
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn record(&mut self, processed: u64) -> bool {
        self.record_at(processed, Instant::now())
    }

    /// Record the cumulative byte count.
    ///
    /// Returns true when a new speed sample was taken, i.e. at least one
    /// update interval passed since the previous sample.
    pub fn record_at(&mut self, processed: u64, now: Instant) -> bool {
        self.processed = processed;

        let (last_at, last_bytes) = match self.last_sample {
            Some(last) => last,
            None => {
                self.started = Some(now);
                self.last_sample = Some((now, processed));
                return false;
            }
        };

        let elapsed = now.saturating_duration_since(last_at);
        if elapsed < self.config.update_interval || elapsed.is_zero() {
            return false;
        }

        let delta = processed.saturating_sub(last_bytes) as f64;
        let speed = delta / elapsed.as_secs_f64();
        self.samples.push_back(SpeedSample { at: now, speed });
        while self.samples.len() > self.config.max_samples.max(1) {
            self.samples.pop_front();
        }
        self.last_sample = Some((now, processed));

        self.speed = self.weighted_speed(now);
        self.update_eta();
        true
    }

    fn weighted_speed(&self, now: Instant) -> f64 {
        let window = self.config.window.max(1);
        let skip = self.samples.len().saturating_sub(window);

        let (weighted, weights) = self.samples.iter().skip(skip).fold(
            (0.0, 0.0),
            |(weighted, weights), sample| {
                let age = now.saturating_duration_since(sample.at).as_secs_f64();
                let weight = 1.0 / (age + 1.0);
                (weighted + sample.speed * weight, weights + weight)
            },
        );

        if weights > 0.0 {
            weighted / weights
        } else {
            0.0
        }
    }

    fn update_eta(&mut self) {
        let remaining = self.total.saturating_sub(self.processed);
        if remaining == 0 {
            self.eta = 0.0;
            return;
        }
        if self.speed <= 0.0 {
            return;
        }

        let raw = remaining as f64 / self.speed;
        self.eta = if self.eta > 0.0 {
            let alpha = self.config.eta_smoothing;
            alpha * raw + (1.0 - alpha) * self.eta
        } else {
            raw
        };
    }

    /// Current speed estimate in bytes per second.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Current smoothed ETA in seconds.
    pub fn eta_secs(&self) -> f64 {
        self.eta
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn stats(&self) -> TransferStats {
        self.stats_at(Instant::now())
    }

    pub fn stats_at(&self, now: Instant) -> TransferStats {
        let percent = if self.total > 0 {
            (self.processed as f64 / self.total as f64 * 100.0).min(100.0)
        } else {
            0.0
        };
        let elapsed_secs = self
            .started
            .map(|start| now.saturating_duration_since(start).as_secs_f64())
            .unwrap_or(0.0);

        TransferStats {
            speed: self.speed,
            eta_secs: self.eta,
            processed: self.processed,
            total: self.total,
            percent,
            elapsed_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_weighted_speed_and_smoothed_eta() {
        let t0 = Instant::now();
        let mut tracker = ThroughputTracker::default();
        tracker.set_total(5000);
        tracker.start_at(t0);

        assert!(tracker.record_at(1000, t0 + Duration::from_secs(1)));
        assert!(close(tracker.speed(), 1000.0));
        assert!(close(tracker.eta_secs(), 4.0));

        assert!(tracker.record_at(3000, t0 + Duration::from_secs(2)));
        // samples 1000 B/s (age 1, weight 1/2) and 2000 B/s (age 0, weight 1)
        assert!(close(tracker.speed(), 2500.0 / 1.5));
        // raw 2000 / 1666.67 = 1.2, blended 0.2 * 1.2 + 0.8 * 4.0
        assert!(close(tracker.eta_secs(), 3.44));

        let stats = tracker.stats_at(t0 + Duration::from_secs(2));
        assert_eq!(stats.processed, 3000);
        assert!(close(stats.percent, 60.0));
        assert!(close(stats.elapsed_secs, 2.0));
    }

    #[test]
    fn test_samples_respect_update_interval() {
        let t0 = Instant::now();
        let mut tracker = ThroughputTracker::default();
        tracker.start_at(t0);

        assert!(!tracker.record_at(10, t0 + Duration::from_millis(300)));
        assert!(!tracker.record_at(20, t0 + Duration::from_millis(900)));
        assert_eq!(tracker.sample_count(), 0);
        assert_eq!(tracker.processed(), 20);
        assert!(tracker.record_at(30, t0 + Duration::from_millis(1000)));
        assert_eq!(tracker.sample_count(), 1);
    }

    #[test]
    fn test_sample_history_is_capped() {
        let t0 = Instant::now();
        let mut tracker = ThroughputTracker::new(ThroughputConfig {
            max_samples: 3,
            ..ThroughputConfig::default()
        });
        tracker.start_at(t0);
        for i in 1..=10u64 {
            tracker.record_at(i * 100, t0 + Duration::from_secs(i));
        }
        assert_eq!(tracker.sample_count(), 3);
        assert!(close(tracker.speed(), 100.0));
    }

    #[test]
    fn test_eta_is_zero_when_done() {
        let t0 = Instant::now();
        let mut tracker = ThroughputTracker::default();
        tracker.set_total(100);
        tracker.start_at(t0);
        tracker.record_at(100, t0 + Duration::from_secs(1));
        assert_eq!(tracker.eta_secs(), 0.0);
        assert!(close(tracker.stats_at(t0).percent, 100.0));
    }
}
