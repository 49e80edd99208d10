//! Engine configuration.
//!
//! [`EngineSettings`] gathers every tunable of a run. It deserializes from
//! TOML with every field optional:
//!
//! ```toml
//! exclude_patterns = ["*.tmp", "node_modules/"]
//! min_size = 1
//! use_scheduler = true
//!
//! [scheduler]
//! max_completed = 500
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EngineError;
use crate::exclude::ExclusionRules;
use crate::report::DEFAULT_REPORT_FILE;
use crate::scan::DEFAULT_PROGRESS_INTERVAL;
use crate::scheduler::SchedulerConfig;
use crate::throughput::ThroughputConfig;

/// Patterns excluded unless a settings file says otherwise.
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &["*.tmp", "~*", "Thumbs.db", ".DS_Store"];

/// Settings for the scheduled execution mode and its throughput tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub max_completed: usize,
    pub max_speed_samples: usize,
    pub speed_window: usize,
    pub update_interval_secs: f64,
    pub eta_smoothing: f64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        SchedulerSettings {
            max_completed: 1000,
            max_speed_samples: 100,
            speed_window: 20,
            update_interval_secs: 1.0,
            eta_smoothing: 0.2,
        }
    }
}

impl SchedulerSettings {
    pub fn throughput_config(&self) -> ThroughputConfig {
        let fallback = ThroughputConfig::default().update_interval;
        // Out-of-range values (NaN, infinite, beyond `Duration::MAX`) fall back
        let update_interval = if self.update_interval_secs.is_nan() {
            fallback
        } else {
            Duration::try_from_secs_f64(self.update_interval_secs.max(0.0)).unwrap_or(fallback)
        };
        ThroughputConfig {
            window: self.speed_window.max(1),
            max_samples: self.max_speed_samples.max(1),
            update_interval,
            eta_smoothing: self.eta_smoothing.clamp(0.0, 1.0),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_completed: self.max_completed.max(1),
            throughput: self.throughput_config(),
        }
    }
}

/// Every tunable of a mirror run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Copy chunk size; `None` lets the destination drive type decide
    pub chunk_size: Option<usize>,
    pub exclude_patterns: Vec<String>,
    pub excluded_names: Vec<String>,
    pub excluded_paths: Vec<PathBuf>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    /// Files between two scan progress events
    pub scan_progress_interval: usize,
    /// Execute through the priority scheduler instead of the flat order
    pub use_scheduler: bool,
    /// Byte-compare every written file once the batch is done
    pub verify_after_copy: bool,
    pub report_file_name: String,
    pub scheduler: SchedulerSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            chunk_size: None,
            exclude_patterns: DEFAULT_EXCLUDE_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            excluded_names: Vec::new(),
            excluded_paths: Vec::new(),
            min_size: None,
            max_size: None,
            scan_progress_interval: DEFAULT_PROGRESS_INTERVAL,
            use_scheduler: false,
            verify_after_copy: false,
            report_file_name: DEFAULT_REPORT_FILE.to_string(),
            scheduler: SchedulerSettings::default(),
        }
    }
}

impl EngineSettings {
    /// Load settings from a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let content = fs::read_to_string(path).map_err(|e| EngineError::Settings {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let settings = Self::from_toml(&content).map_err(|message| EngineError::Settings {
            path: path.to_path_buf(),
            message,
        })?;
        debug!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    fn from_toml(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Compile the exclusion fields into scan rules.
    pub fn exclusion_rules(&self) -> Result<ExclusionRules, EngineError> {
        let mut rules = ExclusionRules::new();
        for pattern in &self.exclude_patterns {
            rules.add_pattern(pattern)?;
        }
        for name in &self.excluded_names {
            rules.add_excluded_name(name);
        }
        for path in &self.excluded_paths {
            rules.add_excluded_path(path);
        }
        rules.add_size_limit(self.min_size, self.max_size);
        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = EngineSettings::default();
        assert_eq!(settings.exclude_patterns, DEFAULT_EXCLUDE_PATTERNS);
        assert_eq!(settings.scan_progress_interval, 100);
        assert_eq!(settings.report_file_name, "backup_report.json");
        assert!(!settings.use_scheduler);
        assert_eq!(settings.scheduler.max_completed, 1000);

        let throughput = settings.scheduler.throughput_config();
        assert_eq!(throughput.window, 20);
        assert_eq!(throughput.max_samples, 100);
        assert_eq!(throughput.update_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings = EngineSettings::from_toml(
            r#"
            exclude_patterns = ["*.log"]
            chunk_size = 4096
            use_scheduler = true

            [scheduler]
            max_completed = 10
            "#,
        )
        .expect("Settings should parse");

        assert_eq!(settings.exclude_patterns, vec!["*.log"]);
        assert_eq!(settings.chunk_size, Some(4096));
        assert!(settings.use_scheduler);
        assert_eq!(settings.scheduler.max_completed, 10);
        assert_eq!(settings.scheduler.speed_window, 20);
        assert_eq!(settings.report_file_name, "backup_report.json");
    }

    #[test]
    fn test_out_of_range_interval_falls_back() {
        let settings = EngineSettings::from_toml("[scheduler]\nupdate_interval_secs = 1e30")
            .expect("Settings should parse");
        let throughput = settings.scheduler.throughput_config();
        assert_eq!(throughput.update_interval, Duration::from_secs(1));

        for value in [f64::INFINITY, f64::NAN] {
            let scheduler = SchedulerSettings {
                update_interval_secs: value,
                ..SchedulerSettings::default()
            };
            assert_eq!(
                scheduler.throughput_config().update_interval,
                Duration::from_secs(1)
            );
        }

        let negative = SchedulerSettings {
            update_interval_secs: -3.0,
            ..SchedulerSettings::default()
        };
        assert_eq!(negative.throughput_config().update_interval, Duration::ZERO);
        assert_eq!(
            negative.scheduler_config().throughput.update_interval,
            Duration::ZERO
        );
    }

    #[test]
    fn test_load_reports_path_on_error() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("mirror.toml");
        fs::write(&path, "use_scheduler = \"yes\"").unwrap();

        let err = EngineSettings::load(&path).expect_err("Wrong type must be rejected");
        assert!(matches!(err, EngineError::Settings { .. }));
        assert!(err.to_string().contains("mirror.toml"));

        let missing = EngineSettings::load(&temp_dir.path().join("none.toml"));
        assert!(matches!(missing, Err(EngineError::Settings { .. })));
    }

    #[test]
    fn test_exclusion_rules_from_settings() {
        let settings = EngineSettings {
            exclude_patterns: vec!["*.bak".to_string()],
            excluded_names: vec!["secrets".to_string()],
            max_size: Some(10),
            ..EngineSettings::default()
        };
        let rules = settings.exclusion_rules().unwrap();
        let abs = Path::new("/src/x");
        assert!(rules.excludes_file("a.bak", abs, 1));
        assert!(rules.excludes_dir("secrets", abs));
        assert!(rules.excludes_file("big.bin", abs, 11));
        assert!(!rules.excludes_file("a.txt", abs, 1));

        let bad = EngineSettings {
            exclude_patterns: vec!["[".to_string()],
            ..EngineSettings::default()
        };
        assert!(matches!(
            bad.exclusion_rules(),
            Err(EngineError::InvalidPattern { .. })
        ));
    }
}
