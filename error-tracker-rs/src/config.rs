//! # Tracker Configuration
//!
//! Construction-time settings. Values can be built directly, taken from
//! `Default`, or read from a `config::Config` under the `error_tracking.*`
//! keys, where every missing key falls back to its default.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::health::DEFAULT_HEALTH_CHECK_INTERVAL;
use crate::rules::{default_rules, PreventionRule};
use crate::store::DEFAULT_MAX_ERRORS;

/// Configuration for an `ErrorTracker`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Number of events retained in memory
    pub max_errors: usize,
    /// Period of the background health check
    pub health_check_interval: Duration,
    /// Whether prevention rules are evaluated at all
    pub enable_prevention: bool,
    /// Rules to evaluate, in order
    pub prevention_rules: Vec<PreventionRule>,
    /// File receiving one line per tracked event
    pub log_path: Option<PathBuf>,
    /// Build identifier injected by the deployment, generated when absent
    pub build_id: Option<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_errors: DEFAULT_MAX_ERRORS,
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            enable_prevention: true,
            prevention_rules: default_rules(),
            log_path: None,
            build_id: None,
        }
    }
}

impl TrackerConfig {
    /// Sets the retained event count
    pub fn max_errors(mut self, max_errors: usize) -> Self {
        self.max_errors = max_errors;
        self
    }

    /// Sets the background health check period
    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Turns rule evaluation on or off
    pub fn enable_prevention(mut self, enabled: bool) -> Self {
        self.enable_prevention = enabled;
        self
    }

    /// Replaces the rule list
    pub fn prevention_rules(mut self, rules: Vec<PreventionRule>) -> Self {
        self.prevention_rules = rules;
        self
    }

    /// Sets the event log file
    pub fn log_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.log_path = Some(path.into());
        self
    }
}

impl TryFrom<config::Config> for TrackerConfig {
    type Error = config::ConfigError;

    fn try_from(cfg: config::Config) -> std::result::Result<Self, Self::Error> {
        // Start with defaults and override from config where present.
        let mut base = TrackerConfig::default();

        if let Ok(max_errors) = cfg.get::<usize>("error_tracking.max_errors") {
            base.max_errors = max_errors;
        }
        if let Ok(secs) = cfg.get::<u64>("error_tracking.health_check_interval_secs") {
            base.health_check_interval = Duration::from_secs(secs);
        }
        if let Ok(enabled) = cfg.get::<bool>("error_tracking.enable_prevention") {
            base.enable_prevention = enabled;
        }
        if let Ok(path) = cfg.get::<String>("error_tracking.log_path") {
            base.log_path = Some(PathBuf::from(path));
        }
        if let Ok(build_id) = cfg.get::<String>("error_tracking.build_id") {
            base.build_id = Some(build_id);
        }

        // A present but malformed rule list is an error rather than a silent
        // fallback to the built-ins.
        match cfg.get::<Vec<PreventionRule>>("error_tracking.prevention_rules") {
            Ok(rules) => base.prevention_rules = rules,
            Err(config::ConfigError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        Ok(base)
    }
}
