//! # Error Tracker
//!
//! In-process error tracking for request-serving hosts: every failed or
//! erroring request is recorded in a bounded rolling history, recurring
//! errors are detected, a small rule engine flags recurrences that call for
//! a prevention action, and recent history is folded into a health verdict.
//!
//! ## Features
//!
//! - Capacity-bounded ring store behind a single read/write lock
//! - Recurrence counting per (message, path) pair
//! - Prevention rules with per-rule time windows (log-only actions)
//! - On-demand and periodic health derivation
//! - Axum middleware for ingestion and read-only query routes
//!
//! ```no_run
//! use std::sync::Arc;
//! use error_tracker::{track_errors_middleware, ErrorTracker, TrackerConfig};
//!
//! # async fn wire() {
//! let tracker = Arc::new(ErrorTracker::new(TrackerConfig::default()));
//! let _monitor = tracker.start_health_monitor();
//!
//! let app = axum::Router::new()
//!     .merge(error_tracker::http::router(tracker.clone()))
//!     .layer(axum::middleware::from_fn_with_state(tracker, track_errors_middleware));
//! # let _ = app;
//! # }
//! ```

pub mod types;
pub mod clock;
pub mod identity;
pub mod store;
pub mod classifier;
pub mod rules;
pub mod health;
pub mod config;
pub mod logging;
pub mod tracker;
pub mod ingest;
pub mod report;
pub mod http;

// Re-export commonly used types
pub use types::{ErrorKind, Result, TrackErrorRequest, TrackedError, TrackerError};
pub use clock::{Clock, ManualClock, SystemClock};
pub use crate::config::TrackerConfig;
pub use health::{HealthMonitorHandle, HealthStatus, HealthVerdict};
pub use ingest::{track_errors_middleware, CallerIdentity, HandlerErrors, RequestOutcome};
pub use logging::{init_logging, LoggingConfig};
pub use report::{parse_window, ErrorReport, HealthReport};
pub use rules::{default_rules, PreventionAction, PreventionRule};
pub use tracker::ErrorTracker;

/// Initializes logging with defaults and builds a tracker
pub fn init() -> Result<ErrorTracker> {
    init_logging(None)?;
    Ok(ErrorTracker::new(TrackerConfig::default()))
}

/// Initializes logging and the tracker from a `config::Config`
pub fn init_with_config(config: ::config::Config) -> Result<ErrorTracker> {
    let log_config = LoggingConfig::try_from(config.clone())?;
    let tracker_config = TrackerConfig::try_from(config)?;

    init_logging(Some(log_config))?;
    Ok(ErrorTracker::new(tracker_config))
}
