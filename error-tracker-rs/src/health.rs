//! # Health Aggregation
//!
//! Health is a pure function of the last five minutes of tracked events:
//! more than 10 critical (status >= 500) events is unhealthy, more than 5 is
//! degraded, anything else is healthy. Nothing is cached and there is no
//! hysteresis, so consecutive checks may flap.
//!
//! `HealthMonitor` runs the same derivation on a timer and records a
//! `health_check` event whenever the window is unhealthy.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::tracker::ErrorTracker;
use crate::types::TrackedError;

/// Window inspected by every health derivation
pub const HEALTH_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Critical events above which health is degraded
pub const DEGRADED_THRESHOLD: usize = 5;

/// Critical events above which health is unhealthy
pub const UNHEALTHY_THRESHOLD: usize = 10;

/// Default period of the background check
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Longest accepted period; larger intervals are clamped to it
pub const MAX_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Overall health classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Classifies a critical-error count
    pub fn from_critical_count(critical: usize) -> Self {
        if critical > UNHEALTHY_THRESHOLD {
            HealthStatus::Unhealthy
        } else if critical > DEGRADED_THRESHOLD {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived health of the tracked window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthVerdict {
    pub status: HealthStatus,
    pub critical_error_count: usize,
    pub total_error_count: usize,
    pub checked_at: DateTime<Utc>,
}

impl HealthVerdict {
    /// Builds a verdict from the events already restricted to the window
    pub fn from_window(window: &[TrackedError], checked_at: DateTime<Utc>) -> Self {
        let critical_error_count = window.iter().filter(|event| event.is_critical()).count();

        Self {
            status: HealthStatus::from_critical_count(critical_error_count),
            critical_error_count,
            total_error_count: window.len(),
            checked_at,
        }
    }
}

/// Handle to a running health monitor
#[derive(Debug)]
pub struct HealthMonitorHandle {
    shutdown_tx: watch::Sender<bool>,
    worker: JoinHandle<()>,
}

impl HealthMonitorHandle {
    /// Signals the monitor to stop without waiting for it
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Signals the monitor to stop and waits for the task to exit
    pub async fn shutdown(self) {
        self.stop();
        let _ = self.worker.await;
    }

    /// True once the monitor task has exited
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }
}

/// Periodic health check over a tracker
pub struct HealthMonitor;

impl HealthMonitor {
    /// Spawns the check loop on the current tokio runtime. The first check
    /// runs one `period` after start. `period` is clamped to
    /// `1ms..=MAX_HEALTH_CHECK_INTERVAL`. The loop ends when stopped or when
    /// the tracker is dropped.
    pub fn spawn(tracker: &Arc<ErrorTracker>, period: Duration) -> HealthMonitorHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let tracker: Weak<ErrorTracker> = Arc::downgrade(tracker);
        if period > MAX_HEALTH_CHECK_INTERVAL {
            warn!(
                requested_secs = period.as_secs(),
                max_secs = MAX_HEALTH_CHECK_INTERVAL.as_secs(),
                "Health check interval too large, clamping"
            );
        }
        let period = period.clamp(Duration::from_millis(1), MAX_HEALTH_CHECK_INTERVAL);

        let worker = tokio::spawn(async move {
            let now = Instant::now();
            let mut ticker = interval_at(now.checked_add(period).unwrap_or(now), period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(interval_secs = period.as_secs(), "Health monitor started");

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("Health monitor shutting down");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let Some(tracker) = tracker.upgrade() else {
                            debug!("Tracker dropped, health monitor exiting");
                            break;
                        };
                        tracker.run_health_check();
                    }
                }
            }
        });

        HealthMonitorHandle {
            shutdown_tx,
            worker,
        }
    }
}
