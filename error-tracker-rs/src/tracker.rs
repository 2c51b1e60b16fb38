//! # Error Tracker
//!
//! The engine tying the store, classifier, rule engine and health derivation
//! together. One tracker is built at startup and shared as
//! `Arc<ErrorTracker>` with whatever needs to record or query.
//!
//! Recording is a single critical section: classification, rule evaluation
//! and the append all happen under the store's write lock, so concurrent
//! callers for the same (message, path) pair see gap-free occurrence counts.
//! Logging, metrics and the event log sink run after the lock is released.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use tracing::{debug, info, warn};

use crate::classifier::classify;
use crate::clock::{Clock, SystemClock};
use crate::config::TrackerConfig;
use crate::health::{
    HealthMonitor, HealthMonitorHandle, HealthVerdict, HEALTH_WINDOW, UNHEALTHY_THRESHOLD,
};
use crate::identity::ProcessIdentity;
use crate::logging::EventLogSink;
use crate::rules::{PreventionRule, PreventionTrigger, RuleEngine};
use crate::store::ErrorStore;
use crate::types::{ErrorKind, TrackErrorRequest, TrackedError};

/// In-process error tracking engine
pub struct ErrorTracker {
    store: ErrorStore,
    rules: RuleEngine,
    identity: ProcessIdentity,
    clock: Arc<dyn Clock>,
    log_sink: Option<EventLogSink>,
    health_check_interval: Duration,
}

impl std::fmt::Debug for ErrorTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorTracker")
            .field("capacity", &self.store.capacity())
            .field("stored", &self.store.len())
            .field("rules", &self.rules.rules().len())
            .field("prevention_enabled", &self.rules.is_enabled())
            .field("identity", &self.identity)
            .finish()
    }
}

impl ErrorTracker {
    /// Creates a tracker using the system clock
    pub fn new(config: TrackerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a tracker reading time from `clock`.
    ///
    /// A log sink that cannot be opened is reported and skipped; tracking
    /// still works in memory.
    pub fn with_clock(config: TrackerConfig, clock: Arc<dyn Clock>) -> Self {
        let log_sink = config
            .log_path
            .as_deref()
            .and_then(|path| match EventLogSink::open(path) {
                Ok(sink) => Some(sink),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Event log sink unavailable, tracking in memory only"
                    );
                    None
                }
            });

        let identity = ProcessIdentity::generate(config.build_id.clone(), clock.now());

        info!(
            build_id = %identity.build_id,
            session_id = %identity.session_id,
            max_errors = config.max_errors,
            rules = config.prevention_rules.len(),
            prevention = config.enable_prevention,
            "Error tracker initialized"
        );

        Self {
            store: ErrorStore::new(config.max_errors),
            rules: RuleEngine::new(config.prevention_rules, config.enable_prevention),
            identity,
            clock,
            log_sink,
            health_check_interval: config.health_check_interval,
        }
    }

    /// Records one error. Returns the events appended to the store: the
    /// tracked error first, followed by the audit events of any prevention
    /// rules it triggered. Never fails; callers are free to ignore the result.
    pub fn track_error(&self, request: TrackErrorRequest) -> Vec<TrackedError> {
        let kind = request.resolved_kind();
        let mut triggers: Vec<PreventionTrigger> = Vec::new();

        let appended = self.store.record(|history| {
            let now = self.clock.now();
            let recurrence = classify(history, &request.message, &request.path);

            let event = TrackedError {
                timestamp: now,
                kind,
                message: request.message,
                path: request.path,
                method: request.method,
                status_code: request.status_code,
                caller_id: request.caller_id,
                remote_address: request.remote_address,
                user_agent: request.user_agent,
                details: request.details,
                recurring: recurrence.recurring,
                occurrence_count: recurrence.occurrence_count,
                build_id: self.identity.build_id.clone(),
                session_id: self.identity.session_id.clone(),
            };

            triggers = self.rules.evaluate(history, &event, now);

            let mut events = vec![event];
            for trigger in &triggers {
                for mut audit in trigger.audit_events(&events[0], now) {
                    let recurrence =
                        classify(history.iter().chain(events.iter()), &audit.message, &audit.path);
                    audit.occurrence_count = recurrence.occurrence_count;
                    audit.recurring = recurrence.recurring;
                    events.push(audit);
                }
            }
            events
        });

        if let Some(event) = appended.first() {
            for trigger in &triggers {
                trigger.log(event);
            }
        }
        self.after_append(&appended);

        appended
    }

    /// Records an engine-originated event (no rule evaluation)
    fn track_internal(
        &self,
        kind: ErrorKind,
        message: String,
        details: BTreeMap<String, serde_json::Value>,
    ) {
        let appended = self.store.record(|history| {
            let now = self.clock.now();
            let recurrence = classify(history, &message, "");
            vec![TrackedError {
                timestamp: now,
                kind,
                message,
                path: String::new(),
                method: String::new(),
                status_code: 0,
                caller_id: None,
                remote_address: None,
                user_agent: None,
                details,
                recurring: recurrence.recurring,
                occurrence_count: recurrence.occurrence_count,
                build_id: self.identity.build_id.clone(),
                session_id: self.identity.session_id.clone(),
            }]
        });

        self.after_append(&appended);
    }

    /// Logging, metrics and sink output for freshly appended events
    fn after_append(&self, events: &[TrackedError]) {
        for event in events {
            counter!("error_tracker.events.total", 1, "kind" => event.kind.as_str());

            debug!(
                kind = %event.kind,
                message = %event.message,
                path = %event.path,
                method = %event.method,
                status = event.status_code,
                occurrence = event.occurrence_count,
                recurring = event.recurring,
                "Tracked error recorded"
            );

            if let Some(sink) = &self.log_sink {
                sink.write_event(event);
            }
        }

        gauge!("error_tracker.store.size", self.store.len() as f64);
    }

    /// Events observed within `duration` of now, oldest first
    pub fn recent_errors(&self, duration: Duration) -> Vec<TrackedError> {
        self.store.snapshot_since(self.clock.now(), duration)
    }

    /// Every retained event, oldest first
    pub fn all_errors(&self) -> Vec<TrackedError> {
        self.store.snapshot_all()
    }

    /// Count of retained events per `kind:message`
    pub fn error_pattern_frequencies(&self) -> BTreeMap<String, usize> {
        pattern_frequencies(&self.store.snapshot_all())
    }

    pub fn build_id(&self) -> &str {
        &self.identity.build_id
    }

    pub fn session_id(&self) -> &str {
        &self.identity.session_id
    }

    /// Copy of the configured rules
    pub fn prevention_rules(&self) -> Vec<PreventionRule> {
        self.rules.rules().to_vec()
    }

    /// Drops all tracked history. Identifiers are kept.
    pub fn clear(&self) {
        self.store.clear();
        gauge!("error_tracker.store.size", 0.0);
        info!(session_id = %self.identity.session_id, "Tracked error history cleared");
    }

    /// Number of retained events
    pub fn stored_count(&self) -> usize {
        self.store.len()
    }

    /// Current wall-clock time as seen by the tracker
    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    /// Health of the last five minutes
    pub fn derive_health(&self) -> HealthVerdict {
        let now = self.clock.now();
        let window = self.store.snapshot_since(now, HEALTH_WINDOW);
        HealthVerdict::from_window(&window, now)
    }

    /// One tick of the periodic health check. When the window holds more
    /// than the unhealthy threshold of critical errors a `health_check`
    /// event documenting the spike is recorded.
    pub fn run_health_check(&self) -> HealthVerdict {
        let verdict = self.derive_health();
        counter!("error_tracker.health.checks", 1, "status" => verdict.status.as_str());

        if verdict.critical_error_count > UNHEALTHY_THRESHOLD {
            warn!(
                critical = verdict.critical_error_count,
                total = verdict.total_error_count,
                status = %verdict.status,
                "Critical error spike detected"
            );

            let mut details = BTreeMap::new();
            details.insert("critical_errors".to_string(), verdict.critical_error_count.into());
            details.insert("total_errors".to_string(), verdict.total_error_count.into());
            details.insert("window_seconds".to_string(), HEALTH_WINDOW.as_secs().into());
            details.insert("status".to_string(), verdict.status.as_str().into());

            self.track_internal(
                ErrorKind::HealthCheck,
                format!(
                    "Critical error spike: {} critical errors in the last {} minutes",
                    verdict.critical_error_count,
                    HEALTH_WINDOW.as_secs() / 60
                ),
                details,
            );
        } else {
            debug!(
                critical = verdict.critical_error_count,
                total = verdict.total_error_count,
                status = %verdict.status,
                "Health check completed"
            );
        }

        verdict
    }

    /// Starts the periodic health check at the configured interval
    pub fn start_health_monitor(self: &Arc<Self>) -> HealthMonitorHandle {
        HealthMonitor::spawn(self, self.health_check_interval)
    }
}

impl Default for ErrorTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

/// Count of events per `kind:message`
pub fn pattern_frequencies(events: &[TrackedError]) -> BTreeMap<String, usize> {
    let mut patterns = BTreeMap::new();
    for event in events {
        *patterns.entry(event.pattern_key()).or_insert(0) += 1;
    }
    patterns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::health::HealthStatus;
    use chrono::Duration as ChronoDuration;

    fn tracker_with_clock() -> (ErrorTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let tracker = ErrorTracker::with_clock(TrackerConfig::default(), clock.clone());
        (tracker, clock)
    }

    fn server_error(message: &str, path: &str) -> TrackErrorRequest {
        TrackErrorRequest::new(ErrorKind::HttpServerError, message)
            .route("GET", path)
            .status(500)
    }

    #[test]
    fn test_recurrence_counts() {
        let (tracker, _) = tracker_with_clock();

        let first = tracker.track_error(server_error("Bad Gateway", "/api/x"));
        let second = tracker.track_error(server_error("Bad Gateway", "/api/x"));
        let other_path = tracker.track_error(server_error("Bad Gateway", "/api/y"));

        assert_eq!(first[0].occurrence_count, 1);
        assert!(!first[0].recurring);
        assert_eq!(second[0].occurrence_count, 2);
        assert!(second[0].recurring);
        assert_eq!(other_path[0].occurrence_count, 1);
        assert_eq!(first[0].build_id, tracker.build_id());
        assert_eq!(first[0].session_id, tracker.session_id());
    }

    #[test]
    fn test_prevention_scenario_three_then_five() {
        let (tracker, clock) = tracker_with_clock();

        for _ in 0..3 {
            let appended = tracker.track_error(server_error("Internal Server Error", "/api/x"));
            assert_eq!(appended.len(), 1);
            clock.advance(ChronoDuration::minutes(1));
        }
        let kinds: Vec<_> = tracker.all_errors().iter().map(|e| e.kind).collect();
        assert!(!kinds.contains(&ErrorKind::Prevention));

        let fourth = tracker.track_error(server_error("Internal Server Error", "/api/x"));
        assert_eq!(fourth.len(), 1);
        clock.advance(ChronoDuration::minutes(1));

        let fifth = tracker.track_error(server_error("Internal Server Error", "/api/x"));
        assert_eq!(fifth.len(), 3);
        assert_eq!(fifth[1].kind, ErrorKind::PreventionRule);
        assert_eq!(fifth[2].kind, ErrorKind::Prevention);
        assert_eq!(fifth[2].details["action"], "alert");
    }

    #[test]
    fn test_prevention_disabled() {
        let clock = Arc::new(ManualClock::default());
        let tracker = ErrorTracker::with_clock(
            TrackerConfig::default().enable_prevention(false),
            clock,
        );

        for _ in 0..10 {
            assert_eq!(tracker.track_error(server_error("Internal Server Error", "/api/x")).len(), 1);
        }
    }

    #[test]
    fn test_clear_keeps_identifiers() {
        let (tracker, _) = tracker_with_clock();
        let build_id = tracker.build_id().to_string();
        let session_id = tracker.session_id().to_string();

        tracker.track_error(server_error("Bad Gateway", "/api/x"));
        tracker.clear();

        assert!(tracker.recent_errors(Duration::from_secs(3600)).is_empty());
        assert!(tracker.error_pattern_frequencies().is_empty());
        assert_eq!(tracker.build_id(), build_id);
        assert_eq!(tracker.session_id(), session_id);
    }

    #[test]
    fn test_pattern_frequencies() {
        let (tracker, _) = tracker_with_clock();
        tracker.track_error(server_error("Bad Gateway", "/api/x"));
        tracker.track_error(server_error("Bad Gateway", "/api/y"));
        tracker.track_error(TrackErrorRequest::new(ErrorKind::HandlerError, "lead not found"));

        let patterns = tracker.error_pattern_frequencies();
        assert_eq!(patterns["http_server_error:Bad Gateway"], 2);
        assert_eq!(patterns["handler_error:lead not found"], 1);
    }

    #[test]
    fn test_health_check_records_spike() {
        let (tracker, _) = tracker_with_clock();
        for i in 0..11 {
            tracker.track_error(server_error("Service Unavailable", &format!("/api/{}", i)).status(503));
        }

        let verdict = tracker.run_health_check();
        assert_eq!(verdict.status, HealthStatus::Unhealthy);
        assert_eq!(verdict.critical_error_count, 11);

        let spikes: Vec<_> = tracker
            .all_errors()
            .into_iter()
            .filter(|e| e.kind == ErrorKind::HealthCheck)
            .collect();
        assert_eq!(spikes.len(), 1);
        assert_eq!(spikes[0].details["critical_errors"], 11);
        assert_eq!(spikes[0].status_code, 0);

        // the synthetic event is not critical itself
        assert_eq!(tracker.derive_health().critical_error_count, 11);
    }

    #[test]
    fn test_health_window_slides() {
        let (tracker, clock) = tracker_with_clock();
        for _ in 0..8 {
            tracker.track_error(server_error("Internal Server Error", "/api/z"));
        }
        assert_eq!(tracker.derive_health().status, HealthStatus::Degraded);

        clock.advance(ChronoDuration::minutes(6));
        let verdict = tracker.derive_health();
        assert_eq!(verdict.status, HealthStatus::Healthy);
        assert_eq!(verdict.total_error_count, 0);
    }
}
