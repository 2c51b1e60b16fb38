use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;

use error_tracker::{
    ErrorKind, ErrorTracker, HealthStatus, ManualClock, PreventionAction, PreventionRule,
    TrackErrorRequest, TrackerConfig,
};

fn tracker(config: TrackerConfig) -> (ErrorTracker, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let tracker = ErrorTracker::with_clock(config, clock.clone());
    (tracker, clock)
}

fn server_error(message: &str, path: &str) -> TrackErrorRequest {
    TrackErrorRequest::new(ErrorKind::HttpServerError, message)
        .route("GET", path)
        .status(500)
}

fn count_kind(tracker: &ErrorTracker, kind: ErrorKind) -> usize {
    tracker.all_errors().iter().filter(|e| e.kind == kind).count()
}

#[test]
fn test_capacity_retains_most_recent() {
    let (tracker, _) = tracker(TrackerConfig::default().max_errors(10).enable_prevention(false));

    for i in 0..25 {
        tracker.track_error(server_error(&format!("failure {}", i), "/api/x"));
        assert!(tracker.stored_count() <= 10);
    }

    let messages: Vec<_> = tracker.all_errors().into_iter().map(|e| e.message).collect();
    let expected: Vec<_> = (15..25).map(|i| format!("failure {}", i)).collect();
    assert_eq!(messages, expected);
}

#[test]
fn test_occurrence_count_increases_by_one() {
    let (tracker, clock) = tracker(TrackerConfig::default().enable_prevention(false));

    for expected in 1..=12 {
        let event = tracker.track_error(server_error("Bad Gateway", "/api/contacts")).remove(0);
        assert_eq!(event.occurrence_count, expected);
        assert_eq!(event.recurring, expected > 1);
        clock.advance(ChronoDuration::seconds(10));
    }
}

#[test]
fn test_eviction_resets_visible_count() {
    let (tracker, _) = tracker(TrackerConfig::default().max_errors(2).enable_prevention(false));

    tracker.track_error(server_error("Bad Gateway", "/api/a"));
    tracker.track_error(server_error("noise", "/api/b"));
    tracker.track_error(server_error("noise", "/api/b"));

    let event = tracker.track_error(server_error("Bad Gateway", "/api/a")).remove(0);
    assert_eq!(event.occurrence_count, 1);
    assert!(!event.recurring);
}

#[test]
fn test_recent_errors_window() {
    let (tracker, clock) = tracker(TrackerConfig::default().enable_prevention(false));

    tracker.track_error(server_error("two hours ago", "/api/x"));
    clock.advance(ChronoDuration::minutes(90));
    tracker.track_error(server_error("thirty minutes ago", "/api/x"));
    clock.advance(ChronoDuration::minutes(30));
    tracker.track_error(server_error("now", "/api/x"));

    let last_hour: Vec<_> = tracker
        .recent_errors(Duration::from_secs(3600))
        .into_iter()
        .map(|e| e.message)
        .collect();
    assert_eq!(last_hour, vec!["thirty minutes ago", "now"]);

    let all = tracker.recent_errors(Duration::from_secs(3 * 3600));
    assert_eq!(all.len(), 3);
    assert!(all.windows(2).all(|pair| pair[0].timestamp <= pair[1].timestamp));
}

#[test]
fn test_rule_fires_exactly_at_threshold() {
    let rule = PreventionRule::new("gateway", "", "Bad Gateway", 4, 2, PreventionAction::Retry);
    let (tracker, clock) = tracker(TrackerConfig::default().prevention_rules(vec![rule]));

    for _ in 0..3 {
        tracker.track_error(server_error("Bad Gateway", "/api/x"));
        clock.advance(ChronoDuration::seconds(20));
    }
    assert_eq!(count_kind(&tracker, ErrorKind::Prevention), 0);
    assert_eq!(count_kind(&tracker, ErrorKind::PreventionRule), 0);

    tracker.track_error(server_error("Bad Gateway", "/api/x"));
    assert_eq!(count_kind(&tracker, ErrorKind::Prevention), 1);
    assert_eq!(count_kind(&tracker, ErrorKind::PreventionRule), 1);
}

#[test]
fn test_rule_ignores_occurrences_outside_window() {
    let rule = PreventionRule::new("gateway", "", "Bad Gateway", 3, 2, PreventionAction::Fallback);
    let (tracker, clock) = tracker(TrackerConfig::default().prevention_rules(vec![rule]));

    tracker.track_error(server_error("Bad Gateway", "/api/x"));
    tracker.track_error(server_error("Bad Gateway", "/api/x"));
    clock.advance(ChronoDuration::minutes(3));

    let appended = tracker.track_error(server_error("Bad Gateway", "/api/x"));
    assert_eq!(appended.len(), 1);
    // recurrence still sees the whole retained history
    assert_eq!(appended[0].occurrence_count, 3);
}

#[test]
fn test_internal_server_error_scenario() {
    let (tracker, clock) = tracker(TrackerConfig::default());

    for _ in 0..3 {
        tracker.track_error(server_error("Internal Server Error", "/api/x"));
        clock.advance(ChronoDuration::minutes(1));
    }
    assert_eq!(count_kind(&tracker, ErrorKind::Prevention), 0);

    tracker.track_error(server_error("Internal Server Error", "/api/x"));
    clock.advance(ChronoDuration::minutes(1));
    assert_eq!(count_kind(&tracker, ErrorKind::Prevention), 0);

    tracker.track_error(server_error("Internal Server Error", "/api/x"));
    assert_eq!(count_kind(&tracker, ErrorKind::Prevention), 1);
    assert_eq!(count_kind(&tracker, ErrorKind::PreventionRule), 1);

    let audit = tracker
        .all_errors()
        .into_iter()
        .find(|e| e.kind == ErrorKind::PreventionRule)
        .unwrap();
    assert_eq!(audit.details["rule"]["id"], "internal-server-error");
    assert_eq!(audit.details["triggering_error"]["occurrence_count"], 5);
}

#[test]
fn test_health_boundaries() {
    for (critical, expected) in [
        (5, HealthStatus::Healthy),
        (6, HealthStatus::Degraded),
        (10, HealthStatus::Degraded),
        (11, HealthStatus::Unhealthy),
    ] {
        let (tracker, _) = tracker(TrackerConfig::default().enable_prevention(false));
        for i in 0..critical {
            tracker.track_error(server_error("Service Unavailable", &format!("/api/{}", i)).status(503));
        }
        // client errors never count as critical
        tracker.track_error(
            TrackErrorRequest::new(ErrorKind::HttpClientError, "Not Found")
                .route("GET", "/api/missing")
                .status(404),
        );

        let verdict = tracker.derive_health();
        assert_eq!(verdict.status, expected, "critical = {}", critical);
        assert_eq!(verdict.critical_error_count, critical);
        assert_eq!(verdict.total_error_count, critical + 1);
    }
}

#[test]
fn test_clear_then_report_is_empty() {
    let (tracker, _) = tracker(TrackerConfig::default());
    let build_id = tracker.build_id().to_string();
    let session_id = tracker.session_id().to_string();

    for _ in 0..6 {
        tracker.track_error(server_error("Internal Server Error", "/api/x"));
    }
    tracker.clear();

    let report = tracker.error_report("1h").unwrap();
    assert!(report.errors.is_empty());
    assert_eq!(report.total_errors, 0);
    assert_eq!(report.critical_errors, 0);
    assert_eq!(report.server_errors, 0);
    assert_eq!(report.client_errors, 0);
    assert!(report.patterns.is_empty());
    assert_eq!(report.build_id, build_id);
    assert_eq!(report.session_id, session_id);
}

#[test]
fn test_rules_query_returns_copy() {
    let (tracker, _) = tracker(TrackerConfig::default());

    let mut rules = tracker.prevention_rules();
    let ids: Vec<_> = rules.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(
        ids,
        vec!["internal-server-error", "database-error", "auth-error", "validation-error"]
    );

    rules[0].enabled = false;
    assert!(tracker.prevention_rules()[0].enabled);
}
