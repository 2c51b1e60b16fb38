//! # Prevention Rules
//!
//! A small, fixed rule list evaluated against every request-derived event.
//! A rule fires when its pattern occurs in the event message and the
//! (message, path) pair has been seen at least `max_occurrences` times within
//! the rule's window. Firing is observational: the engine records an audit
//! trail and logs the action it would take, it never performs the action.
//!
//! Pattern matching is case-sensitive substring containment. It is
//! deliberately coarse and is not a regular expression engine.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::store::window_start;
use crate::types::{ErrorKind, TrackedError};

/// Mitigation a triggered rule asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreventionAction {
    /// Retry the failing operation
    Retry,
    /// Switch to a fallback path
    Fallback,
    /// Raise an alert for an operator
    Alert,
}

impl PreventionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreventionAction::Retry => "retry",
            PreventionAction::Fallback => "fallback",
            PreventionAction::Alert => "alert",
        }
    }
}

impl fmt::Display for PreventionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_enabled() -> bool {
    true
}

/// One prevention rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreventionRule {
    pub id: String,
    #[serde(default)]
    pub description: String,
    /// Substring looked for in the event message
    pub pattern: String,
    /// Occurrences within the window needed to fire
    pub max_occurrences: usize,
    /// Window size in minutes
    pub time_window_minutes: u64,
    pub action: PreventionAction,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl PreventionRule {
    /// Creates an enabled rule
    pub fn new<I, D, P>(
        id: I,
        description: D,
        pattern: P,
        max_occurrences: usize,
        time_window_minutes: u64,
        action: PreventionAction,
    ) -> Self
    where
        I: Into<String>,
        D: Into<String>,
        P: Into<String>,
    {
        Self {
            id: id.into(),
            description: description.into(),
            pattern: pattern.into(),
            max_occurrences,
            time_window_minutes,
            action,
            enabled: true,
        }
    }

    /// True when both strings are non-empty and `message` contains the pattern
    pub fn matches(&self, message: &str) -> bool {
        !message.is_empty() && !self.pattern.is_empty() && message.contains(self.pattern.as_str())
    }

    /// Window as a std duration
    pub fn time_window(&self) -> Duration {
        Duration::from_secs(self.time_window_minutes.saturating_mul(60))
    }
}

/// The four rules installed when no custom list is configured
pub fn default_rules() -> Vec<PreventionRule> {
    vec![
        PreventionRule::new(
            "internal-server-error",
            "Repeated internal server errors on the same route",
            "Internal Server Error",
            5,
            10,
            PreventionAction::Alert,
        ),
        PreventionRule::new(
            "database-error",
            "Repeated database failures, likely transient",
            "database",
            3,
            5,
            PreventionAction::Retry,
        ),
        PreventionRule::new(
            "auth-error",
            "Burst of rejected credentials from one route",
            "Unauthorized",
            10,
            15,
            PreventionAction::Alert,
        ),
        PreventionRule::new(
            "validation-error",
            "Sustained validation failures, serve the fallback form",
            "validation",
            20,
            30,
            PreventionAction::Fallback,
        ),
    ]
}

/// A rule that fired for one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreventionTrigger {
    pub rule: PreventionRule,
    /// Occurrences of the pair within the rule window, including the new event
    pub occurrences_in_window: usize,
}

impl PreventionTrigger {
    /// Audit events for this trigger: a `prevention_rule` record followed by
    /// the `prevention` action declaration. Identifiers are copied from the
    /// triggering event.
    pub fn audit_events(&self, triggering: &TrackedError, now: DateTime<Utc>) -> Vec<TrackedError> {
        let rule_value = serde_json::to_value(&self.rule).unwrap_or(serde_json::Value::Null);
        let triggering_value = serde_json::to_value(triggering).unwrap_or(serde_json::Value::Null);

        let mut rule_event = engine_event(
            triggering,
            now,
            ErrorKind::PreventionRule,
            format!("Prevention rule triggered: {}", self.rule.id),
        );
        rule_event.details.insert("rule".to_string(), rule_value);
        rule_event
            .details
            .insert("triggering_error".to_string(), triggering_value);
        rule_event.details.insert(
            "occurrences_in_window".to_string(),
            self.occurrences_in_window.into(),
        );

        let mut action_event = engine_event(
            triggering,
            now,
            ErrorKind::Prevention,
            format!(
                "Prevention action '{}' for rule {}",
                self.rule.action, self.rule.id
            ),
        );
        action_event
            .details
            .insert("rule_id".to_string(), self.rule.id.clone().into());
        action_event
            .details
            .insert("action".to_string(), self.rule.action.as_str().into());
        action_event.details.insert(
            "occurrences_in_window".to_string(),
            self.occurrences_in_window.into(),
        );
        action_event.details.insert(
            "time_window_minutes".to_string(),
            self.rule.time_window_minutes.into(),
        );

        vec![rule_event, action_event]
    }

    /// Logs the action that would be taken
    pub fn log(&self, triggering: &TrackedError) {
        counter!(
            "error_tracker.prevention.triggered",
            1,
            "rule" => self.rule.id.clone(),
            "action" => self.rule.action.as_str()
        );

        match self.rule.action {
            PreventionAction::Alert => error!(
                rule = %self.rule.id,
                action = %self.rule.action,
                message = %triggering.message,
                path = %triggering.path,
                occurrences = self.occurrences_in_window,
                window_minutes = self.rule.time_window_minutes,
                "Prevention rule triggered, alert raised"
            ),
            PreventionAction::Retry | PreventionAction::Fallback => warn!(
                rule = %self.rule.id,
                action = %self.rule.action,
                message = %triggering.message,
                path = %triggering.path,
                occurrences = self.occurrences_in_window,
                window_minutes = self.rule.time_window_minutes,
                "Prevention rule triggered"
            ),
        }
    }
}

fn engine_event(
    triggering: &TrackedError,
    now: DateTime<Utc>,
    kind: ErrorKind,
    message: String,
) -> TrackedError {
    TrackedError {
        timestamp: now,
        kind,
        message,
        path: String::new(),
        method: String::new(),
        status_code: 0,
        caller_id: None,
        remote_address: None,
        user_agent: None,
        details: Default::default(),
        recurring: false,
        occurrence_count: 1,
        build_id: triggering.build_id.clone(),
        session_id: triggering.session_id.clone(),
    }
}

/// Ordered, read-only rule list
#[derive(Debug, Clone)]
pub struct RuleEngine {
    rules: Vec<PreventionRule>,
    enabled: bool,
}

impl RuleEngine {
    /// Creates an engine; when `enabled` is false nothing ever fires
    pub fn new(rules: Vec<PreventionRule>, enabled: bool) -> Self {
        Self { rules, enabled }
    }

    /// The configured rules, in evaluation order
    pub fn rules(&self) -> &[PreventionRule] {
        &self.rules
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Evaluates every enabled rule against `event`, which is about to be
    /// appended to `history`. All rules are checked; several may fire.
    pub fn evaluate(
        &self,
        history: &VecDeque<TrackedError>,
        event: &TrackedError,
        now: DateTime<Utc>,
    ) -> Vec<PreventionTrigger> {
        if !self.enabled || !event.kind.is_request_derived() {
            return Vec::new();
        }

        self.rules
            .iter()
            .filter(|rule| rule.enabled && rule.matches(&event.message))
            .filter_map(|rule| {
                let cutoff = window_start(now, rule.time_window());
                let prior = history
                    .iter()
                    .filter(|stored| stored.same_pair(&event.message, &event.path))
                    .filter(|stored| cutoff.map_or(true, |cutoff| stored.timestamp >= cutoff))
                    .count();
                let occurrences_in_window = prior + 1;

                (occurrences_in_window >= rule.max_occurrences).then(|| PreventionTrigger {
                    rule: rule.clone(),
                    occurrences_in_window,
                })
            })
            .collect()
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new(default_rules(), true)
    }
}
