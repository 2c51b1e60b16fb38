//! # Tracked Error Types
//!
//! The value types recorded by the tracker, plus the crate's own error type.
//! A `TrackedError` is domain data: it is stored and queried, never raised.
//! `TrackerError` covers the few places where the crate itself can fail
//! (query parsing, configuration, log sink setup).

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A type alias for Result with the error type defaulting to `TrackerError`
pub type Result<T, E = TrackerError> = std::result::Result<T, E>;

/// Errors surfaced by the tracker itself
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// A duration token passed to the query boundary could not be parsed
    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    /// Configuration could not be read
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// The optional event log sink could not be opened
    #[error("log sink error: {0}")]
    LogSink(#[from] std::io::Error),

    /// Logging or another global facility failed to initialize
    #[error("initialization error: {0}")]
    Initialization(String),
}

/// Category of a tracked event, decided once at ingestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Request finished with a 4xx status
    HttpClientError,
    /// Request finished with a 5xx status
    HttpServerError,
    /// Error reported explicitly by an application handler
    HandlerError,
    /// Synthetic event recorded by the periodic health check
    HealthCheck,
    /// Declared prevention action for a triggered rule
    Prevention,
    /// Audit record of a triggered prevention rule
    PreventionRule,
}

impl ErrorKind {
    /// Wire name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::HttpClientError => "http_client_error",
            ErrorKind::HttpServerError => "http_server_error",
            ErrorKind::HandlerError => "handler_error",
            ErrorKind::HealthCheck => "health_check",
            ErrorKind::Prevention => "prevention",
            ErrorKind::PreventionRule => "prevention_rule",
        }
    }

    /// True for kinds produced from a request rather than by the engine itself
    pub fn is_request_derived(&self) -> bool {
        matches!(
            self,
            ErrorKind::HttpClientError | ErrorKind::HttpServerError | ErrorKind::HandlerError
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded error event. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedError {
    /// When the error was observed
    pub timestamp: DateTime<Utc>,
    /// Category of the event
    pub kind: ErrorKind,
    /// Display text, also the matching key for recurrence and rules
    pub message: String,
    /// Request route, empty for engine-originated events
    pub path: String,
    /// Request method, empty for engine-originated events
    pub method: String,
    /// HTTP status, 0 when not applicable
    pub status_code: u16,
    /// Authenticated caller, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller_id: Option<String>,
    /// Remote peer address, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_address: Option<String>,
    /// User agent header, if present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Event-specific metadata
    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,
    /// True when an earlier retained event shares message and path
    pub recurring: bool,
    /// 1-based count of this (message, path) pair in the retained history
    pub occurrence_count: usize,
    /// Build identifier of the recording process
    pub build_id: String,
    /// Session identifier of the recording process
    pub session_id: String,
}

impl TrackedError {
    /// True when this event counts against health (status >= 500)
    pub fn is_critical(&self) -> bool {
        self.status_code >= 500
    }

    /// Key used for pattern frequencies: `kind:message`
    pub fn pattern_key(&self) -> String {
        format!("{}:{}", self.kind, self.message)
    }

    /// Whether this event shares the recurrence key with `message`/`path`
    pub fn same_pair(&self, message: &str, path: &str) -> bool {
        self.message == message && self.path == path
    }

    /// One line for the event log sink
    pub fn log_line(&self) -> String {
        format!(
            "{} | {} | {} | {} | {} | {} | {}",
            self.kind,
            self.message,
            self.path,
            self.method,
            self.status_code,
            self.occurrence_count,
            self.recurring
        )
    }
}

impl fmt::Display for TrackedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)?;

        if !self.path.is_empty() {
            write!(f, " ({} {})", self.method, self.path)?;
        }

        if self.status_code != 0 {
            write!(f, " [Status: {}]", self.status_code)?;
        }

        if self.recurring {
            write!(f, " [Occurrence: {}]", self.occurrence_count)?;
        }

        Ok(())
    }
}

/// Input to `ErrorTracker::track_error`: everything except the fields the
/// engine fills in (timestamp, recurrence, identifiers).
#[derive(Debug, Clone, Default)]
pub struct TrackErrorRequest {
    pub kind: Option<ErrorKind>,
    pub message: String,
    pub path: String,
    pub method: String,
    pub status_code: u16,
    pub caller_id: Option<String>,
    pub remote_address: Option<String>,
    pub user_agent: Option<String>,
    pub details: BTreeMap<String, serde_json::Value>,
}

impl TrackErrorRequest {
    /// Creates a request for the given kind and message
    pub fn new<S: Into<String>>(kind: ErrorKind, message: S) -> Self {
        Self {
            kind: Some(kind),
            message: message.into(),
            ..Default::default()
        }
    }

    /// Sets the request route
    pub fn route<M: Into<String>, P: Into<String>>(mut self, method: M, path: P) -> Self {
        self.method = method.into();
        self.path = path.into();
        self
    }

    /// Sets the HTTP status
    pub fn status(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    /// Sets the caller identity
    pub fn caller<S: Into<String>>(mut self, caller_id: S) -> Self {
        self.caller_id = Some(caller_id.into());
        self
    }

    /// Sets the remote address
    pub fn remote_address<S: Into<String>>(mut self, remote_address: S) -> Self {
        self.remote_address = Some(remote_address.into());
        self
    }

    /// Sets the user agent
    pub fn user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Adds a metadata entry; values that fail to serialize are skipped
    pub fn detail<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Serialize,
    {
        if let Ok(value) = serde_json::to_value(value) {
            self.details.insert(key.into(), value);
        }
        self
    }

    /// Kind to record. A request without an explicit kind is classified by
    /// status code, falling back to `HandlerError`.
    pub fn resolved_kind(&self) -> ErrorKind {
        match self.kind {
            Some(kind) => kind,
            None if self.status_code >= 500 => ErrorKind::HttpServerError,
            None if self.status_code >= 400 => ErrorKind::HttpClientError,
            None => ErrorKind::HandlerError,
        }
    }
}
