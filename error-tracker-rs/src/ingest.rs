//! # Request Ingestion
//!
//! Turns a completed request into tracked errors. A response with a 4xx or
//! 5xx status yields one status-derived event; every error a handler reported
//! yields one `handler_error` event on top of that.
//!
//! `track_errors_middleware` is the axum entry point. It never changes the
//! response: the tracker cannot fail, and a panic inside it is caught and
//! logged before the response is handed back.

use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, MatchedPath, State};
use axum::http::header::USER_AGENT;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use tracing::error;

use crate::tracker::ErrorTracker;
use crate::types::{ErrorKind, TrackErrorRequest};

/// Identity of the authenticated caller, inserted into request extensions by
/// an upstream auth layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity(pub String);

/// Application errors reported by a handler, carried in response extensions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerErrors(pub Vec<String>);

impl HandlerErrors {
    /// A list holding one error
    pub fn single<S: Into<String>>(message: S) -> Self {
        Self(vec![message.into()])
    }

    /// Adds an error to the list
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.0.push(message.into());
    }
}

/// Everything the tracker needs from one completed request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOutcome {
    pub method: String,
    pub path: String,
    pub status_code: u16,
    pub caller_id: Option<String>,
    pub remote_address: Option<String>,
    pub user_agent: Option<String>,
    pub handler_errors: Vec<String>,
}

/// Kind for a response status; `None` below 400
pub fn classify_status(status_code: u16) -> Option<ErrorKind> {
    match status_code {
        500..=u16::MAX => Some(ErrorKind::HttpServerError),
        400..=499 => Some(ErrorKind::HttpClientError),
        _ => None,
    }
}

/// Message recorded for a status-derived event
pub fn status_message(status_code: u16) -> String {
    StatusCode::from_u16(status_code)
        .ok()
        .and_then(|status| status.canonical_reason())
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status_code))
}

impl RequestOutcome {
    /// True when the outcome produces at least one tracked error
    pub fn is_trackable(&self) -> bool {
        classify_status(self.status_code).is_some() || !self.handler_errors.is_empty()
    }

    /// The tracked errors this outcome produces, status-derived first
    pub fn tracked_errors(&self) -> Vec<TrackErrorRequest> {
        let mut requests = Vec::with_capacity(1 + self.handler_errors.len());

        if let Some(kind) = classify_status(self.status_code) {
            requests.push(self.to_request(kind, status_message(self.status_code)));
        }

        for message in self.handler_errors.iter().filter(|m| !m.trim().is_empty()) {
            requests.push(self.to_request(ErrorKind::HandlerError, message.clone()));
        }

        requests
    }

    fn to_request(&self, kind: ErrorKind, message: String) -> TrackErrorRequest {
        TrackErrorRequest {
            kind: Some(kind),
            message,
            path: self.path.clone(),
            method: self.method.clone(),
            status_code: self.status_code,
            caller_id: self.caller_id.clone(),
            remote_address: self.remote_address.clone(),
            user_agent: self.user_agent.clone(),
            details: Default::default(),
        }
    }
}

impl ErrorTracker {
    /// Records every tracked error produced by `outcome`
    pub fn ingest(&self, outcome: &RequestOutcome) {
        for request in outcome.tracked_errors() {
            self.track_error(request);
        }
    }
}

/// Ingests `outcome`, containing any panic raised by the tracker
pub fn ingest_isolated(tracker: &ErrorTracker, outcome: &RequestOutcome) {
    if catch_unwind(AssertUnwindSafe(|| tracker.ingest(outcome))).is_err() {
        error!(
            method = %outcome.method,
            path = %outcome.path,
            status = outcome.status_code,
            "Error tracking failed, request unaffected"
        );
    }
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|addr| addr.trim().to_string())
        .filter(|addr| !addr.is_empty())
}

/// Route template that served `request` (`/api/contacts/:id`), or the raw
/// URI path when no route matched
fn route_path(request: &Request<Body>) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string())
}

/// Axum middleware recording failed and erroring requests.
///
/// Mount with `Router::layer(axum::middleware::from_fn_with_state(tracker,
/// track_errors_middleware))` so the matched route is visible and errors on
/// parameterized routes share one recurrence key.
pub async fn track_errors_middleware(
    State(tracker): State<Arc<ErrorTracker>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let path = route_path(&request);
    let caller_id = request
        .extensions()
        .get::<CallerIdentity>()
        .map(|caller| caller.0.clone());
    let remote_address = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .or_else(|| forwarded_for(request.headers()));
    let user_agent = request
        .headers()
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let response = next.run(request).await;

    let outcome = RequestOutcome {
        method,
        path,
        status_code: response.status().as_u16(),
        caller_id,
        remote_address,
        user_agent,
        handler_errors: response
            .extensions()
            .get::<HandlerErrors>()
            .map(|errors| errors.0.clone())
            .unwrap_or_default(),
    };

    if outcome.is_trackable() {
        ingest_isolated(&tracker, &outcome);
    }

    response
}
