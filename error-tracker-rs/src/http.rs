//! Read-only HTTP surface over a shared tracker.
//!
//! - `GET /errors?duration=1h`
//! - `GET /errors/health`
//! - `DELETE /errors`
//! - `GET /errors/rules`

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::report::{ErrorReport, HealthReport, DEFAULT_WINDOW};
use crate::rules::PreventionRule;
use crate::tracker::ErrorTracker;
use crate::types::TrackerError;

/// Error body returned by the query routes
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

impl IntoResponse for TrackerError {
    fn into_response(self) -> Response {
        let status = match self {
            TrackerError::InvalidDuration(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
                code: status.as_u16(),
            }),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct ErrorQuery {
    pub duration: Option<String>,
}

/// Routes for the query surface, with the tracker as state
pub fn router(tracker: Arc<ErrorTracker>) -> Router {
    Router::new()
        .route("/errors", get(recent_errors_handler).delete(clear_handler))
        .route("/errors/health", get(health_handler))
        .route("/errors/rules", get(rules_handler))
        .with_state(tracker)
}

async fn recent_errors_handler(
    State(tracker): State<Arc<ErrorTracker>>,
    Query(query): Query<ErrorQuery>,
) -> Result<Json<ErrorReport>, TrackerError> {
    let token = query.duration.as_deref().unwrap_or(DEFAULT_WINDOW);
    match tracker.error_report(token) {
        Ok(report) => Ok(Json(report)),
        Err(e) => {
            warn!(duration = %token, error = %e, "Rejected error report query");
            Err(e)
        }
    }
}

async fn health_handler(State(tracker): State<Arc<ErrorTracker>>) -> Json<HealthReport> {
    Json(tracker.health_report())
}

async fn clear_handler(State(tracker): State<Arc<ErrorTracker>>) -> Json<serde_json::Value> {
    tracker.clear();
    Json(serde_json::json!({ "status": "cleared" }))
}

async fn rules_handler(State(tracker): State<Arc<ErrorTracker>>) -> Json<Vec<PreventionRule>> {
    Json(tracker.prevention_rules())
}
