//! # Query Reports
//!
//! Read-only views assembled for a reporting layer: recent errors for a
//! duration token, and the five-minute health snapshot. Parsing the token is
//! the only place a query can be rejected.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::health::HealthStatus;
use crate::store::window_start;
use crate::tracker::{pattern_frequencies, ErrorTracker};
use crate::types::{ErrorKind, Result, TrackedError, TrackerError};

/// Token used when a query names no duration
pub const DEFAULT_WINDOW: &str = "1h";

/// Parses a duration token.
///
/// Accepts the presets `1h`, `6h`, `24h` and `7d`, and raw durations made of
/// one or more `<integer><unit>` segments with units `ms`, `s`, `m`, `h`, `d`
/// (for example `30m`, `1h30m`, `500ms`). A bare integer is seconds.
pub fn parse_window(token: &str) -> Result<Duration> {
    let token = token.trim();
    match token {
        "1h" => return Ok(Duration::from_secs(3600)),
        "6h" => return Ok(Duration::from_secs(6 * 3600)),
        "24h" => return Ok(Duration::from_secs(24 * 3600)),
        "7d" => return Ok(Duration::from_secs(7 * 24 * 3600)),
        _ => {}
    }

    let invalid = || TrackerError::InvalidDuration(token.to_string());

    if token.is_empty() {
        return Err(invalid());
    }
    if token.bytes().all(|b| b.is_ascii_digit()) {
        return token.parse::<u64>().map(Duration::from_secs).map_err(|_| invalid());
    }

    let mut total = Duration::ZERO;
    let mut rest = token;
    while !rest.is_empty() {
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return Err(invalid());
        }
        let value: u64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest.bytes().take_while(u8::is_ascii_alphabetic).count();
        let segment = match &rest[..unit_len] {
            "ms" => Some(Duration::from_millis(value)),
            "s" => Some(Duration::from_secs(value)),
            "m" => value.checked_mul(60).map(Duration::from_secs),
            "h" => value.checked_mul(3600).map(Duration::from_secs),
            "d" => value.checked_mul(86_400).map(Duration::from_secs),
            _ => None,
        }
        .ok_or_else(invalid)?;
        rest = &rest[unit_len..];

        total = total.checked_add(segment).ok_or_else(invalid)?;
    }

    Ok(total)
}

/// Recent errors for one duration token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    /// The token the report was built for
    pub duration: String,
    pub window_seconds: u64,
    pub total_errors: usize,
    /// Events with status >= 500
    pub critical_errors: usize,
    pub server_errors: usize,
    pub client_errors: usize,
    pub errors: Vec<TrackedError>,
    /// `kind:message` counts over the full retained history
    pub patterns: BTreeMap<String, usize>,
    pub build_id: String,
    pub session_id: String,
    pub generated_at: DateTime<Utc>,
}

/// Health snapshot for the five-minute window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub critical_errors: usize,
    pub total_errors: usize,
    pub checked_at: DateTime<Utc>,
}

impl ErrorTracker {
    /// Builds the report for a duration token. Counts, errors and patterns
    /// all come from one snapshot of the store.
    pub fn error_report(&self, token: &str) -> Result<ErrorReport> {
        let window = parse_window(token)?;

        let generated_at = self.now();
        let history = self.all_errors();
        let patterns = pattern_frequencies(&history);

        let cutoff = window_start(generated_at, window);
        let errors: Vec<TrackedError> = history
            .into_iter()
            .filter(|e| cutoff.map_or(true, |cutoff| e.timestamp >= cutoff))
            .collect();

        Ok(ErrorReport {
            duration: token.trim().to_string(),
            window_seconds: window.as_secs(),
            total_errors: errors.len(),
            critical_errors: errors.iter().filter(|e| e.is_critical()).count(),
            server_errors: errors
                .iter()
                .filter(|e| e.kind == ErrorKind::HttpServerError)
                .count(),
            client_errors: errors
                .iter()
                .filter(|e| e.kind == ErrorKind::HttpClientError)
                .count(),
            errors,
            patterns,
            build_id: self.build_id().to_string(),
            session_id: self.session_id().to_string(),
            generated_at,
        })
    }

    /// Current health snapshot
    pub fn health_report(&self) -> HealthReport {
        let verdict = self.derive_health();
        HealthReport {
            status: verdict.status,
            critical_errors: verdict.critical_error_count,
            total_errors: verdict.total_error_count,
            checked_at: verdict.checked_at,
        }
    }
}
