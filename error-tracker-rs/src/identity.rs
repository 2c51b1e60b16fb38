//! Process-lifetime identifiers attached to every tracked event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Build and session identifiers, fixed for the life of one tracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessIdentity {
    /// Identifies the running build. Taken from configuration when the
    /// deployment injects one, otherwise derived from the crate version and
    /// the start time.
    pub build_id: String,
    /// Random per-process session identifier
    pub session_id: String,
}

impl ProcessIdentity {
    /// Generates identifiers for a tracker started at `started_at`
    pub fn generate(build_id: Option<String>, started_at: DateTime<Utc>) -> Self {
        let build_id = build_id.filter(|id| !id.trim().is_empty()).unwrap_or_else(|| {
            format!(
                "{}-{}",
                env!("CARGO_PKG_VERSION"),
                started_at.format("%Y%m%d%H%M%S")
            )
        });

        Self {
            build_id,
            session_id: Uuid::new_v4().to_string(),
        }
    }
}
