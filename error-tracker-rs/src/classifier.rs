//! Recurrence classification against the retained history.

use serde::{Deserialize, Serialize};

use crate::types::TrackedError;

/// Result of classifying one new event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recurrence {
    /// 1-based count of the (message, path) pair including the new event
    pub occurrence_count: usize,
    /// True when the pair was already present
    pub recurring: bool,
}

/// Classifies a new (message, path) pair against `history`, which must not
/// yet contain the event being classified.
pub fn classify<'a, I>(history: I, message: &str, path: &str) -> Recurrence
where
    I: IntoIterator<Item = &'a TrackedError>,
{
    let prior = history
        .into_iter()
        .filter(|event| event.same_pair(message, path))
        .count();

    Recurrence {
        occurrence_count: prior + 1,
        recurring: prior > 0,
    }
}
