//! # Error Ring Store
//!
//! Capacity-bounded FIFO of tracked events behind a single read/write lock.
//! Writers (`append`, `record`, `clear`) exclude everyone; readers take
//! consistent copies and may run alongside each other.
//!
//! Lock poisoning is recovered rather than propagated: a panic in one caller
//! must not switch tracking off for the rest of the process.

use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::types::TrackedError;

/// Default number of retained events
pub const DEFAULT_MAX_ERRORS: usize = 1000;

/// Rolling history of tracked events
#[derive(Debug)]
pub struct ErrorStore {
    capacity: usize,
    entries: RwLock<VecDeque<TrackedError>>,
}

impl ErrorStore {
    /// Creates a store retaining at most `capacity` events (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: RwLock::new(VecDeque::with_capacity(capacity.min(4096))),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, VecDeque<TrackedError>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, VecDeque<TrackedError>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn push_bounded(&self, entries: &mut VecDeque<TrackedError>, event: TrackedError) {
        entries.push_back(event);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    /// Appends one event, evicting the oldest when over capacity
    pub fn append(&self, event: TrackedError) {
        let mut entries = self.write();
        self.push_bounded(&mut entries, event);
    }

    /// Runs `build` against the retained history while holding the write
    /// lock, then appends the events it returns in order. Nothing else can
    /// observe or modify the store between the inspection and the append.
    ///
    /// Returns a copy of the appended events.
    pub fn record<F>(&self, build: F) -> Vec<TrackedError>
    where
        F: FnOnce(&VecDeque<TrackedError>) -> Vec<TrackedError>,
    {
        let mut entries = self.write();
        let new_events = build(&entries);
        for event in &new_events {
            self.push_bounded(&mut entries, event.clone());
        }
        new_events
    }

    /// Copy of every retained event, oldest first
    pub fn snapshot_all(&self) -> Vec<TrackedError> {
        self.read().iter().cloned().collect()
    }

    /// Copy of the events with `timestamp >= now - window`, oldest first
    pub fn snapshot_since(&self, now: DateTime<Utc>, window: Duration) -> Vec<TrackedError> {
        let cutoff = window_start(now, window);
        self.read()
            .iter()
            .filter(|event| cutoff.map_or(true, |cutoff| event.timestamp >= cutoff))
            .cloned()
            .collect()
    }

    /// Drops every retained event
    pub fn clear(&self) {
        self.write().clear();
    }

    /// Number of retained events
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// True when nothing is retained
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Maximum number of retained events
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ErrorStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ERRORS)
    }
}

/// Earliest timestamp inside a window ending at `now`. `None` means the
/// window reaches further back than any representable time.
pub(crate) fn window_start(now: DateTime<Utc>, window: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|window| now.checked_sub_signed(window))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorKind;
    use std::collections::BTreeMap;

    fn event(message: &str, timestamp: DateTime<Utc>) -> TrackedError {
        TrackedError {
            timestamp,
            kind: ErrorKind::HttpServerError,
            message: message.to_string(),
            path: "/api/x".to_string(),
            method: "GET".to_string(),
            status_code: 500,
            caller_id: None,
            remote_address: None,
            user_agent: None,
            details: BTreeMap::new(),
            recurring: false,
            occurrence_count: 1,
            build_id: "build".to_string(),
            session_id: "session".to_string(),
        }
    }

    #[test]
    fn test_capacity_keeps_most_recent() {
        let store = ErrorStore::new(3);
        let now = Utc::now();
        for i in 0..7 {
            store.append(event(&format!("e{}", i), now));
            assert!(store.len() <= 3);
        }

        let messages: Vec<_> = store.snapshot_all().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["e4", "e5", "e6"]);
    }

    #[test]
    fn test_snapshot_since_window() {
        let store = ErrorStore::new(10);
        let now = Utc::now();
        store.append(event("old", now - chrono::Duration::minutes(10)));
        store.append(event("edge", now - chrono::Duration::minutes(5)));
        store.append(event("new", now - chrono::Duration::seconds(30)));

        let recent: Vec<_> = store
            .snapshot_since(now, Duration::from_secs(300))
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(recent, vec!["edge", "new"]);

        assert_eq!(store.snapshot_since(now, Duration::MAX).len(), 3);
        assert!(store.snapshot_since(now, Duration::ZERO).is_empty());
    }

    #[test]
    fn test_record_sees_history_and_appends_in_order() {
        let store = ErrorStore::new(10);
        let now = Utc::now();
        store.append(event("first", now));

        let appended = store.record(|history| {
            assert_eq!(history.len(), 1);
            vec![event("second", now), event("third", now)]
        });

        assert_eq!(appended.len(), 2);
        let messages: Vec<_> = store.snapshot_all().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_clear() {
        let store = ErrorStore::default();
        store.append(event("gone", Utc::now()));
        assert!(!store.is_empty());

        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.capacity(), DEFAULT_MAX_ERRORS);
    }

    #[test]
    fn test_survives_poisoned_lock() {
        let store = std::sync::Arc::new(ErrorStore::new(5));
        let poisoner = store.clone();
        let _ = std::thread::spawn(move || {
            poisoner.record(|_| panic!("boom"));
        })
        .join();

        store.append(event("after", Utc::now()));
        assert_eq!(store.len(), 1);
    }
}
