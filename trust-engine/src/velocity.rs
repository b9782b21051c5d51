//! Sliding-window event counter
//!
//! Backs the device velocity signal: every transaction from a fingerprint is
//! recorded, and the collector asks how many landed in the trailing window.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;

/// Per-subject event timestamps, bounded by a retention horizon
#[derive(Clone)]
pub struct VelocityTracker {
    window: Duration,
    retention: Duration,
    // Map: subject -> event times, oldest first
    events: Arc<DashMap<String, Vec<DateTime<Utc>>>>,
}

impl VelocityTracker {
    /// Create new tracker counting over `window`
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            retention: window * 24,
            events: Arc::new(DashMap::new()),
        }
    }

    /// Hourly tracker
    pub fn hourly() -> Self {
        Self::new(Duration::hours(1))
    }

    /// Counting window
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record one event for `subject` at `at`
    pub fn record(&self, subject: &str, at: DateTime<Utc>) {
        let mut entry = self.events.entry(subject.to_string()).or_default();
        let events = entry.value_mut();
        let pos = events.partition_point(|t| *t <= at);
        events.insert(pos, at);

        // Clean up events past retention, relative to the newest one
        if let Some(newest) = events.last().copied() {
            let horizon = newest - self.retention;
            events.retain(|t| *t >= horizon);
        }
    }

    /// Events in `(as_of - window, as_of]`
    pub fn count(&self, subject: &str, as_of: DateTime<Utc>) -> u32 {
        let window_start = as_of - self.window;
        self.events
            .get(subject)
            .map(|events| {
                events
                    .iter()
                    .filter(|t| **t > window_start && **t <= as_of)
                    .count() as u32
            })
            .unwrap_or(0)
    }

    /// Forget a subject entirely
    pub fn reset(&self, subject: &str) {
        self.events.remove(subject);
    }

    /// Subjects currently tracked
    pub fn tracked_subjects(&self) -> usize {
        self.events.len()
    }
}

impl Default for VelocityTracker {
    fn default() -> Self {
        Self::hourly()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap() + Duration::minutes(minute as i64)
    }

    #[test]
    fn test_counts_within_window() {
        let tracker = VelocityTracker::hourly();
        for m in [0, 10, 20, 30] {
            tracker.record("fp-1", at(m));
        }

        assert_eq!(tracker.count("fp-1", at(30)), 4);
        // 12:00 falls out of (12:10, 13:10]
        assert_eq!(tracker.count("fp-1", at(70)), 2);
        assert_eq!(tracker.count("fp-2", at(30)), 0);
    }

    #[test]
    fn test_future_events_not_counted() {
        let tracker = VelocityTracker::hourly();
        tracker.record("fp-1", at(50));
        tracker.record("fp-1", at(5));

        assert_eq!(tracker.count("fp-1", at(10)), 1);
    }

    #[test]
    fn test_retention_drops_old_events() {
        let tracker = VelocityTracker::hourly();
        tracker.record("fp-1", at(0));
        tracker.record("fp-1", at(60 * 30));

        let events = tracker.events.get("fp-1").unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_reset() {
        let tracker = VelocityTracker::hourly();
        tracker.record("fp-1", at(0));
        tracker.reset("fp-1");
        assert_eq!(tracker.tracked_subjects(), 0);
    }
}
