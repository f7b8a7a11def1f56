//! [`GazeHistory`] – bounded, time-windowed record of gaze events.
//!
//! Every inbound gaze message becomes a [`GazeEvent`] stamped with its
//! receipt time.  Events are kept in arrival order in a ring buffer and
//! evicted from the head once they are older than the retention ceiling or
//! the buffer exceeds its maximum length, whichever comes first.
//!
//! All queries take an explicit `now` so callers (and tests) control the
//! clock.
//!
//! # Example
//!
//! ```rust
//! use std::time::{Duration, Instant};
//! use gazelink_perception::gaze::GazeHistory;
//!
//! let mut history = GazeHistory::default();
//! let t0 = Instant::now();
//! history.record(Some("dynamic_020".to_string()), t0);
//!
//! let window = Duration::from_secs(3);
//! assert_eq!(history.most_recent_within(window, t0 + Duration::from_millis(1500)), Some("dynamic_020"));
//! assert_eq!(history.most_recent_within(window, t0 + Duration::from_secs(4)), None);
//! ```

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use gazelink_types::GazeSummary;
use tracing::{debug, trace};

/// Default retention ceiling.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60);

/// Default maximum number of retained events.
pub const DEFAULT_MAX_EVENTS: usize = 1024;

/// One gaze notification.  `element_id == None` means the user is not
/// looking at any tracked element.
#[derive(Debug, Clone, PartialEq)]
pub struct GazeEvent {
    pub element_id: Option<String>,
    pub timestamp: Instant,
}

/// Time-ordered, bounded gaze event history.
#[derive(Debug)]
pub struct GazeHistory {
    events: VecDeque<GazeEvent>,
    retention: Duration,
    max_events: usize,
}

impl Default for GazeHistory {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION, DEFAULT_MAX_EVENTS)
    }
}

impl GazeHistory {
    /// Create an empty history.  `max_events` is raised to at least 1 so the
    /// current element is always retained.
    pub fn new(retention: Duration, max_events: usize) -> Self {
        let max_events = max_events.max(1);
        Self {
            events: VecDeque::with_capacity(max_events.min(DEFAULT_MAX_EVENTS)),
            retention,
            max_events,
        }
    }

    /// Append a gaze event and evict what has fallen out of retention.
    ///
    /// A `timestamp` earlier than the newest recorded event is clamped up to
    /// it, keeping the history ordered by non-decreasing timestamp.
    pub fn record(&mut self, element_id: Option<String>, timestamp: Instant) {
        let timestamp = match self.events.back() {
            Some(last) if last.timestamp > timestamp => {
                debug!(
                    behind = ?last.timestamp.duration_since(timestamp),
                    "gaze event older than history head; clamping timestamp"
                );
                last.timestamp
            }
            _ => timestamp,
        };
        self.events.push_back(GazeEvent {
            element_id,
            timestamp,
        });
        self.evict(timestamp);
    }

    /// Element of the most recent event no older than `window` at `now`.
    ///
    /// Returns `None` when no event falls inside the window, or when the most
    /// recent one is a "gaze cleared" event.
    pub fn most_recent_within(&self, window: Duration, now: Instant) -> Option<&str> {
        self.events
            .back()
            .filter(|e| age(e, now) <= window)
            .and_then(|e| e.element_id.as_deref())
    }

    /// Element of the newest event regardless of age.
    pub fn current_element(&self) -> Option<&str> {
        self.events.back().and_then(|e| e.element_id.as_deref())
    }

    /// Aggregate statistics over the events no older than `window` at `now`.
    ///
    /// Ties for the most frequent element go to the one gazed at most
    /// recently.
    pub fn summary(&self, window: Duration, now: Instant) -> GazeSummary {
        let in_window: Vec<&GazeEvent> = self.within(window, now).collect();

        // element -> (count, index of last occurrence)
        let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
        let mut recent_sequence = Vec::new();
        for (idx, event) in in_window.iter().enumerate() {
            if let Some(id) = event.element_id.as_deref() {
                let entry = counts.entry(id).or_insert((0, idx));
                entry.0 += 1;
                entry.1 = idx;
                recent_sequence.push(id.to_string());
            }
        }

        let most_frequent = counts
            .iter()
            .max_by_key(|(_, (count, last_idx))| (*count, *last_idx))
            .map(|(id, (count, _))| (id.to_string(), *count));

        GazeSummary {
            total_count: in_window.len(),
            unique_element_count: counts.len(),
            most_frequent_count: most_frequent.as_ref().map_or(0, |(_, c)| *c),
            most_frequent_element: most_frequent.map(|(id, _)| id),
            recent_sequence,
        }
    }

    /// Events no older than `window` at `now`, oldest first.
    pub fn within(&self, window: Duration, now: Instant) -> impl Iterator<Item = &GazeEvent> {
        let first_inside = self.events.partition_point(|e| age(e, now) > window);
        self.events.range(first_inside..)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    fn evict(&mut self, newest: Instant) {
        let before = self.events.len();
        while self
            .events
            .front()
            .is_some_and(|e| newest.saturating_duration_since(e.timestamp) > self.retention)
        {
            self.events.pop_front();
        }
        while self.events.len() > self.max_events {
            self.events.pop_front();
        }
        if self.events.len() < before {
            trace!(evicted = before - self.events.len(), retained = self.events.len(), "gaze history evicted");
        }
    }
}

fn age(event: &GazeEvent, now: Instant) -> Duration {
    now.saturating_duration_since(event.timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    fn id(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    #[test]
    fn scenario_recent_gaze_expires_after_window() {
        let mut history = GazeHistory::default();
        let t0 = Instant::now();
        history.record(id("dynamic_020"), t0);

        assert_eq!(history.most_recent_within(secs(3.0), t0 + secs(1.5)), Some("dynamic_020"));
        assert_eq!(history.most_recent_within(secs(3.0), t0 + secs(4.0)), None);
    }

    #[test]
    fn cleared_gaze_hides_earlier_element() {
        let mut history = GazeHistory::default();
        let t0 = Instant::now();
        history.record(id("dynamic_001"), t0);
        history.record(None, t0 + secs(0.5));

        assert_eq!(history.most_recent_within(secs(3.0), t0 + secs(1.0)), None);
        assert_eq!(history.current_element(), None);
    }

    #[test]
    fn current_element_ignores_window() {
        let mut history = GazeHistory::default();
        let t0 = Instant::now();
        history.record(id("dynamic_007"), t0);
        assert_eq!(history.current_element(), Some("dynamic_007"));
        assert_eq!(history.most_recent_within(secs(1.0), t0 + secs(30.0)), None);
    }

    #[test]
    fn empty_history_answers_none() {
        let history = GazeHistory::default();
        let now = Instant::now();
        assert_eq!(history.current_element(), None);
        assert_eq!(history.most_recent_within(secs(3.0), now), None);
        assert_eq!(history.summary(secs(10.0), now), GazeSummary::default());
    }

    #[test]
    fn window_monotonicity() {
        let mut history = GazeHistory::default();
        let t0 = Instant::now();
        for (i, name) in ["a", "b", "c", "d"].iter().enumerate() {
            history.record(id(name), t0 + secs(i as f64));
        }
        let now = t0 + secs(5.0);
        let windows = [0.5, 1.0, 1.5, 2.0, 3.0, 10.0];
        for pair in windows.windows(2) {
            let small = history.most_recent_within(secs(pair[0]), now);
            let large = history.most_recent_within(secs(pair[1]), now);
            if small.is_some() {
                assert_eq!(small, large, "smaller window found an event the larger one missed");
            }
        }
        assert_eq!(history.most_recent_within(secs(1.5), now), None);
        assert_eq!(history.most_recent_within(secs(2.0), now), Some("d"));
    }

    #[test]
    fn eviction_respects_retention_ceiling() {
        let retention = secs(10.0);
        let mut history = GazeHistory::new(retention, 1000);
        let t0 = Instant::now();
        for i in 0..30 {
            history.record(id(&format!("e{i}")), t0 + secs(i as f64));
        }
        let now = t0 + secs(29.0);

        // Events at t=19..=29 are within the ceiling of the newest record.
        assert_eq!(history.len(), 11);
        let summary = history.summary(retention, now);
        assert_eq!(summary.total_count, 11);
        assert_eq!(summary.recent_sequence.first().map(String::as_str), Some("e19"));
        assert!(!summary.recent_sequence.iter().any(|e| e == "e18"));
    }

    #[test]
    fn eviction_respects_max_length() {
        let mut history = GazeHistory::new(secs(60.0), 3);
        let t0 = Instant::now();
        for i in 0..5 {
            history.record(id(&format!("e{i}")), t0 + secs(i as f64 * 0.1));
        }
        assert_eq!(history.len(), 3);
        let summary = history.summary(secs(60.0), t0 + secs(1.0));
        assert_eq!(summary.recent_sequence, vec!["e2", "e3", "e4"]);
    }

    #[test]
    fn out_of_order_timestamp_is_clamped() {
        let mut history = GazeHistory::default();
        let t0 = Instant::now();
        history.record(id("a"), t0 + secs(2.0));
        history.record(id("b"), t0);
        let stamps: Vec<Instant> = history.within(secs(60.0), t0 + secs(2.0)).map(|e| e.timestamp).collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(history.current_element(), Some("b"));
    }

    #[test]
    fn summary_counts_and_frequency() {
        let mut history = GazeHistory::default();
        let t0 = Instant::now();
        history.record(id("old"), t0);
        history.record(id("a"), t0 + secs(20.0));
        history.record(id("b"), t0 + secs(21.0));
        history.record(None, t0 + secs(22.0));
        history.record(id("a"), t0 + secs(23.0));
        history.record(id("b"), t0 + secs(24.0));
        history.record(id("a"), t0 + secs(25.0));

        let summary = history.summary(secs(10.0), t0 + secs(26.0));
        assert_eq!(summary.total_count, 6);
        assert_eq!(summary.unique_element_count, 2);
        assert_eq!(summary.most_frequent_element.as_deref(), Some("a"));
        assert_eq!(summary.most_frequent_count, 3);
        assert_eq!(summary.recent_sequence, vec!["a", "b", "a", "b", "a"]);
    }

    #[test]
    fn summary_tie_goes_to_most_recent() {
        let mut history = GazeHistory::default();
        let t0 = Instant::now();
        history.record(id("x"), t0);
        history.record(id("y"), t0 + secs(1.0));
        let summary = history.summary(secs(10.0), t0 + secs(2.0));
        assert_eq!(summary.most_frequent_element.as_deref(), Some("y"));
        assert_eq!(summary.most_frequent_count, 1);
    }

    #[test]
    fn clear_empties_history() {
        let mut history = GazeHistory::default();
        history.record(id("a"), Instant::now());
        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.current_element(), None);
    }
}
