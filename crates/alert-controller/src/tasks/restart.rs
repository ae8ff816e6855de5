//! Bounded-window restart-rate tracking.
//!
//! Each pod-restart-rate rule keeps a short history of `(restartCount, observedAt)`
//! samples. The oldest sample still inside the rule's window is the baseline, so the
//! watcher fires on restarts *per window* instead of the pod's lifetime count.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartSample {
    pub count: i32,
    pub observed_at: DateTime<Utc>,
}

/// Keyed storage for per-rule sample histories
pub trait RestartSampleStore: Send + Sync {
    /// Start a fresh, empty history
    fn reset(&self, key: &str);

    /// Create an empty history unless one exists
    fn ensure(&self, key: &str);

    fn remove(&self, key: &str);

    fn contains(&self, key: &str) -> bool;

    /// Current history; empty when the key is unknown
    fn load(&self, key: &str) -> VecDeque<RestartSample>;

    /// Run `f` on the history of `key` in place. Unknown keys are left alone
    /// and `false` is returned without calling `f`.
    fn update(&self, key: &str, f: &mut dyn FnMut(&mut VecDeque<RestartSample>)) -> bool;
}

/// Process-local [`RestartSampleStore`]
#[derive(Debug, Default)]
pub struct InMemoryRestartStore {
    samples: DashMap<String, VecDeque<RestartSample>>,
}

impl InMemoryRestartStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl RestartSampleStore for InMemoryRestartStore {
    fn reset(&self, key: &str) {
        self.samples.insert(key.to_string(), VecDeque::new());
    }

    fn ensure(&self, key: &str) {
        self.samples.entry(key.to_string()).or_default();
    }

    fn remove(&self, key: &str) {
        self.samples.remove(key);
    }

    fn contains(&self, key: &str) -> bool {
        self.samples.contains_key(key)
    }

    fn load(&self, key: &str) -> VecDeque<RestartSample> {
        self.samples
            .get(key)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    fn update(&self, key: &str, f: &mut dyn FnMut(&mut VecDeque<RestartSample>)) -> bool {
        match self.samples.get_mut(key) {
            Some(mut entry) => {
                f(entry.value_mut());
                true
            }
            None => false,
        }
    }
}

/// Result of feeding one sample to the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartObservation {
    /// Count of the oldest sample still inside the window
    pub baseline: i32,
    /// False when there was no history to compare against
    pub should_evaluate: bool,
}

impl RestartObservation {
    /// Restarts since the baseline. A counter reset never yields a positive value.
    #[must_use]
    pub fn increase(&self, current: i32) -> i32 {
        current.saturating_sub(self.baseline).max(0)
    }

    /// Whether `current` crossed `threshold` restarts within the window
    #[must_use]
    pub fn exceeds(&self, current: i32, threshold: u32) -> bool {
        self.should_evaluate && i64::from(self.increase(current)) >= i64::from(threshold)
    }
}

/// Restart-rate tracker owned by the pod watcher.
///
/// Histories exist only between `on_rule_created` and `on_rule_removed`; the
/// watcher never creates one by observing.
pub struct RestartTracker {
    store: Arc<dyn RestartSampleStore>,
    max_samples: usize,
}

impl RestartTracker {
    pub fn new(store: Arc<dyn RestartSampleStore>, max_samples: usize) -> Self {
        Self {
            store,
            max_samples: max_samples.max(1),
        }
    }

    /// Called when a restart-rate rule is first created
    pub fn on_rule_created(&self, key: &str) {
        debug!(key, "Starting restart history");
        self.store.reset(key);
    }

    /// Called on later reconciles of an existing rule
    pub fn on_rule_updated(&self, key: &str) {
        self.store.ensure(key);
    }

    pub fn on_rule_removed(&self, key: &str) {
        debug!(key, "Dropping restart history");
        self.store.remove(key);
    }

    #[must_use]
    pub fn is_tracking(&self, key: &str) -> bool {
        self.store.contains(key)
    }

    /// Record `count` at `now` and report the baseline inside `window`.
    ///
    /// Returns `None` without recording anything when `key` has no history.
    pub fn observe(
        &self,
        key: &str,
        count: i32,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Option<RestartObservation> {
        let max_samples = self.max_samples;
        let mut observation = None;

        let tracked = self.store.update(key, &mut |samples: &mut VecDeque<RestartSample>| {
            while samples
                .front()
                .is_some_and(|oldest| now - oldest.observed_at > window)
            {
                samples.pop_front();
            }

            observation = Some(match samples.front() {
                Some(oldest) => RestartObservation {
                    baseline: oldest.count,
                    should_evaluate: true,
                },
                None => RestartObservation {
                    baseline: count,
                    should_evaluate: false,
                },
            });

            samples.push_back(RestartSample {
                count,
                observed_at: now,
            });
            while samples.len() > max_samples {
                samples.pop_front();
            }
        });

        if !tracked {
            debug!(key, "No restart history, sample ignored");
        }
        observation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn tracker(max_samples: usize) -> (Arc<InMemoryRestartStore>, RestartTracker) {
        let store = Arc::new(InMemoryRestartStore::new());
        let tracker = RestartTracker::new(store.clone(), max_samples);
        tracker.on_rule_created("k");
        (store, tracker)
    }

    #[test]
    fn window_drops_old_samples_and_fires_on_rate() {
        let (_, tracker) = tracker(30);
        let window = Duration::seconds(25);
        let counts = [2, 2, 2, 5, 5];

        let mut observations = Vec::new();
        for (i, count) in counts.iter().enumerate() {
            let t = at(i64::try_from(i).unwrap() * 10);
            observations.push(tracker.observe("k", *count, t, window).unwrap());
        }

        // first sample has no history
        assert!(!observations[0].should_evaluate);
        assert!(!observations[0].exceeds(2, 2));

        // t=20: nothing dropped, baseline 2@0, no increase
        assert_eq!(observations[2].baseline, 2);
        assert_eq!(observations[2].increase(2), 0);
        assert!(!observations[2].exceeds(2, 2));

        // t=40: 0 and 10 dropped, baseline 2@20
        assert_eq!(observations[4].baseline, 2);
        assert_eq!(observations[4].increase(5), 3);
        assert!(observations[4].exceeds(5, 2));
    }

    #[test]
    fn baseline_moves_forward_with_the_window() {
        let (_, tracker) = tracker(30);
        let window = Duration::seconds(60);

        tracker.observe("k", 3, at(0), window).unwrap();
        tracker.observe("k", 7, at(30), window).unwrap();

        // 0 is now outside the window, 30 becomes the baseline
        let obs = tracker.observe("k", 7, at(80), window).unwrap();
        assert!(obs.should_evaluate);
        assert_eq!(obs.baseline, 7);
        assert!(!obs.exceeds(7, 1));
    }

    #[test]
    fn whole_history_outside_window_starts_over() {
        let (_, tracker) = tracker(30);
        let window = Duration::seconds(60);

        tracker.observe("k", 7, at(0), window).unwrap();
        tracker.observe("k", 7, at(30), window).unwrap();

        let obs = tracker.observe("k", 9, at(100), window).unwrap();
        assert!(!obs.should_evaluate);
        assert!(!obs.exceeds(9, 1));
    }

    #[test]
    fn counter_reset_never_fires() {
        let (_, tracker) = tracker(30);
        let window = Duration::seconds(60);
        tracker.observe("k", 10, at(0), window).unwrap();
        let obs = tracker.observe("k", 0, at(10), window).unwrap();
        assert_eq!(obs.increase(0), 0);
        assert!(!obs.exceeds(0, 1));
    }

    #[test]
    fn samples_are_capped() {
        let (store, tracker) = tracker(3);
        let window = Duration::seconds(3600);
        for i in 0..10 {
            tracker.observe("k", i, at(i64::from(i)), window).unwrap();
        }
        let samples = store.load("k");
        assert_eq!(samples.len(), 3);
        assert_eq!(samples.front().map(|s| s.count), Some(7));
    }

    #[test]
    fn lifecycle_hooks_create_and_free_entries() {
        let (store, tracker) = tracker(30);
        assert!(tracker.is_tracking("k"));
        tracker.observe("k", 1, at(0), Duration::seconds(10)).unwrap();

        // updates keep the history
        tracker.on_rule_updated("k");
        assert_eq!(store.load("k").len(), 1);

        // re-creation starts over
        tracker.on_rule_created("k");
        assert!(store.load("k").is_empty());

        tracker.on_rule_removed("k");
        assert!(!tracker.is_tracking("k"));
        assert!(store.is_empty());
    }

    #[test]
    fn observing_unknown_key_creates_nothing() {
        let (store, tracker) = tracker(30);
        assert!(tracker.observe("other", 4, at(0), Duration::seconds(10)).is_none());
        assert!(!tracker.is_tracking("other"));

        tracker.on_rule_removed("k");
        assert!(tracker.observe("k", 4, at(10), Duration::seconds(10)).is_none());
        assert!(store.is_empty());
    }
}
