//! # Subscription Registry
//!
//! Sole owner of [`FeedState`]. Subscriber arrivals, departures and the feed
//! loop's end-of-cycle check are all serialized through one mutex, so
//! increments are never lost and the 0→1 edge is seen exactly once.
//!
//! The registry never stops the feed itself: it only records departures. The
//! loop asks [`Registry::end_cycle`] after each cycle and again before the
//! next one starts, and is told to stop when nobody is left.

use serde::Serialize;
use std::sync::{Mutex, PoisonError};

/// Process-wide feed bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedState {
    /// Subscribers currently connected.
    pub active_subscribers: usize,
    /// Whether a feed loop is alive.
    pub running: bool,
    /// How many feed loops have been started since boot.
    pub loops_started: u64,
}

/// Serialized entry points over [`FeedState`].
#[derive(Default)]
pub struct Registry {
    state: Mutex<FeedState>,
}

impl Registry {
    /// Starts at zero subscribers with no loop running.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new subscriber and returns the updated count.
    ///
    /// On the 0→1 edge with no loop alive, marks the feed running and calls
    /// `start` while still holding the lock, so a concurrent end-of-cycle
    /// check cannot interleave with the start.
    pub fn on_subscribe<F: FnOnce()>(&self, start: F) -> usize {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.active_subscribers += 1;
        if state.active_subscribers == 1 && !state.running {
            state.running = true;
            state.loops_started += 1;
            log::info!("First subscriber arrived. Starting live feed.");
            start();
        }
        state.active_subscribers
    }

    /// Records a departure and returns the updated count. Never goes below zero.
    pub fn on_unsubscribe(&self) -> usize {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.active_subscribers == 0 {
            log::warn!("Unsubscribe with no active subscribers ignored.");
        }
        state.active_subscribers = state.active_subscribers.saturating_sub(1);
        state.active_subscribers
    }

    /// Boundary check run by the feed loop after a cycle and after a wait.
    ///
    /// Returns `true` when subscribers remain. Otherwise clears `running`,
    /// calls `stop` under the lock and returns `false`.
    pub fn end_cycle<F: FnOnce()>(&self, stop: F) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.active_subscribers > 0 {
            return true;
        }
        state.running = false;
        stop();
        false
    }

    /// A copy of the current state.
    pub fn snapshot(&self) -> FeedState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn only_the_first_subscriber_starts_the_feed() {
        let registry = Registry::new();
        let mut starts = 0;

        assert_eq!(registry.on_subscribe(|| starts += 1), 1);
        assert_eq!(registry.on_subscribe(|| starts += 1), 2);
        assert_eq!(starts, 1);
        assert!(registry.snapshot().running);
    }

    #[test]
    fn rejoin_before_boundary_does_not_start_twice() {
        let registry = Registry::new();
        let mut starts = 0;

        registry.on_subscribe(|| starts += 1);
        registry.on_unsubscribe();
        registry.on_subscribe(|| starts += 1);
        registry.on_unsubscribe();
        registry.on_subscribe(|| starts += 1);

        assert_eq!(starts, 1);
        // The loop is still alive and sees a subscriber at its boundary.
        assert!(registry.end_cycle(|| panic!("must keep running")));
    }

    #[test]
    fn boundary_stops_when_empty_and_allows_restart() {
        let registry = Registry::new();
        let mut starts = 0;
        let mut stops = 0;

        registry.on_subscribe(|| starts += 1);
        registry.on_unsubscribe();
        assert!(!registry.end_cycle(|| stops += 1));
        assert_eq!(stops, 1);
        assert!(!registry.snapshot().running);

        registry.on_subscribe(|| starts += 1);
        assert_eq!(starts, 2);
        assert_eq!(registry.snapshot().loops_started, 2);
    }

    #[test]
    fn count_never_goes_negative() {
        let registry = Registry::new();
        assert_eq!(registry.on_unsubscribe(), 0);
        registry.on_subscribe(|| {});
        assert_eq!(registry.on_unsubscribe(), 0);
        assert_eq!(registry.on_unsubscribe(), 0);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let registry = Arc::new(Registry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        registry.on_subscribe(|| {});
                    }
                    for _ in 0..500 {
                        registry.on_unsubscribe();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let state = registry.snapshot();
        assert_eq!(state.active_subscribers, 8 * 500);
        assert_eq!(state.loops_started, 1);
    }
}
