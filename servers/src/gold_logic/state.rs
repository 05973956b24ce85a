use lib_common::connections::HistoryStore;
use lib_common::core::FeedScheduler;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    // The live feed; owns the registry and the broadcast channel
    pub feed: Arc<FeedScheduler>,
    // Read side of the history log
    pub store: Arc<dyn HistoryStore>,
    // Default and cap of the history endpoint
    pub history_limit: usize,
}

impl AppState {
    pub fn new(feed: Arc<FeedScheduler>, store: Arc<dyn HistoryStore>, history_limit: usize) -> Self {
        Self {
            feed,
            store,
            history_limit,
        }
    }

    /// Row count for a history request: absent means the configured limit,
    /// anything above it is capped, zero is rejected.
    pub fn history_window(&self, requested: Option<usize>) -> Option<usize> {
        match requested {
            None => Some(self.history_limit),
            Some(0) => None,
            Some(n) => Some(n.min(self.history_limit)),
        }
    }
}
