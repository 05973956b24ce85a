//! # Live Feed Scheduler
//!
//! Drives the fetch → parse → persist → broadcast cycle while at least one
//! subscriber is connected, pausing a random interval between cycles.
//!
//! ```text
//!            first subscriber
//!   Idle ───────────────────────▶ Fetching ──cycle done──▶ check ──remain──▶ Waiting
//!    ▲                               ▲                       │                  │
//!    │◀──────── nobody left ─────────┼───────────────────────┘                  │
//!    │                               └──── remain ──── check ◀── delay elapsed ─┘
//!    └─────────────────── nobody left ───────────┘
//! ```
//!
//! Subscribers leaving never interrupts a cycle or a wait. The loop checks the
//! subscriber count through [`Registry::end_cycle`] when a cycle finishes and
//! again when the delay elapses, so no fetch starts once everyone has gone.
//! A 0→1 edge while a loop is still alive does not start a second one.

use crate::connections::history_store::HistoryStore;
use crate::core::dispatcher::{ClientId, Dispatcher};
use crate::core::registry::{FeedState, Registry};
use crate::markets::gold::{FeedUpdate, MarkupParser};
use crate::retrieve::page_fetch::MarkupFetcher;
use rand::Rng;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

/// Observable state of the feed loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedPhase {
    /// No loop running.
    #[default]
    Idle,
    /// A cycle is in progress.
    Fetching,
    /// Sleeping until the next cycle.
    Waiting,
}

/// Raised when a jitter window is empty.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Jitter minimum {min:?} exceeds maximum {max:?}")]
pub struct InvalidJitterBounds {
    /// Requested lower bound.
    pub min: Duration,
    /// Requested upper bound.
    pub max: Duration,
}

/// Inclusive window the inter-cycle delay is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitterBounds {
    min: Duration,
    max: Duration,
}

impl JitterBounds {
    /// Builds a window, rejecting `min > max`.
    pub fn new(min: Duration, max: Duration) -> Result<Self, InvalidJitterBounds> {
        if min > max {
            return Err(InvalidJitterBounds { min, max });
        }
        Ok(Self { min, max })
    }

    /// [`JitterBounds::new`] in milliseconds.
    pub fn from_millis(min_ms: u64, max_ms: u64) -> Result<Self, InvalidJitterBounds> {
        Self::new(Duration::from_millis(min_ms), Duration::from_millis(max_ms))
    }

    /// Lower bound.
    pub fn min(&self) -> Duration {
        self.min
    }

    /// Upper bound.
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Whether `delay` lies inside the window.
    pub fn contains(&self, delay: Duration) -> bool {
        self.min <= delay && delay <= self.max
    }
}

/// Draws one delay uniformly from `bounds`, at millisecond granularity.
pub fn jitter_delay<R: Rng>(rng: &mut R, bounds: &JitterBounds) -> Duration {
    let min_ms = u64::try_from(bounds.min.as_millis()).unwrap_or(u64::MAX);
    let max_ms = u64::try_from(bounds.max.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(rng.random_range(min_ms..=max_ms))
}

/// Static inputs of a scheduler.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Page the price table is fetched from.
    pub source_url: String,
    /// Inter-cycle delay window.
    pub bounds: JitterBounds,
}

/// What one cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// Whether the page was acquired.
    pub fetched: bool,
    /// Records parsed and published.
    pub records: usize,
    /// Rows persisted, `None` when persistence failed.
    pub persisted: Option<usize>,
    /// Consumers the update was handed to.
    pub delivered: usize,
}

/// # Feed Scheduler
///
/// Owns the subscription bookkeeping and the broadcast channel for the gold
/// feed. Create one per process with [`FeedScheduler::new`] and share the
/// returned `Arc`.
pub struct FeedScheduler {
    settings: FeedSettings,
    parser: MarkupParser,
    fetcher: Arc<dyn MarkupFetcher>,
    store: Arc<dyn HistoryStore>,
    dispatcher: Arc<Dispatcher<FeedUpdate>>,
    registry: Registry,
    phase: watch::Sender<FeedPhase>,
    last_delay: Mutex<Option<Duration>>,
    cycles: AtomicU64,
}

impl FeedScheduler {
    /// Builds an idle scheduler. Nothing is fetched until a subscriber joins.
    pub fn new(
        settings: FeedSettings,
        parser: MarkupParser,
        fetcher: Arc<dyn MarkupFetcher>,
        store: Arc<dyn HistoryStore>,
    ) -> Arc<Self> {
        let (phase, _) = watch::channel(FeedPhase::Idle);
        Arc::new(Self {
            settings,
            parser,
            fetcher,
            store,
            dispatcher: Arc::new(Dispatcher::new()),
            registry: Registry::new(),
            phase,
            last_delay: Mutex::new(None),
            cycles: AtomicU64::new(0),
        })
    }

    /// The broadcast channel updates are published on.
    pub fn dispatcher(&self) -> &Arc<Dispatcher<FeedUpdate>> {
        &self.dispatcher
    }

    /// Subscribes a consumer to the broadcast channel and counts it as a
    /// subscriber, starting the loop on the 0→1 edge.
    ///
    /// The consumer is on the channel before the loop can publish, so it
    /// receives the first cycle's update.
    pub fn attach(self: &Arc<Self>, label: &str) -> (ClientId, mpsc::UnboundedReceiver<Arc<FeedUpdate>>) {
        let (id, rx) = self.dispatcher.join(label);
        self.subscriber_joined();
        (id, rx)
    }

    /// Removes a consumer added with [`FeedScheduler::attach`].
    ///
    /// Calling it twice for the same id counts one departure.
    pub fn detach(&self, id: ClientId) {
        if self.dispatcher.unsubscribe(id) {
            self.subscriber_left();
        }
    }

    /// Registry arrival hook. Spawns the feed loop on the 0→1 edge when none is alive.
    pub fn subscriber_joined(self: &Arc<Self>) -> usize {
        self.registry.on_subscribe(|| {
            self.phase.send_replace(FeedPhase::Fetching);
            tokio::spawn(Arc::clone(self).run());
        })
    }

    /// Registry departure hook. The loop notices after the current cycle or wait.
    pub fn subscriber_left(&self) -> usize {
        self.registry.on_unsubscribe()
    }

    /// Current phase.
    pub fn phase(&self) -> FeedPhase {
        *self.phase.borrow()
    }

    /// A receiver that observes every phase change.
    pub fn watch_phase(&self) -> watch::Receiver<FeedPhase> {
        self.phase.subscribe()
    }

    /// Registry snapshot.
    pub fn state(&self) -> FeedState {
        self.registry.snapshot()
    }

    /// The most recently drawn inter-cycle delay.
    pub fn last_delay(&self) -> Option<Duration> {
        *self.last_delay.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cycles completed since boot.
    pub fn cycles_completed(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Settings this scheduler was built with.
    pub fn settings(&self) -> &FeedSettings {
        &self.settings
    }

    /// # Run Cycle
    ///
    /// One fetch → parse → persist → broadcast pass. Never fails: a fetch error
    /// becomes an empty update and a persistence error is logged while the
    /// update still goes out.
    pub async fn run_cycle(&self) -> CycleReport {
        let (fetched, records) = match self.fetcher.fetch_raw_markup(&self.settings.source_url).await {
            Ok(markup) => (true, self.parser.parse(&markup)),
            Err(e) => {
                log::error!("Failed to fetch gold prices: {}", e);
                (false, Vec::new())
            }
        };
        let count = records.len();
        let update = Arc::new(FeedUpdate::gold(records));

        // The broadcast is polled first and completes without awaiting, so a
        // slow store only lengthens the cycle.
        let (delivered, persisted) = tokio::join!(
            async { self.dispatcher.publish_shared(Arc::clone(&update)) },
            async {
                match self.store.persist_batch(&update.data).await {
                    Ok(rows) => Some(rows),
                    Err(e) => {
                        log::error!("Failed to persist {} gold price records: {}", count, e);
                        None
                    }
                }
            },
        );

        self.cycles.fetch_add(1, Ordering::Relaxed);
        CycleReport {
            fetched,
            records: count,
            persisted,
            delivered,
        }
    }

    async fn run(self: Arc<Self>) {
        log::info!("Live feed loop started for {}", self.settings.source_url);
        loop {
            let report = self.run_cycle().await;
            log::info!(
                "Cycle done: {} records, {} consumers, persisted {:?}",
                report.records,
                report.delivered,
                report.persisted
            );

            let keep_going = self.registry.end_cycle(|| {
                self.phase.send_replace(FeedPhase::Idle);
            });
            if !keep_going {
                log::info!("No active subscribers. Live feed loop stopped.");
                return;
            }

            let delay = jitter_delay(&mut rand::rng(), &self.settings.bounds);
            *self.last_delay.lock().unwrap_or_else(PoisonError::into_inner) = Some(delay);
            self.phase.send_replace(FeedPhase::Waiting);
            log::debug!("Next fetch in {}ms", delay.as_millis());

            tokio::time::sleep(delay).await;

            // Departures during the wait are seen here, before any fetch.
            let keep_going = self.registry.end_cycle(|| {
                self.phase.send_replace(FeedPhase::Idle);
            });
            if !keep_going {
                log::info!("Subscribers left during the wait. Live feed loop stopped.");
                return;
            }
            self.phase.send_replace(FeedPhase::Fetching);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::history_store::{MemoryHistoryStore, PersistenceError};
    use crate::markets::gold::{HistoryRow, PriceRecord, SourceProfile};
    use crate::retrieve::page_fetch::FetchError;
    use async_trait::async_trait;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const PAGE: &str = r#"<table id="kapalicarsi_h">
        <tr><th>Birim</th><th>Alış</th><th>Satış</th></tr>
        <tr><td>Gram Altın <span class="time">10:42</span></td>
            <td>2.450,10</td>
            <td><div>2.460,55</div><div class="fark yukari"><span data-percent="">0,85</span><span data-change="">20,66</span></div></td></tr>
    </table>"#;

    struct StaticFetcher {
        result: Result<&'static str, u16>,
    }

    #[async_trait]
    impl MarkupFetcher for StaticFetcher {
        async fn fetch_raw_markup(&self, url: &str) -> Result<String, FetchError> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            match self.result {
                Ok(page) => Ok(page.to_string()),
                Err(status) => Err(FetchError::Status {
                    url: url.to_string(),
                    status,
                }),
            }
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl HistoryStore for BrokenStore {
        async fn persist_batch(&self, _records: &[PriceRecord]) -> Result<usize, PersistenceError> {
            Err(PersistenceError::Unavailable("connection refused".to_string()))
        }

        async fn query_recent(&self, _limit: usize) -> Result<Vec<HistoryRow>, PersistenceError> {
            Err(PersistenceError::Unavailable("connection refused".to_string()))
        }
    }

    fn scheduler(result: Result<&'static str, u16>, store: Arc<dyn HistoryStore>) -> Arc<FeedScheduler> {
        FeedScheduler::new(
            FeedSettings {
                source_url: "http://gold.test/altin/bursa".to_string(),
                bounds: JitterBounds::from_millis(1_000, 2_000).unwrap(),
            },
            MarkupParser::new(SourceProfile::default()).unwrap(),
            Arc::new(StaticFetcher { result }),
            store,
        )
    }

    #[test]
    fn jitter_stays_inside_bounds() {
        let bounds = JitterBounds::from_millis(10_000, 15_000).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1_000 {
            assert!(bounds.contains(jitter_delay(&mut rng, &bounds)));
        }
    }

    #[test]
    fn degenerate_window_yields_fixed_delay() {
        let bounds = JitterBounds::from_millis(500, 500).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(jitter_delay(&mut rng, &bounds), Duration::from_millis(500));
    }

    #[test]
    fn inverted_window_is_rejected() {
        assert!(JitterBounds::from_millis(2_000, 1_000).is_err());
    }

    #[test]
    fn phase_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&FeedPhase::Waiting).unwrap(), "\"waiting\"");
    }

    #[tokio::test(start_paused = true)]
    async fn cycle_publishes_and_persists() {
        let store = Arc::new(MemoryHistoryStore::new());
        let feed = scheduler(Ok(PAGE), store.clone());
        let (_id, mut rx) = feed.dispatcher().join("test");

        let report = feed.run_cycle().await;
        assert_eq!(
            report,
            CycleReport {
                fetched: true,
                records: 1,
                persisted: Some(1),
                delivered: 1
            }
        );
        let update = rx.recv().await.unwrap();
        assert_eq!(update.r#type, "gold-update");
        assert_eq!(update.data[0].name, "Gram Altın");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_failure_publishes_empty_update() {
        let store = Arc::new(MemoryHistoryStore::new());
        let feed = scheduler(Err(503), store.clone());
        let (_id, mut rx) = feed.dispatcher().join("test");

        let report = feed.run_cycle().await;
        assert!(!report.fetched);
        assert!(rx.recv().await.unwrap().data.is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn store_failure_does_not_stop_broadcast() {
        let feed = scheduler(Ok(PAGE), Arc::new(BrokenStore));
        let (_id, mut rx) = feed.dispatcher().join("test");

        let report = feed.run_cycle().await;
        assert_eq!(report.persisted, None);
        assert_eq!(report.delivered, 1);
        assert_eq!(rx.recv().await.unwrap().data.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn first_subscriber_moves_idle_to_fetching_then_waiting() {
        let feed = scheduler(Ok(PAGE), Arc::new(MemoryHistoryStore::new()));
        let mut phases = feed.watch_phase();
        assert_eq!(feed.phase(), FeedPhase::Idle);

        let (id, _rx) = feed.attach("test");
        assert_eq!(feed.phase(), FeedPhase::Fetching);

        phases.wait_for(|p| *p == FeedPhase::Waiting).await.unwrap();
        let delay = feed.last_delay().unwrap();
        assert!(feed.settings().bounds.contains(delay));
        assert_eq!(feed.cycles_completed(), 1);

        feed.detach(id);
        phases.wait_for(|p| *p == FeedPhase::Idle).await.unwrap();
        assert!(!feed.state().running);
    }

    #[tokio::test(start_paused = true)]
    async fn no_cycle_starts_after_everyone_left_during_the_wait() {
        let store = Arc::new(MemoryHistoryStore::new());
        let feed = scheduler(Ok(PAGE), store.clone());
        let mut phases = feed.watch_phase();

        let (id, _rx) = feed.attach("test");
        phases.wait_for(|p| *p == FeedPhase::Waiting).await.unwrap();
        feed.detach(id);

        phases.wait_for(|p| *p == FeedPhase::Idle).await.unwrap();
        assert_eq!(feed.cycles_completed(), 1);
        assert_eq!(store.len(), 1);
        assert!(!feed.state().running);
    }

    #[tokio::test(start_paused = true)]
    async fn detach_is_counted_once() {
        let feed = scheduler(Ok(PAGE), Arc::new(MemoryHistoryStore::new()));
        let (a, _rx_a) = feed.attach("a");
        let (_b, _rx_b) = feed.attach("b");

        feed.detach(a);
        feed.detach(a);
        assert_eq!(feed.state().active_subscribers, 1);
    }
}
