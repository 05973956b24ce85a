//! # Live Feed Lifecycle Tests
//!
//! Drives `FeedScheduler` end to end against in-process fakes on a paused
//! tokio clock, so fetch latency and jitter delays elapse virtually.
//!
//! Covered: the 0→1 start edge under connect/disconnect churn, stopping after
//! a cycle or a wait without fetching for nobody, restart after idle, failed
//! fetches and a failing history store.

use async_trait::async_trait;
use lib_common::connections::{HistoryStore, MemoryHistoryStore, PersistenceError};
use lib_common::core::{FeedPhase, FeedScheduler, FeedSettings, JitterBounds};
use lib_common::markets::gold::{HistoryRow, MarkupParser, PriceRecord, SourceProfile};
use lib_common::retrieve::page_fetch::{FetchError, MarkupFetcher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const PAGE: &str = include_str!("../fixtures/kapalicarsi_sample.html");
const LATENCY: Duration = Duration::from_millis(500);
const MIN_DELAY_MS: u64 = 2_000;
const MAX_DELAY_MS: u64 = 4_000;

/// Serves the fixture page (or a 502) after a fixed latency and records how
/// many fetches overlap.
struct CountingFetcher {
    page: Option<&'static str>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl CountingFetcher {
    fn serving(page: Option<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            page,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarkupFetcher for CountingFetcher {
    async fn fetch_raw_markup(&self, url: &str) -> Result<String, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(LATENCY).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match self.page {
            Some(page) => Ok(page.to_string()),
            None => Err(FetchError::Status {
                url: url.to_string(),
                status: 502,
            }),
        }
    }
}

struct FailingStore;

#[async_trait]
impl HistoryStore for FailingStore {
    async fn persist_batch(&self, _records: &[PriceRecord]) -> Result<usize, PersistenceError> {
        Err(PersistenceError::QueryError("relation \"gold_prices\" does not exist".to_string()))
    }

    async fn query_recent(&self, _limit: usize) -> Result<Vec<HistoryRow>, PersistenceError> {
        Err(PersistenceError::QueryError("relation \"gold_prices\" does not exist".to_string()))
    }
}

fn build(fetcher: Arc<CountingFetcher>, store: Arc<dyn HistoryStore>) -> Arc<FeedScheduler> {
    FeedScheduler::new(
        FeedSettings {
            source_url: "http://gold.test/altin/bursa".to_string(),
            bounds: JitterBounds::from_millis(MIN_DELAY_MS, MAX_DELAY_MS).unwrap(),
        },
        MarkupParser::new(SourceProfile::default()).unwrap(),
        fetcher,
        store,
    )
}

#[tokio::test(start_paused = true)]
async fn first_subscriber_triggers_one_cycle_then_waits() {
    let fetcher = CountingFetcher::serving(Some(PAGE));
    let store = Arc::new(MemoryHistoryStore::new());
    let feed = build(fetcher.clone(), store.clone());
    let mut phases = feed.watch_phase();

    assert_eq!(feed.phase(), FeedPhase::Idle);
    let (_id, mut updates) = feed.attach("client-a");
    assert_eq!(feed.phase(), FeedPhase::Fetching);

    let update = updates.recv().await.unwrap();
    assert_eq!(update.r#type, "gold-update");
    assert_eq!(update.data.len(), 3);

    phases.wait_for(|p| *p == FeedPhase::Waiting).await.unwrap();
    let delay = feed.last_delay().unwrap();
    assert!(delay >= Duration::from_millis(MIN_DELAY_MS));
    assert!(delay <= Duration::from_millis(MAX_DELAY_MS));
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(store.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn churn_before_the_boundary_never_starts_a_second_loop() {
    let fetcher = CountingFetcher::serving(Some(PAGE));
    let feed = build(fetcher.clone(), Arc::new(MemoryHistoryStore::new()));

    let (first, _rx_first) = feed.attach("first");
    feed.detach(first);
    let (second, _rx_second) = feed.attach("second");
    feed.detach(second);
    let (_third, mut updates) = feed.attach("third");
    assert_eq!(feed.state().loops_started, 1);
    assert_eq!(feed.state().active_subscribers, 1);

    for _ in 0..3 {
        updates.recv().await.unwrap();
    }
    assert_eq!(fetcher.calls(), 3);
    assert_eq!(fetcher.max_in_flight(), 1);
    assert_eq!(feed.state().loops_started, 1);
}

#[tokio::test(start_paused = true)]
async fn cycles_are_spaced_by_latency_plus_jitter() {
    let fetcher = CountingFetcher::serving(Some(PAGE));
    let feed = build(fetcher, Arc::new(MemoryHistoryStore::new()));
    let (_id, mut updates) = feed.attach("client-a");

    updates.recv().await.unwrap();
    let mut previous = Instant::now();
    for _ in 0..5 {
        updates.recv().await.unwrap();
        let gap = previous.elapsed();
        previous = Instant::now();
        assert!(gap >= LATENCY + Duration::from_millis(MIN_DELAY_MS), "gap {:?}", gap);
        assert!(gap <= LATENCY + Duration::from_millis(MAX_DELAY_MS), "gap {:?}", gap);
    }
}

#[tokio::test(start_paused = true)]
async fn departure_mid_cycle_lets_the_cycle_finish() {
    let fetcher = CountingFetcher::serving(Some(PAGE));
    let store = Arc::new(MemoryHistoryStore::new());
    let feed = build(fetcher.clone(), store.clone());
    let mut phases = feed.watch_phase();

    let (id, _rx) = feed.attach("client-a");
    tokio::task::yield_now().await;
    assert_eq!(fetcher.calls(), 1);

    feed.detach(id);
    assert_eq!(feed.state().active_subscribers, 0);
    assert!(feed.state().running);

    phases.wait_for(|p| *p == FeedPhase::Idle).await.unwrap();
    assert_eq!(feed.cycles_completed(), 1);
    assert_eq!(store.len(), 3, "the in-flight cycle still persists");
    assert!(!feed.state().running);
}

#[tokio::test(start_paused = true)]
async fn departure_mid_wait_stops_without_another_fetch_and_rejoin_restarts() {
    let fetcher = CountingFetcher::serving(Some(PAGE));
    let feed = build(fetcher.clone(), Arc::new(MemoryHistoryStore::new()));
    let mut phases = feed.watch_phase();

    let (id, _rx) = feed.attach("client-a");
    phases.wait_for(|p| *p == FeedPhase::Waiting).await.unwrap();
    feed.detach(id);
    assert_eq!(feed.phase(), FeedPhase::Waiting);

    phases.wait_for(|p| *p == FeedPhase::Idle).await.unwrap();
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(feed.cycles_completed(), 1);

    // Nothing is fetched while idle, however long it lasts.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(feed.phase(), FeedPhase::Idle);

    let (_again, mut updates) = feed.attach("client-b");
    assert_eq!(feed.phase(), FeedPhase::Fetching);
    assert_eq!(feed.state().loops_started, 2);
    assert_eq!(updates.recv().await.unwrap().data.len(), 3);
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn join_and_leave_inside_one_wait_skips_the_next_fetch() {
    let fetcher = CountingFetcher::serving(Some(PAGE));
    let feed = build(fetcher.clone(), Arc::new(MemoryHistoryStore::new()));
    let mut phases = feed.watch_phase();

    let (first, _rx_first) = feed.attach("client-a");
    phases.wait_for(|p| *p == FeedPhase::Waiting).await.unwrap();
    let started = Instant::now();

    // 1→0→1→0 while the loop sleeps. The live loop absorbs the rejoin.
    feed.detach(first);
    let (second, _rx_second) = feed.attach("client-b");
    assert_eq!(feed.state().loops_started, 1);
    assert_eq!(feed.phase(), FeedPhase::Waiting);
    feed.detach(second);

    phases.wait_for(|p| *p == FeedPhase::Idle).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(MIN_DELAY_MS));
    assert!(started.elapsed() <= Duration::from_millis(MAX_DELAY_MS));
    assert_eq!(fetcher.calls(), 1);
    assert!(!feed.state().running);

    let (_third, mut updates) = feed.attach("client-c");
    assert_eq!(feed.state().loops_started, 2);
    assert_eq!(updates.recv().await.unwrap().data.len(), 3);
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_fetch_publishes_empty_update_and_keeps_running() {
    let fetcher = CountingFetcher::serving(None);
    let store = Arc::new(MemoryHistoryStore::new());
    let feed = build(fetcher.clone(), store.clone());
    let (_id, mut updates) = feed.attach("client-a");

    for _ in 0..2 {
        let update = updates.recv().await.unwrap();
        assert_eq!(update.r#type, "gold-update");
        assert!(update.data.is_empty());
    }
    assert_eq!(fetcher.calls(), 2);
    assert!(feed.state().running);
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn failing_store_does_not_block_broadcast() {
    let fetcher = CountingFetcher::serving(Some(PAGE));
    let feed = build(fetcher, Arc::new(FailingStore));
    let (_a, mut updates_a) = feed.attach("client-a");
    let (_b, mut updates_b) = feed.attach("client-b");

    for _ in 0..2 {
        assert_eq!(updates_a.recv().await.unwrap().data.len(), 3);
        assert_eq!(updates_b.recv().await.unwrap().data.len(), 3);
    }
    assert!(feed.state().running);
}

#[tokio::test(start_paused = true)]
async fn late_subscriber_sees_only_later_updates() {
    let fetcher = CountingFetcher::serving(Some(PAGE));
    let feed = build(fetcher, Arc::new(MemoryHistoryStore::new()));
    let (_early, mut early) = feed.attach("early");

    early.recv().await.unwrap();
    let (_late, mut late) = feed.attach("late");
    assert!(late.try_recv().is_err());

    early.recv().await.unwrap();
    late.recv().await.unwrap();
    assert_eq!(feed.cycles_completed(), 2);
}
