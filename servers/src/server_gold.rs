//! # Live Gold Price Feed Server
//!
//! Serves the gold price table as a live WebSocket feed plus a read-only
//! history endpoint. The page is only fetched while at least one WebSocket
//! client is connected.
//!
//! ## Routes
//!
//! - `GET /ws`: one `{"type":"gold-update","data":[...]}` text frame per cycle.
//! - `GET /api/history?limit=N`: most recent captured rows, newest first.
//! - `GET /api/feed`: current feed phase and subscriber count.
//! - `GET /health`: liveness probe.
//!
//! Configuration is layered: defaults, then `server_gold.conf` (JSON), then
//! environment variables and command-line flags. See `gold_logic::config`.

use anyhow::Result;
use lib_common::connections::{HistoryStore, MemoryHistoryStore, PostgresHistoryStore};
use lib_common::core::{FeedScheduler, FeedSettings};
use lib_common::markets::gold::{MarkupParser, SourceProfile};
use lib_common::retrieve::page_fetch::HttpPageFetcher;
use std::sync::Arc;
use tokio::signal;

mod gold_logic;
use gold_logic::{config, downstream, logger, state};

#[tokio::main]
async fn main() -> Result<()> {
    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();

    let settings = config::load_settings()?;
    logger::setup_logging(&settings.log_dir, &settings.log_level)?;
    log::info!(
        "Gold feed server booting. Source: {}, delay {}..={}ms",
        settings.source_url,
        settings.jitter.min().as_millis(),
        settings.jitter.max().as_millis()
    );

    let store = open_history_store(&settings).await?;
    let fetcher = HttpPageFetcher::new(settings.fetch_timeout, settings.settle)?;
    let parser = MarkupParser::new(SourceProfile::default())?;
    let feed = FeedScheduler::new(
        FeedSettings {
            source_url: settings.source_url.clone(),
            bounds: settings.jitter,
        },
        parser,
        Arc::new(fetcher),
        store.clone(),
    );
    let app_state = state::AppState::new(feed, store, settings.history_limit);

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let mut downstream_handle = tokio::spawn(downstream::run(settings, app_state, shutdown_tx.subscribe()));

    // Wait for shutdown signal, or for the server to exit on its own
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = terminate_signal() => {
            log::info!("SIGTERM received, initiating shutdown.");
        }
        result = &mut downstream_handle => {
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(anyhow::anyhow!("Downstream task failed: {}", e)),
            };
        }
    }

    // Send shutdown signal to all components
    let _ = shutdown_tx.send(());
    downstream_handle.await??;

    log::info!("Shutdown complete.");
    Ok(())
}

/// Postgres when `DATABASE_URL` is set, otherwise an in-memory store.
///
/// An unreachable database does not stop the server: the live feed keeps
/// broadcasting and every failed write is logged.
async fn open_history_store(settings: &config::Settings) -> Result<Arc<dyn HistoryStore>> {
    let Some(url) = &settings.database_url else {
        log::warn!("DATABASE_URL not set. Price history is kept in memory, grows without bound and is lost on exit.");
        return Ok(Arc::new(MemoryHistoryStore::new()));
    };

    let store = PostgresHistoryStore::connect(url, settings.db_pool_size)?;
    if let Err(e) = store.init_schema().await {
        log::error!("Failed to initialise history schema: {}", e);
    }
    Ok(Arc::new(store))
}

async fn terminate_signal() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term_signal) => {
                term_signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        // On non-unix platforms, just wait forever.
        std::future::pending::<()>().await;
    }
}
