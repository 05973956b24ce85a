use crate::gold_logic::config::Settings;
use crate::gold_logic::error::AppError;
use crate::gold_logic::origin::{OriginPolicy, origin_guard};
use crate::gold_logic::state::AppState;
use axum::{
    Json, Router,
    extract::{
        ConnectInfo, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    middleware,
    response::IntoResponse,
    routing::get,
};
use axum_server::tls_rustls::RustlsConfig;
use futures_util::StreamExt;
use lib_common::core::FeedPhase;
use lib_common::markets::gold::HistoryRow;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// Read-only view of the feed for `/api/feed`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSnapshot {
    pub phase: FeedPhase,
    pub active_subscribers: usize,
    pub running: bool,
    pub loops_started: u64,
    pub cycles_completed: u64,
    pub last_delay_ms: Option<u64>,
}

pub fn router(state: AppState, policy: Arc<OriginPolicy>) -> Router {
    let cors = policy.cors_layer();
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/history", get(history_handler))
        .route("/api/feed", get(feed_handler))
        .route("/health", get(health_handler))
        .layer(middleware::from_fn_with_state(policy, origin_guard))
        .layer(cors)
        .with_state(state)
}

pub async fn run(settings: Settings, state: AppState, mut shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
    let policy = Arc::new(OriginPolicy::new(settings.allowed_origins.clone()));
    let app = router(state, policy);
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));

    if let Some((cert_path, key_path)) = settings.tls {
        log::info!("Loading TLS certs from: {}", cert_path.display());
        let tls_config = RustlsConfig::from_pem_file(cert_path, key_path)
            .await
            .map_err(|e| anyhow::anyhow!("TLS Configuration Error: {}", e))?;

        let handle = axum_server::Handle::new();
        let signal_handle = handle.clone();
        tokio::spawn(async move {
            shutdown.recv().await.ok();
            log::info!("Downstream server shutting down.");
            signal_handle.graceful_shutdown(Some(Duration::from_secs(10)));
        });

        log::info!("Gold feed server listening on https://{}", addr);
        axum_server::bind_rustls(addr, tls_config)
            .handle(handle)
            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
            .await?;
    } else {
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        log::info!("Gold feed server listening on http://{}", addr);
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move {
                shutdown.recv().await.ok();
                log::info!("Downstream server shutting down.");
            })
            .await?;
    }

    Ok(())
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn history_handler(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<HistoryRow>>, AppError> {
    let limit = state.history_window(query.limit).ok_or(AppError::InvalidLimit)?;
    let rows = state.store.query_recent(limit).await?;
    Ok(Json(rows))
}

async fn feed_handler(State(state): State<AppState>) -> Json<FeedSnapshot> {
    let registry = state.feed.state();
    Json(FeedSnapshot {
        phase: state.feed.phase(),
        active_subscribers: registry.active_subscribers,
        running: registry.running,
        loops_started: registry.loops_started,
        cycles_completed: state.feed.cycles_completed(),
        last_delay_ms: state
            .feed
            .last_delay()
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
    })
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, addr, state))
}

async fn handle_socket(mut socket: WebSocket, addr: SocketAddr, state: AppState) {
    let (client_id, mut updates) = state.feed.attach(&addr.to_string());
    log::info!("{} connected from {}", client_id, addr);

    loop {
        tokio::select! {
            inbound = socket.next() => {
                match inbound {
                    // Client text is not part of the protocol.
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::debug!("{} read error: {}", client_id, e);
                        break;
                    }
                }
            }
            update = updates.recv() => {
                let Some(update) = update else { break };
                let text = match serde_json::to_string(&*update) {
                    Ok(text) => text,
                    Err(e) => {
                        log::error!("Failed to encode gold update: {}", e);
                        continue;
                    }
                };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    log::warn!("Send to {} failed. Closing session.", client_id);
                    break;
                }
            }
        }
    }

    state.feed.detach(client_id);
    log::info!("{} disconnected", client_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures_util::StreamExt;
    use lib_common::connections::{HistoryStore, MemoryHistoryStore, PersistenceError};
    use lib_common::core::{FeedScheduler, FeedSettings, JitterBounds};
    use lib_common::markets::gold::{MarkupParser, PriceRecord, PriceStatus, SourceProfile};
    use lib_common::retrieve::page_fetch::{FetchError, MarkupFetcher};
    use tokio_tungstenite::tungstenite;

    const PAGE: &str = r#"<table id="kapalicarsi_h">
        <tr><th>Birim</th><th>Alış</th><th>Satış</th></tr>
        <tr><td>Has Altın<span class="time">11:05</span></td><td>2.980,00</td>
            <td><div>2.990,00</div><div class="fark asagi"><span data-percent="">0,12</span><span data-change="">-3,60</span></div></td></tr>
    </table>"#;

    struct FixtureFetcher;

    #[async_trait]
    impl MarkupFetcher for FixtureFetcher {
        async fn fetch_raw_markup(&self, _url: &str) -> Result<String, FetchError> {
            Ok(PAGE.to_string())
        }
    }

    struct DownStore;

    #[async_trait]
    impl HistoryStore for DownStore {
        async fn persist_batch(&self, _records: &[PriceRecord]) -> Result<usize, PersistenceError> {
            Err(PersistenceError::Unavailable("pool timed out".to_string()))
        }

        async fn query_recent(&self, _limit: usize) -> Result<Vec<HistoryRow>, PersistenceError> {
            Err(PersistenceError::Unavailable("pool timed out".to_string()))
        }
    }

    fn app_state(store: Arc<dyn HistoryStore>, history_limit: usize) -> AppState {
        let feed = FeedScheduler::new(
            FeedSettings {
                source_url: "http://gold.test/altin/bursa".to_string(),
                bounds: JitterBounds::from_millis(50, 100).unwrap(),
            },
            MarkupParser::new(SourceProfile::default()).unwrap(),
            Arc::new(FixtureFetcher),
            store.clone(),
        );
        AppState::new(feed, store, history_limit)
    }

    async fn spawn_app(state: AppState) -> SocketAddr {
        let policy = Arc::new(OriginPolicy::new(vec!["https://metal.ojrd.space".to_string()]));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(state, policy);
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .unwrap();
        });
        addr
    }

    fn record(name: &str) -> PriceRecord {
        PriceRecord {
            name: name.to_string(),
            buying: "1".to_string(),
            selling: "2".to_string(),
            status: PriceStatus::Up,
            change_rate: "%0,5".to_string(),
            change_amount: "10".to_string(),
            time: "10:00".to_string(),
        }
    }

    #[tokio::test]
    async fn health_answers_ok() {
        let addr = spawn_app(app_state(Arc::new(MemoryHistoryStore::new()), 100)).await;
        let body = reqwest::get(format!("http://{}/health", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn history_is_capped_and_newest_first() {
        let store = Arc::new(MemoryHistoryStore::new());
        store.persist_batch(&[record("a"), record("b"), record("c")]).await.unwrap();
        let addr = spawn_app(app_state(store, 2)).await;

        let rows: Vec<serde_json::Value> = reqwest::get(format!("http://{}/api/history?limit=50", addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], "c");
        assert_eq!(rows[0]["changeRate"], "%0,5");
        assert!(rows[0]["scrapedAt"].is_string());

        let rows: Vec<serde_json::Value> = reqwest::get(format!("http://{}/api/history?limit=1", addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn zero_limit_is_a_bad_request() {
        let addr = spawn_app(app_state(Arc::new(MemoryHistoryStore::new()), 100)).await;
        let response = reqwest::get(format!("http://{}/api/history?limit=0", addr)).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn store_failure_is_a_server_error() {
        let addr = spawn_app(app_state(Arc::new(DownStore), 100)).await;
        let response = reqwest::get(format!("http://{}/api/history", addr)).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error_type"], "HistoryStoreError");
    }

    #[tokio::test]
    async fn foreign_origin_is_forbidden() {
        let addr = spawn_app(app_state(Arc::new(MemoryHistoryStore::new()), 100)).await;
        let client = reqwest::Client::new();

        let rejected = client
            .get(format!("http://{}/api/history", addr))
            .header("Origin", "https://evil.example")
            .send()
            .await
            .unwrap();
        assert_eq!(rejected.status(), reqwest::StatusCode::FORBIDDEN);

        let accepted = client
            .get(format!("http://{}/api/history", addr))
            .header("Origin", "https://metal.ojrd.space")
            .send()
            .await
            .unwrap();
        assert_eq!(accepted.status(), reqwest::StatusCode::OK);
        assert_eq!(
            accepted.headers().get("access-control-allow-origin").unwrap(),
            "https://metal.ojrd.space"
        );
    }

    #[tokio::test]
    async fn feed_snapshot_starts_idle() {
        let addr = spawn_app(app_state(Arc::new(MemoryHistoryStore::new()), 100)).await;
        let body: serde_json::Value = reqwest::get(format!("http://{}/api/feed", addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["phase"], "idle");
        assert_eq!(body["activeSubscribers"], 0);
        assert_eq!(body["running"], false);
    }

    #[tokio::test]
    async fn websocket_client_receives_gold_updates() {
        let store = Arc::new(MemoryHistoryStore::new());
        let state = app_state(store.clone(), 100);
        let feed = state.feed.clone();
        let addr = spawn_app(state).await;

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
            .await
            .unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let tungstenite::Message::Text(text) = frame else {
            panic!("expected a text frame, got {:?}", frame);
        };
        let update: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(update["type"], "gold-update");
        assert_eq!(update["data"][0]["name"], "Has Altın");
        assert_eq!(update["data"][0]["status"], "down");
        assert!(!store.is_empty());

        ws.close(None).await.unwrap();
        let mut phases = feed.watch_phase();
        tokio::time::timeout(Duration::from_secs(5), phases.wait_for(|p| *p == FeedPhase::Idle))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(feed.state().active_subscribers, 0);
    }
}
