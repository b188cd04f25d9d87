use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use socketioxide::SocketIo;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use urbanmove_realtime::config::AppConfig;
use urbanmove_realtime::relay::ConnectionManager;
use urbanmove_realtime::rooms::RoomRegistry;
use urbanmove_realtime::session::CallSessionTracker;
use urbanmove_realtime::store::{CallLogStore, HttpCallLogStore, HttpMessageStore, MessageStore};
use urbanmove_realtime::{logging, routes, socket, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing("urbanmove_realtime");

    let config = AppConfig::load()?;
    let port = config.port;

    // Durable store collaborators (the CRUD backend)
    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.store_timeout_secs))
        .build()?;
    let messages: Arc<dyn MessageStore> =
        Arc::new(HttpMessageStore::new(http_client.clone(), &config.store_base_url));
    let call_logs: Arc<dyn CallLogStore> =
        Arc::new(HttpCallLogStore::new(http_client, &config.store_base_url));

    let manager = Arc::new(ConnectionManager::new(
        RoomRegistry::new(),
        CallSessionTracker::new(),
        messages.clone(),
        call_logs.clone(),
    ));

    let state = Arc::new(AppState {
        config: config.clone(),
        manager: manager.clone(),
        messages,
        call_logs,
    });

    // Socket.IO setup
    let (sio_layer, io) = SocketIo::builder()
        .with_state(state.clone())
        .build_layer();

    io.ns("/", socket::handlers::on_connect);

    // Ring timeout sweeper: unanswered offers go Failed after the window.
    if config.ring_timeout_secs > 0 {
        let sweeper = manager.clone();
        let window = chrono::Duration::seconds(config.ring_timeout_secs as i64);
        let interval = Duration::from_secs(config.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                sweeper.expire_stale_rings(window).await;
            }
        });
    }

    // Axum router with REST endpoints + Socket.IO layer
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/rooms", get(routes::rooms::list_rooms))
        .route("/rooms/:room_id", get(routes::rooms::get_room))
        .route("/history/:room_id", get(routes::history::room_history))
        .route("/call-logs", get(routes::calls::list_call_logs))
        .layer(sio_layer)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!(addr = %addr, "urbanmove-realtime starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
