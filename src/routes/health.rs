use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::AppState;

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.manager.stats();

    Json(serde_json::json!({
        "status": "ok",
        "service": "urbanmove-realtime",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": stats.connections,
        "rooms": stats.rooms,
        "ringing_calls": stats.ringing_calls,
        "active_calls": stats.active_calls,
    }))
}
