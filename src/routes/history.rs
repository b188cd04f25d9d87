use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;

use crate::error::ApiError;
use crate::models::Message;
use crate::AppState;

/// GET /history/:room_id — persisted chat history for a room, read through
/// the Message Store.
pub async fn room_history(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let messages = state
        .messages
        .list(&room_id)
        .await
        .map_err(|err| ApiError::store_unavailable(&err))?;
    Ok(Json(messages))
}
