use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;

use crate::error::ApiError;
use crate::relay::RoomSnapshot;
use crate::AppState;

/// GET /rooms — every room currently known to the registry.
pub async fn list_rooms(State(state): State<Arc<AppState>>) -> Json<Vec<RoomSnapshot>> {
    Json(state.manager.rooms_snapshot())
}

/// GET /rooms/:room_id — members and call state of one room.
pub async fn get_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomSnapshot>, ApiError> {
    state
        .manager
        .room_snapshot(&room_id)
        .map(Json)
        .ok_or_else(|| ApiError::room_not_found(&room_id))
}
