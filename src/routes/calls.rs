use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::error::ApiError;
use crate::models::CallLogEntry;
use crate::AppState;

/// GET /call-logs — call lifecycle rows, read through the Call Log Store.
pub async fn list_call_logs(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<CallLogEntry>>, ApiError> {
    let entries = state
        .call_logs
        .list()
        .await
        .map_err(|err| ApiError::store_unavailable(&err))?;
    Ok(Json(entries))
}
