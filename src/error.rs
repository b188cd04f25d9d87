use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::session::SessionError;
use crate::store::StoreError;

// ---------------------------------------------------------------------------
// Relay errors (realtime surface)
// ---------------------------------------------------------------------------

/// Why an inbound realtime event was rejected or degraded.
///
/// None of these are fatal to the connection: the offender is notified on
/// the `error` event and everything else proceeds untouched.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("payload did not match the event schema: {0}")]
    InvalidPayload(String),
    #[error("no joined room matches this event")]
    NotInRoom,
    #[error("caller has no participant identity; join with participantId or send a chat message first")]
    UnidentifiedCaller,
    #[error("target '{0}' is not present in the room")]
    TargetNotFound(String),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("store write failed: {0}")]
    Persistence(String),
}

impl RelayError {
    /// Stable wire code carried on the `error` event.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::InvalidPayload(_) => "INVALID_PAYLOAD",
            RelayError::NotInRoom => "NOT_IN_ROOM",
            RelayError::UnidentifiedCaller => "UNIDENTIFIED_CALLER",
            RelayError::TargetNotFound(_) => "TARGET_NOT_FOUND",
            RelayError::Session(SessionError::AlreadyInCall) => "CALL_IN_PROGRESS",
            RelayError::Session(SessionError::NotRinging | SessionError::NoSession) => {
                "NO_ACTIVE_CALL"
            }
            RelayError::Session(SessionError::NotParticipant) => "NOT_IN_CALL",
            RelayError::Persistence(_) => "PERSIST_FAILED",
        }
    }
}

/// Wire form of a rejection, emitted on the `error` event.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

impl From<&RelayError> for ErrorPayload {
    fn from(err: &RelayError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// API errors (REST surface)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    status: u16,
}

/// Structured REST error that serializes to JSON.
///
/// ```json
/// {
///   "error": {
///     "code": "room_not_found",
///     "message": "Room 'd1_u1' is not currently registered.",
///     "status": 404
///   }
/// }
/// ```
pub struct ApiError {
    pub code: &'static str,
    pub message: String,
    pub status: StatusCode,
}

impl ApiError {
    /// 404 — the room is not in the registry right now.
    pub fn room_not_found(room_id: &str) -> Self {
        Self {
            code: "room_not_found",
            message: format!("Room '{room_id}' is not currently registered."),
            status: StatusCode::NOT_FOUND,
        }
    }

    /// 502 — a durable store collaborator could not be reached.
    pub fn store_unavailable(err: &StoreError) -> Self {
        Self {
            code: "store_unavailable",
            message: err.to_string(),
            status: StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = self.code, status = self.status.as_u16(), "{}", self.message);
        } else if self.status.is_client_error() {
            tracing::warn!(code = self.code, status = self.status.as_u16(), "{}", self.message);
        }

        let envelope = ErrorEnvelope {
            error: ErrorBody {
                code: self.code,
                message: self.message,
                status: self.status.as_u16(),
            },
        };

        (self.status, Json(envelope)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn relay_error_codes_are_stable() {
        assert_eq!(RelayError::NotInRoom.code(), "NOT_IN_ROOM");
        assert_eq!(
            RelayError::Session(SessionError::AlreadyInCall).code(),
            "CALL_IN_PROGRESS"
        );
        assert_eq!(
            RelayError::Session(SessionError::NotRinging).code(),
            "NO_ACTIVE_CALL"
        );
        assert_eq!(
            RelayError::Session(SessionError::NoSession).code(),
            "NO_ACTIVE_CALL"
        );
        assert_eq!(
            RelayError::Session(SessionError::NotParticipant).code(),
            "NOT_IN_CALL"
        );
        assert_eq!(
            RelayError::Persistence("boom".into()).code(),
            "PERSIST_FAILED"
        );
    }

    #[test]
    fn error_payload_carries_code_and_message() {
        let payload = ErrorPayload::from(&RelayError::TargetNotFound("d1".into()));
        assert_eq!(payload.code, "TARGET_NOT_FOUND");
        assert!(payload.message.contains("d1"));
    }

    #[tokio::test]
    async fn api_error_json_structure() {
        let response = ApiError::room_not_found("d1_u1").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["error"]["code"], "room_not_found");
        assert_eq!(value["error"]["status"], 404);
        assert!(value["error"]["message"]
            .as_str()
            .unwrap()
            .contains("d1_u1"));
    }
}
