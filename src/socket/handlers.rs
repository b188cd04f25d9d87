use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use socketioxide::extract::{Data, SocketRef, State};

use crate::error::ErrorPayload;
use crate::AppState;

// ---------------------------------------------------------------------------
// Payload types for Socket.IO events
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomPayload {
    pub room_id: String,
    #[serde(default)]
    pub participant_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub room_id: String,
    pub sender_id: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct CallUserPayload {
    pub offer: Value,
    pub to: String,
}

// `to` is advisory on answers and candidates: routing always follows the
// session captured at offer time.
#[derive(Debug, Deserialize)]
pub struct MakeAnswerPayload {
    pub answer: Value,
    #[serde(default)]
    #[allow(dead_code)]
    pub to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IceCandidatePayload {
    pub candidate: Value,
    #[serde(default)]
    #[allow(dead_code)]
    pub to: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EndCallPayload {
    #[serde(default)]
    pub reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Connection handler
// ---------------------------------------------------------------------------

pub async fn on_connect(socket: SocketRef, state: State<Arc<AppState>>) {
    let conn_id = socket.id.to_string();

    // Register event handlers FIRST, before any other work. The client
    // receives the CONNECT_ACK immediately and may emit join-room straight
    // away; events arriving before registration are silently dropped by
    // socketioxide.
    socket.on("join-room", on_join_room);
    socket.on("send-message", on_send_message);
    socket.on("call-user", on_call_user);
    socket.on("make-answer", on_make_answer);
    socket.on("ice-candidate", on_ice_candidate);
    socket.on("end-call", on_end_call);
    socket.on_disconnect(on_disconnect);

    // The manager owns all outbound traffic for this connection. Pump its
    // event stream onto the wire until the connection record is dropped,
    // which closes the channel.
    let mut rx = state.manager.connect(&conn_id);
    let emitter = socket.clone();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let _ = emitter.emit(event.event(), &event.payload());
        }
    });

    tracing::info!(sid = %conn_id, "socket connected");
}

// ---------------------------------------------------------------------------
// Event: join-room
// ---------------------------------------------------------------------------

async fn on_join_room(socket: SocketRef, state: State<Arc<AppState>>, Data(raw): Data<Value>) {
    let Some(payload) = parse::<JoinRoomPayload>(&socket, "join-room", raw) else {
        return;
    };
    state
        .manager
        .join_room(&socket.id.to_string(), &payload.room_id, payload.participant_id)
        .await;
}

// ---------------------------------------------------------------------------
// Event: send-message
// ---------------------------------------------------------------------------

async fn on_send_message(socket: SocketRef, state: State<Arc<AppState>>, Data(raw): Data<Value>) {
    let Some(payload) = parse::<SendMessagePayload>(&socket, "send-message", raw) else {
        return;
    };
    state
        .manager
        .send_chat(
            &socket.id.to_string(),
            &payload.room_id,
            &payload.sender_id,
            &payload.message,
        )
        .await;
}

// ---------------------------------------------------------------------------
// Event: call-user
// ---------------------------------------------------------------------------

async fn on_call_user(socket: SocketRef, state: State<Arc<AppState>>, Data(raw): Data<Value>) {
    let Some(payload) = parse::<CallUserPayload>(&socket, "call-user", raw) else {
        return;
    };
    state
        .manager
        .offer_call(&socket.id.to_string(), payload.offer, &payload.to)
        .await;
}

// ---------------------------------------------------------------------------
// Event: make-answer
// ---------------------------------------------------------------------------

async fn on_make_answer(socket: SocketRef, state: State<Arc<AppState>>, Data(raw): Data<Value>) {
    let Some(payload) = parse::<MakeAnswerPayload>(&socket, "make-answer", raw) else {
        return;
    };
    state
        .manager
        .answer_call(&socket.id.to_string(), payload.answer);
}

// ---------------------------------------------------------------------------
// Event: ice-candidate
// ---------------------------------------------------------------------------

async fn on_ice_candidate(socket: SocketRef, state: State<Arc<AppState>>, Data(raw): Data<Value>) {
    let Some(payload) = parse::<IceCandidatePayload>(&socket, "ice-candidate", raw) else {
        return;
    };
    state
        .manager
        .ice_candidate(&socket.id.to_string(), payload.candidate);
}

// ---------------------------------------------------------------------------
// Event: end-call
// ---------------------------------------------------------------------------

async fn on_end_call(socket: SocketRef, state: State<Arc<AppState>>, Data(raw): Data<Value>) {
    // end-call may arrive with an empty payload.
    let payload: EndCallPayload = serde_json::from_value(raw).unwrap_or_default();
    state
        .manager
        .end_call(&socket.id.to_string(), payload.reason)
        .await;
}

// ---------------------------------------------------------------------------
// Disconnect
// ---------------------------------------------------------------------------

async fn on_disconnect(socket: SocketRef, state: State<Arc<AppState>>) {
    state.manager.disconnect(&socket.id.to_string()).await;
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse<T: serde::de::DeserializeOwned>(socket: &SocketRef, event: &str, raw: Value) -> Option<T> {
    match serde_json::from_value(raw) {
        Ok(payload) => Some(payload),
        Err(err) => {
            tracing::debug!(sid = %socket.id, event = event, error = %err, "payload rejected");
            let _ = socket.emit(
                "error",
                &ErrorPayload {
                    code: "INVALID_PAYLOAD".into(),
                    message: format!("Invalid {event} payload: {err}"),
                },
            );
            None
        }
    }
}
