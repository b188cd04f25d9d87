use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use crate::error::{ErrorPayload, RelayError};
use crate::models::{CallStatus, CallType, NewCallLogEntry, NewMessage};
use crate::rooms::{ConnectionId, RoomId, RoomRegistry};
use crate::session::{CallSessionTracker, CallState, SessionError};
use crate::store::{CallLogStore, MessageStore};

// ---------------------------------------------------------------------------
// Outbound events
// ---------------------------------------------------------------------------

/// Chat message as delivered to the other members of a room.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatDelivery {
    pub sender_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Everything the relay can push to a connected client. The transport
/// adapter turns each variant into one Socket.IO emit.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    Connected { connection_id: ConnectionId },
    RoomJoined { room_id: RoomId },
    ReceiveMessage(ChatDelivery),
    CallMade { offer: Value, from: ConnectionId },
    AnswerMade { answer: Value, from: ConnectionId },
    IceCandidate { candidate: Value, from: ConnectionId },
    CallEnded { room_id: RoomId, reason: String },
    Error(ErrorPayload),
}

impl OutboundEvent {
    /// Socket.IO event name this payload rides on.
    pub fn event(&self) -> &'static str {
        match self {
            OutboundEvent::Connected { .. } => "connected",
            OutboundEvent::RoomJoined { .. } => "room-joined",
            OutboundEvent::ReceiveMessage(_) => "receive-message",
            OutboundEvent::CallMade { .. } => "call-made",
            OutboundEvent::AnswerMade { .. } => "answer-made",
            OutboundEvent::IceCandidate { .. } => "ice-candidate",
            OutboundEvent::CallEnded { .. } => "call-ended",
            OutboundEvent::Error(_) => "error",
        }
    }

    /// Wire payload for the event.
    pub fn payload(&self) -> Value {
        match self {
            OutboundEvent::Connected { connection_id } => {
                serde_json::json!({ "connectionId": connection_id })
            }
            OutboundEvent::RoomJoined { room_id } => {
                serde_json::json!({ "roomId": room_id })
            }
            OutboundEvent::ReceiveMessage(delivery) => {
                serde_json::to_value(delivery).unwrap_or(Value::Null)
            }
            OutboundEvent::CallMade { offer, from } => {
                serde_json::json!({ "offer": offer, "from": from })
            }
            OutboundEvent::AnswerMade { answer, from } => {
                serde_json::json!({ "answer": answer, "from": from })
            }
            OutboundEvent::IceCandidate { candidate, from } => {
                serde_json::json!({ "candidate": candidate, "from": from })
            }
            OutboundEvent::CallEnded { room_id, reason } => {
                serde_json::json!({ "roomId": room_id, "reason": reason })
            }
            OutboundEvent::Error(payload) => {
                serde_json::to_value(payload).unwrap_or(Value::Null)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshots (observability surface)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct MemberSnapshot {
    pub connection_id: ConnectionId,
    pub participant_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallSnapshot {
    pub session_id: Uuid,
    pub caller: String,
    pub callee: String,
    pub ringing_at: DateTime<Utc>,
    pub active_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of one room.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    pub members: Vec<MemberSnapshot>,
    pub call_state: CallState,
    pub call: Option<CallSnapshot>,
}

/// Live gauges for the health endpoint.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RelayStats {
    pub connections: usize,
    pub rooms: usize,
    pub ringing_calls: usize,
    pub active_calls: usize,
}

// ---------------------------------------------------------------------------
// ConnectionManager
// ---------------------------------------------------------------------------

/// One live transport connection.
struct Connection {
    participant_id: Option<String>,
    room: Option<RoomId>,
    sender: UnboundedSender<OutboundEvent>,
}

struct RelayState {
    connections: HashMap<ConnectionId, Connection>,
    registry: RoomRegistry,
    tracker: CallSessionTracker,
}

/// Owns every live connection and serializes room mutations.
///
/// Each inbound event runs one synchronous critical section against the
/// connection table, registry, and tracker; fan-out lands on unbounded
/// per-connection channels inside that section, so delivery order matches
/// processing order. Store writes are awaited only after the lock is
/// released and never gate delivery.
pub struct ConnectionManager {
    inner: Mutex<RelayState>,
    messages: Arc<dyn MessageStore>,
    call_logs: Arc<dyn CallLogStore>,
}

impl ConnectionManager {
    pub fn new(
        registry: RoomRegistry,
        tracker: CallSessionTracker,
        messages: Arc<dyn MessageStore>,
        call_logs: Arc<dyn CallLogStore>,
    ) -> Self {
        Self {
            inner: Mutex::new(RelayState {
                connections: HashMap::new(),
                registry,
                tracker,
            }),
            messages,
            call_logs,
        }
    }

    /// Registers a new connection and hands back its outbound event stream.
    pub fn connect(&self, conn_id: &str) -> UnboundedReceiver<OutboundEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(OutboundEvent::Connected {
            connection_id: conn_id.to_string(),
        });

        let mut state = self.inner.lock().unwrap();
        state.connections.insert(
            conn_id.to_string(),
            Connection {
                participant_id: None,
                room: None,
                sender: tx,
            },
        );
        tracing::debug!(sid = %conn_id, "connection registered");
        rx
    }

    /// Places the connection in `room_id`, replacing any previous
    /// membership. Re-joining the current room only repeats the ack.
    pub async fn join_room(&self, conn_id: &str, room_id: &str, participant_id: Option<String>) {
        let pending = {
            let mut guard = self.inner.lock().unwrap();
            let state = &mut *guard;

            let new_room = RoomId::new(room_id);
            let previous = match state.connections.get_mut(conn_id) {
                Some(conn) => {
                    if participant_id.is_some() {
                        conn.participant_id = participant_id;
                    }
                    conn.room.replace(new_room.clone())
                }
                None => return,
            };

            let pending = match previous {
                Some(old_room) if old_room != new_room => {
                    Self::leave_step(state, conn_id, &old_room, "peer-left")
                }
                _ => None,
            };

            state.registry.add(&new_room, conn_id);
            Self::send_to(state, conn_id, OutboundEvent::RoomJoined { room_id: new_room.clone() });
            tracing::debug!(sid = %conn_id, room_id = %new_room, "joined room");
            pending
        };

        if let Some(entry) = pending {
            self.append_call_log(entry, Some(conn_id)).await;
        }
    }

    /// Fans a chat message out to the other members of the sender's room,
    /// then persists it. Delivery is not gated on the store write.
    pub async fn send_chat(&self, conn_id: &str, room_id: &str, sender_id: &str, message: &str) {
        let pending = {
            let mut guard = self.inner.lock().unwrap();
            let state = &mut *guard;
            match Self::chat_step(state, conn_id, room_id, sender_id, message) {
                Ok(new_message) => Some(new_message),
                Err(err) => {
                    Self::reject(state, conn_id, "send-message", &err);
                    None
                }
            }
        };

        if let Some(new_message) = pending {
            if let Err(err) = self.messages.append(new_message).await {
                tracing::warn!(sid = %conn_id, error = %err, "message append failed, fan-out already delivered");
                self.notify_error(conn_id, &RelayError::Persistence(err.to_string()));
            }
        }
    }

    /// First offer for a room: opens a `Ringing` session, rings the target,
    /// and logs a `started` row.
    pub async fn offer_call(&self, conn_id: &str, offer: Value, to: &str) {
        let pending = {
            let mut guard = self.inner.lock().unwrap();
            let state = &mut *guard;
            match Self::offer_step(state, conn_id, offer, to) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    Self::reject(state, conn_id, "call-user", &err);
                    None
                }
            }
        };

        if let Some(entry) = pending {
            self.append_call_log(entry, Some(conn_id)).await;
        }
    }

    /// Routes an answer back to the connection that sent the offer.
    pub fn answer_call(&self, conn_id: &str, answer: Value) {
        let mut guard = self.inner.lock().unwrap();
        let state = &mut *guard;
        if let Err(err) = Self::answer_step(state, conn_id, answer) {
            Self::reject(state, conn_id, "make-answer", &err);
        }
    }

    /// Forwards an ICE candidate to the other side of the room's call, in
    /// arrival order, without inspecting the payload.
    pub fn ice_candidate(&self, conn_id: &str, candidate: Value) {
        let mut guard = self.inner.lock().unwrap();
        let state = &mut *guard;
        if let Err(err) = Self::ice_step(state, conn_id, candidate) {
            Self::reject(state, conn_id, "ice-candidate", &err);
        }
    }

    /// Explicit hangup from either side; the connection stays joined.
    pub async fn end_call(&self, conn_id: &str, reason: Option<String>) {
        let pending = {
            let mut guard = self.inner.lock().unwrap();
            let state = &mut *guard;
            match Self::end_step(state, conn_id, reason) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    Self::reject(state, conn_id, "end-call", &err);
                    None
                }
            }
        };

        if let Some(entry) = pending {
            self.append_call_log(entry, Some(conn_id)).await;
        }
    }

    /// Transport-level disconnect. Never an error path: membership is
    /// dropped and any call the connection was part of is torn down.
    pub async fn disconnect(&self, conn_id: &str) {
        let pending = {
            let mut guard = self.inner.lock().unwrap();
            let state = &mut *guard;
            match state.connections.remove(conn_id) {
                Some(conn) => match conn.room {
                    Some(room) => Self::leave_step(state, conn_id, &room, "peer-disconnected"),
                    None => None,
                },
                None => None,
            }
        };
        tracing::info!(sid = %conn_id, "connection closed");

        if let Some(entry) = pending {
            self.append_call_log(entry, None).await;
        }
    }

    /// Fails every `Ringing` session older than `window` and logs it.
    /// Driven by the periodic sweeper task.
    pub async fn expire_stale_rings(&self, window: chrono::Duration) {
        let entries = {
            let mut guard = self.inner.lock().unwrap();
            let state = &mut *guard;
            let now = Utc::now();

            let mut entries = Vec::new();
            for room in state.tracker.expired_ringing(now, window) {
                if let Some((session, status)) = state.tracker.terminate(&room) {
                    for side in [&session.caller_conn, &session.callee_conn] {
                        Self::send_to(
                            state,
                            side,
                            OutboundEvent::CallEnded {
                                room_id: room.clone(),
                                reason: "timeout".to_string(),
                            },
                        );
                    }
                    tracing::info!(session_id = %session.id, room_id = %room, "ring timed out");
                    entries.push(NewCallLogEntry {
                        user_id: session.caller_participant,
                        driver_id: session.callee_participant,
                        call_type: CallType::Audio,
                        call_status: status,
                    });
                }
            }
            entries
        };

        for entry in entries {
            self.append_call_log(entry, None).await;
        }
    }

    // -- observability ------------------------------------------------------

    pub fn stats(&self) -> RelayStats {
        let state = self.inner.lock().unwrap();
        let ringing_calls = state
            .tracker
            .sessions()
            .filter(|s| s.state == CallState::Ringing)
            .count();
        RelayStats {
            connections: state.connections.len(),
            rooms: state.registry.room_count(),
            ringing_calls,
            active_calls: state.tracker.len() - ringing_calls,
        }
    }

    pub fn rooms_snapshot(&self) -> Vec<RoomSnapshot> {
        let state = self.inner.lock().unwrap();
        state
            .registry
            .rooms()
            .map(|(room, members)| {
                Self::snapshot_room(&state, room, members.iter().cloned().collect())
            })
            .collect()
    }

    pub fn room_snapshot(&self, room_id: &str) -> Option<RoomSnapshot> {
        let state = self.inner.lock().unwrap();
        let room = RoomId::new(room_id);
        let members = state.registry.members(&room);
        if members.is_empty() {
            return None;
        }
        Some(Self::snapshot_room(&state, &room, members))
    }

    // -- single-step event handlers (hold the lock, never await) ------------

    fn chat_step(
        state: &mut RelayState,
        conn_id: &str,
        room_id: &str,
        sender_id: &str,
        message: &str,
    ) -> Result<NewMessage, RelayError> {
        let room = RoomId::new(room_id);
        let conn = state
            .connections
            .get_mut(conn_id)
            .ok_or(RelayError::NotInRoom)?;
        if conn.room.as_ref() != Some(&room) {
            return Err(RelayError::NotInRoom);
        }
        // Original clients identify themselves only through chat traffic.
        if conn.participant_id.is_none() {
            conn.participant_id = Some(sender_id.to_string());
        }

        let delivery = ChatDelivery {
            sender_id: sender_id.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        };
        for member in state.registry.members(&room) {
            if member != conn_id {
                Self::send_to(state, &member, OutboundEvent::ReceiveMessage(delivery.clone()));
            }
        }

        let receiver_id = room.counterpart(sender_id).unwrap_or_default().to_string();
        Ok(NewMessage {
            sender_id: sender_id.to_string(),
            receiver_id,
            room_id: room.as_str().to_string(),
            message: message.to_string(),
        })
    }

    fn offer_step(
        state: &mut RelayState,
        conn_id: &str,
        offer: Value,
        to: &str,
    ) -> Result<NewCallLogEntry, RelayError> {
        let (room, caller_participant) = {
            let conn = state.connections.get(conn_id).ok_or(RelayError::NotInRoom)?;
            let room = conn.room.clone().ok_or(RelayError::NotInRoom)?;
            let participant = conn
                .participant_id
                .clone()
                .ok_or(RelayError::UnidentifiedCaller)?;
            (room, participant)
        };

        let callee_conn = Self::resolve_target(state, &room, conn_id, to)
            .ok_or_else(|| RelayError::TargetNotFound(to.to_string()))?;
        let callee_participant = state
            .connections
            .get(&callee_conn)
            .and_then(|conn| conn.participant_id.clone())
            .or_else(|| room.counterpart(&caller_participant).map(str::to_string))
            .unwrap_or_else(|| to.to_string());

        let session_id = {
            let session = state.tracker.begin(
                &room,
                conn_id.to_string(),
                callee_conn.clone(),
                caller_participant.clone(),
                callee_participant.clone(),
            )?;
            session.id
        };

        Self::send_to(
            state,
            &callee_conn,
            OutboundEvent::CallMade { offer, from: conn_id.to_string() },
        );
        tracing::info!(
            session_id = %session_id,
            room_id = %room,
            caller = %conn_id,
            callee = %callee_conn,
            "call ringing"
        );

        Ok(NewCallLogEntry {
            user_id: caller_participant,
            driver_id: callee_participant,
            call_type: CallType::Audio,
            call_status: CallStatus::Started,
        })
    }

    fn answer_step(state: &mut RelayState, conn_id: &str, answer: Value) -> Result<(), RelayError> {
        let room = Self::current_room(state, conn_id)?;
        let caller_conn = {
            let session = state.tracker.answer(&room, conn_id)?;
            session.caller_conn.clone()
        };

        Self::send_to(
            state,
            &caller_conn,
            OutboundEvent::AnswerMade { answer, from: conn_id.to_string() },
        );
        tracing::info!(room_id = %room, "call active");
        Ok(())
    }

    fn ice_step(state: &mut RelayState, conn_id: &str, candidate: Value) -> Result<(), RelayError> {
        let room = Self::current_room(state, conn_id)?;
        let target = state.tracker.relay_target(&room, conn_id)?;
        Self::send_to(
            state,
            &target,
            OutboundEvent::IceCandidate { candidate, from: conn_id.to_string() },
        );
        Ok(())
    }

    fn end_step(
        state: &mut RelayState,
        conn_id: &str,
        reason: Option<String>,
    ) -> Result<NewCallLogEntry, RelayError> {
        let room = Self::current_room(state, conn_id)?;
        {
            let session = state.tracker.get(&room).ok_or(SessionError::NoSession)?;
            if !session.involves(conn_id) {
                return Err(SessionError::NotParticipant.into());
            }
        }

        let reason = reason.unwrap_or_else(|| "hangup".to_string());
        let (session, status) = state
            .tracker
            .terminate(&room)
            .ok_or(SessionError::NoSession)?;
        for side in [&session.caller_conn, &session.callee_conn] {
            Self::send_to(
                state,
                side,
                OutboundEvent::CallEnded { room_id: room.clone(), reason: reason.clone() },
            );
        }
        tracing::info!(
            session_id = %session.id,
            room_id = %room,
            status = status.as_str(),
            reason = %reason,
            "call ended"
        );

        Ok(NewCallLogEntry {
            user_id: session.caller_participant,
            driver_id: session.callee_participant,
            call_type: CallType::Audio,
            call_status: status,
        })
    }

    // Shared by disconnect and join-replacement: drop membership, then tear
    // down a call the leaver was part of, or one whose room just vanished.
    fn leave_step(
        state: &mut RelayState,
        conn_id: &str,
        room: &RoomId,
        reason: &str,
    ) -> Option<NewCallLogEntry> {
        let room_gone = state.registry.remove(room, conn_id);

        let should_end = match state.tracker.get(room) {
            Some(session) => session.involves(conn_id) || room_gone,
            None => false,
        };
        if !should_end {
            return None;
        }

        let (session, status) = state.tracker.terminate(room)?;
        for side in [&session.caller_conn, &session.callee_conn] {
            if side.as_str() != conn_id {
                Self::send_to(
                    state,
                    side,
                    OutboundEvent::CallEnded {
                        room_id: room.clone(),
                        reason: reason.to_string(),
                    },
                );
            }
        }
        tracing::info!(
            session_id = %session.id,
            room_id = %room,
            status = status.as_str(),
            reason = reason,
            "call torn down"
        );

        Some(NewCallLogEntry {
            user_id: session.caller_participant,
            driver_id: session.callee_participant,
            call_type: CallType::Audio,
            call_status: status,
        })
    }

    // -- helpers ------------------------------------------------------------

    /// `to` may name a connection or a participant; both are resolved
    /// against the sender's current room, connection identity first.
    fn resolve_target(
        state: &RelayState,
        room: &RoomId,
        sender: &str,
        to: &str,
    ) -> Option<ConnectionId> {
        let members = state.registry.members(room);
        if to != sender && members.iter().any(|member| member == to) {
            return Some(to.to_string());
        }
        members.into_iter().find(|member| {
            member != sender
                && state
                    .connections
                    .get(member)
                    .and_then(|conn| conn.participant_id.as_deref())
                    == Some(to)
        })
    }

    fn current_room(state: &RelayState, conn_id: &str) -> Result<RoomId, RelayError> {
        state
            .connections
            .get(conn_id)
            .and_then(|conn| conn.room.clone())
            .ok_or(RelayError::NotInRoom)
    }

    fn send_to(state: &RelayState, conn_id: &str, event: OutboundEvent) {
        if let Some(conn) = state.connections.get(conn_id) {
            let _ = conn.sender.send(event);
        }
    }

    fn reject(state: &RelayState, conn_id: &str, event: &str, err: &RelayError) {
        tracing::debug!(sid = %conn_id, event = event, code = err.code(), "{err}");
        Self::send_to(state, conn_id, OutboundEvent::Error(ErrorPayload::from(err)));
    }

    fn notify_error(&self, conn_id: &str, err: &RelayError) {
        let state = self.inner.lock().unwrap();
        Self::send_to(&state, conn_id, OutboundEvent::Error(ErrorPayload::from(err)));
    }

    async fn append_call_log(&self, entry: NewCallLogEntry, warn_conn: Option<&str>) {
        if let Err(err) = self.call_logs.append(entry).await {
            tracing::warn!(error = %err, "call log append failed");
            if let Some(conn_id) = warn_conn {
                self.notify_error(conn_id, &RelayError::Persistence(err.to_string()));
            }
        }
    }

    fn snapshot_room(state: &RelayState, room: &RoomId, members: Vec<ConnectionId>) -> RoomSnapshot {
        let members = members
            .into_iter()
            .map(|connection_id| {
                let participant_id = state
                    .connections
                    .get(&connection_id)
                    .and_then(|conn| conn.participant_id.clone());
                MemberSnapshot { connection_id, participant_id }
            })
            .collect();
        let call = state.tracker.get(room).map(|session| CallSnapshot {
            session_id: session.id,
            caller: session.caller_participant.clone(),
            callee: session.callee_participant.clone(),
            ringing_at: session.ringing_at,
            active_at: session.active_at,
        });
        RoomSnapshot {
            room_id: room.clone(),
            members,
            call_state: state.tracker.state_of(room),
            call,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_match_the_wire_protocol() {
        let cases = [
            (
                OutboundEvent::Connected { connection_id: "c1".into() },
                "connected",
            ),
            (
                OutboundEvent::RoomJoined { room_id: RoomId::new("d1_u1") },
                "room-joined",
            ),
            (
                OutboundEvent::CallMade { offer: Value::Null, from: "c1".into() },
                "call-made",
            ),
            (
                OutboundEvent::AnswerMade { answer: Value::Null, from: "c1".into() },
                "answer-made",
            ),
            (
                OutboundEvent::IceCandidate { candidate: Value::Null, from: "c1".into() },
                "ice-candidate",
            ),
            (
                OutboundEvent::CallEnded {
                    room_id: RoomId::new("d1_u1"),
                    reason: "hangup".into(),
                },
                "call-ended",
            ),
        ];
        for (event, name) in cases {
            assert_eq!(event.event(), name);
        }
    }

    #[test]
    fn chat_delivery_payload_uses_camel_case_keys() {
        let event = OutboundEvent::ReceiveMessage(ChatDelivery {
            sender_id: "u1".into(),
            message: "hello".into(),
            timestamp: Utc::now(),
        });
        let payload = event.payload();

        assert_eq!(payload["senderId"], "u1");
        assert_eq!(payload["message"], "hello");
        assert!(payload.get("timestamp").is_some());
    }

    #[test]
    fn signaling_payloads_tag_the_source_connection() {
        let offer = serde_json::json!({ "type": "offer", "sdp": "v=0" });
        let event = OutboundEvent::CallMade { offer: offer.clone(), from: "conn-a".into() };
        let payload = event.payload();

        assert_eq!(payload["offer"], offer);
        assert_eq!(payload["from"], "conn-a");
    }
}
