use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::CallStatus;
use crate::rooms::{ConnectionId, RoomId};

// ---------------------------------------------------------------------------
// Call state machine
// ---------------------------------------------------------------------------

/// Lifecycle of the single call a room may carry.
///
/// `Idle` is the absence of a tracked session; terminal states are applied
/// on removal, so the tracker only ever holds `Ringing` and `Active`
/// sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Idle,
    Ringing,
    Active,
    Ended,
    Failed,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Ringing => "ringing",
            CallState::Active => "active",
            CallState::Ended => "ended",
            CallState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended | CallState::Failed)
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected state-machine transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("the room already has a call in progress")]
    AlreadyInCall,
    #[error("the room has no call awaiting an answer")]
    NotRinging,
    #[error("the room has no ringing or active call")]
    NoSession,
    #[error("connection is not a participant in this call")]
    NotParticipant,
}

// ---------------------------------------------------------------------------
// CallSession
// ---------------------------------------------------------------------------

/// One in-flight call, created on the first offer for a room.
///
/// Connection identities address the signaling relay; participant ids are
/// captured at offer time so terminal log rows can still be attributed
/// after either side disconnects.
#[derive(Debug, Clone)]
pub struct CallSession {
    pub id: Uuid,
    pub room_id: RoomId,
    pub state: CallState,
    pub caller_conn: ConnectionId,
    pub callee_conn: ConnectionId,
    pub caller_participant: String,
    pub callee_participant: String,
    pub ringing_at: DateTime<Utc>,
    pub active_at: Option<DateTime<Utc>>,
}

impl CallSession {
    pub fn involves(&self, conn: &str) -> bool {
        self.caller_conn == conn || self.callee_conn == conn
    }

    /// The other side of the call relative to `conn`.
    pub fn peer_of(&self, conn: &str) -> Option<&ConnectionId> {
        if self.caller_conn == conn {
            Some(&self.callee_conn)
        } else if self.callee_conn == conn {
            Some(&self.caller_conn)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// CallSessionTracker
// ---------------------------------------------------------------------------

/// Per-room call sessions, keyed by room.
#[derive(Debug, Default)]
pub struct CallSessionTracker {
    sessions: BTreeMap<RoomId, CallSession>,
}

impl CallSessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, room: &RoomId) -> Option<&CallSession> {
        self.sessions.get(room)
    }

    pub fn state_of(&self, room: &RoomId) -> CallState {
        self.sessions
            .get(room)
            .map(|session| session.state)
            .unwrap_or(CallState::Idle)
    }

    /// `Idle → Ringing`: opens the session for the first offer in a room.
    /// Rejected while any call is outstanding for that room.
    pub fn begin(
        &mut self,
        room: &RoomId,
        caller_conn: ConnectionId,
        callee_conn: ConnectionId,
        caller_participant: String,
        callee_participant: String,
    ) -> Result<&CallSession, SessionError> {
        match self.sessions.entry(room.clone()) {
            Entry::Occupied(_) => Err(SessionError::AlreadyInCall),
            Entry::Vacant(slot) => Ok(slot.insert(CallSession {
                id: Uuid::new_v4(),
                room_id: room.clone(),
                state: CallState::Ringing,
                caller_conn,
                callee_conn,
                caller_participant,
                callee_participant,
                ringing_at: Utc::now(),
                active_at: None,
            })),
        }
    }

    /// `Ringing → Active`: the answering connection must be a session side.
    pub fn answer(
        &mut self,
        room: &RoomId,
        answering_conn: &str,
    ) -> Result<&CallSession, SessionError> {
        let session = self.sessions.get_mut(room).ok_or(SessionError::NotRinging)?;
        if session.state != CallState::Ringing {
            return Err(SessionError::NotRinging);
        }
        if !session.involves(answering_conn) {
            return Err(SessionError::NotParticipant);
        }
        session.state = CallState::Active;
        session.active_at = Some(Utc::now());
        Ok(&*session)
    }

    /// Where a candidate from `from_conn` should be relayed: the other side
    /// of the room's live session. ICE flows during `Ringing` and `Active`.
    pub fn relay_target(
        &self,
        room: &RoomId,
        from_conn: &str,
    ) -> Result<ConnectionId, SessionError> {
        let session = self.sessions.get(room).ok_or(SessionError::NoSession)?;
        session
            .peer_of(from_conn)
            .cloned()
            .ok_or(SessionError::NotParticipant)
    }

    /// Any live state → terminal. Removes the session and returns it with
    /// its terminal state applied, plus the lifecycle row to append:
    /// `completed` when the call had reached `Active`, `failed` otherwise.
    pub fn terminate(&mut self, room: &RoomId) -> Option<(CallSession, CallStatus)> {
        let mut session = self.sessions.remove(room)?;
        let status = if session.state == CallState::Active {
            CallStatus::Completed
        } else {
            CallStatus::Failed
        };
        session.state = if status == CallStatus::Completed {
            CallState::Ended
        } else {
            CallState::Failed
        };
        Some((session, status))
    }

    /// Rooms whose offer has rung unanswered for at least `window`.
    pub fn expired_ringing(&self, now: DateTime<Utc>, window: Duration) -> Vec<RoomId> {
        self.sessions
            .values()
            .filter(|session| {
                session.state == CallState::Ringing && now - session.ringing_at >= window
            })
            .map(|session| session.room_id.clone())
            .collect()
    }

    pub fn sessions(&self) -> impl Iterator<Item = &CallSession> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn begin(tracker: &mut CallSessionTracker, room: &RoomId) {
        tracker
            .begin(
                room,
                "conn-caller".into(),
                "conn-callee".into(),
                "u1".into(),
                "d1".into(),
            )
            .unwrap();
    }

    #[test]
    fn first_offer_opens_a_ringing_session() {
        let mut tracker = CallSessionTracker::new();
        let room = RoomId::new("d1_u1");
        assert_eq!(tracker.state_of(&room), CallState::Idle);

        begin(&mut tracker, &room);
        assert_eq!(tracker.state_of(&room), CallState::Ringing);
        let session = tracker.get(&room).unwrap();
        assert_eq!(session.caller_conn, "conn-caller");
        assert!(session.active_at.is_none());
    }

    #[test]
    fn second_offer_is_rejected_in_any_live_state() {
        let mut tracker = CallSessionTracker::new();
        let room = RoomId::new("d1_u1");
        begin(&mut tracker, &room);

        let rejected = tracker.begin(
            &room,
            "other".into(),
            "conn-caller".into(),
            "d1".into(),
            "u1".into(),
        );
        assert_eq!(rejected.err(), Some(SessionError::AlreadyInCall));

        tracker.answer(&room, "conn-callee").unwrap();
        let rejected = tracker.begin(
            &room,
            "other".into(),
            "conn-caller".into(),
            "d1".into(),
            "u1".into(),
        );
        assert_eq!(rejected.err(), Some(SessionError::AlreadyInCall));
    }

    #[test]
    fn answer_moves_ringing_to_active_once() {
        let mut tracker = CallSessionTracker::new();
        let room = RoomId::new("d1_u1");
        begin(&mut tracker, &room);

        let session = tracker.answer(&room, "conn-callee").unwrap();
        assert_eq!(session.state, CallState::Active);
        assert!(session.active_at.is_some());

        assert_eq!(
            tracker.answer(&room, "conn-callee").err(),
            Some(SessionError::NotRinging)
        );
    }

    #[test]
    fn answer_requires_a_session_participant() {
        let mut tracker = CallSessionTracker::new();
        let room = RoomId::new("d1_u1");
        begin(&mut tracker, &room);

        assert_eq!(
            tracker.answer(&room, "conn-stranger").err(),
            Some(SessionError::NotParticipant)
        );
        assert_eq!(tracker.state_of(&room), CallState::Ringing);
    }

    #[test]
    fn answer_without_an_offer_is_rejected() {
        let mut tracker = CallSessionTracker::new();
        let room = RoomId::new("d1_u1");
        assert_eq!(
            tracker.answer(&room, "conn-callee").err(),
            Some(SessionError::NotRinging)
        );
    }

    #[test]
    fn relay_target_is_the_other_side() {
        let mut tracker = CallSessionTracker::new();
        let room = RoomId::new("d1_u1");
        begin(&mut tracker, &room);

        assert_eq!(
            tracker.relay_target(&room, "conn-caller").unwrap(),
            "conn-callee"
        );
        assert_eq!(
            tracker.relay_target(&room, "conn-callee").unwrap(),
            "conn-caller"
        );
        assert_eq!(
            tracker.relay_target(&room, "conn-stranger").err(),
            Some(SessionError::NotParticipant)
        );
        assert_eq!(
            tracker.relay_target(&RoomId::new("elsewhere"), "conn-caller").err(),
            Some(SessionError::NoSession)
        );
    }

    #[test]
    fn terminate_maps_state_to_outcome() {
        let mut tracker = CallSessionTracker::new();
        let room = RoomId::new("d1_u1");

        begin(&mut tracker, &room);
        let (session, status) = tracker.terminate(&room).unwrap();
        assert_eq!(status, CallStatus::Failed);
        assert_eq!(session.state, CallState::Failed);
        assert!(session.state.is_terminal());

        begin(&mut tracker, &room);
        tracker.answer(&room, "conn-callee").unwrap();
        let (session, status) = tracker.terminate(&room).unwrap();
        assert_eq!(status, CallStatus::Completed);
        assert_eq!(session.state, CallState::Ended);

        assert!(tracker.terminate(&room).is_none());
        assert_eq!(tracker.state_of(&room), CallState::Idle);
    }

    #[test]
    fn expired_ringing_respects_the_window() {
        let mut tracker = CallSessionTracker::new();
        let room = RoomId::new("d1_u1");
        begin(&mut tracker, &room);

        let now = Utc::now();
        assert!(tracker
            .expired_ringing(now, Duration::seconds(3600))
            .is_empty());
        assert_eq!(
            tracker.expired_ringing(now, Duration::zero()),
            vec![room.clone()]
        );

        // Active sessions never expire.
        tracker.answer(&room, "conn-callee").unwrap();
        assert!(tracker.expired_ringing(now, Duration::zero()).is_empty());
    }
}
