use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Chat messages
// ---------------------------------------------------------------------------

/// Body of a message append against the Message Store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub sender_id: String,
    pub receiver_id: String,
    pub room_id: String,
    pub message: String,
}

/// Persisted chat message as returned by the Message Store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default, rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub sender_id: String,
    pub receiver_id: String,
    pub room_id: String,
    pub message: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Call lifecycle log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Audio,
}

impl CallType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallType::Audio => "audio",
        }
    }
}

/// Outcome recorded per lifecycle transition, one append-only row each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Started,
    Completed,
    Failed,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Started => "started",
            CallStatus::Completed => "completed",
            CallStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a lifecycle append against the Call Log Store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewCallLogEntry {
    pub user_id: String,
    pub driver_id: String,
    pub call_type: CallType,
    pub call_status: CallStatus,
}

/// Persisted call log row as returned by the Call Log Store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallLogEntry {
    #[serde(default, rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub user_id: String,
    pub driver_id: String,
    pub call_type: CallType,
    pub call_status: CallStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_wire_keys_are_camel_case() {
        let body = NewMessage {
            sender_id: "u1".into(),
            receiver_id: "d1".into(),
            room_id: "d1_u1".into(),
            message: "hello".into(),
        };
        let value = serde_json::to_value(&body).unwrap();

        assert_eq!(value["senderId"], "u1");
        assert_eq!(value["receiverId"], "d1");
        assert_eq!(value["roomId"], "d1_u1");
        assert_eq!(value["message"], "hello");
    }

    #[test]
    fn call_log_wire_keys_and_values() {
        let body = NewCallLogEntry {
            user_id: "u1".into(),
            driver_id: "d1".into(),
            call_type: CallType::Audio,
            call_status: CallStatus::Started,
        };
        let value = serde_json::to_value(&body).unwrap();

        assert_eq!(value["userId"], "u1");
        assert_eq!(value["driverId"], "d1");
        assert_eq!(value["callType"], "audio");
        assert_eq!(value["callStatus"], "started");
    }

    #[test]
    fn call_status_round_trips_lowercase() {
        for (status, text) in [
            (CallStatus::Started, "\"started\""),
            (CallStatus::Completed, "\"completed\""),
            (CallStatus::Failed, "\"failed\""),
        ] {
            assert_eq!(serde_json::to_string(&status).unwrap(), text);
            let back: CallStatus = serde_json::from_str(text).unwrap();
            assert_eq!(back, status);
        }
    }

    #[test]
    fn message_tolerates_store_metadata() {
        let raw = serde_json::json!({
            "_id": "66f2a9",
            "senderId": "u1",
            "receiverId": "d1",
            "roomId": "d1_u1",
            "message": "hello",
            "createdAt": "2026-08-25T10:00:00Z",
            "updatedAt": "2026-08-25T10:00:00Z",
            "__v": 0
        });
        let message: Message = serde_json::from_value(raw).unwrap();

        assert_eq!(message.id.as_deref(), Some("66f2a9"));
        assert_eq!(message.sender_id, "u1");
        assert!(message.created_at.is_some());
    }
}
