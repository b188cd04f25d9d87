use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};

use crate::models::{CallLogEntry, Message, NewCallLogEntry, NewMessage};

// ---------------------------------------------------------------------------
// Store traits
// ---------------------------------------------------------------------------

/// Failure talking to a durable store collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("store responded with status {0}")]
    Status(StatusCode),
}

/// Append-only log of chat messages, keyed by room.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append(&self, message: NewMessage) -> Result<(), StoreError>;
    async fn list(&self, room_id: &str) -> Result<Vec<Message>, StoreError>;
}

/// Append-only log of call lifecycle rows.
#[async_trait]
pub trait CallLogStore: Send + Sync {
    async fn append(&self, entry: NewCallLogEntry) -> Result<(), StoreError>;
    async fn list(&self) -> Result<Vec<CallLogEntry>, StoreError>;
}

// ---------------------------------------------------------------------------
// HTTP implementations (the CRUD backend)
// ---------------------------------------------------------------------------

/// Message Store client against the UrbanMove CRUD backend.
#[derive(Clone)]
pub struct HttpMessageStore {
    client: Client,
    base_url: String,
}

impl HttpMessageStore {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl MessageStore for HttpMessageStore {
    async fn append(&self, message: NewMessage) -> Result<(), StoreError> {
        let response = self
            .client
            .post(format!("{}/api/messages", self.base_url))
            .json(&message)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(StoreError::Status(response.status()));
        }
        Ok(())
    }

    async fn list(&self, room_id: &str) -> Result<Vec<Message>, StoreError> {
        let response = self
            .client
            .get(format!("{}/api/messages/{room_id}", self.base_url))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(StoreError::Status(response.status()));
        }
        Ok(response.json().await?)
    }
}

/// Call Log Store client against the UrbanMove CRUD backend.
#[derive(Clone)]
pub struct HttpCallLogStore {
    client: Client,
    base_url: String,
}

impl HttpCallLogStore {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl CallLogStore for HttpCallLogStore {
    async fn append(&self, entry: NewCallLogEntry) -> Result<(), StoreError> {
        let response = self
            .client
            .post(format!("{}/api/call-log", self.base_url))
            .json(&entry)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(StoreError::Status(response.status()));
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<CallLogEntry>, StoreError> {
        let response = self
            .client
            .get(format!("{}/api/call-logs", self.base_url))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(StoreError::Status(response.status()));
        }
        Ok(response.json().await?)
    }
}

// ---------------------------------------------------------------------------
// In-memory implementations (tests, offline runs)
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    rows: Mutex<Vec<Message>>,
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn append(&self, message: NewMessage) -> Result<(), StoreError> {
        let row = Message {
            id: None,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            room_id: message.room_id,
            message: message.message,
            created_at: Some(Utc::now()),
        };
        self.rows.lock().unwrap().push(row);
        Ok(())
    }

    async fn list(&self, room_id: &str) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| row.room_id == room_id)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct MemoryCallLogStore {
    rows: Mutex<Vec<CallLogEntry>>,
}

#[async_trait]
impl CallLogStore for MemoryCallLogStore {
    async fn append(&self, entry: NewCallLogEntry) -> Result<(), StoreError> {
        let row = CallLogEntry {
            id: None,
            user_id: entry.user_id,
            driver_id: entry.driver_id,
            call_type: entry.call_type,
            call_status: entry.call_status,
            created_at: Some(Utc::now()),
        };
        self.rows.lock().unwrap().push(row);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<CallLogEntry>, StoreError> {
        Ok(self.rows.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_message_store_lists_by_room() {
        let store = MemoryMessageStore::default();
        store
            .append(NewMessage {
                sender_id: "u1".into(),
                receiver_id: "d1".into(),
                room_id: "d1_u1".into(),
                message: "hello".into(),
            })
            .await
            .unwrap();
        store
            .append(NewMessage {
                sender_id: "u2".into(),
                receiver_id: "d2".into(),
                room_id: "d2_u2".into(),
                message: "elsewhere".into(),
            })
            .await
            .unwrap();

        let rows = store.list("d1_u1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sender_id, "u1");
        assert!(rows[0].created_at.is_some());
        assert!(store.list("unknown").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_call_log_store_keeps_every_row() {
        use crate::models::{CallStatus, CallType};

        let store = MemoryCallLogStore::default();
        for status in [CallStatus::Started, CallStatus::Completed] {
            store
                .append(NewCallLogEntry {
                    user_id: "u1".into(),
                    driver_id: "d1".into(),
                    call_type: CallType::Audio,
                    call_status: status,
                })
                .await
                .unwrap();
        }

        let rows = store.list().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].call_status, CallStatus::Started);
        assert_eq!(rows[1].call_status, CallStatus::Completed);
    }

    #[test]
    fn http_stores_normalize_base_url() {
        let store = HttpMessageStore::new(Client::new(), "http://localhost:4000/");
        assert_eq!(store.base_url, "http://localhost:4000");
    }
}
