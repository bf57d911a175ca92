//! Persistence of room and message records
//!
//! The relay only consumes this interface: look up a room when a client
//! connects, persist user/assistant/system messages, and delete a room's data
//! when it is closed administratively.

pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::generate_message_id;
use crate::protocol::{MessageId, MessageKind, Role, RoomId};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// A persisted chat room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRecord {
    pub id: RoomId,
    pub agent_type: String,
    pub agent_id: String,
    pub created_at: DateTime<Utc>,
}

impl RoomRecord {
    /// New room with a generated id
    pub fn new(agent_type: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_type: agent_type.into(),
            agent_id: agent_id.into(),
            created_at: Utc::now(),
        }
    }

    /// Use a caller-supplied id
    pub fn with_id(mut self, id: impl Into<RoomId>) -> Self {
        self.id = id.into();
        self
    }
}

/// A persisted chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub room_id: RoomId,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
}

impl MessageRecord {
    pub fn new(
        room_id: impl Into<RoomId>,
        kind: MessageKind,
        role: Role,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: generate_message_id(),
            room_id: room_id.into(),
            kind,
            content: content.into(),
            role,
            timestamp: Utc::now(),
        }
    }

    /// Reuse an id that was already announced to clients
    pub fn with_id(mut self, id: impl Into<MessageId>) -> Self {
        self.id = id.into();
        self
    }
}

/// Durable storage for rooms and messages
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create_room(&self, room: RoomRecord) -> Result<RoomRecord>;

    async fn get_room(&self, room_id: &str) -> Result<Option<RoomRecord>>;

    /// Returns whether a room was deleted
    async fn delete_room(&self, room_id: &str) -> Result<bool>;

    /// Fails with `RoomNotFound` if the room does not exist
    async fn create_message(&self, message: MessageRecord) -> Result<MessageRecord>;

    /// Messages of a room, oldest first
    async fn list_messages(&self, room_id: &str) -> Result<Vec<MessageRecord>>;

    /// Returns the number of deleted messages
    async fn delete_messages(&self, room_id: &str) -> Result<usize>;
}

/// Open the store selected by a database URL.
///
/// `None` or `memory` gives an in-memory store; `sqlite://path` or a plain
/// path opens a SQLite file.
pub fn open_store(database_url: Option<&str>) -> Result<Arc<dyn MessageStore>> {
    match database_url.map(str::trim) {
        None | Some("") | Some("memory") | Some(":memory:") => Ok(Arc::new(MemoryStore::new())),
        Some(url) => {
            let path = url.strip_prefix("sqlite://").unwrap_or(url);
            Ok(Arc::new(SqliteStore::open(path)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_record_ids_are_unique() {
        let a = RoomRecord::new("repeater", "agent-1");
        let b = RoomRecord::new("repeater", "agent-1");
        assert_ne!(a.id, b.id);
        assert_eq!(a.clone().with_id("fixed").id, "fixed");
    }

    #[test]
    fn test_message_record_serializes_type_field() {
        let msg = MessageRecord::new("room", MessageKind::Response, Role::Assistant, "hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "response");
        assert_eq!(json["role"], "assistant");
    }

    #[test]
    fn test_open_store_selects_backend() {
        assert!(open_store(None).is_ok());
        assert!(open_store(Some("memory")).is_ok());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.db");
        let url = format!("sqlite://{}", path.display());
        assert!(open_store(Some(&url)).is_ok());
        assert!(path.exists());
    }
}
