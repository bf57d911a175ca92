//! In-memory message store

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{MessageRecord, MessageStore, RoomRecord};
use crate::error::{ChatError, Result};
use crate::protocol::RoomId;

/// Rooms and messages held in process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    rooms: RwLock<HashMap<RoomId, RoomRecord>>,
    /// Messages per room in insertion order
    messages: RwLock<HashMap<RoomId, Vec<MessageRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn create_room(&self, room: RoomRecord) -> Result<RoomRecord> {
        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(&room.id) {
            return Err(ChatError::storage(format!("Room {} already exists", room.id)));
        }
        rooms.insert(room.id.clone(), room.clone());
        Ok(room)
    }

    async fn get_room(&self, room_id: &str) -> Result<Option<RoomRecord>> {
        Ok(self.rooms.read().await.get(room_id).cloned())
    }

    async fn delete_room(&self, room_id: &str) -> Result<bool> {
        Ok(self.rooms.write().await.remove(room_id).is_some())
    }

    async fn create_message(&self, message: MessageRecord) -> Result<MessageRecord> {
        if !self.rooms.read().await.contains_key(&message.room_id) {
            return Err(ChatError::room_not_found(message.room_id));
        }
        self.messages
            .write()
            .await
            .entry(message.room_id.clone())
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn list_messages(&self, room_id: &str) -> Result<Vec<MessageRecord>> {
        Ok(self
            .messages
            .read()
            .await
            .get(room_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_messages(&self, room_id: &str) -> Result<usize> {
        Ok(self
            .messages
            .write()
            .await
            .remove(room_id)
            .map(|msgs| msgs.len())
            .unwrap_or(0))
    }
}
