//! Live connection registry for the chat relay
//!
//! This module tracks which connections are currently attached to which room
//! and fans frames out to them. Room *records* live in the message store; the
//! registry only knows room ids that have at least one live connection.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::Result;
use crate::protocol::{ConnectionId, Frame, RoomId};
use crate::transport::Connection;

/// Outcome of one broadcast pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections the frame was queued on
    pub delivered: usize,
    /// Connections whose send failed and that were removed
    pub failed: usize,
}

#[derive(Default)]
struct RegistryState {
    /// Room id -> live connections in that room
    rooms: HashMap<RoomId, HashMap<ConnectionId, Arc<dyn Connection>>>,
    /// Reverse index: connection id -> its room
    by_conn: HashMap<ConnectionId, RoomId>,
}

impl RegistryState {
    /// Detach a connection, dropping its room entry when it becomes empty
    fn detach(&mut self, room_id: &str, conn_id: &str) -> Option<Arc<dyn Connection>> {
        let members = self.rooms.get_mut(room_id)?;
        let removed = members.remove(conn_id);
        if members.is_empty() {
            self.rooms.remove(room_id);
        }
        if removed.is_some() {
            self.by_conn.remove(conn_id);
        }
        removed
    }
}

/// Room id -> live connections, shared by sessions and forwarding tasks
#[derive(Default)]
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under a room.
    ///
    /// Adding the same pair twice is a no-op. A connection already attached to
    /// another room is moved, so it is never listed under two rooms.
    pub async fn add(&self, room_id: &str, conn: Arc<dyn Connection>) {
        let conn_id = conn.id().to_string();
        let mut state = self.state.write().await;

        if let Some(previous) = state.by_conn.get(&conn_id).cloned() {
            if previous == room_id {
                return;
            }
            state.detach(&previous, &conn_id);
            debug!(conn_id = %conn_id, from = %previous, to = %room_id, "moving connection");
        }

        state
            .rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(conn_id.clone(), conn);
        state.by_conn.insert(conn_id.clone(), room_id.to_string());
        debug!(room_id = %room_id, conn_id = %conn_id, "connection registered");
    }

    /// Remove a connection from a specific room. Returns whether it was there.
    pub async fn remove(&self, room_id: &str, conn_id: &str) -> bool {
        let removed = self.state.write().await.detach(room_id, conn_id).is_some();
        if removed {
            debug!(room_id = %room_id, conn_id = %conn_id, "connection removed");
        }
        removed
    }

    /// Remove a connection from whichever room holds it
    pub async fn remove_connection(&self, conn_id: &str) -> Option<RoomId> {
        let mut state = self.state.write().await;
        let room_id = state.by_conn.get(conn_id).cloned()?;
        state.detach(&room_id, conn_id);
        debug!(room_id = %room_id, conn_id = %conn_id, "connection removed");
        Some(room_id)
    }

    /// Send a frame to every connection in a room.
    ///
    /// The frame is encoded once. Sends happen on a snapshot taken under the
    /// read lock; connections that fail are removed afterwards and never abort
    /// delivery to the rest of the room.
    pub async fn broadcast(&self, room_id: &str, frame: &Frame) -> Result<BroadcastReport> {
        let text = frame.encode()?;
        let members = self.snapshot(room_id).await;

        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();
        for conn in &members {
            match conn.send(Arc::clone(&text)) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    debug!(room_id = %room_id, conn_id = %conn.id(), error = %e, "broadcast send failed");
                    failed.push(conn.id().to_string());
                }
            }
        }

        if !failed.is_empty() {
            let mut state = self.state.write().await;
            for conn_id in &failed {
                if state.detach(room_id, conn_id).is_some() {
                    report.failed += 1;
                }
            }
            warn!(room_id = %room_id, failed = report.failed, "dropped unreachable connections");
        }

        Ok(report)
    }

    /// Close every connection in a room and forget them.
    ///
    /// Returns the number of connections closed.
    pub async fn close_room(&self, room_id: &str) -> usize {
        let members = {
            let mut state = self.state.write().await;
            let Some(members) = state.rooms.remove(room_id) else {
                return 0;
            };
            for conn_id in members.keys() {
                state.by_conn.remove(conn_id);
            }
            members
        };

        for conn in members.values() {
            conn.close();
        }
        debug!(room_id = %room_id, closed = members.len(), "room closed");
        members.len()
    }

    /// Connections currently in a room
    pub async fn snapshot(&self, room_id: &str) -> Vec<Arc<dyn Connection>> {
        self.state
            .read()
            .await
            .rooms
            .get(room_id)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Rooms with at least one live connection
    pub async fn active_rooms(&self) -> Vec<RoomId> {
        self.state.read().await.rooms.keys().cloned().collect()
    }

    pub async fn room_count(&self) -> usize {
        self.state.read().await.rooms.len()
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.by_conn.len()
    }

    /// Room a connection is attached to
    pub async fn room_of(&self, conn_id: &str) -> Option<RoomId> {
        self.state.read().await.by_conn.get(conn_id).cloned()
    }

    pub async fn contains(&self, room_id: &str, conn_id: &str) -> bool {
        self.state
            .read()
            .await
            .rooms
            .get(room_id)
            .is_some_and(|members| members.contains_key(conn_id))
    }
}
