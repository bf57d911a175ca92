//! SQLite message store
//!
//! A single connection behind a mutex. Every call runs on the blocking pool so
//! the async runtime never waits on disk I/O.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use super::{MessageRecord, MessageStore, RoomRecord};
use crate::error::{ChatError, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS chat_rooms (
    id          TEXT PRIMARY KEY,
    agent_type  TEXT NOT NULL,
    agent_id    TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS chat_messages (
    id          TEXT PRIMARY KEY,
    room_id     TEXT NOT NULL,
    type        TEXT NOT NULL,
    content     TEXT NOT NULL,
    role        TEXT NOT NULL,
    timestamp   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chat_messages_room ON chat_messages(room_id, timestamp);
";

/// SQLite-backed store
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "opened sqlite store");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await?
    }
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

fn room_exists(conn: &Connection, room_id: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM chat_rooms WHERE id = ?1",
            params![room_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn create_room(&self, room: RoomRecord) -> Result<RoomRecord> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO chat_rooms (id, agent_type, agent_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![room.id, room.agent_type, room.agent_id, format_ts(&room.created_at)],
            )?;
            Ok(room)
        })
        .await
    }

    async fn get_room(&self, room_id: &str) -> Result<Option<RoomRecord>> {
        let room_id = room_id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, agent_type, agent_id, created_at FROM chat_rooms WHERE id = ?1",
                    params![room_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()?;

            row.map(|(id, agent_type, agent_id, created_at)| {
                Ok(RoomRecord {
                    id,
                    agent_type,
                    agent_id,
                    created_at: parse_ts(&created_at)?,
                })
            })
            .transpose()
        })
        .await
    }

    async fn delete_room(&self, room_id: &str) -> Result<bool> {
        let room_id = room_id.to_string();
        self.with_conn(move |conn| {
            let deleted = conn.execute("DELETE FROM chat_rooms WHERE id = ?1", params![room_id])?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn create_message(&self, message: MessageRecord) -> Result<MessageRecord> {
        self.with_conn(move |conn| {
            if !room_exists(conn, &message.room_id)? {
                return Err(ChatError::room_not_found(message.room_id));
            }
            conn.execute(
                "INSERT INTO chat_messages (id, room_id, type, content, role, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    message.id,
                    message.room_id,
                    message.kind.as_str(),
                    message.content,
                    message.role.as_str(),
                    format_ts(&message.timestamp),
                ],
            )?;
            Ok(message)
        })
        .await
    }

    async fn list_messages(&self, room_id: &str) -> Result<Vec<MessageRecord>> {
        let room_id = room_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, room_id, type, content, role, timestamp FROM chat_messages
                 WHERE room_id = ?1 ORDER BY timestamp ASC, rowid ASC",
            )?;
            let rows = stmt
                .query_map(params![room_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            rows.into_iter()
                .map(|(id, room_id, kind, content, role, timestamp)| {
                    Ok(MessageRecord {
                        id,
                        room_id,
                        kind: kind.parse()?,
                        content,
                        role: role.parse()?,
                        timestamp: parse_ts(&timestamp)?,
                    })
                })
                .collect()
        })
        .await
    }

    async fn delete_messages(&self, room_id: &str) -> Result<usize> {
        let room_id = room_id.to_string();
        self.with_conn(move |conn| {
            Ok(conn.execute("DELETE FROM chat_messages WHERE room_id = ?1", params![room_id])?)
        })
        .await
    }
}
