//! Message vocabulary shared by the wire protocol and the message store
//!
//! Frames are JSON objects; the enums here are their `type` and `role` fields.
//! Client frames are classified before dispatch so the session loop only ever
//! sees a heartbeat, a chat message, or something it can ignore.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ChatError, Result};

/// Identifier types
pub type RoomId = String;
pub type MessageId = String;
pub type ConnectionId = String;

/// Heartbeat request content
pub const PING: &str = "ping";
/// Heartbeat reply content
pub const PONG: &str = "pong";

/// Frame / message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Chat message written by a user
    Message,
    /// Assistant output, streamed or complete
    Response,
    /// Server notices and heartbeats
    System,
    /// Failure reports
    Error,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Message => "message",
            MessageKind::Response => "response",
            MessageKind::System => "system",
            MessageKind::Error => "error",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "message" => Ok(MessageKind::Message),
            "response" => Ok(MessageKind::Response),
            "system" => Ok(MessageKind::System),
            "error" => Ok(MessageKind::Error),
            other => Err(ChatError::protocol(format!("Unknown message type: {}", other))),
        }
    }
}

/// Author role of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(ChatError::protocol(format!("Unknown role: {}", other))),
        }
    }
}

/// Raw client frame. Clients only need to send `type` and `content`.
#[derive(Debug, Deserialize)]
struct ClientFrame {
    #[serde(rename = "type")]
    kind: Option<String>,
    content: Option<serde_json::Value>,
}

/// A classified client frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// `{type: "system", content: "ping"}`
    Heartbeat,
    /// `{type: "message", content: ...}`
    Chat { content: String },
    /// Well-formed but not something the relay acts on
    Ignored { kind: String },
}

impl Inbound {
    /// Parse and classify one text frame from a client
    pub fn classify(text: &str) -> Result<Self> {
        let frame: ClientFrame = serde_json::from_str(text)
            .map_err(|e| ChatError::protocol(format!("Invalid message format: {}", e)))?;

        let kind = frame
            .kind
            .ok_or_else(|| ChatError::protocol("Missing field: type"))?;

        match kind.as_str() {
            "system" => match frame.content.as_ref().and_then(|c| c.as_str()) {
                Some(PING) => Ok(Inbound::Heartbeat),
                _ => Ok(Inbound::Ignored { kind }),
            },
            "message" => match frame.content {
                Some(serde_json::Value::String(content)) => Ok(Inbound::Chat { content }),
                Some(_) => Err(ChatError::protocol("Field content must be a string")),
                None => Err(ChatError::protocol("Missing field: content")),
            },
            _ => Ok(Inbound::Ignored { kind }),
        }
    }
}
