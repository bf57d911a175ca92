//! Wire frame definition
//!
//! One JSON object per WebSocket text message:
//!
//! ```text
//! { id, type, content, role, timestamp, is_stream?, is_end?, is_thinking? }
//! ```
//!
//! Streamed assistant output shares one `id` across all of its frames; the
//! last one carries `is_end: true` and the full concatenated result.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::messages::{MessageId, MessageKind, PONG, Role};
use crate::error::Result;
use crate::generate_message_id;
use crate::store::MessageRecord;

/// A frame exchanged with clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub id: MessageId,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_end: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_thinking: Option<bool>,
}

impl Frame {
    /// Create a non-streamed frame with a fresh id
    pub fn new(kind: MessageKind, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: generate_message_id(),
            kind,
            content: content.into(),
            role,
            timestamp: Utc::now(),
            is_stream: None,
            is_end: None,
            is_thinking: None,
        }
    }

    /// System notice
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageKind::System, Role::System, content)
    }

    /// Error report
    pub fn error(content: impl Into<String>) -> Self {
        Self::new(MessageKind::Error, Role::System, content)
    }

    /// Heartbeat reply
    pub fn pong() -> Self {
        Self::system(PONG)
    }

    /// One frame of a streamed assistant response
    pub fn stream(
        response_id: &str,
        content: impl Into<String>,
        is_end: bool,
        is_thinking: bool,
    ) -> Self {
        Self {
            id: response_id.to_string(),
            kind: MessageKind::Response,
            content: content.into(),
            role: Role::Assistant,
            timestamp: Utc::now(),
            is_stream: Some(true),
            is_end: Some(is_end),
            is_thinking: Some(is_thinking),
        }
    }

    pub fn is_end(&self) -> bool {
        self.is_end.unwrap_or(false)
    }

    pub fn is_thinking(&self) -> bool {
        self.is_thinking.unwrap_or(false)
    }

    /// Serialize once for fan-out
    pub fn encode(&self) -> Result<Arc<str>> {
        Ok(Arc::from(serde_json::to_string(self)?))
    }

    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

impl From<&MessageRecord> for Frame {
    fn from(record: &MessageRecord) -> Self {
        Self {
            id: record.id.clone(),
            kind: record.kind,
            content: record.content.clone(),
            role: record.role,
            timestamp: record.timestamp,
            is_stream: None,
            is_end: None,
            is_thinking: None,
        }
    }
}
