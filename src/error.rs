//! Error handling for the chat relay

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, ChatError>;

/// Relay error types
#[derive(Debug, Clone, Error)]
pub enum ChatError {
    /// Malformed frame or missing required field
    #[error("Protocol error: {0}")]
    Protocol(String),
    /// Room does not exist in the store
    #[error("Room not found: {0}")]
    RoomNotFound(String),
    /// No producer registered for an agent type
    #[error("Agent not found: {0}")]
    AgentNotFound(String),
    /// Worker pool is saturated or shutting down
    #[error("Capacity saturated: {0}")]
    CapacitySaturated(String),
    /// Response producer failed while generating a reply
    #[error("Producer failure: {0}")]
    Producer(String),
    /// Sending to or closing a connection failed
    #[error("Transport failure: {0}")]
    Transport(String),
    /// Message store failure
    #[error("Storage error: {0}")]
    Storage(String),
    /// JSON encoding/decoding failure
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
    /// Operation timed out
    #[error("Timeout: {0}")]
    Timeout(String),
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// Get error code for this error type
    pub fn code(&self) -> u32 {
        match self {
            ChatError::Protocol(_) => 1000,
            ChatError::RoomNotFound(_) => 1001,
            ChatError::AgentNotFound(_) => 1002,
            ChatError::CapacitySaturated(_) => 1003,
            ChatError::Producer(_) => 1004,
            ChatError::Transport(_) => 1005,
            ChatError::Storage(_) => 1006,
            ChatError::Serialization(_) => 1007,
            ChatError::Config(_) => 1008,
            ChatError::Timeout(_) => 1009,
            ChatError::Internal(_) => 1010,
        }
    }

    /// Get human-readable error message
    pub fn message(&self) -> &str {
        match self {
            ChatError::Protocol(msg)
            | ChatError::RoomNotFound(msg)
            | ChatError::AgentNotFound(msg)
            | ChatError::CapacitySaturated(msg)
            | ChatError::Producer(msg)
            | ChatError::Transport(msg)
            | ChatError::Storage(msg)
            | ChatError::Serialization(msg)
            | ChatError::Config(msg)
            | ChatError::Timeout(msg)
            | ChatError::Internal(msg) => msg,
        }
    }

    /// Create a protocol error
    pub fn protocol<T: Into<String>>(msg: T) -> Self {
        ChatError::Protocol(msg.into())
    }

    /// Create a room not found error
    pub fn room_not_found<T: Into<String>>(msg: T) -> Self {
        ChatError::RoomNotFound(msg.into())
    }

    /// Create an agent not found error
    pub fn agent_not_found<T: Into<String>>(msg: T) -> Self {
        ChatError::AgentNotFound(msg.into())
    }

    /// Create a capacity error
    pub fn capacity<T: Into<String>>(msg: T) -> Self {
        ChatError::CapacitySaturated(msg.into())
    }

    /// Create a producer error
    pub fn producer<T: Into<String>>(msg: T) -> Self {
        ChatError::Producer(msg.into())
    }

    /// Create a transport error
    pub fn transport<T: Into<String>>(msg: T) -> Self {
        ChatError::Transport(msg.into())
    }

    /// Create a storage error
    pub fn storage<T: Into<String>>(msg: T) -> Self {
        ChatError::Storage(msg.into())
    }

    /// Create a configuration error
    pub fn config<T: Into<String>>(msg: T) -> Self {
        ChatError::Config(msg.into())
    }

    /// Create a timeout error
    pub fn timeout<T: Into<String>>(msg: T) -> Self {
        ChatError::Timeout(msg.into())
    }

    /// Create an internal error
    pub fn internal<T: Into<String>>(msg: T) -> Self {
        ChatError::Internal(msg.into())
    }

    /// HTTP status used when this error reaches the admin API
    pub fn status_code(&self) -> StatusCode {
        match self {
            ChatError::Protocol(_) | ChatError::AgentNotFound(_) | ChatError::Config(_) => {
                StatusCode::BAD_REQUEST
            }
            ChatError::RoomNotFound(_) => StatusCode::NOT_FOUND,
            ChatError::CapacitySaturated(_) => StatusCode::SERVICE_UNAVAILABLE,
            ChatError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message(),
            "code": self.code(),
        }));
        (self.status_code(), body).into_response()
    }
}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        ChatError::Transport(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Serialization(format!("JSON error: {}", err))
    }
}

impl From<rusqlite::Error> for ChatError {
    fn from(err: rusqlite::Error) -> Self {
        ChatError::Storage(format!("SQLite error: {}", err))
    }
}

impl From<tokio::task::JoinError> for ChatError {
    fn from(err: tokio::task::JoinError) -> Self {
        ChatError::Internal(format!("Task join error: {}", err))
    }
}

impl From<chrono::ParseError> for ChatError {
    fn from(err: chrono::ParseError) -> Self {
        ChatError::Storage(format!("Timestamp parse error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_and_messages() {
        let err = ChatError::room_not_found("abc");
        assert_eq!(err.code(), 1001);
        assert_eq!(err.message(), "abc");
        assert_eq!(err.to_string(), "Room not found: abc");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_capacity_maps_to_unavailable() {
        let err = ChatError::capacity("pool closed");
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_json_error_conversion() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: ChatError = parse.unwrap_err().into();
        assert!(matches!(err, ChatError::Serialization(_)));
    }
}
