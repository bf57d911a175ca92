//! Transport layer
//!
//! This module provides:
//! - The `Connection` capability and its WebSocket implementation
//! - The stream pipe used to hand response chunks between tasks

pub mod connection;
pub mod streams;

// Re-export commonly used types
pub use connection::{Connection, WsConnection};
pub use streams::{PipeConsumer, PipeProducer, Pull, StreamPipe};
