//! Protocol layer for the chat relay
//!
//! This module provides:
//! - Wire frame definition and constructors
//! - Message vocabulary and client frame classification
//! - Producer chunk decoding and response assembly

pub mod codec;
pub mod frame;
pub mod messages;

// Re-export commonly used types
pub use codec::{ChunkKind, ProducerChunk, StreamAssembler};
pub use frame::Frame;
pub use messages::*;
