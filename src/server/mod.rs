//! Chat relay server
//!
//! This module provides:
//! - The live connection registry and room broadcast
//! - The bounded worker pool running response tasks
//! - The per-connection session protocol handler
//! - The HTTP/WebSocket server and its shutdown lifecycle

pub mod connection_handler;
pub mod http;
pub mod relay_server;
pub mod room_manager;
pub mod worker_pool;

pub use connection_handler::{SessionHandler, SessionServices, SessionState};
pub use relay_server::{AppState, RelayServer, build_router};
pub use room_manager::{BroadcastReport, ConnectionRegistry};
pub use worker_pool::{PoolStats, TaskHandle, TaskOutcome, WorkerPool};
