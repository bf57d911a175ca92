//! Multi-room WebSocket chat relay
//!
//! This library provides a chat relay where every room is bound to an agent.
//! Messages posted in a room are persisted, broadcast to every live
//! connection of the room, and answered by the agent through a bounded worker
//! pool whose output is streamed back to the whole room chunk by chunk.

pub mod agents;
pub mod error;
pub mod protocol;
pub mod server;
pub mod store;
pub mod transport;

pub use agents::{AgentInfo, AgentRegistry, ResponseProducer, RoomContext};
pub use error::{ChatError, Result};
pub use server::{ConnectionRegistry, RelayServer, SessionHandler, WorkerPool};
pub use store::{MessageStore, open_store};

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use uuid::Uuid;

/// Generate a unique message ID
pub fn generate_message_id() -> String {
    Uuid::new_v4().to_string()
}

/// Relay configuration
#[derive(Parser, Clone, Debug, Deserialize)]
#[command(name = "agora-relay", version, about = "Multi-room chat relay")]
#[serde(default)]
pub struct RelayConfig {
    /// Address the HTTP and WebSocket server listens on
    #[arg(long, env = "AGORA_BIND", default_value = "127.0.0.1:5000")]
    pub bind_addr: SocketAddr,

    /// `sqlite://path`, a plain file path, or unset for an in-memory store
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Maximum number of concurrently running response tasks
    #[arg(long, env = "AGORA_MAX_WORKERS", default_value_t = 10)]
    pub max_workers: usize,

    /// Bound on the shutdown drain in seconds; unset waits for every task
    #[arg(long, env = "AGORA_SHUTDOWN_TIMEOUT_SECS")]
    pub shutdown_timeout_secs: Option<u64>,

    /// How long a closing session waits for its responses, in milliseconds
    #[arg(long, env = "AGORA_SESSION_GRACE_MS", default_value_t = 1000)]
    pub session_grace_ms: u64,

    /// Bounded wait of the response forwarder on its pipe, in milliseconds
    #[arg(long, env = "AGORA_STREAM_POLL_MS", default_value_t = 50)]
    pub stream_poll_ms: u64,

    /// Pause of the weather agent before it answers, in milliseconds
    #[arg(long, env = "AGORA_WEATHER_DELAY_MS", default_value_t = 1000)]
    pub weather_delay_ms: u64,

    /// Log filter used when `RUST_LOG` is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            database_url: None,
            max_workers: 10,
            shutdown_timeout_secs: None,
            session_grace_ms: 1000,
            stream_poll_ms: 50,
            weather_delay_ms: 1000,
            log_level: "info".to_string(),
        }
    }
}

impl RelayConfig {
    /// Reject settings the relay cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_workers < 1 {
            return Err(ChatError::config("max_workers must be at least 1"));
        }
        if self.stream_poll_ms == 0 {
            return Err(ChatError::config("stream_poll_ms must be positive"));
        }
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Option<Duration> {
        self.shutdown_timeout_secs.map(Duration::from_secs)
    }

    pub fn session_grace(&self) -> Duration {
        Duration::from_millis(self.session_grace_ms)
    }

    pub fn stream_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stream_poll_ms)
    }

    pub fn weather_delay(&self) -> Duration {
        Duration::from_millis(self.weather_delay_ms)
    }
}
