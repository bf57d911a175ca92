//! Response producers
//!
//! Each room is bound to one agent type. The session handler looks the
//! producer up by that type and streams its reply chunks to the room; what the
//! agent actually says is entirely up to the producer.

pub mod hello;
pub mod repeater;
pub mod weather;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ChatError, Result};
use crate::protocol::{ChunkKind, ProducerChunk, RoomId};

pub use hello::HelloAgent;
pub use repeater::RepeaterAgent;
pub use weather::WeatherAgent;

/// Public description of an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub agent_type: String,
    pub description: String,
    pub capabilities: Vec<String>,
}

impl AgentInfo {
    pub fn new(
        agent_type: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        capabilities: &[&str],
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            agent_type: agent_type.into(),
            description: description.into(),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

/// What a producer knows about the room it answers in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomContext {
    pub room_id: RoomId,
    pub agent_id: String,
}

/// Turns user text into a reply
#[async_trait]
pub trait ResponseProducer: Send + Sync + 'static {
    fn info(&self) -> &AgentInfo;

    /// Complete reply in one piece
    async fn generate(&self, ctx: &RoomContext, text: &str) -> Result<String>;

    /// Reply as a finite sequence of raw chunks.
    ///
    /// Chunks are normally encoded [`ProducerChunk`]s; any other string is
    /// treated as plain answer text. The default wraps [`generate`] in a
    /// single `result` chunk.
    ///
    /// [`generate`]: ResponseProducer::generate
    fn generate_stream(
        self: Arc<Self>,
        ctx: RoomContext,
        text: String,
    ) -> BoxStream<'static, Result<String>> {
        futures::stream::once(async move {
            let reply = self.generate(&ctx, &text).await?;
            Ok(ProducerChunk::new(ChunkKind::Result, reply).encode())
        })
        .boxed()
    }
}

/// Producers keyed by agent type
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn ResponseProducer>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry seeded with the built-in agents
    pub fn with_builtin(weather_delay: Duration) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(RepeaterAgent::new()));
        registry.register(Arc::new(WeatherAgent::new().with_delay(weather_delay)));
        registry.register(Arc::new(HelloAgent::new()));
        registry
    }

    /// Register a producer under its agent type.
    ///
    /// Returns `false` and keeps the existing entry if the type is taken.
    pub fn register(&mut self, producer: Arc<dyn ResponseProducer>) -> bool {
        let agent_type = producer.info().agent_type.clone();
        if self.agents.contains_key(&agent_type) {
            debug!(agent_type = %agent_type, "agent already registered");
            return false;
        }
        debug!(agent_type = %agent_type, agent_id = %producer.info().id, "agent registered");
        self.agents.insert(agent_type, producer);
        true
    }

    /// All agents, sorted by type
    pub fn list(&self) -> Vec<AgentInfo> {
        let mut infos: Vec<_> = self.agents.values().map(|a| a.info().clone()).collect();
        infos.sort_by(|a, b| a.agent_type.cmp(&b.agent_type));
        infos
    }

    pub fn get(&self, agent_type: &str) -> Option<&AgentInfo> {
        self.agents.get(agent_type).map(|a| a.info())
    }

    /// Producer for an agent type
    pub fn producer(&self, agent_type: &str) -> Result<Arc<dyn ResponseProducer>> {
        self.agents
            .get(agent_type)
            .cloned()
            .ok_or_else(|| ChatError::agent_not_found(format!("Unknown agent type: {}", agent_type)))
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn ctx() -> RoomContext {
        RoomContext {
            room_id: "room".to_string(),
            agent_id: "agent".to_string(),
        }
    }

    #[test]
    fn test_builtin_agents() {
        let registry = AgentRegistry::with_builtin(Duration::ZERO);
        let types: Vec<_> = registry.list().into_iter().map(|a| a.agent_type).collect();
        assert_eq!(types, vec!["hello", "repeater", "weather"]);
        assert!(registry.get("weather").unwrap().has_capability("stream"));
        assert!(matches!(
            registry.producer("oracle"),
            Err(ChatError::AgentNotFound(_))
        ));
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = AgentRegistry::new();
        assert!(registry.register(Arc::new(RepeaterAgent::new())));
        let first_id = registry.get("repeater").unwrap().id.clone();

        assert!(!registry.register(Arc::new(RepeaterAgent::new())));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("repeater").unwrap().id, first_id);
    }

    #[test]
    fn test_agent_info_serializes_type() {
        let info = AgentInfo::new("repeater", "Repeater", "echo", &["repeat"]);
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["type"], "repeater");
        assert_eq!(json["capabilities"][0], "repeat");
    }

    #[tokio::test]
    async fn test_default_stream_wraps_generate() {
        let producer: Arc<dyn ResponseProducer> = Arc::new(RepeaterAgent::new());
        let chunks: Vec<String> = producer
            .generate_stream(ctx(), "echo me".to_string())
            .try_collect()
            .await
            .unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(
            ProducerChunk::parse(&chunks[0]),
            ProducerChunk::new(ChunkKind::Result, "echo me")
        );
    }
}
