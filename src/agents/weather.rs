//! Streaming weather agent
//!
//! Opens with a short remark, reports that it is looking things up, pauses,
//! then answers. Only the last chunk is part of the final reply.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use super::{AgentInfo, ResponseProducer, RoomContext};
use crate::error::Result;
use crate::protocol::{ChunkKind, ProducerChunk};

pub const INTRO: &str = "Checking the weather: ";
pub const LOOKUP: &str = "Looking up the forecast...";

pub struct WeatherAgent {
    info: AgentInfo,
    delay: Duration,
}

impl WeatherAgent {
    pub fn new() -> Self {
        Self {
            info: AgentInfo::new(
                "weather",
                "Weather",
                "I look up weather information",
                &["weather", "stream"],
            ),
            delay: Duration::from_secs(1),
        }
    }

    /// Pause between the thinking chunk and the answer
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Default for WeatherAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResponseProducer for WeatherAgent {
    fn info(&self) -> &AgentInfo {
        &self.info
    }

    async fn generate(&self, _ctx: &RoomContext, text: &str) -> Result<String> {
        Ok(text.to_string())
    }

    fn generate_stream(
        self: Arc<Self>,
        _ctx: RoomContext,
        text: String,
    ) -> BoxStream<'static, Result<String>> {
        let delay = self.delay;
        Box::pin(async_stream::stream! {
            yield Ok(ProducerChunk::new(ChunkKind::Start, INTRO).encode());
            yield Ok(ProducerChunk::new(ChunkKind::Thinking, LOOKUP).encode());
            tokio::time::sleep(delay).await;
            yield Ok(ProducerChunk::new(ChunkKind::Result, text).encode());
        })
    }
}
