//! Echo agent

use async_trait::async_trait;

use super::{AgentInfo, ResponseProducer, RoomContext};
use crate::error::Result;

/// Repeats whatever the user says
pub struct RepeaterAgent {
    info: AgentInfo,
}

impl RepeaterAgent {
    pub fn new() -> Self {
        Self {
            info: AgentInfo::new(
                "repeater",
                "Repeater",
                "I repeat everything you say",
                &["repeat"],
            ),
        }
    }
}

impl Default for RepeaterAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResponseProducer for RepeaterAgent {
    fn info(&self) -> &AgentInfo {
        &self.info
    }

    async fn generate(&self, _ctx: &RoomContext, text: &str) -> Result<String> {
        Ok(text.to_string())
    }
}
