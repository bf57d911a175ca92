//! Greeting agent

use async_trait::async_trait;
use chrono::{Local, Timelike};

use super::{AgentInfo, ResponseProducer, RoomContext};
use crate::error::Result;

/// Part of the day a greeting is chosen for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeOfDay {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=11 => TimeOfDay::Morning,
            12..=17 => TimeOfDay::Afternoon,
            18..=22 => TimeOfDay::Evening,
            _ => TimeOfDay::Night,
        }
    }

    pub fn greeting(&self) -> &'static str {
        match self {
            TimeOfDay::Morning => "Good morning!",
            TimeOfDay::Afternoon => "Good afternoon!",
            TimeOfDay::Evening => "Good evening!",
            TimeOfDay::Night => "Hello!",
        }
    }
}

/// Greets the user, using their message as a name
pub struct HelloAgent {
    info: AgentInfo,
}

impl HelloAgent {
    pub fn new() -> Self {
        Self {
            info: AgentInfo::new(
                "hello",
                "Hello Agent",
                "I greet you according to the time of day",
                &["greeting"],
            ),
        }
    }

    pub fn greet(time: TimeOfDay, name: &str) -> String {
        let name = name.trim();
        if name.is_empty() {
            time.greeting().to_string()
        } else {
            format!("{} {}!", time.greeting(), name)
        }
    }
}

impl Default for HelloAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResponseProducer for HelloAgent {
    fn info(&self) -> &AgentInfo {
        &self.info
    }

    async fn generate(&self, _ctx: &RoomContext, text: &str) -> Result<String> {
        let time = TimeOfDay::from_hour(Local::now().hour());
        Ok(Self::greet(time, text))
    }
}
