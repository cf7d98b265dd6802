use super::AgentBackend;
use async_trait::async_trait;
use conductor_core::{ConductorResult, Task};

/// Returns the task it was given, tagged with the agent id.
pub struct EchoBackend {
    agent_id: String,
}

impl EchoBackend {
    /// Creates an echo backend for `agent_id`.
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
        }
    }
}

#[async_trait]
impl AgentBackend for EchoBackend {
    async fn invoke(&self, task: &Task) -> ConductorResult<serde_json::Value> {
        Ok(serde_json::json!({
            "agent": self.agent_id,
            "goal": task.goal,
            "type": task.capability,
            "input": task.input,
        }))
    }
}
