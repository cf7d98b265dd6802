use crate::error::{ConductorError, ConductorResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Capability kinds an agent can declare and a task can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Reasoning over data, markets, reports.
    Analysis,
    /// Writing, reviewing or debugging code.
    Coding,
    /// Copywriting, articles, social posts.
    Content,
    /// Workflow and process automation.
    Automation,
    /// Pricing, forecasting, budgeting.
    Financial,
    /// Data processing and transformation.
    Data,
    /// Catch-all capability of the default agent.
    General,
}

impl Capability {
    /// Every capability, in declaration order.
    pub const ALL: [Capability; 7] = [
        Capability::Analysis,
        Capability::Coding,
        Capability::Content,
        Capability::Automation,
        Capability::Financial,
        Capability::Data,
        Capability::General,
    ];

    /// Lowercase tag, identical to the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Analysis => "analysis",
            Capability::Coding => "coding",
            Capability::Content => "content",
            Capability::Automation => "automation",
            Capability::Financial => "financial",
            Capability::Data => "data",
            Capability::General => "general",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = ConductorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        Capability::ALL
            .into_iter()
            .find(|c| c.as_str() == lower)
            .ok_or_else(|| ConductorError::Validation(format!("unknown capability '{s}'")))
    }
}

/// Task priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background work.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// Operator-facing or time-sensitive work.
    High,
}

/// A single unit of work with a goal, a required capability and a priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Free-text description of what should be achieved.
    pub goal: String,
    /// Capability the task calls for.
    #[serde(rename = "type")]
    pub capability: Capability,
    /// Scheduling priority.
    #[serde(default)]
    pub priority: Priority,
    /// Optional structured input handed to the agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    /// UTC timestamp of when the task was created.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Creates a normal-priority task without input.
    pub fn new(goal: impl Into<String>, capability: Capability) -> Self {
        Self {
            id: Uuid::new_v4(),
            goal: goal.into(),
            capability,
            priority: Priority::Normal,
            input: None,
            created_at: Utc::now(),
        }
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Attaches a structured input payload.
    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = Some(input);
        self
    }

    /// Rejects tasks that no agent could meaningfully act on.
    pub fn validate(&self) -> ConductorResult<()> {
        if self.goal.trim().is_empty() {
            return Err(ConductorError::Validation(format!(
                "task {} has an empty goal",
                self.id
            )));
        }
        Ok(())
    }
}

/// Outcome of routing one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Id of the selected agent.
    pub agent_id: String,
    /// Match confidence in `[0, 1]`.
    pub confidence: f64,
    /// Human-readable justification.
    pub reasoning: String,
}

/// Terminal status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    /// The agent produced usable output.
    Success,
    /// All attempts failed.
    Error,
}

/// Bookkeeping attached to every [`TaskResult`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMetadata {
    /// Agent that produced the final outcome, if one was selected.
    pub agent_id: Option<String>,
    /// Wall-clock time across all attempts.
    pub duration_ms: u64,
    /// Attempts beyond the first.
    pub retries: u32,
    /// Total attempts, including attempts against fallback agents.
    pub attempts: u32,
    /// Routing decision when the agent was auto-selected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<RoutingDecision>,
}

/// Terminal result envelope for one task. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// The task this result belongs to.
    pub task_id: Uuid,
    /// Success or error.
    pub status: ResultStatus,
    /// Agent output on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// Last error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Agent, timing and retry bookkeeping.
    pub metadata: TaskMetadata,
}

impl TaskResult {
    /// Creates a successful result.
    pub fn success(task_id: Uuid, output: serde_json::Value, metadata: TaskMetadata) -> Self {
        Self {
            task_id,
            status: ResultStatus::Success,
            output: Some(output),
            error: None,
            metadata,
        }
    }

    /// Creates a failed result carrying the last error message.
    pub fn failure(task_id: Uuid, error: impl Into<String>, metadata: TaskMetadata) -> Self {
        Self {
            task_id,
            status: ResultStatus::Error,
            output: None,
            error: Some(error.into()),
            metadata,
        }
    }

    /// Returns `true` when the status is [`ResultStatus::Success`].
    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }
}

/// Outcome recorded in a [`PerformanceMetric`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricOutcome {
    /// The task succeeded on this agent.
    Success,
    /// The task failed on this agent.
    Error,
}

/// One timing sample per agent per executed task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetric {
    /// Unique identifier for this sample.
    pub id: Uuid,
    /// Agent the sample belongs to.
    pub agent_id: String,
    /// Task that was executed.
    pub task_id: Uuid,
    /// Time spent on this agent, across its attempts.
    pub duration_ms: u64,
    /// Attempts made against this agent.
    pub attempts: u32,
    /// Final outcome on this agent.
    pub outcome: MetricOutcome,
    /// UTC timestamp of when the sample was taken.
    pub recorded_at: DateTime<Utc>,
}

impl PerformanceMetric {
    /// Creates a sample stamped with the current time.
    pub fn new(
        agent_id: impl Into<String>,
        task_id: Uuid,
        duration_ms: u64,
        attempts: u32,
        outcome: MetricOutcome,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id: agent_id.into(),
            task_id,
            duration_ms,
            attempts,
            outcome,
            recorded_at: Utc::now(),
        }
    }
}
