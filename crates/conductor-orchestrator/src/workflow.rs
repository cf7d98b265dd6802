use chrono::{DateTime, Utc};
use conductor_core::{Capability, ConductorError, ConductorResult, Priority};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

fn default_enabled() -> bool {
    true
}

fn default_method() -> String {
    "POST".to_string()
}

/// Per-type step parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// Hand a goal to an agent through the task executor.
    AgentTask {
        /// Goal text.
        goal: String,
        /// Capability; `general` when omitted.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        capability: Option<Capability>,
        /// Explicit agent id; routed when omitted.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
        /// Task priority.
        #[serde(default)]
        priority: Priority,
    },
    /// Run an allow-listed program, without a shell.
    Command {
        /// Program name or path.
        program: String,
        /// Arguments.
        #[serde(default)]
        args: Vec<String>,
    },
    /// Call an HTTP endpoint.
    ApiCall {
        /// HTTP method.
        #[serde(default = "default_method")]
        method: String,
        /// Target URL.
        url: String,
        /// JSON body.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<serde_json::Value>,
    },
    /// Run another registered workflow.
    Subworkflow {
        /// Workflow to run.
        workflow_id: String,
    },
    /// Wait for an operator approval.
    Manual {
        /// Shown to the operator.
        #[serde(default)]
        instructions: String,
    },
}

/// Discriminant of [`StepKind`], used to look up handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKindTag {
    /// [`StepKind::AgentTask`].
    AgentTask,
    /// [`StepKind::Command`].
    Command,
    /// [`StepKind::ApiCall`].
    ApiCall,
    /// [`StepKind::Subworkflow`].
    Subworkflow,
    /// [`StepKind::Manual`].
    Manual,
}

impl StepKind {
    /// The discriminant.
    pub fn tag(&self) -> StepKindTag {
        match self {
            StepKind::AgentTask { .. } => StepKindTag::AgentTask,
            StepKind::Command { .. } => StepKindTag::Command,
            StepKind::ApiCall { .. } => StepKindTag::ApiCall,
            StepKind::Subworkflow { .. } => StepKindTag::Subworkflow,
            StepKind::Manual { .. } => StepKindTag::Manual,
        }
    }
}

/// One step of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Unique within the workflow.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Type and parameters.
    #[serde(flatten)]
    pub kind: StepKind,
    /// Steps that must complete first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Per-attempt limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Extra attempts after a failure.
    #[serde(default)]
    pub retries: u32,
}

impl WorkflowStep {
    /// Creates a step without dependencies.
    pub fn new(id: impl Into<String>, kind: StepKind) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
            depends_on: Vec::new(),
            timeout_ms: None,
            retries: 0,
        }
    }

    /// Shorthand for an auto-routed agent task.
    pub fn agent_task(id: impl Into<String>, goal: impl Into<String>) -> Self {
        Self::new(
            id,
            StepKind::AgentTask {
                goal: goal.into(),
                capability: None,
                agent: None,
                priority: Priority::Normal,
            },
        )
    }

    /// Adds dependencies.
    pub fn after<S: Into<String>>(mut self, deps: impl IntoIterator<Item = S>) -> Self {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Sets the per-attempt timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Sets the retry count.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
}

/// A declarative, dependency-ordered set of steps. Read-only once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
    /// Steps in declaration order.
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
    /// Disabled workflows refuse to execute.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl WorkflowDefinition {
    /// Creates an enabled workflow.
    pub fn new(id: impl Into<String>, name: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            steps,
            enabled: true,
            tags: Vec::new(),
        }
    }

    /// Shape checks done at registration: id present, step ids unique and non-empty.
    ///
    /// Dependency references and cycles are checked when an execution is planned.
    pub fn validate(&self) -> ConductorResult<()> {
        if self.id.trim().is_empty() {
            return Err(ConductorError::Validation("workflow id must not be empty".into()));
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.id.trim().is_empty() {
                return Err(ConductorError::Validation(format!(
                    "workflow '{}' has a step without id",
                    self.id
                )));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(ConductorError::Validation(format!(
                    "workflow '{}' declares step '{}' twice",
                    self.id, step.id
                )));
            }
        }
        Ok(())
    }

    /// Looks up a step.
    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }
}

/// Lifecycle of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Created, not started.
    Pending,
    /// Steps are being dispatched.
    Running,
    /// Every step succeeded.
    Completed,
    /// At least one step failed, or the workflow could not be planned.
    Failed,
    /// Stopped before finishing.
    Cancelled,
}

impl ExecutionStatus {
    /// Whether the execution can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

/// Record of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// Unique identifier for this execution.
    pub id: Uuid,
    /// Workflow that ran.
    pub workflow_id: String,
    /// Lifecycle state.
    pub status: ExecutionStatus,
    /// Caller-supplied input.
    #[serde(default)]
    pub input: serde_json::Value,
    /// UTC timestamp of when the execution started.
    pub started_at: DateTime<Utc>,
    /// UTC timestamp of when the execution reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock duration once terminal.
    pub duration_ms: Option<u64>,
    /// Steps that reached success or error.
    pub steps_completed: usize,
    /// Steps in the workflow.
    pub steps_total: usize,
    /// Output by step id.
    pub results: BTreeMap<String, serde_json::Value>,
    /// Error message by step id.
    pub errors: BTreeMap<String, String>,
    /// Steps never attempted because a dependency failed.
    #[serde(default)]
    pub skipped: Vec<String>,
    /// Execution-level failure (cycle, bad dependency).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Execution that started this one as a subworkflow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_execution_id: Option<Uuid>,
}

impl WorkflowExecution {
    /// Creates a running execution record.
    pub fn start(
        workflow: &WorkflowDefinition,
        input: serde_json::Value,
        parent_execution_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id: workflow.id.clone(),
            status: ExecutionStatus::Running,
            input,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            steps_completed: 0,
            steps_total: workflow.steps.len(),
            results: BTreeMap::new(),
            errors: BTreeMap::new(),
            skipped: Vec::new(),
            error: None,
            parent_execution_id,
        }
    }

    /// Moves to a terminal status and stamps completion time.
    pub fn finish(&mut self, status: ExecutionStatus) {
        let now = Utc::now();
        self.status = status;
        self.completed_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds().max(0) as u64);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_step_deserialize_flattened_kind() {
        let step: WorkflowStep = serde_json::from_value(serde_json::json!({
            "id": "fetch",
            "type": "api_call",
            "url": "https://example.com/prices",
            "depends_on": ["auth"],
            "timeout_ms": 5000,
            "retries": 2
        }))
        .unwrap();
        assert_eq!(step.kind.tag(), StepKindTag::ApiCall);
        assert_eq!(
            step.kind,
            StepKind::ApiCall {
                method: "POST".into(),
                url: "https://example.com/prices".into(),
                body: None
            }
        );
        assert_eq!(step.depends_on, vec!["auth"]);
        assert_eq!(step.retries, 2);
    }

    #[test]
    fn test_workflow_from_json() {
        let wf: WorkflowDefinition = serde_json::from_str(
            r#"{
                "id": "daily-content",
                "name": "Daily content",
                "tags": ["content"],
                "steps": [
                    {"id": "research", "type": "agent_task", "goal": "find trending topics", "capability": "analysis"},
                    {"id": "write", "type": "agent_task", "goal": "write a post", "depends_on": ["research"]},
                    {"id": "publish", "type": "manual", "depends_on": ["write"]}
                ]
            }"#,
        )
        .unwrap();
        assert!(wf.enabled);
        assert_eq!(wf.steps.len(), 3);
        assert_eq!(wf.step("publish").unwrap().kind.tag(), StepKindTag::Manual);
        wf.validate().unwrap();
    }

    #[test]
    fn test_validate_duplicate_step() {
        let wf = WorkflowDefinition::new(
            "wf",
            "WF",
            vec![WorkflowStep::agent_task("a", "x"), WorkflowStep::agent_task("a", "y")],
        );
        assert!(matches!(wf.validate(), Err(ConductorError::Validation(_))));
    }

    #[test]
    fn test_execution_finish() {
        let wf = WorkflowDefinition::new("wf", "WF", vec![WorkflowStep::agent_task("a", "x")]);
        let mut exec = WorkflowExecution::start(&wf, serde_json::json!({}), None);
        assert_eq!(exec.status, ExecutionStatus::Running);
        assert_eq!(exec.steps_total, 1);
        exec.finish(ExecutionStatus::Completed);
        assert!(exec.status.is_terminal());
        assert!(exec.completed_at.is_some());
        assert!(exec.duration_ms.is_some());
    }
}
