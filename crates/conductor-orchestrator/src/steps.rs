use crate::workflow::{StepKind, WorkflowStep};
use async_trait::async_trait;
use conductor_agent::{AgentSelection, TaskExecutor};
use conductor_core::{Capability, ConductorError, ConductorResult, Task};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const MAX_STDOUT: usize = 50_000;
const MAX_STDERR: usize = 10_000;

/// What a step handler sees of the execution it runs in.
#[derive(Debug, Clone)]
pub struct StepContext {
    /// Execution being run.
    pub execution_id: Uuid,
    /// Workflow being run.
    pub workflow_id: String,
    /// Execution input.
    pub input: serde_json::Value,
    /// Outputs of the step's direct dependencies, by step id.
    pub dependencies: BTreeMap<String, serde_json::Value>,
}

impl StepContext {
    /// Input and dependency outputs as one JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "workflow_id": self.workflow_id,
            "execution_id": self.execution_id,
            "input": self.input,
            "dependencies": self.dependencies,
        })
    }
}

/// Runs one kind of workflow step.
///
/// To add a new step kind:
/// 1. Add a variant to [`StepKind`] and [`crate::workflow::StepKindTag`].
/// 2. Implement this trait for it.
/// 3. Register the handler with [`crate::WorkflowEngine::with_handler`].
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Runs a single attempt. Timeouts and retries are applied by the engine.
    async fn run(&self, step: &WorkflowStep, ctx: &StepContext) -> ConductorResult<serde_json::Value>;
}

fn unexpected(step: &WorkflowStep, handler: &str) -> ConductorError {
    ConductorError::Config(format!(
        "step '{}' of type {:?} was dispatched to the {handler} handler",
        step.id,
        step.kind.tag()
    ))
}

// ---------------------------------------------------------------------------
// Agent tasks
// ---------------------------------------------------------------------------

/// Hands the step goal to the task executor.
pub struct AgentTaskHandler {
    executor: Arc<TaskExecutor>,
}

impl AgentTaskHandler {
    /// Creates a handler over `executor`.
    pub fn new(executor: Arc<TaskExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl StepHandler for AgentTaskHandler {
    async fn run(&self, step: &WorkflowStep, ctx: &StepContext) -> ConductorResult<serde_json::Value> {
        let StepKind::AgentTask {
            goal,
            capability,
            agent,
            priority,
        } = &step.kind
        else {
            return Err(unexpected(step, "agent task"));
        };

        let task = Task::new(goal.clone(), capability.unwrap_or(Capability::General))
            .with_priority(*priority)
            .with_input(ctx.to_json());
        let selection = match agent {
            Some(id) => AgentSelection::Explicit(id.clone()),
            None => AgentSelection::Auto,
        };

        let result = self.executor.execute(task, selection).await?;
        if result.is_success() {
            Ok(serde_json::json!({
                "output": result.output,
                "metadata": result.metadata,
            }))
        } else {
            // The executor already spent its retry budget, so the failure is final.
            Err(ConductorError::Execution(
                result
                    .error
                    .unwrap_or_else(|| "agent task failed".to_string()),
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Runs an allow-listed program directly, without a shell.
///
/// The step context is passed to the child as JSON in `CONDUCTOR_CONTEXT`.
/// A non-zero exit status fails the step.
pub struct CommandHandler {
    allowed: Vec<String>,
}

impl CommandHandler {
    /// Only programs named in `allowed` can run.
    pub fn new(allowed: Vec<String>) -> Self {
        Self { allowed }
    }

    fn is_allowed(&self, program: &str) -> bool {
        self.allowed.iter().any(|p| p == program)
    }
}

#[async_trait]
impl StepHandler for CommandHandler {
    async fn run(&self, step: &WorkflowStep, ctx: &StepContext) -> ConductorResult<serde_json::Value> {
        let StepKind::Command { program, args } = &step.kind else {
            return Err(unexpected(step, "command"));
        };
        if !self.is_allowed(program) {
            warn!(step_id = %step.id, program = %program, "Blocked command not on the allowlist");
            return Err(ConductorError::Validation(format!(
                "command '{program}' is not allowed"
            )));
        }

        info!(step_id = %step.id, program = %program, "Running command step");
        let output = tokio::process::Command::new(program)
            .args(args)
            .env("CONDUCTOR_CONTEXT", ctx.to_json().to_string())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ConductorError::Execution(format!("failed to run '{program}': {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);
        if !output.status.success() {
            return Err(ConductorError::Execution(format!(
                "'{program}' exited with status {exit_code}: {}",
                truncate_output(stderr.trim(), MAX_STDERR)
            )));
        }
        Ok(serde_json::json!({
            "exit_code": exit_code,
            "stdout": truncate_output(&stdout, MAX_STDOUT),
            "stderr": truncate_output(&stderr, MAX_STDERR),
        }))
    }
}

fn truncate_output(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated, {} total bytes]", &s[..end], s.len())
}

// ---------------------------------------------------------------------------
// API calls
// ---------------------------------------------------------------------------

/// Calls an HTTP endpoint. Non-2xx responses fail the step.
pub struct ApiCallHandler {
    http: reqwest::Client,
}

impl ApiCallHandler {
    /// Creates a handler with its own HTTP client.
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for ApiCallHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepHandler for ApiCallHandler {
    async fn run(&self, step: &WorkflowStep, ctx: &StepContext) -> ConductorResult<serde_json::Value> {
        let StepKind::ApiCall { method, url, body } = &step.kind else {
            return Err(unexpected(step, "api call"));
        };
        let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|_| ConductorError::Validation(format!("invalid HTTP method '{method}'")))?;

        let mut request = self
            .http
            .request(method.clone(), url)
            .header("x-conductor-execution", ctx.execution_id.to_string());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                ConductorError::Transient(format!("{method} {url}: {e}"))
            } else {
                ConductorError::Http(format!("{method} {url}: {e}"))
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ConductorError::Http(format!("{method} {url}: {e}")))?;
        let parsed = serde_json::from_str::<serde_json::Value>(&text)
            .unwrap_or(serde_json::Value::String(text));

        if !status.is_success() {
            let message = format!("{method} {url} returned {status}");
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                ConductorError::Transient(message)
            } else {
                ConductorError::Execution(message)
            });
        }
        Ok(serde_json::json!({
            "status": status.as_u16(),
            "body": parsed,
        }))
    }
}

// ---------------------------------------------------------------------------
// Manual steps
// ---------------------------------------------------------------------------

/// Completes a manual step only when the execution input approves it.
///
/// Approvals are listed by step id under `approvals` in the input.
pub struct ManualHandler;

#[async_trait]
impl StepHandler for ManualHandler {
    async fn run(&self, step: &WorkflowStep, ctx: &StepContext) -> ConductorResult<serde_json::Value> {
        let StepKind::Manual { instructions } = &step.kind else {
            return Err(unexpected(step, "manual"));
        };
        let approved = ctx.input["approvals"]
            .as_array()
            .is_some_and(|ids| ids.iter().any(|v| v.as_str() == Some(step.id.as_str())));
        if approved {
            Ok(serde_json::json!({ "approved": true, "instructions": instructions }))
        } else {
            Err(ConductorError::Validation(format!(
                "manual step '{}' is awaiting approval",
                step.id
            )))
        }
    }
}
