//! Route handlers. Each one reads from the shared [`Conductor`] and answers
//! with the [`ApiResponse`] envelope.

use crate::response::{ok, ApiError, ApiResponse, ApiResult};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use conductor_a2a::{CallResponse, Signal, SignalFilter};
use conductor_agent::{AgentConfig, AgentSelection};
use conductor_core::{Capability, ConductorError, Priority, RoutingDecision, Task, TaskResult};
use conductor_orchestrator::{AutomationTask, Conductor, ExecutionStatus, WorkflowDefinition, WorkflowExecution};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

/// Sender used when a signal request does not name one.
const API_SENDER: &str = "api";

/// Decodes a request body, treating an empty body as `{}`.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    let raw: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        body
    };
    serde_json::from_slice(raw)
        .map_err(|e| ApiError(ConductorError::Validation(format!("invalid request body: {e}"))))
}

fn not_found(what: &str, id: &str) -> ApiError {
    ApiError(ConductorError::NotFound(format!("{what} '{id}'")))
}

/// `GET /health`
pub async fn health(State(conductor): State<Conductor>) -> ApiResult<Value> {
    ok(
        json!({
            "status": "ok",
            "service": "conductor",
            "agents": conductor.registry().len(),
            "workflows": conductor.engine().list().len(),
            "automations": conductor.scheduler().list().len(),
            "mock_signals": conductor.bus().is_mock(),
        }),
        "healthy",
    )
}

// --- agents ---

/// `GET /api/agents`
pub async fn list_agents(State(conductor): State<Conductor>) -> ApiResult<Vec<AgentConfig>> {
    let agents = conductor.registry().list_all();
    let message = format!("{} agents", agents.len());
    ok(agents, message)
}

/// Body of `POST /api/agents/{id}/enabled`.
#[derive(Debug, Deserialize)]
pub struct EnabledRequest {
    /// New state.
    pub enabled: bool,
}

/// `POST /api/agents/{id}/enabled`
pub async fn set_agent_enabled(
    State(conductor): State<Conductor>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<AgentConfig> {
    let request: EnabledRequest = parse_body(&body)?;
    conductor.registry().set_enabled(&id, request.enabled)?;
    let agent = conductor
        .registry()
        .get(&id)
        .ok_or_else(|| not_found("agent", &id))?;
    info!(agent_id = %id, enabled = request.enabled, "Agent toggled via API");
    let state = if request.enabled { "enabled" } else { "disabled" };
    ok(agent, format!("agent '{id}' {state}"))
}

/// `GET /api/agents/metrics`
pub async fn agent_metrics(State(conductor): State<Conductor>) -> ApiResult<Value> {
    ok(conductor.monitor().to_json().await, "agent metrics")
}

// --- tasks ---

/// Body of `POST /api/tasks` and `POST /api/route`.
#[derive(Debug, Deserialize)]
pub struct TaskRequest {
    /// What should be achieved.
    pub goal: String,
    /// Required capability.
    #[serde(rename = "type", default = "general")]
    pub capability: Capability,
    /// Scheduling priority.
    #[serde(default)]
    pub priority: Priority,
    /// Structured input for the agent.
    #[serde(default)]
    pub input: Option<Value>,
    /// Bypass the router and use this agent.
    #[serde(default)]
    pub agent: Option<String>,
}

fn general() -> Capability {
    Capability::General
}

impl TaskRequest {
    fn into_task(self) -> (Task, AgentSelection) {
        let mut task = Task::new(self.goal, self.capability).with_priority(self.priority);
        if let Some(input) = self.input {
            task = task.with_input(input);
        }
        let selection = self
            .agent
            .map_or(AgentSelection::Auto, AgentSelection::Explicit);
        (task, selection)
    }
}

/// `POST /api/tasks`
///
/// Runs the task to completion. A task whose every attempt failed answers
/// 500 with the result record attached.
pub async fn submit_task(State(conductor): State<Conductor>, body: Bytes) -> ApiResult<TaskResult> {
    let request: TaskRequest = parse_body(&body)?;
    let (task, selection) = request.into_task();
    let result = conductor.submit_task(task, selection).await?;
    if result.is_success() {
        let message = format!(
            "task completed by '{}'",
            result.metadata.agent_id.as_deref().unwrap_or("unknown")
        );
        return ok(result, message);
    }
    let message = result
        .error
        .clone()
        .unwrap_or_else(|| "task failed".to_string());
    Ok((
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::failed(result, "execution_error", message)),
    ))
}

/// `POST /api/route`
pub async fn route_task(State(conductor): State<Conductor>, body: Bytes) -> ApiResult<RoutingDecision> {
    let request: TaskRequest = parse_body(&body)?;
    let (task, _) = request.into_task();
    let decision = conductor.route(&task)?;
    let message = format!("routed to '{}'", decision.agent_id);
    ok(decision, message)
}

// --- workflows ---

/// `GET /api/workflows`
pub async fn list_workflows(State(conductor): State<Conductor>) -> ApiResult<Vec<WorkflowDefinition>> {
    let workflows = conductor.engine().list();
    let message = format!("{} workflows", workflows.len());
    ok(workflows, message)
}

/// `GET /api/workflows/{id}`
pub async fn get_workflow(
    State(conductor): State<Conductor>,
    Path(id): Path<String>,
) -> ApiResult<WorkflowDefinition> {
    let workflow = conductor
        .engine()
        .get(&id)
        .ok_or_else(|| not_found("workflow", &id))?;
    ok(workflow, format!("workflow '{id}'"))
}

/// Body of `POST /api/workflows/{id}/execute`. May be omitted.
#[derive(Debug, Default, Deserialize)]
pub struct ExecuteRequest {
    /// Execution input, `{}` when absent.
    #[serde(default)]
    pub input: Option<Value>,
}

/// `POST /api/workflows/{id}/execute`
///
/// Runs the workflow synchronously. A failed execution answers 500 with the
/// execution record attached.
pub async fn execute_workflow(
    State(conductor): State<Conductor>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<WorkflowExecution> {
    let request: ExecuteRequest = parse_body(&body)?;
    let input = request.input.unwrap_or_else(|| json!({}));
    let execution = conductor.engine().execute(&id, input).await?;
    if execution.status == ExecutionStatus::Completed {
        let message = format!(
            "workflow '{id}' completed {}/{} steps",
            execution.steps_completed, execution.steps_total
        );
        return ok(execution, message);
    }
    let message = execution
        .error
        .clone()
        .unwrap_or_else(|| format!("workflow '{id}' failed"));
    Ok((
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::failed(execution, "execution_error", message)),
    ))
}

/// `GET /api/workflows/{id}/executions`
pub async fn list_executions(
    State(conductor): State<Conductor>,
    Path(id): Path<String>,
) -> ApiResult<Vec<WorkflowExecution>> {
    if conductor.engine().get(&id).is_none() {
        return Err(not_found("workflow", &id));
    }
    let executions = conductor.engine().executions(&id).await?;
    let message = format!("{} executions", executions.len());
    ok(executions, message)
}

/// `GET /api/executions/{id}`
pub async fn get_execution(
    State(conductor): State<Conductor>,
    Path(id): Path<String>,
) -> ApiResult<WorkflowExecution> {
    let execution_id = Uuid::parse_str(&id)
        .map_err(|_| ApiError(ConductorError::Validation(format!("invalid execution id '{id}'"))))?;
    let execution = conductor
        .engine()
        .get_execution(execution_id)
        .await?
        .ok_or_else(|| not_found("execution", &id))?;
    ok(execution, format!("execution '{id}'"))
}

// --- automations ---

/// `GET /api/automations`
pub async fn list_automations(State(conductor): State<Conductor>) -> ApiResult<Vec<AutomationTask>> {
    let automations = conductor.scheduler().list();
    let message = format!("{} automations", automations.len());
    ok(automations, message)
}

/// `POST /api/automations/{id}/toggle`
pub async fn toggle_automation(
    State(conductor): State<Conductor>,
    Path(id): Path<String>,
) -> ApiResult<AutomationTask> {
    let current = conductor
        .scheduler()
        .get(&id)
        .ok_or_else(|| not_found("automation", &id))?;
    let task = conductor.scheduler().set_enabled(&id, !current.enabled).await?;
    let state = if task.enabled { "enabled" } else { "disabled" };
    ok(task, format!("automation '{id}' {state}"))
}

/// `POST /api/automations/{id}/run`
///
/// Starts a run in the background and answers 202 with its id.
pub async fn run_automation(
    State(conductor): State<Conductor>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    let run_id = conductor.scheduler().trigger_now(&id)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::ok(
            json!({ "automation_id": id, "run_id": run_id }),
            format!("automation '{id}' triggered"),
        )),
    ))
}

// --- signals ---

/// Query of `GET /api/signals`.
#[derive(Debug, Default, Deserialize)]
pub struct SignalQuery {
    /// Signal type.
    #[serde(rename = "type")]
    pub signal_type: Option<String>,
    /// Agent appearing as sender or recipient.
    pub agent: Option<String>,
    /// Most recent matches only.
    pub limit: Option<usize>,
}

/// `GET /api/signals`
pub async fn list_signals(
    State(conductor): State<Conductor>,
    Query(query): Query<SignalQuery>,
) -> ApiResult<Vec<Signal>> {
    let mut filter = SignalFilter::default();
    if let Some(signal_type) = query.signal_type {
        filter = filter.with_type(signal_type);
    }
    if let Some(agent) = query.agent {
        filter = filter.with_agent(agent);
    }
    if let Some(limit) = query.limit {
        filter = filter.with_limit(limit);
    }
    let signals = conductor.bus().signals(&filter).await?;
    let message = format!("{} signals", signals.len());
    ok(signals, message)
}

/// Body of `POST /api/signals/broadcast`.
#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    /// Signal type.
    #[serde(rename = "type")]
    pub signal_type: String,
    /// Opaque payload.
    #[serde(default)]
    pub payload: Value,
    /// Sender, `api` when absent.
    #[serde(default)]
    pub from: Option<String>,
}

/// `POST /api/signals/broadcast`
pub async fn broadcast_signal(State(conductor): State<Conductor>, body: Bytes) -> ApiResult<Signal> {
    let request: BroadcastRequest = parse_body(&body)?;
    let from = request.from.unwrap_or_else(|| API_SENDER.to_string());
    let signal = conductor
        .bus()
        .broadcast(&request.signal_type, request.payload, &from)
        .await?;
    let message = format!("signal {} broadcast", signal.seq);
    ok(signal, message)
}

/// Body of `POST /api/signals/call`.
#[derive(Debug, Deserialize)]
pub struct CallRequest {
    /// Callee.
    pub to: String,
    /// Request payload: a goal string or an object.
    #[serde(default)]
    pub payload: Value,
    /// Caller, `api` when absent.
    #[serde(default)]
    pub from: Option<String>,
}

/// `POST /api/signals/call`
pub async fn call_agent(State(conductor): State<Conductor>, body: Bytes) -> ApiResult<CallResponse> {
    let request: CallRequest = parse_body(&body)?;
    let from = request.from.unwrap_or_else(|| API_SENDER.to_string());
    let response = conductor.bus().call(&request.to, request.payload, &from).await?;
    let message = format!("'{}' answered in {}ms", response.agent_id, response.duration_ms);
    ok(response, message)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_body_is_empty_object() {
        let request: ExecuteRequest = parse_body(&Bytes::new()).unwrap();
        assert!(request.input.is_none());
        let request: ExecuteRequest = parse_body(&Bytes::from_static(b"  \n")).unwrap();
        assert!(request.input.is_none());
    }

    #[test]
    fn test_bad_body_is_validation_error() {
        let err = parse_body::<TaskRequest>(&Bytes::from_static(b"{\"goal\": 3}")).unwrap_err();
        assert!(matches!(err.0, ConductorError::Validation(_)));
        let err = parse_body::<TaskRequest>(&Bytes::new()).unwrap_err();
        assert!(matches!(err.0, ConductorError::Validation(_)));
    }

    #[test]
    fn test_task_request_defaults() {
        let request: TaskRequest =
            parse_body(&Bytes::from_static(b"{\"goal\": \"summarize sales\"}")).unwrap();
        let (task, selection) = request.into_task();
        assert_eq!(task.capability, Capability::General);
        assert_eq!(task.priority, Priority::Normal);
        assert_eq!(selection, AgentSelection::Auto);

        let request: TaskRequest = parse_body(&Bytes::from_static(
            b"{\"goal\": \"fix bug\", \"type\": \"coding\", \"agent\": \"dev\"}",
        ))
        .unwrap();
        let (task, selection) = request.into_task();
        assert_eq!(task.capability, Capability::Coding);
        assert_eq!(selection, AgentSelection::Explicit("dev".into()));
    }
}
