use crate::clock::{Clock, SystemClock};
use crate::engine::{WorkflowEngine, ORCHESTRATOR_SENDER};
use crate::scheduler::{AutomationAction, AutomationRunner, AutomationScheduler, AutomationSpec, RunOutcome};
use crate::workflow::{ExecutionStatus, WorkflowDefinition};
use async_trait::async_trait;
use conductor_a2a::{signal_types, CallHandler, Signal, SignalBus, SignalLog};
use conductor_agent::{
    AgentBackend, AgentConfig, AgentMonitor, AgentRegistry, AgentSelection, CapabilityRouter, RetryPolicy,
    RoutingConfig, TaskExecutor,
};
use conductor_core::{Capability, ConductorError, ConductorResult, RoutingDecision, Task, TaskResult};
use conductor_store::{MemoryStore, RecordStore};
use std::sync::Arc;
use tracing::{info, warn};

/// Answers bus calls by executing a task on the callee.
///
/// The request payload carries `goal`, and optionally `type` and `input`.
/// A bare string payload is taken as the goal.
pub struct ExecutorCallHandler {
    executor: Arc<TaskExecutor>,
}

impl ExecutorCallHandler {
    /// Creates a handler over `executor`.
    pub fn new(executor: Arc<TaskExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl CallHandler for ExecutorCallHandler {
    async fn handle(&self, request: &Signal) -> ConductorResult<serde_json::Value> {
        let agent_id = request
            .to_agent
            .clone()
            .ok_or_else(|| ConductorError::Validation("call has no recipient".into()))?;
        let payload = &request.payload;
        let goal = payload
            .as_str()
            .or_else(|| payload["goal"].as_str())
            .ok_or_else(|| ConductorError::Validation("call payload needs a 'goal'".into()))?;
        let capability = match payload["type"].as_str() {
            Some(tag) => tag.parse()?,
            None => self
                .executor
                .registry()
                .get(&agent_id)
                .and_then(|a| a.capabilities.first().copied())
                .unwrap_or(Capability::General),
        };

        let mut task = Task::new(goal, capability);
        if !payload["input"].is_null() {
            task = task.with_input(payload["input"].clone());
        }
        let result = self.executor.execute(task, AgentSelection::Explicit(agent_id)).await?;
        if result.is_success() {
            Ok(serde_json::json!({
                "task_id": result.task_id,
                "output": result.output,
                "metadata": result.metadata,
            }))
        } else {
            Err(ConductorError::Execution(
                result.error.unwrap_or_else(|| "call failed".to_string()),
            ))
        }
    }
}

/// Carries out automation actions through the engine and the executor.
pub struct ActionRunner {
    engine: Arc<WorkflowEngine>,
    executor: Arc<TaskExecutor>,
}

impl ActionRunner {
    /// Creates a runner.
    pub fn new(engine: Arc<WorkflowEngine>, executor: Arc<TaskExecutor>) -> Self {
        Self { engine, executor }
    }
}

#[async_trait]
impl AutomationRunner for ActionRunner {
    async fn run(&self, automation_id: &str, action: &AutomationAction) -> ConductorResult<RunOutcome> {
        match action {
            AutomationAction::Workflow { workflow_id, input } => {
                let execution = self.engine.execute(workflow_id, input.clone()).await?;
                let message = format!(
                    "workflow '{workflow_id}' {}: {}/{} steps",
                    if execution.status == ExecutionStatus::Completed { "completed" } else { "failed" },
                    execution.steps_completed,
                    execution.steps_total
                );
                let outcome = if execution.status == ExecutionStatus::Completed {
                    RunOutcome::succeeded(message)
                } else {
                    RunOutcome::failed(message)
                };
                Ok(outcome.with_execution(execution.id))
            }
            AutomationAction::Task { goal, capability, agent } => {
                let task = Task::new(goal.clone(), *capability).with_input(serde_json::json!({
                    "automation_id": automation_id,
                }));
                let selection = agent.clone().map_or(AgentSelection::Auto, AgentSelection::Explicit);
                let result = self.executor.execute(task, selection).await?;
                let agent_id = result.metadata.agent_id.clone().unwrap_or_default();
                Ok(if result.is_success() {
                    RunOutcome::succeeded(format!("task completed by '{agent_id}'"))
                } else {
                    RunOutcome::failed(result.error.unwrap_or_else(|| "task failed".to_string()))
                })
            }
        }
    }
}

/// Shared handles to every orchestration component.
///
/// Cheap to clone; the gateway and the CLI both work through this.
#[derive(Clone)]
pub struct Conductor {
    registry: Arc<AgentRegistry>,
    router: Arc<CapabilityRouter>,
    executor: Arc<TaskExecutor>,
    monitor: Arc<AgentMonitor>,
    bus: Arc<SignalBus>,
    engine: Arc<WorkflowEngine>,
    scheduler: Arc<AutomationScheduler>,
    store: Arc<dyn RecordStore>,
}

impl Conductor {
    /// Starts a builder.
    pub fn builder() -> ConductorBuilder {
        ConductorBuilder::default()
    }

    /// Agent registry.
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Capability router.
    pub fn router(&self) -> &Arc<CapabilityRouter> {
        &self.router
    }

    /// Task executor.
    pub fn executor(&self) -> &Arc<TaskExecutor> {
        &self.executor
    }

    /// Per-agent performance counters.
    pub fn monitor(&self) -> &Arc<AgentMonitor> {
        &self.monitor
    }

    /// Signal bus.
    pub fn bus(&self) -> &Arc<SignalBus> {
        &self.bus
    }

    /// Workflow engine.
    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }

    /// Automation scheduler.
    pub fn scheduler(&self) -> &Arc<AutomationScheduler> {
        &self.scheduler
    }

    /// Record store shared by every component.
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Routing decision for a task, without executing it.
    pub fn route(&self, task: &Task) -> ConductorResult<RoutingDecision> {
        task.validate()?;
        self.router.route(task)
    }

    /// Executes a task and announces the outcome on the bus.
    pub async fn submit_task(&self, task: Task, selection: AgentSelection) -> ConductorResult<TaskResult> {
        let result = self.executor.execute(task, selection).await?;
        let signal_type = if result.is_success() {
            signal_types::TASK_COMPLETED
        } else {
            signal_types::TASK_FAILED
        };
        let payload = serde_json::json!({
            "task_id": result.task_id,
            "agent_id": result.metadata.agent_id,
            "status": result.status,
            "duration_ms": result.metadata.duration_ms,
            "error": result.error,
        });
        if let Err(e) = self.bus.broadcast(signal_type, payload, ORCHESTRATOR_SENDER).await {
            warn!(task_id = %result.task_id, error = %e, "Failed to broadcast task signal");
        }
        Ok(result)
    }
}

/// Assembles a [`Conductor`] from configuration.
pub struct ConductorBuilder {
    agents: Vec<(AgentConfig, Option<Arc<dyn AgentBackend>>)>,
    workflows: Vec<WorkflowDefinition>,
    automations: Vec<AutomationSpec>,
    store: Option<Arc<dyn RecordStore>>,
    signal_log: Option<Arc<dyn SignalLog>>,
    mock_signals: bool,
    retry: RetryPolicy,
    call_policy: Option<RetryPolicy>,
    routing: RoutingConfig,
    clock: Arc<dyn Clock>,
    allowed_commands: Vec<String>,
}

impl Default for ConductorBuilder {
    fn default() -> Self {
        Self {
            agents: Vec::new(),
            workflows: Vec::new(),
            automations: Vec::new(),
            store: None,
            signal_log: None,
            mock_signals: false,
            retry: RetryPolicy::default(),
            call_policy: None,
            routing: RoutingConfig::default(),
            clock: Arc::new(SystemClock),
            allowed_commands: Vec::new(),
        }
    }
}

impl ConductorBuilder {
    /// Adds an agent bound through its configured binding.
    pub fn agent(mut self, config: AgentConfig) -> Self {
        self.agents.push((config, None));
        self
    }

    /// Adds an agent bound to an in-process backend.
    pub fn agent_with_backend(mut self, config: AgentConfig, backend: Arc<dyn AgentBackend>) -> Self {
        self.agents.push((config, Some(backend)));
        self
    }

    /// Adds a workflow.
    pub fn workflow(mut self, workflow: WorkflowDefinition) -> Self {
        self.workflows.push(workflow);
        self
    }

    /// Adds an automation.
    pub fn automation(mut self, spec: AutomationSpec) -> Self {
        self.automations.push(spec);
        self
    }

    /// Record store for executions, automation state and metrics. In-memory by default.
    pub fn store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Durable signal log. Without one the bus runs in mock mode.
    pub fn signal_log(mut self, log: Arc<dyn SignalLog>) -> Self {
        self.signal_log = Some(log);
        self
    }

    /// Starts the bus in mock mode.
    pub fn mock_signals(mut self, mock: bool) -> Self {
        self.mock_signals = mock;
        self
    }

    /// Executor retry and timeout policy.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Timeout and retry budget for bus calls.
    pub fn call_policy(mut self, policy: RetryPolicy) -> Self {
        self.call_policy = Some(policy);
        self
    }

    /// Router thresholds.
    pub fn routing(mut self, routing: RoutingConfig) -> Self {
        self.routing = routing;
        self
    }

    /// Clock used by the scheduler.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Programs `command` steps may run.
    pub fn allowed_commands(mut self, programs: Vec<String>) -> Self {
        self.allowed_commands = programs;
        self
    }

    /// Wires everything together.
    ///
    /// Fails with a config error when no agent is configured, and with the
    /// underlying error on duplicate ids or invalid schedules.
    pub async fn build(self) -> ConductorResult<Conductor> {
        if self.agents.is_empty() {
            return Err(ConductorError::Config("at least one agent must be configured".into()));
        }

        let registry = Arc::new(AgentRegistry::new());
        for (config, backend) in self.agents {
            match backend {
                Some(backend) => registry.register_with_backend(config, backend)?,
                None => registry.register(config)?,
            }
        }

        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let monitor = Arc::new(AgentMonitor::new());
        let router = Arc::new(CapabilityRouter::new(registry.clone(), self.routing));
        let executor = Arc::new(
            TaskExecutor::new(registry.clone(), router.clone(), self.retry)
                .with_monitor(monitor.clone())
                .with_store(store.clone()),
        );

        let bus = match self.signal_log {
            Some(log) => {
                let bus = SignalBus::new(
                    registry.clone(),
                    log,
                    Arc::new(ExecutorCallHandler::new(executor.clone())),
                );
                if self.mock_signals {
                    bus.set_mock_mode(true)?;
                }
                bus
            }
            None => SignalBus::in_memory(registry.clone()),
        };
        let bus = Arc::new(match self.call_policy {
            Some(policy) => bus.with_call_policy(policy),
            None => bus,
        });

        let engine = Arc::new(
            WorkflowEngine::new(store.clone())
                .with_standard_handlers(executor.clone(), self.allowed_commands)
                .with_bus(bus.clone()),
        );
        for workflow in self.workflows {
            engine.register(workflow)?;
        }

        let runner = Arc::new(ActionRunner::new(engine.clone(), executor.clone()));
        let scheduler = Arc::new(AutomationScheduler::new(runner, self.clock).with_store(store.clone()));
        for spec in self.automations {
            scheduler.add(spec).await?;
        }
        let restored = scheduler.restore().await?;

        info!(
            agents = registry.len(),
            workflows = engine.list().len(),
            automations = scheduler.list().len(),
            restored,
            mock_signals = bus.is_mock(),
            "Conductor assembled"
        );

        Ok(Conductor {
            registry,
            router,
            executor,
            monitor,
            bus,
            engine,
            scheduler,
            store,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::scheduler::AutomationSchedule;
    use crate::workflow::WorkflowStep;
    use conductor_a2a::{MemorySignalLog, SignalFilter};
    use conductor_core::ResultStatus;

    fn agents(builder: ConductorBuilder) -> ConductorBuilder {
        builder
            .agent(
                AgentConfig::new("writer", "Writer", vec![Capability::Content])
                    .with_specialties(["blog posts", "seo"]),
            )
            .agent(AgentConfig::new("general", "General", vec![Capability::General]))
    }

    #[tokio::test]
    async fn test_build_requires_agents() {
        let err = Conductor::builder().build().await.err().unwrap();
        assert!(matches!(err, ConductorError::Config(_)));
    }

    #[tokio::test]
    async fn test_build_rejects_duplicate_agents() {
        let err = agents(Conductor::builder())
            .agent(AgentConfig::new("writer", "Again", vec![Capability::Content]))
            .build()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConductorError::Validation(_)));
    }

    #[tokio::test]
    async fn test_submit_task_broadcasts_outcome() {
        let conductor = agents(Conductor::builder()).build().await.unwrap();
        let result = conductor
            .submit_task(Task::new("write seo blog posts", Capability::Content), AgentSelection::Auto)
            .await
            .unwrap();
        assert_eq!(result.status, ResultStatus::Success);
        assert_eq!(result.metadata.agent_id.as_deref(), Some("writer"));

        let signals = conductor
            .bus()
            .signals(&SignalFilter::default().with_type(signal_types::TASK_COMPLETED))
            .await
            .unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].payload["agent_id"], "writer");
        assert_eq!(conductor.monitor().get("writer").await.unwrap().tasks_succeeded, 1);
    }

    #[tokio::test]
    async fn test_bus_calls_reach_executor() {
        let conductor = agents(Conductor::builder())
            .signal_log(Arc::new(MemorySignalLog::new()))
            .build()
            .await
            .unwrap();
        assert!(!conductor.bus().is_mock());
        let response = conductor
            .bus()
            .call("writer", serde_json::json!({"goal": "draft a post", "input": {"n": 1}}), "planner")
            .await
            .unwrap();
        assert_eq!(response.payload["output"]["agent"], "writer");
        assert_eq!(response.payload["output"]["input"]["n"], 1);
        assert_eq!(response.payload["metadata"]["agent_id"], "writer");
    }

    #[tokio::test]
    async fn test_automation_runs_workflow() {
        let clock = Arc::new(ManualClock::default());
        let conductor = agents(Conductor::builder())
            .clock(clock.clone())
            .workflow(WorkflowDefinition::new(
                "content",
                "Content",
                vec![WorkflowStep::agent_task("draft", "write blog posts")],
            ))
            .automation(AutomationSpec {
                id: "daily-content".into(),
                name: "Daily content".into(),
                description: String::new(),
                schedule: AutomationSchedule::Interval { seconds: 86_400 },
                action: AutomationAction::Workflow {
                    workflow_id: "content".into(),
                    input: serde_json::json!({}),
                },
                enabled: true,
            })
            .automation(AutomationSpec {
                id: "ping".into(),
                name: "Ping".into(),
                description: String::new(),
                schedule: AutomationSchedule::Interval { seconds: 60 },
                action: AutomationAction::Task {
                    goal: "say hello".into(),
                    capability: Capability::General,
                    agent: Some("general".into()),
                },
                enabled: true,
            })
            .build()
            .await
            .unwrap();

        clock.advance(chrono::Duration::days(1));
        let fired = conductor.scheduler().tick();
        assert_eq!(fired, vec!["daily-content", "ping"]);
        conductor.scheduler().drain().await;

        let task = conductor.scheduler().get("daily-content").unwrap();
        let run = &task.recent_results[0];
        assert!(run.success, "{}", run.message);
        let execution = conductor
            .engine()
            .get_execution(run.execution_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);

        let ping = conductor.scheduler().get("ping").unwrap();
        assert!(ping.recent_results[0].message.contains("general"));
    }
}
