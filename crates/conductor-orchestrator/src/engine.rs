use crate::plan::ExecutionPlan;
use crate::steps::{AgentTaskHandler, ApiCallHandler, CommandHandler, ManualHandler, StepContext, StepHandler};
use crate::workflow::{ExecutionStatus, StepKind, StepKindTag, WorkflowDefinition, WorkflowExecution, WorkflowStep};
use conductor_a2a::{signal_types, SignalBus};
use conductor_agent::TaskExecutor;
use conductor_core::{ConductorError, ConductorResult};
use conductor_store::{collections, Collection, RecordStore};
use futures_util::future::{join_all, BoxFuture};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

/// Deepest allowed subworkflow nesting.
pub const DEFAULT_MAX_DEPTH: usize = 4;

/// Sender id on signals emitted by the orchestrator itself.
pub const ORCHESTRATOR_SENDER: &str = "conductor";

/// Only transient failures (timeouts, connection errors, overloaded
/// upstreams) earn a step another attempt.
fn worth_retrying(err: &ConductorError) -> bool {
    err.is_retryable()
}

/// Runs registered workflows as dependency graphs.
///
/// Every step whose dependencies have completed is dispatched in the same
/// batch, and batches run until no step is ready. A failed step never stops
/// independent branches; its transitive dependents are skipped.
pub struct WorkflowEngine {
    workflows: RwLock<Vec<WorkflowDefinition>>,
    handlers: HashMap<StepKindTag, Arc<dyn StepHandler>>,
    executions: Collection<WorkflowExecution>,
    bus: Option<Arc<SignalBus>>,
    max_depth: usize,
}

impl WorkflowEngine {
    /// Creates an engine that persists executions to `store`.
    ///
    /// Only manual steps have a handler until more are registered.
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        let mut handlers: HashMap<StepKindTag, Arc<dyn StepHandler>> = HashMap::new();
        handlers.insert(StepKindTag::Manual, Arc::new(ManualHandler));
        Self {
            workflows: RwLock::new(Vec::new()),
            handlers,
            executions: Collection::new(store, collections::WORKFLOW_EXECUTIONS),
            bus: None,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Registers the agent task, command, API call and manual handlers.
    pub fn with_standard_handlers(self, executor: Arc<TaskExecutor>, allowed_commands: Vec<String>) -> Self {
        self.with_handler(StepKindTag::AgentTask, Arc::new(AgentTaskHandler::new(executor)))
            .with_handler(StepKindTag::Command, Arc::new(CommandHandler::new(allowed_commands)))
            .with_handler(StepKindTag::ApiCall, Arc::new(ApiCallHandler::new()))
    }

    /// Sets the handler for one step kind. Subworkflows are always run by the engine.
    pub fn with_handler(mut self, tag: StepKindTag, handler: Arc<dyn StepHandler>) -> Self {
        self.handlers.insert(tag, handler);
        self
    }

    /// Broadcasts lifecycle signals on `bus`.
    pub fn with_bus(mut self, bus: Arc<SignalBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Overrides the subworkflow nesting limit.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Adds a workflow. Ids must be unique.
    pub fn register(&self, workflow: WorkflowDefinition) -> ConductorResult<()> {
        workflow.validate()?;
        let mut workflows = self.workflows.write();
        if workflows.iter().any(|w| w.id == workflow.id) {
            return Err(ConductorError::Validation(format!(
                "workflow '{}' is already registered",
                workflow.id
            )));
        }
        info!(workflow_id = %workflow.id, steps = workflow.steps.len(), "Registered workflow");
        workflows.push(workflow);
        Ok(())
    }

    /// Looks up a workflow.
    pub fn get(&self, id: &str) -> Option<WorkflowDefinition> {
        self.workflows.read().iter().find(|w| w.id == id).cloned()
    }

    /// All workflows in registration order.
    pub fn list(&self) -> Vec<WorkflowDefinition> {
        self.workflows.read().clone()
    }

    /// Enables or disables a workflow.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> ConductorResult<()> {
        let mut workflows = self.workflows.write();
        let workflow = workflows
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or_else(|| ConductorError::NotFound(format!("workflow '{id}'")))?;
        workflow.enabled = enabled;
        info!(workflow_id = %id, enabled, "Workflow toggled");
        Ok(())
    }

    /// Runs a workflow to completion.
    ///
    /// Returns `Err` only when the workflow is unknown or disabled. Any other
    /// failure, including a dependency cycle, is reported on the returned
    /// execution with status [`ExecutionStatus::Failed`].
    pub async fn execute(&self, workflow_id: &str, input: serde_json::Value) -> ConductorResult<WorkflowExecution> {
        self.execute_at_depth(workflow_id.to_string(), input, None, 0).await
    }

    /// A stored execution.
    pub async fn get_execution(&self, id: Uuid) -> ConductorResult<Option<WorkflowExecution>> {
        self.executions.get(&id.to_string()).await
    }

    /// Stored executions of one workflow, newest first.
    pub async fn executions(&self, workflow_id: &str) -> ConductorResult<Vec<WorkflowExecution>> {
        let mut executions: Vec<WorkflowExecution> = self
            .executions
            .list()
            .await?
            .into_iter()
            .filter(|e| e.workflow_id == workflow_id)
            .collect();
        executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(executions)
    }

    fn execute_at_depth(
        &self,
        workflow_id: String,
        input: serde_json::Value,
        parent: Option<Uuid>,
        depth: usize,
    ) -> BoxFuture<'_, ConductorResult<WorkflowExecution>> {
        Box::pin(async move {
            let workflow = self
                .get(&workflow_id)
                .ok_or_else(|| ConductorError::NotFound(format!("workflow '{workflow_id}'")))?;
            if !workflow.enabled {
                return Err(ConductorError::Validation(format!(
                    "workflow '{workflow_id}' is disabled"
                )));
            }

            let mut execution = WorkflowExecution::start(&workflow, input, parent);
            info!(
                workflow_id = %workflow.id,
                execution_id = %execution.id,
                steps_total = execution.steps_total,
                depth,
                "Workflow execution started"
            );
            if let Err(e) = self.executions.create(&execution.id.to_string(), &execution).await {
                warn!(execution_id = %execution.id, error = %e, "Failed to persist execution");
            }
            self.announce(signal_types::WORKFLOW_STARTED, &execution).await;

            match ExecutionPlan::new(&workflow) {
                Ok(mut plan) => {
                    self.run_plan(&workflow, &mut plan, &mut execution, depth).await;
                    let status = if execution.errors.is_empty() && execution.skipped.is_empty() {
                        ExecutionStatus::Completed
                    } else {
                        ExecutionStatus::Failed
                    };
                    execution.finish(status);
                }
                Err(e) => {
                    warn!(workflow_id = %workflow.id, execution_id = %execution.id, error = %e, "Workflow cannot be planned");
                    execution.error = Some(e.to_string());
                    execution.finish(ExecutionStatus::Failed);
                }
            }

            if let Err(e) = self.executions.update(&execution.id.to_string(), &execution).await {
                warn!(execution_id = %execution.id, error = %e, "Failed to persist execution");
            }
            let signal = if execution.status == ExecutionStatus::Completed {
                signal_types::WORKFLOW_COMPLETED
            } else {
                signal_types::WORKFLOW_FAILED
            };
            self.announce(signal, &execution).await;

            info!(
                workflow_id = %workflow.id,
                execution_id = %execution.id,
                status = ?execution.status,
                steps_completed = execution.steps_completed,
                steps_total = execution.steps_total,
                duration_ms = execution.duration_ms.unwrap_or(0),
                "Workflow execution finished"
            );
            Ok(execution)
        })
    }

    async fn run_plan(
        &self,
        workflow: &WorkflowDefinition,
        plan: &mut ExecutionPlan,
        execution: &mut WorkflowExecution,
        depth: usize,
    ) {
        loop {
            let ready = plan.ready();
            if ready.is_empty() {
                break;
            }
            for id in &ready {
                plan.mark_running(id);
            }

            let batch = ready.iter().filter_map(|id| workflow.step(id)).map(|step| {
                let ctx = StepContext {
                    execution_id: execution.id,
                    workflow_id: workflow.id.clone(),
                    input: execution.input.clone(),
                    dependencies: step
                        .depends_on
                        .iter()
                        .filter_map(|d| execution.results.get(d).map(|v| (d.clone(), v.clone())))
                        .collect(),
                };
                async move {
                    let started = Instant::now();
                    let (outcome, attempts) = self.run_step(step, &ctx, depth).await;
                    (step, outcome, attempts, started.elapsed().as_millis() as u64)
                }
            });
            let finished = join_all(batch).await;

            for (step, outcome, attempts, duration_ms) in finished {
                execution.steps_completed += 1;
                match outcome {
                    Ok(output) => {
                        plan.mark_completed(&step.id);
                        info!(
                            workflow_id = %workflow.id,
                            execution_id = %execution.id,
                            step_id = %step.id,
                            status = "completed",
                            attempts,
                            duration_ms,
                            "Workflow step finished"
                        );
                        execution.results.insert(step.id.clone(), output);
                    }
                    Err(e) => {
                        let skipped = plan.mark_failed(&step.id);
                        warn!(
                            workflow_id = %workflow.id,
                            execution_id = %execution.id,
                            step_id = %step.id,
                            status = "failed",
                            attempts,
                            duration_ms,
                            skipped = ?skipped,
                            error = %e,
                            "Workflow step finished"
                        );
                        execution.errors.insert(step.id.clone(), e.to_string());
                        execution.skipped.extend(skipped);
                    }
                }
            }
        }
    }

    async fn run_step(&self, step: &WorkflowStep, ctx: &StepContext, depth: usize) -> (ConductorResult<serde_json::Value>, u32) {
        let max_attempts = step.retries.saturating_add(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match step.timeout_ms {
                Some(ms) => tokio::time::timeout(Duration::from_millis(ms), self.dispatch(step, ctx, depth))
                    .await
                    .unwrap_or_else(|_| {
                        Err(ConductorError::Transient(format!(
                            "step '{}' timed out after {ms}ms",
                            step.id
                        )))
                    }),
                None => self.dispatch(step, ctx, depth).await,
            };
            match result {
                Err(e) if attempt < max_attempts && worth_retrying(&e) => {
                    warn!(execution_id = %ctx.execution_id, step_id = %step.id, attempt, error = %e, "Workflow step failed, retrying");
                }
                other => return (other, attempt),
            }
        }
    }

    async fn dispatch(&self, step: &WorkflowStep, ctx: &StepContext, depth: usize) -> ConductorResult<serde_json::Value> {
        if let StepKind::Subworkflow { workflow_id } = &step.kind {
            return self.run_subworkflow(workflow_id, ctx, depth).await;
        }
        let handler = self.handlers.get(&step.kind.tag()).ok_or_else(|| {
            ConductorError::Config(format!("no handler registered for {:?} steps", step.kind.tag()))
        })?;
        handler.run(step, ctx).await
    }

    async fn run_subworkflow(&self, workflow_id: &str, ctx: &StepContext, depth: usize) -> ConductorResult<serde_json::Value> {
        if depth + 1 > self.max_depth {
            return Err(ConductorError::Validation(format!(
                "subworkflow '{workflow_id}' exceeds the nesting limit of {}",
                self.max_depth
            )));
        }
        let child = self
            .execute_at_depth(workflow_id.to_string(), ctx.input.clone(), Some(ctx.execution_id), depth + 1)
            .await?;
        if child.status == ExecutionStatus::Completed {
            return Ok(serde_json::json!({
                "execution_id": child.id,
                "status": child.status,
                "results": child.results,
            }));
        }
        let reason = child.error.clone().unwrap_or_else(|| {
            child
                .errors
                .iter()
                .map(|(step, err)| format!("{step}: {err}"))
                .collect::<Vec<_>>()
                .join("; ")
        });
        Err(ConductorError::Execution(format!(
            "subworkflow '{workflow_id}' failed ({}): {reason}",
            child.id
        )))
    }

    async fn announce(&self, signal_type: &str, execution: &WorkflowExecution) {
        let Some(bus) = &self.bus else { return };
        let payload = serde_json::json!({
            "workflow_id": execution.workflow_id,
            "execution_id": execution.id,
            "status": execution.status,
            "steps_completed": execution.steps_completed,
            "steps_total": execution.steps_total,
            "errors": execution.errors,
        });
        if let Err(e) = bus.broadcast(signal_type, payload, ORCHESTRATOR_SENDER).await {
            warn!(execution_id = %execution.id, signal_type, error = %e, "Failed to broadcast workflow signal");
        }
    }
}
