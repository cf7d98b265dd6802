use crate::backends::AgentBackend;
use crate::config::AgentConfig;
use crate::monitor::AgentMonitor;
use crate::registry::AgentRegistry;
use crate::router::CapabilityRouter;
use conductor_core::{
    ConductorError, ConductorResult, MetricOutcome, PerformanceMetric, RoutingDecision, Task,
    TaskMetadata, TaskResult,
};
use conductor_store::{collections, Collection, RecordStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Type alias for the injectable sleep function used in tests.
#[cfg(test)]
type SleepFn = Box<
    dyn Fn(u64) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> + Send + Sync,
>;

fn default_max_retries() -> u32 {
    2
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_backoff_base_ms() -> u64 {
    250
}

fn default_backoff_max_ms() -> u64 {
    2_000
}

/// Timeout and retry budget for agent calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt, per agent.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Hard limit for a single attempt.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Base delay in milliseconds for exponential backoff.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential backoff).
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_ms: default_timeout_ms(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

/// Computes the backoff delay for a given attempt using exponential backoff
/// capped at `backoff_max_ms`.
pub fn compute_backoff(policy: &RetryPolicy, attempt: u32) -> u64 {
    let delay = policy
        .backoff_base_ms
        .saturating_mul(2u64.saturating_pow(attempt));
    delay.min(policy.backoff_max_ms)
}

/// How the executor chooses the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentSelection {
    /// Ask the router.
    Auto,
    /// Use this agent id.
    Explicit(String),
}

/// Result of running a task against one agent, retries included.
struct AgentRun {
    outcome: ConductorResult<serde_json::Value>,
    attempts: u32,
    duration_ms: u64,
}

/// Runs tasks against agents with a hard timeout and bounded retries.
///
/// Timeouts and transient errors are retried with capped exponential
/// backoff; semantic errors end the run immediately. When an agent exhausts
/// its retries on a transient error, its configured fallbacks are tried in
/// order with the same budget. Every agent run produces one
/// [`PerformanceMetric`], success or not.
pub struct TaskExecutor {
    registry: Arc<AgentRegistry>,
    router: Arc<CapabilityRouter>,
    policy: RetryPolicy,
    monitor: Arc<AgentMonitor>,
    metrics: Option<Collection<PerformanceMetric>>,
    /// Injectable sleep function for testing (allows skipping real delays).
    #[cfg(test)]
    sleep_fn: Option<SleepFn>,
}

impl TaskExecutor {
    /// Creates an executor with its own monitor and no metric persistence.
    pub fn new(
        registry: Arc<AgentRegistry>,
        router: Arc<CapabilityRouter>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            router,
            policy,
            monitor: Arc::new(AgentMonitor::new()),
            metrics: None,
            #[cfg(test)]
            sleep_fn: None,
        }
    }

    /// Shares an existing monitor.
    pub fn with_monitor(mut self, monitor: Arc<AgentMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    /// Persists every metric to the `performance_metrics` collection.
    pub fn with_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.metrics = Some(Collection::new(store, collections::PERFORMANCE_METRICS));
        self
    }

    /// The monitor fed by this executor.
    pub fn monitor(&self) -> &Arc<AgentMonitor> {
        &self.monitor
    }

    /// The router used for [`AgentSelection::Auto`].
    pub fn router(&self) -> &Arc<CapabilityRouter> {
        &self.router
    }

    /// The registry agents are resolved from.
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// The default retry policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Executes one task.
    ///
    /// Returns `Err` only when no agent can be chosen (invalid task, routing
    /// failure, unknown or disabled explicit agent). Once an agent is chosen
    /// the outcome is always an `Ok(TaskResult)`, with status `error` if every
    /// attempt failed.
    pub async fn execute(&self, task: Task, selection: AgentSelection) -> ConductorResult<TaskResult> {
        task.validate()?;

        let (primary, routing) = match selection {
            AgentSelection::Auto => {
                let decision = self.router.route(&task)?;
                info!(
                    task_id = %task.id,
                    agent_id = %decision.agent_id,
                    confidence = decision.confidence,
                    reasoning = %decision.reasoning,
                    "Task routed"
                );
                (decision.agent_id.clone(), Some(decision))
            }
            AgentSelection::Explicit(id) => (id, None),
        };
        let (config, backend) = self.registry.resolve(&primary)?;

        Ok(self.run_chain(&task, config, backend, routing).await)
    }

    async fn run_chain(
        &self,
        task: &Task,
        primary: AgentConfig,
        backend: Arc<dyn AgentBackend>,
        routing: Option<RoutingDecision>,
    ) -> TaskResult {
        let started = Instant::now();
        let fallbacks = self.fallback_chain(&primary);

        let mut total_attempts = 0;
        let mut current = (primary, backend);
        let mut remaining = fallbacks.into_iter();
        loop {
            let (config, backend) = current;
            let run = self.run_on_agent(task, &config, backend.as_ref()).await;
            total_attempts += run.attempts;
            self.record_metric(task, &config.id, &run).await;

            let metadata = |agent_id: &str| TaskMetadata {
                agent_id: Some(agent_id.to_string()),
                duration_ms: started.elapsed().as_millis() as u64,
                retries: total_attempts.saturating_sub(1),
                attempts: total_attempts,
                routing: routing.clone(),
            };

            let err = match run.outcome {
                Ok(output) => {
                    info!(
                        task_id = %task.id,
                        agent_id = %config.id,
                        attempts = total_attempts,
                        duration_ms = started.elapsed().as_millis() as u64,
                        status = "success",
                        "Task finished"
                    );
                    return TaskResult::success(task.id, output, metadata(&config.id));
                }
                Err(err) => err,
            };

            if err.is_retryable() {
                if let Some(next) = remaining.next() {
                    warn!(
                        task_id = %task.id,
                        agent_id = %config.id,
                        fallback_agent_id = %next.0.id,
                        error = %err,
                        "Agent exhausted retries, falling back"
                    );
                    current = next;
                    continue;
                }
            }

            warn!(
                task_id = %task.id,
                agent_id = %config.id,
                attempts = total_attempts,
                duration_ms = started.elapsed().as_millis() as u64,
                status = "error",
                error = %err,
                "Task failed"
            );
            return TaskResult::failure(task.id, err.to_string(), metadata(&config.id));
        }
    }

    /// Enabled fallbacks of `primary`, deduplicated, in declared order.
    fn fallback_chain(&self, primary: &AgentConfig) -> Vec<(AgentConfig, Arc<dyn AgentBackend>)> {
        let mut seen = vec![primary.id.clone()];
        let mut chain = Vec::new();
        for id in &primary.fallbacks {
            if seen.contains(id) {
                continue;
            }
            seen.push(id.clone());
            match self.registry.resolve(id) {
                Ok(entry) => chain.push(entry),
                Err(e) => warn!(agent_id = %primary.id, fallback_agent_id = %id, error = %e, "Skipping fallback"),
            }
        }
        chain
    }

    async fn run_on_agent(
        &self,
        task: &Task,
        config: &AgentConfig,
        backend: &dyn AgentBackend,
    ) -> AgentRun {
        let started = Instant::now();
        let max_retries = config.max_retries.unwrap_or(self.policy.max_retries);
        let timeout = Duration::from_millis(config.timeout_ms.unwrap_or(self.policy.timeout_ms));

        let mut attempts = 0;
        let mut last_err = ConductorError::Execution("no attempt was made".into());
        for attempt in 0..=max_retries {
            attempts += 1;
            let result = match tokio::time::timeout(timeout, backend.invoke(task)).await {
                Ok(result) => result,
                Err(_) => Err(ConductorError::Transient(format!(
                    "agent '{}' timed out after {}ms",
                    config.id,
                    timeout.as_millis()
                ))),
            };

            match result {
                Ok(output) => {
                    return AgentRun {
                        outcome: Ok(output),
                        attempts,
                        duration_ms: started.elapsed().as_millis() as u64,
                    }
                }
                Err(e) if !e.is_retryable() => {
                    warn!(
                        task_id = %task.id,
                        agent_id = %config.id,
                        attempt,
                        error = %e,
                        "Non-retryable agent error"
                    );
                    last_err = e;
                    break;
                }
                Err(e) => {
                    if attempt < max_retries {
                        let delay = compute_backoff(&self.policy, attempt);
                        info!(
                            task_id = %task.id,
                            agent_id = %config.id,
                            attempt,
                            delay_ms = delay,
                            error = %e,
                            "Retryable agent error, backing off"
                        );
                        self.do_sleep(delay).await;
                    }
                    last_err = e;
                }
            }
        }

        AgentRun {
            outcome: Err(last_err),
            attempts,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    async fn record_metric(&self, task: &Task, agent_id: &str, run: &AgentRun) {
        let outcome = if run.outcome.is_ok() {
            MetricOutcome::Success
        } else {
            MetricOutcome::Error
        };
        let metric = PerformanceMetric::new(agent_id, task.id, run.duration_ms, run.attempts, outcome);
        self.monitor.record(&metric).await;
        if let Some(metrics) = &self.metrics {
            if let Err(e) = metrics.create(&metric.id.to_string(), &metric).await {
                warn!(agent_id, task_id = %task.id, error = %e, "Failed to persist performance metric");
            }
        }
    }

    /// Perform a sleep for the given duration in milliseconds.
    async fn do_sleep(&self, ms: u64) {
        #[cfg(test)]
        if let Some(ref f) = self.sleep_fn {
            f(ms).await;
            return;
        }
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}
