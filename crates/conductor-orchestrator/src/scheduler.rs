use crate::clock::Clock;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use conductor_core::{Capability, ConductorError, ConductorResult};
use conductor_store::{collections, Collection, RecordStore};
use cron::Schedule;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Run summaries kept on each task.
pub const RECENT_RESULTS: usize = 10;

fn default_enabled() -> bool {
    true
}

fn default_capability() -> Capability {
    Capability::General
}

/// When an automation becomes due.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AutomationSchedule {
    /// A fixed period after the previous run, or after creation.
    Interval {
        /// Period in seconds.
        seconds: u64,
    },
    /// Cron expression: `sec min hour day-of-month month day-of-week [year]`.
    Cron {
        /// The expression.
        expression: String,
    },
}

impl AutomationSchedule {
    /// Parses a cron expression.
    pub fn parse_cron(expression: &str) -> ConductorResult<Schedule> {
        Schedule::from_str(expression).map_err(|e| {
            ConductorError::Config(format!("Invalid cron expression '{expression}': {e}"))
        })
    }

    /// Rejects zero intervals and unparsable cron expressions.
    pub fn validate(&self) -> ConductorResult<()> {
        match self {
            AutomationSchedule::Interval { seconds: 0 } => Err(ConductorError::Config(
                "automation interval must be at least one second".into(),
            )),
            AutomationSchedule::Interval { .. } => Ok(()),
            AutomationSchedule::Cron { expression } => Self::parse_cron(expression).map(|_| ()),
        }
    }

    /// First due time strictly after `from`.
    pub fn next_after(&self, from: DateTime<Utc>) -> ConductorResult<DateTime<Utc>> {
        match self {
            AutomationSchedule::Interval { seconds } => i64::try_from(*seconds)
                .ok()
                .and_then(ChronoDuration::try_seconds)
                .and_then(|period| from.checked_add_signed(period))
                .ok_or_else(|| ConductorError::Config(format!("interval of {seconds}s is out of range"))),
            AutomationSchedule::Cron { expression } => Self::parse_cron(expression)?
                .after(&from)
                .next()
                .ok_or_else(|| {
                    ConductorError::Config(format!(
                        "Cron expression '{expression}' has no upcoming fire times"
                    ))
                }),
        }
    }
}

/// What an automation does when it fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AutomationAction {
    /// Execute a registered workflow.
    Workflow {
        /// Workflow to run.
        workflow_id: String,
        /// Execution input.
        #[serde(default)]
        input: serde_json::Value,
    },
    /// Execute a single task.
    Task {
        /// Goal text.
        goal: String,
        /// Task type.
        #[serde(default = "default_capability")]
        capability: Capability,
        /// Explicit agent; routed when omitted.
        #[serde(default)]
        agent: Option<String>,
    },
}

/// Declarative automation, as written in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationSpec {
    /// Unique identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
    /// When it runs.
    pub schedule: AutomationSchedule,
    /// What it runs.
    pub action: AutomationAction,
    /// Disabled automations never fire on schedule.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Whether a run is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutomationStatus {
    /// No run in flight.
    Idle,
    /// A run is in flight.
    Running,
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunTrigger {
    /// The scheduler tick.
    Scheduled,
    /// An explicit run-now request.
    Manual,
}

/// Outcome of one automation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique identifier for this run.
    pub run_id: Uuid,
    /// Automation that ran.
    pub automation_id: String,
    /// What started it.
    pub trigger: RunTrigger,
    /// UTC timestamp of when the run was claimed.
    pub started_at: DateTime<Utc>,
    /// UTC timestamp of when the outcome was recorded.
    pub finished_at: DateTime<Utc>,
    /// Whether the action succeeded.
    pub success: bool,
    /// Human-readable outcome.
    pub message: String,
    /// Workflow execution started by the run, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,
}

/// A scheduled automation and its bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationTask {
    /// Unique identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
    /// When it runs.
    pub schedule: AutomationSchedule,
    /// What it runs.
    pub action: AutomationAction,
    /// Disabled automations never fire on schedule.
    pub enabled: bool,
    /// In-flight guard.
    pub status: AutomationStatus,
    /// UTC timestamp of when the automation was added.
    pub created_at: DateTime<Utc>,
    /// When the last run finished.
    pub last_run: Option<DateTime<Utc>>,
    /// When the next scheduled run is due. `None` when the schedule has no
    /// upcoming times.
    pub next_run: Option<DateTime<Utc>>,
    /// Runs finished so far.
    #[serde(default)]
    pub run_count: u64,
    /// Most recent run summaries, oldest first.
    #[serde(default)]
    pub recent_results: Vec<RunSummary>,
}

impl AutomationTask {
    fn from_spec(spec: AutomationSpec, now: DateTime<Utc>) -> ConductorResult<Self> {
        if spec.id.trim().is_empty() {
            return Err(ConductorError::Validation("automation id must not be empty".into()));
        }
        spec.schedule.validate()?;
        let next_run = Some(spec.schedule.next_after(now)?);
        Ok(Self {
            id: spec.id,
            name: spec.name,
            description: spec.description,
            schedule: spec.schedule,
            action: spec.action,
            enabled: spec.enabled,
            status: AutomationStatus::Idle,
            created_at: now,
            last_run: None,
            next_run,
            run_count: 0,
            recent_results: Vec::new(),
        })
    }

    /// Whether the schedule says the task should run at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_run.is_some_and(|next| now >= next)
    }
}

/// Result reported by an [`AutomationRunner`].
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Whether the action succeeded.
    pub success: bool,
    /// Human-readable outcome.
    pub message: String,
    /// Workflow execution started by the run, if any.
    pub execution_id: Option<Uuid>,
}

impl RunOutcome {
    /// A successful outcome.
    pub fn succeeded(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            execution_id: None,
        }
    }

    /// A failed outcome.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            execution_id: None,
        }
    }

    /// Attaches the workflow execution id.
    pub fn with_execution(mut self, execution_id: Uuid) -> Self {
        self.execution_id = Some(execution_id);
        self
    }
}

/// Carries out automation actions.
#[async_trait]
pub trait AutomationRunner: Send + Sync {
    /// Runs `action` on behalf of automation `automation_id`.
    async fn run(&self, automation_id: &str, action: &AutomationAction) -> ConductorResult<RunOutcome>;
}

/// Counts one supervised run as finished when dropped, unwinding included.
struct InFlightGuard(Arc<watch::Sender<usize>>);

impl InFlightGuard {
    fn enter(counter: &Arc<watch::Sender<usize>>) -> Self {
        counter.send_modify(|n| *n += 1);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Fires automations on their schedules, one run per task at a time.
///
/// Each tick scans every task and fires the enabled, idle, due ones without
/// waiting for them. A run executes in its own spawned task; a supervisor
/// records its outcome (errors and panics included), clears the in-flight
/// guard and computes the next due time from the completion time.
pub struct AutomationScheduler {
    tasks: Mutex<Vec<AutomationTask>>,
    runner: Arc<dyn AutomationRunner>,
    clock: Arc<dyn Clock>,
    in_flight: Arc<watch::Sender<usize>>,
    task_store: Option<Collection<AutomationTask>>,
    run_store: Option<Collection<RunSummary>>,
}

impl AutomationScheduler {
    /// Creates an empty scheduler.
    pub fn new(runner: Arc<dyn AutomationRunner>, clock: Arc<dyn Clock>) -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            runner,
            clock,
            in_flight: Arc::new(watch::channel(0).0),
            task_store: None,
            run_store: None,
        }
    }

    /// Persists task state and run summaries to `store`.
    pub fn with_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.task_store = Some(Collection::new(store.clone(), collections::AUTOMATION_TASKS));
        self.run_store = Some(Collection::new(store, collections::AUTOMATION_RUNS));
        self
    }

    /// Adds an automation. Its first run is due one period after now.
    pub async fn add(&self, spec: AutomationSpec) -> ConductorResult<AutomationTask> {
        let task = AutomationTask::from_spec(spec, self.clock.now())?;
        {
            let mut tasks = self.tasks.lock();
            if tasks.iter().any(|t| t.id == task.id) {
                return Err(ConductorError::Validation(format!(
                    "automation '{}' is already registered",
                    task.id
                )));
            }
            tasks.push(task.clone());
        }
        info!(automation_id = %task.id, next_run = ?task.next_run, enabled = task.enabled, "Automation added");
        self.persist_task(&task).await;
        Ok(task)
    }

    /// Restores run bookkeeping of known tasks from the store.
    ///
    /// Returns how many tasks were restored. A run that was in flight when
    /// the state was written is not resumed.
    pub async fn restore(&self) -> ConductorResult<usize> {
        let Some(store) = &self.task_store else {
            return Ok(0);
        };
        let persisted = store.list().await?;
        let mut tasks = self.tasks.lock();
        let mut restored = 0;
        for saved in persisted {
            let Some(task) = tasks.iter_mut().find(|t| t.id == saved.id) else {
                continue;
            };
            task.enabled = saved.enabled;
            task.last_run = saved.last_run;
            task.next_run = saved.next_run;
            task.run_count = saved.run_count;
            task.recent_results = saved.recent_results;
            restored += 1;
        }
        Ok(restored)
    }

    /// Looks up a task.
    pub fn get(&self, id: &str) -> Option<AutomationTask> {
        self.tasks.lock().iter().find(|t| t.id == id).cloned()
    }

    /// All tasks in registration order.
    pub fn list(&self) -> Vec<AutomationTask> {
        self.tasks.lock().clone()
    }

    /// Enables or disables a task. A run already in flight is not affected.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> ConductorResult<AutomationTask> {
        let task = {
            let mut tasks = self.tasks.lock();
            let task = tasks
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or_else(|| ConductorError::NotFound(format!("automation '{id}'")))?;
            task.enabled = enabled;
            task.clone()
        };
        info!(automation_id = %id, enabled, "Automation toggled");
        self.persist_task(&task).await;
        Ok(task)
    }

    /// Number of runs in flight.
    pub fn running(&self) -> usize {
        self.tasks
            .lock()
            .iter()
            .filter(|t| t.status == AutomationStatus::Running)
            .count()
    }

    /// Fires every eligible task and returns their ids.
    ///
    /// Must be called from within a tokio runtime.
    pub fn tick(self: &Arc<Self>) -> Vec<String> {
        let now = self.clock.now();
        let due: Vec<AutomationTask> = {
            let mut tasks = self.tasks.lock();
            tasks
                .iter_mut()
                .filter(|t| t.enabled && t.is_due(now))
                .filter_map(|t| {
                    if t.status == AutomationStatus::Running {
                        debug!(automation_id = %t.id, "Automation due but still running, skipped");
                        return None;
                    }
                    t.status = AutomationStatus::Running;
                    Some(t.clone())
                })
                .collect()
        };

        due.into_iter()
            .map(|task| {
                let id = task.id.clone();
                self.spawn_run(task, RunTrigger::Scheduled, now);
                id
            })
            .collect()
    }

    /// Runs a task now, regardless of its schedule or enabled flag.
    ///
    /// Fails with a validation error while a run of the task is in flight.
    pub fn trigger_now(self: &Arc<Self>, id: &str) -> ConductorResult<Uuid> {
        let now = self.clock.now();
        let task = {
            let mut tasks = self.tasks.lock();
            let task = tasks
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or_else(|| ConductorError::NotFound(format!("automation '{id}'")))?;
            if task.status == AutomationStatus::Running {
                return Err(ConductorError::Validation(format!(
                    "automation '{id}' is already running"
                )));
            }
            task.status = AutomationStatus::Running;
            task.clone()
        };
        Ok(self.spawn_run(task, RunTrigger::Manual, now))
    }

    /// Waits until no run is in flight and every outcome is recorded.
    ///
    /// Runs are detached from the returned future: dropping it stops the
    /// wait, never the runs.
    pub async fn drain(&self) {
        let mut in_flight = self.in_flight.subscribe();
        // The sender lives as long as `self`, so the wait cannot fail.
        let _ = in_flight.wait_for(|n| *n == 0).await;
    }

    /// Ticks every `poll` until the handle is aborted.
    pub fn start(self: Arc<Self>, poll: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                poll_ms = poll.as_millis() as u64,
                automations = self.tasks.lock().len(),
                "Automation scheduler started"
            );
            let mut ticker = tokio::time::interval(poll);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let fired = self.tick();
                if !fired.is_empty() {
                    debug!(fired = ?fired, "Scheduler tick");
                }
            }
        })
    }

    fn spawn_run(self: &Arc<Self>, task: AutomationTask, trigger: RunTrigger, started_at: DateTime<Utc>) -> Uuid {
        let run_id = Uuid::new_v4();
        info!(automation_id = %task.id, run_id = %run_id, trigger = ?trigger, "Automation fired");

        let this = Arc::clone(self);
        let guard = InFlightGuard::enter(&self.in_flight);
        tokio::spawn(async move {
            let _guard = guard;
            this.persist_task(&task).await;
            let runner = Arc::clone(&this.runner);
            let automation_id = task.id.clone();
            let action = task.action.clone();
            let run = tokio::spawn(async move { runner.run(&automation_id, &action).await });
            let outcome = match run.await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => RunOutcome::failed(e.to_string()),
                Err(e) if e.is_panic() => RunOutcome::failed(format!("automation run panicked: {e}")),
                Err(e) => RunOutcome::failed(format!("automation run was cancelled: {e}")),
            };
            this.finish_run(&task.id, run_id, trigger, started_at, outcome).await;
        });
        run_id
    }

    async fn finish_run(
        &self,
        id: &str,
        run_id: Uuid,
        trigger: RunTrigger,
        started_at: DateTime<Utc>,
        outcome: RunOutcome,
    ) {
        let finished_at = self.clock.now();
        let summary = RunSummary {
            run_id,
            automation_id: id.to_string(),
            trigger,
            started_at,
            finished_at,
            success: outcome.success,
            message: outcome.message,
            execution_id: outcome.execution_id,
        };

        let snapshot = {
            let mut tasks = self.tasks.lock();
            let Some(task) = tasks.iter_mut().find(|t| t.id == id) else {
                return;
            };
            task.status = AutomationStatus::Idle;
            task.last_run = Some(finished_at);
            task.next_run = match task.schedule.next_after(finished_at) {
                Ok(next) => Some(next),
                Err(e) => {
                    warn!(automation_id = %id, error = %e, "Automation has no next run");
                    None
                }
            };
            task.run_count += 1;
            task.recent_results.push(summary.clone());
            if task.recent_results.len() > RECENT_RESULTS {
                let excess = task.recent_results.len() - RECENT_RESULTS;
                task.recent_results.drain(..excess);
            }
            task.clone()
        };

        let duration_ms = (finished_at - started_at).num_milliseconds().max(0);
        if summary.success {
            info!(automation_id = %id, run_id = %run_id, status = "success", duration_ms, next_run = ?snapshot.next_run, "Automation run finished");
        } else {
            warn!(automation_id = %id, run_id = %run_id, status = "error", duration_ms, error = %summary.message, "Automation run finished");
        }

        self.persist_task(&snapshot).await;
        if let Some(runs) = &self.run_store {
            if let Err(e) = runs.create(&run_id.to_string(), &summary).await {
                warn!(automation_id = %id, run_id = %run_id, error = %e, "Failed to persist automation run");
            }
        }
    }

    async fn persist_task(&self, task: &AutomationTask) {
        if let Some(store) = &self.task_store {
            if let Err(e) = store.update(&task.id, task).await {
                warn!(automation_id = %task.id, error = %e, "Failed to persist automation");
            }
        }
    }
}
