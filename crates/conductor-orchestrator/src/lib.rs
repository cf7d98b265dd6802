//! Workflow execution and scheduling for conductor.
//!
//! [`WorkflowEngine`] runs registered workflows as dependency graphs,
//! dispatching every ready step concurrently through a per-kind
//! [`StepHandler`]. [`AutomationScheduler`] fires automations on interval or
//! cron schedules with at most one run in flight per automation.
//! [`Conductor`] wires these together with the agent registry, the task
//! executor and the signal bus.

pub mod clock;
pub mod conductor;
pub mod engine;
pub mod plan;
pub mod scheduler;
pub mod steps;
pub mod workflow;

pub use clock::{Clock, ManualClock, SystemClock};
pub use conductor::{ActionRunner, Conductor, ConductorBuilder, ExecutorCallHandler};
pub use engine::{WorkflowEngine, DEFAULT_MAX_DEPTH, ORCHESTRATOR_SENDER};
pub use plan::{ExecutionPlan, StepState};
pub use scheduler::{
    AutomationAction, AutomationRunner, AutomationSchedule, AutomationScheduler, AutomationSpec,
    AutomationStatus, AutomationTask, RunOutcome, RunSummary, RunTrigger, RECENT_RESULTS,
};
pub use steps::{AgentTaskHandler, ApiCallHandler, CommandHandler, ManualHandler, StepContext, StepHandler};
pub use workflow::{ExecutionStatus, StepKind, StepKindTag, WorkflowDefinition, WorkflowExecution, WorkflowStep};
