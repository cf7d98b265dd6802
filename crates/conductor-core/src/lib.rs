//! Core types and error definitions for the Conductor orchestration engine.
//!
//! This crate provides the foundational types shared across all Conductor crates:
//! the error taxonomy, the capability vocabulary used for routing, and the task
//! envelope that flows between the router, the executor and the workflow engine.
//!
//! # Main types
//!
//! - [`ConductorError`]: Unified error enum for all Conductor subsystems.
//! - [`ConductorResult`]: Convenience alias for `Result<T, ConductorError>`.
//! - [`Capability`]: Closed set of capability kinds an agent can declare.
//! - [`Task`]: A single unit of work submitted for routing and execution.
//! - [`TaskResult`]: Terminal result envelope produced by the executor.
//! - [`RoutingDecision`]: Selected agent, confidence and reasoning.
//! - [`PerformanceMetric`]: One sample recorded per executed task.

/// Error taxonomy.
pub mod error;
/// Task, result and routing types.
pub mod task;

pub use error::{ConductorError, ConductorResult};
pub use task::{
    Capability, MetricOutcome, PerformanceMetric, Priority, ResultStatus, RoutingDecision, Task,
    TaskMetadata, TaskResult,
};
