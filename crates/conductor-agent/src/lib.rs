//! Agent registry, capability routing and task execution for Conductor.
//!
//! Agents are registered once at startup from configuration, each bound to an
//! [`AgentBackend`] that performs the actual call. The [`CapabilityRouter`]
//! picks an agent for a task by token overlap against capability tags and
//! specialties; the [`TaskExecutor`] invokes it under a timeout with bounded
//! retries and records a performance metric for every outcome.
//!
//! # Main types
//!
//! - [`AgentConfig`]: Static description of one agent.
//! - [`AgentRegistry`]: Ordered, read-mostly catalog of agents and their bindings.
//! - [`AgentBackend`]: Trait implemented by every call binding.
//! - [`CapabilityRouter`]: Scores agents against a task and returns a [`RoutingDecision`](conductor_core::RoutingDecision).
//! - [`TaskExecutor`]: Runs one task with timeout, retry and fallback.
//! - [`AgentMonitor`]: Per-agent counters and health derived from metrics.

/// Agent call bindings.
pub mod backends;
/// Agent configuration types.
pub mod config;
/// Timeout, retry and fallback execution.
pub mod executor;
/// Per-agent metrics and health.
pub mod monitor;
/// The agent catalog.
pub mod registry;
/// Capability scoring.
pub mod router;

pub use backends::{AgentBackend, EchoBackend, HttpBackend};
pub use config::{AgentConfig, BindingConfig};
pub use executor::{compute_backoff, AgentSelection, RetryPolicy, TaskExecutor};
pub use monitor::{AgentHealth, AgentMonitor, AgentStats};
pub use registry::AgentRegistry;
pub use router::{CapabilityRouter, RoutingConfig, FALLBACK_REASONING};
