/// In-process echo binding.
pub mod echo;
/// JSON-over-HTTP binding.
pub mod http;

pub use echo::EchoBackend;
pub use http::HttpBackend;

use crate::config::{AgentConfig, BindingConfig};
use async_trait::async_trait;
use conductor_core::{ConductorResult, Task};
use std::sync::Arc;

/// Trait implemented by every agent call binding.
///
/// The executor owns timeouts and retries; a backend performs exactly one
/// call. Errors should be classified: [`ConductorError::Transient`] for
/// failures worth retrying, [`ConductorError::Agent`] for answers that will
/// not improve on retry.
///
/// To add a new binding:
/// 1. Create a new module in `backends/`
/// 2. Implement `AgentBackend` for your struct
/// 3. Add a variant to [`BindingConfig`] and wire it up in [`build_backend`]
///
/// [`ConductorError::Transient`]: conductor_core::ConductorError::Transient
/// [`ConductorError::Agent`]: conductor_core::ConductorError::Agent
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Invokes the agent once on `task`.
    async fn invoke(&self, task: &Task) -> ConductorResult<serde_json::Value>;
}

/// Builds the backend described by an agent's binding.
pub fn build_backend(config: &AgentConfig) -> ConductorResult<Arc<dyn AgentBackend>> {
    match &config.binding {
        BindingConfig::Echo => Ok(Arc::new(EchoBackend::new(config.id.clone()))),
        BindingConfig::Http {
            url,
            api_key_env,
            headers,
        } => Ok(Arc::new(HttpBackend::from_binding(
            url,
            api_key_env.as_deref(),
            headers,
        )?)),
    }
}
