use thiserror::Error;

/// A convenience `Result` alias using [`ConductorError`].
pub type ConductorResult<T> = Result<T, ConductorError>;

/// Top-level error type for the Conductor engine.
///
/// Variants follow the failure taxonomy the engine exposes to callers: input
/// problems are surfaced immediately, transient execution failures are the only
/// ones eligible for retry.
#[derive(Error, Debug)]
pub enum ConductorError {
    /// Malformed input (bad payload, duplicate id, disabled target).
    #[error("Validation error: {0}")]
    Validation(String),

    /// An id that does not name any known record.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The router had no enabled agent to hand the task to.
    #[error("No agent available: {0}")]
    NoAgentAvailable(String),

    /// A signal bus target is not registered or not enabled.
    #[error("Agent unreachable: {0}")]
    AgentUnreachable(String),

    /// Timeout, connection reset or an overloaded upstream.
    #[error("Transient execution error: {0}")]
    Transient(String),

    /// The agent answered but the answer is unusable (bad request, malformed output).
    #[error("Agent error: {0}")]
    Agent(String),

    /// A workflow's dependency graph contains a cycle.
    #[error("Workflow cycle: {0}")]
    WorkflowCycle(String),

    /// A step or action failed for a reason other than the above.
    #[error("Execution error: {0}")]
    Execution(String),

    /// An error related to record persistence or lookup.
    #[error("Store error: {0}")]
    Store(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error from an outbound HTTP request.
    #[error("HTTP error: {0}")]
    Http(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConductorError {
    /// Whether a retry of the same call could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ConductorError::Transient(_) => true,
            ConductorError::Http(msg) => {
                let lower = msg.to_lowercase();
                lower.contains("timeout")
                    || lower.contains("timed out")
                    || lower.contains("connection")
                    || lower.contains("429")
                    || lower.contains("502")
                    || lower.contains("503")
                    || lower.contains("504")
            }
            _ => false,
        }
    }

    /// Stable snake_case name of the variant, used in API error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            ConductorError::Validation(_) => "validation_error",
            ConductorError::NotFound(_) => "not_found",
            ConductorError::NoAgentAvailable(_) => "no_agent_available",
            ConductorError::AgentUnreachable(_) => "agent_unreachable",
            ConductorError::Transient(_) => "transient_execution_error",
            ConductorError::Agent(_) => "agent_error",
            ConductorError::WorkflowCycle(_) => "workflow_cycle_error",
            ConductorError::Execution(_) => "execution_error",
            ConductorError::Store(_) => "store_error",
            ConductorError::Config(_) => "config_error",
            ConductorError::Http(_) => "http_error",
            ConductorError::Json(_) => "json_error",
            ConductorError::Io(_) => "io_error",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_is_retryable() {
        assert!(ConductorError::Transient("timed out after 100ms".into()).is_retryable());
    }

    #[test]
    fn test_semantic_errors_not_retryable() {
        assert!(!ConductorError::Agent("malformed output".into()).is_retryable());
        assert!(!ConductorError::Validation("empty goal".into()).is_retryable());
        assert!(!ConductorError::NoAgentAvailable("registry empty".into()).is_retryable());
        assert!(!ConductorError::WorkflowCycle("a -> b -> a".into()).is_retryable());
    }

    #[test]
    fn test_http_classification() {
        assert!(ConductorError::Http("HTTP 503 Service Unavailable".into()).is_retryable());
        assert!(ConductorError::Http("connection reset by peer".into()).is_retryable());
        assert!(!ConductorError::Http("HTTP 400 Bad Request".into()).is_retryable());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ConductorError::NotFound("x".into()).kind(), "not_found");
        assert_eq!(
            ConductorError::AgentUnreachable("x".into()).kind(),
            "agent_unreachable"
        );
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(ConductorError::from(json_err).kind(), "json_error");
    }
}
