use crate::signal::Signal;
use async_trait::async_trait;
use conductor_core::ConductorResult;

/// Produces the answer to a `call_agent` signal.
#[async_trait]
pub trait CallHandler: Send + Sync {
    /// Answers `request`, whose `to_agent` is the callee.
    async fn handle(&self, request: &Signal) -> ConductorResult<serde_json::Value>;
}

/// Deterministic stand-in for a real callee, installed in mock mode.
///
/// The response is schema-valid and derived only from the request, so tests
/// replaying the same signals see the same answers.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyntheticResponder;

impl SyntheticResponder {
    /// Nominal latency reported for a request: 100ms plus 1ms per 100 bytes of payload.
    pub fn simulated_latency_ms(request: &Signal) -> u64 {
        let size = request.payload.to_string().len() as u64;
        100 + size / 100
    }
}

#[async_trait]
impl CallHandler for SyntheticResponder {
    async fn handle(&self, request: &Signal) -> ConductorResult<serde_json::Value> {
        Ok(serde_json::json!({
            "status": "simulated",
            "agent": request.to_agent,
            "request_id": request.id,
            "received": request.payload,
            "simulated_latency_ms": Self::simulated_latency_ms(request),
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_synthetic_response_is_deterministic() {
        let request = Signal::new(
            "call_agent",
            "planner",
            Some("writer".into()),
            serde_json::json!({"goal": "draft"}),
        );
        let a = SyntheticResponder.handle(&request).await.unwrap();
        let b = SyntheticResponder.handle(&request).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a["status"], "simulated");
        assert_eq!(a["agent"], "writer");
        assert_eq!(a["received"]["goal"], "draft");
        assert_eq!(a["simulated_latency_ms"], 100);
    }
}
