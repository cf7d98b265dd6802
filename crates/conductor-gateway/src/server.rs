use crate::handlers;
use crate::middleware::{auth_middleware, rate_limit_middleware, AuthConfig, MiddlewareState};
use crate::rate_limit::RateLimiter;
use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use conductor_orchestrator::Conductor;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// Middleware settings for the gateway.
#[derive(Clone, Debug, Default)]
pub struct GatewayConfig {
    /// Accepted API keys. Empty disables authentication.
    pub auth: AuthConfig,
    /// `(burst, requests per second)` per API key. `None` disables limiting.
    pub rate_limit: Option<(f64, f64)>,
}

/// The HTTP gateway.
pub struct GatewayServer;

impl GatewayServer {
    /// Build the router without auth or rate limiting.
    pub fn build(conductor: Conductor) -> Router {
        Self::build_with_config(conductor, GatewayConfig::default())
    }

    /// Build the router with optional rate limiting and auth middleware.
    pub fn build_with_config(conductor: Conductor, config: GatewayConfig) -> Router {
        let app = Router::new()
            .route("/health", get(handlers::health))
            .route("/api/agents", get(handlers::list_agents))
            .route("/api/agents/metrics", get(handlers::agent_metrics))
            .route("/api/agents/{id}/enabled", post(handlers::set_agent_enabled))
            .route("/api/tasks", post(handlers::submit_task))
            .route("/api/route", post(handlers::route_task))
            .route("/api/workflows", get(handlers::list_workflows))
            .route("/api/workflows/{id}", get(handlers::get_workflow))
            .route("/api/workflows/{id}/execute", post(handlers::execute_workflow))
            .route("/api/workflows/{id}/executions", get(handlers::list_executions))
            .route("/api/executions/{id}", get(handlers::get_execution))
            .route("/api/automations", get(handlers::list_automations))
            .route("/api/automations/{id}/toggle", post(handlers::toggle_automation))
            .route("/api/automations/{id}/run", post(handlers::run_automation))
            .route("/api/signals", get(handlers::list_signals))
            .route("/api/signals/broadcast", post(handlers::broadcast_signal))
            .route("/api/signals/call", post(handlers::call_agent))
            .with_state(conductor);

        let app = if config.rate_limit.is_some() || config.auth.is_enabled() {
            let (burst, per_second) = config.rate_limit.unwrap_or((1000.0, 1000.0));
            let mw_state = Arc::new(MiddlewareState {
                rate_limiter: Arc::new(RateLimiter::new(burst, per_second)),
                auth: config.auth,
            });

            // Layers run outermost-last: auth first, so the limiter sees the caller key.
            app.layer(axum_mw::from_fn_with_state(
                mw_state.clone(),
                rate_limit_middleware,
            ))
            .layer(axum_mw::from_fn_with_state(mw_state, auth_middleware))
        } else {
            app
        };

        app.layer(
            ServiceBuilder::new().layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                    .on_response(DefaultOnResponse::new().level(Level::INFO)),
            ),
        )
    }
}
