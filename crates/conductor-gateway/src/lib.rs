//! HTTP surface over a [`conductor_orchestrator::Conductor`].
//!
//! Every endpoint answers with the [`ApiResponse`] envelope. Authentication
//! and rate limiting are applied as axum middleware when configured.

pub mod handlers;
pub mod middleware;
pub mod rate_limit;
pub mod response;
pub mod server;

pub use middleware::AuthConfig;
pub use rate_limit::RateLimiter;
pub use response::{ApiError, ApiResponse, ErrorBody};
pub use server::{GatewayConfig, GatewayServer};
