use crate::rate_limit::RateLimiter;
use axum::{
    extract::{Query, Request, State},
    http::{header::RETRY_AFTER, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::warn;

use crate::response::{ApiResponse, ErrorBody};

/// Paths reachable without credentials.
const PUBLIC_PATHS: &[&str] = &["/health"];

/// Rate limit bucket for requests without a key.
const ANONYMOUS: &str = "anonymous";

/// Auth configuration for the gateway.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// API keys that are allowed to connect. Empty = no auth required.
    pub api_keys: Vec<String>,
}

impl AuthConfig {
    /// Accepts any of `api_keys`.
    pub fn new(api_keys: Vec<String>) -> Self {
        Self { api_keys }
    }

    /// Returns true if authentication is enabled (at least one key configured).
    pub fn is_enabled(&self) -> bool {
        !self.api_keys.is_empty()
    }
}

/// Shared middleware state.
#[derive(Clone)]
pub struct MiddlewareState {
    /// Per-key limiter.
    pub rate_limiter: Arc<RateLimiter>,
    /// Accepted keys.
    pub auth: AuthConfig,
}

/// The API key a request authenticated with, stored in request extensions.
#[derive(Clone, Debug)]
pub struct CallerKey(pub String);

/// Query parameters consulted by [`auth_middleware`].
#[derive(serde::Deserialize, Default)]
pub struct AuthQuery {
    /// Key passed as `?api_key=`.
    pub api_key: Option<String>,
}

fn reject(status: StatusCode, kind: &str, message: &str) -> Response {
    let body: ApiResponse<()> = ApiResponse {
        success: false,
        result: None,
        message: message.to_string(),
        error: Some(ErrorBody {
            kind: kind.to_string(),
            message: message.to_string(),
        }),
    };
    (status, Json(body)).into_response()
}

/// Auth middleware: validates API key from header or query param.
///
/// Checks `Authorization: Bearer <key>` header first, then `?api_key=<key>` query param.
/// If no API keys are configured, all requests are allowed. `/health` is always allowed.
pub async fn auth_middleware(
    State(state): State<Arc<MiddlewareState>>,
    headers: HeaderMap,
    query: Query<AuthQuery>,
    mut request: Request,
    next: Next,
) -> Response {
    if !state.auth.is_enabled() || PUBLIC_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let key_from_header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string());
    let key = key_from_header.or_else(|| query.api_key.clone());

    match key {
        Some(k) if state.auth.api_keys.contains(&k) => {
            request.extensions_mut().insert(CallerKey(k));
            next.run(request).await
        }
        Some(_) => {
            warn!(path = %request.uri().path(), "Rejected request: invalid API key");
            reject(StatusCode::UNAUTHORIZED, "unauthorized", "Invalid API key")
        }
        None => {
            warn!(path = %request.uri().path(), "Rejected request: missing API key");
            reject(StatusCode::UNAUTHORIZED, "unauthorized", "API key required")
        }
    }
}

/// Rate limiting middleware: one token bucket per API key.
///
/// Requests without a key share a single bucket. Refusals carry a
/// `Retry-After` header in whole seconds.
pub async fn rate_limit_middleware(
    State(state): State<Arc<MiddlewareState>>,
    request: Request,
    next: Next,
) -> Response {
    let key = request
        .extensions()
        .get::<CallerKey>()
        .map_or_else(|| ANONYMOUS.to_string(), |k| k.0.clone());

    if let Err(wait) = state.rate_limiter.check(&key) {
        warn!(path = %request.uri().path(), retry_after_ms = wait.as_millis() as u64, "Rate limited request");
        let mut response = reject(StatusCode::TOO_MANY_REQUESTS, "rate_limited", "Rate limit exceeded");
        let secs = wait.as_secs().saturating_add(u64::from(wait.subsec_nanos() > 0));
        response.headers_mut().insert(RETRY_AFTER, HeaderValue::from(secs));
        return response;
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_config_disabled() {
        let config = AuthConfig::new(vec![]);
        assert!(!config.is_enabled());
    }

    #[test]
    fn test_auth_config_enabled() {
        let config = AuthConfig::new(vec!["key123".to_string()]);
        assert!(config.is_enabled());
    }
}
