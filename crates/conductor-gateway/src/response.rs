use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use conductor_core::ConductorError;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Machine-readable error detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable snake_case error kind.
    pub kind: String,
    /// Human-readable message.
    pub message: String,
}

/// Envelope returned by every API endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the request achieved what it asked for.
    pub success: bool,
    /// The resulting record, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    /// Human-readable summary.
    pub message: String,
    /// Present when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl<T: Serialize> ApiResponse<T> {
    /// A successful response carrying `result`.
    pub fn ok(result: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            result: Some(result),
            message: message.into(),
            error: None,
        }
    }

    /// A failed response that still carries a record, such as a failed execution.
    pub fn failed(result: T, kind: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            result: Some(result),
            error: Some(ErrorBody {
                kind: kind.to_string(),
                message: message.clone(),
            }),
            message,
        }
    }
}

/// HTTP status for an error: validation 400, unknown ids and unreachable agents 404, the rest 500.
pub fn status_for(err: &ConductorError) -> StatusCode {
    match err {
        ConductorError::Validation(_) | ConductorError::Json(_) => StatusCode::BAD_REQUEST,
        ConductorError::NotFound(_) | ConductorError::AgentUnreachable(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// A [`ConductorError`] rendered as an envelope.
#[derive(Debug)]
pub struct ApiError(pub ConductorError);

impl From<ConductorError> for ApiError {
    fn from(err: ConductorError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            warn!(kind = self.0.kind(), error = %self.0, "Request failed");
        }
        let body: ApiResponse<()> = ApiResponse {
            success: false,
            result: None,
            message: self.0.to_string(),
            error: Some(ErrorBody {
                kind: self.0.kind().to_string(),
                message: self.0.to_string(),
            }),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type of every handler.
pub type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

/// `200 OK` with `result`.
pub fn ok<T: Serialize>(result: T, message: impl Into<String>) -> ApiResult<T> {
    Ok((StatusCode::OK, Json(ApiResponse::ok(result, message))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&ConductorError::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&ConductorError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(&ConductorError::AgentUnreachable("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&ConductorError::NoAgentAvailable("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(&ConductorError::Transient("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_envelope_shape() {
        let ok = serde_json::to_value(ApiResponse::ok(3, "done")).unwrap_or_default();
        assert_eq!(ok, serde_json::json!({"success": true, "result": 3, "message": "done"}));

        let failed = serde_json::to_value(ApiResponse::failed("exec", "execution_error", "boom"))
            .unwrap_or_default();
        assert_eq!(failed["success"], false);
        assert_eq!(failed["error"]["kind"], "execution_error");
        assert_eq!(failed["result"], "exec");
    }
}
