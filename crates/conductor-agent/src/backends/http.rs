use super::AgentBackend;
use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult, Task};
use reqwest::StatusCode;
use std::collections::BTreeMap;

/// Agent reached over HTTP.
///
/// Sends `POST {"task": <task>}` and expects a JSON body back. A body of the
/// form `{"error": "..."}` is treated as a semantic agent error even with a
/// 2xx status.
pub struct HttpBackend {
    url: String,
    api_key: Option<String>,
    headers: BTreeMap<String, String>,
    http: reqwest::Client,
}

impl HttpBackend {
    /// Creates a backend posting to `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            headers: BTreeMap::new(),
            http: reqwest::Client::new(),
        }
    }

    /// Sends `Authorization: Bearer <key>` on every call.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Adds a request header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub(crate) fn from_binding(
        url: &str,
        api_key_env: Option<&str>,
        headers: &BTreeMap<String, String>,
    ) -> ConductorResult<Self> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConductorError::Config(format!("invalid agent url '{url}'")));
        }
        let mut backend = Self::new(url);
        if let Some(var) = api_key_env {
            let key = std::env::var(var).map_err(|_| {
                ConductorError::Config(format!("environment variable {var} is not set"))
            })?;
            backend = backend.with_api_key(key);
        }
        backend.headers.extend(headers.clone());
        Ok(backend)
    }
}

/// Maps a transport failure onto the retry taxonomy.
fn classify_send_error(err: reqwest::Error) -> ConductorError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        ConductorError::Transient(format!("agent request failed: {err}"))
    } else {
        ConductorError::Http(err.to_string())
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

#[async_trait]
impl AgentBackend for HttpBackend {
    async fn invoke(&self, task: &Task) -> ConductorResult<serde_json::Value> {
        let mut request = self
            .http
            .post(&self.url)
            .json(&serde_json::json!({ "task": task }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }

        let resp = request.send().await.map_err(classify_send_error)?;
        let status = resp.status();
        let text = resp.text().await.map_err(classify_send_error)?;

        if is_transient_status(status) {
            return Err(ConductorError::Transient(format!(
                "agent returned {status}: {text}"
            )));
        }
        if !status.is_success() {
            return Err(ConductorError::Agent(format!("agent returned {status}: {text}")));
        }

        let body: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| ConductorError::Agent(format!("malformed agent response: {e}")))?;
        if let Some(err) = body.get("error").and_then(|e| e.as_str()) {
            return Err(ConductorError::Agent(err.to_string()));
        }
        Ok(body)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use conductor_core::Capability;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn task() -> Task {
        Task::new("write a haiku", Capability::Content)
    }

    #[tokio::test]
    async fn test_http_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/invoke"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(serde_json::json!({"task": {"goal": "write a haiku"}})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"text": "old pond"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let backend = HttpBackend::new(format!("{}/invoke", server.uri())).with_api_key("secret");
        let out = backend.invoke(&task()).await.unwrap();
        assert_eq!(out["text"], "old pond");
    }

    #[tokio::test]
    async fn test_http_503_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = HttpBackend::new(server.uri()).invoke(&task()).await.unwrap_err();
        assert!(matches!(err, ConductorError::Transient(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_http_400_is_semantic() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad task"))
            .mount(&server)
            .await;

        let err = HttpBackend::new(server.uri()).invoke(&task()).await.unwrap_err();
        assert!(matches!(err, ConductorError::Agent(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_http_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = HttpBackend::new(server.uri()).invoke(&task()).await.unwrap_err();
        assert!(matches!(err, ConductorError::Agent(ref m) if m.contains("malformed")));
    }

    #[tokio::test]
    async fn test_http_error_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"error": "capability mismatch"})),
            )
            .mount(&server)
            .await;

        let err = HttpBackend::new(server.uri()).invoke(&task()).await.unwrap_err();
        assert!(matches!(err, ConductorError::Agent(ref m) if m == "capability mismatch"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = HttpBackend::new(format!("http://127.0.0.1:{port}/invoke"))
            .invoke(&task())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_from_binding_rejects_bad_url() {
        let err = HttpBackend::from_binding("ftp://x", None, &BTreeMap::new()).err().unwrap();
        assert!(matches!(err, ConductorError::Config(_)));
    }

    #[test]
    fn test_from_binding_missing_env() {
        let err = HttpBackend::from_binding(
            "http://localhost",
            Some("CONDUCTOR_TEST_UNSET_KEY_VAR"),
            &BTreeMap::new(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ConductorError::Config(_)));
    }
}
