#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use conductor_agent::{AgentBackend, AgentConfig, RetryPolicy};
use conductor_core::{Capability, ConductorError, ConductorResult, Task};
use conductor_orchestrator::{Conductor, ExecutionStatus, StepKind, WorkflowDefinition, WorkflowStep};
use conductor_store::FileRecordStore;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Fails every task whose goal mentions "broken".
struct PickyBackend;

#[async_trait]
impl AgentBackend for PickyBackend {
    async fn invoke(&self, task: &Task) -> ConductorResult<serde_json::Value> {
        if task.goal.contains("broken") {
            return Err(ConductorError::Agent("cannot work with this".into()));
        }
        Ok(serde_json::json!({ "done": task.goal }))
    }
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 1,
        timeout_ms: 1_000,
        backoff_base_ms: 1,
        backoff_max_ms: 2,
    }
}

#[tokio::test]
async fn test_mixed_step_workflow_persists_to_disk() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/publish"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"url": "/p/1"})))
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(FileRecordStore::new(tmp.path().to_path_buf()).await.unwrap());
    let conductor = Conductor::builder()
        .agent_with_backend(
            AgentConfig::new("writer", "Writer", vec![Capability::Content]),
            Arc::new(PickyBackend),
        )
        .retry_policy(fast_policy())
        .store(store.clone())
        .workflow(WorkflowDefinition::new(
            "listing",
            "Listing optimisation",
            vec![
                WorkflowStep::new(
                    "rewrite",
                    StepKind::AgentTask {
                        goal: "rewrite the listing title".into(),
                        capability: Some(Capability::Content),
                        agent: None,
                        priority: Default::default(),
                    },
                ),
                WorkflowStep::new(
                    "review",
                    StepKind::Manual {
                        instructions: "check tone".into(),
                    },
                )
                .after(["rewrite"]),
                WorkflowStep::new(
                    "publish",
                    StepKind::ApiCall {
                        method: "POST".into(),
                        url: format!("{}/publish", server.uri()),
                        body: Some(serde_json::json!({"listing": 1})),
                    },
                )
                .after(["review"]),
            ],
        ))
        .build()
        .await
        .unwrap();

    let execution = conductor
        .engine()
        .execute("listing", serde_json::json!({"approvals": ["review"]}))
        .await
        .unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed, "{:?}", execution.errors);
    assert_eq!(execution.results["rewrite"]["output"]["done"], "rewrite the listing title");
    assert_eq!(execution.results["publish"]["status"], 201);

    // Read back through a fresh store over the same directory.
    let reopened = Conductor::builder()
        .agent(AgentConfig::new("writer", "Writer", vec![Capability::Content]))
        .store(Arc::new(FileRecordStore::new(tmp.path().to_path_buf()).await.unwrap()))
        .workflow(WorkflowDefinition::new("listing", "Listing optimisation", vec![]))
        .build()
        .await
        .unwrap();
    let stored = reopened.engine().executions("listing").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, execution.id);
    assert_eq!(stored[0].status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn test_agent_failure_fails_only_its_branch() {
    let conductor = Conductor::builder()
        .agent_with_backend(
            AgentConfig::new("writer", "Writer", vec![Capability::Content]),
            Arc::new(PickyBackend),
        )
        .retry_policy(fast_policy())
        .workflow(WorkflowDefinition::new(
            "content",
            "Content generation",
            vec![
                WorkflowStep::agent_task("a", "research topics"),
                WorkflowStep::agent_task("b", "broken draft").after(["a"]),
                WorkflowStep::agent_task("c", "publish draft").after(["b"]),
            ],
        ))
        .build()
        .await
        .unwrap();

    let execution = conductor
        .engine()
        .execute("content", serde_json::json!({}))
        .await
        .unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.results.contains_key("a"));
    assert!(execution.errors["b"].contains("cannot work with this"));
    assert!(!execution.results.contains_key("c"));
    assert!(!execution.errors.contains_key("c"));

    let stats = conductor.monitor().get("writer").await.unwrap();
    assert_eq!(stats.tasks_succeeded, 1);
    assert_eq!(stats.tasks_failed, 1);
}
