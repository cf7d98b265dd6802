#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Signal bus on the durable JSONL transport.

use conductor_a2a::{
    signal_types, FileSignalLog, SignalBus, SignalFilter, SyntheticResponder,
};
use conductor_agent::{AgentConfig, AgentRegistry};
use conductor_core::Capability;
use std::sync::Arc;

fn registry() -> Arc<AgentRegistry> {
    let registry = AgentRegistry::new();
    registry
        .register(AgentConfig::new("analyst", "Analyst", vec![Capability::Analysis]))
        .unwrap();
    Arc::new(registry)
}

#[tokio::test]
async fn test_signals_survive_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("signals.jsonl");

    {
        let log = Arc::new(FileSignalLog::open(&path).await.unwrap());
        let bus = Arc::new(SignalBus::new(registry(), log, Arc::new(SyntheticResponder)));
        bus.broadcast("X", serde_json::json!({"k": "v"}), "A").await.unwrap();
        bus.call("analyst", serde_json::json!({"goal": "trend"}), "A")
            .await
            .unwrap();
    }

    let log = Arc::new(FileSignalLog::open(&path).await.unwrap());
    let bus = Arc::new(SignalBus::new(registry(), log, Arc::new(SyntheticResponder)));
    let mut sub = bus.subscribe("late-joiner");
    let seen = sub.poll().await.unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].signal_type, "X");
    assert_eq!(seen[0].payload, serde_json::json!({"k": "v"}));
    assert_eq!(seen[0].from_agent, "A");

    let calls = bus
        .signals(&SignalFilter::default().with_type(signal_types::CALL_AGENT))
        .await
        .unwrap();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].processed);

    let answers = bus
        .signals(&SignalFilter::default().with_agent("analyst"))
        .await
        .unwrap();
    assert_eq!(answers.len(), 2);
}

#[tokio::test]
async fn test_ack_through_subscription() {
    let tmp = tempfile::tempdir().unwrap();
    let log = Arc::new(FileSignalLog::open(tmp.path().join("bus.jsonl")).await.unwrap());
    let bus = Arc::new(SignalBus::new(registry(), log, Arc::new(SyntheticResponder)));
    bus.send("analyst", "job", serde_json::json!(7), "scheduler")
        .await
        .unwrap();

    let mut sub = bus.subscribe("analyst");
    let batch = sub.poll().await.unwrap();
    assert_eq!(batch.len(), 1);
    assert!(sub.ack(&batch[0]).await.unwrap());

    let pending = SignalFilter {
        processed: Some(false),
        ..SignalFilter::default()
    };
    assert!(bus.signals(&pending).await.unwrap().is_empty());
}
