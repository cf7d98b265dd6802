use crate::log::{MemorySignalLog, SignalLog};
use crate::responder::{CallHandler, SyntheticResponder};
use crate::signal::{signal_types, Signal, SignalFilter};
use conductor_agent::{compute_backoff, AgentRegistry, RetryPolicy};
use conductor_core::{ConductorError, ConductorResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

const READ_BATCH: usize = 256;

/// Log and call handler the bus currently runs on.
#[derive(Clone)]
struct Transport {
    log: Arc<dyn SignalLog>,
    responder: Arc<dyn CallHandler>,
}

impl Transport {
    fn in_memory() -> Self {
        Self {
            log: Arc::new(MemorySignalLog::new()),
            responder: Arc::new(SyntheticResponder),
        }
    }
}

/// Answer to a [`SignalBus::call`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallResponse {
    /// The `call_agent` signal.
    pub request_id: Uuid,
    /// The `response` signal.
    pub response_id: Uuid,
    /// Callee.
    pub agent_id: String,
    /// Response payload.
    pub payload: serde_json::Value,
    /// Time from request to response, retries included.
    pub duration_ms: u64,
    /// Attempts made.
    pub attempts: u32,
}

/// Broadcast, directed and request/response messaging between agents.
///
/// The bus holds a durable transport fixed at construction and, in mock
/// mode, a fresh in-memory one. Every operation reads whichever transport is
/// active; nothing else in the bus knows which mode it is in.
pub struct SignalBus {
    registry: Arc<AgentRegistry>,
    durable: Option<Transport>,
    active: RwLock<Transport>,
    mock: AtomicBool,
    /// Bumped on every transport swap so subscriptions can reset their cursor.
    generation: AtomicU64,
    notify: broadcast::Sender<u64>,
    call_policy: RetryPolicy,
}

fn default_call_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 1,
        timeout_ms: 10_000,
        backoff_base_ms: 100,
        backoff_max_ms: 1_000,
    }
}

impl SignalBus {
    /// Creates a bus on a durable log, answering calls with `responder`.
    pub fn new(
        registry: Arc<AgentRegistry>,
        log: Arc<dyn SignalLog>,
        responder: Arc<dyn CallHandler>,
    ) -> Self {
        let durable = Transport { log, responder };
        Self::build(registry, Some(durable.clone()), durable, false)
    }

    /// Creates a bus that only ever runs in mock mode.
    pub fn in_memory(registry: Arc<AgentRegistry>) -> Self {
        Self::build(registry, None, Transport::in_memory(), true)
    }

    fn build(
        registry: Arc<AgentRegistry>,
        durable: Option<Transport>,
        active: Transport,
        mock: bool,
    ) -> Self {
        let (notify, _) = broadcast::channel(READ_BATCH);
        Self {
            registry,
            durable,
            active: RwLock::new(active),
            mock: AtomicBool::new(mock),
            generation: AtomicU64::new(0),
            notify,
            call_policy: default_call_policy(),
        }
    }

    /// Timeout and retry budget applied to each call.
    pub fn with_call_policy(mut self, policy: RetryPolicy) -> Self {
        self.call_policy = policy;
        self
    }

    /// Switches between the durable transport and a fresh in-memory one.
    ///
    /// Entering mock mode always starts from an empty log. Leaving it fails
    /// with a config error when the bus has no durable transport.
    pub fn set_mock_mode(&self, enabled: bool) -> ConductorResult<()> {
        let next = if enabled {
            Transport::in_memory()
        } else {
            self.durable.clone().ok_or_else(|| {
                ConductorError::Config("signal bus has no durable transport".into())
            })?
        };
        *self.active.write() = next;
        self.mock.store(enabled, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        info!(mock = enabled, "Signal bus transport switched");
        Ok(())
    }

    /// Whether the in-memory transport is active.
    pub fn is_mock(&self) -> bool {
        self.mock.load(Ordering::SeqCst)
    }

    fn transport(&self) -> Transport {
        self.active.read().clone()
    }

    async fn publish(&self, transport: &Transport, signal: Signal) -> ConductorResult<Signal> {
        let stored = transport.log.append(signal).await?;
        debug!(
            signal_id = %stored.id,
            seq = stored.seq,
            signal_type = %stored.signal_type,
            from_agent = %stored.from_agent,
            to_agent = ?stored.to_agent,
            "Signal appended"
        );
        // No receivers is fine.
        let _ = self.notify.send(stored.seq);
        Ok(stored)
    }

    fn check_sender(signal_type: &str, from: &str) -> ConductorResult<()> {
        if signal_type.trim().is_empty() {
            return Err(ConductorError::Validation("signal type must not be empty".into()));
        }
        if from.trim().is_empty() {
            return Err(ConductorError::Validation("sender must not be empty".into()));
        }
        Ok(())
    }

    fn check_target(&self, to: &str) -> ConductorResult<()> {
        if self.registry.is_available(to) {
            Ok(())
        } else {
            Err(ConductorError::AgentUnreachable(format!(
                "agent '{to}' is not registered or not enabled"
            )))
        }
    }

    /// Appends a signal visible to every subscriber.
    pub async fn broadcast(
        &self,
        signal_type: &str,
        payload: serde_json::Value,
        from: &str,
    ) -> ConductorResult<Signal> {
        Self::check_sender(signal_type, from)?;
        let transport = self.transport();
        self.publish(&transport, Signal::new(signal_type, from, None, payload))
            .await
    }

    /// Appends a one-way signal for a single agent.
    pub async fn send(
        &self,
        to: &str,
        signal_type: &str,
        payload: serde_json::Value,
        from: &str,
    ) -> ConductorResult<Signal> {
        Self::check_sender(signal_type, from)?;
        self.check_target(to)?;
        let transport = self.transport();
        self.publish(
            &transport,
            Signal::new(signal_type, from, Some(to.to_string()), payload),
        )
        .await
    }

    /// Calls an agent and waits for its answer.
    ///
    /// The request and the answer are both recorded on the log, and the
    /// request is marked processed once answered. Each attempt is bounded by
    /// the call policy's timeout; timeouts and transient errors are retried
    /// within its budget. A final failure is recorded as a `call_failed`
    /// signal before the error is returned.
    pub async fn call(
        &self,
        to: &str,
        payload: serde_json::Value,
        from: &str,
    ) -> ConductorResult<CallResponse> {
        Self::check_sender(signal_types::CALL_AGENT, from)?;
        self.check_target(to)?;
        let transport = self.transport();
        let request = self
            .publish(
                &transport,
                Signal::new(signal_types::CALL_AGENT, from, Some(to.to_string()), payload),
            )
            .await?;

        let started = Instant::now();
        let timeout = Duration::from_millis(self.call_policy.timeout_ms);
        let mut attempts = 0;
        let outcome = loop {
            attempts += 1;
            let result = match tokio::time::timeout(timeout, transport.responder.handle(&request)).await {
                Ok(result) => result,
                Err(_) => Err(ConductorError::Transient(format!(
                    "call to '{to}' timed out after {}ms",
                    timeout.as_millis()
                ))),
            };
            match result {
                Err(e) if e.is_retryable() && attempts <= self.call_policy.max_retries => {
                    let delay = compute_backoff(&self.call_policy, attempts - 1);
                    warn!(signal_id = %request.id, to_agent = %to, attempt = attempts, error = %e, "Call failed, retrying");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                other => break other,
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(answer) => {
                let reply = Signal::new(
                    signal_types::RESPONSE,
                    to,
                    Some(from.to_string()),
                    answer.clone(),
                )
                .in_reply_to(request.id);
                let reply = self.publish(&transport, reply).await?;
                transport.log.mark_processed(request.id).await?;
                info!(signal_id = %request.id, to_agent = %to, duration_ms, attempts, "Call answered");
                Ok(CallResponse {
                    request_id: request.id,
                    response_id: reply.id,
                    agent_id: to.to_string(),
                    payload: answer,
                    duration_ms,
                    attempts,
                })
            }
            Err(e) => {
                let failure = Signal::new(
                    signal_types::CALL_FAILED,
                    to,
                    Some(from.to_string()),
                    serde_json::json!({ "error": e.to_string(), "kind": e.kind() }),
                )
                .in_reply_to(request.id);
                if let Err(log_err) = self.publish(&transport, failure).await {
                    warn!(signal_id = %request.id, error = %log_err, "Failed to record call failure");
                }
                warn!(signal_id = %request.id, to_agent = %to, duration_ms, attempts, error = %e, "Call failed");
                Err(e)
            }
        }
    }

    /// Sets the processed marker on a signal.
    pub async fn ack(&self, signal_id: Uuid) -> ConductorResult<bool> {
        self.transport().log.mark_processed(signal_id).await
    }

    /// Signals matching `filter` on the active transport.
    pub async fn signals(&self, filter: &SignalFilter) -> ConductorResult<Vec<Signal>> {
        self.transport().log.query(filter).await
    }

    /// Subscribes `agent_id` from the start of the log.
    ///
    /// The subscription sees every broadcast, before or after subscribing,
    /// plus signals addressed to `agent_id`.
    pub fn subscribe(self: &Arc<Self>, agent_id: impl Into<String>) -> Subscription {
        Subscription {
            bus: Arc::clone(self),
            agent_id: agent_id.into(),
            cursor: 0,
            generation: self.generation.load(Ordering::SeqCst),
            wakeups: self.notify.subscribe(),
        }
    }
}

/// Cursor over the signal log for one agent.
///
/// Delivery is at-least-once: a signal is handed out once per subscription,
/// but a consumer that crashes before acknowledging will see it again from a
/// new subscription.
pub struct Subscription {
    bus: Arc<SignalBus>,
    agent_id: String,
    cursor: u64,
    generation: u64,
    wakeups: broadcast::Receiver<u64>,
}

impl Subscription {
    /// Subscriber id.
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Signals appended since the last read, without waiting.
    pub async fn poll(&mut self) -> ConductorResult<Vec<Signal>> {
        let generation = self.bus.generation.load(Ordering::SeqCst);
        if generation != self.generation {
            self.generation = generation;
            self.cursor = 0;
        }
        let log = self.bus.transport().log;
        let mut visible = Vec::new();
        loop {
            let batch = log.read_after(self.cursor, READ_BATCH).await?;
            let Some(last) = batch.last() else { break };
            self.cursor = last.seq;
            let done = batch.len() < READ_BATCH;
            visible.extend(batch.into_iter().filter(|s| s.is_visible_to(&self.agent_id)));
            if done {
                break;
            }
        }
        Ok(visible)
    }

    /// Waits until at least one visible signal is available.
    pub async fn next(&mut self) -> ConductorResult<Vec<Signal>> {
        loop {
            let batch = self.poll().await?;
            if !batch.is_empty() {
                return Ok(batch);
            }
            match self.wakeups.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return Ok(Vec::new()),
            }
        }
    }

    /// Acknowledges a delivered signal.
    pub async fn ack(&self, signal: &Signal) -> ConductorResult<bool> {
        self.bus.ack(signal.id).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conductor_agent::AgentConfig;
    use conductor_core::Capability;
    use std::sync::atomic::AtomicU32;

    fn registry() -> Arc<AgentRegistry> {
        let registry = AgentRegistry::new();
        registry
            .register(AgentConfig::new("writer", "Writer", vec![Capability::Content]))
            .unwrap();
        registry
            .register(AgentConfig::new("coder", "Coder", vec![Capability::Coding]).disabled())
            .unwrap();
        Arc::new(registry)
    }

    struct CountingHandler {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl CallHandler for CountingHandler {
        async fn handle(&self, request: &Signal) -> ConductorResult<serde_json::Value> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(ConductorError::Transient("connection reset".into()));
            }
            Ok(serde_json::json!({ "echo": request.payload }))
        }
    }

    fn durable_bus(fail_first: u32) -> (Arc<SignalBus>, Arc<CountingHandler>) {
        let handler = Arc::new(CountingHandler {
            calls: AtomicU32::new(0),
            fail_first,
        });
        let bus = SignalBus::new(registry(), Arc::new(MemorySignalLog::new()), handler.clone())
            .with_call_policy(RetryPolicy {
                max_retries: 2,
                timeout_ms: 500,
                backoff_base_ms: 1,
                backoff_max_ms: 2,
            });
        (Arc::new(bus), handler)
    }

    #[tokio::test]
    async fn test_broadcast_roundtrip() {
        let bus = Arc::new(SignalBus::in_memory(registry()));
        let payload = serde_json::json!({"nested": {"list": [1, "two", null]}, "f": 1.5});
        bus.broadcast("X", payload.clone(), "A").await.unwrap();

        let mut sub = bus.subscribe("anyone");
        let seen = sub.poll().await.unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].signal_type, "X");
        assert_eq!(seen[0].payload, payload);
        assert_eq!(seen[0].from_agent, "A");
        assert!(seen[0].is_broadcast());
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers() {
        let bus = SignalBus::in_memory(registry());
        assert!(bus.broadcast("status", serde_json::json!({}), "writer").await.is_ok());
        assert!(bus.broadcast("", serde_json::json!({}), "writer").await.is_err());
    }

    #[tokio::test]
    async fn test_subscribers_before_and_after() {
        let bus = Arc::new(SignalBus::in_memory(registry()));
        let mut early = bus.subscribe("a");
        bus.broadcast("one", serde_json::json!(1), "x").await.unwrap();
        let mut late = bus.subscribe("b");
        bus.broadcast("two", serde_json::json!(2), "x").await.unwrap();

        assert_eq!(early.poll().await.unwrap().len(), 2);
        assert_eq!(late.poll().await.unwrap().len(), 2);
        assert!(early.poll().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_directed_signals_are_private() {
        let bus = Arc::new(SignalBus::in_memory(registry()));
        bus.send("writer", "brief", serde_json::json!({"topic": "rust"}), "planner")
            .await
            .unwrap();
        let mut writer = bus.subscribe("writer");
        let mut other = bus.subscribe("other");
        assert_eq!(writer.poll().await.unwrap().len(), 1);
        assert!(other.poll().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_per_sender_fifo() {
        let bus = Arc::new(SignalBus::in_memory(registry()));
        let mut handles = Vec::new();
        for sender in ["s1", "s2", "s3"] {
            let bus = bus.clone();
            handles.push(tokio::spawn(async move {
                for n in 0..20 {
                    bus.broadcast("seq", serde_json::json!(n), sender).await.unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let seen = bus.subscribe("reader").poll().await.unwrap();
        assert_eq!(seen.len(), 60);
        for sender in ["s1", "s2", "s3"] {
            let order: Vec<i64> = seen
                .iter()
                .filter(|s| s.from_agent == sender)
                .map(|s| s.payload.as_i64().unwrap())
                .collect();
            assert_eq!(order, (0..20).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn test_next_wakes_on_new_signal() {
        let bus = Arc::new(SignalBus::in_memory(registry()));
        let mut sub = bus.subscribe("listener");
        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher
                .broadcast("late", serde_json::json!("hi"), "p")
                .await
                .unwrap();
        });
        let batch = tokio::time::timeout(Duration::from_secs(2), sub.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch[0].signal_type, "late");
    }

    #[tokio::test]
    async fn test_call_unreachable() {
        let bus = SignalBus::in_memory(registry());
        let err = bus.call("ghost", serde_json::json!({}), "planner").await.unwrap_err();
        assert!(matches!(err, ConductorError::AgentUnreachable(_)));
        let err = bus.call("coder", serde_json::json!({}), "planner").await.unwrap_err();
        assert!(matches!(err, ConductorError::AgentUnreachable(_)));
    }

    #[tokio::test]
    async fn test_mock_call_returns_synthetic_response() {
        let bus = SignalBus::in_memory(registry());
        let response = bus
            .call("writer", serde_json::json!({"goal": "draft"}), "planner")
            .await
            .unwrap();
        assert_eq!(response.payload["status"], "simulated");
        assert_eq!(response.payload["agent"], "writer");

        let log = bus.signals(&SignalFilter::default()).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].signal_type, signal_types::CALL_AGENT);
        assert!(log[0].processed);
        assert_eq!(log[1].signal_type, signal_types::RESPONSE);
        assert_eq!(log[1].reply_to, Some(log[0].id));
        assert_eq!(log[1].to_agent.as_deref(), Some("planner"));
    }

    #[tokio::test]
    async fn test_call_retries_transient() {
        let (bus, handler) = durable_bus(2);
        let response = bus
            .call("writer", serde_json::json!("ping"), "planner")
            .await
            .unwrap();
        assert_eq!(response.attempts, 3);
        assert_eq!(response.payload["echo"], "ping");
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_call_failure_recorded() {
        let (bus, _) = durable_bus(10);
        let err = bus
            .call("writer", serde_json::json!("ping"), "planner")
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        let failures = bus
            .signals(&SignalFilter::default().with_type(signal_types::CALL_FAILED))
            .await
            .unwrap();
        assert_eq!(failures.len(), 1);
    }

    #[tokio::test]
    async fn test_mock_mode_swap() {
        let (bus, handler) = durable_bus(0);
        bus.broadcast("real", serde_json::json!(1), "a").await.unwrap();
        let mut sub = bus.subscribe("reader");
        assert_eq!(sub.poll().await.unwrap().len(), 1);

        bus.set_mock_mode(true).unwrap();
        assert!(bus.is_mock());
        assert!(bus.signals(&SignalFilter::default()).await.unwrap().is_empty());
        let response = bus.call("writer", serde_json::json!("x"), "a").await.unwrap();
        assert_eq!(response.payload["status"], "simulated");
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        // Cursor resets against the new log.
        assert_eq!(sub.poll().await.unwrap().len(), 0);

        bus.set_mock_mode(false).unwrap();
        let durable = bus.signals(&SignalFilter::default()).await.unwrap();
        assert_eq!(durable.len(), 1);
        assert_eq!(durable[0].signal_type, "real");
    }

    #[tokio::test]
    async fn test_in_memory_bus_cannot_leave_mock_mode() {
        let bus = SignalBus::in_memory(registry());
        assert!(matches!(bus.set_mock_mode(false), Err(ConductorError::Config(_))));
        assert!(bus.is_mock());
    }
}
