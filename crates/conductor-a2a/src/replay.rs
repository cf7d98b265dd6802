use crate::bus::SignalBus;
use crate::signal::{signal_types, Signal, SignalFilter};
use chrono::{DateTime, Utc};
use conductor_agent::AgentRegistry;
use conductor_core::{ConductorError, ConductorResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// How recorded gaps between signals are compressed during replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplaySpeed {
    /// Original gaps, at least 100ms.
    Realtime,
    /// A tenth of the gap, at most 50ms.
    #[default]
    Fast,
    /// A hundredth of the gap, at most 5ms.
    Superfast,
    /// No delay at all.
    Instant,
}

impl ReplaySpeed {
    /// Delay before replaying a signal that originally followed its
    /// predecessor by `gap_ms`.
    pub fn delay_ms(&self, gap_ms: u64) -> u64 {
        match self {
            ReplaySpeed::Realtime => gap_ms.max(100),
            ReplaySpeed::Fast => (gap_ms / 10).min(50),
            ReplaySpeed::Superfast => (gap_ms / 100).min(5),
            ReplaySpeed::Instant => 0,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Replay options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaySettings {
    /// Gap compression.
    #[serde(default)]
    pub speed: ReplaySpeed,
    /// Re-issue recorded calls and let the target bus answer them. When
    /// off, recorded calls and answers are re-emitted verbatim.
    #[serde(default = "default_true")]
    pub simulate_responses: bool,
    /// Pause at the first failing signal.
    #[serde(default)]
    pub auto_pause_on_errors: bool,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            speed: ReplaySpeed::default(),
            simulate_responses: true,
            auto_pause_on_errors: false,
        }
    }
}

/// Lifecycle of a replay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayStatus {
    /// Created, not started.
    Pending,
    /// Replaying.
    Running,
    /// Stopped at an error; `run` resumes after it.
    Paused,
    /// Every signal was replayed.
    Completed,
}

/// Per-agent replay counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentReplayStats {
    /// Signals the agent sent.
    pub sent: u64,
    /// Directed signals the agent received.
    pub received: u64,
    /// Signals involving the agent that failed to replay.
    pub failed: u64,
}

/// A signal that failed to replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayError {
    /// Original signal id.
    pub signal_id: Uuid,
    /// Failure message.
    pub message: String,
}

/// Accumulated outcome of a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayResults {
    /// Signals replayed successfully.
    pub succeeded: u64,
    /// Signals that failed.
    pub failed: u64,
    /// Recorded answers skipped because calls were re-issued.
    pub skipped: u64,
    /// Sum of the delays inserted between signals.
    pub total_delay_ms: u64,
    /// Counters by agent.
    pub agents: BTreeMap<String, AgentReplayStats>,
    /// Failures in replay order.
    pub errors: Vec<ReplayError>,
}

/// A named selection of recorded signals and its replay progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaySession {
    /// Unique identifier for this session.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Signals to replay, in log order.
    pub signals: Vec<Signal>,
    /// Options.
    pub settings: ReplaySettings,
    /// Lifecycle state.
    pub status: ReplayStatus,
    /// Index of the next signal to replay.
    pub position: usize,
    /// Outcome so far.
    pub results: ReplayResults,
    /// UTC timestamp of when the session was created.
    pub created_at: DateTime<Utc>,
}

impl ReplaySession {
    /// Creates a session over `signals`, ordered by sequence number.
    pub fn new(name: impl Into<String>, mut signals: Vec<Signal>, settings: ReplaySettings) -> Self {
        signals.sort_by_key(|s| s.seq);
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            signals,
            settings,
            status: ReplayStatus::Pending,
            position: 0,
            results: ReplayResults::default(),
            created_at: Utc::now(),
        }
    }

    /// Creates a session from the signals of `bus` that match `filter`.
    pub async fn from_bus(
        bus: &SignalBus,
        name: impl Into<String>,
        filter: &SignalFilter,
        settings: ReplaySettings,
    ) -> ConductorResult<Self> {
        let signals = bus.signals(filter).await?;
        Ok(Self::new(name, signals, settings))
    }
}

/// Replays sessions into a disconnected, mock-mode bus.
pub struct SignalReplayer {
    target: Arc<SignalBus>,
}

impl SignalReplayer {
    /// Creates a replayer with a fresh in-memory bus over `registry`.
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self {
            target: Arc::new(SignalBus::in_memory(registry)),
        }
    }

    /// The bus signals are replayed into.
    pub fn target(&self) -> &Arc<SignalBus> {
        &self.target
    }

    /// Replays from the session's position until the end or, with
    /// `auto_pause_on_errors`, the first failure.
    pub async fn run(&self, session: &mut ReplaySession) -> ConductorResult<()> {
        if session.status == ReplayStatus::Completed {
            return Err(ConductorError::Validation(format!(
                "replay session '{}' already completed",
                session.name
            )));
        }
        session.status = ReplayStatus::Running;
        info!(session_id = %session.id, from = session.position, total = session.signals.len(), "Replay started");

        while session.position < session.signals.len() {
            let index = session.position;
            let signal = session.signals[index].clone();
            session.position += 1;

            if index > 0 {
                let previous = &session.signals[index - 1];
                let gap_ms = (signal.created_at - previous.created_at)
                    .num_milliseconds()
                    .max(0) as u64;
                let delay = session.settings.speed.delay_ms(gap_ms);
                if delay > 0 {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    session.results.total_delay_ms += delay;
                }
            }

            let is_answer = signal.signal_type == signal_types::RESPONSE
                || signal.signal_type == signal_types::CALL_FAILED;
            if session.settings.simulate_responses && is_answer {
                session.results.skipped += 1;
                continue;
            }

            let outcome = self.replay_one(&signal, session.settings.simulate_responses).await;
            let results = &mut session.results;
            match outcome {
                Ok(()) => {
                    results.succeeded += 1;
                    results.agents.entry(signal.from_agent.clone()).or_default().sent += 1;
                    if let Some(to) = &signal.to_agent {
                        results.agents.entry(to.clone()).or_default().received += 1;
                    }
                }
                Err(e) => {
                    warn!(session_id = %session.id, signal_id = %signal.id, error = %e, "Replay of signal failed");
                    results.failed += 1;
                    results.agents.entry(signal.from_agent.clone()).or_default().failed += 1;
                    if let Some(to) = &signal.to_agent {
                        results.agents.entry(to.clone()).or_default().failed += 1;
                    }
                    results.errors.push(ReplayError {
                        signal_id: signal.id,
                        message: e.to_string(),
                    });
                    if session.settings.auto_pause_on_errors {
                        session.status = ReplayStatus::Paused;
                        info!(session_id = %session.id, position = session.position, "Replay paused on error");
                        return Ok(());
                    }
                }
            }
        }

        session.status = ReplayStatus::Completed;
        info!(
            session_id = %session.id,
            succeeded = session.results.succeeded,
            failed = session.results.failed,
            "Replay completed"
        );
        Ok(())
    }

    async fn replay_one(&self, signal: &Signal, simulate: bool) -> ConductorResult<()> {
        match (&signal.to_agent, signal.signal_type.as_str()) {
            (Some(to), signal_types::CALL_AGENT) if simulate => {
                self.target
                    .call(to, signal.payload.clone(), &signal.from_agent)
                    .await?;
            }
            (Some(to), _) => {
                self.target
                    .send(to, &signal.signal_type, signal.payload.clone(), &signal.from_agent)
                    .await?;
            }
            (None, _) => {
                self.target
                    .broadcast(&signal.signal_type, signal.payload.clone(), &signal.from_agent)
                    .await?;
            }
        }
        Ok(())
    }

    /// Markdown summary of a session.
    pub fn report(session: &ReplaySession) -> String {
        let r = &session.results;
        let mut out = String::new();
        let _ = writeln!(out, "# Replay report: {}", session.name);
        let _ = writeln!(out);
        let _ = writeln!(out, "- Session: `{}`", session.id);
        let _ = writeln!(out, "- Status: {:?}", session.status);
        let _ = writeln!(out, "- Speed: {:?}", session.settings.speed);
        let _ = writeln!(
            out,
            "- Signals: {} total, {} succeeded, {} failed, {} skipped",
            session.signals.len(),
            r.succeeded,
            r.failed,
            r.skipped
        );
        let _ = writeln!(out, "- Inserted delay: {}ms", r.total_delay_ms);

        if !r.agents.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "## Agents");
            let _ = writeln!(out);
            let _ = writeln!(out, "| Agent | Sent | Received | Failed |");
            let _ = writeln!(out, "|---|---|---|---|");
            for (agent, stats) in &r.agents {
                let _ = writeln!(
                    out,
                    "| {agent} | {} | {} | {} |",
                    stats.sent, stats.received, stats.failed
                );
            }
        }

        if !r.errors.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "## Errors");
            let _ = writeln!(out);
            for err in &r.errors {
                let _ = writeln!(out, "- `{}`: {}", err.signal_id, err.message);
            }
        }
        out
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use conductor_agent::AgentConfig;
    use conductor_core::Capability;

    fn registry() -> Arc<AgentRegistry> {
        let registry = AgentRegistry::new();
        registry
            .register(AgentConfig::new("writer", "Writer", vec![Capability::Content]))
            .unwrap();
        Arc::new(registry)
    }

    fn instant() -> ReplaySettings {
        ReplaySettings {
            speed: ReplaySpeed::Instant,
            ..ReplaySettings::default()
        }
    }

    #[test]
    fn test_speed_delays() {
        assert_eq!(ReplaySpeed::Realtime.delay_ms(20), 100);
        assert_eq!(ReplaySpeed::Realtime.delay_ms(1_500), 1_500);
        assert_eq!(ReplaySpeed::Fast.delay_ms(200), 20);
        assert_eq!(ReplaySpeed::Fast.delay_ms(10_000), 50);
        assert_eq!(ReplaySpeed::Superfast.delay_ms(300), 3);
        assert_eq!(ReplaySpeed::Superfast.delay_ms(10_000), 5);
        assert_eq!(ReplaySpeed::Instant.delay_ms(10_000), 0);
    }

    async fn recorded_bus() -> SignalBus {
        let bus = SignalBus::in_memory(registry());
        bus.broadcast("status", serde_json::json!({"phase": "start"}), "planner")
            .await
            .unwrap();
        bus.call("writer", serde_json::json!({"goal": "draft"}), "planner")
            .await
            .unwrap();
        bus.send("writer", "brief", serde_json::json!("tone: dry"), "planner")
            .await
            .unwrap();
        bus
    }

    #[tokio::test]
    async fn test_replay_with_simulated_responses() {
        let source = recorded_bus().await;
        let mut session =
            ReplaySession::from_bus(&source, "smoke", &SignalFilter::default(), instant())
                .await
                .unwrap();
        assert_eq!(session.signals.len(), 4);

        let replayer = SignalReplayer::new(registry());
        replayer.run(&mut session).await.unwrap();

        assert_eq!(session.status, ReplayStatus::Completed);
        assert_eq!(session.results.succeeded, 3);
        assert_eq!(session.results.skipped, 1);
        assert_eq!(session.results.failed, 0);
        assert_eq!(session.results.agents["planner"].sent, 3);
        assert_eq!(session.results.agents["writer"].received, 2);

        let replayed = replayer.target().signals(&SignalFilter::default()).await.unwrap();
        assert_eq!(replayed.len(), 4);
        assert_eq!(replayed[2].payload["status"], "simulated");
        assert!(replayer.target().is_mock());
    }

    #[tokio::test]
    async fn test_replay_verbatim() {
        let source = recorded_bus().await;
        let settings = ReplaySettings {
            simulate_responses: false,
            ..instant()
        };
        let mut session = ReplaySession::from_bus(&source, "verbatim", &SignalFilter::default(), settings)
            .await
            .unwrap();
        let replayer = SignalReplayer::new(registry());
        // The recorded answer goes back to "planner", which is not registered.
        replayer.run(&mut session).await.unwrap();
        assert_eq!(session.results.succeeded, 3);
        assert_eq!(session.results.failed, 1);
        assert_eq!(session.results.skipped, 0);
    }

    #[tokio::test]
    async fn test_auto_pause_and_resume() {
        let source = SignalBus::in_memory(registry());
        source.broadcast("a", serde_json::json!(1), "x").await.unwrap();
        source.broadcast("b", serde_json::json!(2), "x").await.unwrap();
        let mut signals = source.signals(&SignalFilter::default()).await.unwrap();
        // Addressed to an agent the replay registry does not know.
        signals[0].to_agent = Some("ghost".into());

        let settings = ReplaySettings {
            auto_pause_on_errors: true,
            ..instant()
        };
        let mut session = ReplaySession::new("pause", signals, settings);
        let replayer = SignalReplayer::new(registry());

        replayer.run(&mut session).await.unwrap();
        assert_eq!(session.status, ReplayStatus::Paused);
        assert_eq!(session.position, 1);
        assert_eq!(session.results.errors.len(), 1);

        replayer.run(&mut session).await.unwrap();
        assert_eq!(session.status, ReplayStatus::Completed);
        assert_eq!(session.results.succeeded, 1);
        assert!(replayer.run(&mut session).await.is_err());

        let report = SignalReplayer::report(&session);
        assert!(report.starts_with("# Replay report: pause"));
        assert!(report.contains("| ghost | 0 | 0 | 1 |"));
        assert!(report.contains("## Errors"));
    }
}
