use chrono::{DateTime, Utc};
use conductor_core::{MetricOutcome, PerformanceMetric};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Coarse health derived from an agent's success rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentHealth {
    /// Success rate above 90%.
    Healthy,
    /// Success rate above 70%.
    Degraded,
    /// Success rate at or below 70%.
    Down,
    /// No samples yet.
    Unknown,
}

/// Counters accumulated from [`PerformanceMetric`] samples.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentStats {
    /// Agent these counters belong to. Empty for aggregates.
    pub agent_id: String,
    /// Tasks that ended in success on this agent.
    pub tasks_succeeded: u64,
    /// Tasks that ended in error on this agent.
    pub tasks_failed: u64,
    /// Attempts across all tasks.
    pub total_attempts: u64,
    /// Time spent across all tasks.
    pub total_duration_ms: u64,
    /// Timestamp of the latest sample.
    pub last_seen: Option<DateTime<Utc>>,
}

impl AgentStats {
    /// Number of samples.
    pub fn tasks_total(&self) -> u64 {
        self.tasks_succeeded + self.tasks_failed
    }

    /// Fraction of successful tasks, `None` without samples.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.tasks_total();
        (total > 0).then(|| self.tasks_succeeded as f64 / total as f64)
    }

    /// Mean duration per task.
    pub fn average_duration_ms(&self) -> u64 {
        self.total_duration_ms
            .checked_div(self.tasks_total())
            .unwrap_or(0)
    }

    /// Health classification.
    pub fn health(&self) -> AgentHealth {
        match self.success_rate() {
            None => AgentHealth::Unknown,
            Some(rate) if rate > 0.9 => AgentHealth::Healthy,
            Some(rate) if rate > 0.7 => AgentHealth::Degraded,
            Some(_) => AgentHealth::Down,
        }
    }
}

/// Tracks per-agent performance from executor metrics.
pub struct AgentMonitor {
    stats: Arc<RwLock<HashMap<String, AgentStats>>>,
}

impl AgentMonitor {
    /// Creates an empty monitor.
    pub fn new() -> Self {
        Self {
            stats: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Folds one sample into the agent's counters.
    pub async fn record(&self, metric: &PerformanceMetric) {
        let mut stats = self.stats.write().await;
        let entry = stats
            .entry(metric.agent_id.clone())
            .or_insert_with(|| AgentStats {
                agent_id: metric.agent_id.clone(),
                ..AgentStats::default()
            });
        match metric.outcome {
            MetricOutcome::Success => entry.tasks_succeeded += 1,
            MetricOutcome::Error => entry.tasks_failed += 1,
        }
        entry.total_attempts += u64::from(metric.attempts);
        entry.total_duration_ms += metric.duration_ms;
        entry.last_seen = Some(metric.recorded_at);
    }

    /// Counters of one agent.
    pub async fn get(&self, agent_id: &str) -> Option<AgentStats> {
        self.stats.read().await.get(agent_id).cloned()
    }

    /// Counters of every agent with samples, sorted by agent id.
    pub async fn snapshot(&self) -> Vec<AgentStats> {
        let mut all: Vec<AgentStats> = self.stats.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        all
    }

    /// Totals across all agents.
    pub async fn aggregate(&self) -> AgentStats {
        let stats = self.stats.read().await;
        let mut total = AgentStats::default();
        for s in stats.values() {
            total.tasks_succeeded += s.tasks_succeeded;
            total.tasks_failed += s.tasks_failed;
            total.total_attempts += s.total_attempts;
            total.total_duration_ms += s.total_duration_ms;
            total.last_seen = total.last_seen.max(s.last_seen);
        }
        total
    }

    /// Serialize the current state as JSON, health included.
    pub async fn to_json(&self) -> serde_json::Value {
        let agents: Vec<serde_json::Value> = self
            .snapshot()
            .await
            .into_iter()
            .map(|s| {
                serde_json::json!({
                    "agent_id": s.agent_id,
                    "health": s.health(),
                    "success_rate": s.success_rate(),
                    "average_duration_ms": s.average_duration_ms(),
                    "stats": s,
                })
            })
            .collect();
        let aggregate = self.aggregate().await;
        serde_json::json!({
            "agents": agents,
            "aggregate": aggregate,
        })
    }
}

impl Default for AgentMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn sample(agent: &str, outcome: MetricOutcome, duration_ms: u64) -> PerformanceMetric {
        PerformanceMetric::new(agent, Uuid::new_v4(), duration_ms, 1, outcome)
    }

    #[tokio::test]
    async fn test_initial_state() {
        let monitor = AgentMonitor::new();
        assert!(monitor.snapshot().await.is_empty());
        assert!(monitor.get("coder").await.is_none());
        assert_eq!(monitor.aggregate().await.health(), AgentHealth::Unknown);
    }

    #[tokio::test]
    async fn test_record_metrics() {
        let monitor = AgentMonitor::new();
        monitor.record(&sample("coder", MetricOutcome::Success, 100)).await;
        monitor.record(&sample("coder", MetricOutcome::Error, 300)).await;

        let stats = monitor.get("coder").await.unwrap();
        assert_eq!(stats.tasks_succeeded, 1);
        assert_eq!(stats.tasks_failed, 1);
        assert_eq!(stats.total_attempts, 2);
        assert_eq!(stats.average_duration_ms(), 200);
        assert!(stats.last_seen.is_some());
    }

    #[tokio::test]
    async fn test_health_thresholds() {
        let monitor = AgentMonitor::new();
        for _ in 0..19 {
            monitor.record(&sample("a", MetricOutcome::Success, 1)).await;
        }
        monitor.record(&sample("a", MetricOutcome::Error, 1)).await;
        assert_eq!(monitor.get("a").await.unwrap().health(), AgentHealth::Healthy);

        for _ in 0..8 {
            monitor.record(&sample("b", MetricOutcome::Success, 1)).await;
        }
        for _ in 0..2 {
            monitor.record(&sample("b", MetricOutcome::Error, 1)).await;
        }
        assert_eq!(monitor.get("b").await.unwrap().health(), AgentHealth::Degraded);

        monitor.record(&sample("c", MetricOutcome::Error, 1)).await;
        assert_eq!(monitor.get("c").await.unwrap().health(), AgentHealth::Down);
    }

    #[tokio::test]
    async fn test_aggregate_and_json() {
        let monitor = AgentMonitor::new();
        monitor.record(&sample("b", MetricOutcome::Success, 10)).await;
        monitor.record(&sample("a", MetricOutcome::Error, 20)).await;

        let total = monitor.aggregate().await;
        assert_eq!(total.tasks_total(), 2);
        assert_eq!(total.total_duration_ms, 30);

        let json = monitor.to_json().await;
        assert_eq!(json["agents"][0]["agent_id"], "a");
        assert_eq!(json["agents"][0]["health"], "down");
        assert_eq!(json["agents"][1]["health"], "healthy");
        assert_eq!(json["aggregate"]["tasks_succeeded"], 1);
    }
}
