use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Signal types emitted by Conductor itself.
pub mod signal_types {
    /// Request half of a call.
    pub const CALL_AGENT: &str = "call_agent";
    /// Successful reply to a call.
    pub const RESPONSE: &str = "response";
    /// Failed reply to a call.
    pub const CALL_FAILED: &str = "call_failed";
    /// A task was routed and executed.
    pub const TASK_COMPLETED: &str = "task_completed";
    /// A routed task ended in error.
    pub const TASK_FAILED: &str = "task_failed";
    /// A workflow execution started.
    pub const WORKFLOW_STARTED: &str = "workflow_started";
    /// A workflow execution completed.
    pub const WORKFLOW_COMPLETED: &str = "workflow_completed";
    /// A workflow execution failed.
    pub const WORKFLOW_FAILED: &str = "workflow_failed";
}

/// One message on the bus. Append-only apart from `processed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Unique identifier for this signal.
    pub id: Uuid,
    /// Position in the log, assigned on append. Starts at 1.
    #[serde(default)]
    pub seq: u64,
    /// Application-defined signal type.
    #[serde(rename = "type")]
    pub signal_type: String,
    /// Sending agent.
    pub from_agent: String,
    /// Recipient, `None` for a broadcast.
    pub to_agent: Option<String>,
    /// Opaque payload.
    pub payload: serde_json::Value,
    /// Request this signal answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Uuid>,
    /// UTC timestamp of when the signal was created.
    pub created_at: DateTime<Utc>,
    /// Set once a consumer acknowledged the signal.
    #[serde(default)]
    pub processed: bool,
}

impl Signal {
    /// Creates an unsequenced signal.
    pub fn new(
        signal_type: impl Into<String>,
        from_agent: impl Into<String>,
        to_agent: Option<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            seq: 0,
            signal_type: signal_type.into(),
            from_agent: from_agent.into(),
            to_agent,
            payload,
            reply_to: None,
            created_at: Utc::now(),
            processed: false,
        }
    }

    /// Marks this signal as the answer to `request`.
    pub fn in_reply_to(mut self, request: Uuid) -> Self {
        self.reply_to = Some(request);
        self
    }

    /// Returns `true` when the signal has no recipient.
    pub fn is_broadcast(&self) -> bool {
        self.to_agent.is_none()
    }

    /// Whether `agent` should receive this signal.
    pub fn is_visible_to(&self, agent: &str) -> bool {
        self.to_agent.as_deref().map_or(true, |to| to == agent)
    }

    /// Whether `agent` sent or receives this signal.
    pub fn involves(&self, agent: &str) -> bool {
        self.from_agent == agent || self.to_agent.as_deref() == Some(agent)
    }
}

/// Query over the signal log. Empty fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalFilter {
    /// Accepted signal types.
    #[serde(default)]
    pub types: Vec<String>,
    /// Agent appearing as sender or recipient.
    #[serde(default)]
    pub agent: Option<String>,
    /// Inclusive lower bound on `created_at`.
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
    /// Processed flag.
    #[serde(default)]
    pub processed: Option<bool>,
    /// Keep only the most recent `limit` matches.
    #[serde(default)]
    pub limit: Option<usize>,
}

impl SignalFilter {
    /// Restricts to one signal type.
    pub fn with_type(mut self, signal_type: impl Into<String>) -> Self {
        self.types.push(signal_type.into());
        self
    }

    /// Restricts to signals sent or received by `agent`.
    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    /// Restricts to a time window.
    pub fn between(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    /// Keeps only the most recent `limit` matches.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `signal` passes every criterion except `limit`.
    pub fn matches(&self, signal: &Signal) -> bool {
        if !self.types.is_empty() && !self.types.iter().any(|t| *t == signal.signal_type) {
            return false;
        }
        if let Some(agent) = &self.agent {
            if !signal.involves(agent) {
                return false;
            }
        }
        if self.since.is_some_and(|since| signal.created_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| signal.created_at >= until) {
            return false;
        }
        if self.processed.is_some_and(|p| p != signal.processed) {
            return false;
        }
        true
    }

    /// Applies the filter to signals in log order.
    pub fn apply<'a>(&self, signals: impl IntoIterator<Item = &'a Signal>) -> Vec<Signal> {
        let mut matched: Vec<Signal> = signals
            .into_iter()
            .filter(|s| self.matches(s))
            .cloned()
            .collect();
        if let Some(limit) = self.limit {
            let skip = matched.len().saturating_sub(limit);
            matched.drain(..skip);
        }
        matched
    }
}
