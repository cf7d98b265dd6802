use crate::config::AgentConfig;
use crate::registry::AgentRegistry;
use conductor_core::{Capability, ConductorError, ConductorResult, RoutingDecision, Task};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Reasoning attached to every fallback decision.
pub const FALLBACK_REASONING: &str = "no strong match, using default";

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "into", "is", "it", "me",
    "my", "of", "on", "or", "our", "please", "that", "the", "this", "to", "with",
];

fn default_min_score() -> f64 {
    0.0
}

fn default_match_base_confidence() -> f64 {
    0.5
}

fn default_fallback_confidence() -> f64 {
    0.3
}

fn default_agent() -> String {
    "general".to_string()
}

/// Router thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// A match must score strictly above this to beat the fallback.
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    /// Confidence floor for any real match; the score fills the rest up to 1.
    #[serde(default = "default_match_base_confidence")]
    pub match_base_confidence: f64,
    /// Confidence reported when the default agent is used.
    #[serde(default = "default_fallback_confidence")]
    pub fallback_confidence: f64,
    /// Id of the designated default agent.
    #[serde(default = "default_agent")]
    pub default_agent: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            min_score: default_min_score(),
            match_base_confidence: default_match_base_confidence(),
            fallback_confidence: default_fallback_confidence(),
            default_agent: default_agent(),
        }
    }
}

/// Lowercased alphanumeric tokens, without stopwords.
pub(crate) fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

fn task_tokens(task: &Task) -> BTreeSet<String> {
    let mut tokens = tokenize(&task.goal);
    // `general` expresses no preference.
    if task.capability != Capability::General {
        tokens.insert(task.capability.as_str().to_string());
    }
    tokens
}

fn agent_tokens(agent: &AgentConfig) -> BTreeSet<String> {
    let mut tokens: BTreeSet<String> = agent
        .capabilities
        .iter()
        .map(|c| c.as_str().to_string())
        .collect();
    for specialty in &agent.specialties {
        tokens.extend(tokenize(specialty));
    }
    tokens
}

/// Picks an agent for a task by token overlap.
///
/// Each enabled agent is scored as `overlap / |agent tokens|`, where agent
/// tokens are its capability tags plus its tokenized specialties and task
/// tokens are the task type plus its tokenized goal. The best score wins;
/// ties go to the agent registered first.
pub struct CapabilityRouter {
    registry: Arc<AgentRegistry>,
    config: RoutingConfig,
}

impl CapabilityRouter {
    /// Creates a router over `registry`.
    pub fn new(registry: Arc<AgentRegistry>, config: RoutingConfig) -> Self {
        Self { registry, config }
    }

    /// The active thresholds.
    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    /// Routes a task. Disabled agents are never returned.
    pub fn route(&self, task: &Task) -> ConductorResult<RoutingDecision> {
        let agents = self.registry.list();
        if agents.is_empty() {
            return Err(ConductorError::NoAgentAvailable(
                "no enabled agents are registered".into(),
            ));
        }

        let wanted = task_tokens(task);
        let mut best: Option<(f64, &AgentConfig, Vec<String>)> = None;
        for agent in &agents {
            let offered = agent_tokens(agent);
            if offered.is_empty() {
                continue;
            }
            let overlap: Vec<String> = wanted.intersection(&offered).cloned().collect();
            if overlap.is_empty() {
                continue;
            }
            let score = overlap.len() as f64 / offered.len() as f64;
            debug!(task_id = %task.id, agent_id = %agent.id, score, "Scored agent");
            if score <= self.config.min_score {
                continue;
            }
            // Strictly greater keeps the earlier registration on ties.
            if best.as_ref().map_or(true, |(s, _, _)| score > *s) {
                best = Some((score, agent, overlap));
            }
        }

        if let Some((score, agent, overlap)) = best {
            let base = self.config.match_base_confidence;
            let confidence = (base + (1.0 - base) * score).clamp(0.0, 1.0);
            return Ok(RoutingDecision {
                agent_id: agent.id.clone(),
                confidence,
                reasoning: format!(
                    "matched [{}] against {} ({} of {} tokens)",
                    overlap.join(", "),
                    agent.name,
                    overlap.len(),
                    agent_tokens(agent).len()
                ),
            });
        }

        self.fallback(&agents)
    }

    fn fallback(&self, agents: &[AgentConfig]) -> ConductorResult<RoutingDecision> {
        let default = agents
            .iter()
            .find(|a| a.id == self.config.default_agent)
            .or_else(|| agents.iter().find(|a| a.has_capability(Capability::General)))
            .ok_or_else(|| {
                ConductorError::NoAgentAvailable(format!(
                    "no agent matched and default agent '{}' is not available",
                    self.config.default_agent
                ))
            })?;
        Ok(RoutingDecision {
            agent_id: default.id.clone(),
            confidence: self.config.fallback_confidence,
            reasoning: FALLBACK_REASONING.to_string(),
        })
    }
}
