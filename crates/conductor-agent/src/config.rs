use conductor_core::{Capability, ConductorError, ConductorResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How an agent is invoked.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BindingConfig {
    /// In-process binding that echoes the task back. Used for dry runs and demos.
    #[default]
    Echo,
    /// JSON-over-HTTP worker endpoint.
    Http {
        /// Endpoint receiving `POST {"task": ...}`.
        url: String,
        /// Environment variable holding a bearer token.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_key_env: Option<String>,
        /// Extra request headers.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
}

fn default_enabled() -> bool {
    true
}

/// Static description of one agent. Immutable after registration except `enabled`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Unique identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Optional description shown in listings.
    #[serde(default)]
    pub description: String,
    /// Capability tags, deduplicated at registration.
    pub capabilities: Vec<Capability>,
    /// Free-text specialties the router matches against.
    #[serde(default)]
    pub specialties: Vec<String>,
    /// Disabled agents are never routed to.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Call binding.
    #[serde(default)]
    pub binding: BindingConfig,
    /// Overrides the executor's per-attempt timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Overrides the executor's retry budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Agents tried in order when this one exhausts its retries.
    #[serde(default)]
    pub fallbacks: Vec<String>,
}

impl AgentConfig {
    /// Creates an enabled agent with an echo binding.
    pub fn new(id: impl Into<String>, name: impl Into<String>, capabilities: Vec<Capability>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            capabilities,
            specialties: Vec::new(),
            enabled: true,
            binding: BindingConfig::Echo,
            timeout_ms: None,
            max_retries: None,
            fallbacks: Vec::new(),
        }
    }

    /// Sets the free-text specialties.
    pub fn with_specialties<S: Into<String>>(mut self, specialties: impl IntoIterator<Item = S>) -> Self {
        self.specialties = specialties.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the call binding.
    pub fn with_binding(mut self, binding: BindingConfig) -> Self {
        self.binding = binding;
        self
    }

    /// Sets the fallback chain.
    pub fn with_fallbacks<S: Into<String>>(mut self, fallbacks: impl IntoIterator<Item = S>) -> Self {
        self.fallbacks = fallbacks.into_iter().map(Into::into).collect();
        self
    }

    /// Marks the agent as disabled.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Whether the agent declares `capability`.
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Checks the config and deduplicates capability tags.
    pub(crate) fn normalized(mut self) -> ConductorResult<Self> {
        if self.id.trim().is_empty() {
            return Err(ConductorError::Validation("agent id must not be empty".into()));
        }
        if self.capabilities.is_empty() {
            return Err(ConductorError::Validation(format!(
                "agent '{}' declares no capabilities",
                self.id
            )));
        }
        let mut seen = Vec::with_capacity(self.capabilities.len());
        for capability in self.capabilities.drain(..) {
            if !seen.contains(&capability) {
                seen.push(capability);
            }
        }
        self.capabilities = seen;
        if self.name.trim().is_empty() {
            self.name = self.id.clone();
        }
        Ok(self)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_http_binding() {
        let config: AgentConfig = serde_json::from_value(serde_json::json!({
            "id": "coder",
            "name": "Coder",
            "capabilities": ["coding"],
            "binding": {"type": "http", "url": "http://localhost:9000/invoke", "api_key_env": "CODER_KEY"}
        }))
        .unwrap();
        assert!(config.enabled);
        assert_eq!(
            config.binding,
            BindingConfig::Http {
                url: "http://localhost:9000/invoke".into(),
                api_key_env: Some("CODER_KEY".into()),
                headers: BTreeMap::new(),
            }
        );
    }

    #[test]
    fn test_default_binding_is_echo() {
        let config: AgentConfig = serde_json::from_value(serde_json::json!({
            "id": "general", "name": "General", "capabilities": ["general"]
        }))
        .unwrap();
        assert_eq!(config.binding, BindingConfig::Echo);
    }

    #[test]
    fn test_normalized_dedupes_capabilities() {
        let config = AgentConfig::new(
            "a",
            "",
            vec![Capability::Coding, Capability::Data, Capability::Coding],
        )
        .normalized()
        .unwrap();
        assert_eq!(config.capabilities, vec![Capability::Coding, Capability::Data]);
        assert_eq!(config.name, "a");
    }

    #[test]
    fn test_normalized_rejects_empty() {
        assert!(AgentConfig::new("", "x", vec![Capability::Data]).normalized().is_err());
        assert!(AgentConfig::new("x", "x", vec![]).normalized().is_err());
    }
}
