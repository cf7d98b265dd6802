use crate::backends::{build_backend, AgentBackend};
use crate::config::AgentConfig;
use conductor_core::{Capability, ConductorError, ConductorResult};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

struct AgentEntry {
    config: AgentConfig,
    backend: Arc<dyn AgentBackend>,
}

/// Catalog of registered agents, in registration order.
///
/// Read-mostly: lookups take a shared lock, while `register` and
/// `set_enabled` serialize on the write lock so readers never see a
/// half-updated entry. Registration order doubles as routing priority.
#[derive(Default)]
pub struct AgentRegistry {
    entries: RwLock<Vec<AgentEntry>>,
}

impl AgentRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an agent, building its backend from the configured binding.
    pub fn register(&self, config: AgentConfig) -> ConductorResult<()> {
        let backend = build_backend(&config)?;
        self.register_with_backend(config, backend)
    }

    /// Registers an agent bound to an explicit backend.
    pub fn register_with_backend(
        &self,
        config: AgentConfig,
        backend: Arc<dyn AgentBackend>,
    ) -> ConductorResult<()> {
        let config = config.normalized()?;
        let mut entries = self.entries.write();
        if entries.iter().any(|e| e.config.id == config.id) {
            return Err(ConductorError::Validation(format!(
                "agent '{}' is already registered",
                config.id
            )));
        }
        info!(
            agent_id = %config.id,
            capabilities = ?config.capabilities,
            enabled = config.enabled,
            "Registered agent"
        );
        entries.push(AgentEntry { config, backend });
        Ok(())
    }

    /// Looks up an agent config by id, enabled or not.
    pub fn get(&self, id: &str) -> Option<AgentConfig> {
        self.entries
            .read()
            .iter()
            .find(|e| e.config.id == id)
            .map(|e| e.config.clone())
    }

    /// Config and backend of an agent that may receive work.
    ///
    /// Fails with `NotFound` for an unknown id and `Validation` when the agent
    /// is disabled.
    pub fn resolve(&self, id: &str) -> ConductorResult<(AgentConfig, Arc<dyn AgentBackend>)> {
        let entries = self.entries.read();
        let entry = entries
            .iter()
            .find(|e| e.config.id == id)
            .ok_or_else(|| ConductorError::NotFound(format!("agent '{id}'")))?;
        if !entry.config.enabled {
            return Err(ConductorError::Validation(format!("agent '{id}' is disabled")));
        }
        Ok((entry.config.clone(), Arc::clone(&entry.backend)))
    }

    /// Whether `id` is registered and enabled.
    pub fn is_available(&self, id: &str) -> bool {
        self.entries
            .read()
            .iter()
            .any(|e| e.config.id == id && e.config.enabled)
    }

    /// Enabled agents in registration order.
    pub fn list(&self) -> Vec<AgentConfig> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.config.enabled)
            .map(|e| e.config.clone())
            .collect()
    }

    /// Every agent in registration order, including disabled ones.
    pub fn list_all(&self) -> Vec<AgentConfig> {
        self.entries.read().iter().map(|e| e.config.clone()).collect()
    }

    /// Enabled agents declaring `capability`, in registration order.
    pub fn candidates(&self, capability: Capability) -> Vec<AgentConfig> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.config.enabled && e.config.has_capability(capability))
            .map(|e| e.config.clone())
            .collect()
    }

    /// Enables or disables an agent.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> ConductorResult<()> {
        let mut entries = self.entries.write();
        let entry = entries
            .iter_mut()
            .find(|e| e.config.id == id)
            .ok_or_else(|| ConductorError::NotFound(format!("agent '{id}'")))?;
        entry.config.enabled = enabled;
        info!(agent_id = %id, enabled, "Agent enablement changed");
        Ok(())
    }

    /// Number of registered agents, enabled or not.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if no agent was ever registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn registry() -> AgentRegistry {
        let registry = AgentRegistry::new();
        registry
            .register(AgentConfig::new("coder", "Coder", vec![Capability::Coding]))
            .unwrap();
        registry
            .register(
                AgentConfig::new("analyst", "Analyst", vec![Capability::Analysis, Capability::Data])
                    .disabled(),
            )
            .unwrap();
        registry
            .register(AgentConfig::new("data", "Data", vec![Capability::Data]))
            .unwrap();
        registry
    }

    #[test]
    fn test_list_hides_disabled() {
        let registry = registry();
        let ids: Vec<_> = registry.list().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["coder", "data"]);
        assert_eq!(registry.list_all().len(), 3);
    }

    #[test]
    fn test_duplicate_rejected() {
        let registry = registry();
        let err = registry
            .register(AgentConfig::new("coder", "Again", vec![Capability::Coding]))
            .unwrap_err();
        assert!(matches!(err, ConductorError::Validation(_)));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_set_enabled() {
        let registry = registry();
        registry.set_enabled("analyst", true).unwrap();
        assert!(registry.is_available("analyst"));
        registry.set_enabled("coder", false).unwrap();
        assert!(!registry.is_available("coder"));
        assert!(matches!(
            registry.set_enabled("ghost", true),
            Err(ConductorError::NotFound(_))
        ));
    }

    #[test]
    fn test_resolve() {
        let registry = registry();
        assert!(registry.resolve("coder").is_ok());
        assert!(matches!(registry.resolve("analyst"), Err(ConductorError::Validation(_))));
        assert!(matches!(registry.resolve("ghost"), Err(ConductorError::NotFound(_))));
    }

    #[test]
    fn test_candidates_in_registration_order() {
        let registry = registry();
        let ids: Vec<_> = registry
            .candidates(Capability::Data)
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec!["data"]);

        registry.set_enabled("analyst", true).unwrap();
        let ids: Vec<_> = registry
            .candidates(Capability::Data)
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec!["analyst", "data"]);
    }
}
