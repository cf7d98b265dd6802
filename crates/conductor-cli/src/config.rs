//! `conductor.toml` layout and the startup checks run against it.

use conductor_a2a::FileSignalLog;
use conductor_agent::{AgentConfig, RetryPolicy, RoutingConfig};
use conductor_core::{ConductorError, ConductorResult};
use conductor_gateway::{AuthConfig, GatewayConfig};
use conductor_orchestrator::{AutomationSpec, Conductor, ConductorBuilder, WorkflowDefinition};
use conductor_store::FileRecordStore;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// File name of the durable signal log inside `data_dir`.
const SIGNAL_LOG_FILE: &str = "signals.jsonl";

/// Top-level configuration file.
#[derive(Debug, Deserialize)]
pub struct ConductorConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub executor: RetryPolicy,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub signals: SignalsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
    #[serde(default)]
    pub workflows: Vec<WorkflowDefinition>,
    #[serde(default)]
    pub automations: Vec<AutomationSpec>,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub api_keys: Vec<String>,
    /// Requests per second per key. Zero disables rate limiting.
    #[serde(default = "default_rps")]
    pub requests_per_second: f64,
    #[serde(default = "default_burst")]
    pub burst: f64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            api_keys: vec![],
            requests_per_second: default_rps(),
            burst: default_burst(),
        }
    }
}

/// Where records and signals live. No `data_dir` keeps everything in memory.
#[derive(Debug, Default, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct SignalsConfig {
    #[serde(default)]
    pub mock: bool,
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    #[serde(default = "default_call_retries")]
    pub call_retries: u32,
}

impl Default for SignalsConfig {
    fn default() -> Self {
        Self {
            mock: false,
            call_timeout_ms: default_call_timeout_ms(),
            call_retries: default_call_retries(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
        }
    }
}

/// Programs `command` steps may run.
#[derive(Debug, Default, Deserialize)]
pub struct CommandsConfig {
    #[serde(default)]
    pub allowed: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_rps() -> f64 {
    10.0
}
fn default_burst() -> f64 {
    50.0
}
fn default_call_timeout_ms() -> u64 {
    10_000
}
fn default_call_retries() -> u32 {
    1
}
fn default_tick_ms() -> u64 {
    60_000
}

fn check_unique<'a>(what: &str, ids: impl IntoIterator<Item = &'a str>) -> ConductorResult<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(ConductorError::Config(format!("duplicate {what} id '{id}'")));
        }
    }
    Ok(())
}

impl ConductorConfig {
    /// Reads and validates a config file.
    pub async fn load(path: &Path) -> ConductorResult<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            ConductorError::Config(format!("failed to read config file '{}': {e}", path.display()))
        })?;
        Self::parse(&raw)
    }

    /// Parses and validates TOML text.
    pub fn parse(raw: &str) -> ConductorResult<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| ConductorError::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Startup checks. Any failure aborts startup.
    pub fn validate(&self) -> ConductorResult<()> {
        if self.agents.is_empty() {
            return Err(ConductorError::Config(
                "at least one [[agents]] entry is required".into(),
            ));
        }
        check_unique("agent", self.agents.iter().map(|a| a.id.as_str()))?;
        check_unique("workflow", self.workflows.iter().map(|w| w.id.as_str()))?;
        check_unique("automation", self.automations.iter().map(|a| a.id.as_str()))?;
        if self.scheduler.tick_ms == 0 {
            return Err(ConductorError::Config("scheduler.tick_ms must be positive".into()));
        }
        if self.security.requests_per_second < 0.0 || self.security.burst < 0.0 {
            return Err(ConductorError::Config(
                "security rate limits must not be negative".into(),
            ));
        }
        Ok(())
    }

    /// Poll period of the automation loop.
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.scheduler.tick_ms)
    }

    /// Middleware settings for the gateway.
    pub fn gateway(&self) -> GatewayConfig {
        let rate_limit = (self.security.requests_per_second > 0.0)
            .then_some((self.security.burst.max(1.0), self.security.requests_per_second));
        GatewayConfig {
            auth: AuthConfig::new(self.security.api_keys.clone()),
            rate_limit,
        }
    }

    fn call_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.signals.call_retries,
            timeout_ms: self.signals.call_timeout_ms,
            backoff_base_ms: 100,
            backoff_max_ms: 1_000,
        }
    }

    /// A builder carrying everything except storage.
    fn builder(self) -> ConductorBuilder {
        let call_policy = self.call_policy();
        let mut builder = Conductor::builder()
            .retry_policy(self.executor)
            .call_policy(call_policy)
            .routing(self.routing)
            .mock_signals(self.signals.mock)
            .allowed_commands(self.commands.allowed);
        for agent in self.agents {
            builder = builder.agent(agent);
        }
        for workflow in self.workflows {
            builder = builder.workflow(workflow);
        }
        for automation in self.automations {
            builder = builder.automation(automation);
        }
        builder
    }

    /// Opens storage and assembles the engine.
    ///
    /// With a `data_dir`, records go to a file store and signals to a JSONL
    /// log in that directory. Without one, both stay in memory.
    pub async fn into_conductor(self) -> ConductorResult<Conductor> {
        let data_dir = self.storage.data_dir.clone();
        let mut builder = self.builder();
        if let Some(dir) = data_dir {
            let store = FileRecordStore::new(dir.join("records")).await?;
            let log = FileSignalLog::open(dir.join(SIGNAL_LOG_FILE)).await?;
            builder = builder.store(Arc::new(store)).signal_log(Arc::new(log));
        }
        builder.build().await
    }
}
