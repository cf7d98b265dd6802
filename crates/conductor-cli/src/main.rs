mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use conductor_core::{Capability, Task};
use conductor_gateway::GatewayServer;
use conductor_orchestrator::{AutomationSchedule, ExecutionStatus};
use config::ConductorConfig;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conductor", about = "Conductor: multi-agent orchestration engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "conductor.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway and the automation loop
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// List configured agents
    Agents,
    /// List configured workflows
    Workflows,
    /// List automations and their next run
    Automations,
    /// Execute a workflow once and print the execution record
    Run {
        /// Workflow id
        workflow: String,
        /// Execution input as JSON
        #[arg(long, default_value = "{}")]
        input: String,
    },
    /// Show which agent a goal would be routed to
    Route {
        /// Task goal
        goal: String,
        /// Task type
        #[arg(long, default_value = "general")]
        capability: String,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; agent bindings may read keys from the real environment.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = ConductorConfig::load(&cli.config)
        .await
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            let gateway = config.gateway();
            let tick = config.tick();
            if gateway.auth.is_enabled() {
                info!(keys = gateway.auth.api_keys.len(), "API key auth enabled");
            }

            let conductor = config.into_conductor().await?;
            let scheduler = conductor.scheduler().clone();
            let ticker = scheduler.clone().start(tick);

            let app = GatewayServer::build_with_config(conductor, gateway);
            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("binding {addr}"))?;
            info!(%addr, tick_ms = tick.as_millis() as u64, "Conductor gateway listening");

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            ticker.abort();
            scheduler.drain().await;
            info!("Conductor stopped");
        }
        Commands::Agents => {
            let conductor = config.into_conductor().await?;
            let agents = conductor.registry().list_all();
            println!("Registered agents:");
            for agent in &agents {
                let capabilities: Vec<&str> = agent.capabilities.iter().map(Capability::as_str).collect();
                let state = if agent.enabled { "enabled" } else { "disabled" };
                println!("  {} ({}) [{}] {}", agent.id, agent.name, capabilities.join(", "), state);
                if !agent.specialties.is_empty() {
                    println!("    specialties: {}", agent.specialties.join(", "));
                }
            }
            println!("\nTotal: {} agent(s)", agents.len());
        }
        Commands::Workflows => {
            let conductor = config.into_conductor().await?;
            let workflows = conductor.engine().list();
            if workflows.is_empty() {
                println!("No workflows configured.");
                println!("Configure workflows in conductor.toml under [[workflows]]");
            }
            for workflow in &workflows {
                let state = if workflow.enabled { "" } else { " (disabled)" };
                println!("  {}: {}{}", workflow.id, workflow.name, state);
                for step in &workflow.steps {
                    let deps = if step.depends_on.is_empty() {
                        String::new()
                    } else {
                        format!(" after {}", step.depends_on.join(", "))
                    };
                    println!("    - {} [{:?}]{}", step.id, step.kind.tag(), deps);
                }
            }
        }
        Commands::Automations => {
            let conductor = config.into_conductor().await?;
            let automations = conductor.scheduler().list();
            if automations.is_empty() {
                println!("No automations configured.");
            }
            for task in &automations {
                let schedule = match &task.schedule {
                    AutomationSchedule::Interval { seconds } => format!("every {seconds}s"),
                    AutomationSchedule::Cron { expression } => format!("cron '{expression}'"),
                };
                let state = if task.enabled { "enabled" } else { "disabled" };
                let next = task
                    .next_run
                    .map_or_else(|| "-".to_string(), |at| at.to_rfc3339());
                println!(
                    "  {}: {} [{}] {}, next run {}, {} run(s)",
                    task.id,
                    task.name,
                    schedule,
                    state,
                    next,
                    task.run_count
                );
            }
        }
        Commands::Run { workflow, input } => {
            let input: serde_json::Value =
                serde_json::from_str(&input).context("--input must be valid JSON")?;
            let conductor = config.into_conductor().await?;
            let execution = conductor.engine().execute(&workflow, input).await?;
            println!("{}", serde_json::to_string_pretty(&execution)?);
            if execution.status != ExecutionStatus::Completed {
                anyhow::bail!(
                    "workflow '{workflow}' {}",
                    execution.error.as_deref().unwrap_or("failed")
                );
            }
        }
        Commands::Route { goal, capability } => {
            let capability: Capability = capability.parse()?;
            let conductor = config.into_conductor().await?;
            let task = Task::new(goal, capability);
            let decision = conductor.route(&task)?;
            println!(
                "{} (confidence {:.2}): {}",
                decision.agent_id, decision.confidence, decision.reasoning
            );
        }
    }

    Ok(())
}
