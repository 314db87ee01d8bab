//! Sharpbot CLI — entry point.
//!
//! # Commands
//!
//! - `sharpbot agent [-m MESSAGE]` — chat (single-shot or interactive REPL)
//! - `sharpbot gateway` — run the full runtime (bus, agent, channels, cron)
//! - `sharpbot status` — show configuration, provider readiness, allowlist

mod gateway;
mod helpers;
mod repl;
mod status;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use sharpbot_agent::{AgentLoop, AgentSettings};
use sharpbot_core::bus::queue::MessageBus;
use sharpbot_core::config::{load_config, Config};
use sharpbot_providers::http_provider::create_provider;

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// Sharpbot — multi-channel AI assistant gateway
#[derive(Parser)]
#[command(name = "sharpbot", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the AI agent (single-shot or interactive REPL)
    Agent {
        /// Single message (non-interactive). Omit for REPL mode.
        #[arg(short, long)]
        message: Option<String>,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Show configuration and provider status
    Status,

    /// Start the gateway (all channels + agent loop + services)
    Gateway {
        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },
}

// ─────────────────────────────────────────────
// Entrypoint
// ─────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Agent { message, logs } => {
            init_logging(logs);
            run_agent(message).await
        }
        Commands::Status => status::run(),
        Commands::Gateway { logs } => {
            init_logging(logs);
            gateway::run().await
        }
    }
}

// ─────────────────────────────────────────────
// Agent command
// ─────────────────────────────────────────────

async fn run_agent(message: Option<String>) -> Result<()> {
    let config = Arc::new(load_config(None));
    let agent_loop = build_agent_loop(config)?;

    match message {
        Some(msg) => {
            info!("processing single message");
            let response = agent_loop
                .process_direct(&msg)
                .await
                .context("agent processing failed")?;
            helpers::print_response(&response);
        }
        None => {
            repl::run(agent_loop).await?;
        }
    }

    Ok(())
}

/// Build a standalone `AgentLoop` for CLI chat (no channels, no cron).
pub fn build_agent_loop(config: Arc<Config>) -> Result<AgentLoop> {
    let workspace = helpers::expand_tilde(&config.agents.defaults.workspace);
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("failed to create workspace: {}", workspace.display()))?;

    let providers_map = config.providers.to_map();
    let provider = create_provider(&config.agents.defaults.model, &providers_map)?;

    let settings = AgentSettings::new(config, workspace);
    let bus = Arc::new(MessageBus::new(100));

    Ok(AgentLoop::new(
        bus,
        Arc::new(provider),
        settings,
        None,
        None,
        None,
        CancellationToken::new(),
    ))
}

/// Initialize tracing/logging.
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("sharpbot=debug,info")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
