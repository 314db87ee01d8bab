//! Gateway command — wires the full runtime together.
//!
//! Startup sequence:
//! 1. Load config, create the message bus
//! 2. Create the LLM provider; a configuration failure leaves the service
//!    alive with the agent disabled (ready flag off, surfaced via `status`)
//! 3. Create the agent loop (tools, sessions, semantic memory, cron)
//! 4. Start: agent task, channel manager + dispatcher, cron, heartbeat
//! 5. Ctrl+C cancels the token tree and shuts everything down

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use sharpbot_agent::memory::VectorMemory;
use sharpbot_agent::{AgentLoop, AgentSettings, SemanticMemory};
use sharpbot_channels::ChannelManager;
use sharpbot_core::bus::queue::MessageBus;
use sharpbot_core::bus::types::OutboundMessage;
use sharpbot_core::config::load_config;
use sharpbot_core::heartbeat::{HeartbeatService, OnHeartbeatFn};
use sharpbot_core::session::SessionManager;
use sharpbot_core::utils::get_data_path;
use sharpbot_cron::{CronJob, CronService};
use sharpbot_providers::embeddings::HttpEmbedder;
use sharpbot_providers::http_provider::create_provider;

use crate::helpers;

/// Run the gateway.
pub async fn run() -> Result<()> {
    println!();
    helpers::print_banner();
    println!("  Mode: Gateway");
    println!();

    // 1. Config + workspace
    let config = Arc::new(load_config(None));
    let defaults = &config.agents.defaults;

    let workspace = helpers::expand_tilde(&defaults.workspace);
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("failed to create workspace: {}", workspace.display()))?;

    // 2. Shared infrastructure
    let bus = Arc::new(MessageBus::new(100));
    let cancel = CancellationToken::new();

    // 3. Provider — a config error keeps the service alive, agent disabled
    let providers_map = config.providers.to_map();
    let provider = match create_provider(&defaults.model, &providers_map) {
        Ok(p) => Some(Arc::new(p)),
        Err(e) => {
            error!(error = %e, "LLM provider not configured; agent disabled");
            println!("  {e}");
            println!("  The gateway will run without the agent. Fix the provider");
            println!("  configuration and restart; `sharpbot status` shows details.");
            None
        }
    };

    // 4. Services around the agent
    let cron_service = Arc::new(CronService::new(bus.clone(), None));

    let semantic_memory: Option<Arc<dyn SemanticMemory>> = if config.memory.semantic.enabled {
        let embedder = Arc::new(HttpEmbedder::new(
            config.providers.openai.api_key.clone(),
            config.memory.semantic.api_base.clone(),
            config.memory.semantic.embedding_model.clone(),
        ));
        Some(Arc::new(VectorMemory::new(
            embedder,
            get_data_path().join("memory").join("chunks.jsonl"),
        )))
    } else {
        None
    };

    let agent_loop = match &provider {
        Some(provider) => {
            let session_manager =
                SessionManager::new(None).context("failed to create session manager")?;
            let settings = AgentSettings::new(config.clone(), workspace.clone());

            Some(Arc::new(AgentLoop::new(
                bus.clone(),
                provider.clone(),
                settings,
                Some(session_manager),
                semantic_memory,
                Some(cron_service.clone()),
                cancel.clone(),
            )))
        }
        None => None,
    };

    // 5. Cron jobs execute through the agent
    if let Some(agent) = &agent_loop {
        let agent = agent.clone();
        cron_service
            .set_on_job(Arc::new(move |job: CronJob| {
                let agent = agent.clone();
                Box::pin(async move {
                    agent.process_direct(&job.payload.message).await
                })
            }))
            .await;
    }

    if let Err(e) = cron_service.load().await {
        warn!(error = %e, "failed to pre-load cron store");
    }
    let cron_jobs = cron_service.list_jobs().await;

    // 6. Heartbeat wakes the agent periodically
    let heartbeat = {
        let callback: Option<OnHeartbeatFn> = agent_loop.as_ref().map(|agent| {
            let agent = agent.clone();
            let f: OnHeartbeatFn = Arc::new(move |prompt: String| {
                let agent = agent.clone();
                Box::pin(async move { agent.process_direct(&prompt).await })
            });
            f
        });
        Arc::new(HeartbeatService::new(
            workspace.clone(),
            callback,
            Some(config.heartbeat.interval),
            config.heartbeat.enabled && agent_loop.is_some(),
        ))
    };

    // 7. Channel manager — concrete protocol adapters register here.
    //    The core ships none; the dispatcher still drains the outbound queue.
    let channel_manager = ChannelManager::new(bus.clone());

    info!(
        model = %defaults.model,
        workspace = %workspace.display(),
        agent_ready = agent_loop.is_some(),
        "gateway starting"
    );

    println!("  Model:     {}", defaults.model);
    println!("  Workspace: {}", workspace.display());
    println!(
        "  Agent:     {}",
        if agent_loop.is_some() { "ready" } else { "disabled" }
    );
    println!("  Channels:  {} registered", channel_manager.len());
    if !cron_jobs.is_empty() {
        let enabled = cron_jobs.iter().filter(|j| j.enabled).count();
        println!("  Cron:      {} jobs ({} enabled)", cron_jobs.len(), enabled);
    }
    println!();
    println!("  Ctrl+C to stop");
    println!();

    // 8. Run everything; Ctrl+C triggers graceful shutdown
    let agent_task = async {
        match &agent_loop {
            Some(agent) => agent.run().await,
            None => {
                // Agent disabled: drain inbound so adapters don't back up,
                // answering with the not-ready notice.
                loop {
                    match bus.consume_inbound().await {
                        Some(msg) => {
                            let notice = OutboundMessage::new(
                                &msg.channel,
                                &msg.chat_id,
                                "Sorry, the agent is not available: no LLM provider is configured.",
                            );
                            let _ = bus.publish_outbound(notice).await;
                        }
                        None => break,
                    }
                }
            }
        }
    };

    tokio::select! {
        _ = agent_task => {
            info!("agent loop exited");
        }
        result = channel_manager.start_all() => {
            if let Err(e) = result {
                error!(error = %e, "channel manager error");
            }
        }
        result = cron_service.start() => {
            if let Err(e) = result {
                error!(error = %e, "cron service error");
            }
        }
        result = heartbeat.start() => {
            if let Err(e) = result {
                error!(error = %e, "heartbeat service error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!();
            println!("  Shutting down...");
            info!("received Ctrl+C, shutting down");
            cancel.cancel();
            heartbeat.stop();
            cron_service.stop().await;
            channel_manager.stop_all().await;
        }
    }

    println!("  Gateway stopped. Goodbye!");
    Ok(())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
