//! `sharpbot status` — configuration and readiness.
//!
//! Surfaces the agent-ready flag: a missing/invalid provider key means the
//! gateway runs with the agent disabled, and this command shows why.

use anyhow::Result;
use colored::Colorize;

use sharpbot_core::config::load_config;
use sharpbot_core::utils::get_data_path;
use sharpbot_providers::http_provider::create_provider;
use sharpbot_providers::registry::PROVIDERS;
use sharpbot_providers::LlmProvider;

/// Run the status command.
pub fn run() -> Result<()> {
    let config = load_config(None);
    let data_dir = get_data_path();
    let config_path = data_dir.join("config.json");

    println!();
    println!("{}", "Sharpbot Status".cyan().bold());
    println!();

    // Config
    let config_exists = config_path.exists();
    println!(
        "  {:<18} {} {}",
        "Config:".bold(),
        config_path.display(),
        if config_exists {
            "ok".green().to_string()
        } else {
            "(not found)".red().to_string()
        }
    );

    // Workspace
    let workspace = crate::helpers::expand_tilde(&config.agents.defaults.workspace);
    println!(
        "  {:<18} {} {}",
        "Workspace:".bold(),
        workspace.display(),
        if workspace.exists() {
            "ok".green().to_string()
        } else {
            "(not found)".red().to_string()
        }
    );

    // Model + readiness: can a provider be created for the configured model?
    println!("  {:<18} {}", "Model:".bold(), config.agents.defaults.model);
    let providers_map = config.providers.to_map();
    match create_provider(&config.agents.defaults.model, &providers_map) {
        Ok(provider) => {
            println!(
                "  {:<18} {} ({})",
                "Agent ready:".bold(),
                "yes".green(),
                provider.display_name()
            );
        }
        Err(e) => {
            println!("  {:<18} {}", "Agent ready:".bold(), "no".red());
            println!("  {:<18} {}", "Reason:".bold(), e.to_string().red());
        }
    }

    println!(
        "  {:<18} {} | max_tokens: {}",
        "Parameters:".bold(),
        format!("temp: {}", config.agents.defaults.temperature).dimmed(),
        format!("{}", config.agents.defaults.max_tokens).dimmed(),
    );

    // Providers
    println!();
    println!("  {}", "Providers:".bold());
    for spec in PROVIDERS {
        let status = match providers_map.get(spec.name) {
            Some(prov_config) if prov_config.is_configured() => {
                format!("{} (key set)", "ok".green())
            }
            _ => format!("{}", "- not configured".dimmed()),
        };
        println!("    {:<20} {}", spec.display_name, status);
    }

    // Exec policy
    println!();
    println!(
        "  {:<18} security: {:?}, ask: {:?}, fallback: {:?}",
        "Exec policy:".bold(),
        config.tools.exec.security,
        config.tools.exec.ask,
        config.tools.exec.fallback,
    );
    let allowlist_path = data_dir.join("exec_allowlist.json");
    if allowlist_path.exists() {
        let count = std::fs::read_to_string(&allowlist_path)
            .ok()
            .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
            .and_then(|v| v["allowlist"].as_array().map(|a| a.len()))
            .unwrap_or(0);
        println!("  {:<18} {} entries", "Exec allowlist:".bold(), count);
    }

    // Semantic memory
    println!(
        "  {:<18} {}",
        "Semantic memory:".bold(),
        if config.memory.semantic.enabled {
            format!("enabled ({})", config.memory.semantic.embedding_model)
                .green()
                .to_string()
        } else {
            "disabled".dimmed().to_string()
        }
    );

    // Brave Search
    let brave_status = if config.tools.web.search.api_key.is_empty() {
        format!("{}", "- not configured".dimmed())
    } else {
        format!("{} (key set)", "ok".green())
    };
    println!("  {:<18} {}", "Brave Search:".bold(), brave_status);

    println!();

    Ok(())
}
