//! Configuration schema.
//!
//! Hierarchy: `Config` → `AgentsConfig`, `ProvidersConfig`, channels map,
//! `ToolsConfig`, `SkillsConfig`, `MemoryConfig`, `HeartbeatConfig`,
//! `GatewayConfig`.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case.
//! `#[serde(rename_all = "camelCase")]` handles the conversion.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─────────────────────────────────────────────
// Root Config
// ─────────────────────────────────────────────

/// Root configuration — loaded from `~/.sharpbot/config.json` + env vars.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub agents: AgentsConfig,
    pub providers: ProvidersConfig,
    /// Per-channel adapter settings, keyed by channel name
    /// (`telegram`, `slack`, `discord`, `whatsapp`, `feishu`, `gmail`, `web`).
    pub channels: HashMap<String, ChannelConfig>,
    pub tools: ToolsConfig,
    pub skills: SkillsConfig,
    pub memory: MemoryConfig,
    pub heartbeat: HeartbeatConfig,
    pub gateway: GatewayConfig,
}

impl Config {
    /// Resolve a dot-path (e.g. `"tools.web.search.apiKey"`) against the
    /// serialized form of this config and report whether it is truthy.
    ///
    /// Falsy: missing path, `null`, `false`, `0`, `0.0`, `""`, empty array or
    /// object. Everything else is truthy. Skill `config` requirements use
    /// this instead of reflection-style lookups.
    pub fn is_truthy(&self, dot_path: &str) -> bool {
        let root = match serde_json::to_value(self) {
            Ok(v) => v,
            Err(_) => return false,
        };

        let mut current = &root;
        for segment in dot_path.split('.') {
            match current.get(segment) {
                Some(next) => current = next,
                None => return false,
            }
        }

        match current {
            serde_json::Value::Null => false,
            serde_json::Value::Bool(b) => *b,
            serde_json::Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
            serde_json::Value::String(s) => !s.is_empty(),
            serde_json::Value::Array(a) => !a.is_empty(),
            serde_json::Value::Object(o) => !o.is_empty(),
        }
    }
}

// ─────────────────────────────────────────────
// Agents
// ─────────────────────────────────────────────

/// Agent configuration container.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentsConfig {
    pub defaults: AgentDefaults,
}

/// Default agent settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentDefaults {
    /// Default workspace directory.
    pub workspace: String,
    /// Default LLM model identifier.
    pub model: String,
    /// Maximum tokens to generate per response.
    pub max_tokens: u32,
    /// Sampling temperature (0.0 – 2.0).
    pub temperature: f64,
    /// Maximum tool-calling loop iterations before forcing a response.
    pub max_tool_iterations: u32,
    /// How many history messages to load per turn.
    pub max_history_messages: u32,
    /// Per-model request overrides (exact match wins over substring match).
    pub model_overrides: Vec<ModelOverrideEntry>,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            workspace: "~/.sharpbot/workspace".to_string(),
            model: "anthropic/claude-sonnet-4-20250514".to_string(),
            max_tokens: 8192,
            temperature: 0.7,
            max_tool_iterations: 20,
            max_history_messages: 50,
            model_overrides: Vec::new(),
        }
    }
}

/// Per-model override of request parameters.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelOverrideEntry {
    /// Model name to match: exact first, then case-insensitive substring.
    #[serde(rename = "match")]
    pub match_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl AgentDefaults {
    /// Resolve `(max_tokens, temperature)` for a model, applying overrides.
    ///
    /// Resolution order: exact model-name match, then case-insensitive
    /// substring match; first hit wins.
    pub fn resolve_request_params(&self, model: &str) -> (u32, f64) {
        if let Some(ovr) = self
            .model_overrides
            .iter()
            .find(|o| o.match_model == model)
        {
            return (
                ovr.max_tokens.unwrap_or(self.max_tokens),
                ovr.temperature.unwrap_or(self.temperature),
            );
        }

        let model_lower = model.to_lowercase();
        if let Some(ovr) = self
            .model_overrides
            .iter()
            .find(|o| !o.match_model.is_empty()
                && model_lower.contains(&o.match_model.to_lowercase()))
        {
            return (
                ovr.max_tokens.unwrap_or(self.max_tokens),
                ovr.temperature.unwrap_or(self.temperature),
            );
        }

        (self.max_tokens, self.temperature)
    }
}

// ─────────────────────────────────────────────
// Providers
// ─────────────────────────────────────────────

/// Configuration for a single LLM provider (API key, base URL, headers).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    /// API key for authentication.
    #[serde(default)]
    pub api_key: String,
    /// Custom API base URL (overrides provider default).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// Extra HTTP headers to send with each request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_headers: Option<HashMap<String, String>>,
}

impl ProviderConfig {
    /// Whether this provider has a configured API key.
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

/// All provider configurations — one `ProviderConfig` per supported backend.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub anthropic: ProviderConfig,
    #[serde(default)]
    pub openai: ProviderConfig,
    #[serde(default)]
    pub openrouter: ProviderConfig,
    #[serde(default)]
    pub deepseek: ProviderConfig,
    #[serde(default)]
    pub groq: ProviderConfig,
    #[serde(default)]
    pub zhipu: ProviderConfig,
    #[serde(default)]
    pub dashscope: ProviderConfig,
    #[serde(default)]
    pub vllm: ProviderConfig,
    #[serde(default)]
    pub gemini: ProviderConfig,
    #[serde(default)]
    pub moonshot: ProviderConfig,
    #[serde(default)]
    pub minimax: ProviderConfig,
    #[serde(default)]
    pub aihubmix: ProviderConfig,
}

impl ProvidersConfig {
    /// Get a provider config by name (e.g. `"anthropic"`).
    pub fn get_by_name(&self, name: &str) -> Option<&ProviderConfig> {
        match name {
            "anthropic" => Some(&self.anthropic),
            "openai" => Some(&self.openai),
            "openrouter" => Some(&self.openrouter),
            "deepseek" => Some(&self.deepseek),
            "groq" => Some(&self.groq),
            "zhipu" => Some(&self.zhipu),
            "dashscope" => Some(&self.dashscope),
            "vllm" => Some(&self.vllm),
            "gemini" => Some(&self.gemini),
            "moonshot" => Some(&self.moonshot),
            "minimax" => Some(&self.minimax),
            "aihubmix" => Some(&self.aihubmix),
            _ => None,
        }
    }

    /// Convert to a map for use with the provider registry.
    pub fn to_map(&self) -> HashMap<String, ProviderConfig> {
        let entries: &[(&str, &ProviderConfig)] = &[
            ("anthropic", &self.anthropic),
            ("openai", &self.openai),
            ("openrouter", &self.openrouter),
            ("deepseek", &self.deepseek),
            ("groq", &self.groq),
            ("zhipu", &self.zhipu),
            ("dashscope", &self.dashscope),
            ("vllm", &self.vllm),
            ("gemini", &self.gemini),
            ("moonshot", &self.moonshot),
            ("minimax", &self.minimax),
            ("aihubmix", &self.aihubmix),
        ];
        entries
            .iter()
            .map(|(name, config)| (name.to_string(), (*config).clone()))
            .collect()
    }
}

// ─────────────────────────────────────────────
// Channels
// ─────────────────────────────────────────────

/// Generic per-channel adapter configuration.
///
/// Concrete adapters interpret `token` according to their protocol; the
/// allow-list supports `|`-separated aliases per entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub allowed_users: Vec<String>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            token: String::new(),
            allowed_users: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

// ─────────────────────────────────────────────
// Tools
// ─────────────────────────────────────────────

/// Tool configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolsConfig {
    /// Web tools configuration (search, fetch, http).
    #[serde(default)]
    pub web: WebToolsConfig,
    /// Shell exec tool configuration.
    #[serde(default)]
    pub exec: ExecConfig,
    /// Browser automation configuration.
    #[serde(default)]
    pub browser: BrowserConfig,
    /// Whether to restrict file/exec operations to the workspace directory.
    #[serde(default)]
    pub restrict_to_workspace: bool,
}

/// Web tools configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebToolsConfig {
    #[serde(default)]
    pub search: WebSearchConfig,
}

/// Web search configuration (Brave API).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebSearchConfig {
    /// Brave Search API key.
    #[serde(default)]
    pub api_key: String,
    /// Maximum number of search results to return.
    pub max_results: u32,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            max_results: 5,
        }
    }
}

/// How exec decides whether a command may run at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecSecurity {
    /// Never execute anything.
    Deny,
    /// Execute only allowlisted executables (possibly after approval).
    Allowlist,
    /// Execute everything the guards let through.
    Full,
}

/// When exec asks the operator for approval.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecAsk {
    /// Never ask; the fallback policy decides on an allowlist miss.
    Off,
    /// Ask only when the executable is not on the allowlist.
    OnMiss,
    /// Ask for every command.
    Always,
}

/// What happens when no approval decision arrives in time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecFallback {
    Allow,
    Deny,
}

/// Shell exec tool configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecConfig {
    /// Foreground timeout in seconds.
    pub timeout: u64,
    /// Security mode.
    pub security: ExecSecurity,
    /// Approval prompting mode.
    pub ask: ExecAsk,
    /// Policy applied on approval timeout or when asking is off.
    pub fallback: ExecFallback,
    /// How long to wait for an approval decision, in seconds.
    pub approval_timeout: u64,
    /// Watchdog limit for background sessions, in seconds.
    pub max_background_seconds: u64,
    /// How long finished sessions linger before the reaper removes them.
    pub session_ttl_seconds: u64,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            timeout: 60,
            security: ExecSecurity::Full,
            ask: ExecAsk::Off,
            fallback: ExecFallback::Deny,
            approval_timeout: 120,
            max_background_seconds: 30 * 60,
            session_ttl_seconds: 10 * 60,
        }
    }
}

/// Browser automation configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrowserConfig {
    /// Whether the browser tool suite is registered.
    #[serde(default)]
    pub enabled: bool,
    /// Run the browser headless.
    #[serde(default = "default_true")]
    pub headless: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            headless: true,
        }
    }
}

// ─────────────────────────────────────────────
// Skills
// ─────────────────────────────────────────────

/// Skill system configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SkillsConfig {
    /// Directory of skills bundled with the install (builtin tier).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub builtin_dir: Option<String>,
    /// Additional skill directories (extra tier, lowest priority).
    #[serde(default)]
    pub extra_dirs: Vec<String>,
    /// Per-skill configuration, keyed by skill name (lowercase).
    #[serde(default)]
    pub entries: HashMap<String, SkillConfigEntry>,
}

/// Per-skill configuration entry.
///
/// An `api_key` satisfies the skill's declared `primaryEnv` requirement;
/// the `env` map is injected for the duration of each turn.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SkillConfigEntry {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl SkillsConfig {
    /// Look up a skill entry by name, case-insensitively.
    pub fn entry(&self, name: &str) -> Option<&SkillConfigEntry> {
        let lower = name.to_lowercase();
        self.entries
            .iter()
            .find(|(k, _)| k.to_lowercase() == lower)
            .map(|(_, v)| v)
    }
}

// ─────────────────────────────────────────────
// Memory
// ─────────────────────────────────────────────

/// Memory configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryConfig {
    #[serde(default)]
    pub semantic: SemanticMemoryConfig,
}

/// Semantic (embedding-backed) memory configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SemanticMemoryConfig {
    /// Whether semantic memory is enabled.
    #[serde(default)]
    pub enabled: bool,
    /// Embedding model identifier.
    pub embedding_model: String,
    /// Embeddings API base (OpenAI-compatible `/embeddings`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// How many hits to inject into the system prompt.
    pub top_k: u32,
    /// Minimum cosine score for an injected hit.
    pub min_score: f32,
}

impl Default for SemanticMemoryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            embedding_model: "text-embedding-3-small".to_string(),
            api_base: None,
            top_k: 5,
            min_score: 0.35,
        }
    }
}

// ─────────────────────────────────────────────
// Heartbeat
// ─────────────────────────────────────────────

/// Heartbeat configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between heartbeat ticks.
    pub interval: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: 30 * 60,
        }
    }
}

// ─────────────────────────────────────────────
// Gateway
// ─────────────────────────────────────────────

/// HTTP gateway configuration (status interface / webhooks).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    /// Listen address.
    pub host: String,
    /// Listen port.
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 18790,
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.agents.defaults.max_tokens, 8192);
        assert_eq!(config.agents.defaults.temperature, 0.7);
        assert_eq!(config.agents.defaults.max_tool_iterations, 20);
        assert_eq!(config.agents.defaults.max_history_messages, 50);
        assert_eq!(config.tools.exec.timeout, 60);
        assert_eq!(config.tools.exec.security, ExecSecurity::Full);
        assert_eq!(config.tools.exec.ask, ExecAsk::Off);
        assert!(!config.tools.restrict_to_workspace);
        assert!(!config.memory.semantic.enabled);
    }

    #[test]
    fn test_config_from_json_camel_case() {
        let json = serde_json::json!({
            "agents": {
                "defaults": {
                    "model": "gpt-4o",
                    "maxTokens": 4096,
                    "temperature": 0.5,
                    "maxToolIterations": 10,
                    "maxHistoryMessages": 25
                }
            },
            "gateway": { "host": "127.0.0.1", "port": 9090 }
        });

        let config: Config = serde_json::from_value(json).unwrap();
        assert_eq!(config.agents.defaults.model, "gpt-4o");
        assert_eq!(config.agents.defaults.max_tokens, 4096);
        assert_eq!(config.agents.defaults.max_history_messages, 25);
        assert_eq!(config.gateway.port, 9090);
        // Defaults preserved for missing sections
        assert_eq!(config.tools.exec.timeout, 60);
    }

    #[test]
    fn test_exec_policy_from_json() {
        let json = serde_json::json!({
            "tools": {
                "exec": {
                    "security": "allowlist",
                    "ask": "on-miss",
                    "fallback": "deny",
                    "approvalTimeout": 30
                }
            }
        });

        let config: Config = serde_json::from_value(json).unwrap();
        assert_eq!(config.tools.exec.security, ExecSecurity::Allowlist);
        assert_eq!(config.tools.exec.ask, ExecAsk::OnMiss);
        assert_eq!(config.tools.exec.fallback, ExecFallback::Deny);
        assert_eq!(config.tools.exec.approval_timeout, 30);
    }

    #[test]
    fn test_config_serialization_round_trip() {
        let config = Config::default();
        let json_str = serde_json::to_string_pretty(&config).unwrap();
        let deserialized: Config = serde_json::from_str(&json_str).unwrap();
        assert_eq!(deserialized.agents.defaults.model, config.agents.defaults.model);
        assert_eq!(deserialized.tools.exec.timeout, config.tools.exec.timeout);
    }

    #[test]
    fn test_config_json_uses_camel_case() {
        let config = Config::default();
        let json = serde_json::to_value(&config).unwrap();
        assert!(json["agents"]["defaults"].get("maxTokens").is_some());
        assert!(json["tools"].get("restrictToWorkspace").is_some());
        assert!(json["agents"]["defaults"].get("max_tokens").is_none());
    }

    #[test]
    fn test_provider_config_is_configured() {
        let empty = ProviderConfig::default();
        assert!(!empty.is_configured());

        let with_key = ProviderConfig {
            api_key: "sk-123".to_string(),
            ..Default::default()
        };
        assert!(with_key.is_configured());
    }

    #[test]
    fn test_providers_get_by_name() {
        let mut providers = ProvidersConfig::default();
        providers.anthropic.api_key = "sk-ant-123".to_string();

        assert!(providers.get_by_name("anthropic").unwrap().is_configured());
        assert!(!providers.get_by_name("openai").unwrap().is_configured());
        assert!(providers.get_by_name("nonexistent").is_none());
    }

    #[test]
    fn test_channel_config_map() {
        let json = serde_json::json!({
            "channels": {
                "telegram": {
                    "token": "bot123:ABC",
                    "allowedUsers": ["user1|alias1", "user2"]
                }
            }
        });

        let config: Config = serde_json::from_value(json).unwrap();
        let tg = config.channels.get("telegram").unwrap();
        assert_eq!(tg.token, "bot123:ABC");
        assert_eq!(tg.allowed_users.len(), 2);
        assert!(tg.enabled);
    }

    // ── Model overrides ──

    fn defaults_with_overrides() -> AgentDefaults {
        AgentDefaults {
            model_overrides: vec![
                ModelOverrideEntry {
                    match_model: "gpt-4o-mini".into(),
                    max_tokens: Some(2048),
                    temperature: None,
                },
                ModelOverrideEntry {
                    match_model: "Kimi".into(),
                    max_tokens: None,
                    temperature: Some(1.0),
                },
            ],
            ..AgentDefaults::default()
        }
    }

    #[test]
    fn test_model_override_exact_match() {
        let d = defaults_with_overrides();
        let (max_tokens, temperature) = d.resolve_request_params("gpt-4o-mini");
        assert_eq!(max_tokens, 2048);
        assert_eq!(temperature, 0.7);
    }

    #[test]
    fn test_model_override_substring_case_insensitive() {
        let d = defaults_with_overrides();
        let (max_tokens, temperature) = d.resolve_request_params("moonshot/kimi-k2.5");
        assert_eq!(max_tokens, 8192);
        assert_eq!(temperature, 1.0);
    }

    #[test]
    fn test_model_override_exact_beats_substring() {
        let mut d = defaults_with_overrides();
        d.model_overrides.push(ModelOverrideEntry {
            match_model: "gpt".into(),
            max_tokens: Some(512),
            temperature: None,
        });
        // "gpt-4o-mini" matches both the exact entry and the "gpt" substring;
        // exact wins.
        let (max_tokens, _) = d.resolve_request_params("gpt-4o-mini");
        assert_eq!(max_tokens, 2048);
    }

    #[test]
    fn test_model_override_no_match_uses_defaults() {
        let d = defaults_with_overrides();
        let (max_tokens, temperature) = d.resolve_request_params("deepseek-chat");
        assert_eq!(max_tokens, 8192);
        assert_eq!(temperature, 0.7);
    }

    #[test]
    fn test_model_override_json_uses_match_key() {
        let json = serde_json::json!({
            "agents": {
                "defaults": {
                    "modelOverrides": [
                        { "match": "glm-4", "temperature": 0.3 }
                    ]
                }
            }
        });
        let config: Config = serde_json::from_value(json).unwrap();
        assert_eq!(config.agents.defaults.model_overrides.len(), 1);
        assert_eq!(config.agents.defaults.model_overrides[0].match_model, "glm-4");
    }

    // ── is_truthy ──

    #[test]
    fn test_is_truthy_present_string() {
        let mut config = Config::default();
        config.tools.web.search.api_key = "brave-key".into();
        assert!(config.is_truthy("tools.web.search.apiKey"));
    }

    #[test]
    fn test_is_truthy_empty_string_is_false() {
        let config = Config::default();
        assert!(!config.is_truthy("tools.web.search.apiKey"));
    }

    #[test]
    fn test_is_truthy_bool() {
        let mut config = Config::default();
        assert!(!config.is_truthy("tools.browser.enabled"));
        config.tools.browser.enabled = true;
        assert!(config.is_truthy("tools.browser.enabled"));
    }

    #[test]
    fn test_is_truthy_number() {
        let config = Config::default();
        assert!(config.is_truthy("gateway.port"));
    }

    #[test]
    fn test_is_truthy_missing_path() {
        let config = Config::default();
        assert!(!config.is_truthy("no.such.path"));
        assert!(!config.is_truthy("tools.web.search.nope"));
    }

    // ── Skills config ──

    #[test]
    fn test_skills_entry_case_insensitive() {
        let json = serde_json::json!({
            "skills": {
                "entries": {
                    "GitHub": { "apiKey": "ghp_x", "env": { "GH_HOST": "github.com" } }
                }
            }
        });
        let config: Config = serde_json::from_value(json).unwrap();
        let entry = config.skills.entry("github").unwrap();
        assert_eq!(entry.api_key, "ghp_x");
        assert_eq!(entry.env.get("GH_HOST").unwrap(), "github.com");
        assert!(config.skills.entry("nope").is_none());
    }
}
