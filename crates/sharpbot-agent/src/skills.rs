//! Skills — on-demand instruction bundles with executability gates.
//!
//! # Architecture
//!
//! Skills are Markdown files (`SKILL.md`) that teach the agent how to combine
//! existing tools for specific domains (GitHub, weather, tmux, …). They do
//! not register new tools.
//!
//! ## Tiers
//!
//! Discovery scans four directory tiers; the first tier to claim a name
//! (case-insensitively) wins and suppresses lower tiers:
//!
//! 1. `workspace/skills/<name>/SKILL.md`
//! 2. `<data>/skills/<name>/SKILL.md` (managed)
//! 3. builtin directory (configured)
//! 4. extra directories (configured)
//!
//! ## Gating
//!
//! Availability is recomputed on every listing from the skill's `metadata`
//! frontmatter field (a JSON object):
//!
//! ```text
//! ---
//! name: github
//! description: "Interact with GitHub using the gh CLI"
//! metadata: {"requires":{"bins":["gh"],"env":["GITHUB_TOKEN"]},"primaryEnv":"GITHUB_TOKEN"}
//! ---
//! ```
//!
//! `bins` must all be on PATH, `anyBins` needs one hit, `env` vars must be
//! non-empty (a per-skill config entry with an api key or env map counts),
//! `config` dot-paths must be truthy in app config, and `os` restricts to a
//! host tag (`win32`|`darwin`|`linux`).
//!
//! ## Progressive loading
//!
//! Skills with `always: true` are inlined into every system prompt (with
//! `{env:VAR}` placeholders substituted). The rest are listed by name and
//! description; the agent pulls them in via the `load_skill` tool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use tracing::debug;

use sharpbot_core::config::schema::{Config, SkillsConfig};

// ─────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────

/// Where a skill was discovered, in priority order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkillTier {
    Workspace,
    Managed,
    Builtin,
    Extra,
}

impl SkillTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkillTier::Workspace => "workspace",
            SkillTier::Managed => "managed",
            SkillTier::Builtin => "builtin",
            SkillTier::Extra => "extra",
        }
    }
}

/// Requirements parsed from the `metadata` frontmatter field.
#[derive(Clone, Debug, Default)]
pub struct SkillRequirements {
    /// CLI binaries that must all be on PATH.
    pub bins: Vec<String>,
    /// At least one of these binaries must be on PATH.
    pub any_bins: Vec<String>,
    /// Environment variables that must be non-empty.
    pub env: Vec<String>,
    /// Config dot-paths that must resolve to truthy values.
    pub config: Vec<String>,
}

/// A discovered skill with its parsed frontmatter.
#[derive(Clone, Debug)]
struct ParsedSkill {
    name: String,
    path: PathBuf,
    tier: SkillTier,
    description: Option<String>,
    always: bool,
    requires: SkillRequirements,
    os: Option<String>,
    primary_env: Option<String>,
}

/// Availability snapshot of one skill.
#[derive(Clone, Debug)]
pub struct SkillStatus {
    pub name: String,
    pub description: String,
    pub available: bool,
    /// Why the skill is unavailable (when it is).
    pub reason: Option<String>,
    pub always: bool,
    pub tier: SkillTier,
}

// ─────────────────────────────────────────────
// SkillsLoader
// ─────────────────────────────────────────────

/// Discovers, gates, and loads skills.
pub struct SkillsLoader {
    workspace_skills: PathBuf,
    managed_skills: PathBuf,
    builtin_skills: Option<PathBuf>,
    extra_dirs: Vec<PathBuf>,
    config: SkillsConfig,
    app_config: Arc<Config>,
}

impl SkillsLoader {
    /// Create a new skills loader.
    pub fn new(
        workspace: &Path,
        builtin_skills: Option<PathBuf>,
        config: SkillsConfig,
        app_config: Arc<Config>,
    ) -> Self {
        let builtin_skills = builtin_skills.or_else(|| {
            config
                .builtin_dir
                .as_ref()
                .map(|d| sharpbot_core::utils::expand_home(d))
        });
        let extra_dirs = config
            .extra_dirs
            .iter()
            .map(|d| sharpbot_core::utils::expand_home(d))
            .collect();

        Self {
            workspace_skills: workspace.join("skills"),
            managed_skills: sharpbot_core::utils::get_data_path().join("skills"),
            builtin_skills,
            extra_dirs,
            config,
            app_config,
        }
    }

    /// Override the managed-tier directory (used by tests).
    pub fn with_managed_dir(mut self, dir: PathBuf) -> Self {
        self.managed_skills = dir;
        self
    }

    // ────────────── Discovery ──────────────

    /// Scan all tiers; the first tier to claim a name wins.
    fn discover(&self) -> Vec<ParsedSkill> {
        let mut skills: Vec<ParsedSkill> = Vec::new();
        let mut claimed: Vec<String> = Vec::new();

        let scan = |dir: &Path, tier: SkillTier, skills: &mut Vec<ParsedSkill>, claimed: &mut Vec<String>| {
            if !dir.is_dir() {
                return;
            }
            let entries = match std::fs::read_dir(dir) {
                Ok(e) => e,
                Err(_) => return,
            };
            let mut found: Vec<ParsedSkill> = entries
                .flatten()
                .filter_map(|entry| {
                    let path = entry.path();
                    if !path.is_dir() {
                        return None;
                    }
                    let skill_file = path.join("SKILL.md");
                    if !skill_file.is_file() {
                        return None;
                    }
                    let name = path.file_name()?.to_str()?.to_string();
                    let content = std::fs::read_to_string(&skill_file).ok()?;
                    Some(parse_skill(&name, skill_file, tier, &content))
                })
                .collect();
            found.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));

            for skill in found {
                let key = skill.name.to_lowercase();
                if !claimed.contains(&key) {
                    debug!(name = %skill.name, tier = tier.as_str(), "discovered skill");
                    claimed.push(key);
                    skills.push(skill);
                }
            }
        };

        scan(&self.workspace_skills, SkillTier::Workspace, &mut skills, &mut claimed);
        scan(&self.managed_skills, SkillTier::Managed, &mut skills, &mut claimed);
        if let Some(builtin) = &self.builtin_skills {
            scan(builtin, SkillTier::Builtin, &mut skills, &mut claimed);
        }
        for dir in &self.extra_dirs {
            scan(dir, SkillTier::Extra, &mut skills, &mut claimed);
        }

        skills
    }

    /// Find a skill by name, case-insensitively.
    fn find(&self, name: &str) -> Option<ParsedSkill> {
        let lower = name.to_lowercase();
        self.discover()
            .into_iter()
            .find(|s| s.name.to_lowercase() == lower)
    }

    // ────────────── Availability ──────────────

    /// Check requirements; returns `None` when available, else the reason.
    fn unavailability_reason(&self, skill: &ParsedSkill) -> Option<String> {
        let mut missing: Vec<String> = Vec::new();

        if let Some(os) = &skill.os {
            if os != host_os_tag() {
                missing.push(format!("OS: requires {os}"));
            }
        }

        for bin in &skill.requires.bins {
            if !is_binary_available(bin) {
                missing.push(format!("CLI: {bin}"));
            }
        }

        if !skill.requires.any_bins.is_empty()
            && !skill.requires.any_bins.iter().any(|b| is_binary_available(b))
        {
            missing.push(format!("CLI (any of): {}", skill.requires.any_bins.join(", ")));
        }

        for var in &skill.requires.env {
            if !self.env_requirement_satisfied(skill, var) {
                missing.push(format!("ENV: {var}"));
            }
        }

        for path in &skill.requires.config {
            if !self.app_config.is_truthy(path) {
                missing.push(format!("CONFIG: {path}"));
            }
        }

        if missing.is_empty() {
            None
        } else {
            Some(missing.join(", "))
        }
    }

    /// An env requirement is satisfied by a non-empty process variable, or by
    /// a per-skill config entry supplying an api key (for the declared
    /// `primaryEnv`) or the variable in its env map.
    fn env_requirement_satisfied(&self, skill: &ParsedSkill, var: &str) -> bool {
        if std::env::var(var).map_or(false, |v| !v.is_empty()) {
            return true;
        }
        if let Some(entry) = self.config.entry(&skill.name) {
            if !entry.api_key.is_empty() && skill.primary_env.as_deref() == Some(var) {
                return true;
            }
            if entry.env.get(var).map_or(false, |v| !v.is_empty()) {
                return true;
            }
        }
        false
    }

    fn status_of(&self, skill: &ParsedSkill) -> SkillStatus {
        let reason = self.unavailability_reason(skill);
        SkillStatus {
            name: skill.name.clone(),
            description: skill
                .description
                .clone()
                .unwrap_or_else(|| skill.name.clone()),
            available: reason.is_none(),
            reason,
            always: skill.always,
            tier: skill.tier,
        }
    }

    /// Availability snapshot of every discovered skill.
    pub fn list_all_skills(&self) -> Vec<SkillStatus> {
        self.discover().iter().map(|s| self.status_of(s)).collect()
    }

    /// Availability snapshot of one skill, by case-insensitive name.
    pub fn skill_status(&self, name: &str) -> Option<SkillStatus> {
        self.find(name).map(|s| self.status_of(&s))
    }

    // ────────────── Loading ──────────────

    /// Full content of a skill: frontmatter stripped, `{env:VAR}` substituted.
    pub fn load_skill_content(&self, name: &str) -> Option<String> {
        let skill = self.find(name)?;
        let raw = std::fs::read_to_string(&skill.path).ok()?;
        let body = strip_frontmatter(&raw);
        Some(substitute_env_placeholders(body))
    }

    /// Full bodies of always-on available skills, for prompt inlining.
    pub fn active_skills_content(&self) -> String {
        let parts: Vec<String> = self
            .discover()
            .iter()
            .filter(|s| s.always && self.unavailability_reason(s).is_none())
            .filter_map(|s| {
                let raw = std::fs::read_to_string(&s.path).ok()?;
                let body = strip_frontmatter(&raw);
                if body.trim().is_empty() {
                    return None;
                }
                Some(format!(
                    "### Skill: {}\n\n{}",
                    s.name,
                    substitute_env_placeholders(body)
                ))
            })
            .collect();

        parts.join("\n\n---\n\n")
    }

    // ────────────── Env injection ──────────────

    /// Inject per-skill environment variables for the duration of a turn.
    ///
    /// For each available skill with a config entry: a configured api key is
    /// exported under the skill's declared `primaryEnv` (if not already set),
    /// and the entry's env map is applied. The returned guard restores the
    /// previous state when dropped — on every exit path of the turn.
    ///
    /// Turns run on a single consumer task, which serializes injections.
    pub fn inject_env(&self) -> EnvGuard {
        let mut guard = EnvGuard::default();

        for skill in self.discover() {
            if self.unavailability_reason(&skill).is_some() {
                continue;
            }
            let entry = match self.config.entry(&skill.name) {
                Some(e) => e,
                None => continue,
            };

            if !entry.api_key.is_empty() {
                if let Some(primary) = &skill.primary_env {
                    guard.set_if_unset(primary, &entry.api_key);
                }
            }
            for (key, value) in &entry.env {
                guard.set_if_unset(key, value);
            }
        }

        guard
    }
}

// ─────────────────────────────────────────────
// EnvGuard
// ─────────────────────────────────────────────

/// Scoped environment mutation with guaranteed restore on drop.
#[derive(Default)]
pub struct EnvGuard {
    saved: Vec<(String, Option<String>)>,
}

impl EnvGuard {
    /// Set `key` to `value` if currently unset or empty, recording the prior
    /// state for restore.
    pub fn set_if_unset(&mut self, key: &str, value: &str) {
        let current = std::env::var(key).ok();
        if current.as_deref().map_or(true, |v| v.is_empty()) {
            self.saved.push((key.to_string(), current));
            std::env::set_var(key, value);
        }
    }

    /// Number of variables this guard will restore.
    pub fn len(&self) -> usize {
        self.saved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.saved.is_empty()
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, previous) in self.saved.drain(..).rev() {
            match previous {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

// ─────────────────────────────────────────────
// Parsing helpers
// ─────────────────────────────────────────────

fn parse_skill(name: &str, path: PathBuf, tier: SkillTier, content: &str) -> ParsedSkill {
    let frontmatter = parse_frontmatter(content).unwrap_or_default();

    let get = |key: &str| -> Option<&str> {
        frontmatter
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    };

    let description = get("description").map(|v| v.trim_matches('"').trim_matches('\'').to_string());
    let always_top = get("always").map_or(false, |v| v == "true");

    let metadata: serde_json::Value = get("metadata")
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or(serde_json::Value::Null);

    let string_list = |value: Option<&serde_json::Value>| -> Vec<String> {
        value
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    };

    let requires = metadata.get("requires");
    let requirements = SkillRequirements {
        bins: string_list(requires.and_then(|r| r.get("bins"))),
        any_bins: string_list(requires.and_then(|r| r.get("anyBins"))),
        env: string_list(requires.and_then(|r| r.get("env"))),
        config: string_list(requires.and_then(|r| r.get("config"))),
    };

    let always_meta = metadata
        .get("always")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    ParsedSkill {
        name: name.to_string(),
        path,
        tier,
        description,
        always: always_top || always_meta,
        requires: requirements,
        os: metadata
            .get("os")
            .and_then(|v| v.as_str())
            .map(String::from),
        primary_env: metadata
            .get("primaryEnv")
            .and_then(|v| v.as_str())
            .map(String::from),
    }
}

/// Parse YAML-like frontmatter (between `---` delimiters) into key-value
/// pairs. Naive line-by-line parsing; values stay raw.
fn parse_frontmatter(content: &str) -> Option<Vec<(String, String)>> {
    if !content.starts_with("---") {
        return None;
    }

    let after_first = &content[3..];
    let end = after_first.find("\n---")?;
    let block = &after_first[..end];

    let mut pairs = Vec::new();
    for line in block.lines() {
        let line = line.trim();
        if let Some(idx) = line.find(':') {
            let key = line[..idx].trim().to_string();
            let value = line[idx + 1..].trim().to_string();
            if !key.is_empty() {
                pairs.push((key, value));
            }
        }
    }

    Some(pairs)
}

/// Strip YAML frontmatter from markdown content.
fn strip_frontmatter(content: &str) -> &str {
    if !content.starts_with("---") {
        return content;
    }
    let after_first = &content[3..];
    match after_first.find("\n---") {
        Some(end) => {
            let rest = &after_first[end + 4..];
            rest.trim_start_matches('\n')
        }
        None => content,
    }
}

/// Replace `{env:VAR}` placeholders with current env values; unresolved
/// placeholders become `[VAR NOT SET]`.
fn substitute_env_placeholders(content: &str) -> String {
    let re = match Regex::new(r"\{env:([A-Za-z_][A-Za-z0-9_]*)\}") {
        Ok(re) => re,
        Err(_) => return content.to_string(),
    };
    re.replace_all(content, |caps: &regex::Captures| {
        let var = &caps[1];
        match std::env::var(var) {
            Ok(value) if !value.is_empty() => value,
            _ => format!("[{var} NOT SET]"),
        }
    })
    .into_owned()
}

/// Host tag used for the `os` gate.
fn host_os_tag() -> &'static str {
    match std::env::consts::OS {
        "windows" => "win32",
        "macos" => "darwin",
        other => {
            // Everything unix-like that isn't macOS reports as linux
            if other == "linux" {
                "linux"
            } else {
                other
            }
        }
    }
}

/// Check if a binary is available on PATH (with executable extensions on
/// Windows).
fn is_binary_available(name: &str) -> bool {
    let extensions: &[&str] = if cfg!(target_os = "windows") {
        &["", ".exe", ".cmd", ".bat"]
    } else {
        &[""]
    };

    if let Ok(path_var) = std::env::var("PATH") {
        for dir in std::env::split_paths(&path_var) {
            for ext in extensions {
                if dir.join(format!("{name}{ext}")).is_file() {
                    return true;
                }
            }
        }
    }
    false
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use sharpbot_core::config::schema::SkillConfigEntry;
    use std::collections::HashMap;

    fn create_skill(base: &Path, name: &str, content: &str) {
        let skill_dir = base.join(name);
        std::fs::create_dir_all(&skill_dir).unwrap();
        std::fs::write(skill_dir.join("SKILL.md"), content).unwrap();
    }

    fn make_loader(workspace: &Path) -> SkillsLoader {
        SkillsLoader::new(
            workspace,
            None,
            SkillsConfig::default(),
            Arc::new(Config::default()),
        )
        .with_managed_dir(workspace.join("__managed_unused"))
    }

    // ────────────── Frontmatter ──────────────

    #[test]
    fn parse_frontmatter_valid() {
        let content = "---\nname: github\ndescription: \"GitHub CLI\"\n---\n\n# Body";
        let fm = parse_frontmatter(content).unwrap();
        assert_eq!(fm.len(), 2);
        assert_eq!(fm[0], ("name".into(), "github".into()));
    }

    #[test]
    fn parse_frontmatter_none_when_no_delimiters() {
        assert!(parse_frontmatter("# Just markdown").is_none());
    }

    #[test]
    fn strip_frontmatter_removes_header() {
        let content = "---\nname: test\n---\n\n# Body here";
        assert_eq!(strip_frontmatter(content), "# Body here");
    }

    #[test]
    fn strip_frontmatter_no_header() {
        assert_eq!(strip_frontmatter("# Just body"), "# Just body");
    }

    #[test]
    fn parse_skill_full_metadata() {
        let content = "---\nname: full\ndescription: \"Full skill\"\nmetadata: {\"always\":true,\"os\":\"linux\",\"primaryEnv\":\"FULL_KEY\",\"requires\":{\"bins\":[\"curl\"],\"anyBins\":[\"wget\",\"curl\"],\"env\":[\"FULL_KEY\"],\"config\":[\"tools.web.search.apiKey\"]}}\n---\n\nBody";
        let skill = parse_skill("full", PathBuf::from("x"), SkillTier::Workspace, content);
        assert!(skill.always);
        assert_eq!(skill.description.as_deref(), Some("Full skill"));
        assert_eq!(skill.requires.bins, vec!["curl"]);
        assert_eq!(skill.requires.any_bins, vec!["wget", "curl"]);
        assert_eq!(skill.requires.env, vec!["FULL_KEY"]);
        assert_eq!(skill.requires.config, vec!["tools.web.search.apiKey"]);
        assert_eq!(skill.os.as_deref(), Some("linux"));
        assert_eq!(skill.primary_env.as_deref(), Some("FULL_KEY"));
    }

    #[test]
    fn parse_skill_top_level_always() {
        let content = "---\nname: x\nalways: true\n---\n\nBody";
        let skill = parse_skill("x", PathBuf::from("x"), SkillTier::Workspace, content);
        assert!(skill.always);
    }

    // ────────────── Env substitution ──────────────

    #[test]
    fn substitute_env_known_and_unknown() {
        std::env::set_var("SHARPBOT_TEST_SUBST_VAR", "value-123");
        let text = "key={env:SHARPBOT_TEST_SUBST_VAR} missing={env:SHARPBOT_TEST_MISSING_VAR}";
        let substituted = substitute_env_placeholders(text);
        assert!(substituted.contains("key=value-123"));
        assert!(substituted.contains("missing=[SHARPBOT_TEST_MISSING_VAR NOT SET]"));
        std::env::remove_var("SHARPBOT_TEST_SUBST_VAR");
    }

    // ────────────── Discovery ──────────────

    #[test]
    fn list_skills_empty_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let loader = make_loader(dir.path());
        assert!(loader.list_all_skills().is_empty());
    }

    #[test]
    fn list_skills_finds_workspace_skills() {
        let dir = tempfile::tempdir().unwrap();
        create_skill(
            &dir.path().join("skills"),
            "my-skill",
            "---\nname: my-skill\ndescription: \"Mine\"\n---\n\n# Hello",
        );

        let loader = make_loader(dir.path());
        let skills = loader.list_all_skills();
        assert_eq!(skills.len(), 1);
        assert_eq!(skills[0].name, "my-skill");
        assert_eq!(skills[0].tier, SkillTier::Workspace);
        assert!(skills[0].available);
    }

    #[test]
    fn workspace_tier_wins_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let builtin = dir.path().join("builtin");
        create_skill(
            &dir.path().join("skills"),
            "GitHub",
            "---\nname: GitHub\n---\n\n# Workspace copy",
        );
        create_skill(&builtin, "github", "---\nname: github\n---\n\n# Builtin copy");

        let loader = SkillsLoader::new(
            dir.path(),
            Some(builtin),
            SkillsConfig::default(),
            Arc::new(Config::default()),
        )
        .with_managed_dir(dir.path().join("__managed_unused"));

        let skills = loader.list_all_skills();
        assert_eq!(skills.len(), 1);
        assert_eq!(skills[0].tier, SkillTier::Workspace);
    }

    #[test]
    fn builtin_tier_used_when_workspace_missing() {
        let dir = tempfile::tempdir().unwrap();
        let ws = dir.path().join("workspace");
        let builtin = dir.path().join("builtin");
        std::fs::create_dir_all(&ws).unwrap();
        create_skill(&builtin, "github", "---\nname: github\n---\n\n# GitHub");

        let loader = SkillsLoader::new(
            &ws,
            Some(builtin),
            SkillsConfig::default(),
            Arc::new(Config::default()),
        )
        .with_managed_dir(dir.path().join("__managed_unused"));

        let skills = loader.list_all_skills();
        assert_eq!(skills.len(), 1);
        assert_eq!(skills[0].tier, SkillTier::Builtin);
    }

    #[test]
    fn listing_is_stable_for_fixed_inputs() {
        let dir = tempfile::tempdir().unwrap();
        create_skill(&dir.path().join("skills"), "alpha", "---\nname: alpha\n---\n\nA");
        create_skill(&dir.path().join("skills"), "beta", "---\nname: beta\n---\n\nB");

        let loader = make_loader(dir.path());
        let first: Vec<(String, bool)> = loader
            .list_all_skills()
            .into_iter()
            .map(|s| (s.name, s.available))
            .collect();
        let second: Vec<(String, bool)> = loader
            .list_all_skills()
            .into_iter()
            .map(|s| (s.name, s.available))
            .collect();
        assert_eq!(first, second);
    }

    // ────────────── Gating ──────────────

    #[test]
    fn missing_bin_makes_unavailable_with_reason() {
        let dir = tempfile::tempdir().unwrap();
        create_skill(
            &dir.path().join("skills"),
            "fancy",
            "---\nname: fancy\nmetadata: {\"requires\":{\"bins\":[\"__definitely_missing__\"]}}\n---\n\nBody",
        );

        let loader = make_loader(dir.path());
        let status = loader.skill_status("fancy").unwrap();
        assert!(!status.available);
        assert!(status.reason.as_deref().unwrap().contains("__definitely_missing__"));
    }

    #[test]
    fn present_bin_is_available() {
        let dir = tempfile::tempdir().unwrap();
        create_skill(
            &dir.path().join("skills"),
            "shelly",
            "---\nname: shelly\nmetadata: {\"requires\":{\"bins\":[\"ls\"]}}\n---\n\nBody",
        );

        let loader = make_loader(dir.path());
        assert!(loader.skill_status("shelly").unwrap().available);
    }

    #[test]
    fn availability_flips_with_path_toggle() {
        let dir = tempfile::tempdir().unwrap();
        let bin_name = "sharpbot_gate_probe_bin";
        create_skill(
            &dir.path().join("skills"),
            "gated",
            &format!(
                "---\nname: gated\nmetadata: {{\"requires\":{{\"bins\":[\"{bin_name}\"]}}}}\n---\n\nBody"
            ),
        );

        let loader = make_loader(dir.path());
        assert!(!loader.skill_status("gated").unwrap().available);

        // Append a directory containing the binary to PATH
        let bin_dir = dir.path().join("bin");
        std::fs::create_dir_all(&bin_dir).unwrap();
        std::fs::write(bin_dir.join(bin_name), "#!/bin/sh\n").unwrap();

        let original = std::env::var("PATH").unwrap_or_default();
        let appended = std::env::join_paths(
            std::env::split_paths(&original).chain(std::iter::once(bin_dir.clone())),
        )
        .unwrap();
        std::env::set_var("PATH", &appended);

        let available_now = loader.skill_status("gated").unwrap().available;
        std::env::set_var("PATH", &original);

        assert!(available_now);
        // Back to unavailable after restore
        assert!(!loader.skill_status("gated").unwrap().available);
    }

    #[test]
    fn any_bins_needs_only_one() {
        let dir = tempfile::tempdir().unwrap();
        create_skill(
            &dir.path().join("skills"),
            "anyb",
            "---\nname: anyb\nmetadata: {\"requires\":{\"anyBins\":[\"__nope__\",\"ls\"]}}\n---\n\nBody",
        );

        let loader = make_loader(dir.path());
        assert!(loader.skill_status("anyb").unwrap().available);
    }

    #[test]
    fn env_requirement_satisfied_by_config_api_key() {
        let dir = tempfile::tempdir().unwrap();
        create_skill(
            &dir.path().join("skills"),
            "keyed",
            "---\nname: keyed\nmetadata: {\"primaryEnv\":\"SHARPBOT_TEST_KEYED\",\"requires\":{\"env\":[\"SHARPBOT_TEST_KEYED\"]}}\n---\n\nBody",
        );

        // Without the config entry: unavailable
        let loader = make_loader(dir.path());
        assert!(!loader.skill_status("keyed").unwrap().available);

        // With a per-skill api key: available
        let mut config = SkillsConfig::default();
        config.entries.insert(
            "keyed".into(),
            SkillConfigEntry {
                api_key: "secret".into(),
                env: HashMap::new(),
            },
        );
        let loader = SkillsLoader::new(
            dir.path(),
            None,
            config,
            Arc::new(Config::default()),
        )
        .with_managed_dir(dir.path().join("__managed_unused"));
        assert!(loader.skill_status("keyed").unwrap().available);
    }

    #[test]
    fn config_requirement_gates_on_truthiness() {
        let dir = tempfile::tempdir().unwrap();
        create_skill(
            &dir.path().join("skills"),
            "searchy",
            "---\nname: searchy\nmetadata: {\"requires\":{\"config\":[\"tools.web.search.apiKey\"]}}\n---\n\nBody",
        );

        let loader = make_loader(dir.path());
        assert!(!loader.skill_status("searchy").unwrap().available);

        let mut app_config = Config::default();
        app_config.tools.web.search.api_key = "brave-key".into();
        let loader = SkillsLoader::new(
            dir.path(),
            None,
            SkillsConfig::default(),
            Arc::new(app_config),
        )
        .with_managed_dir(dir.path().join("__managed_unused"));
        assert!(loader.skill_status("searchy").unwrap().available);
    }

    #[test]
    fn os_gate_rejects_other_platforms() {
        let dir = tempfile::tempdir().unwrap();
        create_skill(
            &dir.path().join("skills"),
            "winonly",
            "---\nname: winonly\nmetadata: {\"os\":\"win32\"}\n---\n\nBody",
        );

        let loader = make_loader(dir.path());
        let status = loader.skill_status("winonly").unwrap();
        if cfg!(target_os = "windows") {
            assert!(status.available);
        } else {
            assert!(!status.available);
            assert!(status.reason.unwrap().contains("win32"));
        }
    }

    // ────────────── Loading ──────────────

    #[test]
    fn load_skill_content_strips_and_substitutes() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("SHARPBOT_TEST_LOAD_VAR", "tok-1");
        create_skill(
            &dir.path().join("skills"),
            "loader",
            "---\nname: loader\n---\n\nUse token {env:SHARPBOT_TEST_LOAD_VAR}",
        );

        let loader = make_loader(dir.path());
        let content = loader.load_skill_content("loader").unwrap();
        assert_eq!(content.trim(), "Use token tok-1");
        std::env::remove_var("SHARPBOT_TEST_LOAD_VAR");
    }

    #[test]
    fn active_skills_content_only_always() {
        let dir = tempfile::tempdir().unwrap();
        create_skill(
            &dir.path().join("skills"),
            "always-on",
            "---\nname: always-on\nalways: true\n---\n\n# Always body",
        );
        create_skill(
            &dir.path().join("skills"),
            "on-demand",
            "---\nname: on-demand\n---\n\n# Demand body",
        );

        let loader = make_loader(dir.path());
        let active = loader.active_skills_content();
        assert!(active.contains("### Skill: always-on"));
        assert!(active.contains("# Always body"));
        assert!(!active.contains("Demand body"));
    }

    // ────────────── Env injection ──────────────

    #[test]
    fn inject_env_sets_and_restores() {
        let dir = tempfile::tempdir().unwrap();
        create_skill(
            &dir.path().join("skills"),
            "envy",
            "---\nname: envy\nmetadata: {\"primaryEnv\":\"SHARPBOT_TEST_INJECT_KEY\"}\n---\n\nBody",
        );

        let mut config = SkillsConfig::default();
        let mut env = HashMap::new();
        env.insert("SHARPBOT_TEST_INJECT_EXTRA".to_string(), "extra-v".to_string());
        config.entries.insert(
            "envy".into(),
            SkillConfigEntry {
                api_key: "injected-key".into(),
                env,
            },
        );

        let loader = SkillsLoader::new(
            dir.path(),
            None,
            config,
            Arc::new(Config::default()),
        )
        .with_managed_dir(dir.path().join("__managed_unused"));

        std::env::remove_var("SHARPBOT_TEST_INJECT_KEY");
        std::env::remove_var("SHARPBOT_TEST_INJECT_EXTRA");

        {
            let guard = loader.inject_env();
            assert_eq!(guard.len(), 2);
            assert_eq!(
                std::env::var("SHARPBOT_TEST_INJECT_KEY").unwrap(),
                "injected-key"
            );
            assert_eq!(
                std::env::var("SHARPBOT_TEST_INJECT_EXTRA").unwrap(),
                "extra-v"
            );
        }

        // Guard dropped — variables restored
        assert!(std::env::var("SHARPBOT_TEST_INJECT_KEY").is_err());
        assert!(std::env::var("SHARPBOT_TEST_INJECT_EXTRA").is_err());
    }

    #[test]
    fn inject_env_does_not_clobber_existing() {
        let dir = tempfile::tempdir().unwrap();
        create_skill(
            &dir.path().join("skills"),
            "envy2",
            "---\nname: envy2\nmetadata: {\"primaryEnv\":\"SHARPBOT_TEST_CLOBBER\"}\n---\n\nBody",
        );

        let mut config = SkillsConfig::default();
        config.entries.insert(
            "envy2".into(),
            SkillConfigEntry {
                api_key: "from-config".into(),
                env: HashMap::new(),
            },
        );

        let loader = SkillsLoader::new(
            dir.path(),
            None,
            config,
            Arc::new(Config::default()),
        )
        .with_managed_dir(dir.path().join("__managed_unused"));

        std::env::set_var("SHARPBOT_TEST_CLOBBER", "preexisting");
        {
            let guard = loader.inject_env();
            assert!(guard.is_empty());
            assert_eq!(std::env::var("SHARPBOT_TEST_CLOBBER").unwrap(), "preexisting");
        }
        assert_eq!(std::env::var("SHARPBOT_TEST_CLOBBER").unwrap(), "preexisting");
        std::env::remove_var("SHARPBOT_TEST_CLOBBER");
    }
}
