//! Context builder — assembles the system prompt and the LLM message list.
//!
//! System prompt sections, in order, joined by a horizontal separator:
//! identity, bootstrap files, pinned notes, skill blocks, optional semantic
//! enrichment, and the current-session block.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use sharpbot_core::types::{ContentPart, ImageUrl, Message};
use tracing::debug;

use crate::memory::MemoryStore;
use crate::skills::SkillsLoader;

// ─────────────────────────────────────────────
// Bootstrap files
// ─────────────────────────────────────────────

/// Files injected into the system prompt when present in the workspace root,
/// in this order: identity, user profile, agent guidelines, tooling notes,
/// personality.
const BOOTSTRAP_FILES: &[&str] = &[
    "IDENTITY.md",
    "USER.md",
    "AGENTS.md",
    "TOOLS.md",
    "SOUL.md",
];

const SECTION_SEPARATOR: &str = "\n\n---\n\n";

// ─────────────────────────────────────────────
// ContextBuilder
// ─────────────────────────────────────────────

/// Builds system prompts and conversation message lists for the agent loop.
pub struct ContextBuilder {
    /// Root workspace directory.
    workspace: PathBuf,
    /// Agent identity name (for the system prompt).
    agent_name: String,
    /// File-notes store (pinned + daily notes).
    memory: MemoryStore,
    /// Skills loader (shared with the load_skill tool).
    skills: Arc<SkillsLoader>,
    /// Whether semantic memory is enabled (changes the memory instructions).
    semantic_memory_enabled: bool,
}

impl ContextBuilder {
    /// Create a new context builder.
    pub fn new(
        workspace: impl Into<PathBuf>,
        agent_name: impl Into<String>,
        skills: Arc<SkillsLoader>,
        semantic_memory_enabled: bool,
    ) -> Self {
        let workspace = workspace.into();
        let memory = MemoryStore::new_lazy(&workspace);
        Self {
            workspace,
            agent_name: agent_name.into(),
            memory,
            skills,
            semantic_memory_enabled,
        }
    }

    /// Get a reference to the notes store.
    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    /// Get a reference to the skills loader.
    pub fn skills(&self) -> &Arc<SkillsLoader> {
        &self.skills
    }

    // ────────────── System prompt ──────────────

    /// Build the full system prompt.
    ///
    /// `memory_enrichment` is the pre-rendered semantic-memory block for the
    /// current user message (the agent loop runs the search).
    pub fn build_system_prompt(
        &self,
        channel: &str,
        chat_id: &str,
        memory_enrichment: Option<&str>,
    ) -> String {
        let mut parts: Vec<String> = Vec::new();

        // 1) Identity
        parts.push(self.build_identity());

        // 2) Bootstrap files
        for filename in BOOTSTRAP_FILES {
            let path = self.workspace.join(filename);
            if path.is_file() {
                if let Ok(content) = std::fs::read_to_string(&path) {
                    debug!(file = filename, "loaded bootstrap file");
                    parts.push(format!("## {filename}\n\n{content}"));
                }
            }
        }

        // 3) Pinned notes
        if let Some(notes) = self.memory.get_memory_context() {
            parts.push(notes);
        }

        // 4) Skill blocks
        if let Some(skills_block) = self.build_skills_block() {
            parts.push(skills_block);
        }

        // 5) Semantic-memory enrichment
        if let Some(enrichment) = memory_enrichment {
            if !enrichment.trim().is_empty() {
                parts.push(format!("# Relevant Memories\n\n{enrichment}"));
            }
        }

        // 6) Current session
        parts.push(format!(
            "## Current Session\nChannel: {channel}\nChat ID: {chat_id}"
        ));

        parts.join(SECTION_SEPARATOR)
    }

    /// Core identity block.
    fn build_identity(&self) -> String {
        let now = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let os = std::env::consts::OS;
        let arch = std::env::consts::ARCH;
        let workspace = self.workspace.display();
        let memory_file = self.memory.memory_file().display();
        let today = Utc::now().format("%Y-%m-%d");

        let memory_instructions = if self.semantic_memory_enabled {
            format!(
                "When you learn something important about the user or the project, \
                 store it with the `memory_index` tool so it can be recalled by \
                 similarity search, and pin durable facts in `{memory_file}` using \
                 the file tools. Use `memory_search` to recall past context.\n\
                 For daily notes, write to `{workspace}/memory/{today}.md`."
            )
        } else {
            format!(
                "When you learn something important about the user or the project, \
                 persist it by writing to `{memory_file}` using the `write_file` or \
                 `edit_file` tool.\n\
                 For daily notes, write to `{workspace}/memory/{today}.md`."
            )
        };

        format!(
            "# Identity\n\n\
             You are **{name}**, a multi-channel AI assistant.\n\n\
             - **Date/time**: {now}\n\
             - **Runtime**: Rust on {os}/{arch}\n\
             - **Workspace**: `{workspace}`\n\n\
             You have access to tools. Use them when needed to answer questions, \
             read/write files, run commands, search the web, and more.\n\
             Always prefer using tools over guessing. \
             Be concise and helpful.\n\n\
             ## Memory\n\n\
             {memory_instructions}",
            name = self.agent_name,
        )
    }

    /// Active / available / unavailable skill sections.
    fn build_skills_block(&self) -> Option<String> {
        let statuses = self.skills.list_all_skills();
        if statuses.is_empty() {
            return None;
        }

        let mut sections: Vec<String> = Vec::new();

        let active = self.skills.active_skills_content();
        if !active.is_empty() {
            sections.push(format!("# Active Skills\n\n{active}"));
        }

        let available: Vec<String> = statuses
            .iter()
            .filter(|s| s.available && !s.always)
            .map(|s| format!("- **{}** — {}", s.name, s.description))
            .collect();
        if !available.is_empty() {
            sections.push(format!(
                "# Available Skills\n\n\
                 Call the `load_skill` tool with a skill's name to load its full \
                 instructions before using it.\n\n{}",
                available.join("\n")
            ));
        }

        let unavailable: Vec<String> = statuses
            .iter()
            .filter(|s| !s.available)
            .map(|s| {
                format!(
                    "- **{}** — {} (unavailable: {})",
                    s.name,
                    s.description,
                    s.reason.as_deref().unwrap_or("requirements not met")
                )
            })
            .collect();
        if !unavailable.is_empty() {
            sections.push(format!(
                "# Unavailable Skills\n\n\
                 These skills exist but their requirements are not met. \
                 You can help the user remediate them.\n\n{}",
                unavailable.join("\n")
            ));
        }

        if sections.is_empty() {
            None
        } else {
            Some(sections.join(SECTION_SEPARATOR))
        }
    }

    // ────────────── Message building ──────────────

    /// Build the full message list for an LLM call:
    /// system prompt, then history, then the current user message.
    pub fn build_messages(
        &self,
        history: &[Message],
        user_text: &str,
        media: &[String],
        channel: &str,
        chat_id: &str,
        memory_enrichment: Option<&str>,
    ) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + 2);

        messages.push(Message::system(self.build_system_prompt(
            channel,
            chat_id,
            memory_enrichment,
        )));

        messages.extend_from_slice(history);

        if media.is_empty() {
            messages.push(Message::user(user_text));
        } else {
            messages.push(build_multimodal_user_message(user_text, media));
        }

        messages
    }

    /// Append a tool result to the message list.
    pub fn add_tool_result(
        messages: &mut Vec<Message>,
        tool_call_id: &str,
        name: &str,
        result: &str,
    ) {
        messages.push(Message::tool_result(tool_call_id, name, result));
    }

    /// Append an assistant message (with optional tool calls).
    pub fn add_assistant_message(
        messages: &mut Vec<Message>,
        content: Option<String>,
        tool_calls: Vec<sharpbot_core::types::ToolCall>,
    ) {
        if tool_calls.is_empty() {
            if let Some(text) = content {
                messages.push(Message::assistant(text));
            }
        } else {
            messages.push(Message::assistant_tool_calls(tool_calls));
        }
    }
}

// ─────────────────────────────────────────────
// Multimodal helpers
// ─────────────────────────────────────────────

/// Build a user message with base64-encoded images.
///
/// Audio files are skipped — their transcription is already in the text
/// content (channel adapters put it there).
fn build_multimodal_user_message(text: &str, media_paths: &[String]) -> Message {
    let mut parts = Vec::new();

    for path in media_paths {
        if is_audio_extension(path) {
            continue;
        }
        if let Ok(data) = std::fs::read(path) {
            let mime = guess_mime(path);
            let b64 = sharpbot_core::utils::base64_encode(&data);
            parts.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:{mime};base64,{b64}"),
                    detail: None,
                },
            });
        }
    }

    parts.push(ContentPart::Text {
        text: text.to_string(),
    });

    Message::user_parts(parts)
}

/// Check if a file path has an audio extension.
fn is_audio_extension(path: &str) -> bool {
    let lower = path.to_lowercase();
    [
        ".ogg", ".oga", ".opus", ".mp3", ".m4a", ".wav", ".flac", ".aac", ".wma", ".webm",
    ]
    .iter()
    .any(|ext| lower.ends_with(ext))
}

/// Simple MIME guesser based on extension.
fn guess_mime(path: &str) -> &'static str {
    let lower = path.to_lowercase();
    if lower.ends_with(".png") {
        "image/png"
    } else if lower.ends_with(".gif") {
        "image/gif"
    } else if lower.ends_with(".webp") {
        "image/webp"
    } else if lower.ends_with(".svg") {
        "image/svg+xml"
    } else {
        "image/jpeg"
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
