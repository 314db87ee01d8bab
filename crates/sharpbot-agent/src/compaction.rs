//! Context compaction — keeps conversations under the model's context limit.
//!
//! Token estimation is a character-count heuristic (chars / 4 with a small
//! per-message overhead), checked against a per-model limit table. When the
//! estimate crosses 80% of the limit, the middle of the conversation is
//! replaced by an LLM-written summary; the system prompt, the most recent
//! message pairs, and the current user message survive verbatim.
//!
//! The split point never separates a tool result from the assistant message
//! that requested it.

use sharpbot_core::types::Message;
use sharpbot_providers::traits::{LlmProvider, LlmRequestConfig};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Fraction of the context limit that triggers compaction.
pub const COMPACTION_TRIGGER_RATIO: f64 = 0.80;

/// Context limit assumed for unknown models.
const FALLBACK_CONTEXT_LIMIT: usize = 128_000;

/// Flat char overhead added per message (role framing, separators).
const MESSAGE_OVERHEAD_CHARS: usize = 16;

/// Hard cap on the transcript handed to the summarizer.
const SUMMARY_TRANSCRIPT_CAP: usize = 50_000;

/// Per-message caps inside the summarizer transcript.
const TRANSCRIPT_TEXT_CAP: usize = 2_000;
const TRANSCRIPT_TOOL_CAP: usize = 500;

/// Model-name substring → context window, checked in order.
const MODEL_CONTEXT_LIMITS: &[(&str, usize)] = &[
    ("gemini-1.5", 1_000_000),
    ("gemini", 128_000),
    ("claude", 200_000),
    ("o1", 200_000),
    ("gpt-4-turbo", 128_000),
    ("gpt-4o", 128_000),
    ("gpt-4", 8_192),
    ("kimi", 256_000),
    ("moonshot", 128_000),
    ("deepseek", 64_000),
    ("glm", 128_000),
    ("qwen", 131_072),
    ("llama", 128_000),
];

const SUMMARIZER_PROMPT: &str = "\
You summarize earlier portions of a conversation between a user and an AI assistant.
Write in the third person. Use short bullet points grouped under these headings
when applicable: Decisions, Facts, Tool outcomes, Pending actions.
Preserve concrete values (paths, ids, names, numbers) exactly. Do not add
commentary or speculation.";

// ─────────────────────────────────────────────
// ContextCompactor
// ─────────────────────────────────────────────

/// Compacts message lists that approach the model's context limit.
pub struct ContextCompactor {
    /// How many recent message pairs to preserve verbatim.
    preserve_pairs: usize,
    /// Minimum messages in the excluded middle to bother summarizing.
    min_messages_to_summarize: usize,
}

impl Default for ContextCompactor {
    fn default() -> Self {
        Self {
            preserve_pairs: 3,
            min_messages_to_summarize: 4,
        }
    }
}

impl ContextCompactor {
    pub fn new(preserve_pairs: usize, min_messages_to_summarize: usize) -> Self {
        Self {
            preserve_pairs,
            min_messages_to_summarize,
        }
    }

    /// Context window for a model (substring match, lowercase).
    pub fn context_limit_for(model: &str) -> usize {
        let model_lower = model.to_lowercase();
        MODEL_CONTEXT_LIMITS
            .iter()
            .find(|(pattern, _)| model_lower.contains(pattern))
            .map(|(_, limit)| *limit)
            .unwrap_or(FALLBACK_CONTEXT_LIMIT)
    }

    /// Estimate token usage of a message list (chars / 4 heuristic).
    pub fn estimate_tokens(messages: &[Message]) -> usize {
        let chars: usize = messages.iter().map(message_chars).sum();
        chars / 4
    }

    /// Whether the estimate exceeds the compaction threshold for `model`.
    pub fn needs_compaction(&self, messages: &[Message], model: &str) -> bool {
        let limit = Self::context_limit_for(model);
        let threshold = (limit as f64 * COMPACTION_TRIGGER_RATIO) as usize;
        Self::estimate_tokens(messages) > threshold
    }

    /// Compact the list when the estimate exceeds the threshold.
    ///
    /// Returns `Ok(None)` when no compaction is needed or possible —
    /// repeated calls below the threshold are no-ops.
    pub async fn compact_if_needed(
        &self,
        messages: &[Message],
        model: &str,
        provider: &dyn LlmProvider,
        config: &LlmRequestConfig,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Option<Vec<Message>>> {
        if !self.needs_compaction(messages, model) {
            return Ok(None);
        }
        self.compact(messages, model, provider, config, cancel).await
    }

    /// Compact unconditionally (the skip rules on list shape still apply).
    pub async fn compact(
        &self,
        messages: &[Message],
        model: &str,
        provider: &dyn LlmProvider,
        config: &LlmRequestConfig,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Option<Vec<Message>>> {
        let plan = match self.plan_split(messages) {
            Some(plan) => plan,
            None => return Ok(None),
        };
        let SplitPlan {
            body_start,
            keep_from,
            tail_start,
        } = plan;

        let to_summarize = &messages[body_start..keep_from];
        let preserved = &messages[keep_from..tail_start];
        let tail = &messages[tail_start..];

        let transcript = render_transcript(to_summarize);
        let summary = match provider
            .chat(
                &[
                    Message::system(SUMMARIZER_PROMPT),
                    Message::user(format!("Summarize this conversation:\n\n{transcript}")),
                ],
                None,
                model,
                config,
                cancel,
            )
            .await
        {
            Ok(response) => match response.content {
                Some(text) if !text.trim().is_empty() => text,
                _ => fallback_summary(to_summarize),
            },
            Err(e) => {
                warn!(error = %e, "compaction summarizer failed, using fallback");
                fallback_summary(to_summarize)
            }
        };

        let mut rebuilt = Vec::with_capacity(3 + preserved.len() + tail.len());
        rebuilt.push(messages[0].clone());
        rebuilt.push(Message::user(format!(
            "[Earlier conversation summary]\n\n{summary}"
        )));
        rebuilt.push(Message::assistant(
            "Understood. I have the earlier context and will continue from there.",
        ));
        rebuilt.extend_from_slice(preserved);
        rebuilt.extend_from_slice(tail);

        info!(
            before = messages.len(),
            after = rebuilt.len(),
            summarized = to_summarize.len(),
            "context compacted"
        );

        Ok(Some(rebuilt))
    }

    /// Work out which span to summarize.
    ///
    /// Index 0 (system prompt) and everything from the final user message on
    /// are untouchable. Of the body in between, the last `preserve_pairs × 2`
    /// messages survive; the boundary walks left past tool results so it
    /// lands on the assistant message that owns them.
    fn plan_split(&self, messages: &[Message]) -> Option<SplitPlan> {
        if messages.len() < 3 {
            return None;
        }
        if !matches!(messages[0], Message::System { .. }) {
            return None;
        }

        // The final user message (the current turn) and anything after it
        // are preserved verbatim.
        let tail_start = messages
            .iter()
            .rposition(|m| matches!(m, Message::User { .. }))?;
        if tail_start <= 1 {
            return None;
        }

        let body = &messages[1..tail_start];
        let mut keep_from_rel = body.len().saturating_sub(self.preserve_pairs * 2);

        // Never split a tool-call → tool-result sequence: back up over tool
        // results onto the assistant message bearing the calls.
        while keep_from_rel > 0 && body[keep_from_rel].is_tool_result() {
            keep_from_rel -= 1;
        }
        debug_assert!(
            keep_from_rel == 0 || !body[keep_from_rel].is_tool_result(),
            "split landed inside a tool sequence"
        );

        if keep_from_rel < self.min_messages_to_summarize {
            debug!(
                candidates = keep_from_rel,
                "too few messages to summarize, skipping compaction"
            );
            return None;
        }

        Some(SplitPlan {
            body_start: 1,
            keep_from: 1 + keep_from_rel,
            tail_start,
        })
    }
}

struct SplitPlan {
    body_start: usize,
    keep_from: usize,
    tail_start: usize,
}

// ─────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────

/// Character weight of one message for token estimation.
fn message_chars(message: &Message) -> usize {
    let mut chars = message.plain_text().chars().count() + MESSAGE_OVERHEAD_CHARS;
    if let Message::Assistant {
        tool_calls: Some(calls),
        ..
    } = message
    {
        chars += serde_json::to_string(calls).map_or(0, |s| s.chars().count());
    }
    chars
}

/// Render the excluded middle as a capped plain-text transcript.
fn render_transcript(messages: &[Message]) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut total = 0usize;

    for message in messages {
        let (role, cap) = match message {
            Message::System { .. } => ("SYSTEM", TRANSCRIPT_TEXT_CAP),
            Message::User { .. } => ("USER", TRANSCRIPT_TEXT_CAP),
            Message::Assistant { .. } => ("ASSISTANT", TRANSCRIPT_TEXT_CAP),
            Message::Tool { .. } => ("TOOL", TRANSCRIPT_TOOL_CAP),
        };

        let mut text = message.plain_text();
        if let Message::Assistant {
            tool_calls: Some(calls),
            ..
        } = message
        {
            let names: Vec<&str> = calls.iter().map(|c| c.function.name.as_str()).collect();
            text.push_str(&format!(" [called tools: {}]", names.join(", ")));
        }

        let text = sharpbot_core::utils::truncate_string(text.trim(), cap);
        if text.is_empty() {
            continue;
        }

        let chunk = format!("{role}: {text}");
        if total + chunk.len() > SUMMARY_TRANSCRIPT_CAP {
            break;
        }
        total += chunk.len();
        parts.push(chunk);
    }

    parts.join("\n\n")
}

/// Deterministic summary used when the summarizer call fails: the first line
/// of each user message, truncated.
fn fallback_summary(messages: &[Message]) -> String {
    let lines: Vec<String> = messages
        .iter()
        .filter(|m| matches!(m, Message::User { .. }))
        .filter_map(|m| {
            let text = m.plain_text();
            let first_line = text.lines().next()?.trim().to_string();
            if first_line.is_empty() {
                None
            } else {
                Some(format!(
                    "- {}",
                    sharpbot_core::utils::truncate_string(&first_line, 100)
                ))
            }
        })
        .collect();

    if lines.is_empty() {
        "- (earlier conversation omitted)".to_string()
    } else {
        lines.join("\n")
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sharpbot_core::types::{LlmResponse, ToolCall, ToolDefinition};

    struct SummarizerStub {
        fail: bool,
    }

    #[async_trait]
    impl LlmProvider for SummarizerStub {
        async fn chat(
            &self,
            _messages: &[Message],
            _tools: Option<&[ToolDefinition]>,
            _model: &str,
            _config: &LlmRequestConfig,
            _cancel: &CancellationToken,
        ) -> anyhow::Result<LlmResponse> {
            if self.fail {
                anyhow::bail!("summarizer unavailable")
            }
            Ok(LlmResponse {
                content: Some("- Discussed the project setup".into()),
                ..Default::default()
            })
        }

        fn default_model(&self) -> &str {
            "stub"
        }

        fn display_name(&self) -> &str {
            "SummarizerStub"
        }
    }

    fn conversation(pairs: usize) -> Vec<Message> {
        let mut messages = vec![Message::system("You are Sharpbot.")];
        for i in 0..pairs {
            messages.push(Message::user(format!("question number {i}")));
            messages.push(Message::assistant(format!("answer number {i}")));
        }
        messages.push(Message::user("current question"));
        messages
    }

    // ── Limits and estimation ──

    #[test]
    fn test_context_limit_table() {
        assert_eq!(ContextCompactor::context_limit_for("claude-sonnet-4"), 200_000);
        assert_eq!(ContextCompactor::context_limit_for("gpt-4o-mini"), 128_000);
        assert_eq!(ContextCompactor::context_limit_for("deepseek-chat"), 64_000);
        assert_eq!(
            ContextCompactor::context_limit_for("gemini-1.5-pro"),
            1_000_000
        );
    }

    #[test]
    fn test_context_limit_fallback() {
        assert_eq!(
            ContextCompactor::context_limit_for("totally-unknown-model"),
            FALLBACK_CONTEXT_LIMIT
        );
    }

    #[test]
    fn test_estimate_counts_tool_calls() {
        let plain = vec![Message::assistant("hi")];
        let with_calls = vec![Message::Assistant {
            content: Some("hi".into()),
            tool_calls: Some(vec![ToolCall::new("c1", "exec", r#"{"command":"ls -la"}"#)]),
            reasoning_content: None,
        }];
        assert!(
            ContextCompactor::estimate_tokens(&with_calls)
                > ContextCompactor::estimate_tokens(&plain)
        );
    }

    #[test]
    fn test_estimate_monotonic_under_removal() {
        let messages = conversation(10);
        let full = ContextCompactor::estimate_tokens(&messages);
        for skip in 0..messages.len() {
            let subset: Vec<Message> = messages
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != skip)
                .map(|(_, m)| m.clone())
                .collect();
            assert!(ContextCompactor::estimate_tokens(&subset) <= full);
        }
    }

    // ── Trigger behavior ──

    #[tokio::test]
    async fn test_compact_if_needed_idempotent_below_threshold() {
        let compactor = ContextCompactor::default();
        let provider = SummarizerStub { fail: false };
        let config = LlmRequestConfig::default();
        let cancel = CancellationToken::new();

        let messages = conversation(5);
        let result = compactor
            .compact_if_needed(&messages, "gpt-4o", &provider, &config, &cancel)
            .await
            .unwrap();
        assert!(result.is_none());

        // Calling again changes nothing either
        let again = compactor
            .compact_if_needed(&messages, "gpt-4o", &provider, &config, &cancel)
            .await
            .unwrap();
        assert!(again.is_none());
    }

    // ── Compaction shape ──

    #[tokio::test]
    async fn test_compact_structure() {
        let compactor = ContextCompactor::default();
        let provider = SummarizerStub { fail: false };
        let config = LlmRequestConfig::default();
        let cancel = CancellationToken::new();

        let messages = conversation(10);
        let compacted = compactor
            .compact(&messages, "gpt-4o", &provider, &config, &cancel)
            .await
            .unwrap()
            .unwrap();

        // [system, summary user, ack assistant, preserved…, current user]
        assert!(matches!(compacted[0], Message::System { .. }));
        assert!(compacted[1]
            .plain_text()
            .starts_with("[Earlier conversation summary]"));
        assert!(compacted[1].plain_text().contains("project setup"));
        assert!(matches!(compacted[2], Message::Assistant { .. }));
        assert_eq!(
            compacted.last().unwrap().plain_text(),
            "current question"
        );
        assert!(compacted.len() < messages.len());

        // The last preserve_pairs*2 body messages survive verbatim
        assert!(compacted
            .iter()
            .any(|m| m.plain_text() == "answer number 9"));
    }

    #[tokio::test]
    async fn test_compact_preserves_tool_pairing() {
        let compactor = ContextCompactor::new(1, 2);
        let provider = SummarizerStub { fail: false };
        let config = LlmRequestConfig::default();
        let cancel = CancellationToken::new();

        // Build a history whose natural split point falls on tool results
        let mut messages = vec![Message::system("You are Sharpbot.")];
        for i in 0..4 {
            messages.push(Message::user(format!("old question {i}")));
            messages.push(Message::assistant(format!("old answer {i}")));
        }
        messages.push(Message::assistant_tool_calls(vec![
            ToolCall::new("c1", "exec", "{}"),
            ToolCall::new("c2", "read_file", "{}"),
        ]));
        messages.push(Message::tool_result("c1", "exec", "exec output"));
        messages.push(Message::tool_result("c2", "read_file", "file output"));
        messages.push(Message::user("current question"));

        let compacted = compactor
            .compact(&messages, "gpt-4o", &provider, &config, &cancel)
            .await
            .unwrap()
            .unwrap();

        // Every tool result must be directly preceded (transitively) by the
        // assistant message carrying its call id.
        for (i, message) in compacted.iter().enumerate() {
            if let Message::Tool { tool_call_id, .. } = message {
                let owner = compacted[..i]
                    .iter()
                    .rev()
                    .find(|m| !m.is_tool_result())
                    .expect("tool result with no preceding message");
                match owner {
                    Message::Assistant {
                        tool_calls: Some(calls),
                        ..
                    } => {
                        assert!(
                            calls.iter().any(|c| &c.id == tool_call_id),
                            "orphan tool result {tool_call_id}"
                        );
                    }
                    other => panic!("tool result preceded by {other:?}"),
                }
            }
        }

        // The assistant-with-tool-calls made it into the preserved region
        assert!(compacted.iter().any(|m| m.bears_tool_calls()));
    }

    #[tokio::test]
    async fn test_compact_skips_short_histories() {
        let compactor = ContextCompactor::default();
        let provider = SummarizerStub { fail: false };
        let config = LlmRequestConfig::default();
        let cancel = CancellationToken::new();

        // Only 2 body messages — under min_messages_to_summarize
        let messages = conversation(2);
        let result = compactor
            .compact(&messages, "gpt-4o", &provider, &config, &cancel)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_compact_summarizer_failure_uses_fallback() {
        let compactor = ContextCompactor::default();
        let provider = SummarizerStub { fail: true };
        let config = LlmRequestConfig::default();
        let cancel = CancellationToken::new();

        let messages = conversation(10);
        let compacted = compactor
            .compact(&messages, "gpt-4o", &provider, &config, &cancel)
            .await
            .unwrap()
            .unwrap();

        // Fallback: first lines of the summarized user messages
        let summary = compacted[1].plain_text();
        assert!(summary.contains("question number 0"));
    }

    // ── Transcript rendering ──

    #[test]
    fn test_render_transcript_truncates_tools() {
        let long_output = "x".repeat(5_000);
        let messages = vec![
            Message::user("run the test suite"),
            Message::tool_result("c1", "exec", long_output),
        ];
        let transcript = render_transcript(&messages);
        assert!(transcript.contains("USER: run the test suite"));
        // Tool output capped at 500 chars plus framing
        let tool_line = transcript
            .lines()
            .find(|l| l.starts_with("TOOL:"))
            .unwrap();
        assert!(tool_line.len() < 600);
    }

    #[test]
    fn test_fallback_summary_first_lines() {
        let messages = vec![
            Message::user("first question\nwith detail"),
            Message::assistant("an answer"),
            Message::user("second question"),
        ];
        let summary = fallback_summary(&messages);
        assert!(summary.contains("- first question"));
        assert!(summary.contains("- second question"));
        assert!(!summary.contains("with detail"));
        assert!(!summary.contains("an answer"));
    }

    #[test]
    fn test_fallback_summary_empty() {
        let summary = fallback_summary(&[Message::assistant("only assistant")]);
        assert!(summary.contains("omitted"));
    }
}
