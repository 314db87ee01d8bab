//! Per-turn telemetry accounting.
//!
//! A `TurnTelemetry` is created when a turn starts and emitted as one
//! structured tracing event when the turn completes — on success and on
//! failure alike.

use std::time::Instant;

use sharpbot_core::types::UsageInfo;
use tracing::info;

/// One tool invocation within a turn.
#[derive(Clone, Debug)]
pub struct ToolCallRecord {
    pub name: String,
    /// False when the result text was an `Error: …` capture.
    pub ok: bool,
    pub duration_ms: u64,
}

/// Accounting for one agent turn.
#[derive(Debug)]
pub struct TurnTelemetry {
    pub channel: String,
    pub sender: String,
    pub session_key: String,
    pub model: String,
    /// LLM calls made this turn.
    pub iterations: usize,
    /// Wall-clock duration of each LLM call.
    pub call_durations_ms: Vec<u64>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub tool_calls: Vec<ToolCallRecord>,
    pub compactions: usize,
    pub max_iterations_hit: bool,
    started: Instant,
}

impl TurnTelemetry {
    /// Start accounting for a turn.
    pub fn begin(channel: &str, sender: &str, session_key: &str, model: &str) -> Self {
        Self {
            channel: channel.to_string(),
            sender: sender.to_string(),
            session_key: session_key.to_string(),
            model: model.to_string(),
            iterations: 0,
            call_durations_ms: Vec::new(),
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            tool_calls: Vec::new(),
            compactions: 0,
            max_iterations_hit: false,
            started: Instant::now(),
        }
    }

    /// Record one LLM call.
    pub fn record_call(&mut self, duration_ms: u64, usage: Option<&UsageInfo>) {
        self.iterations += 1;
        self.call_durations_ms.push(duration_ms);
        if let Some(usage) = usage {
            self.prompt_tokens += usage.prompt_tokens as u64;
            self.completion_tokens += usage.completion_tokens as u64;
            self.total_tokens += usage.total_tokens as u64;
        }
    }

    /// Record one tool execution.
    pub fn record_tool(&mut self, name: &str, ok: bool, duration_ms: u64) {
        self.tool_calls.push(ToolCallRecord {
            name: name.to_string(),
            ok,
            duration_ms,
        });
    }

    /// Record a compaction event.
    pub fn record_compaction(&mut self) {
        self.compactions += 1;
    }

    /// Emit the telemetry event. Called on every completion path.
    pub fn finish(&self, succeeded: bool) {
        let tool_names: Vec<&str> = self.tool_calls.iter().map(|t| t.name.as_str()).collect();
        let tool_errors = self.tool_calls.iter().filter(|t| !t.ok).count();

        info!(
            target: "sharpbot::telemetry",
            channel = %self.channel,
            sender = %self.sender,
            session_key = %self.session_key,
            model = %self.model,
            iterations = self.iterations,
            duration_ms = self.started.elapsed().as_millis() as u64,
            prompt_tokens = self.prompt_tokens,
            completion_tokens = self.completion_tokens,
            total_tokens = self.total_tokens,
            tools = ?tool_names,
            tool_errors = tool_errors,
            compactions = self.compactions,
            max_iterations_hit = self.max_iterations_hit,
            succeeded = succeeded,
            "turn finished"
        );
    }
}
