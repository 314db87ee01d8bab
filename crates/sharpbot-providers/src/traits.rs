//! LLM provider trait — the single abstraction the agent loop drives.
//!
//! Transport failures and non-success HTTP statuses surface as `Err`: the
//! agent aborts the current turn without touching the session. Tool-level
//! failures never reach this layer.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use sharpbot_core::types::{LlmResponse, Message, ToolDefinition};

/// Configuration passed to each LLM call.
#[derive(Clone, Debug)]
pub struct LlmRequestConfig {
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature (0.0 – 2.0).
    pub temperature: f64,
}

impl Default for LlmRequestConfig {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

/// One element of a streamed chat completion.
#[derive(Clone, Debug)]
pub enum StreamChunk {
    /// An incremental piece of assistant text.
    TextDelta { delta: String },
    /// Terminal chunk carrying the fully assembled response.
    Done { response: LlmResponse },
}

/// Trait that all LLM providers implement.
///
/// The main implementation is `HttpProvider`, which covers any
/// OpenAI-compatible API.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request.
    ///
    /// # Arguments
    /// * `messages` — Conversation history in wire order.
    /// * `tools`    — Optional tool definitions the LLM can call.
    /// * `model`    — Model identifier (e.g. `"gpt-4o"`).
    /// * `config`   — Temperature and max_tokens.
    /// * `cancel`   — Cancellation token honored mid-flight.
    ///
    /// Returns `Err` on transport/API failure or cancellation; the response
    /// on success may carry text content, tool calls, or both.
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
        cancel: &CancellationToken,
    ) -> anyhow::Result<LlmResponse>;

    /// Streaming variant of [`chat`](Self::chat).
    ///
    /// Returns a receiver of [`StreamChunk`]s ending in a single `Done`.
    /// Dropping the receiver stops the stream. The default implementation
    /// wraps `chat` in one `Done` chunk, which keeps mock providers small.
    async fn chat_stream(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
        cancel: &CancellationToken,
    ) -> anyhow::Result<mpsc::Receiver<StreamChunk>> {
        let response = self.chat(messages, tools, model, config, cancel).await?;
        let (tx, rx) = mpsc::channel(4);
        let _ = tx.send(StreamChunk::Done { response }).await;
        Ok(rx)
    }

    /// The default model for this provider instance.
    fn default_model(&self) -> &str;

    /// Display name for logging.
    fn display_name(&self) -> &str;
}
