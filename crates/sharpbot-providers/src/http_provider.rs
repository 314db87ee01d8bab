//! Generic HTTP-based LLM provider for OpenAI-compatible APIs.
//!
//! Talks directly to any OpenAI-compatible `/chat/completions` endpoint:
//! OpenAI, Anthropic (via OpenRouter), DeepSeek, Groq, Gemini, ZhiPu,
//! DashScope, Moonshot, MiniMax, vLLM, AiHubMix, OpenRouter.
//!
//! `chat` is a single blocking request; `chat_stream` consumes the SSE
//! stream, forwarding text deltas and assembling the terminal response
//! (including tool-call fragments) into a `Done` chunk.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use sharpbot_core::types::{
    ChatCompletionRequest, ChatCompletionResponse, LlmResponse, Message, ToolCall,
    ToolDefinition, UsageInfo,
};

use crate::registry::{
    effective_temperature, match_provider, resolve_model_name, ProviderConfig, ProviderSpec,
};
use crate::traits::{LlmProvider, LlmRequestConfig, StreamChunk};

// ─────────────────────────────────────────────
// HttpProvider
// ─────────────────────────────────────────────

/// A generic LLM provider that talks to any OpenAI-compatible HTTP API.
pub struct HttpProvider {
    /// HTTP client (shared, connection-pooled).
    client: reqwest::Client,
    /// API base URL (e.g. `"https://api.openai.com/v1"`).
    api_base: String,
    /// API key for Bearer authentication.
    api_key: String,
    /// Default model for this provider instance.
    default_model: String,
    /// Extra headers to send with each request.
    extra_headers: HeaderMap,
    /// Provider spec for model resolution and quirks.
    spec: &'static ProviderSpec,
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("api_base", &self.api_base)
            .field("default_model", &self.default_model)
            .field("provider", &self.spec.display_name)
            .finish()
    }
}

impl HttpProvider {
    /// Create a new HttpProvider from a provider config and spec.
    pub fn new(config: &ProviderConfig, spec: &'static ProviderSpec, model: &str) -> Self {
        // Resolve API base: config > spec default > standard OpenAI path
        let api_base = config
            .api_base
            .clone()
            .or_else(|| spec.default_api_base.map(String::from))
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        let mut extra_headers = HeaderMap::new();
        if let Some(ref headers) = config.extra_headers {
            for (key, value) in headers {
                if let (Ok(name), Ok(val)) = (
                    HeaderName::from_bytes(key.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    extra_headers.insert(name, val);
                } else {
                    warn!("Invalid header: {}={}", key, value);
                }
            }
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("Failed to build HTTP client");

        HttpProvider {
            client,
            api_base,
            api_key: config.api_key.clone(),
            default_model: model.to_string(),
            extra_headers,
            spec,
        }
    }

    /// Build the full chat completions URL.
    fn completions_url(&self) -> String {
        let base = self.api_base.trim_end_matches('/');
        format!("{}/chat/completions", base)
    }

    /// Build the request body for one call.
    fn build_request(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
        stream: bool,
    ) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: resolve_model_name(model, self.spec),
            messages: messages.to_vec(),
            tools: tools.map(|t| t.to_vec()),
            tool_choice: tools.map(|_| "auto".to_string()),
            max_tokens: Some(config.max_tokens),
            temperature: Some(effective_temperature(model, self.spec, config.temperature)),
            stream: if stream { Some(true) } else { None },
        }
    }

    /// Send the request and fail on transport errors or non-2xx statuses.
    async fn send_request(
        &self,
        body: &ChatCompletionRequest,
        cancel: &CancellationToken,
    ) -> anyhow::Result<reqwest::Response> {
        let url = self.completions_url();

        let send = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .headers(self.extra_headers.clone())
            .json(body)
            .send();

        let response = tokio::select! {
            result = send => result.map_err(|e| {
                error!(provider = self.spec.display_name, error = %e, "HTTP request failed");
                anyhow::anyhow!("LLM request failed: {e}")
            })?,
            _ = cancel.cancelled() => {
                anyhow::bail!("LLM request cancelled");
            }
        };

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(
                provider = self.spec.display_name,
                status = %status,
                body = %error_text,
                "API error"
            );
            anyhow::bail!("LLM API error {status}: {error_text}");
        }

        Ok(response)
    }
}

#[async_trait]
impl LlmProvider for HttpProvider {
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
        cancel: &CancellationToken,
    ) -> anyhow::Result<LlmResponse> {
        let request_body = self.build_request(messages, tools, model, config, false);

        debug!(
            provider = self.spec.display_name,
            model = %request_body.model,
            messages = messages.len(),
            tools = tools.map_or(0, |t| t.len()),
            "Calling LLM"
        );

        let response = self.send_request(&request_body, cancel).await?;

        let chat_resp: ChatCompletionResponse = tokio::select! {
            result = response.json::<ChatCompletionResponse>() => result
                .map_err(|e| anyhow::anyhow!("Failed to parse LLM response: {e}"))?,
            _ = cancel.cancelled() => anyhow::bail!("LLM request cancelled"),
        };

        if chat_resp.choices.is_empty() {
            anyhow::bail!("LLM response contained no choices");
        }

        let llm_resp: LlmResponse = chat_resp.into();
        debug!(
            provider = self.spec.display_name,
            has_content = llm_resp.content.is_some(),
            tool_calls = llm_resp.tool_calls.len(),
            finish_reason = llm_resp.finish_reason.as_deref().unwrap_or("?"),
            "LLM response received"
        );
        Ok(llm_resp)
    }

    async fn chat_stream(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
        cancel: &CancellationToken,
    ) -> anyhow::Result<mpsc::Receiver<StreamChunk>> {
        let request_body = self.build_request(messages, tools, model, config, true);

        debug!(
            provider = self.spec.display_name,
            model = %request_body.model,
            "Calling LLM (streaming)"
        );

        let response = self.send_request(&request_body, cancel).await?;

        let (tx, rx) = mpsc::channel(64);
        let cancel = cancel.clone();

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut line_buf = String::new();
            let mut acc = StreamAccumulator::default();

            loop {
                let chunk = tokio::select! {
                    _ = cancel.cancelled() => return,
                    chunk = stream.next() => chunk,
                };

                match chunk {
                    Some(Ok(bytes)) => {
                        line_buf.push_str(&String::from_utf8_lossy(&bytes));

                        while let Some(pos) = line_buf.find('\n') {
                            let line: String = line_buf.drain(..=pos).collect();
                            let line = line.trim_end().trim_end_matches('\r');

                            let data = match line.strip_prefix("data:") {
                                Some(d) => d.trim(),
                                None => continue,
                            };

                            if data == "[DONE]" {
                                let _ = tx
                                    .send(StreamChunk::Done {
                                        response: acc.finish(),
                                    })
                                    .await;
                                return;
                            }

                            if let Ok(parsed) = serde_json::from_str::<SseChunk>(data) {
                                if let Some(delta) = acc.apply(parsed) {
                                    if tx.send(StreamChunk::TextDelta { delta }).await.is_err() {
                                        // Receiver dropped — consumer cancelled
                                        return;
                                    }
                                }
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "LLM stream read error");
                        let _ = tx
                            .send(StreamChunk::Done {
                                response: acc.finish(),
                            })
                            .await;
                        return;
                    }
                    None => {
                        // Stream ended without [DONE] — flush what we have
                        let _ = tx
                            .send(StreamChunk::Done {
                                response: acc.finish(),
                            })
                            .await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn display_name(&self) -> &str {
        self.spec.display_name
    }
}

// ─────────────────────────────────────────────
// SSE chunk assembly
// ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SseChunk {
    #[serde(default)]
    choices: Vec<SseChoice>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
struct SseChoice {
    #[serde(default)]
    delta: SseDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SseDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<SseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct SseToolCall {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<SseFunction>,
}

#[derive(Debug, Deserialize)]
struct SseFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Accumulates streamed deltas into the final `LlmResponse`.
#[derive(Default)]
struct StreamAccumulator {
    content: String,
    reasoning: String,
    finish_reason: Option<String>,
    usage: Option<UsageInfo>,
    /// (id, name, arguments) per tool-call index.
    tool_calls: Vec<(String, String, String)>,
}

impl StreamAccumulator {
    /// Fold one SSE chunk into the accumulator; returns the text delta, if any.
    fn apply(&mut self, chunk: SseChunk) -> Option<String> {
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }

        let choice = chunk.choices.into_iter().next()?;

        if choice.finish_reason.is_some() {
            self.finish_reason = choice.finish_reason;
        }

        if let Some(reasoning) = choice.delta.reasoning_content {
            self.reasoning.push_str(&reasoning);
        }

        if let Some(calls) = choice.delta.tool_calls {
            for call in calls {
                let index = call.index.unwrap_or(self.tool_calls.len());
                while self.tool_calls.len() <= index {
                    self.tool_calls
                        .push((String::new(), String::new(), String::new()));
                }
                let slot = &mut self.tool_calls[index];
                if let Some(id) = call.id {
                    slot.0 = id;
                }
                if let Some(function) = call.function {
                    if let Some(name) = function.name {
                        slot.1.push_str(&name);
                    }
                    if let Some(args) = function.arguments {
                        slot.2.push_str(&args);
                    }
                }
            }
        }

        match choice.delta.content {
            Some(delta) if !delta.is_empty() => {
                self.content.push_str(&delta);
                Some(delta)
            }
            _ => None,
        }
    }

    /// Build the terminal response from everything accumulated so far.
    fn finish(self) -> LlmResponse {
        LlmResponse {
            content: if self.content.is_empty() {
                None
            } else {
                Some(self.content)
            },
            tool_calls: self
                .tool_calls
                .into_iter()
                .filter(|(id, name, _)| !id.is_empty() || !name.is_empty())
                .map(|(id, name, args)| ToolCall::new(id, name, args))
                .collect(),
            finish_reason: self.finish_reason,
            usage: self.usage,
            reasoning_content: if self.reasoning.is_empty() {
                None
            } else {
                Some(self.reasoning)
            },
        }
    }
}

// ─────────────────────────────────────────────
// Builder (convenience)
// ─────────────────────────────────────────────

/// Build an HttpProvider from a model name and a map of provider configs.
///
/// Matches the model to a provider spec, reads the config, and creates the
/// provider. Fails when no configured provider covers the model — that is a
/// startup configuration error, not a per-turn one.
pub fn create_provider(
    model: &str,
    providers: &std::collections::HashMap<String, ProviderConfig>,
) -> anyhow::Result<HttpProvider> {
    let (config, spec) = match_provider(model, providers).ok_or_else(|| {
        anyhow::anyhow!(
            "No configured provider found for model '{}'. \
             Set the appropriate API key (e.g. ANTHROPIC_API_KEY, OPENROUTER_API_KEY).",
            model
        )
    })?;

    debug!(
        provider = spec.display_name,
        model = model,
        api_base = config.api_base.as_deref().unwrap_or("default"),
        "Creating LLM provider"
    );

    Ok(HttpProvider::new(config, spec, model))
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::find_by_name;
    use std::collections::HashMap;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_config(api_key: &str, api_base: Option<&str>) -> ProviderConfig {
        ProviderConfig {
            api_key: api_key.to_string(),
            api_base: api_base.map(String::from),
            extra_headers: None,
        }
    }

    fn make_provider(server_url: &str) -> HttpProvider {
        let config = make_config("test-key", Some(server_url));
        let spec = find_by_name("openai").unwrap();
        HttpProvider::new(&config, spec, "gpt-4o")
    }

    #[tokio::test]
    async fn test_chat_success() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chatcmpl-1",
                "choices": [{
                    "message": { "content": "Hello there!" },
                    "finish_reason": "stop"
                }],
                "usage": { "prompt_tokens": 5, "completion_tokens": 3, "total_tokens": 8 }
            })))
            .mount(&server)
            .await;

        let provider = make_provider(&server.uri());
        let cancel = CancellationToken::new();
        let response = provider
            .chat(
                &[Message::user("Hi")],
                None,
                "gpt-4o",
                &LlmRequestConfig::default(),
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(response.content.as_deref(), Some("Hello there!"));
        assert_eq!(response.usage.unwrap().total_tokens, 8);
    }

    #[tokio::test]
    async fn test_chat_tool_calls() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chatcmpl-2",
                "choices": [{
                    "message": {
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": { "name": "exec", "arguments": "{\"command\":\"ls\"}" }
                        }]
                    },
                    "finish_reason": "tool_calls"
                }]
            })))
            .mount(&server)
            .await;

        let provider = make_provider(&server.uri());
        let cancel = CancellationToken::new();
        let response = provider
            .chat(
                &[Message::user("list files")],
                None,
                "gpt-4o",
                &LlmRequestConfig::default(),
                &cancel,
            )
            .await
            .unwrap();

        assert!(response.has_tool_calls());
        assert_eq!(response.tool_calls[0].function.name, "exec");
    }

    #[tokio::test]
    async fn test_chat_http_error_is_err() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
            .mount(&server)
            .await;

        let provider = make_provider(&server.uri());
        let cancel = CancellationToken::new();
        let result = provider
            .chat(
                &[Message::user("Hi")],
                None,
                "gpt-4o",
                &LlmRequestConfig::default(),
                &cancel,
            )
            .await;

        let err = result.unwrap_err().to_string();
        assert!(err.contains("500"));
        assert!(err.contains("upstream exploded"));
    }

    #[tokio::test]
    async fn test_chat_empty_choices_is_err() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chatcmpl-3",
                "choices": [],
                "usage": null
            })))
            .mount(&server)
            .await;

        let provider = make_provider(&server.uri());
        let cancel = CancellationToken::new();
        let result = provider
            .chat(
                &[Message::user("Hi")],
                None,
                "gpt-4o",
                &LlmRequestConfig::default(),
                &cancel,
            )
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_chat_cancelled() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(std::time::Duration::from_secs(5))
                    .set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let provider = make_provider(&server.uri());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = provider
            .chat(
                &[Message::user("Hi")],
                None,
                "gpt-4o",
                &LlmRequestConfig::default(),
                &cancel,
            )
            .await;

        assert!(result.unwrap_err().to_string().contains("cancelled"));
    }

    #[tokio::test]
    async fn test_chat_sends_model_and_params() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o",
                "max_tokens": 1024,
                "temperature": 0.2
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": { "content": "ok" }, "finish_reason": "stop" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = make_provider(&server.uri());
        let cancel = CancellationToken::new();
        let config = LlmRequestConfig {
            max_tokens: 1024,
            temperature: 0.2,
        };
        let response = provider
            .chat(&[Message::user("Hi")], None, "gpt-4o", &config, &cancel)
            .await
            .unwrap();
        assert_eq!(response.content.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_chat_stream_text_deltas() {
        let server = MockServer::start().await;

        let sse = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo!\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({ "stream": true })))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"),
            )
            .mount(&server)
            .await;

        let provider = make_provider(&server.uri());
        let cancel = CancellationToken::new();
        let mut rx = provider
            .chat_stream(
                &[Message::user("Hi")],
                None,
                "gpt-4o",
                &LlmRequestConfig::default(),
                &cancel,
            )
            .await
            .unwrap();

        let mut deltas = Vec::new();
        let mut final_response = None;
        while let Some(chunk) = rx.recv().await {
            match chunk {
                StreamChunk::TextDelta { delta } => deltas.push(delta),
                StreamChunk::Done { response } => final_response = Some(response),
            }
        }

        assert_eq!(deltas.join(""), "Hello!");
        let response = final_response.unwrap();
        assert_eq!(response.content.as_deref(), Some("Hello!"));
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn test_chat_stream_assembles_tool_calls() {
        let server = MockServer::start().await;

        let sse = concat!(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_9\",\"function\":{\"name\":\"exec\",\"arguments\":\"{\\\"comm\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"and\\\":\\\"ls\\\"}\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
            "data: [DONE]\n\n",
        );

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"),
            )
            .mount(&server)
            .await;

        let provider = make_provider(&server.uri());
        let cancel = CancellationToken::new();
        let mut rx = provider
            .chat_stream(
                &[Message::user("list files")],
                None,
                "gpt-4o",
                &LlmRequestConfig::default(),
                &cancel,
            )
            .await
            .unwrap();

        let mut final_response = None;
        while let Some(chunk) = rx.recv().await {
            if let StreamChunk::Done { response } = chunk {
                final_response = Some(response);
            }
        }

        let response = final_response.unwrap();
        assert!(response.has_tool_calls());
        assert_eq!(response.tool_calls[0].id, "call_9");
        assert_eq!(response.tool_calls[0].function.name, "exec");
        assert_eq!(
            response.tool_calls[0].function.arguments,
            "{\"command\":\"ls\"}"
        );
    }

    #[tokio::test]
    async fn test_create_provider_unconfigured() {
        let providers = HashMap::new();
        let result = create_provider("gpt-4o", &providers);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("No configured provider"));
    }

    #[tokio::test]
    async fn test_create_provider_matches() {
        let mut providers = HashMap::new();
        providers.insert("openai".to_string(), make_config("sk-123", None));

        let provider = create_provider("gpt-4o", &providers).unwrap();
        assert_eq!(provider.default_model(), "gpt-4o");
        assert_eq!(provider.display_name(), "OpenAI");
    }
}
