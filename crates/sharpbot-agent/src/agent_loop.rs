//! Agent loop — the think → call tools → think controller.
//!
//! Consumes inbound messages from the bus, builds context through the
//! pipeline, drives the LLM with the tool registry, and publishes the final
//! response back over the originating channel.
//!
//! Per turn:
//! 1. `system`-channel messages (subagent results) re-target to the origin
//!    conversation parsed from their chat id.
//! 2. Per-skill env vars are injected behind an RAII guard that restores on
//!    every exit path.
//! 3. History is loaded and the full message list is built.
//! 4. Up to K iterations: compact if needed, call the LLM, execute tool
//!    calls sequentially in declared order. Tool failures become result
//!    text, never aborts.
//! 5. Provider failures abort the turn without touching the session.
//! 6. On completion the user and final assistant messages are appended to
//!    the session and telemetry is emitted.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sharpbot_core::bus::queue::MessageBus;
use sharpbot_core::bus::types::{InboundMessage, OutboundMessage};
use sharpbot_core::config::schema::AgentDefaults;
use sharpbot_core::session::SessionManager;
use sharpbot_core::types::{Message, ToolCall};
use sharpbot_core::Config;
use sharpbot_cron::CronService;
use sharpbot_providers::traits::{LlmProvider, LlmRequestConfig, StreamChunk};

use crate::approval::ApprovalManager;
use crate::compaction::ContextCompactor;
use crate::context::ContextBuilder;
use crate::events::AgentEvent;
use crate::memory::SemanticMemory;
use crate::process::ProcessSessionManager;
use crate::skills::SkillsLoader;
use crate::subagent::SubagentManager;
use crate::telemetry::TurnTelemetry;
use crate::tools::cron::CronTool;
use crate::tools::filesystem::{EditFileTool, ListDirTool, ReadFileTool, WriteFileTool};
use crate::tools::memory::{MemoryIndexTool, MemorySearchTool};
use crate::tools::message::MessageTool;
use crate::tools::process::ProcessTool;
use crate::tools::registry::ToolRegistry;
use crate::tools::shell::ExecTool;
use crate::tools::skill::LoadSkillTool;
use crate::tools::spawn::SpawnTool;
use crate::tools::web::{HttpRequestTool, WebFetchTool, WebSearchTool};

/// Default maximum LLM ↔ tool iterations per turn.
const DEFAULT_MAX_ITERATIONS: usize = 20;

/// Final content when the iteration cap is hit without a tool-free response.
const MAX_ITERATIONS_FALLBACK: &str =
    "I've completed processing but have no response to give.";

// ─────────────────────────────────────────────
// AgentSettings
// ─────────────────────────────────────────────

/// Construction-time knobs for the agent loop.
pub struct AgentSettings {
    /// Application configuration (defaults, exec policy, skills, memory).
    pub config: Arc<Config>,
    /// Workspace root.
    pub workspace: PathBuf,
    /// Agent identity name for the system prompt.
    pub agent_name: String,
    /// Directory of bundled skills (builtin tier).
    pub builtin_skills_dir: Option<PathBuf>,
    /// Data directory for sessions and the exec allowlist.
    pub data_dir: PathBuf,
}

impl AgentSettings {
    pub fn new(config: Arc<Config>, workspace: PathBuf) -> Self {
        Self {
            config,
            workspace,
            agent_name: "Sharpbot".into(),
            builtin_skills_dir: None,
            data_dir: sharpbot_core::utils::get_data_path(),
        }
    }
}

// ─────────────────────────────────────────────
// AgentLoop
// ─────────────────────────────────────────────

/// The main agent loop: polls the message bus, calls the LLM, dispatches tools.
pub struct AgentLoop {
    /// Message bus for inbound/outbound messages.
    bus: Arc<MessageBus>,
    /// LLM provider.
    provider: Arc<dyn LlmProvider>,
    /// Model to use.
    model: String,
    /// Agent defaults (request params, per-model overrides).
    defaults: AgentDefaults,
    /// Max LLM ↔ tool iterations per turn.
    max_iterations: usize,
    /// History messages loaded per turn.
    max_history: usize,
    /// Tool registry.
    tools: ToolRegistry,
    /// Context builder.
    context: ContextBuilder,
    /// Context compactor.
    compactor: ContextCompactor,
    /// Session store.
    sessions: SessionManager,
    /// Semantic memory, when enabled.
    semantic_memory: Option<Arc<dyn SemanticMemory>>,
    /// Enrichment parameters for semantic recall.
    memory_config: sharpbot_core::config::schema::SemanticMemoryConfig,
    /// Context-bearing tools (set_context per turn).
    message_tool: Arc<MessageTool>,
    spawn_tool: Arc<SpawnTool>,
    cron_tool: Option<Arc<CronTool>>,
    /// Subagent manager (also held by SpawnTool; kept for direct access).
    subagent_manager: Arc<SubagentManager>,
    /// Background process sessions (shared with exec/process tools).
    process_sessions: Arc<ProcessSessionManager>,
    /// Exec approval layer (shared, exposed for the status interface).
    approval: Arc<ApprovalManager>,
    /// Cancellation token flowing into provider and tool calls.
    cancel: CancellationToken,
}

impl AgentLoop {
    /// Create a new agent loop.
    pub fn new(
        bus: Arc<MessageBus>,
        provider: Arc<dyn LlmProvider>,
        settings: AgentSettings,
        session_manager: Option<SessionManager>,
        semantic_memory: Option<Arc<dyn SemanticMemory>>,
        cron_service: Option<Arc<CronService>>,
        cancel: CancellationToken,
    ) -> Self {
        let config = settings.config.clone();
        let defaults = config.agents.defaults.clone();
        let model = if defaults.model.is_empty() {
            provider.default_model().to_string()
        } else {
            defaults.model.clone()
        };
        let max_iterations = if defaults.max_tool_iterations == 0 {
            DEFAULT_MAX_ITERATIONS
        } else {
            defaults.max_tool_iterations as usize
        };
        let max_history = defaults.max_history_messages.max(1) as usize;

        let sessions = session_manager.unwrap_or_else(|| {
            SessionManager::new(Some(settings.data_dir.join("sessions")))
                .expect("failed to create session manager")
        });

        let exec_config = config.tools.exec.clone();
        let restrict = config.tools.restrict_to_workspace;
        let brave_api_key = if config.tools.web.search.api_key.is_empty() {
            None
        } else {
            Some(config.tools.web.search.api_key.clone())
        };

        let skills = Arc::new(SkillsLoader::new(
            &settings.workspace,
            settings.builtin_skills_dir.clone(),
            config.skills.clone(),
            config.clone(),
        ));
        let context = ContextBuilder::new(
            settings.workspace.clone(),
            settings.agent_name.clone(),
            skills.clone(),
            config.memory.semantic.enabled,
        );

        let process_sessions = Arc::new(ProcessSessionManager::new(
            Duration::from_secs(exec_config.max_background_seconds),
            Duration::from_secs(exec_config.session_ttl_seconds),
        ));
        let approval = Arc::new(ApprovalManager::new(
            settings.data_dir.join("exec_allowlist.json"),
            Duration::from_secs(exec_config.approval_timeout),
            exec_config.fallback,
        ));

        // Build tool registry
        let mut tools = ToolRegistry::new();
        let allowed_dir = restrict.then(|| settings.workspace.clone());

        tools.register(Arc::new(ReadFileTool::new(allowed_dir.clone())));
        tools.register(Arc::new(WriteFileTool::new(allowed_dir.clone())));
        tools.register(Arc::new(EditFileTool::new(allowed_dir.clone())));
        tools.register(Arc::new(ListDirTool::new(allowed_dir)));
        tools.register(Arc::new(ExecTool::new(
            settings.workspace.clone(),
            exec_config.clone(),
            restrict,
            process_sessions.clone(),
            approval.clone(),
            cancel.clone(),
        )));
        tools.register(Arc::new(ProcessTool::new(process_sessions.clone())));
        tools.register(Arc::new(WebSearchTool::new(brave_api_key.clone())));
        tools.register(Arc::new(WebFetchTool::new()));
        tools.register(Arc::new(HttpRequestTool::new()));
        tools.register(Arc::new(LoadSkillTool::new(skills)));

        let message_tool = Arc::new(MessageTool::new(Some(bus.clone())));
        tools.register(message_tool.clone());

        let subagent_manager = Arc::new(SubagentManager::new(
            provider.clone(),
            settings.workspace.clone(),
            bus.clone(),
            model.clone(),
            brave_api_key,
            exec_config,
            restrict,
            LlmRequestConfig {
                max_tokens: defaults.max_tokens,
                temperature: defaults.temperature,
            },
            cancel.clone(),
        ));

        let spawn_tool = Arc::new(SpawnTool::new(subagent_manager.clone()));
        tools.register(spawn_tool.clone());

        let cron_tool = cron_service.map(|service| {
            let tool = Arc::new(CronTool::new(service));
            tools.register(tool.clone());
            tool
        });

        if let Some(memory) = &semantic_memory {
            tools.register(Arc::new(MemorySearchTool::new(memory.clone())));
            tools.register(Arc::new(MemoryIndexTool::new(memory.clone())));
        }

        #[cfg(feature = "browser")]
        if config.tools.browser.enabled {
            let manager = Arc::new(crate::tools::browser::BrowserManager::new(
                config.tools.browser.headless,
            ));
            for tool in crate::tools::browser::browser_tools(manager) {
                tools.register(tool);
            }
        }

        info!(
            model = %model,
            tools = tools.len(),
            max_iterations = max_iterations,
            "agent loop initialized"
        );

        Self {
            bus,
            provider,
            model,
            defaults,
            max_iterations,
            max_history,
            tools,
            context,
            compactor: ContextCompactor::default(),
            sessions,
            semantic_memory,
            memory_config: config.memory.semantic.clone(),
            message_tool,
            spawn_tool,
            cron_tool,
            subagent_manager,
            process_sessions,
            approval,
            cancel,
        }
    }

    /// Run the event loop: poll inbound messages and process them.
    ///
    /// Returns when the inbound channel closes or the token is cancelled.
    pub async fn run(&self) {
        info!("agent loop started, waiting for messages");
        loop {
            let msg = tokio::select! {
                msg = self.bus.consume_inbound() => msg,
                _ = self.cancel.cancelled() => {
                    info!("agent loop cancelled");
                    break;
                }
            };

            let msg = match msg {
                Some(msg) => msg,
                None => {
                    info!("inbound channel closed, agent loop exiting");
                    break;
                }
            };

            let session_key = msg.session_key();
            debug!(session_key = %session_key, "received message");

            match self.process_message(&msg).await {
                Ok(response) => {
                    if let Err(e) = self.bus.publish_outbound(response).await {
                        error!(error = %e, "failed to publish outbound message");
                    }
                }
                Err(e) => {
                    error!(error = %e, session_key = %session_key, "message processing error");
                    let target = self.resolve_origin(&msg).unwrap_or_else(|_| {
                        (msg.channel.clone(), msg.chat_id.clone())
                    });
                    let err_msg = OutboundMessage::new(
                        &target.0,
                        &target.1,
                        &format!("Sorry, I encountered an error: {e}"),
                    );
                    let _ = self.bus.publish_outbound(err_msg).await;
                }
            }
        }
    }

    /// Parse the origin conversation for a message.
    ///
    /// `system`-channel messages (subagent results) encode the origin as
    /// `"{channel}:{chatId}"` in their chat id.
    fn resolve_origin(&self, msg: &InboundMessage) -> Result<(String, String)> {
        if msg.channel == "system" {
            match msg.chat_id.split_once(':') {
                Some((channel, chat_id)) => Ok((channel.to_string(), chat_id.to_string())),
                None => anyhow::bail!(
                    "Invalid system message chat_id format: {}",
                    msg.chat_id
                ),
            }
        } else {
            Ok((msg.channel.clone(), msg.chat_id.clone()))
        }
    }

    /// Process a single inbound message → outbound response.
    pub async fn process_message(&self, msg: &InboundMessage) -> Result<OutboundMessage> {
        self.process_inner(msg, None).await
    }

    /// Streaming variant: same algorithm, emitting incremental events.
    ///
    /// Text deltas stream until the first tool-call-bearing response; after
    /// that only tool/status events flow, and the final text arrives in the
    /// terminal `Completed` event.
    pub async fn process_message_streaming(
        &self,
        msg: &InboundMessage,
        events: mpsc::Sender<AgentEvent>,
    ) -> Result<OutboundMessage> {
        self.process_inner(msg, Some(events)).await
    }

    async fn process_inner(
        &self,
        msg: &InboundMessage,
        events: Option<mpsc::Sender<AgentEvent>>,
    ) -> Result<OutboundMessage> {
        let (origin_channel, origin_chat_id) = self.resolve_origin(msg)?;
        let session_key = format!("{origin_channel}:{origin_chat_id}");

        // Scoped skill env injection — the guard restores on every exit path.
        let _env = self.context.skills().inject_env();

        // Context-bearing tools target the origin conversation this turn.
        self.message_tool
            .set_context(&origin_channel, &origin_chat_id)
            .await;
        self.spawn_tool
            .set_context(&origin_channel, &origin_chat_id)
            .await;
        if let Some(cron_tool) = &self.cron_tool {
            cron_tool.set_context(&origin_channel, &origin_chat_id).await;
        }

        let mut telemetry =
            TurnTelemetry::begin(&origin_channel, &msg.sender_id, &session_key, &self.model);

        // Build the message list
        let history = self.sessions.get_history(&session_key, self.max_history);
        let enrichment = self.memory_enrichment(&msg.content).await;
        let media_paths: Vec<String> = msg.media.iter().map(|m| m.path.clone()).collect();
        let mut messages = self.context.build_messages(
            &history,
            &msg.content,
            &media_paths,
            &origin_channel,
            &origin_chat_id,
            enrichment.as_deref(),
        );

        let tool_defs = self.tools.get_definitions();
        let (max_tokens, temperature) = self.defaults.resolve_request_params(&self.model);
        let request_config = LlmRequestConfig {
            max_tokens,
            temperature,
        };

        // Iterate: compact → LLM → tools
        let mut final_content: Option<String> = None;
        let mut stream_text = events.is_some();

        for iteration in 0..self.max_iterations {
            if self.cancel.is_cancelled() {
                telemetry.finish(false);
                anyhow::bail!("turn cancelled");
            }

            match self
                .compactor
                .compact_if_needed(
                    &messages,
                    &self.model,
                    self.provider.as_ref(),
                    &request_config,
                    &self.cancel,
                )
                .await
            {
                Ok(Some(compacted)) => {
                    messages = compacted;
                    telemetry.record_compaction();
                    if let Some(tx) = &events {
                        let _ = tx
                            .send(AgentEvent::Status {
                                message: "Compacted conversation context".into(),
                            })
                            .await;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "compaction check failed, continuing"),
            }

            debug!(iteration = iteration, "LLM call");
            let started = Instant::now();

            let response = if stream_text {
                let result = self
                    .stream_one_call(&messages, &tool_defs, &request_config, events.as_ref())
                    .await;
                match result {
                    Ok(response) => response,
                    Err(e) => {
                        telemetry.finish(false);
                        return Err(e);
                    }
                }
            } else {
                match self
                    .provider
                    .chat(
                        &messages,
                        Some(&tool_defs),
                        &self.model,
                        &request_config,
                        &self.cancel,
                    )
                    .await
                {
                    Ok(response) => response,
                    Err(e) => {
                        // Provider failure aborts the turn; session untouched.
                        telemetry.finish(false);
                        return Err(e);
                    }
                }
            };

            telemetry.record_call(started.elapsed().as_millis() as u64, response.usage.as_ref());

            if !response.has_tool_calls() {
                final_content = response.content;
                break;
            }

            // Text streaming stops once the first tool-call response arrives.
            stream_text = false;

            let tool_calls: Vec<ToolCall> = response.tool_calls.clone();
            ContextBuilder::add_assistant_message(
                &mut messages,
                response.content.clone(),
                tool_calls.clone(),
            );

            // Execute sequentially, in the LLM's declared order.
            for tc in &tool_calls {
                if self.cancel.is_cancelled() {
                    telemetry.finish(false);
                    anyhow::bail!("turn cancelled");
                }

                let params: HashMap<String, serde_json::Value> =
                    serde_json::from_str(&tc.function.arguments).unwrap_or_default();

                info!(
                    tool = %tc.function.name,
                    iteration = iteration,
                    "executing tool call"
                );
                if let Some(tx) = &events {
                    let _ = tx
                        .send(AgentEvent::ToolStart {
                            call_id: tc.id.clone(),
                            name: tc.function.name.clone(),
                        })
                        .await;
                }

                let tool_started = Instant::now();
                let result = self.tools.execute(&tc.function.name, params).await;
                let ok = !result.starts_with("Error");

                telemetry.record_tool(
                    &tc.function.name,
                    ok,
                    tool_started.elapsed().as_millis() as u64,
                );
                if let Some(tx) = &events {
                    let _ = tx
                        .send(AgentEvent::ToolEnd {
                            call_id: tc.id.clone(),
                            name: tc.function.name.clone(),
                            ok,
                        })
                        .await;
                }

                debug!(tool = %tc.function.name, result_len = result.len(), "tool result");
                ContextBuilder::add_tool_result(&mut messages, &tc.id, &tc.function.name, &result);
            }
        }

        if final_content.is_none() {
            telemetry.max_iterations_hit = true;
        }
        let content = final_content.unwrap_or_else(|| MAX_ITERATIONS_FALLBACK.into());

        // Exactly one new user + one new assistant message per completed turn
        self.sessions
            .add_message(&session_key, Message::user(&msg.content));
        self.sessions
            .add_message(&session_key, Message::assistant(&content));

        if let Some(tx) = &events {
            let _ = tx
                .send(AgentEvent::Completed {
                    content: content.clone(),
                    iterations: telemetry.iterations,
                    compactions: telemetry.compactions,
                })
                .await;
        }

        telemetry.finish(true);

        Ok(OutboundMessage::new(&origin_channel, &origin_chat_id, &content))
    }

    /// One streamed LLM call, forwarding text deltas to the event channel.
    async fn stream_one_call(
        &self,
        messages: &[Message],
        tool_defs: &[sharpbot_core::types::ToolDefinition],
        request_config: &LlmRequestConfig,
        events: Option<&mpsc::Sender<AgentEvent>>,
    ) -> Result<sharpbot_core::types::LlmResponse> {
        let mut rx = self
            .provider
            .chat_stream(
                messages,
                Some(tool_defs),
                &self.model,
                request_config,
                &self.cancel,
            )
            .await?;

        while let Some(chunk) = rx.recv().await {
            match chunk {
                StreamChunk::TextDelta { delta } => {
                    if let Some(tx) = events {
                        let _ = tx.send(AgentEvent::TextDelta { delta }).await;
                    }
                }
                StreamChunk::Done { response } => return Ok(response),
            }
        }

        anyhow::bail!("LLM stream ended without a terminal response")
    }

    /// Render the semantic-memory enrichment block for a user message.
    async fn memory_enrichment(&self, user_text: &str) -> Option<String> {
        let memory = self.semantic_memory.as_ref()?;
        let top_k = self.memory_config.top_k.max(1) as usize;
        let min_score = self.memory_config.min_score;

        match memory.search(user_text, top_k, min_score).await {
            Ok(hits) if !hits.is_empty() => {
                let lines: Vec<String> = hits
                    .iter()
                    .map(|h| format!("- [{:.2}] ({}) {}", h.score, h.source, h.content))
                    .collect();
                Some(lines.join("\n"))
            }
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "semantic memory search failed");
                None
            }
        }
    }

    /// Direct processing mode (CLI entry point): wraps text into an
    /// `InboundMessage` on the `cli` channel with the `direct` chat id.
    pub async fn process_direct(&self, text: &str) -> Result<String> {
        let msg = InboundMessage::new("cli", "user", "direct", text);
        let response = self.process_message(&msg).await?;
        Ok(response.content)
    }

    /// Tool registry (for testing/extension).
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// The model name in use.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// The exec approval layer (for the status interface).
    pub fn approval(&self) -> &Arc<ApprovalManager> {
        &self.approval
    }

    /// The background process session manager.
    pub fn process_sessions(&self) -> &Arc<ProcessSessionManager> {
        &self.process_sessions
    }

    /// The subagent manager.
    pub fn subagents(&self) -> &Arc<SubagentManager> {
        &self.subagent_manager
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sharpbot_core::types::{LlmResponse, ToolDefinition};

    /// A mock LLM provider that returns canned responses in sequence.
    struct MockProvider {
        responses: std::sync::Mutex<Vec<anyhow::Result<LlmResponse>>>,
        stream_deltas: Vec<String>,
    }

    impl MockProvider {
        fn new(responses: Vec<LlmResponse>) -> Self {
            Self {
                responses: std::sync::Mutex::new(responses.into_iter().map(Ok).collect()),
                stream_deltas: Vec::new(),
            }
        }

        fn simple(text: &str) -> Self {
            Self::new(vec![LlmResponse {
                content: Some(text.into()),
                ..Default::default()
            }])
        }

        fn failing(message: &str) -> Self {
            Self {
                responses: std::sync::Mutex::new(vec![Err(anyhow::anyhow!(
                    "{message}"
                ))]),
                stream_deltas: Vec::new(),
            }
        }

        fn with_stream_deltas(mut self, deltas: &[&str]) -> Self {
            self.stream_deltas = deltas.iter().map(|d| d.to_string()).collect();
            self
        }

        fn next_response(&self) -> anyhow::Result<LlmResponse> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(LlmResponse {
                    content: Some("(no more responses)".into()),
                    ..Default::default()
                })
            } else {
                responses.remove(0)
            }
        }
    }

    #[async_trait]
    impl LlmProvider for MockProvider {
        async fn chat(
            &self,
            _messages: &[Message],
            _tools: Option<&[ToolDefinition]>,
            _model: &str,
            _config: &LlmRequestConfig,
            _cancel: &CancellationToken,
        ) -> anyhow::Result<LlmResponse> {
            self.next_response()
        }

        async fn chat_stream(
            &self,
            _messages: &[Message],
            _tools: Option<&[ToolDefinition]>,
            _model: &str,
            _config: &LlmRequestConfig,
            _cancel: &CancellationToken,
        ) -> anyhow::Result<mpsc::Receiver<StreamChunk>> {
            let response = self.next_response()?;
            let (tx, rx) = mpsc::channel(16);
            for delta in &self.stream_deltas {
                let _ = tx
                    .send(StreamChunk::TextDelta {
                        delta: delta.clone(),
                    })
                    .await;
            }
            let _ = tx.send(StreamChunk::Done { response }).await;
            Ok(rx)
        }

        fn default_model(&self) -> &str {
            "mock-model"
        }

        fn display_name(&self) -> &str {
            "MockProvider"
        }
    }

    struct TestAgent {
        agent: AgentLoop,
        _dir: tempfile::TempDir,
    }

    fn create_test_agent(provider: Arc<dyn LlmProvider>) -> TestAgent {
        let dir = tempfile::tempdir().unwrap();
        let workspace = dir.path().join("workspace");
        std::fs::create_dir_all(&workspace).unwrap();

        let mut config = Config::default();
        config.agents.defaults.max_tool_iterations = 5;
        config.agents.defaults.model = "mock-model".into();

        let mut settings = AgentSettings::new(Arc::new(config), workspace);
        settings.data_dir = dir.path().join("data");

        let sessions =
            SessionManager::new(Some(settings.data_dir.join("sessions"))).unwrap();

        let agent = AgentLoop::new(
            Arc::new(MessageBus::new(32)),
            provider,
            settings,
            Some(sessions),
            None,
            None,
            CancellationToken::new(),
        );

        TestAgent { agent, _dir: dir }
    }

    #[tokio::test]
    async fn test_no_tool_turn() {
        let provider = Arc::new(MockProvider::simple("Hello!"));
        let harness = create_test_agent(provider);

        let msg = InboundMessage::new("cli", "user", "direct", "Hi");
        let response = harness.agent.process_message(&msg).await.unwrap();

        assert_eq!(response.content, "Hello!");
        assert_eq!(response.channel, "cli");

        // Session grew by exactly one user + one assistant message
        let history = harness.agent.sessions.get_history("cli:direct", 50);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].plain_text(), "Hi");
        assert_eq!(history[1].plain_text(), "Hello!");
    }

    #[tokio::test]
    async fn test_single_tool_call_turn() {
        let dir = tempfile::tempdir().unwrap();
        let test_file = dir.path().join("test.txt");
        std::fs::write(&test_file, "file content here").unwrap();

        let tool_call = ToolCall::new(
            "c1",
            "read_file",
            serde_json::json!({"path": test_file.to_str().unwrap()}).to_string(),
        );

        let provider = Arc::new(MockProvider::new(vec![
            LlmResponse {
                content: None,
                tool_calls: vec![tool_call],
                ..Default::default()
            },
            LlmResponse {
                content: Some("The file contains: file content here".into()),
                ..Default::default()
            },
        ]));

        let harness = create_test_agent(provider);
        let result = harness.agent.process_direct("Read test.txt").await.unwrap();
        assert_eq!(result, "The file contains: file content here");
    }

    #[tokio::test]
    async fn test_max_iterations_returns_default() {
        // Every response carries a tool call → the cap is exhausted
        let tool_call = ToolCall::new("loop", "list_dir", r#"{"path": "/tmp"}"#);
        let responses: Vec<LlmResponse> = (0..10)
            .map(|_| LlmResponse {
                content: None,
                tool_calls: vec![tool_call.clone()],
                ..Default::default()
            })
            .collect();

        let provider = Arc::new(MockProvider::new(responses));
        let harness = create_test_agent(provider);

        let result = harness.agent.process_direct("loop forever").await.unwrap();
        assert!(result.contains("completed processing"));
    }

    #[tokio::test]
    async fn test_tool_failure_is_captured_not_fatal() {
        let tool_call = ToolCall::new(
            "c1",
            "read_file",
            r#"{"path": "/definitely/not/a/real/file.txt"}"#,
        );
        let provider = Arc::new(MockProvider::new(vec![
            LlmResponse {
                content: None,
                tool_calls: vec![tool_call],
                ..Default::default()
            },
            LlmResponse {
                content: Some("That file doesn't exist.".into()),
                ..Default::default()
            },
        ]));

        let harness = create_test_agent(provider);
        let result = harness.agent.process_direct("read it").await.unwrap();
        assert_eq!(result, "That file doesn't exist.");
    }

    #[tokio::test]
    async fn test_provider_failure_aborts_without_session_update() {
        let provider = Arc::new(MockProvider::failing("upstream 503"));
        let harness = create_test_agent(provider);

        let msg = InboundMessage::new("cli", "user", "direct", "Hi");
        let result = harness.agent.process_message(&msg).await;
        assert!(result.is_err());

        // Failed turn: session unchanged
        let history = harness.agent.sessions.get_history("cli:direct", 50);
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_system_message_retargets_to_origin() {
        let provider = Arc::new(MockProvider::simple("Here's a summary of the result."));
        let harness = create_test_agent(provider);

        let msg = InboundMessage::new(
            "system",
            "subagent",
            "telegram:chat_42",
            "## Subagent Result\n**Task**: test\n\nDone!",
        );

        let response = harness.agent.process_message(&msg).await.unwrap();
        assert_eq!(response.channel, "telegram");
        assert_eq!(response.chat_id, "chat_42");
        assert_eq!(response.content, "Here's a summary of the result.");

        // The result lands in the origin conversation's session
        let history = harness.agent.sessions.get_history("telegram:chat_42", 50);
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn test_system_message_invalid_format() {
        let provider = Arc::new(MockProvider::simple("ok"));
        let harness = create_test_agent(provider);

        let msg = InboundMessage::new("system", "subagent", "no_colon_here", "test");
        let result = harness.agent.process_message(&msg).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_cancelled_turn_errors_out() {
        let provider = Arc::new(MockProvider::simple("never delivered"));
        let dir = tempfile::tempdir().unwrap();
        let workspace = dir.path().join("workspace");
        std::fs::create_dir_all(&workspace).unwrap();

        let mut settings =
            AgentSettings::new(Arc::new(Config::default()), workspace);
        settings.data_dir = dir.path().join("data");
        let sessions =
            SessionManager::new(Some(settings.data_dir.join("sessions"))).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let agent = AgentLoop::new(
            Arc::new(MessageBus::new(32)),
            provider,
            settings,
            Some(sessions),
            None,
            None,
            cancel,
        );

        let result = agent.process_direct("hello").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_streaming_emits_deltas_and_completed() {
        let provider = Arc::new(
            MockProvider::simple("Hello streamed!").with_stream_deltas(&["Hello ", "streamed!"]),
        );
        let harness = create_test_agent(provider);

        let (tx, mut rx) = mpsc::channel(64);
        let msg = InboundMessage::new("cli", "user", "direct", "Hi");
        let response = harness
            .agent
            .process_message_streaming(&msg, tx)
            .await
            .unwrap();
        assert_eq!(response.content, "Hello streamed!");

        let mut deltas = String::new();
        let mut completed = None;
        while let Some(event) = rx.recv().await {
            match event {
                AgentEvent::TextDelta { delta } => deltas.push_str(&delta),
                AgentEvent::Completed {
                    content,
                    iterations,
                    ..
                } => {
                    completed = Some((content, iterations));
                }
                _ => {}
            }
        }

        assert_eq!(deltas, "Hello streamed!");
        let (content, iterations) = completed.unwrap();
        assert_eq!(content, "Hello streamed!");
        assert_eq!(iterations, 1);
    }

    #[tokio::test]
    async fn test_streaming_tool_events() {
        let dir = tempfile::tempdir().unwrap();
        let test_file = dir.path().join("s.txt");
        std::fs::write(&test_file, "data").unwrap();

        let tool_call = ToolCall::new(
            "c1",
            "read_file",
            serde_json::json!({"path": test_file.to_str().unwrap()}).to_string(),
        );
        let provider = Arc::new(MockProvider::new(vec![
            LlmResponse {
                content: None,
                tool_calls: vec![tool_call],
                ..Default::default()
            },
            LlmResponse {
                content: Some("done".into()),
                ..Default::default()
            },
        ]));

        let harness = create_test_agent(provider);
        let (tx, mut rx) = mpsc::channel(64);
        let msg = InboundMessage::new("cli", "user", "direct", "read it");
        harness
            .agent
            .process_message_streaming(&msg, tx)
            .await
            .unwrap();

        let mut saw_start = false;
        let mut saw_end_ok = false;
        while let Some(event) = rx.recv().await {
            match event {
                AgentEvent::ToolStart { name, .. } => {
                    assert_eq!(name, "read_file");
                    saw_start = true;
                }
                AgentEvent::ToolEnd { ok, .. } => {
                    saw_end_ok = ok;
                }
                _ => {}
            }
        }
        assert!(saw_start);
        assert!(saw_end_ok);
    }

    #[test]
    fn test_default_tools_registered() {
        let provider = Arc::new(MockProvider::simple("ok"));
        let harness = create_test_agent(provider);

        let names = harness.agent.tools().tool_names();
        for expected in [
            "read_file",
            "write_file",
            "edit_file",
            "list_dir",
            "exec",
            "process",
            "web_search",
            "web_fetch",
            "http_request",
            "message",
            "spawn",
            "load_skill",
        ] {
            assert!(names.contains(&expected.into()), "missing tool {expected}");
        }
        // cron and memory tools are absent without their services
        assert!(!names.contains(&"cron".into()));
        assert!(!names.contains(&"memory_search".into()));
    }

    #[test]
    fn test_model_comes_from_config() {
        let provider = Arc::new(MockProvider::simple("ok"));
        let harness = create_test_agent(provider);
        assert_eq!(harness.agent.model(), "mock-model");
    }

    #[tokio::test]
    async fn test_subagent_manager_accessible() {
        let provider = Arc::new(MockProvider::simple("ok"));
        let harness = create_test_agent(provider);
        assert_eq!(harness.agent.subagents().task_count().await, 0);
    }
}
