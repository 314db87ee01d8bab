//! Message tool — lets the agent proactively send messages to channels.
//!
//! Holds a mutable `(channel, chat_id)` context the agent loop sets at the
//! start of every turn, used as the default target.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;

use sharpbot_core::bus::queue::MessageBus;
use sharpbot_core::bus::types::OutboundMessage;

use super::base::{optional_string, require_string, Tool};

// ─────────────────────────────────────────────
// MessageTool
// ─────────────────────────────────────────────

/// Publishes an `OutboundMessage` to the bus.
pub struct MessageTool {
    /// Bus to publish on; `None` in detached/test setups.
    bus: Option<Arc<MessageBus>>,
    /// Default channel / chat_id set per-turn by the agent loop.
    context: Mutex<(String, String)>,
}

impl MessageTool {
    /// Create a new message tool.
    pub fn new(bus: Option<Arc<MessageBus>>) -> Self {
        Self {
            bus,
            context: Mutex::new(("cli".into(), "direct".into())),
        }
    }

    /// Set the current context (called by the agent loop per turn).
    pub async fn set_context(&self, channel: &str, chat_id: &str) {
        let mut ctx = self.context.lock().await;
        *ctx = (channel.to_string(), chat_id.to_string());
    }
}

#[async_trait]
impl Tool for MessageTool {
    fn name(&self) -> &str {
        "message"
    }

    fn description(&self) -> &str {
        "Send a message to a channel. By default sends to the current conversation. \
         Can optionally specify a different channel and chat_id to send to."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "The message content to send"
                },
                "channel": {
                    "type": "string",
                    "description": "Target channel (optional, defaults to current)"
                },
                "chat_id": {
                    "type": "string",
                    "description": "Target chat ID (optional, defaults to current)"
                }
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let content = require_string(&params, "content")?;
        let param_channel = optional_string(&params, "channel");
        let param_chat_id = optional_string(&params, "chat_id");

        let ctx = self.context.lock().await;
        let channel = param_channel.unwrap_or_else(|| ctx.0.clone());
        let chat_id = param_chat_id.unwrap_or_else(|| ctx.1.clone());
        drop(ctx);

        debug!(channel = %channel, chat_id = %chat_id, "sending message via tool");

        let msg = OutboundMessage::new(&channel, &chat_id, &content);

        if let Some(bus) = &self.bus {
            bus.publish_outbound(msg)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to publish message: {e}"))?;
        } else {
            debug!("No bus configured; message discarded");
        }

        Ok(format!("Message sent to {channel}:{chat_id}"))
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
