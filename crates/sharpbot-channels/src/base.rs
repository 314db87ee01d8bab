//! Channel trait — the contract every chat-protocol adapter satisfies.
//!
//! Adapters own their I/O (WebSocket, long-polling HTTP, webhooks) and are
//! expected to deduplicate incoming ids, honor the sender allow-list,
//! package media as local file paths, and preserve reply threading where
//! the protocol supports it. Inbound messages are injected via the bus.

use async_trait::async_trait;
use sharpbot_core::bus::types::OutboundMessage;

/// Every chat channel adapter implements this trait.
///
/// The `ChannelManager` holds `Arc<dyn Channel>` and orchestrates
/// start/stop/send across all enabled channels.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Unique channel name (e.g. "telegram", "discord", "slack").
    ///
    /// Must match the config key and `OutboundMessage.channel`.
    fn name(&self) -> &str;

    /// Start listening for incoming messages.
    ///
    /// A long-running task that publishes `InboundMessage`s to the bus.
    /// Runs until `stop()` is called or the shutdown signal arrives.
    async fn start(&self) -> anyhow::Result<()>;

    /// Graceful shutdown — stop listening and clean up resources.
    async fn stop(&self) -> anyhow::Result<()>;

    /// Deliver an outbound message to this channel.
    ///
    /// Called by the outbound dispatcher; messages for the same chat id
    /// arrive in enqueue order.
    async fn send(&self, msg: &OutboundMessage) -> anyhow::Result<()>;

    /// Whether the adapter is currently connected/listening.
    fn is_running(&self) -> bool;
}

// ─────────────────────────────────────────────
// Sender allow-list
// ─────────────────────────────────────────────

/// Check a sender against an allow-list.
///
/// An empty list allows everyone. Each entry may carry `|`-separated
/// aliases (e.g. `"12345|@alice|alice"`); a sender matching any segment,
/// case-insensitively, is allowed.
pub fn sender_allowed(allow_list: &[String], sender_id: &str) -> bool {
    if allow_list.is_empty() {
        return true;
    }
    let sender_lower = sender_id.to_lowercase();
    allow_list.iter().any(|entry| {
        entry
            .split('|')
            .any(|alias| alias.trim().to_lowercase() == sender_lower)
    })
}
