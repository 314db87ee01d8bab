//! Sharpbot channels — the adapter contract and message routing.
//!
//! - **base**: the `Channel` trait every chat-protocol adapter satisfies,
//!   plus sender allow-list matching
//! - **manager**: `ChannelManager` — adapter lifecycle and the single
//!   outbound dispatcher task
//!
//! Concrete protocol adapters (Telegram, Slack, Discord, …) plug in behind
//! this contract; they own their I/O and publish inbound messages to the bus.

pub mod base;
pub mod manager;

pub use base::{sender_allowed, Channel};
pub use manager::ChannelManager;
