//! Message bus — the duplex queue pair between channel adapters and the agent.
//!
//! The bus is the only synchronization point between adapters and the agent
//! loop; there is no shared mutable state across them.

pub mod queue;
pub mod types;

pub use queue::MessageBus;
pub use types::{InboundMessage, OutboundMessage};
