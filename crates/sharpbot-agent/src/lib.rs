//! Sharpbot agent — the core runtime turning inbound messages into grounded,
//! tool-augmented LLM responses.
//!
//! This crate contains:
//! - **agent_loop**: the think → call tools → think controller
//! - **context / skills / compaction / memory**: the context pipeline
//! - **tools / process / approval**: the execution plane
//! - **subagent**: bounded background delegates reporting via the bus

pub mod agent_loop;
pub mod approval;
pub mod compaction;
pub mod context;
pub mod events;
pub mod memory;
pub mod process;
pub mod skills;
pub mod subagent;
pub mod telemetry;
pub mod tools;

pub use agent_loop::{AgentLoop, AgentSettings};
pub use approval::ApprovalManager;
pub use compaction::ContextCompactor;
pub use context::ContextBuilder;
pub use events::AgentEvent;
pub use memory::{MemoryStore, SemanticMemory, VectorMemory};
pub use process::ProcessSessionManager;
pub use skills::SkillsLoader;
pub use subagent::SubagentManager;
pub use telemetry::TurnTelemetry;
pub use tools::{Tool, ToolRegistry};
