//! Tool modules for the Sharpbot agent.

pub mod base;
pub mod registry;

pub mod cron;
pub mod filesystem;
pub mod memory;
pub mod message;
pub mod process;
pub mod shell;
pub mod skill;
pub mod spawn;
pub mod web;

#[cfg(feature = "browser")]
pub mod browser;

pub use base::{optional_bool, optional_i64, optional_string, require_string, Tool};
pub use registry::ToolRegistry;
