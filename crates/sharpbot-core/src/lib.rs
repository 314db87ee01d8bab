//! Sharpbot core — shared types, the message bus, session persistence,
//! configuration, and small utilities used by every other crate.

pub mod bus;
pub mod config;
pub mod heartbeat;
pub mod session;
pub mod types;
pub mod utils;

pub use config::Config;
pub use session::SessionManager;
