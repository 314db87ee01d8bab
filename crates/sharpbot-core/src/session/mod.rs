//! Session store — in-memory cache + JSONL file persistence.
//!
//! Each session is a `.jsonl` file under `~/.sharpbot/sessions/`:
//! - Line 1: metadata `{"_type": "metadata", "created_at": "...", ...}`
//! - Lines 2+: one serialized message per line

pub mod manager;

pub use manager::SessionManager;
