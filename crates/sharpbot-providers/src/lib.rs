//! LLM provider layer for Sharpbot.
//!
//! # Architecture
//!
//! - [`traits::LlmProvider`] — trait every LLM backend implements
//! - [`registry`] — static specs for the supported providers + matching logic
//! - [`http_provider::HttpProvider`] — generic OpenAI-compatible HTTP client
//!   (blocking and SSE-streaming chat completions)
//! - [`embeddings::HttpEmbedder`] — OpenAI-compatible `/embeddings` client
//!   backing semantic memory

pub mod embeddings;
pub mod http_provider;
pub mod registry;
pub mod traits;

// Re-export main types for convenience
pub use embeddings::{Embedder, HttpEmbedder};
pub use http_provider::{create_provider, HttpProvider};
pub use registry::{ProviderConfig, ProviderSpec, PROVIDERS};
pub use traits::{LlmProvider, LlmRequestConfig, StreamChunk};
