//! Embeddings client — backs the semantic-memory store.
//!
//! Talks to any OpenAI-compatible `/embeddings` endpoint.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// Anything that can turn text into a vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text into a dense vector.
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;

    /// Model identifier, for logging.
    fn model(&self) -> &str;
}

// ─────────────────────────────────────────────
// HttpEmbedder
// ─────────────────────────────────────────────

/// OpenAI-compatible `/embeddings` HTTP client.
pub struct HttpEmbedder {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    /// Create a new embedder.
    ///
    /// `api_base` defaults to the OpenAI endpoint when `None`.
    pub fn new(api_key: impl Into<String>, api_base: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            api_base: api_base.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    fn embeddings_url(&self) -> String {
        format!("{}/embeddings", self.api_base.trim_end_matches('/'))
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        debug!(model = %self.model, chars = text.len(), "embedding text");

        let response = self
            .client
            .post(self.embeddings_url())
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "input": text,
            }))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Embeddings request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Embeddings API error {status}: {body}");
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse embeddings response: {e}"))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|row| row.embedding)
            .ok_or_else(|| anyhow::anyhow!("Embeddings response contained no data"))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
