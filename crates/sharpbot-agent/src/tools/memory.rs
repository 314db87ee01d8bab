//! Semantic-memory tools — explicit index and search.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::base::{optional_i64, optional_string, require_string, Tool};
use crate::memory::SemanticMemory;

/// Default number of hits returned by memory_search.
const DEFAULT_TOP_K: usize = 5;

// ─────────────────────────────────────────────
// MemorySearchTool
// ─────────────────────────────────────────────

/// Searches stored memories by semantic similarity.
pub struct MemorySearchTool {
    memory: Arc<dyn SemanticMemory>,
}

impl MemorySearchTool {
    pub fn new(memory: Arc<dyn SemanticMemory>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for MemorySearchTool {
    fn name(&self) -> &str {
        "memory_search"
    }

    fn description(&self) -> &str {
        "Search long-term semantic memory for content related to a query. \
         Returns the best-matching stored chunks with similarity scores."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to search for"
                },
                "top_k": {
                    "type": "integer",
                    "description": "Maximum number of results (default 5)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let query = require_string(&params, "query")?;
        let top_k = optional_i64(&params, "top_k").map_or(DEFAULT_TOP_K, |k| k.max(1) as usize);

        let hits = self.memory.search(&query, top_k, 0.0).await?;
        if hits.is_empty() {
            return Ok("No matching memories found.".into());
        }

        let lines: Vec<String> = hits
            .iter()
            .map(|h| format!("- [{:.2}] ({}) {}", h.score, h.source, h.content))
            .collect();
        Ok(lines.join("\n"))
    }
}

// ─────────────────────────────────────────────
// MemoryIndexTool
// ─────────────────────────────────────────────

/// Stores content in semantic memory.
pub struct MemoryIndexTool {
    memory: Arc<dyn SemanticMemory>,
}

impl MemoryIndexTool {
    pub fn new(memory: Arc<dyn SemanticMemory>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for MemoryIndexTool {
    fn name(&self) -> &str {
        "memory_index"
    }

    fn description(&self) -> &str {
        "Store a piece of content in long-term semantic memory so it can be \
         recalled later by similarity search."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "The content to remember"
                },
                "source": {
                    "type": "string",
                    "description": "Short source tag (e.g. 'conversation', 'note')"
                },
                "source_id": {
                    "type": "string",
                    "description": "Optional identifier within the source"
                }
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let content = require_string(&params, "content")?;
        let source = optional_string(&params, "source").unwrap_or_else(|| "manual".into());
        let source_id = optional_string(&params, "source_id");

        let chunk_id = self
            .memory
            .index(&content, &source, source_id.as_deref())
            .await?;
        Ok(format!("Stored memory chunk {chunk_id}"))
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
