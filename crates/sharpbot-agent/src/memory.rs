//! Memory — pinned file notes and embedding-backed semantic recall.
//!
//! Two layers:
//! - **File notes**: `workspace/memory/MEMORY.md` (pinned notes injected into
//!   every system prompt) and `workspace/memory/YYYY-MM-DD.md` daily notes.
//!   The agent writes these through the filesystem tools.
//! - **Semantic memory**: embedding chunks stored as JSONL, queried by cosine
//!   similarity. Exposed to the LLM via the `memory_search` / `memory_index`
//!   tools and used by the context pipeline for enrichment.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use sharpbot_providers::embeddings::Embedder;

// ─────────────────────────────────────────────
// MemoryStore (file notes)
// ─────────────────────────────────────────────

/// File-based notes store.
pub struct MemoryStore {
    /// The `memory/` directory inside the workspace.
    memory_dir: PathBuf,
    /// Path to the pinned-notes file.
    memory_file: PathBuf,
}

impl MemoryStore {
    /// Create a MemoryStore without touching the filesystem.
    pub fn new_lazy(workspace: &Path) -> Self {
        let memory_dir = workspace.join("memory");
        let memory_file = memory_dir.join("MEMORY.md");
        Self {
            memory_dir,
            memory_file,
        }
    }

    /// Read the pinned-notes file. Returns empty string if absent.
    pub fn read_pinned(&self) -> String {
        std::fs::read_to_string(&self.memory_file).unwrap_or_default()
    }

    /// Overwrite the pinned-notes file.
    pub fn write_pinned(&self, content: &str) -> std::io::Result<()> {
        self.ensure_dir()?;
        std::fs::write(&self.memory_file, content)
    }

    /// Path to today's daily notes file.
    pub fn today_file(&self) -> PathBuf {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        self.memory_dir.join(format!("{today}.md"))
    }

    /// Read today's daily notes. Returns empty string if absent.
    pub fn read_today(&self) -> String {
        std::fs::read_to_string(self.today_file()).unwrap_or_default()
    }

    /// Append content to today's daily notes, creating the file with a date
    /// header when needed.
    pub fn append_today(&self, content: &str) -> std::io::Result<()> {
        self.ensure_dir()?;
        let path = self.today_file();
        if path.exists() {
            let mut existing = std::fs::read_to_string(&path)?;
            existing.push('\n');
            existing.push_str(content);
            std::fs::write(&path, existing)
        } else {
            let today = Utc::now().format("%Y-%m-%d").to_string();
            std::fs::write(&path, format!("# {today}\n\n{content}"))
        }
    }

    /// Build the notes block for the system prompt; `None` when empty.
    pub fn get_memory_context(&self) -> Option<String> {
        let mut sections = Vec::new();

        let pinned = self.read_pinned();
        if !pinned.trim().is_empty() {
            sections.push(format!("## Pinned Notes\n\n{pinned}"));
        }

        let today_content = self.read_today();
        if !today_content.trim().is_empty() {
            let today = Utc::now().format("%Y-%m-%d").to_string();
            sections.push(format!("## Today's Notes ({today})\n\n{today_content}"));
        }

        if sections.is_empty() {
            None
        } else {
            Some(format!("# Memory\n\n{}", sections.join("\n\n")))
        }
    }

    /// Path to the pinned-notes file.
    pub fn memory_file(&self) -> &Path {
        &self.memory_file
    }

    /// Path to the memory directory.
    pub fn memory_dir(&self) -> &Path {
        &self.memory_dir
    }

    fn ensure_dir(&self) -> std::io::Result<()> {
        if !self.memory_dir.exists() {
            std::fs::create_dir_all(&self.memory_dir)?;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────
// Semantic memory contract
// ─────────────────────────────────────────────

/// One search hit from semantic memory.
#[derive(Clone, Debug)]
pub struct MemoryHit {
    pub content: String,
    pub source: String,
    pub source_id: Option<String>,
    /// Cosine similarity score (higher is closer).
    pub score: f32,
}

/// Store statistics.
#[derive(Clone, Copy, Debug)]
pub struct MemoryStats {
    pub total_chunks: usize,
}

/// Embedding-backed memory interface.
#[async_trait]
pub trait SemanticMemory: Send + Sync {
    /// Embed and store content; returns the new chunk id.
    async fn index(
        &self,
        content: &str,
        source: &str,
        source_id: Option<&str>,
    ) -> anyhow::Result<String>;

    /// Top-k chunks by cosine similarity, descending, filtered by min score.
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        min_score: f32,
    ) -> anyhow::Result<Vec<MemoryHit>>;

    /// Store statistics.
    async fn stats(&self) -> anyhow::Result<MemoryStats>;
}

// ─────────────────────────────────────────────
// VectorMemory
// ─────────────────────────────────────────────

/// A stored embedding chunk (one JSONL line on disk).
#[derive(Clone, Debug, Serialize, Deserialize)]
struct MemoryChunk {
    id: String,
    source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_id: Option<String>,
    content: String,
    embedding: Vec<f32>,
}

/// JSONL-persisted vector store with in-memory cosine scan.
pub struct VectorMemory {
    embedder: Arc<dyn Embedder>,
    path: PathBuf,
    chunks: RwLock<Vec<MemoryChunk>>,
}

impl VectorMemory {
    /// Create a store, loading any persisted chunks.
    pub fn new(embedder: Arc<dyn Embedder>, path: PathBuf) -> Self {
        let chunks = load_chunks(&path);
        debug!(chunks = chunks.len(), path = %path.display(), "semantic memory loaded");
        Self {
            embedder,
            path,
            chunks: RwLock::new(chunks),
        }
    }

    fn append_to_disk(&self, chunk: &MemoryChunk) {
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let line = match serde_json::to_string(chunk) {
            Ok(l) => l,
            Err(e) => {
                warn!(error = %e, "failed to serialize memory chunk");
                return;
            }
        };
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| {
                use std::io::Write;
                writeln!(f, "{line}")
            });
        if let Err(e) = result {
            warn!(error = %e, "failed to persist memory chunk");
        }
    }
}

#[async_trait]
impl SemanticMemory for VectorMemory {
    async fn index(
        &self,
        content: &str,
        source: &str,
        source_id: Option<&str>,
    ) -> anyhow::Result<String> {
        let embedding = self.embedder.embed(content).await?;
        let chunk = MemoryChunk {
            id: uuid::Uuid::new_v4().to_string()[..8].to_string(),
            source: source.to_string(),
            source_id: source_id.map(String::from),
            content: content.to_string(),
            embedding,
        };

        self.append_to_disk(&chunk);

        let id = chunk.id.clone();
        let mut chunks = self.chunks.write().await;
        chunks.push(chunk);
        Ok(id)
    }

    async fn search(
        &self,
        query: &str,
        top_k: usize,
        min_score: f32,
    ) -> anyhow::Result<Vec<MemoryHit>> {
        let query_vec = self.embedder.embed(query).await?;
        let chunks = self.chunks.read().await;

        let mut scored: Vec<MemoryHit> = chunks
            .iter()
            .map(|c| MemoryHit {
                content: c.content.clone(),
                source: c.source.clone(),
                source_id: c.source_id.clone(),
                score: cosine_similarity(&query_vec, &c.embedding),
            })
            .filter(|hit| hit.score >= min_score)
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn stats(&self) -> anyhow::Result<MemoryStats> {
        Ok(MemoryStats {
            total_chunks: self.chunks.read().await.len(),
        })
    }
}

fn load_chunks(path: &Path) -> Vec<MemoryChunk> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return Vec::new(),
    };
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect()
}

/// Cosine similarity between two vectors; 0.0 for mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── MemoryStore ──

    #[test]
    fn test_read_pinned_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new_lazy(dir.path());
        assert_eq!(store.read_pinned(), "");
    }

    #[test]
    fn test_write_and_read_pinned() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new_lazy(dir.path());

        store.write_pinned("User likes Rust.").unwrap();
        assert_eq!(store.read_pinned(), "User likes Rust.");

        store.write_pinned("User prefers dark mode.").unwrap();
        assert_eq!(store.read_pinned(), "User prefers dark mode.");
    }

    #[test]
    fn test_append_today_creates_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new_lazy(dir.path());

        store.append_today("Did some coding.").unwrap();
        let content = store.read_today();
        let today = Utc::now().format("%Y-%m-%d").to_string();
        assert!(content.starts_with(&format!("# {today}")));
        assert!(content.contains("Did some coding."));
    }

    #[test]
    fn test_append_today_appends() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new_lazy(dir.path());

        store.append_today("First note.").unwrap();
        store.append_today("Second note.").unwrap();

        let content = store.read_today();
        assert!(content.contains("First note."));
        assert!(content.contains("Second note."));
    }

    #[test]
    fn test_memory_context_none_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new_lazy(dir.path());
        assert!(store.get_memory_context().is_none());
    }

    #[test]
    fn test_memory_context_pinned_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new_lazy(dir.path());

        store.write_pinned("Important fact.").unwrap();
        let ctx = store.get_memory_context().unwrap();
        assert!(ctx.contains("# Memory"));
        assert!(ctx.contains("## Pinned Notes"));
        assert!(ctx.contains("Important fact."));
        assert!(!ctx.contains("Today's Notes"));
    }

    #[test]
    fn test_memory_context_with_daily() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new_lazy(dir.path());

        store.write_pinned("Pinned.").unwrap();
        store.append_today("Today's work.").unwrap();

        let ctx = store.get_memory_context().unwrap();
        assert!(ctx.contains("Pinned Notes"));
        assert!(ctx.contains("Today's Notes"));
        assert!(ctx.contains("Today's work."));
    }

    #[test]
    fn test_memory_context_whitespace_only_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new_lazy(dir.path());
        store.write_pinned("   \n  \n  ").unwrap();
        assert!(store.get_memory_context().is_none());
    }

    // ── Cosine ──

    #[test]
    fn test_cosine_identical() {
        let v = vec![0.5, 0.5, 0.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_cosine_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    // ── VectorMemory ──

    /// Deterministic embedder: fixed vectors keyed by substring.
    struct StubEmbedder;

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            // Map text onto a tiny 3-dimensional space
            Ok(if text.contains("rust") {
                vec![1.0, 0.0, 0.0]
            } else if text.contains("coffee") {
                vec![0.0, 1.0, 0.0]
            } else {
                vec![0.0, 0.0, 1.0]
            })
        }

        fn model(&self) -> &str {
            "stub"
        }
    }

    fn make_memory(dir: &Path) -> VectorMemory {
        VectorMemory::new(Arc::new(StubEmbedder), dir.join("memory.jsonl"))
    }

    #[tokio::test]
    async fn test_index_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let memory = make_memory(dir.path());

        let id = memory
            .index("rust is great", "note", None)
            .await
            .unwrap();
        assert_eq!(id.len(), 8);
        assert_eq!(memory.stats().await.unwrap().total_chunks, 1);
    }

    #[tokio::test]
    async fn test_search_ranks_by_similarity() {
        let dir = tempfile::tempdir().unwrap();
        let memory = make_memory(dir.path());

        memory.index("rust is great", "note", None).await.unwrap();
        memory.index("coffee is hot", "note", None).await.unwrap();

        let hits = memory.search("learning rust", 5, 0.5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.contains("rust"));
        assert!(hits[0].score > 0.9);
    }

    #[tokio::test]
    async fn test_search_min_score_filters() {
        let dir = tempfile::tempdir().unwrap();
        let memory = make_memory(dir.path());

        memory.index("coffee is hot", "note", None).await.unwrap();
        // Query maps to the rust axis — orthogonal to coffee
        let hits = memory.search("rust things", 5, 0.1).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_persistence_reload() {
        let dir = tempfile::tempdir().unwrap();

        {
            let memory = make_memory(dir.path());
            memory
                .index("rust is great", "note", Some("n1"))
                .await
                .unwrap();
        }

        let memory = make_memory(dir.path());
        assert_eq!(memory.stats().await.unwrap().total_chunks, 1);
        let hits = memory.search("rust", 5, 0.5).await.unwrap();
        assert_eq!(hits[0].source_id.as_deref(), Some("n1"));
    }
}
