//! The indexed narrative corpus, consumed read-only.
//!
//! Chunking and embedding happen upstream; the guardian only issues scoped
//! nearest-neighbor queries through the [`DocumentStore`] trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Unique identifier for a narrative chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkId(Uuid);

impl ChunkId {
    /// Create a new unique chunk ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChunkId {
    fn default() -> Self {
        Self::new()
    }
}

/// A previously ingested narrative fragment with its embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeChunk {
    pub id: ChunkId,
    /// Source path within the author's project (e.g. "worldbuilding/laws.md").
    pub path: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub file_name: String,
    pub project_id: Option<String>,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
}

/// A chunk paired with its similarity to the query vector.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: NarrativeChunk,
    pub similarity: f32,
}

/// Query scope: always a user, optionally narrowed to one project.
#[derive(Debug, Clone)]
pub struct CorpusScope {
    pub user_id: String,
    pub project_id: Option<String>,
}

impl CorpusScope {
    /// Scope to everything a user owns.
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            project_id: None,
        }
    }

    /// Narrow the scope to a single project.
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    fn matches(&self, chunk: &NarrativeChunk) -> bool {
        if chunk.user_id != self.user_id {
            return false;
        }
        match &self.project_id {
            Some(project_id) => chunk.project_id.as_deref() == Some(project_id.as_str()),
            None => true,
        }
    }
}

/// Errors from collaborator stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Read-only access to the vector-indexed corpus.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Return up to `limit` chunks in scope, ordered closest-first by
    /// cosine similarity to `query`. An empty result is valid and means
    /// "no evidence".
    async fn find_nearest(
        &self,
        scope: &CorpusScope,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError>;
}

/// Cosine similarity between two vectors. Returns 0.0 on dimension
/// mismatch or zero-magnitude input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-12 {
        0.0
    } else {
        (dot / denom) as f32
    }
}

/// In-memory corpus index.
///
/// Backs tests and embedded deployments; a production deployment points
/// [`DocumentStore`] at the real vector database instead.
#[derive(Debug, Default)]
pub struct InMemoryCorpus {
    chunks: RwLock<Vec<NarrativeChunk>>,
}

impl InMemoryCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chunk to the index.
    pub async fn insert(&self, chunk: NarrativeChunk) {
        self.chunks.write().await.push(chunk);
    }

    /// Number of indexed chunks.
    pub async fn len(&self) -> usize {
        self.chunks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.chunks.read().await.is_empty()
    }
}

#[async_trait]
impl DocumentStore for InMemoryCorpus {
    async fn find_nearest(
        &self,
        scope: &CorpusScope,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        let chunks = self.chunks.read().await;

        let mut scored: Vec<ScoredChunk> = chunks
            .iter()
            .filter(|chunk| scope.matches(chunk))
            .map(|chunk| ScoredChunk {
                similarity: cosine_similarity(query, &chunk.embedding),
                chunk: chunk.clone(),
            })
            .collect();

        scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        scored.truncate(limit);

        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(user: &str, project: Option<&str>, embedding: Vec<f32>) -> NarrativeChunk {
        NarrativeChunk {
            id: ChunkId::new(),
            path: "chapters/one.md".to_string(),
            text: "test".to_string(),
            embedding,
            file_name: "one.md".to_string(),
            project_id: project.map(|p| p.to_string()),
            user_id: user.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_mismatched_or_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[tokio::test]
    async fn test_find_nearest_orders_and_limits() {
        let corpus = InMemoryCorpus::new();
        corpus.insert(chunk("u1", None, vec![1.0, 0.0])).await;
        corpus.insert(chunk("u1", None, vec![0.9, 0.1])).await;
        corpus.insert(chunk("u1", None, vec![0.0, 1.0])).await;

        let scope = CorpusScope::user("u1");
        let results = corpus.find_nearest(&scope, &[1.0, 0.0], 2).await.unwrap();

        assert_eq!(results.len(), 2);
        assert!(results[0].similarity >= results[1].similarity);
        assert!((results[0].similarity - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_find_nearest_respects_scope() {
        let corpus = InMemoryCorpus::new();
        corpus.insert(chunk("u1", Some("p1"), vec![1.0, 0.0])).await;
        corpus.insert(chunk("u1", Some("p2"), vec![1.0, 0.0])).await;
        corpus.insert(chunk("u2", Some("p1"), vec![1.0, 0.0])).await;

        let scoped = CorpusScope::user("u1").with_project("p1");
        let results = corpus.find_nearest(&scoped, &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(results.len(), 1);

        let user_wide = CorpusScope::user("u1");
        let results = corpus
            .find_nearest(&user_wide, &[1.0, 0.0], 10)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_find_nearest_empty_corpus() {
        let corpus = InMemoryCorpus::new();
        let scope = CorpusScope::user("u1");
        let results = corpus.find_nearest(&scope, &[1.0], 5).await.unwrap();
        assert!(results.is_empty());
    }
}
