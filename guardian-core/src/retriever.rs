//! Evidence retrieval: embed a query, find the nearest canon chunks.

use std::sync::Arc;
use thiserror::Error;

use crate::corpus::{CorpusScope, DocumentStore, NarrativeChunk, ScoredChunk, StoreError};
use crate::oracle::{Oracle, OracleError};

/// Errors from evidence retrieval.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] OracleError),

    #[error("document store error: {0}")]
    Store(#[from] StoreError),
}

/// Issues scoped vector-similarity queries against the indexed corpus.
#[derive(Clone)]
pub struct EvidenceRetriever {
    oracle: Arc<dyn Oracle>,
    documents: Arc<dyn DocumentStore>,
}

impl EvidenceRetriever {
    pub fn new(oracle: Arc<dyn Oracle>, documents: Arc<dyn DocumentStore>) -> Self {
        Self { oracle, documents }
    }

    /// Return up to `limit` chunks closest to `query_text`, best first.
    ///
    /// An empty result is valid: it means "no evidence, treat the claim
    /// as new/unverified".
    pub async fn find_nearest(
        &self,
        scope: &CorpusScope,
        query_text: &str,
        limit: usize,
    ) -> Result<Vec<NarrativeChunk>, RetrievalError> {
        Ok(self
            .find_nearest_scored(scope, query_text, limit)
            .await?
            .into_iter()
            .map(|scored| scored.chunk)
            .collect())
    }

    /// Like [`find_nearest`](Self::find_nearest) but keeps the similarity
    /// score with each chunk.
    pub async fn find_nearest_scored(
        &self,
        scope: &CorpusScope,
        query_text: &str,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, RetrievalError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.oracle.embed(query_text).await?;
        let chunks = self
            .documents
            .find_nearest(scope, &query_vector, limit)
            .await?;

        Ok(chunks)
    }
}
