//! Resonance scan: surface prior scenes that echo the current one.
//!
//! A retrieval-only pass - no oracle judgment call. Matches are purely
//! informational (echoes, foreshadowing, repeated imagery) and never
//! count as findings; any failure degrades to an empty list.

use serde::{Deserialize, Serialize};

use crate::audit::excerpt;
use crate::corpus::CorpusScope;
use crate::retriever::EvidenceRetriever;

/// Characters of matched text quoted back to the caller.
const MATCH_EXCERPT_CHARS: usize = 200;

/// A prior chunk that strongly resembles the current scene.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResonanceMatch {
    pub file_name: String,
    pub excerpt: String,
    pub similarity: f32,
}

/// Finds high-similarity echoes of the audited scene in the corpus.
pub struct ResonanceScanner {
    retriever: EvidenceRetriever,
    threshold: f32,
    limit: usize,
}

impl ResonanceScanner {
    pub fn new(retriever: EvidenceRetriever, threshold: f32, limit: usize) -> Self {
        Self {
            retriever,
            threshold,
            limit,
        }
    }

    /// Return up to `limit` chunks whose similarity to `text` clears the
    /// resonance threshold.
    pub async fn scan(&self, scope: &CorpusScope, text: &str) -> Vec<ResonanceMatch> {
        if self.limit == 0 {
            return Vec::new();
        }

        match self
            .retriever
            .find_nearest_scored(scope, text, self.limit)
            .await
        {
            Ok(scored) => scored
                .into_iter()
                .filter(|s| s.similarity >= self.threshold)
                .map(|s| ResonanceMatch {
                    file_name: s.chunk.file_name,
                    excerpt: excerpt(&s.chunk.text, MATCH_EXCERPT_CHARS),
                    similarity: s.similarity,
                })
                .collect(),
            Err(e) => {
                log::warn!("resonance scan failed: {e}");
                Vec::new()
            }
        }
    }
}
