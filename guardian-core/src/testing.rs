//! Testing utilities for the guardian pipeline.
//!
//! This module provides tools for integration testing:
//! - `MockOracle` for deterministic audits without network calls
//! - `keyword_embedding` for cheap, similarity-preserving test vectors
//! - Fixture helpers for building corpus chunks
//!
//! The mock resolves `generate` calls by first matching registered stubs
//! against the combined prompt text, then draining a FIFO queue, then
//! falling back to an empty JSON object (which every pipeline stage
//! treats as "nothing found").

use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::corpus::{ChunkId, NarrativeChunk};
use crate::oracle::{Oracle, OracleError};

/// Dimensions of test embeddings.
const EMBEDDING_DIMS: usize = 32;

/// A scripted oracle that never touches the network.
#[derive(Default)]
pub struct MockOracle {
    /// (pattern, response) pairs matched in insertion order against the
    /// combined instructions + context text.
    stubs: Mutex<Vec<(String, String)>>,
    /// FIFO responses used when no stub matches.
    queue: Mutex<VecDeque<String>>,
    /// Log of every generate call as (instructions, context).
    generate_log: Mutex<Vec<(String, String)>>,
    fail_generate: AtomicBool,
    generate_calls: AtomicUsize,
    embed_calls: AtomicUsize,
}

impl MockOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a response returned whenever a generate call's combined
    /// prompt text contains `pattern`. Stubs match before the queue.
    pub fn stub(&self, pattern: impl Into<String>, response: impl Into<String>) {
        self.lock(&self.stubs).push((pattern.into(), response.into()));
    }

    /// Queue a response returned in FIFO order when no stub matches.
    pub fn queue_response(&self, response: impl Into<String>) {
        self.lock(&self.queue).push_back(response.into());
    }

    /// Make every subsequent generate call fail with a transport error.
    pub fn set_fail_generate(&self, fail: bool) {
        self.fail_generate.store(fail, Ordering::SeqCst);
    }

    /// Number of generate calls made so far.
    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    /// Number of embed calls made so far.
    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    /// Every generate call observed, as (instructions, context).
    pub fn generate_log(&self) -> Vec<(String, String)> {
        self.lock(&self.generate_log).clone()
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Oracle for MockOracle {
    async fn generate(&self, instructions: &str, context: &str) -> Result<String, OracleError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.lock(&self.generate_log)
            .push((instructions.to_string(), context.to_string()));

        if self.fail_generate.load(Ordering::SeqCst) {
            return Err(OracleError::Transport("scripted failure".to_string()));
        }

        let combined = format!("{instructions}\n{context}");
        for (pattern, response) in self.lock(&self.stubs).iter() {
            if combined.contains(pattern.as_str()) {
                return Ok(response.clone());
            }
        }

        if let Some(next) = self.lock(&self.queue).pop_front() {
            return Ok(next);
        }

        Ok("{}".to_string())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, OracleError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        Ok(keyword_embedding(text))
    }
}

/// Deterministic bag-of-words embedding: texts sharing words land close
/// in cosine space, which is all the retrieval tests need.
pub fn keyword_embedding(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; EMBEDDING_DIMS];

    for word in text.split(|c: char| !c.is_alphanumeric()) {
        if word.is_empty() {
            continue;
        }
        let lowered = word.to_lowercase();

        // FNV-1a over the word selects its dimension.
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in lowered.bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }

        vector[(hash % EMBEDDING_DIMS as u64) as usize] += 1.0;
    }

    vector
}

/// Build an indexed chunk with a keyword embedding derived from its text.
pub fn sample_chunk(user_id: &str, path: &str, text: &str) -> NarrativeChunk {
    let file_name = path.rsplit('/').next().unwrap_or(path).to_string();

    NarrativeChunk {
        id: ChunkId::new(),
        path: path.to_string(),
        text: text.to_string(),
        embedding: keyword_embedding(text),
        file_name,
        project_id: None,
        user_id: user_id.to_string(),
        timestamp: Utc::now(),
    }
}
