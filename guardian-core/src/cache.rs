//! Content-change cache: skip re-auditing text that has not changed.
//!
//! One entry per `(user_id, file_id)`, keyed by a SHA-256 digest of the
//! audited content. There is no TTL and no eviction; an entry stays valid
//! until the content changes. Two caveats are accepted and documented
//! rather than fixed: concurrent audits of the same file race on the
//! write (last writer wins), and a hit says nothing about whether the
//! upstream canon changed since the cached audit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::corpus::StoreError;

/// A recorded audit of one file's exact content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditCacheEntry {
    pub file_id: String,
    pub content_hash: String,
    pub timestamp: DateTime<Utc>,
}

/// Access to the audit-cache collaborator.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(
        &self,
        user_id: &str,
        file_id: &str,
    ) -> Result<Option<AuditCacheEntry>, StoreError>;

    async fn set(
        &self,
        user_id: &str,
        file_id: &str,
        entry: AuditCacheEntry,
    ) -> Result<(), StoreError>;
}

/// SHA-256 digest of audit content, hex-encoded.
pub fn content_digest(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// The guardian's only automatic optimization.
///
/// Cache-store failures degrade to "audit anyway": a broken cache must
/// never block an audit, and a failed write must never fail one.
pub struct ContentChangeCache {
    store: Arc<dyn CacheStore>,
}

impl ContentChangeCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// True only when the stored digest exactly matches `content`.
    pub async fn should_skip(&self, user_id: &str, file_id: &str, content: &str) -> bool {
        match self.store.get(user_id, file_id).await {
            Ok(Some(entry)) => entry.content_hash == content_digest(content),
            Ok(None) => false,
            Err(e) => {
                log::warn!("cache lookup failed for {user_id}/{file_id}: {e}");
                false
            }
        }
    }

    /// Overwrite the stored entry unconditionally. Errors are logged and
    /// swallowed; persistence must never fail a successful audit.
    pub async fn record_audit(&self, user_id: &str, file_id: &str, content: &str) {
        let entry = AuditCacheEntry {
            file_id: file_id.to_string(),
            content_hash: content_digest(content),
            timestamp: Utc::now(),
        };

        if let Err(e) = self.store.set(user_id, file_id, entry).await {
            log::warn!("cache write failed for {user_id}/{file_id}: {e}");
        }
    }
}

/// In-memory cache store for tests and embedded use.
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    entries: RwLock<HashMap<(String, String), AuditCacheEntry>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(
        &self,
        user_id: &str,
        file_id: &str,
    ) -> Result<Option<AuditCacheEntry>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(&(user_id.to_string(), file_id.to_string()))
            .cloned())
    }

    async fn set(
        &self,
        user_id: &str,
        file_id: &str,
        entry: AuditCacheEntry,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.insert((user_id.to_string(), file_id.to_string()), entry);
        Ok(())
    }
}
