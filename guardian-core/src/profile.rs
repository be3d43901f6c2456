//! Character canon profiles.
//!
//! Profiles are created by the character-management collaborator; the
//! guardian reads them as the hard-canon source for drift triangulation
//! and may lazily fill in missing psychology fields derived from the
//! biography. Merge-writes never overwrite fields a human already set.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::corpus::StoreError;

/// A character's canon profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterProfile {
    pub name: String,
    /// Personality summary; may be absent until derived from the bio.
    pub personality: Option<String>,
    /// Intended character arc; may be absent until derived from the bio.
    pub evolution_arc: Option<String>,
    pub bio: Option<String>,
    pub description: Option<String>,
    pub last_analyzed: Option<DateTime<Utc>>,
}

impl CharacterProfile {
    /// Create a bare profile with just a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            personality: None,
            evolution_arc: None,
            bio: None,
            description: None,
            last_analyzed: None,
        }
    }

    pub fn with_personality(mut self, personality: impl Into<String>) -> Self {
        self.personality = Some(personality.into());
        self
    }

    pub fn with_evolution_arc(mut self, arc: impl Into<String>) -> Self {
        self.evolution_arc = Some(arc.into());
        self
    }

    pub fn with_bio(mut self, bio: impl Into<String>) -> Self {
        self.bio = Some(bio.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The canonical psychology text used as the triangulation baseline.
    ///
    /// Prefers explicit personality/arc fields, falling back to the prose
    /// description. Empty when the profile has no usable canon at all.
    pub fn canonical_psychology(&self) -> String {
        let mut sections = Vec::new();
        if let Some(personality) = &self.personality {
            sections.push(format!("Personality: {personality}"));
        }
        if let Some(arc) = &self.evolution_arc {
            sections.push(format!("Intended arc: {arc}"));
        }
        if sections.is_empty() {
            if let Some(description) = &self.description {
                sections.push(description.clone());
            }
        }
        sections.join("\n")
    }
}

/// Fields a merge-write is allowed to fill in.
#[derive(Debug, Clone, Default)]
pub struct ProfilePatch {
    pub personality: Option<String>,
    pub evolution_arc: Option<String>,
    pub last_analyzed: Option<DateTime<Utc>>,
}

/// Deterministic slug for profile lookup: lowercase, alphanumerics kept,
/// everything else collapsed to single hyphens.
pub fn character_slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_hyphen = false;

    for c in name.chars() {
        if c.is_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            for lower in c.to_lowercase() {
                slug.push(lower);
            }
        } else {
            pending_hyphen = true;
        }
    }

    slug
}

/// Access to the character-profile collaborator.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Look up a profile by its deterministic slug.
    async fn get(&self, user_id: &str, slug: &str) -> Result<Option<CharacterProfile>, StoreError>;

    /// Fallback lookup by exact (case-insensitive) name equality.
    async fn find_by_name(
        &self,
        user_id: &str,
        name: &str,
    ) -> Result<Option<CharacterProfile>, StoreError>;

    /// Merge-write derived fields. Only absent fields are filled; canon a
    /// human already set is never overwritten.
    async fn merge(
        &self,
        user_id: &str,
        slug: &str,
        patch: ProfilePatch,
    ) -> Result<(), StoreError>;
}

/// In-memory profile store for tests and embedded use.
#[derive(Debug, Default)]
pub struct InMemoryProfileStore {
    profiles: RwLock<HashMap<(String, String), CharacterProfile>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a profile under its derived slug.
    pub async fn insert(&self, user_id: impl Into<String>, profile: CharacterProfile) {
        let slug = character_slug(&profile.name);
        self.profiles
            .write()
            .await
            .insert((user_id.into(), slug), profile);
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn get(&self, user_id: &str, slug: &str) -> Result<Option<CharacterProfile>, StoreError> {
        let profiles = self.profiles.read().await;
        Ok(profiles
            .get(&(user_id.to_string(), slug.to_string()))
            .cloned())
    }

    async fn find_by_name(
        &self,
        user_id: &str,
        name: &str,
    ) -> Result<Option<CharacterProfile>, StoreError> {
        let profiles = self.profiles.read().await;
        Ok(profiles
            .iter()
            .find(|((owner, _), profile)| {
                owner == user_id && profile.name.eq_ignore_ascii_case(name)
            })
            .map(|(_, profile)| profile.clone()))
    }

    async fn merge(
        &self,
        user_id: &str,
        slug: &str,
        patch: ProfilePatch,
    ) -> Result<(), StoreError> {
        let mut profiles = self.profiles.write().await;
        let Some(profile) = profiles.get_mut(&(user_id.to_string(), slug.to_string())) else {
            return Err(StoreError::Backend(format!(
                "no profile with slug '{slug}'"
            )));
        };

        if profile.personality.is_none() {
            profile.personality = patch.personality;
        }
        if profile.evolution_arc.is_none() {
            profile.evolution_arc = patch.evolution_arc;
        }
        if let Some(analyzed) = patch.last_analyzed {
            profile.last_analyzed = Some(analyzed);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_normalization() {
        assert_eq!(character_slug("Cipher"), "cipher");
        assert_eq!(character_slug("Baron Aldric III"), "baron-aldric-iii");
        assert_eq!(character_slug("  D'Artagnan  "), "d-artagnan");
        assert_eq!(character_slug("Ana María"), "ana-maría");
    }

    #[test]
    fn test_canonical_psychology_prefers_explicit_fields() {
        let profile = CharacterProfile::new("Cipher")
            .with_personality("Cold, calculating")
            .with_description("A tall spy");

        let psychology = profile.canonical_psychology();
        assert!(psychology.contains("Cold, calculating"));
        assert!(!psychology.contains("tall spy"));
    }

    #[test]
    fn test_canonical_psychology_falls_back_to_description() {
        let profile = CharacterProfile::new("Cipher").with_description("A tall spy");
        assert_eq!(profile.canonical_psychology(), "A tall spy");
    }

    #[tokio::test]
    async fn test_get_by_slug_and_name_fallback() {
        let store = InMemoryProfileStore::new();
        store
            .insert("u1", CharacterProfile::new("Baron Aldric"))
            .await;

        assert!(store.get("u1", "baron-aldric").await.unwrap().is_some());
        assert!(store.get("u1", "aldric").await.unwrap().is_none());
        assert!(store
            .find_by_name("u1", "baron aldric")
            .await
            .unwrap()
            .is_some());
        assert!(store
            .find_by_name("u2", "Baron Aldric")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_merge_never_overwrites_human_canon() {
        let store = InMemoryProfileStore::new();
        store
            .insert(
                "u1",
                CharacterProfile::new("Cipher").with_personality("Human-written canon"),
            )
            .await;

        store
            .merge(
                "u1",
                "cipher",
                ProfilePatch {
                    personality: Some("Derived guess".to_string()),
                    evolution_arc: Some("Derived arc".to_string()),
                    last_analyzed: Some(Utc::now()),
                },
            )
            .await
            .unwrap();

        let profile = store.get("u1", "cipher").await.unwrap().unwrap();
        assert_eq!(profile.personality.as_deref(), Some("Human-written canon"));
        assert_eq!(profile.evolution_arc.as_deref(), Some("Derived arc"));
        assert!(profile.last_analyzed.is_some());
    }
}
