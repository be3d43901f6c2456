//! Personality drift triangulation.
//!
//! Each observed behavior is judged against three independent sources:
//! the character's hard canon profile, their recent depicted history, and
//! the current scene. The classification is terminal and single-step:
//!
//! - agrees with the profile            -> CONSISTENT (suppressed)
//! - disagrees, but matches history     -> EVOLVED (soft signal)
//! - disagrees with both                -> TRAITOR (hard signal)
//!
//! A character with no profile is skipped entirely; there is no verdict
//! without a baseline.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{excerpt, EVIDENCE_EXCERPT_CHARS};
use crate::corpus::{CorpusScope, NarrativeChunk, StoreError};
use crate::extraction::BehaviorObservation;
use crate::oracle::{Oracle, OracleError};
use crate::parser::{self, ParseFailure};
use crate::profile::{character_slug, CharacterProfile, ProfilePatch, ProfileStore};
use crate::retriever::EvidenceRetriever;

const TRIANGULATE_INSTRUCTIONS: &str = "Triangulate a fictional character's behavior \
against two sources: their hard canon profile and excerpts of their recent depicted \
history. Decide whether the current scene's behavior agrees with each source. \
Respond with ONLY a JSON object: {\"agrees_with_profile\": bool, \
\"agrees_with_history\": bool, \"comment\": \"one-sentence assessment\", \
\"friction_score\": 0.0-1.0}. friction_score measures how hard the behavior grinds \
against the canon profile (0 = perfectly in character).";

const DERIVE_INSTRUCTIONS: &str = "Derive the psychological profile of a fictional \
character from their biography. Respond with ONLY a JSON object: \
{\"personality\": \"concise personality summary\", \
\"evolution_arc\": \"the arc the biography implies\"}.";

/// Triangulation outcome for one behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriftStatus {
    /// Behavior matches canon. Never surfaced; silence means no issue.
    Consistent,
    /// Off-profile but consistent with recent history: character growth.
    Evolved,
    /// Off-profile and off-history: likely authoring error.
    Traitor,
}

/// How loudly a drift verdict should be surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriftSeverity {
    Critical,
    Warning,
    Info,
}

/// A surfaced drift finding. Only `EVOLVED` and `TRAITOR` verdicts are
/// ever returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftVerdict {
    pub character: String,
    pub status: DriftStatus,
    pub severity: DriftSeverity,
    pub comment: String,
    pub detected_behavior: String,
    pub canonical_psychology: String,
    pub friction_score: f32,
}

/// Oracle-reported agreement bits; the status mapping itself stays
/// deterministic on our side.
#[derive(Debug, Deserialize)]
struct DriftJudgment {
    agrees_with_profile: bool,
    #[serde(default)]
    agrees_with_history: bool,
    #[serde(default)]
    comment: String,
    #[serde(default)]
    friction_score: f32,
}

/// Psychology fields derived from a biography.
#[derive(Debug, Deserialize)]
struct DerivedProfile {
    personality: String,
    #[serde(default)]
    evolution_arc: String,
}

/// Transient failures inside one behavior check.
#[derive(Debug, thiserror::Error)]
enum DriftCheckError {
    #[error("{0}")]
    Oracle(#[from] OracleError),

    #[error("{0}")]
    Parse(#[from] ParseFailure),
}

/// The three-source consistency judge for character behavior.
pub struct PersonalityDriftTriangulator {
    oracle: Arc<dyn Oracle>,
    profiles: Arc<dyn ProfileStore>,
    retriever: EvidenceRetriever,
    behavior_cap: usize,
    history_window: usize,
    history_keep: usize,
}

impl PersonalityDriftTriangulator {
    pub fn new(
        oracle: Arc<dyn Oracle>,
        profiles: Arc<dyn ProfileStore>,
        retriever: EvidenceRetriever,
        behavior_cap: usize,
        history_window: usize,
        history_keep: usize,
    ) -> Self {
        Self {
            oracle,
            profiles,
            retriever,
            behavior_cap,
            history_window,
            history_keep,
        }
    }

    /// Check at most `behavior_cap` behaviors. A failed check drops that
    /// behavior only; consistent behaviors are suppressed entirely.
    pub async fn audit(
        &self,
        scope: &CorpusScope,
        behaviors: &[BehaviorObservation],
    ) -> Vec<DriftVerdict> {
        let mut verdicts = Vec::new();

        for behavior in behaviors.iter().take(self.behavior_cap) {
            if let Some(verdict) = self.check_behavior(scope, behavior).await {
                verdicts.push(verdict);
            }
        }

        verdicts
    }

    /// Triangulate one behavior. `None` covers every non-finding: no
    /// profile, no usable baseline, a consistent verdict, or an omitted
    /// item after a transient failure.
    async fn check_behavior(
        &self,
        scope: &CorpusScope,
        behavior: &BehaviorObservation,
    ) -> Option<DriftVerdict> {
        let (slug, profile) = match self.resolve_profile(&scope.user_id, &behavior.character).await
        {
            Ok(Some(found)) => found,
            Ok(None) => {
                log::debug!(
                    "no profile for '{}', skipping drift check",
                    behavior.character
                );
                return None;
            }
            Err(e) => {
                log::warn!("profile lookup failed for '{}': {e}", behavior.character);
                return None;
            }
        };

        let psychology = self.ensure_psychology(&scope.user_id, &slug, profile).await;
        if psychology.is_empty() {
            log::debug!(
                "profile for '{}' has no usable canon, skipping drift check",
                behavior.character
            );
            return None;
        }

        let history = self.recent_history(scope, &behavior.character).await;

        let judgment = match self.judge(behavior, &psychology, &history).await {
            Ok(judgment) => judgment,
            Err(e) => {
                log::warn!("drift judgment failed for '{}': {e}", behavior.character);
                return None;
            }
        };

        let (status, severity) = match (judgment.agrees_with_profile, judgment.agrees_with_history)
        {
            (true, _) => (DriftStatus::Consistent, DriftSeverity::Info),
            (false, true) => (DriftStatus::Evolved, DriftSeverity::Warning),
            (false, false) => (DriftStatus::Traitor, DriftSeverity::Critical),
        };

        if status == DriftStatus::Consistent {
            return None;
        }

        Some(DriftVerdict {
            character: behavior.character.clone(),
            status,
            severity,
            comment: if judgment.comment.is_empty() {
                "Behavior diverges from the canon profile".to_string()
            } else {
                judgment.comment
            },
            detected_behavior: behavior.summary(),
            canonical_psychology: psychology,
            friction_score: judgment.friction_score.clamp(0.0, 1.0),
        })
    }

    /// Resolve a character's profile by slug, falling back to exact name
    /// equality. Returns the slug the profile is stored under so derived
    /// fields merge back to the right record.
    async fn resolve_profile(
        &self,
        user_id: &str,
        character: &str,
    ) -> Result<Option<(String, CharacterProfile)>, StoreError> {
        let slug = character_slug(character);
        if let Some(profile) = self.profiles.get(user_id, &slug).await? {
            return Ok(Some((slug, profile)));
        }

        if let Some(profile) = self.profiles.find_by_name(user_id, character).await? {
            let stored_slug = character_slug(&profile.name);
            return Ok(Some((stored_slug, profile)));
        }

        Ok(None)
    }

    /// Return the canonical psychology baseline, lazily deriving missing
    /// fields from the biography.
    ///
    /// Derivation is best-effort at both steps: a failed derivation falls
    /// back to whatever canon the profile already carries, and a failed
    /// merge-write is logged and swallowed.
    async fn ensure_psychology(
        &self,
        user_id: &str,
        slug: &str,
        profile: CharacterProfile,
    ) -> String {
        if profile.personality.is_some() || profile.bio.is_none() {
            return profile.canonical_psychology();
        }

        let bio = profile.bio.clone().unwrap_or_default();
        let context = format!("Character: {}\n\nBiography:\n{}", profile.name, bio);

        let derived: DerivedProfile = match self.oracle.generate(DERIVE_INSTRUCTIONS, &context).await
        {
            Ok(raw) => match parser::parse_typed(&raw, "profile_derivation") {
                Ok(derived) => derived,
                Err(e) => {
                    log::warn!("profile derivation unparseable for '{slug}': {e}");
                    return profile.canonical_psychology();
                }
            },
            Err(e) => {
                log::warn!("profile derivation failed for '{slug}': {e}");
                return profile.canonical_psychology();
            }
        };

        let patch = ProfilePatch {
            personality: Some(derived.personality.clone()),
            evolution_arc: if derived.evolution_arc.is_empty() {
                None
            } else {
                Some(derived.evolution_arc.clone())
            },
            last_analyzed: Some(Utc::now()),
        };
        if let Err(e) = self.profiles.merge(user_id, slug, patch).await {
            log::warn!("profile derivation write failed for '{slug}': {e}");
        }

        let mut enriched = profile;
        if enriched.personality.is_none() {
            enriched.personality = Some(derived.personality);
        }
        if enriched.evolution_arc.is_none() && !derived.evolution_arc.is_empty() {
            enriched.evolution_arc = Some(derived.evolution_arc);
        }
        enriched.canonical_psychology()
    }

    /// Retrieve recent chunks and keep the closest few that actually
    /// mention the character. A failed retrieval yields empty history
    /// rather than aborting the behavior check.
    async fn recent_history(&self, scope: &CorpusScope, character: &str) -> Vec<NarrativeChunk> {
        match self
            .retriever
            .find_nearest(scope, character, self.history_window)
            .await
        {
            Ok(chunks) => {
                let needle = character.to_lowercase();
                chunks
                    .into_iter()
                    .filter(|chunk| chunk.text.to_lowercase().contains(&needle))
                    .take(self.history_keep)
                    .collect()
            }
            Err(e) => {
                log::warn!("history retrieval failed for '{character}': {e}");
                Vec::new()
            }
        }
    }

    async fn judge(
        &self,
        behavior: &BehaviorObservation,
        psychology: &str,
        history: &[NarrativeChunk],
    ) -> Result<DriftJudgment, DriftCheckError> {
        let history_text = if history.is_empty() {
            "(no recent history retrieved)".to_string()
        } else {
            history
                .iter()
                .map(|chunk| {
                    format!(
                        "- [{}] {}",
                        chunk.file_name,
                        excerpt(&chunk.text, EVIDENCE_EXCERPT_CHARS)
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        let context = format!(
            "## Character\n{}\n\n## Canon Profile\n{}\n\n## Recent History\n{}\n\n\
             ## Current Scene Behavior\nTone: {}\nAction: {}\nDialogue: {}",
            behavior.character,
            psychology,
            history_text,
            behavior.tone,
            behavior.action,
            behavior.dialogue_sample,
        );

        let raw = self
            .oracle
            .generate(TRIANGULATE_INSTRUCTIONS, &context)
            .await?;

        Ok(parser::parse_typed(&raw, "drift_judgment")?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_screaming_case() {
        assert_eq!(
            serde_json::to_value(DriftStatus::Traitor).unwrap(),
            "TRAITOR"
        );
        assert_eq!(
            serde_json::to_value(DriftSeverity::Warning).unwrap(),
            "WARNING"
        );
    }

    #[test]
    fn test_judgment_defaults() {
        let judgment: DriftJudgment =
            serde_json::from_str(r#"{"agrees_with_profile": true}"#).unwrap();
        assert!(judgment.agrees_with_profile);
        assert!(!judgment.agrees_with_history);
        assert_eq!(judgment.friction_score, 0.0);
    }
}
