//! Claim extraction: one oracle call that pulls every auditable signal
//! out of the scene.
//!
//! The single-call design is deliberate: one round trip instead of four
//! bounds latency and cost, at some per-field precision cost. A parse
//! failure here is fatal to the whole audit - every downstream stage
//! consumes this stage's output, so there is nothing sensible to do with
//! garbage.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::oracle::{Oracle, OracleError};
use crate::parser::{self, ParseFailure};

/// What kind of entity a claim is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimCategory {
    Character,
    Location,
    Object,
}

/// A concrete, verifiable statement of fact extracted from the scene.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedClaim {
    pub entity: String,
    pub fact: String,
    pub category: ClaimCategory,
    pub confidence: f32,
}

/// What kind of world rule a law belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LawCategory {
    Geography,
    Chronology,
    SystemRules,
}

/// A world-level rule the scene asserts or relies on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedLaw {
    pub category: LawCategory,
    pub law: String,
    pub confidence: f32,
}

/// How a named character acts in the current scene.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorObservation {
    pub character: String,
    #[serde(default)]
    pub tone: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub dialogue_sample: String,
}

impl BehaviorObservation {
    /// One-line description of the observed behavior, skipping empty parts.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if !self.tone.is_empty() {
            parts.push(format!("tone: {}", self.tone));
        }
        if !self.action.is_empty() {
            parts.push(self.action.clone());
        }
        if !self.dialogue_sample.is_empty() {
            parts.push(format!("\"{}\"", self.dialogue_sample));
        }
        parts.join("; ")
    }
}

/// Structural-position signal for the scene, passed through to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureSignal {
    #[serde(default)]
    pub narrative_position: String,
    #[serde(default)]
    pub tension: f32,
    #[serde(default)]
    pub pacing: String,
}

/// Everything the extraction call produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClaimExtraction {
    #[serde(default)]
    pub claims: Vec<ExtractedClaim>,
    #[serde(default)]
    pub laws: Vec<ExtractedLaw>,
    #[serde(default)]
    pub behaviors: Vec<BehaviorObservation>,
    #[serde(default)]
    pub structure: Option<StructureSignal>,
}

/// Why extraction failed. Parse failures surface as `parse_error`; oracle
/// failures degrade the whole run.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionFailure {
    #[error("extraction oracle call failed: {0}")]
    Oracle(#[from] OracleError),

    #[error("extraction output unparseable: {0}")]
    Parse(#[from] ParseFailure),
}

/// The single-call extraction stage.
pub struct ClaimExtractionStage {
    oracle: Arc<dyn Oracle>,
}

impl ClaimExtractionStage {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self { oracle }
    }

    /// Extract claims, laws, behaviors, and the structure signal.
    ///
    /// Input length is validated upstream; this stage never truncates
    /// silently.
    pub async fn extract(&self, text: &str) -> Result<ClaimExtraction, ExtractionFailure> {
        let instructions = include_str!("prompts/extraction.txt");
        let raw = self.oracle.generate(instructions, text).await?;

        let mut extraction: ClaimExtraction = parser::parse_typed(&raw, "claim_extraction")?;

        for claim in &mut extraction.claims {
            claim.confidence = claim.confidence.clamp(0.0, 1.0);
        }
        for law in &mut extraction.laws {
            law.confidence = law.confidence.clamp(0.0, 1.0);
        }
        if let Some(structure) = &mut extraction.structure {
            structure.tension = structure.tension.clamp(0.0, 1.0);
        }

        Ok(extraction)
    }
}
