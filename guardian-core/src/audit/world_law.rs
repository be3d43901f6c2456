//! World-rule auditing for extracted laws.
//!
//! Same retrieval-and-judge shape as contradiction auditing, with two
//! differences: evidence from world-building sources is flagged as
//! priority (a hint to the oracle, not an enforced rule), and judgments
//! carry a severity tier instead of a boolean.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{excerpt, EVIDENCE_EXCERPT_CHARS};
use crate::corpus::{CorpusScope, NarrativeChunk};
use crate::extraction::ExtractedLaw;
use crate::oracle::Oracle;
use crate::parser;
use crate::retriever::EvidenceRetriever;

const INSTRUCTIONS: &str = "You are a world law auditor for a fictional canon. \
Given a world-level rule asserted by a new scene and evidence passages from the \
established canon, decide whether the new rule violates canon. Passages marked \
PRIORITY come from world-building sources and should weigh more heavily. \
Respond with ONLY a JSON object: {\"severity\": \"CRITICAL\"|\"WARNING\"|\"NONE\", \
\"explanation\": \"why\", \"canonical_rule\": \"the established rule involved\", \
\"source_node\": \"file name of the canonical source\"}. \
Use NONE when the rule is compatible with canon.";

/// Path fragments that mark a source as canonical world-building material.
const PRIORITY_MARKERS: &[&str] = &["world", "lore", "canon", "wiki", "bible"];

/// How severe a world-law violation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationSeverity {
    Critical,
    Warning,
    None,
}

/// A world rule in the new scene that breaks established canon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldLawViolation {
    pub severity: ViolationSeverity,
    pub explanation: String,
    pub canonical_rule: String,
    pub source_node: String,
}

/// Oracle judgment for one law against its evidence.
#[derive(Debug, Deserialize)]
struct LawJudgment {
    severity: ViolationSeverity,
    #[serde(default)]
    explanation: Option<String>,
    #[serde(default)]
    canonical_rule: Option<String>,
    #[serde(default)]
    source_node: Option<String>,
}

/// True when a chunk's source path matches world-building naming
/// heuristics.
pub fn is_priority_source(path: &str) -> bool {
    let lowered = path.to_lowercase();
    PRIORITY_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Audits extracted laws against retrieved canon evidence.
pub struct WorldRuleAuditor {
    oracle: Arc<dyn Oracle>,
    retriever: EvidenceRetriever,
    law_cap: usize,
    evidence_limit: usize,
    concurrency: usize,
}

impl WorldRuleAuditor {
    pub fn new(
        oracle: Arc<dyn Oracle>,
        retriever: EvidenceRetriever,
        law_cap: usize,
        evidence_limit: usize,
        concurrency: usize,
    ) -> Self {
        Self {
            oracle,
            retriever,
            law_cap,
            evidence_limit,
            concurrency: concurrency.max(1),
        }
    }

    /// Audit at most the top `law_cap` laws by confidence; only
    /// non-`NONE` judgments are kept.
    pub async fn audit(
        &self,
        scope: &CorpusScope,
        laws: &[ExtractedLaw],
    ) -> Vec<WorldLawViolation> {
        let mut ranked = laws.to_vec();
        ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        ranked.truncate(self.law_cap);

        let violations: Vec<Option<WorldLawViolation>> = stream::iter(ranked)
            .map(|law| self.audit_law(scope, law))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        violations.into_iter().flatten().collect()
    }

    /// Pure per-law audit. `None` means no violation or an omitted item.
    async fn audit_law(&self, scope: &CorpusScope, law: ExtractedLaw) -> Option<WorldLawViolation> {
        let evidence = match self
            .retriever
            .find_nearest(scope, &law.law, self.evidence_limit)
            .await
        {
            Ok(evidence) => evidence,
            Err(e) => {
                log::warn!("evidence retrieval failed for law '{}': {e}", law.law);
                return None;
            }
        };

        if evidence.is_empty() {
            // A law with no canon counterpart is new, not a violation.
            return None;
        }

        let context = format!(
            "## Asserted Rule ({:?})\n{}\n\n## Canon Evidence\n{}",
            law.category,
            law.law,
            format_flagged_evidence(&evidence)
        );

        let raw = match self.oracle.generate(INSTRUCTIONS, &context).await {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("law judgment failed for '{}': {e}", law.law);
                return None;
            }
        };

        let judgment: LawJudgment = match parser::parse_typed(&raw, "law_judgment") {
            Ok(judgment) => judgment,
            Err(e) => {
                log::warn!("law judgment unparseable for '{}': {e}", law.law);
                return None;
            }
        };

        if judgment.severity == ViolationSeverity::None {
            return None;
        }

        let fallback_source = evidence
            .iter()
            .find(|chunk| is_priority_source(&chunk.path))
            .unwrap_or(&evidence[0])
            .file_name
            .clone();

        Some(WorldLawViolation {
            severity: judgment.severity,
            explanation: judgment
                .explanation
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| "Violates established world canon".to_string()),
            canonical_rule: judgment
                .canonical_rule
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| law.law.clone()),
            source_node: judgment
                .source_node
                .filter(|s| !s.is_empty())
                .unwrap_or(fallback_source),
        })
    }
}

/// Render evidence with PRIORITY flags on world-building sources.
fn format_flagged_evidence(chunks: &[NarrativeChunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let flag = if is_priority_source(&chunk.path) {
                " PRIORITY"
            } else {
                ""
            };
            format!(
                "{}. [{}{}] {}",
                i + 1,
                chunk.file_name,
                flag,
                excerpt(&chunk.text, EVIDENCE_EXCERPT_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_source_heuristics() {
        assert!(is_priority_source("worldbuilding/geography.md"));
        assert!(is_priority_source("notes/LORE/magic.md"));
        assert!(is_priority_source("story-bible.md"));
        assert!(!is_priority_source("chapters/ch03.md"));
    }

    #[test]
    fn test_severity_deserializes_screaming_case() {
        let judgment: LawJudgment = serde_json::from_str(
            r#"{"severity": "CRITICAL", "explanation": "breaks travel times"}"#,
        )
        .unwrap();
        assert_eq!(judgment.severity, ViolationSeverity::Critical);

        let none: LawJudgment = serde_json::from_str(r#"{"severity": "NONE"}"#).unwrap();
        assert_eq!(none.severity, ViolationSeverity::None);
    }
}
