//! Contradiction auditing for extracted factual claims.
//!
//! Only the top claims by confidence are audited per run; exhaustive
//! checking is deliberately not attempted, keeping per-audit cost
//! bounded. Per-claim judgments run through a small worker pool fed in
//! confidence-descending order; the aggregated result arrays carry no
//! ordering guarantee.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::format_evidence;
use crate::corpus::CorpusScope;
use crate::extraction::ExtractedClaim;
use crate::oracle::Oracle;
use crate::parser;
use crate::retriever::EvidenceRetriever;

const INSTRUCTIONS: &str = "You are a contradiction judge for a fictional canon. \
Given a claim from a new scene and evidence passages from the established canon, \
decide whether the claim conflicts with the evidence. Internal story logic only; \
real-world truth is irrelevant. Respond with ONLY a JSON object: \
{\"has_conflict\": bool, \"reason\": \"why, citing the evidence\", \
\"conflicting_source\": \"file name of the conflicting passage\"}. \
If there is no conflict, set has_conflict to false and leave the other fields empty.";

/// Whether an audited claim was corroborated or merely unopposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactStatus {
    /// Evidence existed and did not conflict.
    Verified,
    /// No evidence found; unverifiable, not a conflict.
    New,
}

/// An audited claim that did not conflict with canon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedFact {
    pub entity: String,
    pub fact: String,
    pub status: FactStatus,
}

/// Discriminator for conflict findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictKind {
    Contradiction,
}

/// A claim that conflicts with established canon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub entity: String,
    pub fact: String,
    pub conflict_reason: String,
    pub conflicting_source: String,
    pub kind: ConflictKind,
}

/// Aggregated contradiction findings for one audit.
#[derive(Debug, Default)]
pub struct ContradictionFindings {
    pub facts: Vec<VerifiedFact>,
    pub conflicts: Vec<ConflictRecord>,
}

/// Tagged outcome of auditing a single claim.
enum ClaimOutcome {
    Clean(VerifiedFact),
    Conflict(ConflictRecord),
}

/// Oracle judgment for one claim against its evidence.
#[derive(Debug, Deserialize)]
struct ConflictJudgment {
    has_conflict: bool,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    conflicting_source: Option<String>,
}

/// Audits extracted claims against retrieved canon evidence.
pub struct ContradictionAuditor {
    oracle: Arc<dyn Oracle>,
    retriever: EvidenceRetriever,
    claim_cap: usize,
    evidence_limit: usize,
    concurrency: usize,
}

impl ContradictionAuditor {
    pub fn new(
        oracle: Arc<dyn Oracle>,
        retriever: EvidenceRetriever,
        claim_cap: usize,
        evidence_limit: usize,
        concurrency: usize,
    ) -> Self {
        Self {
            oracle,
            retriever,
            claim_cap,
            evidence_limit,
            concurrency: concurrency.max(1),
        }
    }

    /// Audit at most the top `claim_cap` claims by confidence. Claims
    /// beyond the cap are silently omitted from the findings. A failure
    /// in one claim's audit drops that claim only, never its siblings.
    pub async fn audit(
        &self,
        scope: &CorpusScope,
        claims: &[ExtractedClaim],
    ) -> ContradictionFindings {
        let mut ranked = claims.to_vec();
        ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        ranked.truncate(self.claim_cap);

        let outcomes: Vec<Option<ClaimOutcome>> = stream::iter(ranked)
            .map(|claim| self.audit_claim(scope, claim))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        outcomes.into_iter().flatten().fold(
            ContradictionFindings::default(),
            |mut findings, outcome| {
                match outcome {
                    ClaimOutcome::Clean(fact) => findings.facts.push(fact),
                    ClaimOutcome::Conflict(conflict) => findings.conflicts.push(conflict),
                }
                findings
            },
        )
    }

    /// Pure per-claim audit. Returns `None` when a transient failure
    /// forced this claim to be omitted.
    async fn audit_claim(&self, scope: &CorpusScope, claim: ExtractedClaim) -> Option<ClaimOutcome> {
        let query = format!("{}: {}", claim.entity, claim.fact);

        let evidence = match self
            .retriever
            .find_nearest(scope, &query, self.evidence_limit)
            .await
        {
            Ok(evidence) => evidence,
            Err(e) => {
                log::warn!("evidence retrieval failed for '{}': {e}", claim.entity);
                return None;
            }
        };

        if evidence.is_empty() {
            return Some(ClaimOutcome::Clean(VerifiedFact {
                entity: claim.entity,
                fact: claim.fact,
                status: FactStatus::New,
            }));
        }

        let context = format!(
            "## Claim\n{} - {}\n\n## Canon Evidence\n{}",
            claim.entity,
            claim.fact,
            format_evidence(&evidence)
        );

        let raw = match self.oracle.generate(INSTRUCTIONS, &context).await {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("conflict judgment failed for '{}': {e}", claim.entity);
                return None;
            }
        };

        let judgment: ConflictJudgment = match parser::parse_typed(&raw, "conflict_judgment") {
            Ok(judgment) => judgment,
            Err(e) => {
                log::warn!("conflict judgment unparseable for '{}': {e}", claim.entity);
                return None;
            }
        };

        if judgment.has_conflict {
            // First-found conflict reason wins; no refinement rounds.
            let fallback_source = evidence[0].file_name.clone();
            Some(ClaimOutcome::Conflict(ConflictRecord {
                entity: claim.entity,
                fact: claim.fact,
                conflict_reason: judgment
                    .reason
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "Contradicts established canon".to_string()),
                conflicting_source: judgment
                    .conflicting_source
                    .filter(|s| !s.is_empty())
                    .unwrap_or(fallback_source),
                kind: ConflictKind::Contradiction,
            }))
        } else {
            Some(ClaimOutcome::Clean(VerifiedFact {
                entity: claim.entity,
                fact: claim.fact,
                status: FactStatus::Verified,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_record_serializes_kind() {
        let record = ConflictRecord {
            entity: "Cipher".to_string(),
            fact: "Cipher is dead".to_string(),
            conflict_reason: "Canon says Cipher lives".to_string(),
            conflicting_source: "tower.md".to_string(),
            kind: ConflictKind::Contradiction,
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "contradiction");
    }

    #[test]
    fn test_judgment_tolerates_missing_fields() {
        let judgment: ConflictJudgment =
            serde_json::from_str(r#"{"has_conflict": false}"#).unwrap();
        assert!(!judgment.has_conflict);
        assert!(judgment.reason.is_none());
    }
}
