//! Per-finding auditors: contradictions, world-rule violations, and
//! personality drift.

mod contradiction;
mod drift;
mod world_law;

pub use contradiction::{
    ConflictKind, ConflictRecord, ContradictionAuditor, ContradictionFindings, FactStatus,
    VerifiedFact,
};
pub use drift::{DriftSeverity, DriftStatus, DriftVerdict, PersonalityDriftTriangulator};
pub use world_law::{is_priority_source, ViolationSeverity, WorldLawViolation, WorldRuleAuditor};

use crate::corpus::NarrativeChunk;

/// Per-chunk character budget when quoting evidence into a prompt.
pub(crate) const EVIDENCE_EXCERPT_CHARS: usize = 400;

/// Truncate text to a character budget, marking the cut.
pub(crate) fn excerpt(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(budget).collect();
    cut.push_str("...");
    cut
}

/// Render retrieved evidence as a numbered list for a judgment prompt.
pub(crate) fn format_evidence(chunks: &[NarrativeChunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            format!(
                "{}. [{}] {}",
                i + 1,
                chunk.file_name,
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
    fn test_excerpt_respects_budget() {
        assert_eq!(excerpt("short", 10), "short");
        let long = "x".repeat(50);
        let cut = excerpt(&long, 10);
        assert_eq!(cut.chars().count(), 13);
        assert!(cut.ends_with("..."));
    }
}
