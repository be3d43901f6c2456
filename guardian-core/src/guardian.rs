//! The Guardian - the primary public API for consistency audits.
//!
//! One call per audit: validate, check the content-change cache, run the
//! staged pipeline under a hard wall-clock timeout, aggregate findings,
//! and record the cache entry last. The caller never sees a raw internal
//! error; everything that is not a client error degrades to a typed
//! status on the report.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::audit::{
    ConflictRecord, ContradictionAuditor, DriftVerdict, PersonalityDriftTriangulator,
    VerifiedFact, WorldLawViolation, WorldRuleAuditor,
};
use crate::cache::{CacheStore, ContentChangeCache};
use crate::corpus::{CorpusScope, DocumentStore};
use crate::extraction::{ClaimExtractionStage, ExtractionFailure, StructureSignal};
use crate::oracle::{Oracle, OracleError};
use crate::parser::ParseFailure;
use crate::profile::ProfileStore;
use crate::resonance::{ResonanceMatch, ResonanceScanner};
use crate::retriever::EvidenceRetriever;

/// Client errors: rejected before the pipeline runs.
#[derive(Debug, Error)]
pub enum GuardianError {
    #[error("content exceeds the {limit}-character limit ({actual} characters)")]
    ContentTooLarge { limit: usize, actual: usize },
}

/// Configuration for the Guardian.
#[derive(Debug, Clone)]
pub struct GuardianConfig {
    /// Maximum accepted content length, in characters.
    pub max_content_chars: usize,

    /// Per-audit cap on audited claims (top-N by confidence).
    pub max_audited_claims: usize,

    /// Per-audit cap on audited laws (top-N by confidence).
    pub max_audited_laws: usize,

    /// Per-audit cap on drift-checked behaviors.
    pub max_behavior_checks: usize,

    /// Evidence chunks retrieved per claim/law judgment.
    pub evidence_limit: usize,

    /// Chunks retrieved when building a character's recent history.
    pub history_window: usize,

    /// Closest history chunks kept after name filtering.
    pub history_keep: usize,

    /// Maximum resonance matches surfaced.
    pub resonance_limit: usize,

    /// Minimum similarity for a resonance match.
    pub resonance_threshold: f32,

    /// Simultaneous oracle judgment calls (bounded worker pool).
    pub oracle_concurrency: usize,

    /// Hard wall-clock budget for one audit invocation.
    pub timeout: Duration,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            max_content_chars: 50_000,
            max_audited_claims: 8,
            max_audited_laws: 5,
            max_behavior_checks: 3,
            evidence_limit: 5,
            history_window: 12,
            history_keep: 3,
            resonance_limit: 3,
            resonance_threshold: 0.82,
            oracle_concurrency: 3,
            timeout: Duration::from_secs(45),
        }
    }
}

impl GuardianConfig {
    pub fn with_max_content_chars(mut self, max: usize) -> Self {
        self.max_content_chars = max;
        self
    }

    pub fn with_max_audited_claims(mut self, cap: usize) -> Self {
        self.max_audited_claims = cap;
        self
    }

    pub fn with_max_audited_laws(mut self, cap: usize) -> Self {
        self.max_audited_laws = cap;
        self
    }

    pub fn with_max_behavior_checks(mut self, cap: usize) -> Self {
        self.max_behavior_checks = cap;
        self
    }

    pub fn with_evidence_limit(mut self, limit: usize) -> Self {
        self.evidence_limit = limit;
        self
    }

    pub fn with_resonance_threshold(mut self, threshold: f32) -> Self {
        self.resonance_threshold = threshold;
        self
    }

    pub fn with_oracle_concurrency(mut self, concurrency: usize) -> Self {
        self.oracle_concurrency = concurrency;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// One audit request. The authenticated `user_id` principal is supplied
/// separately by the calling environment.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditRequest {
    pub content: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub file_id: Option<String>,
}

impl AuditRequest {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            project_id: None,
            file_id: None,
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_file(mut self, file_id: impl Into<String>) -> Self {
        self.file_id = Some(file_id.into());
        self
    }
}

/// Why an audit did not run to normal completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    /// Content unchanged since the last audit of this file.
    SkippedUnchanged,
    /// The extraction stage's oracle output was unparseable.
    ParseError,
    /// An internal failure was degraded to this opaque status.
    SystemCalibration,
}

/// The aggregated result of one audit.
///
/// Finding arrays carry no ordering guarantee; per-item judgments
/// complete out of order inside the worker pool.
#[derive(Debug, Serialize)]
pub struct AuditReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AuditStatus>,
    pub facts: Vec<VerifiedFact>,
    pub conflicts: Vec<ConflictRecord>,
    pub world_law_violations: Vec<WorldLawViolation>,
    pub personality_drift: Vec<DriftVerdict>,
    pub resonance_matches: Vec<ResonanceMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structure_analysis: Option<StructureSignal>,
    /// Bounded raw-output preview, present only on parse failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_preview: Option<String>,
}

impl AuditReport {
    fn base(success: bool, status: Option<AuditStatus>) -> Self {
        Self {
            success,
            status,
            facts: Vec::new(),
            conflicts: Vec::new(),
            world_law_violations: Vec::new(),
            personality_drift: Vec::new(),
            resonance_matches: Vec::new(),
            structure_analysis: None,
            parse_preview: None,
        }
    }

    /// Successful audit of empty content: nothing to check.
    pub fn empty_success() -> Self {
        Self::base(true, None)
    }

    /// Content unchanged; the cached audit stands.
    pub fn skipped_unchanged() -> Self {
        Self::base(true, Some(AuditStatus::SkippedUnchanged))
    }

    /// Extraction output was unparseable; diagnostics attached.
    pub fn parse_error(failure: &ParseFailure) -> Self {
        let mut report = Self::base(false, Some(AuditStatus::ParseError));
        report.parse_preview = Some(failure.raw_preview.clone());
        report
    }

    /// Opaque degraded response for internal failures.
    pub fn system_calibration() -> Self {
        Self::base(false, Some(AuditStatus::SystemCalibration))
    }
}

/// Internal failures that degrade the whole run.
#[derive(Debug, Error)]
enum PipelineError {
    #[error("oracle failure: {0}")]
    Oracle(#[from] OracleError),
}

/// The narrative consistency guardian.
///
/// Collaborators are injected once at construction; audits share no
/// mutable state beyond the external cache and corpus, so one Guardian
/// can serve concurrent invocations.
pub struct Guardian {
    oracle: Arc<dyn Oracle>,
    documents: Arc<dyn DocumentStore>,
    profiles: Arc<dyn ProfileStore>,
    cache: ContentChangeCache,
    config: GuardianConfig,
}

impl Guardian {
    /// Create a Guardian over the four injected collaborators.
    pub fn new(
        oracle: Arc<dyn Oracle>,
        documents: Arc<dyn DocumentStore>,
        profiles: Arc<dyn ProfileStore>,
        cache_store: Arc<dyn CacheStore>,
    ) -> Self {
        Self {
            oracle,
            documents,
            profiles,
            cache: ContentChangeCache::new(cache_store),
            config: GuardianConfig::default(),
        }
    }

    /// Configure the Guardian.
    pub fn with_config(mut self, config: GuardianConfig) -> Self {
        self.config = config;
        self
    }

    /// Get the active configuration.
    pub fn config(&self) -> &GuardianConfig {
        &self.config
    }

    /// Audit one piece of content for the given principal.
    ///
    /// Only client errors surface as `Err`; every internal failure is
    /// converted into a degraded-but-shaped [`AuditReport`].
    pub async fn audit(
        &self,
        user_id: &str,
        request: AuditRequest,
    ) -> Result<AuditReport, GuardianError> {
        let char_count = request.content.chars().count();
        if char_count > self.config.max_content_chars {
            return Err(GuardianError::ContentTooLarge {
                limit: self.config.max_content_chars,
                actual: char_count,
            });
        }

        if request.content.trim().is_empty() {
            return Ok(AuditReport::empty_success());
        }

        if let Some(file_id) = &request.file_id {
            if self
                .cache
                .should_skip(user_id, file_id, &request.content)
                .await
            {
                return Ok(AuditReport::skipped_unchanged());
            }
        }

        let report = match tokio::time::timeout(
            self.config.timeout,
            self.run_pipeline(user_id, &request),
        )
        .await
        {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                log::warn!("audit pipeline degraded for {user_id}: {e}");
                AuditReport::system_calibration()
            }
            Err(_) => {
                log::warn!(
                    "audit timed out after {:?} for {user_id}",
                    self.config.timeout
                );
                AuditReport::system_calibration()
            }
        };

        // The cache entry is the only persisted side effect and is
        // written last, so a timeout or degraded run leaves it untouched.
        if report.success && report.status.is_none() {
            if let Some(file_id) = &request.file_id {
                self.cache
                    .record_audit(user_id, file_id, &request.content)
                    .await;
            }
        }

        Ok(report)
    }

    /// The staged pipeline: extract, audit per finding type, aggregate.
    async fn run_pipeline(
        &self,
        user_id: &str,
        request: &AuditRequest,
    ) -> Result<AuditReport, PipelineError> {
        let scope = CorpusScope {
            user_id: user_id.to_string(),
            project_id: request.project_id.clone(),
        };
        let retriever = EvidenceRetriever::new(self.oracle.clone(), self.documents.clone());

        let extraction_stage = ClaimExtractionStage::new(self.oracle.clone());
        let extraction = match extraction_stage.extract(&request.content).await {
            Ok(extraction) => extraction,
            // Extraction parse failure is the one fatal stage failure:
            // every downstream stage consumes its output.
            Err(ExtractionFailure::Parse(failure)) => {
                log::warn!("claim extraction unparseable for {user_id}: {failure}");
                return Ok(AuditReport::parse_error(&failure));
            }
            Err(ExtractionFailure::Oracle(e)) => return Err(e.into()),
        };

        log::debug!(
            "extracted {} claims, {} laws, {} behaviors for {user_id}",
            extraction.claims.len(),
            extraction.laws.len(),
            extraction.behaviors.len()
        );

        let contradiction_auditor = ContradictionAuditor::new(
            self.oracle.clone(),
            retriever.clone(),
            self.config.max_audited_claims,
            self.config.evidence_limit,
            self.config.oracle_concurrency,
        );
        let contradiction_findings = contradiction_auditor
            .audit(&scope, &extraction.claims)
            .await;

        let world_rule_auditor = WorldRuleAuditor::new(
            self.oracle.clone(),
            retriever.clone(),
            self.config.max_audited_laws,
            self.config.evidence_limit,
            self.config.oracle_concurrency,
        );
        let world_law_violations = world_rule_auditor.audit(&scope, &extraction.laws).await;

        let triangulator = PersonalityDriftTriangulator::new(
            self.oracle.clone(),
            self.profiles.clone(),
            retriever.clone(),
            self.config.max_behavior_checks,
            self.config.history_window,
            self.config.history_keep,
        );
        let personality_drift = triangulator.audit(&scope, &extraction.behaviors).await;

        let resonance_scanner = ResonanceScanner::new(
            retriever,
            self.config.resonance_threshold,
            self.config.resonance_limit,
        );
        let resonance_matches = resonance_scanner.scan(&scope, &request.content).await;

        Ok(AuditReport {
            success: true,
            status: None,
            facts: contradiction_findings.facts,
            conflicts: contradiction_findings.conflicts,
            world_law_violations,
            personality_drift,
            resonance_matches,
            structure_analysis: extraction.structure,
            parse_preview: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builders() {
        let config = GuardianConfig::default()
            .with_max_audited_claims(3)
            .with_timeout(Duration::from_secs(10))
            .with_oracle_concurrency(1);

        assert_eq!(config.max_audited_claims, 3);
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.oracle_concurrency, 1);
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_value(AuditStatus::SkippedUnchanged).unwrap(),
            "skipped_unchanged"
        );
        assert_eq!(
            serde_json::to_value(AuditStatus::ParseError).unwrap(),
            "parse_error"
        );
        assert_eq!(
            serde_json::to_value(AuditStatus::SystemCalibration).unwrap(),
            "system_calibration"
        );
    }

    #[test]
    fn test_report_constructors() {
        let empty = AuditReport::empty_success();
        assert!(empty.success);
        assert!(empty.status.is_none());
        assert!(empty.facts.is_empty());

        let skipped = AuditReport::skipped_unchanged();
        assert!(skipped.success);
        assert_eq!(skipped.status, Some(AuditStatus::SkippedUnchanged));

        let degraded = AuditReport::system_calibration();
        assert!(!degraded.success);
        assert_eq!(degraded.status, Some(AuditStatus::SystemCalibration));
    }

    #[test]
    fn test_report_serialization_omits_empty_options() {
        let report = AuditReport::empty_success();
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["success"], true);
        assert!(json.get("status").is_none());
        assert!(json.get("parse_preview").is_none());
        assert!(json["facts"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_request_builders() {
        let request = AuditRequest::new("The tower fell.")
            .with_project("p1")
            .with_file("f1");

        assert_eq!(request.project_id.as_deref(), Some("p1"));
        assert_eq!(request.file_id.as_deref(), Some("f1"));
    }
}
