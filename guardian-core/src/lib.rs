//! Narrative Consistency Guardian.
//!
//! This crate audits a piece of evolving narrative text against the
//! previously indexed corpus of the same fictional world:
//! - Factual contradictions against established canon
//! - World-rule violations, weighted toward lore sources
//! - Character-behavior drift, triangulated against profile, recent
//!   history, and the current scene
//!
//! Collaborators (vector corpus, profile store, audit cache, generative
//! oracle) are injected as trait objects; in-memory implementations back
//! tests and embedded use.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use guardian_core::{
//!     AuditRequest, Guardian, GeminiOracle, InMemoryCacheStore, InMemoryCorpus,
//!     InMemoryProfileStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let oracle = Arc::new(GeminiOracle::from_env()?);
//!     let guardian = Guardian::new(
//!         oracle,
//!         Arc::new(InMemoryCorpus::new()),
//!         Arc::new(InMemoryProfileStore::new()),
//!         Arc::new(InMemoryCacheStore::new()),
//!     );
//!
//!     let request = AuditRequest::new("Cipher is dead.").with_file("ch07");
//!     let report = guardian.audit("user-1", request).await?;
//!     for conflict in &report.conflicts {
//!         println!("{}: {}", conflict.entity, conflict.conflict_reason);
//!     }
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod cache;
pub mod corpus;
pub mod extraction;
pub mod guardian;
pub mod oracle;
pub mod parser;
pub mod profile;
pub mod resonance;
pub mod retriever;
pub mod testing;

// Primary public API
pub use audit::{
    ConflictKind, ConflictRecord, DriftSeverity, DriftStatus, DriftVerdict, FactStatus,
    VerifiedFact, ViolationSeverity, WorldLawViolation,
};
pub use cache::{AuditCacheEntry, CacheStore, ContentChangeCache, InMemoryCacheStore};
pub use corpus::{
    ChunkId, CorpusScope, DocumentStore, InMemoryCorpus, NarrativeChunk, ScoredChunk, StoreError,
};
pub use extraction::{
    BehaviorObservation, ClaimCategory, ClaimExtraction, ExtractedClaim, ExtractedLaw,
    LawCategory, StructureSignal,
};
pub use guardian::{AuditReport, AuditRequest, AuditStatus, Guardian, GuardianConfig, GuardianError};
pub use oracle::{GeminiOracle, Oracle, OracleError};
pub use parser::{ParseFailure, ParseFailureCode};
pub use profile::{CharacterProfile, InMemoryProfileStore, ProfilePatch, ProfileStore};
pub use resonance::ResonanceMatch;
pub use retriever::{EvidenceRetriever, RetrievalError};
