//! Drift triangulation tests: the three-source state machine, profile
//! resolution, and lazy psychology derivation.

use std::sync::Arc;

use guardian_core::testing::{sample_chunk, MockOracle};
use guardian_core::{
    AuditRequest, CharacterProfile, DriftSeverity, DriftStatus, Guardian, GuardianConfig,
    InMemoryCacheStore, InMemoryCorpus, InMemoryProfileStore, ProfileStore,
};

struct Fixture {
    oracle: Arc<MockOracle>,
    corpus: Arc<InMemoryCorpus>,
    profiles: Arc<InMemoryProfileStore>,
    guardian: Guardian,
}

fn fixture() -> Fixture {
    let oracle = Arc::new(MockOracle::new());
    let corpus = Arc::new(InMemoryCorpus::new());
    let profiles = Arc::new(InMemoryProfileStore::new());
    let cache = Arc::new(InMemoryCacheStore::new());

    let guardian = Guardian::new(
        oracle.clone(),
        corpus.clone(),
        profiles.clone(),
        cache,
    )
    .with_config(GuardianConfig::default());

    Fixture {
        oracle,
        corpus,
        profiles,
        guardian,
    }
}

#[tokio::test]
async fn test_drift_state_machine_is_exhaustive() {
    let f = fixture();

    f.profiles
        .insert(
            "u1",
            CharacterProfile::new("Alice").with_personality("Gentle healer, protective"),
        )
        .await;
    f.profiles
        .insert(
            "u1",
            CharacterProfile::new("Bord").with_personality("Loyal caravan guard"),
        )
        .await;
    f.profiles
        .insert(
            "u1",
            CharacterProfile::new("Cara").with_personality("Sentimental archivist"),
        )
        .await;

    f.oracle.stub(
        "claim-extraction stage",
        r#"{"behaviors": [
            {"character": "Alice", "tone": "warm", "action": "comforts the prisoner", "dialogue_sample": "You are safe now."},
            {"character": "Bord", "tone": "cold", "action": "abandons the caravan", "dialogue_sample": ""},
            {"character": "Cara", "tone": "cruel", "action": "burns the letters", "dialogue_sample": "Sentiment is a weakness."}
        ]}"#,
    );
    f.oracle.stub(
        "Alice",
        r#"{"agrees_with_profile": true, "agrees_with_history": true, "comment": "fully in character", "friction_score": 0.05}"#,
    );
    f.oracle.stub(
        "Bord",
        r#"{"agrees_with_profile": false, "agrees_with_history": true, "comment": "recent chapters show this hardening", "friction_score": 0.5}"#,
    );
    f.oracle.stub(
        "Cara",
        r#"{"agrees_with_profile": false, "agrees_with_history": false, "comment": "nothing supports this cruelty", "friction_score": 0.9}"#,
    );

    let report = f
        .guardian
        .audit("u1", AuditRequest::new("A scene with three characters."))
        .await
        .unwrap();

    // Consistent verdicts are suppressed; only evolved/traitor surface.
    assert_eq!(report.personality_drift.len(), 2);
    assert!(!report
        .personality_drift
        .iter()
        .any(|v| v.status == DriftStatus::Consistent));
    assert!(!report
        .personality_drift
        .iter()
        .any(|v| v.character == "Alice"));

    let bord = report
        .personality_drift
        .iter()
        .find(|v| v.character == "Bord")
        .unwrap();
    assert_eq!(bord.status, DriftStatus::Evolved);
    assert_eq!(bord.severity, DriftSeverity::Warning);
    assert!((bord.friction_score - 0.5).abs() < f32::EPSILON);

    let cara = report
        .personality_drift
        .iter()
        .find(|v| v.character == "Cara")
        .unwrap();
    assert_eq!(cara.status, DriftStatus::Traitor);
    assert_eq!(cara.severity, DriftSeverity::Critical);
    assert!(cara.comment.contains("nothing supports"));
}

#[tokio::test]
async fn test_missing_profile_produces_no_verdict() {
    let f = fixture();
    f.oracle.stub(
        "claim-extraction stage",
        r#"{"behaviors": [{"character": "Zed", "tone": "manic", "action": "laughs at the funeral", "dialogue_sample": ""}]}"#,
    );

    let report = f
        .guardian
        .audit("u1", AuditRequest::new("Zed laughs at the funeral."))
        .await
        .unwrap();

    // No baseline, no verdict of any kind - and no judgment call made.
    assert!(report.personality_drift.is_empty());
    assert_eq!(f.oracle.generate_calls(), 1);
}

#[tokio::test]
async fn test_behavior_cap_bounds_drift_checks() {
    let f = fixture();

    for name in ["Ana", "Bea", "Col", "Dov"] {
        f.profiles
            .insert(
                "u1",
                CharacterProfile::new(name).with_personality("Steady and calm"),
            )
            .await;
    }

    f.oracle.stub(
        "claim-extraction stage",
        r#"{"behaviors": [
            {"character": "Ana", "tone": "flat", "action": "walks", "dialogue_sample": ""},
            {"character": "Bea", "tone": "flat", "action": "walks", "dialogue_sample": ""},
            {"character": "Col", "tone": "flat", "action": "walks", "dialogue_sample": ""},
            {"character": "Dov", "tone": "flat", "action": "walks", "dialogue_sample": ""}
        ]}"#,
    );
    f.oracle.stub(
        "Triangulate",
        r#"{"agrees_with_profile": false, "agrees_with_history": false, "comment": "off profile", "friction_score": 0.7}"#,
    );

    let guardian = Guardian::new(
        f.oracle.clone(),
        f.corpus.clone(),
        f.profiles.clone(),
        Arc::new(InMemoryCacheStore::new()),
    )
    .with_config(GuardianConfig::default().with_max_behavior_checks(2));

    let report = guardian
        .audit("u1", AuditRequest::new("Everyone walks."))
        .await
        .unwrap();

    assert_eq!(report.personality_drift.len(), 2);
    let characters: Vec<&str> = report
        .personality_drift
        .iter()
        .map(|v| v.character.as_str())
        .collect();
    assert!(characters.contains(&"Ana"));
    assert!(characters.contains(&"Bea"));
}

#[tokio::test]
async fn test_derivation_fills_and_persists_missing_psychology() {
    let f = fixture();
    f.profiles
        .insert(
            "u1",
            CharacterProfile::new("Mara")
                .with_bio("Mara served ten years in the border legion before deserting to study medicine."),
        )
        .await;

    f.oracle.stub(
        "claim-extraction stage",
        r#"{"behaviors": [{"character": "Mara", "tone": "icy", "action": "refuses to treat the wounded", "dialogue_sample": ""}]}"#,
    );
    f.oracle.stub(
        "Derive the psychological",
        r#"{"personality": "Fiercely loyal, slow to trust, healer at heart", "evolution_arc": "From soldier to healer"}"#,
    );
    f.oracle.stub(
        "Triangulate",
        r#"{"agrees_with_profile": false, "agrees_with_history": false, "comment": "refusing care contradicts her core", "friction_score": 0.85}"#,
    );

    let report = f
        .guardian
        .audit("u1", AuditRequest::new("Mara refuses to treat the wounded."))
        .await
        .unwrap();

    assert_eq!(report.personality_drift.len(), 1);
    let verdict = &report.personality_drift[0];
    assert_eq!(verdict.status, DriftStatus::Traitor);
    assert!(verdict.canonical_psychology.contains("Fiercely loyal"));

    // The derivation was merge-written back to the profile store.
    let profile = f.profiles.get("u1", "mara").await.unwrap().unwrap();
    assert_eq!(
        profile.personality.as_deref(),
        Some("Fiercely loyal, slow to trust, healer at heart")
    );
    assert_eq!(profile.evolution_arc.as_deref(), Some("From soldier to healer"));
    assert!(profile.last_analyzed.is_some());
}

#[tokio::test]
async fn test_human_canon_is_never_rederived() {
    let f = fixture();
    f.profiles
        .insert(
            "u1",
            CharacterProfile::new("Lio")
                .with_personality("Human-written canon")
                .with_bio("A long biography that would otherwise trigger derivation."),
        )
        .await;

    f.oracle.stub(
        "claim-extraction stage",
        r#"{"behaviors": [{"character": "Lio", "tone": "calm", "action": "tends the garden", "dialogue_sample": ""}]}"#,
    );
    f.oracle.stub(
        "Triangulate",
        r#"{"agrees_with_profile": true, "agrees_with_history": true, "comment": "in character", "friction_score": 0.0}"#,
    );

    let report = f
        .guardian
        .audit("u1", AuditRequest::new("Lio tends the garden."))
        .await
        .unwrap();

    // Consistent: suppressed. And no derivation call was made: exactly
    // extraction + one triangulation.
    assert!(report.personality_drift.is_empty());
    assert_eq!(f.oracle.generate_calls(), 2);

    let profile = f.profiles.get("u1", "lio").await.unwrap().unwrap();
    assert_eq!(profile.personality.as_deref(), Some("Human-written canon"));
}

#[tokio::test]
async fn test_history_is_filtered_to_character_mentions() {
    let f = fixture();
    f.profiles
        .insert(
            "u1",
            CharacterProfile::new("Nils").with_personality("Stoic ferryman"),
        )
        .await;
    f.corpus
        .insert(sample_chunk(
            "u1",
            "chapters/ch02.md",
            "Nils wept at the gates of the drowned city",
        ))
        .await;
    f.corpus
        .insert(sample_chunk(
            "u1",
            "chapters/ch03.md",
            "The caravan rested beneath tall pines",
        ))
        .await;

    f.oracle.stub(
        "claim-extraction stage",
        r#"{"behaviors": [{"character": "Nils", "tone": "tender", "action": "gives away his savings", "dialogue_sample": ""}]}"#,
    );
    f.oracle.stub(
        "Triangulate",
        r#"{"agrees_with_profile": false, "agrees_with_history": true, "comment": "his grief has been building", "friction_score": 0.4}"#,
    );

    let report = f
        .guardian
        .audit("u1", AuditRequest::new("Nils gives away his savings."))
        .await
        .unwrap();

    assert_eq!(report.personality_drift.len(), 1);
    assert_eq!(report.personality_drift[0].status, DriftStatus::Evolved);

    // The triangulation prompt saw the chunk mentioning Nils, and not
    // the unrelated one.
    let log = f.oracle.generate_log();
    let (_, context) = log
        .iter()
        .find(|(instructions, _)| instructions.contains("Triangulate"))
        .unwrap();
    assert!(context.contains("Nils wept"));
    assert!(!context.contains("caravan"));
}
