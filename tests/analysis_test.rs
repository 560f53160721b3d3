//! Integration tests for orchestration, completeness validation and gap filling.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use session_feedback::analysis::{
    CompletenessValidator, GapCause, GapFillConfig, GapFiller, Orchestrator, OrchestratorConfig,
};
use session_feedback::error::{Error, Result};
use session_feedback::model::{
    AnalysisDocument, ContentRule, DocumentQuality, PartialDocument, Provenance, Schema, Section,
    Severity,
};
use session_feedback::provider::{AnalysisProvider, ProviderRegistry, ProviderRequest};

type Reply = Box<dyn Fn(usize, &ProviderRequest) -> Result<PartialDocument> + Send + Sync>;

/// Provider whose replies are scripted by call number (1-based).
struct Scripted {
    name: String,
    sections: Vec<Section>,
    reply: Reply,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl Scripted {
    fn new(
        name: &str,
        sections: &[Section],
        reply: impl Fn(usize, &ProviderRequest) -> Result<PartialDocument> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            sections: sections.to_vec(),
            reply: Box::new(reply),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnalysisProvider for Scripted {
    fn name(&self) -> &str {
        &self.name
    }

    fn sections(&self) -> &[Section] {
        &self.sections
    }

    async fn analyze(&self, request: &ProviderRequest) -> Result<PartialDocument> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };
        (self.reply)(call, request)
    }
}

const TRANSCRIPT: &str = "Right, everyone bring it in. Today we are working on first touch under \
    pressure. Why do you think we open our body to the pitch? Good, that gives you more options. \
    Let's try it in the rondo now. Great effort, keep talking to each other.";

fn full(section: Section) -> Value {
    let schema = Schema::coaching();
    let spec = schema.section(section).unwrap();
    Value::Object(
        spec.fields
            .iter()
            .map(|f| {
                (
                    f.name.clone(),
                    json!(format!("Detailed notes on {} for this session", f.name)),
                )
            })
            .collect(),
    )
}

fn full_partial(sections: &[Section]) -> PartialDocument {
    sections
        .iter()
        .fold(PartialDocument::new(), |p, s| p.with(*s, full(*s)))
}

fn doc_with(sections: &[Section]) -> AnalysisDocument {
    let mut doc = AnalysisDocument::new();
    doc.merge_partial(
        &full_partial(sections),
        &Provenance::Provider("main".into()),
        &ContentRule::default(),
    );
    doc
}

fn all_except(skip: &[Section]) -> Vec<Section> {
    Section::ALL
        .into_iter()
        .filter(|s| !skip.contains(s))
        .collect()
}

fn registry(providers: &[Arc<Scripted>]) -> ProviderRegistry {
    let mut registry = ProviderRegistry::empty();
    for provider in providers {
        registry.register(provider.clone());
    }
    registry
}

fn request() -> ProviderRequest {
    ProviderRequest::new(TRANSCRIPT, None, Default::default())
}

fn filler(registry: ProviderRegistry, config: GapFillConfig) -> GapFiller {
    GapFiller::new(registry, CompletenessValidator::default(), config)
}

fn fast_config() -> GapFillConfig {
    GapFillConfig {
        chunk_timeout: Duration::from_millis(200),
        call_timeout: Duration::from_millis(200),
        ..GapFillConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn key_info_only_scores_one_ninth_with_eight_critical_gaps() {
    let provider = Scripted::new("key", &[Section::KeyInfo], |_, _| {
        Ok(full_partial(&[Section::KeyInfo]))
    });
    let registry = registry(&[provider]);
    let orchestrator = Orchestrator::new(
        registry.clone(),
        ContentRule::default(),
        OrchestratorConfig::default(),
    );

    let doc = orchestrator.run(&request()).await;
    let report = CompletenessValidator::default().validate(&doc, &registry.ownership());

    assert!(!report.is_complete);
    assert_eq!(report.sections_complete, 1);
    assert_eq!(report.total_sections, 9);
    assert!((report.completeness_score - 100.0 / 9.0).abs() < 0.01);
    assert_eq!(report.gaps.len(), 8);
    assert_eq!(report.critical_gaps(), 8);

    assert!(report.results["key"].is_complete);
    assert_eq!(report.results["key"].completion_percentage, 100.0);
    let unassigned = &report.results["unassigned"];
    assert!(!unassigned.is_complete);
    assert!(unassigned.missing_fields.contains(&"comments.overallComment".to_string()));
}

#[test]
fn complete_document_validates_idempotently() {
    let validator = CompletenessValidator::default();
    let doc = doc_with(&Section::ALL);

    let first = validator.validate(&doc, &BTreeMap::new());
    let second = validator.validate(&doc, &BTreeMap::new());

    assert!(first.is_complete);
    assert!(first.gaps.is_empty());
    assert_eq!(first.completeness_score, 100.0);
    assert_eq!(first, second);
}

#[test]
fn malformed_section_is_a_critical_json_parsing_gap() {
    let mut doc = doc_with(&all_except(&[Section::Neuroscience]));
    doc.merge_partial(
        &PartialDocument::new().with(Section::Neuroscience, json!("not an object")),
        &Provenance::Provider("main".into()),
        &ContentRule::default(),
    );

    let report = CompletenessValidator::default().validate(&doc, &BTreeMap::new());
    assert_eq!(report.gaps.len(), 1);
    assert_eq!(report.gaps[0].cause, GapCause::JsonParsing);
    assert_eq!(report.gaps[0].severity, Severity::Critical);
}

// ---------------------------------------------------------------------------
// Orchestration
// ---------------------------------------------------------------------------

#[tokio::test]
async fn all_providers_failing_yields_empty_document() {
    let failing = Scripted::new("a", &Section::ALL, |_, _| {
        Err(Error::provider("a", "connection reset"))
    });
    let garbled = Scripted::new("b", &Section::ALL, |_, _| {
        Err(Error::MalformedOutput("garbage".into()))
    });
    let orchestrator = Orchestrator::new(
        registry(&[failing, garbled]),
        ContentRule::default(),
        OrchestratorConfig::default(),
    );

    let doc = orchestrator.run(&request()).await;
    assert!(doc.sections.is_empty());
}

struct Slow;

#[async_trait]
impl AnalysisProvider for Slow {
    fn name(&self) -> &str {
        "slow"
    }

    fn sections(&self) -> &[Section] {
        &[Section::Comments]
    }

    async fn analyze(&self, _: &ProviderRequest) -> Result<PartialDocument> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(full_partial(&[Section::Comments]))
    }
}

#[tokio::test]
async fn slow_provider_is_cut_off_and_others_still_merge() {
    let fast = Scripted::new("fast", &[Section::KeyInfo], |_, _| {
        Ok(full_partial(&[Section::KeyInfo]))
    });
    let orchestrator = Orchestrator::new(
        {
            let mut registry = ProviderRegistry::empty();
            registry.register(Arc::new(Slow));
            registry.register(fast);
            registry
        },
        ContentRule::default(),
        OrchestratorConfig {
            call_timeout: Duration::from_millis(50),
        },
    );

    let doc = tokio::time::timeout(Duration::from_secs(5), orchestrator.run(&request()))
        .await
        .expect("orchestrator waited on a hung provider");
    assert!(doc.section(Section::KeyInfo).is_some());
    assert!(doc.section(Section::Comments).is_none());
}

#[tokio::test]
async fn overlapping_providers_merge_without_regression() {
    let first = Scripted::new("first", &[Section::Language], |_, _| {
        Ok(PartialDocument::new().with(
            Section::Language,
            json!({"tone": "Calm, warm and encouraging", "clarity": "ok"}),
        ))
    });
    let second = Scripted::new("second", &[Section::Language], |_, _| {
        Ok(PartialDocument::new().with(
            Section::Language,
            json!({"tone": "meh", "clarity": "Instructions were short and precise"}),
        ))
    });
    let orchestrator = Orchestrator::new(
        registry(&[first, second]),
        ContentRule::default(),
        OrchestratorConfig::default(),
    );

    let doc = orchestrator.run(&request()).await;
    let tone = doc.field(Section::Language, "tone").unwrap();
    let clarity = doc.field(Section::Language, "clarity").unwrap();
    assert_eq!(tone.value, json!("Calm, warm and encouraging"));
    assert_eq!(tone.provenance, Provenance::Provider("first".into()));
    assert_eq!(clarity.value, json!("Instructions were short and precise"));
    assert_eq!(clarity.provenance, Provenance::Provider("second".into()));
}

// ---------------------------------------------------------------------------
// Gap filling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_round_completes_document() {
    let provider = Scripted::new("main", &Section::ALL, |call, _| match call {
        1 => Ok(full_partial(&[Section::Questioning])),
        _ => Ok(full_partial(&[Section::Language])),
    });
    let config = fast_config();
    let max_rounds = config.max_rounds;
    let filler = filler(registry(&[provider.clone()]), config);

    let mut doc = doc_with(&all_except(&[Section::Questioning, Section::Language]));
    let outcome = filler.fill(&request(), &mut doc).await;

    assert!(outcome.report.is_complete);
    assert_eq!(outcome.rounds, 2);
    assert!(outcome.rounds <= max_rounds);
    assert_eq!(outcome.fallback_fields, 0);
    assert_eq!(doc.quality, DocumentQuality::Complete);

    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[0].target_sections,
        Some(vec![Section::Questioning, Section::Language])
    );
    assert_eq!(requests[1].target_sections, Some(vec![Section::Language]));
    assert!(requests.iter().all(|r| r.require_complete));
}

#[tokio::test]
async fn all_providers_failing_falls_back_to_critical_placeholders() {
    let provider = Scripted::new("main", &Section::ALL, |_, _| {
        Err(Error::provider("main", "503 overloaded"))
    });
    let registry = registry(&[provider]);
    let orchestrator = Orchestrator::new(
        registry.clone(),
        ContentRule::default(),
        OrchestratorConfig::default(),
    );
    let config = fast_config();
    let max_rounds = config.max_rounds;
    let filler = filler(registry, config);

    let mut doc = orchestrator.run(&request()).await;
    assert!(doc.sections.is_empty());

    let outcome = filler.fill(&request(), &mut doc).await;
    let schema = Schema::coaching();

    assert_eq!(outcome.rounds, max_rounds);
    assert_eq!(outcome.fallback_fields, 11);
    assert!(!outcome.report.is_complete);
    assert_eq!(doc.quality, DocumentQuality::BestEffort);
    for (section, name, field) in doc.fields() {
        assert_eq!(schema.field_severity(section, name), Severity::Critical);
        assert_eq!(field.provenance, Provenance::Placeholder);
    }
}

#[tokio::test]
async fn single_missing_field_is_synthesized_without_calls() {
    let provider = Scripted::new("main", &Section::ALL, |_, _| Ok(PartialDocument::new()));
    let filler = filler(registry(&[provider.clone()]), fast_config());

    let mut doc = doc_with(&all_except(&[Section::Language]));
    doc.merge_partial(
        &PartialDocument::new().with(
            Section::Language,
            json!({
                "tone": "Warm and encouraging",
                "keyPhrases": ["open your body"],
                "recommendations": "Pause after each question",
            }),
        ),
        &Provenance::Provider("main".into()),
        &ContentRule::default(),
    );

    let outcome = filler.fill(&request(), &mut doc).await;

    assert!(outcome.report.is_complete);
    assert_eq!(outcome.rounds, 1);
    assert_eq!(outcome.synthesized, 1);
    assert!(provider.requests().is_empty());
    let clarity = doc.field(Section::Language, "clarity").unwrap();
    assert_eq!(clarity.provenance, Provenance::Synthesized);
}

#[tokio::test]
async fn malformed_section_is_retried_with_strict_contract() {
    let provider = Scripted::new("main", &Section::ALL, |_, _| {
        Ok(full_partial(&[Section::CoachSpecific]))
    });
    let filler = filler(registry(&[provider.clone()]), fast_config());

    let mut doc = doc_with(&all_except(&[Section::CoachSpecific]));
    doc.merge_partial(
        &PartialDocument::new().with(Section::CoachSpecific, json!("oops")),
        &Provenance::Provider("main".into()),
        &ContentRule::default(),
    );

    let outcome = filler.fill(&request(), &mut doc).await;
    assert!(outcome.report.is_complete);

    let requests = provider.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].strict_output);
    assert_eq!(requests[0].target_sections, Some(vec![Section::CoachSpecific]));
}

#[tokio::test]
async fn token_limit_gap_is_retried_with_truncated_input() {
    let provider = Scripted::new("main", &Section::ALL, |_, _| {
        Ok(full_partial(&[Section::Questioning]))
    });
    let config = GapFillConfig {
        truncate_chars: 40,
        ..fast_config()
    };
    let filler = filler(registry(&[provider.clone()]), config);

    let mut doc = doc_with(&all_except(&[Section::Questioning]));
    filler.fill(&request(), &mut doc).await;

    let requests = provider.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].text.chars().count() <= 40);
    assert!(TRANSCRIPT.starts_with(&requests[0].text));
}

#[tokio::test]
async fn timeout_gap_is_retried_per_chunk() {
    let provider = Scripted::new("outcomes", &[Section::IntendedOutcomes], |_, _| {
        Ok(full_partial(&[Section::IntendedOutcomes]))
    });
    let config = GapFillConfig {
        chunk_chars: 80,
        ..fast_config()
    };
    let filler = filler(registry(&[provider.clone()]), config);

    let mut doc = doc_with(&all_except(&[Section::IntendedOutcomes]));
    let outcome = filler.fill(&request(), &mut doc).await;

    assert!(outcome.report.is_complete);
    let requests = provider.requests();
    assert!(requests.len() > 1, "expected one call per chunk");
    for r in &requests {
        assert!(r.text.chars().count() <= 80);
        assert_eq!(r.target_sections, Some(vec![Section::IntendedOutcomes]));
    }
}
