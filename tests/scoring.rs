//! Normalization & Scoring Integration Tests
//!
//! Exercises the documented scoring contract through the public analysis
//! API: canonicalization of awkward response shapes, completeness
//! validation, the weighted aggregate, and the retry discipline around the
//! inference call.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use deckard::adapters::InferenceClient;
use deckard::core::analysis::{
    analyze, canonicalize, compute_overall_score, into_evaluation, validate,
};
use deckard::core::RetryPolicy;
use deckard::domain::evaluation::CATEGORY_WEIGHTS;
use deckard::domain::Slide;
use deckard::{PipelineError, Recommendation};

struct ScriptedInference {
    responses: Mutex<VecDeque<Result<String, PipelineError>>>,
    calls: AtomicUsize,
}

impl ScriptedInference {
    fn new(responses: Vec<Result<String, PipelineError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl InferenceClient for ScriptedInference {
    async fn generate(&self, _prompt: &str) -> Result<String, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("scripted inference ran out of responses")
    }
}

fn slides() -> Vec<Slide> {
    (1..=6)
        .map(|i| Slide {
            index: i,
            text: format!("content {}", i),
            notes: None,
        })
        .collect()
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        backoff_multiplier: 2.0,
    }
}

fn response_with_scores(scores: &[(&str, i64)]) -> Value {
    let mut map = Map::new();
    for (name, _) in CATEGORY_WEIGHTS {
        let score = scores
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, s)| *s)
            .unwrap_or(10);
        map.insert(
            name.to_string(),
            json!({"score": score, "qualitative_feedback": "assessed"}),
        );
    }
    map.insert("recommendation".to_string(), json!("Strong Buy"));
    map.insert("overall_strengths".to_string(), json!(["traction"]));
    map.insert("overall_weaknesses".to_string(), json!(["competition"]));
    map.insert("confidence_score".to_string(), json!(88));
    map.insert("recommendations".to_string(), json!("diligence the pipeline"));
    Value::Object(map)
}

#[tokio::test]
async fn test_analyze_scores_uniform_decks_at_the_extremes() {
    for (score, expected) in [(10, 100u8), (0, 0u8)] {
        let scripted = ScriptedInference::new(vec![Ok(response_with_scores(&[
            ("Problem Statement", score),
            ("Solution/Product", score),
            ("Market Opportunity", score),
            ("Business Model", score),
            ("Competitive Landscape", score),
            ("Team", score),
            ("Traction/Milestones", score),
            ("Financial Projections", score),
            ("Clarity and Presentation", score),
        ])
        .to_string())]);

        let scored = analyze(&scripted, &fast_retry(), &slides()).await.unwrap();
        assert_eq!(scored.overall_score, expected);
    }
}

#[tokio::test]
async fn test_analyze_weighted_example_from_the_contract() {
    // Problem Statement 5, all others 10 => 5*0.10 + 10*0.90 = 9.5 => 95
    let scripted = ScriptedInference::new(vec![Ok(response_with_scores(&[(
        "Problem Statement",
        5,
    )])
    .to_string())]);

    let scored = analyze(&scripted, &fast_retry(), &slides()).await.unwrap();
    assert_eq!(scored.overall_score, 95);
    assert_eq!(scored.evaluation.recommendation, Recommendation::StrongBuy);
    assert_eq!(scored.evaluation.confidence_score, 88);
}

#[tokio::test]
async fn test_analyze_normalizes_alias_keyed_response() {
    let mut response = response_with_scores(&[]);
    let entry = response
        .as_object_mut()
        .unwrap()
        .remove("Clarity and Presentation")
        .unwrap();
    response.as_object_mut().unwrap().insert(
        "Clarity and Presentation (Text only)".to_string(),
        entry,
    );

    let scripted = ScriptedInference::new(vec![Ok(response.to_string())]);
    let scored = analyze(&scripted, &fast_retry(), &slides()).await.unwrap();

    assert!(scored
        .evaluation
        .categories
        .contains_key("Clarity and Presentation"));
    assert!(!scored
        .evaluation
        .categories
        .contains_key("Clarity and Presentation (Text only)"));
    assert_eq!(scored.overall_score, 100);
}

#[tokio::test]
async fn test_analyze_remaps_numeric_keyed_response() {
    let mut response = response_with_scores(&[]);
    let entry = response.as_object_mut().unwrap().remove("Team").unwrap();
    let mut numeric_entry = entry;
    numeric_entry
        .as_object_mut()
        .unwrap()
        .insert("category".to_string(), json!("Team"));
    response
        .as_object_mut()
        .unwrap()
        .insert("0".to_string(), numeric_entry);

    let scripted = ScriptedInference::new(vec![Ok(response.to_string())]);
    let scored = analyze(&scripted, &fast_retry(), &slides()).await.unwrap();

    assert!(scored.evaluation.categories.contains_key("Team"));
    assert!(!scored.evaluation.categories.contains_key("0"));
}

#[tokio::test]
async fn test_analyze_retries_transient_failures_then_succeeds() {
    let scripted = ScriptedInference::new(vec![
        Err(PipelineError::TransientService("timeout".to_string())),
        Err(PipelineError::TransientService("502".to_string())),
        Ok(response_with_scores(&[]).to_string()),
    ]);

    let scored = analyze(&scripted, &fast_retry(), &slides()).await.unwrap();
    assert_eq!(scored.overall_score, 100);
    assert_eq!(scripted.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_analyze_surfaces_transient_error_after_final_attempt() {
    let scripted = ScriptedInference::new(vec![
        Err(PipelineError::TransientService("down".to_string())),
        Err(PipelineError::TransientService("down".to_string())),
        Err(PipelineError::TransientService("down".to_string())),
    ]);

    let err = analyze(&scripted, &fast_retry(), &slides())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::TransientService(_)));
    assert!(err.to_string().contains("3 attempts"));
    assert_eq!(scripted.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_analyze_fails_fast_on_malformed_json() {
    let scripted = ScriptedInference::new(vec![Ok("```json not even close".to_string())]);

    let err = analyze(&scripted, &fast_retry(), &slides())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::PermanentParse(_)));
    assert_eq!(scripted.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_analyze_reports_every_missing_category_and_field() {
    let mut response = response_with_scores(&[]);
    {
        let obj = response.as_object_mut().unwrap();
        obj.remove("Business Model");
        obj.remove("Financial Projections");
        obj.remove("overall_strengths");
        obj.remove("recommendations");
    }

    let scripted = ScriptedInference::new(vec![Ok(response.to_string())]);
    let err = analyze(&scripted, &fast_retry(), &slides())
        .await
        .unwrap_err();

    match err {
        PipelineError::AnalysisValidation {
            missing_categories,
            missing_fields,
        } => {
            assert_eq!(
                missing_categories,
                vec![
                    "Business Model".to_string(),
                    "Financial Projections".to_string()
                ]
            );
            assert_eq!(
                missing_fields,
                vec!["overall_strengths".to_string(), "recommendations".to_string()]
            );
        }
        other => panic!("expected AnalysisValidation, got {:?}", other),
    }
}

#[test]
fn test_scorer_preserves_missing_category_denominator_rule() {
    // Direct use of the raw-map scorer: remove a category entirely. The
    // weight still counts toward the denominator, so eight 10s with Market
    // Opportunity (0.20) absent yield 10*0.80 / 1.0 * 10 = 80.
    let mut response = response_with_scores(&[]);
    response
        .as_object_mut()
        .unwrap()
        .remove("Market Opportunity");

    let map = canonicalize(response).unwrap();
    assert!(validate(&map).is_err());
    assert_eq!(compute_overall_score(&map), 80);
}

#[test]
fn test_scorer_clamps_rogue_scores_into_range() {
    let response = response_with_scores(&[("Team", 99), ("Business Model", -7)]);

    let map = canonicalize(response).unwrap();
    // Team clamps to 10, Business Model to 0: 10 * 0.85 = 8.5 -> 85
    assert_eq!(compute_overall_score(&map), 85);
}

#[test]
fn test_scorer_defensive_zero_when_nothing_scored() {
    assert_eq!(compute_overall_score(&Map::new()), 0);
}

#[test]
fn test_into_evaluation_holds_exactly_nine_canonical_keys() {
    let map = canonicalize(response_with_scores(&[])).unwrap();
    let evaluation = into_evaluation(map).unwrap();

    assert_eq!(evaluation.categories.len(), 9);
    for (name, _) in CATEGORY_WEIGHTS {
        assert!(evaluation.categories.contains_key(name), "missing '{}'", name);
    }
}
