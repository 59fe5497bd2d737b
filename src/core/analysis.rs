//! Inference response normalization and deterministic scoring.
//!
//! The raw response is canonicalized in two passes over a generic
//! string-keyed map (structural numeric-key remap, then name-alias remap),
//! validated for completeness, and only then scored and converted into the
//! typed evaluation document. Scoring clamps each category score to [0, 10],
//! weights it, and divides by the weight actually used; with validation in
//! place the used weight is always 1.0.

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::adapters::InferenceClient;
use crate::domain::deck::Slide;
use crate::domain::evaluation::{
    CategoryEvaluation, Evaluation, Recommendation, CATEGORY_ALIASES, CATEGORY_WEIGHTS,
    REQUIRED_FIELDS,
};
use crate::error::PipelineError;

use super::retry::RetryPolicy;

/// An evaluation document together with its derived overall score
#[derive(Debug, Clone)]
pub struct ScoredEvaluation {
    pub evaluation: Evaluation,
    pub overall_score: u8,
}

/// Run the full analysis: prompt, retry-wrapped inference, normalization,
/// validation, scoring.
pub async fn analyze(
    inference: &dyn InferenceClient,
    retry: &RetryPolicy,
    slides: &[Slide],
) -> Result<ScoredEvaluation, PipelineError> {
    let processing_date = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    let prompt = build_prompt(slides, &processing_date);

    let raw = call_with_retry(inference, retry, &prompt).await?;

    let parsed: Value = serde_json::from_str(&raw)
        .map_err(|e| PipelineError::PermanentParse(e.to_string()))?;

    let canonical = canonicalize(parsed)?;
    validate(&canonical)?;

    let overall_score = compute_overall_score(&canonical);

    // Some models volunteer their own aggregate; log if it disagrees.
    if let Some(claimed) = canonical.get("overall_score").and_then(Value::as_f64) {
        if (claimed - f64::from(overall_score)).abs() > 1.0 {
            warn!(
                claimed,
                computed = overall_score,
                "Response carried a diverging overall score, keeping the recomputed value"
            );
        }
    }

    let evaluation = into_evaluation(canonical)?;
    info!(overall_score, recommendation = %evaluation.recommendation, "Analysis normalized and scored");

    Ok(ScoredEvaluation {
        evaluation,
        overall_score,
    })
}

/// Invoke the inference service with bounded retries and backoff.
///
/// Only transient failures are retried; a parse-class failure from the
/// client surfaces immediately.
async fn call_with_retry(
    inference: &dyn InferenceClient,
    retry: &RetryPolicy,
    prompt: &str,
) -> Result<String, PipelineError> {
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match inference.generate(prompt).await {
            Ok(text) => {
                debug!(attempt, "Inference call succeeded");
                return Ok(text);
            }
            Err(e) if e.is_retryable() && retry.should_retry(attempt) => {
                let delay = retry.delay_for_attempt(attempt);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Inference call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) if e.is_retryable() => {
                return Err(PipelineError::TransientService(format!(
                    "inference failed after {} attempts: {}",
                    attempt, e
                )));
            }
            Err(e) => return Err(e),
        }
    }
}

/// Build the deterministic analysis prompt for a validated slide sequence
pub fn build_prompt(slides: &[Slide], processing_date: &str) -> String {
    let deck_text = slides
        .iter()
        .map(|slide| {
            format!(
                "Slide {}:\nText: {}\nNotes: {}\n---",
                slide.index,
                if slide.text.is_empty() {
                    "No text"
                } else {
                    slide.text.as_str()
                },
                slide.notes.as_deref().unwrap_or("No notes"),
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        r#"You are an expert venture capital analyst evaluating a startup pitch deck.
The pitch deck will be evaluated against the following nine categories with fixed weights and precise criteria:

1. Problem Statement (Weight: 10%)
   - Criteria: Clarity of problem, evidence of customer pain (e.g., stats, quotes), scope of impact.
   - Scoring: 0 (no problem stated) to 10 (well-defined with data validation).

2. Solution/Product (Weight: 15%)
   - Criteria: Feasibility, innovation, alignment with problem, clarity of explanation.
   - Scoring: 0 (no solution) to 10 (unique, practical, well-articulated).

3. Market Opportunity (Weight: 20%)
   - Criteria: TAM/SAM/SOM defined, realism of estimates, evidence of demand (e.g., trends, surveys).
   - Scoring: 0 (no market data) to 10 (specific, credible, data-backed).

4. Business Model (Weight: 15%)
   - Criteria: Revenue streams, scalability, customer acquisition plan, pricing clarity.
   - Scoring: 0 (no model) to 10 (detailed, sustainable, logical).

5. Competitive Landscape (Weight: 10%)
   - Criteria: Identification of competitors, strength of UVP, defensibility of position.
   - Scoring: 0 (no mention) to 10 (detailed analysis with strong differentiation).

6. Team (Weight: 15%)
   - Criteria: Relevant experience, completeness of roles, evidence of execution ability.
   - Scoring: 0 (no team info) to 10 (experienced, balanced, proven track record).

7. Traction/Milestones (Weight: 10%)
   - Criteria: Metrics (e.g., revenue, users), achieved milestones, alignment with funding ask.
   - Scoring: 0 (no traction) to 10 (quantifiable, impressive progress).

8. Financial Projections (Weight: 10%)
   - Criteria: 3-5 year forecasts, transparency of assumptions, realism of growth rates.
   - Scoring: 0 (no financials) to 10 (detailed, reasonable, supported).

9. Clarity and Presentation (Weight: 5%)
   - Criteria: Logical flow, visual design, grammar, conciseness (max 20 slides).
   - Scoring: 0 (incoherent, sloppy) to 10 (polished, professional, concise).

For each category, provide:
1. 'score' (integer 0-10, 0=missing, 10=excellent).
2. 'qualitative_feedback' (string 50-150 words summarizing category strengths/weaknesses based only on text).

Additionally, provide:
* 'overall_strengths': Bullet list (3-5 points) of significant positive findings.
* 'overall_weaknesses': Bullet list (3-5 points) of significant risks/gaps.
* 'recommendation': ONE of: "Strong Buy", "Hold", or "Pass".
* 'confidence_score': Integer (0-100) AI certainty based only on text completeness/coherence.
* 'recommendations': 100-200 words of actionable advice for due diligence or further investigation.
* 'processing_date': "{processing_date}"

Return the entire analysis strictly as a single JSON object with these EXACT category names as keys (do not modify or add suffixes like "Text only"):
"Problem Statement", "Solution/Product", "Market Opportunity", "Business Model", "Competitive Landscape", "Team", "Traction/Milestones", "Financial Projections", "Clarity and Presentation".

Pitch Deck Text:
```
{deck_text}
```
"#,
        processing_date = processing_date,
        deck_text = deck_text,
    )
}

/// Two-pass canonicalization over the parsed response.
///
/// Pass 1 rebuilds numeric-string keys (`"0"`, `"1"`, ...) that carry an
/// embedded `category` field under the embedded name. Pass 2 renames known
/// alias keys to their canonical form, never overwriting a canonical key
/// that is already present.
pub fn canonicalize(value: Value) -> Result<Map<String, Value>, PipelineError> {
    let map = match value {
        Value::Object(map) => map,
        other => {
            return Err(PipelineError::PermanentParse(format!(
                "expected a JSON object, got {}",
                type_name(&other)
            )))
        }
    };

    // Pass 1: numeric-key remap
    let mut remapped = Map::new();
    for (key, entry) in map {
        if key.chars().all(|c| c.is_ascii_digit()) && !key.is_empty() {
            if let Some(category) = entry.get("category").and_then(Value::as_str) {
                debug!(index = %key, category, "Remapping numeric-indexed category");
                remapped.insert(category.to_string(), entry);
                continue;
            }
        }
        remapped.insert(key, entry);
    }

    // Pass 2: alias normalization
    for (alias, canonical) in CATEGORY_ALIASES {
        if remapped.contains_key(alias) && !remapped.contains_key(canonical) {
            debug!(alias, canonical, "Normalizing category alias");
            if let Some(entry) = remapped.remove(alias) {
                remapped.insert(canonical.to_string(), entry);
            }
        } else {
            remapped.remove(alias);
        }
    }

    Ok(remapped)
}

/// Completeness check: every canonical category with a numeric score, every
/// required top-level field. Enumerates all gaps in one error.
pub fn validate(map: &Map<String, Value>) -> Result<(), PipelineError> {
    let missing_categories: Vec<String> = CATEGORY_WEIGHTS
        .iter()
        .filter(|(name, _)| category_score(map, name).is_none())
        .map(|(name, _)| (*name).to_string())
        .collect();

    let missing_fields: Vec<String> = REQUIRED_FIELDS
        .iter()
        .filter(|field| !map.contains_key(**field))
        .map(|field| (*field).to_string())
        .collect();

    if missing_categories.is_empty() && missing_fields.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::AnalysisValidation {
            missing_categories,
            missing_fields,
        })
    }
}

/// Deterministic weighted score over the canonical map.
///
/// A structurally absent category contributes zero to the sum while its
/// weight still accrues to the denominator; under the completeness rule
/// above that branch is unreachable, but the computation is the contract.
pub fn compute_overall_score(map: &Map<String, Value>) -> u8 {
    let mut weighted_sum = 0.0_f64;
    let mut weight_used = 0.0_f64;

    for (name, weight) in CATEGORY_WEIGHTS {
        match category_score(map, name) {
            Some(score) => {
                let clamped = score.clamp(0.0, 10.0);
                weighted_sum += clamped * weight;
                weight_used += weight;
            }
            None => {
                warn!(category = name, "Category score missing, counting as 0");
                weight_used += weight;
            }
        }
    }

    if weight_used == 0.0 {
        return 0;
    }

    let overall = ((weighted_sum / weight_used) * 10.0).round();
    overall.clamp(0.0, 100.0) as u8
}

/// Convert the validated canonical map into the typed evaluation document
pub fn into_evaluation(map: Map<String, Value>) -> Result<Evaluation, PipelineError> {
    let mut categories = std::collections::BTreeMap::new();

    for (name, _) in CATEGORY_WEIGHTS {
        let entry = map
            .get(name)
            .ok_or_else(|| PipelineError::PermanentParse(format!("category '{}' vanished", name)))?;

        let score = entry
            .get("score")
            .and_then(Value::as_f64)
            .ok_or_else(|| {
                PipelineError::PermanentParse(format!("category '{}' has no numeric score", name))
            })?
            .clamp(0.0, 10.0) as u8;

        let feedback = entry
            .get("qualitative_feedback")
            .or_else(|| entry.get("feedback"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        categories.insert(name.to_string(), CategoryEvaluation { score, feedback });
    }

    let recommendation_raw = map
        .get("recommendation")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let recommendation = Recommendation::parse(recommendation_raw).ok_or_else(|| {
        PipelineError::PermanentParse(format!(
            "unrecognized recommendation '{}'",
            recommendation_raw
        ))
    })?;

    let confidence_score = map
        .get("confidence_score")
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
        .clamp(0.0, 100.0) as u8;

    let recommendations = map
        .get("recommendations")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(Evaluation {
        categories,
        overall_strengths: string_list(map.get("overall_strengths")),
        overall_weaknesses: string_list(map.get("overall_weaknesses")),
        recommendation,
        confidence_score,
        recommendations,
        processing_date: map
            .get("processing_date")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn category_score(map: &Map<String, Value>, name: &str) -> Option<f64> {
    map.get(name)?.get("score")?.as_f64()
}

/// Accept a list of strings, a single string, or nothing
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
