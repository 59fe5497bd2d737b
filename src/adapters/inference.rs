//! Gemini-style inference client.
//!
//! POSTs a `generateContent` request with a JSON response MIME type and
//! returns the first candidate's text verbatim. Parsing of that text is the
//! normalizer's job; this adapter only classifies transport-level failures.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::PipelineError;

use super::InferenceClient;

/// HTTP client for a generateContent-compatible inference endpoint
pub struct GeminiClient {
    endpoint: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

impl GeminiClient {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    fn request_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            self.model
        )
    }
}

#[async_trait]
impl InferenceClient for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, PipelineError> {
        let body = json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": {"responseMimeType": "application/json"},
        });

        debug!(model = %self.model, prompt_bytes = prompt.len(), "Sending inference request");

        let response = self
            .client
            .post(self.request_url())
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                PipelineError::TransientService(format!("inference request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::TransientService(format!(
                "inference service returned {}: {}",
                status,
                body.trim()
            )));
        }

        let parsed: GenerateResponse = response.json().await.map_err(|e| {
            PipelineError::TransientService(format!("malformed inference envelope: {}", e))
        })?;

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                PipelineError::TransientService("inference response had no candidates".to_string())
            })?;

        Ok(text)
    }
}
