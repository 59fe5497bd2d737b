//! Subprocess adapter for the text-extraction engine.
//!
//! The extractor is an opaque external tool: it receives the stored deck's
//! key as its single argument and prints a JSON document on stdout, either
//! `{"data": [...slides...]}` or `{"error": "..."}`. Extraction internals
//! (parsers, OCR) live entirely on the other side of this contract.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::domain::deck::Slide;
use crate::error::PipelineError;

use super::DeckExtractor;

/// Deck extractor invoking an external binary
pub struct SubprocessExtractor {
    /// Path to the extractor binary (default: "deck-extract")
    binary_path: String,

    /// How long one extraction may run
    timeout: Duration,
}

impl Default for SubprocessExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl SubprocessExtractor {
    pub fn new() -> Self {
        Self {
            binary_path: "deck-extract".to_string(),
            timeout: Duration::from_secs(300),
        }
    }

    pub fn with_binary_path(binary_path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary_path: binary_path.into(),
            timeout,
        }
    }
}

/// Wire shape of the extractor's stdout document
#[derive(Debug, Deserialize)]
struct ExtractorOutput {
    #[serde(default)]
    data: Option<Vec<RawSlide>>,
    #[serde(default)]
    error: Option<String>,
}

/// One slide as the extractor reports it
#[derive(Debug, Deserialize)]
struct RawSlide {
    slide: usize,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

#[async_trait]
impl DeckExtractor for SubprocessExtractor {
    async fn extract(&self, source_key: &str) -> Result<Vec<Slide>, PipelineError> {
        debug!(binary = %self.binary_path, source_key, "Spawning extraction process");

        let child = Command::new(&self.binary_path)
            .arg(source_key)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                PipelineError::TransientService(format!(
                    "failed to spawn extractor '{}': {}",
                    self.binary_path, e
                ))
            })?;

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                PipelineError::TransientService(format!(
                    "extraction of '{}' timed out after {:?}",
                    source_key, self.timeout
                ))
            })?
            .map_err(|e| {
                PipelineError::TransientService(format!("failed to wait for extractor: {}", e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // The extractor reports structured errors on stderr when it can
            if let Ok(parsed) = serde_json::from_str::<ExtractorOutput>(stderr.trim()) {
                if let Some(error) = parsed.error {
                    return Err(PipelineError::TransientService(format!(
                        "extraction failed: {}",
                        error
                    )));
                }
            }
            return Err(PipelineError::TransientService(format!(
                "extractor exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed: ExtractorOutput = serde_json::from_str(stdout.trim()).map_err(|e| {
            PipelineError::TransientService(format!("unparseable extractor output: {}", e))
        })?;

        if let Some(error) = parsed.error {
            return Err(PipelineError::TransientService(format!(
                "extraction failed: {}",
                error
            )));
        }

        let slides = parsed
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|raw| Slide {
                index: raw.slide,
                text: raw.text.unwrap_or_default(),
                notes: raw.notes,
            })
            .collect();

        Ok(slides)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_slide_parsing() {
        let json = r#"{"data": [
            {"slide": 1, "text": "Problem", "notes": "speaker notes"},
            {"slide": 2, "text": null, "notes": null}
        ]}"#;

        let parsed: ExtractorOutput = serde_json::from_str(json).unwrap();
        let slides = parsed.data.unwrap();

        assert_eq!(slides.len(), 2);
        assert_eq!(slides[0].slide, 1);
        assert_eq!(slides[0].text.as_deref(), Some("Problem"));
        assert!(slides[1].text.is_none());
    }

    #[test]
    fn test_error_document_parsing() {
        let json = r#"{"error": "Tesseract not properly configured"}"#;
        let parsed: ExtractorOutput = serde_json::from_str(json).unwrap();

        assert!(parsed.data.is_none());
        assert_eq!(
            parsed.error.as_deref(),
            Some("Tesseract not properly configured")
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_transient() {
        let extractor = SubprocessExtractor::with_binary_path(
            "/nonexistent/deck-extract",
            Duration::from_secs(1),
        );

        let err = extractor.extract("decks/k").await.unwrap_err();
        assert!(matches!(err, PipelineError::TransientService(_)));
    }
}
