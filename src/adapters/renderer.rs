//! Report renderer adapter.
//!
//! Typesetting is delegated to an external renderer binary: it receives the
//! evaluation record as JSON on stdin and writes the finished PDF bytes to
//! stdout. The artifact file name is derived here, from the original deck
//! name and the processing date.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::domain::evaluation::Evaluation;
use crate::error::PipelineError;

use super::{RenderedReport, ReportRenderer};

/// Longest startup name carried into the artifact file name
const MAX_NAME_LEN: usize = 50;

/// Report renderer invoking an external binary
pub struct SubprocessRenderer {
    /// Path to the renderer binary (default: "deck-report")
    binary_path: String,

    /// How long one render may run
    timeout: Duration,
}

impl Default for SubprocessRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl SubprocessRenderer {
    pub fn new() -> Self {
        Self {
            binary_path: "deck-report".to_string(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_binary_path(binary_path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary_path: binary_path.into(),
            timeout,
        }
    }
}

/// Derive the report artifact name from the uploaded deck's name.
///
/// The stem is sanitized and length-clamped; an overlong or empty stem falls
/// back to a generic name so the key stays well-formed.
pub fn report_filename(original_name: &str, date: NaiveDate) -> String {
    let stem = std::path::Path::new(original_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");

    let sanitized: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let name = if sanitized.is_empty() || sanitized.len() > MAX_NAME_LEN {
        "StartupAnalysis".to_string()
    } else {
        sanitized
    };

    format!("Investment_Thesis_{}_{}.pdf", name, date.format("%d%m%Y"))
}

#[async_trait]
impl ReportRenderer for SubprocessRenderer {
    async fn render(
        &self,
        evaluation: &Evaluation,
        overall_score: u8,
        original_name: &str,
    ) -> Result<RenderedReport, PipelineError> {
        let filename = report_filename(original_name, Utc::now().date_naive());

        let payload = serde_json::to_vec(&json!({
            "evaluation": evaluation,
            "overall_score": overall_score,
            "original_name": original_name,
        }))
        .map_err(|e| PipelineError::TransientService(format!("render payload failed: {}", e)))?;

        debug!(binary = %self.binary_path, %filename, "Spawning report renderer");

        let mut child = Command::new(&self.binary_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                PipelineError::TransientService(format!(
                    "failed to spawn renderer '{}': {}",
                    self.binary_path, e
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload).await.map_err(|e| {
                PipelineError::TransientService(format!("failed to write to renderer: {}", e))
            })?;
            // Drop stdin to signal EOF
        }

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                PipelineError::TransientService(format!(
                    "render timed out after {:?}",
                    self.timeout
                ))
            })?
            .map_err(|e| {
                PipelineError::TransientService(format!("failed to wait for renderer: {}", e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::TransientService(format!(
                "renderer exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        if output.stdout.is_empty() {
            return Err(PipelineError::TransientService(
                "renderer produced no output".to_string(),
            ));
        }

        Ok(RenderedReport {
            bytes: output.stdout,
            filename,
        })
    }
}
