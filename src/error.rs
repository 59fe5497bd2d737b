//! Error taxonomy for the evaluation pipeline.
//!
//! The variants split along the retry boundary: `TransientService` is the
//! only class the inference stage retries; everything else surfaces
//! immediately. `Persistence` at best-effort update points (email status)
//! is logged and swallowed by the caller rather than escalated.

use thiserror::Error;

/// Errors raised by pipeline stages and their collaborators
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// Bad input shape: wrong file type, slide count out of range
    #[error("validation failed: {0}")]
    Validation(String),

    /// Storage or inference unreachable / returned a server error
    #[error("service unavailable: {0}")]
    TransientService(String),

    /// Inference response was not parseable as structured data
    #[error("unparseable inference response: {0}")]
    PermanentParse(String),

    /// Parsed inference response is missing required categories or fields
    #[error(
        "analysis response incomplete: missing categories [{}], missing fields [{}]",
        .missing_categories.join(", "),
        .missing_fields.join(", ")
    )]
    AnalysisValidation {
        missing_categories: Vec<String>,
        missing_fields: Vec<String>,
    },

    /// Job record store write failure
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// Referenced record or artifact is absent
    #[error("not found: {0}")]
    NotFound(String),
}

impl PipelineError {
    /// Whether the inference retry loop may try again after this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientService(_))
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => Self::NotFound("job record".to_string()),
            other => Self::Persistence(other.to_string()),
        }
    }
}
