//! Adapter interfaces for external collaborators.
//!
//! Each external dependency of the pipeline sits behind a narrow capability
//! trait so the orchestrator and normalizer can be tested against fakes:
//! object storage (put/exists), text extraction, AI inference, report
//! rendering, and notification.

pub mod extractor;
pub mod inference;
pub mod notifier;
pub mod renderer;
pub mod storage;

use std::path::Path;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::deck::Slide;
use crate::domain::evaluation::Evaluation;
use crate::error::PipelineError;

// Re-export the production adapters
pub use extractor::SubprocessExtractor;
pub use inference::GeminiClient;
pub use notifier::MailgunNotifier;
pub use renderer::SubprocessRenderer;
pub use storage::HttpObjectStore;

/// Durable byte storage for decks and rendered reports
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store a local file under the given key
    async fn put(
        &self,
        local_path: &Path,
        key: &str,
        content_type: &str,
    ) -> Result<(), PipelineError>;

    /// Check whether an object exists under the key
    async fn exists(&self, key: &str) -> Result<bool, PipelineError>;
}

/// Text extraction from a stored deck: returns the ordered slide sequence
#[async_trait]
pub trait DeckExtractor: Send + Sync {
    async fn extract(&self, source_key: &str) -> Result<Vec<Slide>, PipelineError>;
}

/// The AI inference service: one prompt in, one raw response out
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, PipelineError>;
}

/// A rendered report artifact
#[derive(Debug, Clone)]
pub struct RenderedReport {
    pub bytes: Vec<u8>,

    /// Suggested artifact file name, derived from the original deck name
    pub filename: String,
}

/// Opaque report renderer: evaluation record in, byte stream out
#[async_trait]
pub trait ReportRenderer: Send + Sync {
    async fn render(
        &self,
        evaluation: &Evaluation,
        overall_score: u8,
        original_name: &str,
    ) -> Result<RenderedReport, PipelineError>;
}

/// Outbound completion notification
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_completion(
        &self,
        recipient: &str,
        job_id: Uuid,
        report_key: &str,
    ) -> Result<(), PipelineError>;
}
