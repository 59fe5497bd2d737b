//! Pipeline orchestrator: drives one job through the fixed stage order.
//!
//! Every stage persists its status transition before doing the stage's work,
//! so a poller (or a post-crash reader) always sees "was attempting X".
//! Failures are attributed to the failing stage, persisted as FAILED, and
//! returned to the caller; nothing past the inference retry loop retries.
//! Transient local files are held by RAII guards and removed on every exit
//! path.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{DeckExtractor, InferenceClient, Notifier, ObjectStore, ReportRenderer};
use crate::domain::deck::validate_slide_count;
use crate::domain::job::{EmailStatus, JobRecord, RunOutcome, Stage};
use crate::error::PipelineError;

use super::analysis;
use super::job_store::JobStore;
use super::retry::RetryPolicy;

/// MIME type uploaded decks are stored under
const DECK_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";

/// Resolved download handle for a stored report
#[derive(Debug, Clone)]
pub struct ReportDownload {
    pub report_key: String,

    /// File name to suggest to the downloading client
    pub download_name: String,
}

/// Deletes the wrapped file when dropped.
///
/// Wraps each transient local file (uploaded deck, staged report) so the
/// file is gone after every exit path of `run`, not just the happy one.
struct TransientFile {
    path: PathBuf,
}

impl TransientFile {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Drop for TransientFile {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %e, "Failed to remove transient file");
            }
        }
    }
}

/// Main pipeline orchestrator
pub struct Orchestrator {
    store: JobStore,
    objects: Arc<dyn ObjectStore>,
    extractor: Arc<dyn DeckExtractor>,
    inference: Arc<dyn InferenceClient>,
    renderer: Arc<dyn ReportRenderer>,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,

    /// Scratch directory for staged report bytes
    scratch_dir: PathBuf,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: JobStore,
        objects: Arc<dyn ObjectStore>,
        extractor: Arc<dyn DeckExtractor>,
        inference: Arc<dyn InferenceClient>,
        renderer: Arc<dyn ReportRenderer>,
        notifier: Arc<dyn Notifier>,
        retry: RetryPolicy,
        scratch_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            objects,
            extractor,
            inference,
            renderer,
            notifier,
            retry,
            scratch_dir,
        }
    }

    /// The underlying job record store (read paths, listing, deletion)
    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Persist a new PENDING job record.
    ///
    /// A persistence failure here is fatal to the request; the caller must
    /// discard the already-accepted upload.
    pub fn create_job(
        &self,
        owner: &str,
        source_key: &str,
        original_name: &str,
    ) -> Result<Uuid, PipelineError> {
        let job_id = self.store.create(owner, source_key, original_name)?;
        info!(%job_id, owner, source_key, "Created job record");
        Ok(job_id)
    }

    /// Current stage, straight from the record store; safe to call while
    /// `run` is executing the same job.
    pub fn get_status(&self, job_id: Uuid) -> Result<Stage, PipelineError> {
        self.store.get_status(job_id)
    }

    /// Execute the full stage sequence for one job.
    ///
    /// Owns `deck_path` for the duration of the call and guarantees its
    /// deletion on success, expected failure, and early return alike.
    #[instrument(skip(self, deck_path, owner_email), fields(job_id = %job_id))]
    pub async fn run(
        &self,
        job_id: Uuid,
        deck_path: PathBuf,
        owner_email: &str,
    ) -> Result<RunOutcome, PipelineError> {
        let _deck = TransientFile::new(deck_path.clone());

        let job = self.store.get(job_id)?;
        info!(original_name = %job.original_name, "Starting pipeline run");

        match self.execute(&job, &deck_path).await {
            Ok(report_key) => {
                info!(%report_key, "Pipeline completed");
                self.notify(job_id, owner_email, &report_key).await;
                Ok(RunOutcome::Completed { report_key })
            }
            Err((stage, cause)) => {
                error!(stage = %stage, error = %cause, "Pipeline failed");

                let detail = format!("{}: {}", stage.as_str(), cause);
                if let Err(persist_err) =
                    self.store.update_stage(job_id, Stage::Failed, Some(&detail))
                {
                    error!(error = %persist_err, "Failed to persist FAILED status");
                }

                Ok(RunOutcome::Failed {
                    stage,
                    message: cause.to_string(),
                })
            }
        }
    }

    /// The stage sequence proper. Errors carry the stage they occurred in.
    async fn execute(
        &self,
        job: &JobRecord,
        deck_path: &Path,
    ) -> Result<String, (Stage, PipelineError)> {
        self.transition(job.id, Stage::UploadingDeck)?;
        self.objects
            .put(deck_path, &job.source_key, DECK_CONTENT_TYPE)
            .await
            .map_err(|e| (Stage::UploadingDeck, e))?;

        self.transition(job.id, Stage::ExtractingText)?;
        let slides = self
            .extractor
            .extract(&job.source_key)
            .await
            .map_err(|e| (Stage::ExtractingText, e))?;
        validate_slide_count(&slides).map_err(|e| (Stage::ExtractingText, e))?;
        info!(slides = slides.len(), "Deck text extracted");

        self.transition(job.id, Stage::AnalyzingAi)?;
        let scored = analysis::analyze(self.inference.as_ref(), &self.retry, &slides)
            .await
            .map_err(|e| (Stage::AnalyzingAi, e))?;

        self.transition(job.id, Stage::SavingAnalysis)?;
        self.store
            .save_evaluation(
                job.id,
                &scored.evaluation,
                scored.overall_score,
                scored.evaluation.recommendation,
                scored.evaluation.confidence_score,
            )
            .map_err(|e| (Stage::SavingAnalysis, e))?;

        self.transition(job.id, Stage::GeneratingPdf)?;
        let report = self
            .renderer
            .render(&scored.evaluation, scored.overall_score, &job.original_name)
            .await
            .map_err(|e| (Stage::GeneratingPdf, e))?;

        let report_path = self.scratch_dir.join(&report.filename);
        let _report_file = TransientFile::new(report_path.clone());
        stage_report_bytes(&self.scratch_dir, &report_path, &report.bytes)
            .await
            .map_err(|e| (Stage::GeneratingPdf, e))?;

        self.transition(job.id, Stage::UploadingPdf)?;
        let report_key = format!("reports/{}", report.filename);
        self.objects
            .put(&report_path, &report_key, "application/pdf")
            .await
            .map_err(|e| (Stage::UploadingPdf, e))?;
        self.store
            .set_report_key(job.id, &report_key)
            .map_err(|e| (Stage::UploadingPdf, e))?;

        Ok(report_key)
    }

    fn transition(&self, job_id: Uuid, stage: Stage) -> Result<(), (Stage, PipelineError)> {
        debug!(stage = %stage, "Stage transition");
        self.store
            .update_stage(job_id, stage, None)
            .map_err(|e| (stage, e))
    }

    /// Post-completion notification: best-effort, outcome recorded on the
    /// job, never raised and never changes the terminal status.
    async fn notify(&self, job_id: Uuid, owner_email: &str, report_key: &str) {
        if owner_email.trim().is_empty() {
            warn!(%job_id, "No recipient email, skipping notification");
            self.record_email_status(job_id, EmailStatus::Failed, Some("recipient email missing"));
            return;
        }

        match self
            .notifier
            .send_completion(owner_email, job_id, report_key)
            .await
        {
            Ok(()) => {
                self.record_email_status(job_id, EmailStatus::Sent, None);
            }
            Err(e) => {
                warn!(%job_id, error = %e, "Completion email failed");
                self.record_email_status(job_id, EmailStatus::Failed, Some(&e.to_string()));
            }
        }
    }

    fn record_email_status(&self, job_id: Uuid, status: EmailStatus, reason: Option<&str>) {
        if let Err(e) = self.store.set_email_status(job_id, status, reason) {
            // Best-effort update point: log and swallow
            error!(%job_id, error = %e, "Failed to record email status");
        }
    }

    /// Resolve a report download, correcting the record if the artifact has
    /// drifted out of storage since completion.
    pub async fn fetch_report(
        &self,
        job_id: Uuid,
        owner: &str,
    ) -> Result<ReportDownload, PipelineError> {
        let job = self.store.get(job_id)?;
        if job.owner != owner {
            return Err(PipelineError::NotFound(format!(
                "job {} for owner {}",
                job_id, owner
            )));
        }

        let report_key = job
            .report_key
            .ok_or_else(|| PipelineError::NotFound("report not available yet".to_string()))?;

        if !self.objects.exists(&report_key).await? {
            warn!(%job_id, %report_key, "Report missing from storage, marking file unavailable");
            if let Err(e) = self.store.mark_file_unavailable(job_id) {
                error!(%job_id, error = %e, "Failed to mark file unavailable");
            }
            return Err(PipelineError::NotFound(
                "report file has been deleted from storage".to_string(),
            ));
        }

        Ok(ReportDownload {
            report_key,
            download_name: format!("Deckard_Thesis_Report_{}.pdf", job_id),
        })
    }
}

async fn stage_report_bytes(
    scratch_dir: &Path,
    report_path: &Path,
    bytes: &[u8],
) -> Result<(), PipelineError> {
    tokio::fs::create_dir_all(scratch_dir).await.map_err(|e| {
        PipelineError::TransientService(format!("failed to create scratch directory: {}", e))
    })?;

    tokio::fs::write(report_path, bytes).await.map_err(|e| {
        PipelineError::TransientService(format!("failed to stage report bytes: {}", e))
    })
}
