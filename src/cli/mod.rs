//! Command-line interface for deckard.
//!
//! Provides commands for submitting a deck for analysis, polling job status,
//! listing job history, fetching reports, and cleaning up records. This is
//! also the composition root: adapters are constructed here from the
//! resolved configuration and injected into the orchestrator.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::adapters::{
    GeminiClient, HttpObjectStore, MailgunNotifier, SubprocessExtractor, SubprocessRenderer,
};
use crate::config;
use crate::core::{JobStore, Orchestrator};
use crate::domain::deck::{derive_source_key, sanitize_file_name, validate_upload};
use crate::domain::job::{RunOutcome, Stage};
use crate::error::PipelineError;

/// deckard - staged AI evaluation pipeline for pitch decks
#[derive(Parser, Debug)]
#[command(name = "deckard")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit a deck file and run the full analysis pipeline
    Analyze {
        /// Path to the .ppt/.pptx file
        file: PathBuf,

        /// Owner the job is recorded under
        #[arg(short, long, default_value = "local")]
        owner: String,

        /// Email address for the completion notification
        #[arg(short, long)]
        email: Option<String>,
    },

    /// Check the status of a job
    Status {
        /// Job ID (UUID)
        job_id: String,
    },

    /// List jobs for an owner, newest first
    Jobs {
        #[arg(short, long, default_value = "local")]
        owner: String,
    },

    /// Resolve the report download for a completed job
    Report {
        /// Job ID (UUID)
        job_id: String,

        #[arg(short, long, default_value = "local")]
        owner: String,
    },

    /// Delete a job record
    Delete {
        /// Job ID (UUID)
        job_id: String,

        #[arg(short, long, default_value = "local")]
        owner: String,
    },

    /// Remove all records whose report has gone missing from storage
    PruneUnavailable {
        #[arg(short, long, default_value = "local")]
        owner: String,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Analyze { file, owner, email } => {
                analyze(&file, &owner, email.as_deref().unwrap_or("")).await
            }
            Commands::Status { job_id } => show_status(&job_id),
            Commands::Jobs { owner } => list_jobs(&owner),
            Commands::Report { job_id, owner } => fetch_report(&job_id, &owner).await,
            Commands::Delete { job_id, owner } => delete_job(&job_id, &owner),
            Commands::PruneUnavailable { owner } => prune_unavailable(&owner),
            Commands::Config => show_config(),
        }
    }
}

/// Build the orchestrator from the resolved configuration
fn build_orchestrator() -> Result<Orchestrator> {
    let cfg = config::config()?;
    let store = JobStore::open(&cfg.db_path())
        .map_err(|e| anyhow::anyhow!("failed to open job store: {}", e))?;

    let tool_timeout = Duration::from_secs(cfg.tool_timeout_seconds);

    Ok(Orchestrator::new(
        store,
        Arc::new(HttpObjectStore::new(
            cfg.storage_endpoint.clone(),
            cfg.storage_bucket.clone(),
            cfg.storage_token.clone(),
        )),
        Arc::new(SubprocessExtractor::with_binary_path(
            cfg.extractor_binary.clone(),
            tool_timeout,
        )),
        Arc::new(GeminiClient::new(
            cfg.inference_endpoint.clone(),
            cfg.inference_model.clone(),
            cfg.inference_api_key.clone(),
        )),
        Arc::new(SubprocessRenderer::with_binary_path(
            cfg.renderer_binary.clone(),
            tool_timeout,
        )),
        Arc::new(MailgunNotifier::new(
            cfg.email_api_base.clone(),
            cfg.email_domain.clone(),
            cfg.email_api_key.clone(),
            cfg.email_from.clone(),
        )),
        cfg.retry.clone(),
        cfg.scratch_dir(),
    ))
}

fn parse_job_id(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).with_context(|| format!("Invalid job ID: {}", s))
}

/// Submit a deck: validate, stage a transient copy, create the record, run
async fn analyze(file: &PathBuf, owner: &str, email: &str) -> Result<()> {
    let original_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .context("File has no usable name")?
        .to_string();

    let metadata = std::fs::metadata(file)
        .with_context(|| format!("Cannot read file: {}", file.display()))?;
    validate_upload(&original_name, metadata.len())
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let bytes = std::fs::read(file)
        .with_context(|| format!("Failed to read file: {}", file.display()))?;
    let source_key = derive_source_key(&original_name, &bytes);

    let orchestrator = build_orchestrator()?;
    let cfg = config::config()?;

    // Stage a transient copy; the pipeline owns and deletes it.
    let scratch_dir = cfg.scratch_dir();
    std::fs::create_dir_all(&scratch_dir).context("Failed to create scratch directory")?;
    let staged = scratch_dir.join(format!(
        "upload-{}-{}",
        Uuid::new_v4(),
        sanitize_file_name(&original_name)
    ));
    std::fs::write(&staged, &bytes).context("Failed to stage upload")?;

    let job_id = match orchestrator.create_job(owner, &source_key, &original_name) {
        Ok(id) => id,
        Err(e) => {
            // No job record exists; discard the staged upload ourselves.
            let _ = std::fs::remove_file(&staged);
            anyhow::bail!("Failed to create job record: {}", e);
        }
    };

    eprintln!("Job {} created, running pipeline...", job_id);

    match orchestrator.run(job_id, staged, email).await? {
        RunOutcome::Completed { report_key } => {
            let record = orchestrator.store().get(job_id)?;
            println!("Job:            {}", job_id);
            println!("Status:         {}", record.status);
            println!("Report:         {}", report_key);
            if let Some(score) = record.overall_score {
                println!("Overall score:  {} / 100", score);
            }
            if let Some(recommendation) = record.recommendation {
                println!("Recommendation: {}", recommendation);
            }
            Ok(())
        }
        RunOutcome::Failed { stage, message } => {
            eprintln!("Processing failed during {}: {}", stage, message);
            eprintln!("Job: {}", job_id);
            std::process::exit(1);
        }
    }
}

/// Show the status of a job (the polling surface)
fn show_status(job_id_str: &str) -> Result<()> {
    let job_id = parse_job_id(job_id_str)?;
    let orchestrator = build_orchestrator()?;

    let status = orchestrator.get_status(job_id)?;
    println!("{}", status);
    Ok(())
}

/// List an owner's job history
fn list_jobs(owner: &str) -> Result<()> {
    let orchestrator = build_orchestrator()?;
    let records = orchestrator.store().list_for_owner(owner)?;

    if records.is_empty() {
        println!("No jobs found for owner '{}'", owner);
        return Ok(());
    }

    println!(
        "{:<38} {:<17} {:>5}  {:<30}",
        "JOB ID", "STATUS", "SCORE", "FILE"
    );
    println!("{}", "-".repeat(95));

    for record in records {
        let score = record
            .overall_score
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<38} {:<17} {:>5}  {:<30}",
            record.id,
            record.status.as_str(),
            score,
            record.original_name
        );
    }

    Ok(())
}

/// Resolve the report download, applying the FILE_UNAVAILABLE correction
async fn fetch_report(job_id_str: &str, owner: &str) -> Result<()> {
    let job_id = parse_job_id(job_id_str)?;
    let orchestrator = build_orchestrator()?;

    match orchestrator.fetch_report(job_id, owner).await {
        Ok(download) => {
            println!("Report key: {}", download.report_key);
            println!("Save as:    {}", download.download_name);
            Ok(())
        }
        Err(PipelineError::NotFound(msg)) => {
            eprintln!("{}", msg);
            std::process::exit(1);
        }
        Err(e) => Err(anyhow::anyhow!(e.to_string())),
    }
}

fn delete_job(job_id_str: &str, owner: &str) -> Result<()> {
    let job_id = parse_job_id(job_id_str)?;
    let orchestrator = build_orchestrator()?;

    orchestrator
        .store()
        .delete(job_id, owner)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    println!("Deleted job {}", job_id);
    Ok(())
}

fn prune_unavailable(owner: &str) -> Result<()> {
    let orchestrator = build_orchestrator()?;
    let removed = orchestrator
        .store()
        .delete_where_status(owner, Stage::FileUnavailable)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    println!("Removed {} unavailable record(s)", removed);
    Ok(())
}

/// Show the resolved configuration (for debugging)
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("Deckard configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:     {}", cfg.home.display());
    println!("  Job DB:   {}", cfg.db_path().display());
    println!("  Scratch:  {}", cfg.scratch_dir().display());
    println!();
    println!("Storage:");
    println!("  Endpoint: {}", cfg.storage_endpoint);
    println!("  Bucket:   {}", cfg.storage_bucket);
    println!();
    println!("Inference:");
    println!("  Endpoint: {}", cfg.inference_endpoint);
    println!("  Model:    {}", cfg.inference_model);
    println!(
        "  API key:  {}",
        if cfg.inference_api_key.is_empty() {
            "(unset)"
        } else {
            "(set)"
        }
    );
    println!();
    println!("Email:");
    println!("  API base: {}", cfg.email_api_base);
    println!("  Domain:   {}", cfg.email_domain);
    println!("  From:     {}", cfg.email_from);
    println!();
    println!("Tools:");
    println!("  Extractor: {}", cfg.extractor_binary);
    println!("  Renderer:  {}", cfg.renderer_binary);
    println!("  Timeout:   {}s", cfg.tool_timeout_seconds);
    println!();
    println!("Retry:");
    println!("  Max attempts: {}", cfg.retry.max_attempts);
    println!("  Initial delay: {}ms", cfg.retry.initial_delay_ms);

    Ok(())
}
