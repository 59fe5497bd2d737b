//! deckard - staged AI evaluation pipeline for startup pitch decks
//!
//! An uploaded deck is driven through a fixed, linear stage order: store the
//! deck, extract slide text, obtain an AI evaluation, normalize and score it,
//! render a report, store the report, then notify the owner. Each transition
//! is persisted before the stage's work begins, so polling clients always
//! see the stage currently being attempted.
//!
//! # Architecture
//!
//! - `domain`: Job records, the stage vocabulary, decks, evaluations
//! - `core`: Job store, retry policy, response normalizer/scorer, orchestrator
//! - `adapters`: Narrow interfaces to storage, extraction, inference,
//!   rendering, and notification, with production implementations
//! - `cli`: Command-line interface and composition root
//!
//! # Usage
//!
//! ```bash
//! # Analyze a deck
//! deckard analyze pitch.pptx --email founder@example.com
//!
//! # Poll job status
//! deckard status <job-id>
//!
//! # Fetch the finished report
//! deckard report <job-id>
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;

// Re-export main types at crate root for convenience
pub use crate::core::{JobStore, Orchestrator, ReportDownload, RetryPolicy, ScoredEvaluation};
pub use crate::domain::{Evaluation, JobRecord, Recommendation, RunOutcome, Slide, Stage};
pub use crate::error::PipelineError;
