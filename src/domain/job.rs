//! Job records and the pipeline stage vocabulary.
//!
//! A job tracks one uploaded deck through the fixed stage order. The stage
//! doubles as the externally reported status, so the serialized names are
//! part of the wire contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::evaluation::{Evaluation, Recommendation};

/// One step of the fixed pipeline order, also the reported job status.
///
/// Transitions only move forward along the order, or sideways into `Failed`
/// from any non-terminal stage. `FileUnavailable` is a post-hoc correction
/// applied when a completed job's report is discovered missing from storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Pending,
    UploadingDeck,
    ExtractingText,
    AnalyzingAi,
    SavingAnalysis,
    GeneratingPdf,
    UploadingPdf,
    Completed,
    Failed,
    FileUnavailable,
}

impl Stage {
    /// Exact status string reported to pollers and stored in the record
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::UploadingDeck => "UPLOADING_DECK",
            Self::ExtractingText => "EXTRACTING_TEXT",
            Self::AnalyzingAi => "ANALYZING_AI",
            Self::SavingAnalysis => "SAVING_ANALYSIS",
            Self::GeneratingPdf => "GENERATING_PDF",
            Self::UploadingPdf => "UPLOADING_PDF",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::FileUnavailable => "FILE_UNAVAILABLE",
        }
    }

    /// Parse a stored status string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "UPLOADING_DECK" => Some(Self::UploadingDeck),
            "EXTRACTING_TEXT" => Some(Self::ExtractingText),
            "ANALYZING_AI" => Some(Self::AnalyzingAi),
            "SAVING_ANALYSIS" => Some(Self::SavingAnalysis),
            "GENERATING_PDF" => Some(Self::GeneratingPdf),
            "UPLOADING_PDF" => Some(Self::UploadingPdf),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            "FILE_UNAVAILABLE" => Some(Self::FileUnavailable),
            _ => None,
        }
    }

    /// Position in the fixed pipeline order; `None` for the sideways states
    pub fn ordinal(&self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::UploadingDeck => Some(1),
            Self::ExtractingText => Some(2),
            Self::AnalyzingAi => Some(3),
            Self::SavingAnalysis => Some(4),
            Self::GeneratingPdf => Some(5),
            Self::UploadingPdf => Some(6),
            Self::Completed => Some(7),
            Self::Failed | Self::FileUnavailable => None,
        }
    }

    /// Terminal states admit no further status transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::FileUnavailable)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the post-completion notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmailStatus {
    Sent,
    Failed,
}

impl EmailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SENT" => Some(Self::Sent),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// The durable record tracking one upload's progress and result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique identifier, assigned at creation
    pub id: Uuid,

    /// Requesting principal; ownership never changes
    pub owner: String,

    /// Object-storage key of the uploaded deck
    pub source_key: String,

    /// File name as uploaded by the owner
    pub original_name: String,

    /// Current pipeline stage, persisted before the stage's work begins
    pub status: Stage,

    /// Failure detail (failing stage + message) when status is FAILED
    pub status_detail: Option<String>,

    /// Normalized evaluation document; set exactly once
    pub evaluation: Option<Evaluation>,

    /// Weighted 0-100 aggregate, always recomputed from `evaluation`
    pub overall_score: Option<u8>,

    pub recommendation: Option<Recommendation>,

    pub confidence_score: Option<u8>,

    /// Object-storage key of the rendered report
    pub report_key: Option<String>,

    pub email_status: Option<EmailStatus>,

    pub email_failure_reason: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Terminal result of one pipeline run, returned to the original caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { report_key: String },
    Failed { stage: Stage, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_strings_round_trip() {
        let stages = [
            Stage::Pending,
            Stage::UploadingDeck,
            Stage::ExtractingText,
            Stage::AnalyzingAi,
            Stage::SavingAnalysis,
            Stage::GeneratingPdf,
            Stage::UploadingPdf,
            Stage::Completed,
            Stage::Failed,
            Stage::FileUnavailable,
        ];

        for stage in stages {
            assert_eq!(Stage::parse(stage.as_str()), Some(stage));
        }
        assert_eq!(Stage::parse("EXPLODING"), None);
    }

    #[test]
    fn test_stage_serde_matches_wire_strings() {
        let json = serde_json::to_string(&Stage::AnalyzingAi).unwrap();
        assert_eq!(json, "\"ANALYZING_AI\"");

        let parsed: Stage = serde_json::from_str("\"UPLOADING_PDF\"").unwrap();
        assert_eq!(parsed, Stage::UploadingPdf);
    }

    #[test]
    fn test_pipeline_order_is_total() {
        let order = [
            Stage::Pending,
            Stage::UploadingDeck,
            Stage::ExtractingText,
            Stage::AnalyzingAi,
            Stage::SavingAnalysis,
            Stage::GeneratingPdf,
            Stage::UploadingPdf,
            Stage::Completed,
        ];

        for pair in order.windows(2) {
            assert!(pair[0].ordinal().unwrap() < pair[1].ordinal().unwrap());
        }
    }

    #[test]
    fn test_terminal_stages() {
        assert!(Stage::Completed.is_terminal());
        assert!(Stage::Failed.is_terminal());
        assert!(Stage::FileUnavailable.is_terminal());
        assert!(!Stage::UploadingPdf.is_terminal());
        assert!(!Stage::Pending.is_terminal());
    }
}
