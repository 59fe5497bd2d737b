//! The normalized evaluation document and its fixed category vocabulary.
//!
//! The nine categories and their weights are the scoring contract; the
//! weights sum to 1.0. Alias spellings of the ninth category are remapped to
//! the canonical name before validation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The nine canonical categories with their fixed weights, in weight order
pub const CATEGORY_WEIGHTS: [(&str, f64); 9] = [
    ("Problem Statement", 0.10),
    ("Solution/Product", 0.15),
    ("Market Opportunity", 0.20),
    ("Business Model", 0.15),
    ("Competitive Landscape", 0.10),
    ("Team", 0.15),
    ("Traction/Milestones", 0.10),
    ("Financial Projections", 0.10),
    ("Clarity and Presentation", 0.05),
];

/// Known alternate spellings mapped to their canonical category name
pub const CATEGORY_ALIASES: [(&str, &str); 2] = [
    ("Clarity and Presentation (Text only)", "Clarity and Presentation"),
    ("Clarity and Presentation (Text Only)", "Clarity and Presentation"),
];

/// Top-level fields the inference response must carry besides the categories
pub const REQUIRED_FIELDS: [&str; 5] = [
    "recommendation",
    "overall_strengths",
    "overall_weaknesses",
    "confidence_score",
    "recommendations",
];

/// Investment recommendation vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    #[serde(rename = "Strong Buy")]
    StrongBuy,
    Hold,
    Pass,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StrongBuy => "Strong Buy",
            Self::Hold => "Hold",
            Self::Pass => "Pass",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Strong Buy" => Some(Self::StrongBuy),
            "Hold" => Some(Self::Hold),
            "Pass" => Some(Self::Pass),
            _ => None,
        }
    }
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score and feedback for one canonical category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryEvaluation {
    /// Integer score, clamped to [0, 10] at normalization time
    pub score: u8,

    /// Qualitative feedback for the category
    #[serde(default)]
    pub feedback: String,
}

/// The canonical evaluation attached to a job record.
///
/// Created once, atomically, during SAVING_ANALYSIS; immutable thereafter.
/// `categories` holds exactly the nine canonical names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub categories: BTreeMap<String, CategoryEvaluation>,

    pub overall_strengths: Vec<String>,

    pub overall_weaknesses: Vec<String>,

    pub recommendation: Recommendation,

    /// AI certainty, 0-100
    pub confidence_score: u8,

    /// Free-text due diligence advice
    pub recommendations: String,

    /// Timestamp the response was asked to echo back
    #[serde(default)]
    pub processing_date: Option<String>,
}
