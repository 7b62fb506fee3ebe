//! FAQ candidates under review

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::thread::Source;

/// Review queue a candidate is placed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Routing {
    AutoApprove,
    SpotCheck,
    FullReview,
    /// Only ever reported on a `ProcessingResult`; never stored
    Skipped,
}

impl Routing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Routing::AutoApprove => "AUTO_APPROVE",
            Routing::SpotCheck => "SPOT_CHECK",
            Routing::FullReview => "FULL_REVIEW",
            Routing::Skipped => "SKIPPED",
        }
    }

    /// The three queues a stored candidate can be in
    pub const QUEUES: [Routing; 3] = [Routing::AutoApprove, Routing::SpotCheck, Routing::FullReview];
}

impl fmt::Display for Routing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Routing {
    type Err = faq_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AUTO_APPROVE" => Ok(Routing::AutoApprove),
            "SPOT_CHECK" => Ok(Routing::SpotCheck),
            "FULL_REVIEW" => Ok(Routing::FullReview),
            "SKIPPED" => Ok(Routing::Skipped),
            other => Err(faq_common::Error::InvalidInput(format!("Unknown routing '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
    Skipped,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
            ReviewStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewStatus {
    type Err = faq_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReviewStatus::Pending),
            "approved" => Ok(ReviewStatus::Approved),
            "rejected" => Ok(ReviewStatus::Rejected),
            "skipped" => Ok(ReviewStatus::Skipped),
            other => Err(faq_common::Error::InvalidInput(format!("Unknown review status '{}'", other))),
        }
    }
}

/// Trading protocol a question is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// Bisq 2 reputation-based trading
    BisqEasy,
    /// Bisq 1 multisig escrow trading (DAO, BSQ, arbitration)
    MultisigV1,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::BisqEasy => "bisq_easy",
            Protocol::MultisigV1 => "multisig_v1",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = faq_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bisq_easy" => Ok(Protocol::BisqEasy),
            "multisig_v1" => Ok(Protocol::MultisigV1),
            other => Err(faq_common::Error::InvalidInput(format!("Unknown protocol '{}'", other))),
        }
    }
}

/// Document the generator cited
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AnswerSource {
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type", default)]
    pub source_type: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub relevance: Option<f64>,
}

/// Scores for a staff answer measured against the generated answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub embedding_similarity: f64,
    pub factual_alignment: f64,
    pub contradiction_score: f64,
    pub completeness: f64,
    pub hallucination_risk: f64,
    pub final_score: f64,
    pub llm_reasoning: String,
}

impl ComparisonResult {
    /// Result used when the generator produced nothing to compare against
    pub fn empty_generated_answer() -> Self {
        Self {
            embedding_similarity: 0.0,
            factual_alignment: 0.0,
            contradiction_score: 0.0,
            completeness: 0.0,
            hallucination_risk: 0.0,
            final_score: 0.0,
            llm_reasoning: "Unable to compare: the RAG system returned an empty response for this question."
                .to_string(),
        }
    }
}

/// One Q&A pair under (or past) human review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: i64,
    pub source: Source,
    pub source_event_id: String,
    pub source_timestamp: Option<DateTime<Utc>>,
    pub question_text: String,
    pub staff_answer: String,
    pub staff_sender: Option<String>,
    pub edited_question_text: Option<String>,
    pub edited_staff_answer: Option<String>,
    pub generated_answer: Option<String>,
    pub generated_answer_sources: Vec<AnswerSource>,
    pub generation_confidence: Option<f64>,
    pub embedding_similarity: Option<f64>,
    pub factual_alignment: Option<f64>,
    pub contradiction_score: Option<f64>,
    pub completeness: Option<f64>,
    pub hallucination_risk: Option<f64>,
    pub final_score: f64,
    pub llm_reasoning: Option<String>,
    pub routing: Routing,
    pub review_status: ReviewStatus,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub faq_id: Option<String>,
    pub is_calibration_sample: bool,
    pub protocol: Option<Protocol>,
    pub category: Option<String>,
    pub has_correction: bool,
    pub skip_order: i64,
    pub original_user_question: Option<String>,
    pub original_staff_answer: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Candidate {
    /// Reviewer-edited question if present, else the original
    pub fn effective_question(&self) -> &str {
        self.edited_question_text.as_deref().unwrap_or(&self.question_text)
    }

    /// Reviewer-edited answer if present, else the (possibly corrected) staff answer
    pub fn effective_answer(&self) -> &str {
        self.edited_staff_answer.as_deref().unwrap_or(&self.staff_answer)
    }
}

/// Insert payload
#[derive(Debug, Clone, PartialEq)]
pub struct NewCandidate {
    pub source: Source,
    pub source_event_id: String,
    pub source_timestamp: Option<DateTime<Utc>>,
    pub question_text: String,
    pub staff_answer: String,
    pub staff_sender: Option<String>,
    pub generated_answer: Option<String>,
    pub generated_answer_sources: Vec<AnswerSource>,
    pub generation_confidence: Option<f64>,
    pub comparison: ComparisonResult,
    pub routing: Routing,
    pub is_calibration_sample: bool,
    pub protocol: Option<Protocol>,
    pub category: Option<String>,
    pub original_user_question: Option<String>,
    pub original_staff_answer: Option<String>,
}

/// Whitelisted partial update; `None` leaves a column untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateUpdate {
    pub staff_answer: Option<String>,
    pub edited_question_text: Option<String>,
    pub edited_staff_answer: Option<String>,
    pub generated_answer: Option<String>,
    pub generated_answer_sources: Option<Vec<AnswerSource>>,
    pub generation_confidence: Option<f64>,
    pub comparison: Option<ComparisonResult>,
    pub routing: Option<Routing>,
    pub is_calibration_sample: Option<bool>,
    /// `Some(None)` clears the stored protocol
    pub protocol: Option<Option<Protocol>>,
    pub category: Option<String>,
    pub has_correction: Option<bool>,
}

impl CandidateUpdate {
    pub fn is_empty(&self) -> bool {
        *self == CandidateUpdate::default()
    }
}

/// Pending candidates per queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    #[serde(rename = "AUTO_APPROVE")]
    pub auto_approve: i64,
    #[serde(rename = "SPOT_CHECK")]
    pub spot_check: i64,
    #[serde(rename = "FULL_REVIEW")]
    pub full_review: i64,
}

impl QueueCounts {
    pub fn get(&self, routing: Routing) -> i64 {
        match routing {
            Routing::AutoApprove => self.auto_approve,
            Routing::SpotCheck => self.spot_check,
            Routing::FullReview => self.full_review,
            Routing::Skipped => 0,
        }
    }

    pub fn total(&self) -> i64 {
        self.auto_approve + self.spot_check + self.full_review
    }
}

/// Candidates per review status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: i64,
    pub approved: i64,
    pub rejected: i64,
    pub skipped: i64,
}
