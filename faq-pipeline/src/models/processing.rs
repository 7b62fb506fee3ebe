//! Outcomes returned by the orchestrator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::calibration::CalibrationStatus;
use super::candidate::{Candidate, QueueCounts, Routing, StatusCounts};
use super::thread::{ConversationThread, Source, StateTransitionRecord, ThreadMessage, TransitionTrigger};

/// Why an event did not produce or update a candidate
///
/// These are normal outcomes, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Event id already has a candidate
    Duplicate,
    /// Question or answer shorter than the minimum length
    TooShort,
    /// The thread already produced a candidate
    ThreadHasCandidate,
    NoExistingThread,
    NoCandidateForThread,
    /// Correction must go through the post-approval path
    CandidateAlreadyApproved,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Duplicate => "duplicate",
            SkipReason::TooShort => "too_short",
            SkipReason::ThreadHasCandidate => "thread_has_candidate",
            SkipReason::NoExistingThread => "no_existing_thread",
            SkipReason::NoCandidateForThread => "no_candidate_for_thread",
            SkipReason::CandidateAlreadyApproved => "candidate_already_approved",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one ingestion or correction call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub candidate_id: Option<i64>,
    pub source: Source,
    pub source_event_id: String,
    pub routing: Routing,
    pub final_score: f64,
    pub is_calibration_sample: bool,
    pub skipped_reason: Option<SkipReason>,
}

impl ProcessingResult {
    pub fn skipped(source: Source, source_event_id: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            candidate_id: None,
            source,
            source_event_id: source_event_id.into(),
            routing: Routing::Skipped,
            final_score: 0.0,
            is_calibration_sample: false,
            skipped_reason: Some(reason),
        }
    }

    pub fn from_candidate(candidate: &Candidate) -> Self {
        Self {
            candidate_id: Some(candidate.id),
            source: candidate.source,
            source_event_id: candidate.source_event_id.clone(),
            routing: candidate.routing,
            final_score: candidate.final_score,
            is_calibration_sample: candidate.is_calibration_sample,
            skipped_reason: None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped_reason.is_some()
    }
}

/// Result of flagging an approved FAQ after a late staff correction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostApprovalCorrectionResult {
    pub thread_id: i64,
    pub faq_id: String,
    pub faq_flagged: bool,
    pub correction_stored: bool,
    pub correction_reason: String,
}

/// What happened to a correction routed through both correction paths
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "path", rename_all = "snake_case")]
pub enum CorrectionOutcome {
    /// Approved FAQ flagged for review
    PostApproval(PostApprovalCorrectionResult),
    /// Pending candidate re-scored, or a skip
    PreApproval(ProcessingResult),
}

/// Review action being reverted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UndoAction {
    Approve,
    Reject,
    Skip,
}

impl UndoAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            UndoAction::Approve => "approve",
            UndoAction::Reject => "reject",
            UndoAction::Skip => "skip",
        }
    }
}

impl FromStr for UndoAction {
    type Err = faq_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(UndoAction::Approve),
            "reject" => Ok(UndoAction::Reject),
            "skip" => Ok(UndoAction::Skip),
            other => Err(faq_common::Error::InvalidInput(format!("Unknown undo action '{}'", other))),
        }
    }
}

/// How a reviewer settles a flagged FAQ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolveAction {
    /// Replace the FAQ answer with the corrected text
    Update,
    /// Keep the FAQ as is
    Confirm,
    /// Remove the FAQ
    Delete,
}

impl ResolveAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolveAction::Update => "update",
            ResolveAction::Confirm => "confirm",
            ResolveAction::Delete => "delete",
        }
    }

    pub fn trigger(&self) -> TransitionTrigger {
        match self {
            ResolveAction::Update => TransitionTrigger::ResolvedUpdate,
            ResolveAction::Confirm => TransitionTrigger::ResolvedConfirm,
            ResolveAction::Delete => TransitionTrigger::ResolvedDelete,
        }
    }
}

impl FromStr for ResolveAction {
    type Err = faq_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "update" => Ok(ResolveAction::Update),
            "confirm" => Ok(ResolveAction::Confirm),
            "delete" => Ok(ResolveAction::Delete),
            other => Err(faq_common::Error::InvalidInput(format!("Unknown resolve action '{}'", other))),
        }
    }
}

/// Thread reopened by a correction to its approved FAQ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlaggedFaq {
    pub thread_id: i64,
    pub faq_id: Option<String>,
    pub source: Source,
    pub candidate_id: Option<i64>,
    pub correction_reason: Option<String>,
    /// Most recent post-approval correction message
    pub latest_correction: Option<ThreadMessage>,
    pub flagged_at: DateTime<Utc>,
}

/// Outcome of a bulk extraction call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchExtractionResult {
    /// Pairs the extractor returned
    pub extracted: usize,
    /// Pairs that produced a candidate
    pub processed: usize,
    pub skipped: usize,
    /// Pairs whose processing raised an error
    pub failed: usize,
    pub results: Vec<ProcessingResult>,
}

/// Full audit view of one thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadHistory {
    pub thread: ConversationThread,
    pub messages: Vec<ThreadMessage>,
    pub transitions: Vec<StateTransitionRecord>,
}

/// Aggregate numbers for the admin dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub queue_counts: QueueCounts,
    pub status_counts: StatusCounts,
    pub calibration: CalibrationStatus,
    pub threads_by_state: BTreeMap<String, i64>,
    pub flagged_faqs: i64,
}
