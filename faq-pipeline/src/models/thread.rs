//! Conversation thread state machine
//!
//! A thread follows one user question across polling cycles:
//!
//! ```text
//! pending_question        --staff_answer_received-->  has_staff_answer
//! has_staff_answer        --candidate_created-->      candidate_created
//! candidate_created       --correction_received-->    has_correction
//! has_correction          --candidate_created-->      candidate_created
//! candidate_created       --faq_approved-->           closed
//! closed                  --staff_correction-->       reopened_for_correction
//! reopened_for_correction --resolved_*-->             closed_updated
//! closed                  --approval_undone-->        candidate_created
//! ```
//!
//! [`ThreadState::apply`] is the only place legality is decided. The store
//! records whatever it is told.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PipelineError;

/// Chat channel a message came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// In-app support chat (REST API)
    Bisq2,
    /// Federated chat rooms
    Matrix,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Bisq2 => "bisq2",
            Source::Matrix => "matrix",
        }
    }

    /// Provenance label written on FAQs approved from this source
    pub fn faq_label(&self) -> &'static str {
        match self {
            Source::Bisq2 => "Bisq Support Chat",
            Source::Matrix => "Matrix Support",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = faq_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bisq2" => Ok(Source::Bisq2),
            "matrix" => Ok(Source::Matrix),
            other => Err(faq_common::Error::InvalidInput(format!("Unknown source '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadState {
    PendingQuestion,
    HasStaffAnswer,
    CandidateCreated,
    HasCorrection,
    Closed,
    ReopenedForCorrection,
    ClosedUpdated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionTrigger {
    StaffAnswerReceived,
    CandidateCreated,
    CorrectionReceived,
    FaqApproved,
    StaffCorrection,
    ResolvedUpdate,
    ResolvedConfirm,
    ResolvedDelete,
    ApprovalUndone,
}

impl ThreadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadState::PendingQuestion => "pending_question",
            ThreadState::HasStaffAnswer => "has_staff_answer",
            ThreadState::CandidateCreated => "candidate_created",
            ThreadState::HasCorrection => "has_correction",
            ThreadState::Closed => "closed",
            ThreadState::ReopenedForCorrection => "reopened_for_correction",
            ThreadState::ClosedUpdated => "closed_updated",
        }
    }

    /// Next state for `trigger`, or `None` when the pair is not in the table
    pub fn next(self, trigger: TransitionTrigger) -> Option<ThreadState> {
        use ThreadState as S;
        use TransitionTrigger as T;

        match (self, trigger) {
            (S::PendingQuestion, T::StaffAnswerReceived) => Some(S::HasStaffAnswer),
            (S::HasStaffAnswer, T::CandidateCreated) => Some(S::CandidateCreated),
            (S::CandidateCreated, T::CorrectionReceived) => Some(S::HasCorrection),
            (S::HasCorrection, T::CandidateCreated) => Some(S::CandidateCreated),
            (S::CandidateCreated, T::FaqApproved) => Some(S::Closed),
            (S::Closed, T::StaffCorrection) => Some(S::ReopenedForCorrection),
            (S::ReopenedForCorrection, T::ResolvedUpdate | T::ResolvedConfirm | T::ResolvedDelete) => {
                Some(S::ClosedUpdated)
            }
            (S::Closed, T::ApprovalUndone) => Some(S::CandidateCreated),
            _ => None,
        }
    }

    /// Checked transition
    pub fn apply(self, trigger: TransitionTrigger) -> Result<ThreadState, PipelineError> {
        self.next(trigger).ok_or_else(|| {
            PipelineError::InvalidState(format!(
                "Illegal thread transition: {} --{}-->",
                self.as_str(),
                trigger.as_str()
            ))
        })
    }

    /// `closed` or `closed_updated`
    pub fn is_terminal(&self) -> bool {
        matches!(self, ThreadState::Closed | ThreadState::ClosedUpdated)
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThreadState {
    type Err = faq_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending_question" => ThreadState::PendingQuestion,
            "has_staff_answer" => ThreadState::HasStaffAnswer,
            "candidate_created" => ThreadState::CandidateCreated,
            "has_correction" => ThreadState::HasCorrection,
            "closed" => ThreadState::Closed,
            "reopened_for_correction" => ThreadState::ReopenedForCorrection,
            "closed_updated" => ThreadState::ClosedUpdated,
            other => {
                return Err(faq_common::Error::InvalidInput(format!("Unknown thread state '{}'", other)))
            }
        })
    }
}

impl TransitionTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionTrigger::StaffAnswerReceived => "staff_answer_received",
            TransitionTrigger::CandidateCreated => "candidate_created",
            TransitionTrigger::CorrectionReceived => "correction_received",
            TransitionTrigger::FaqApproved => "faq_approved",
            TransitionTrigger::StaffCorrection => "staff_correction",
            TransitionTrigger::ResolvedUpdate => "resolved_update",
            TransitionTrigger::ResolvedConfirm => "resolved_confirm",
            TransitionTrigger::ResolvedDelete => "resolved_delete",
            TransitionTrigger::ApprovalUndone => "approval_undone",
        }
    }
}

impl fmt::Display for TransitionTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a message inside a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Question,
    StaffAnswer,
    Correction,
    PostApprovalCorrection,
    UserFollowup,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Question => "question",
            MessageType::StaffAnswer => "staff_answer",
            MessageType::Correction => "correction",
            MessageType::PostApprovalCorrection => "post_approval_correction",
            MessageType::UserFollowup => "user_followup",
        }
    }
}

impl FromStr for MessageType {
    type Err = faq_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "question" => MessageType::Question,
            "staff_answer" => MessageType::StaffAnswer,
            "correction" => MessageType::Correction,
            "post_approval_correction" => MessageType::PostApprovalCorrection,
            "user_followup" => MessageType::UserFollowup,
            other => {
                return Err(faq_common::Error::InvalidInput(format!("Unknown message type '{}'", other)))
            }
        })
    }
}

/// One logical Q&A exchange tracked across polls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationThread {
    pub id: i64,
    /// SHA-256 of `source:room_id:first_question_id`
    pub thread_key: String,
    pub source: Source,
    pub room_id: Option<String>,
    pub first_question_id: String,
    pub state: ThreadState,
    pub candidate_id: Option<i64>,
    pub faq_id: Option<String>,
    pub correction_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationThread {
    /// Deterministic identity of a thread
    pub fn compute_key(source: Source, room_id: Option<&str>, first_question_id: &str) -> String {
        faq_common::keys::stable_key(&[source.as_str(), room_id.unwrap_or(""), first_question_id])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub id: i64,
    pub thread_id: i64,
    /// Source-native message id
    pub message_id: String,
    pub message_type: MessageType,
    pub sender_id: Option<String>,
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub is_processed: bool,
    pub created_at: DateTime<Utc>,
}

/// Append-only audit row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransitionRecord {
    pub id: i64,
    pub thread_id: i64,
    /// `None` only for rows written before the thread existed in the log
    pub from_state: Option<ThreadState>,
    pub to_state: ThreadState,
    pub trigger: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let s = ThreadState::PendingQuestion;
        let s = s.apply(TransitionTrigger::StaffAnswerReceived).unwrap();
        assert_eq!(s, ThreadState::HasStaffAnswer);
        let s = s.apply(TransitionTrigger::CandidateCreated).unwrap();
        assert_eq!(s, ThreadState::CandidateCreated);
        let s = s.apply(TransitionTrigger::FaqApproved).unwrap();
        assert_eq!(s, ThreadState::Closed);
        assert!(s.is_terminal());
    }

    #[test]
    fn test_correction_loop_returns_to_candidate_created() {
        let s = ThreadState::CandidateCreated
            .apply(TransitionTrigger::CorrectionReceived)
            .unwrap();
        assert_eq!(s, ThreadState::HasCorrection);
        assert_eq!(
            s.apply(TransitionTrigger::CandidateCreated).unwrap(),
            ThreadState::CandidateCreated
        );
    }

    #[test]
    fn test_reopen_and_resolve() {
        let s = ThreadState::Closed.apply(TransitionTrigger::StaffCorrection).unwrap();
        assert_eq!(s, ThreadState::ReopenedForCorrection);
        for trigger in [
            TransitionTrigger::ResolvedUpdate,
            TransitionTrigger::ResolvedConfirm,
            TransitionTrigger::ResolvedDelete,
        ] {
            assert_eq!(s.apply(trigger).unwrap(), ThreadState::ClosedUpdated);
        }
    }

    #[test]
    fn test_closed_threads_do_not_regress() {
        for trigger in [
            TransitionTrigger::StaffAnswerReceived,
            TransitionTrigger::CandidateCreated,
            TransitionTrigger::CorrectionReceived,
            TransitionTrigger::FaqApproved,
        ] {
            assert!(ThreadState::Closed.next(trigger).is_none());
            assert!(ThreadState::ClosedUpdated.next(trigger).is_none());
        }
        assert!(ThreadState::ClosedUpdated.next(TransitionTrigger::StaffCorrection).is_none());
        assert!(ThreadState::ClosedUpdated.next(TransitionTrigger::ApprovalUndone).is_none());
    }

    #[test]
    fn test_illegal_transition_is_invalid_state() {
        let err = ThreadState::PendingQuestion
            .apply(TransitionTrigger::FaqApproved)
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidState(msg) if msg.contains("pending_question")));
    }

    #[test]
    fn test_state_string_round_trip() {
        for state in [
            ThreadState::PendingQuestion,
            ThreadState::HasStaffAnswer,
            ThreadState::CandidateCreated,
            ThreadState::HasCorrection,
            ThreadState::Closed,
            ThreadState::ReopenedForCorrection,
            ThreadState::ClosedUpdated,
        ] {
            assert_eq!(state.as_str().parse::<ThreadState>().unwrap(), state);
            assert_eq!(serde_json::to_value(state).unwrap(), state.as_str());
        }
    }

    #[test]
    fn test_thread_key_depends_on_room() {
        let a = ConversationThread::compute_key(Source::Matrix, None, "$q1");
        let b = ConversationThread::compute_key(Source::Matrix, Some("!room"), "$q1");
        assert_ne!(a, b);
        assert_eq!(a, ConversationThread::compute_key(Source::Matrix, None, "$q1"));
    }
}
