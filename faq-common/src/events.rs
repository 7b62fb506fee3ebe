//! Pipeline events
//!
//! Events are broadcast on an [`EventBus`] and serialized for the admin SSE
//! stream. Enum-typed fields (routing, review action) travel as their wire
//! strings so this crate stays independent of the pipeline models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Everything the pipeline announces to observers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// New candidate persisted
    CandidateCreated {
        candidate_id: i64,
        source: String,
        source_event_id: String,
        routing: String,
        final_score: f64,
        is_calibration_sample: bool,
        timestamp: DateTime<Utc>,
    },

    /// Candidate re-scored after a correction, edit or regeneration
    CandidateRescored {
        candidate_id: i64,
        routing: String,
        final_score: f64,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Reviewer action applied (approve, reject, skip, undo)
    CandidateReviewed {
        candidate_id: i64,
        action: String,
        reviewer: Option<String>,
        faq_id: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Pending queue sizes after a change
    QueueCountsChanged {
        auto_approve: i64,
        spot_check: i64,
        full_review: i64,
        timestamp: DateTime<Utc>,
    },

    /// Staff corrected an answer that is already an approved FAQ
    FaqFlagged {
        thread_id: i64,
        faq_id: String,
        correction_reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Flagged FAQ resolved by a reviewer
    FaqResolved {
        thread_id: i64,
        faq_id: String,
        action: String,
        timestamp: DateTime<Utc>,
    },

    /// Bootstrap review phase finished
    CalibrationCompleted {
        samples_collected: i64,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::CandidateCreated { .. } => "CandidateCreated",
            PipelineEvent::CandidateRescored { .. } => "CandidateRescored",
            PipelineEvent::CandidateReviewed { .. } => "CandidateReviewed",
            PipelineEvent::QueueCountsChanged { .. } => "QueueCountsChanged",
            PipelineEvent::FaqFlagged { .. } => "FaqFlagged",
            PipelineEvent::FaqResolved { .. } => "FaqResolved",
            PipelineEvent::CalibrationCompleted { .. } => "CalibrationCompleted",
        }
    }
}

/// Broadcast channel shared by the orchestrator and the SSE endpoint
///
/// Cloning is cheap; all clones feed the same subscribers. Slow subscribers
/// lose the oldest events once `capacity` is exceeded.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Receive events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit, returning the number of receivers; errors when nobody listens
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: PipelineEvent) -> Result<usize, broadcast::error::SendError<PipelineEvent>> {
        self.tx.send(event)
    }

    /// Emit, ignoring the no-subscriber case
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
