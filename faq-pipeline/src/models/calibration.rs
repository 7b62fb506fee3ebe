//! Calibration and adaptive-threshold state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::candidate::Routing;

/// Maximum entries kept in each learning history
pub const HISTORY_CAP: usize = 1000;

/// Bootstrap review phase (singleton)
///
/// While `is_complete` is false every new candidate goes to full review.
/// Once complete it never reopens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationStatus {
    pub samples_collected: i64,
    pub samples_required: i64,
    pub is_complete: bool,
    pub auto_approve_threshold: f64,
    pub spot_check_threshold: f64,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CalibrationStatus {
    pub fn remaining(&self) -> i64 {
        (self.samples_required - self.samples_collected).max(0)
    }

    /// Progress in [0, 1]
    pub fn progress(&self) -> f64 {
        if self.is_complete || self.samples_required <= 0 {
            return 1.0;
        }
        (self.samples_collected as f64 / self.samples_required as f64).min(1.0)
    }
}

/// Reviewer verdict fed to the learner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewOutcome {
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub candidate_id: i64,
    pub final_score: f64,
    pub routing: Routing,
    pub outcome: ReviewOutcome,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSnapshot {
    pub auto_send_threshold: f64,
    pub queue_high_threshold: f64,
    pub reject_threshold: f64,
    pub sample_size: usize,
    pub timestamp: DateTime<Utc>,
}

/// Adaptive routing thresholds (singleton, absent until first save)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningState {
    /// Score at or above which a candidate is auto-approved
    pub auto_send_threshold: f64,
    /// Score at or above which a candidate only needs a spot check
    pub queue_high_threshold: f64,
    /// Score below which reviewers almost always reject
    pub reject_threshold: f64,
    pub review_history: Vec<ReviewRecord>,
    pub threshold_history: Vec<ThresholdSnapshot>,
    pub updated_at: DateTime<Utc>,
}

impl LearningState {
    /// Fresh state seeded from the fixed calibration thresholds
    pub fn from_calibration(status: &CalibrationStatus) -> Self {
        Self {
            auto_send_threshold: status.auto_approve_threshold,
            queue_high_threshold: status.spot_check_threshold,
            reject_threshold: 0.5_f64.min(status.spot_check_threshold),
            review_history: Vec::new(),
            threshold_history: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Drop the oldest entries beyond [`HISTORY_CAP`]
    pub fn cap_histories(&mut self) {
        cap_front(&mut self.review_history, HISTORY_CAP);
        cap_front(&mut self.threshold_history, HISTORY_CAP);
    }
}

fn cap_front<T>(items: &mut Vec<T>, cap: usize) {
    if items.len() > cap {
        let excess = items.len() - cap;
        items.drain(..excess);
    }
}
