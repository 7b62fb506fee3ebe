//! Adaptive threshold learning from reviewer decisions
//!
//! Every human approve/reject is appended to the persisted review history.
//! Once enough reviews exist the thresholds are recomputed from approval
//! precision per score band:
//!
//! - `auto_send_threshold`: lowest score whose band at or above it is
//!   approved at least 95% of the time
//! - `queue_high_threshold`: same, at 80%
//! - `reject_threshold`: highest score whose band below it is approved at
//!   most 20% of the time
//!
//! Thresholds always satisfy `reject <= queue_high <= auto_send`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::db::CandidateStore;
use crate::models::{LearningState, ReviewOutcome, ReviewRecord, Routing, ThresholdSnapshot};
use crate::services::collaborators::LearningEngine;
use crate::services::routing::route_by_thresholds;

/// Reviews needed before thresholds move
pub const MIN_REVIEWS_FOR_UPDATE: usize = 20;
/// Reviews needed inside a band for its precision to count
const MIN_BAND_SIZE: usize = 10;

const AUTO_SEND_PRECISION: f64 = 0.95;
const QUEUE_HIGH_PRECISION: f64 = 0.80;
const REJECT_MAX_APPROVAL: f64 = 0.20;

const AUTO_SEND_FLOOR: f64 = 0.75;
const AUTO_SEND_CEILING: f64 = 0.99;
const QUEUE_HIGH_FLOOR: f64 = 0.50;

pub struct AdaptiveThresholdLearner {
    candidates: Arc<CandidateStore>,
    /// Serializes read-modify-write of the learning row
    write_lock: Mutex<()>,
}

impl AdaptiveThresholdLearner {
    pub fn new(candidates: Arc<CandidateStore>) -> Self {
        Self {
            candidates,
            write_lock: Mutex::new(()),
        }
    }

    /// Persisted state, or a fresh one seeded from the calibration thresholds
    pub async fn current_state(&self) -> faq_common::Result<LearningState> {
        match self.candidates.get_learning_state().await? {
            Some(state) => Ok(state),
            None => {
                let calibration = self.candidates.get_calibration_status().await?;
                Ok(LearningState::from_calibration(&calibration))
            }
        }
    }
}

#[async_trait]
impl LearningEngine for AdaptiveThresholdLearner {
    async fn recommend_routing(&self, final_score: f64) -> faq_common::Result<Routing> {
        let state = self.current_state().await?;
        Ok(route_by_thresholds(
            final_score,
            state.auto_send_threshold,
            state.queue_high_threshold,
        ))
    }

    async fn record_review(&self, record: ReviewRecord) -> faq_common::Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut state = self.current_state().await?;
        debug!(
            candidate_id = record.candidate_id,
            outcome = ?record.outcome,
            "Recording review for threshold learning"
        );
        state.review_history.push(record);
        state.cap_histories();

        if let Some(snapshot) = recompute_thresholds(&mut state) {
            info!(
                auto_send = snapshot.auto_send_threshold,
                queue_high = snapshot.queue_high_threshold,
                reject = snapshot.reject_threshold,
                sample_size = snapshot.sample_size,
                "Routing thresholds updated"
            );
            state.threshold_history.push(snapshot);
        }
        state.updated_at = Utc::now();

        self.candidates.save_learning_state(&state).await
    }
}

/// Recompute thresholds in place; returns a snapshot when any changed
pub fn recompute_thresholds(state: &mut LearningState) -> Option<ThresholdSnapshot> {
    let history = &state.review_history;
    if history.len() < MIN_REVIEWS_FOR_UPDATE {
        return None;
    }

    let mut scored: Vec<(f64, bool)> = history
        .iter()
        .map(|r| (r.final_score, r.outcome == ReviewOutcome::Approved))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut auto_send = lowest_cut_with_precision(&scored, AUTO_SEND_PRECISION)
        .unwrap_or(state.auto_send_threshold)
        .clamp(AUTO_SEND_FLOOR, AUTO_SEND_CEILING);
    let mut queue_high = lowest_cut_with_precision(&scored, QUEUE_HIGH_PRECISION)
        .unwrap_or(state.queue_high_threshold)
        .max(QUEUE_HIGH_FLOOR);
    let mut reject = highest_cut_with_max_approval(&scored, REJECT_MAX_APPROVAL).unwrap_or(state.reject_threshold);

    if queue_high > auto_send {
        queue_high = auto_send;
    }
    if reject > queue_high {
        reject = queue_high;
    }
    auto_send = auto_send.max(queue_high);

    let changed = (auto_send - state.auto_send_threshold).abs() > f64::EPSILON
        || (queue_high - state.queue_high_threshold).abs() > f64::EPSILON
        || (reject - state.reject_threshold).abs() > f64::EPSILON;
    if !changed {
        return None;
    }

    state.auto_send_threshold = auto_send;
    state.queue_high_threshold = queue_high;
    state.reject_threshold = reject;

    Some(ThresholdSnapshot {
        auto_send_threshold: auto_send,
        queue_high_threshold: queue_high,
        reject_threshold: reject,
        sample_size: scored.len(),
        timestamp: Utc::now(),
    })
}

/// `scored` is sorted by score descending
fn lowest_cut_with_precision(scored: &[(f64, bool)], precision: f64) -> Option<f64> {
    let mut approved = 0usize;
    let mut best = None;

    for (i, &(score, ok)) in scored.iter().enumerate() {
        if ok {
            approved += 1;
        }
        let n = i + 1;
        // Only cut between distinct scores
        let boundary = scored.get(i + 1).map_or(true, |next| next.0 < score);
        if boundary && n >= MIN_BAND_SIZE && approved as f64 / n as f64 >= precision {
            best = Some(score);
        }
    }
    best
}

/// `scored` is sorted by score descending
fn highest_cut_with_max_approval(scored: &[(f64, bool)], max_approval: f64) -> Option<f64> {
    let mut approved = 0usize;
    let mut best = None;

    for (i, &(score, ok)) in scored.iter().enumerate().rev() {
        if ok {
            approved += 1;
        }
        let n = scored.len() - i;
        let boundary = i == 0 || scored[i - 1].0 > score;
        if boundary && n >= MIN_BAND_SIZE && approved as f64 / n as f64 <= max_approval {
            // Band is everything strictly below the next higher score
            best = Some(if i == 0 { score } else { scored[i - 1].0 });
        }
    }
    best
}
