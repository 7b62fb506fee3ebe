//! Score-based queue routing

use std::sync::Arc;

use faq_common::Result;
use tracing::debug;

use crate::db::CandidateStore;
use crate::models::Routing;
use crate::services::collaborators::LearningEngine;

/// Fixed-threshold routing
///
/// `score >= auto_approve` is AUTO_APPROVE, `score >= spot_check` is
/// SPOT_CHECK, anything lower is FULL_REVIEW.
pub fn route_by_thresholds(final_score: f64, auto_approve: f64, spot_check: f64) -> Routing {
    if final_score >= auto_approve {
        Routing::AutoApprove
    } else if final_score >= spot_check {
        Routing::SpotCheck
    } else {
        Routing::FullReview
    }
}

pub struct RoutingEngine {
    candidates: Arc<CandidateStore>,
    learning: Option<Arc<dyn LearningEngine>>,
}

impl RoutingEngine {
    pub fn new(candidates: Arc<CandidateStore>, learning: Option<Arc<dyn LearningEngine>>) -> Self {
        Self { candidates, learning }
    }

    /// Queue for a new candidate and whether it is a calibration sample
    ///
    /// During calibration everything goes to full review regardless of score.
    pub async fn determine_routing(&self, final_score: f64) -> Result<(Routing, bool)> {
        let calibration = self.candidates.get_calibration_status().await?;
        if !calibration.is_complete {
            debug!(final_score, "Calibration active, forcing full review");
            return Ok((Routing::FullReview, true));
        }

        if let Some(learning) = &self.learning {
            let routing = learning.recommend_routing(final_score).await?;
            debug!(final_score, routing = %routing, "Adaptive routing");
            return Ok((routing, false));
        }

        Ok((
            route_by_thresholds(
                final_score,
                calibration.auto_approve_threshold,
                calibration.spot_check_threshold,
            ),
            false,
        ))
    }
}
