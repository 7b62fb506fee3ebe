//! Pipeline orchestrator
//!
//! Coordinates ingestion, thread lifecycle, generation, comparison, routing,
//! persistence and review actions. Split by concern:
//!
//! - `ingest`: per-message and batch ingestion paths
//! - `corrections`: pre- and post-approval corrections, flagged FAQs
//! - `review`: approve, reject, skip, undo, editing
//!
//! No lock or transaction is held across a collaborator call. Within one
//! call, steps run strictly in order.

mod corrections;
mod ingest;
mod review;

use std::sync::Arc;

use faq_common::events::{EventBus, PipelineEvent};
use tracing::{debug, warn};

use crate::db::{CandidateStore, ThreadStore};
use crate::error::{PipelineError, PipelineResult};
use crate::models::{
    CalibrationStatus, Candidate, ComparisonResult, PipelineStats, ProcessingResult, QueueCounts, Routing,
    SkipReason, Source, ThreadHistory, ThreadState,
};
use crate::services::collaborators::{AnswerGenerator, ComparisonEngine, FaqExtractor, FaqStore, LearningEngine};
use crate::services::metrics;
use crate::services::routing::RoutingEngine;

/// Tunables for the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    /// Similarity at or above which an existing FAQ blocks approval
    pub duplicate_similarity_threshold: f64,
    pub duplicate_search_limit: usize,
    /// Question and answer must have at least this many characters after trimming
    pub min_text_length: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            duplicate_similarity_threshold: 0.85,
            duplicate_search_limit: 5,
            min_text_length: 10,
        }
    }
}

/// External services the orchestrator calls
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Arc<dyn AnswerGenerator>,
    pub comparison: Arc<dyn ComparisonEngine>,
    pub faq_store: Arc<dyn FaqStore>,
    pub extractor: Arc<dyn FaqExtractor>,
    pub learning: Option<Arc<dyn LearningEngine>>,
}

pub struct PipelineOrchestrator {
    threads: Arc<ThreadStore>,
    candidates: Arc<CandidateStore>,
    routing: RoutingEngine,
    generator: Arc<dyn AnswerGenerator>,
    comparison: Arc<dyn ComparisonEngine>,
    faq_store: Arc<dyn FaqStore>,
    extractor: Arc<dyn FaqExtractor>,
    learning: Option<Arc<dyn LearningEngine>>,
    events: EventBus,
    settings: OrchestratorSettings,
}

impl PipelineOrchestrator {
    pub fn new(
        threads: Arc<ThreadStore>,
        candidates: Arc<CandidateStore>,
        collaborators: Collaborators,
        events: EventBus,
        settings: OrchestratorSettings,
    ) -> Self {
        let routing = RoutingEngine::new(candidates.clone(), collaborators.learning.clone());
        Self {
            threads,
            candidates,
            routing,
            generator: collaborators.generator,
            comparison: collaborators.comparison,
            faq_store: collaborators.faq_store,
            extractor: collaborators.extractor,
            learning: collaborators.learning,
            events,
            settings,
        }
    }

    pub fn threads(&self) -> &ThreadStore {
        &self.threads
    }

    pub fn candidates(&self) -> &CandidateStore {
        &self.candidates
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    // ---- read surface ----

    pub async fn get_candidate(&self, candidate_id: i64) -> PipelineResult<Candidate> {
        self.candidates
            .get_by_id(candidate_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("candidate {}", candidate_id)))
    }

    pub async fn get_pending_reviews(
        &self,
        source: Option<Source>,
        routing: Option<Routing>,
        limit: i64,
        offset: i64,
    ) -> PipelineResult<Vec<Candidate>> {
        Ok(self.candidates.get_pending(source, routing, limit, offset).await?)
    }

    pub async fn count_pending_reviews(&self, source: Option<Source>, routing: Option<Routing>) -> PipelineResult<i64> {
        Ok(self.candidates.count_pending(source, routing).await?)
    }

    /// Head of the review queue
    pub async fn get_current_item(
        &self,
        source: Option<Source>,
        routing: Option<Routing>,
    ) -> PipelineResult<Option<Candidate>> {
        Ok(self
            .candidates
            .get_pending(source, routing, 1, 0)
            .await?
            .into_iter()
            .next())
    }

    pub async fn get_queue_counts(&self, source: Option<Source>) -> PipelineResult<QueueCounts> {
        Ok(self.candidates.get_queue_counts(source).await?)
    }

    pub async fn get_calibration_status(&self) -> PipelineResult<CalibrationStatus> {
        Ok(self.candidates.get_calibration_status().await?)
    }

    pub async fn get_pipeline_stats(&self) -> PipelineResult<PipelineStats> {
        let threads_by_state = self.threads.count_by_state().await?;
        let flagged_faqs = threads_by_state
            .get(ThreadState::ReopenedForCorrection.as_str())
            .copied()
            .unwrap_or(0);

        Ok(PipelineStats {
            queue_counts: self.candidates.get_queue_counts(None).await?,
            status_counts: self.candidates.count_by_status(None).await?,
            calibration: self.candidates.get_calibration_status().await?,
            threads_by_state,
            flagged_faqs,
        })
    }

    pub async fn get_thread_history(&self, thread_id: i64) -> PipelineResult<ThreadHistory> {
        let thread = self
            .threads
            .get_thread(thread_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("thread {}", thread_id)))?;
        Ok(ThreadHistory {
            messages: self.threads.get_thread_messages(thread_id).await?,
            transitions: self.threads.get_state_transitions(thread_id).await?,
            thread,
        })
    }

    // ---- shared steps ----

    /// Score `staff_answer` against `generated_answer`
    ///
    /// An empty generated answer yields a zero score without calling the
    /// comparison engine.
    async fn compare_answers(
        &self,
        source_event_id: &str,
        question: &str,
        staff_answer: &str,
        generated_answer: Option<&str>,
    ) -> PipelineResult<ComparisonResult> {
        let generated = generated_answer.unwrap_or("");
        if generated.trim().is_empty() {
            debug!(event_id = %source_event_id, "Generated answer empty, skipping comparison");
            return Ok(ComparisonResult::empty_generated_answer());
        }

        self.comparison
            .compare(source_event_id, question, staff_answer, generated)
            .await
            .map_err(PipelineError::Comparison)
    }

    fn too_short(&self, text: &str) -> bool {
        text.trim().chars().count() < self.settings.min_text_length
    }

    fn skipped(&self, source: Source, source_event_id: &str, reason: SkipReason) -> ProcessingResult {
        debug!(event_id = %source_event_id, reason = %reason, "Skipping event");
        metrics::record_skipped(reason);
        ProcessingResult::skipped(source, source_event_id, reason)
    }

    /// Refresh queue gauges and announce the new counts
    async fn publish_queue_counts(&self) {
        match self.candidates.get_queue_counts(None).await {
            Ok(counts) => {
                metrics::set_queue_sizes(&counts);
                self.events.emit_lossy(PipelineEvent::QueueCountsChanged {
                    auto_approve: counts.auto_approve,
                    spot_check: counts.spot_check,
                    full_review: counts.full_review,
                    timestamp: chrono::Utc::now(),
                });
            }
            Err(e) => warn!(error = %e, "Failed to refresh queue counts"),
        }
    }
}
