//! Reviewer actions

use chrono::Utc;
use faq_common::events::PipelineEvent;
use tracing::{debug, info, warn};

use super::PipelineOrchestrator;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{
    Candidate, CandidateUpdate, FaqItem, Protocol, ReviewOutcome, ReviewRecord, ReviewStatus, ThreadState,
    TransitionTrigger, UndoAction, DEFAULT_CATEGORY,
};
use crate::services::metrics;

impl PipelineOrchestrator {
    /// Approve a pending candidate and publish it as a verified FAQ
    ///
    /// Blocked with [`PipelineError::DuplicateFaq`] when a similar FAQ exists.
    pub async fn approve_candidate(&self, candidate_id: i64, reviewer: &str) -> PipelineResult<Candidate> {
        self.approve(candidate_id, reviewer, false).await
    }

    /// Approve even when similar FAQs exist
    pub async fn approve_candidate_force(&self, candidate_id: i64, reviewer: &str) -> PipelineResult<Candidate> {
        self.approve(candidate_id, reviewer, true).await
    }

    async fn approve(&self, candidate_id: i64, reviewer: &str, force: bool) -> PipelineResult<Candidate> {
        let candidate = self.get_candidate(candidate_id).await?;
        require_status(&candidate, ReviewStatus::Pending, "approve")?;

        // Check the thread can close before creating anything external
        let thread = self.threads.find_thread_by_candidate(candidate_id).await?;
        if let Some(thread) = &thread {
            thread.state.apply(TransitionTrigger::FaqApproved)?;
        }

        let question = candidate.effective_question().to_string();
        if !force {
            let similar = self
                .faq_store
                .search_faq_similarity(
                    &question,
                    self.settings.duplicate_similarity_threshold,
                    self.settings.duplicate_search_limit,
                )
                .await
                .map_err(PipelineError::FaqStore)?;
            if !similar.is_empty() {
                info!(candidate_id, matches = similar.len(), "Approval blocked by similar FAQs");
                return Err(PipelineError::DuplicateFaq {
                    candidate_id,
                    similar_faqs: similar,
                });
            }
        }

        let item = FaqItem {
            question,
            answer: candidate.effective_answer().to_string(),
            source: candidate.source.faq_label().to_string(),
            verified: true,
            verified_at: Some(Utc::now()),
            protocol: candidate.protocol,
            category: candidate
                .category
                .clone()
                .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
        };
        let faq = self.faq_store.add_faq(&item).await.map_err(PipelineError::FaqStore)?;

        if !self.candidates.approve(candidate_id, reviewer, &faq.id).await? {
            // Reviewed elsewhere in the meantime
            self.delete_faq_best_effort(&faq.id).await;
            return Err(PipelineError::InvalidState(format!(
                "candidate {} is no longer pending",
                candidate_id
            )));
        }

        if let Some(thread) = thread {
            self.threads.link_thread_to_faq(thread.id, &faq.id).await?;
        }

        let approved = self.get_candidate(candidate_id).await?;
        info!(
            candidate_id,
            faq_id = %faq.id,
            reviewer,
            forced = force,
            "Candidate approved"
        );

        self.record_outcome(&approved, ReviewOutcome::Approved).await;
        metrics::record_review("approve");
        self.emit_reviewed(candidate_id, "approve", Some(reviewer), Some(faq.id));
        self.publish_queue_counts().await;

        Ok(approved)
    }

    pub async fn reject_candidate(
        &self,
        candidate_id: i64,
        reviewer: &str,
        reason: Option<&str>,
    ) -> PipelineResult<Candidate> {
        let candidate = self.get_candidate(candidate_id).await?;
        require_status(&candidate, ReviewStatus::Pending, "reject")?;

        if !self.candidates.reject(candidate_id, reviewer, reason).await? {
            return Err(PipelineError::InvalidState(format!(
                "candidate {} is no longer pending",
                candidate_id
            )));
        }

        let rejected = self.get_candidate(candidate_id).await?;
        info!(candidate_id, reviewer, reason = reason.unwrap_or(""), "Candidate rejected");

        self.record_outcome(&rejected, ReviewOutcome::Rejected).await;
        metrics::record_review("reject");
        self.emit_reviewed(candidate_id, "reject", Some(reviewer), None);
        self.publish_queue_counts().await;

        Ok(rejected)
    }

    /// Move a pending candidate behind everything else in its queue
    pub async fn skip_candidate(&self, candidate_id: i64) -> PipelineResult<Candidate> {
        let candidate = self.get_candidate(candidate_id).await?;
        require_status(&candidate, ReviewStatus::Pending, "skip")?;

        let Some(order) = self.candidates.skip(candidate_id).await? else {
            return Err(PipelineError::InvalidState(format!(
                "candidate {} is no longer pending",
                candidate_id
            )));
        };
        debug!(candidate_id, skip_order = order, "Candidate skipped");

        metrics::record_review("skip");
        self.emit_reviewed(candidate_id, "skip", None, None);
        self.get_candidate(candidate_id).await
    }

    /// Revert an approve, reject or skip
    ///
    /// The candidate must currently be in the state `action` produced. An
    /// approve-undo deletes the FAQ on a best-effort basis (`faq_id`
    /// overrides the one stored on the candidate) and reopens the thread.
    pub async fn undo_action(
        &self,
        candidate_id: i64,
        action: UndoAction,
        faq_id: Option<&str>,
    ) -> PipelineResult<Candidate> {
        let candidate = self.get_candidate(candidate_id).await?;

        match action {
            UndoAction::Approve => {
                require_status(&candidate, ReviewStatus::Approved, "undo approval of")?;
                match faq_id.map(str::to_string).or_else(|| candidate.faq_id.clone()) {
                    Some(faq_id) => self.delete_faq_best_effort(&faq_id).await,
                    None => warn!(candidate_id, "Approved candidate has no FAQ id to delete"),
                }
            }
            UndoAction::Reject => require_status(&candidate, ReviewStatus::Rejected, "undo rejection of")?,
            UndoAction::Skip => {
                require_status(&candidate, ReviewStatus::Pending, "undo skip of")?;
                if candidate.skip_order == 0 {
                    return Err(PipelineError::InvalidState(format!(
                        "candidate {} was not skipped",
                        candidate_id
                    )));
                }
            }
        }

        self.candidates.revert_to_pending(candidate_id).await?;

        if action == UndoAction::Approve {
            if let Some(thread) = self.threads.find_thread_by_candidate(candidate_id).await? {
                if thread.state == ThreadState::Closed {
                    thread.state.apply(TransitionTrigger::ApprovalUndone)?;
                    self.threads.unlink_thread_faq(thread.id).await?;
                } else {
                    warn!(
                        thread_id = thread.id,
                        state = %thread.state,
                        "Thread not closed, leaving it in place after approval undo"
                    );
                }
            }
        }

        info!(candidate_id, action = action.as_str(), "Review action undone");
        metrics::record_review("undo");
        self.emit_reviewed(candidate_id, &format!("undo_{}", action.as_str()), None, None);
        self.publish_queue_counts().await;

        self.get_candidate(candidate_id).await
    }

    /// Apply reviewer edits to a pending candidate
    ///
    /// A changed answer is re-scored against the existing generated answer
    /// and re-routed.
    pub async fn update_candidate(&self, candidate_id: i64, update: CandidateUpdate) -> PipelineResult<Candidate> {
        let candidate = self.get_candidate(candidate_id).await?;
        require_status(&candidate, ReviewStatus::Pending, "edit")?;
        if update.is_empty() {
            return Ok(candidate);
        }

        let mut update = update;
        let answer_changed = update
            .edited_staff_answer
            .as_deref()
            .is_some_and(|a| a != candidate.effective_answer())
            || update
                .staff_answer
                .as_deref()
                .is_some_and(|a| a != candidate.staff_answer);

        if answer_changed {
            let question = update
                .edited_question_text
                .clone()
                .unwrap_or_else(|| candidate.effective_question().to_string());
            let answer = update
                .edited_staff_answer
                .clone()
                .or_else(|| update.staff_answer.clone())
                .unwrap_or_else(|| candidate.effective_answer().to_string());

            let comparison = self
                .compare_answers(
                    &candidate.source_event_id,
                    &question,
                    &answer,
                    candidate.generated_answer.as_deref(),
                )
                .await?;
            let (routing, calibration_sample) = self.routing.determine_routing(comparison.final_score).await?;
            update.comparison = Some(comparison);
            update.routing = Some(routing);
            update.is_calibration_sample = Some(candidate.is_calibration_sample || calibration_sample);
        }

        let updated = self.candidates.update_candidate(candidate_id, &update).await?;
        debug!(candidate_id, rescored = answer_changed, "Candidate edited");

        if answer_changed {
            self.emit_rescored(&updated, "edit");
            self.publish_queue_counts().await;
        }
        Ok(updated)
    }

    /// Generate a fresh answer under an explicit protocol and re-score
    ///
    /// `protocol` bypasses detection; `None` means no protocol filtering.
    pub async fn regenerate_candidate_answer(
        &self,
        candidate_id: i64,
        protocol: Option<Protocol>,
    ) -> PipelineResult<Candidate> {
        let candidate = self.get_candidate(candidate_id).await?;
        require_status(&candidate, ReviewStatus::Pending, "regenerate")?;

        let question = candidate.effective_question().to_string();
        let generated = self
            .generator
            .generate(&question, &[], protocol)
            .await
            .map_err(PipelineError::Generator)?;

        let comparison = self
            .compare_answers(
                &candidate.source_event_id,
                &question,
                candidate.effective_answer(),
                Some(generated.answer.as_str()),
            )
            .await?;
        let (routing, calibration_sample) = self.routing.determine_routing(comparison.final_score).await?;

        let update = CandidateUpdate {
            generated_answer: Some(generated.answer),
            generated_answer_sources: Some(generated.sources),
            generation_confidence: generated.confidence,
            comparison: Some(comparison),
            routing: Some(routing),
            is_calibration_sample: Some(candidate.is_calibration_sample || calibration_sample),
            // The stored protocol always describes the current generated answer
            protocol: Some(protocol),
            ..Default::default()
        };
        let updated = self.candidates.update_candidate(candidate_id, &update).await?;

        info!(
            candidate_id,
            protocol = protocol.map(|p| p.as_str()).unwrap_or("none"),
            old_score = candidate.final_score,
            new_score = updated.final_score,
            "Regenerated candidate answer"
        );
        self.emit_rescored(&updated, "regenerate");
        self.publish_queue_counts().await;

        Ok(updated)
    }

    /// Count calibration samples and feed the learner
    ///
    /// A sample counts once, on its first review; re-reviews after an undo
    /// do not count again. Failures here never undo the review itself.
    async fn record_outcome(&self, candidate: &Candidate, outcome: ReviewOutcome) {
        if candidate.is_calibration_sample {
            self.count_calibration_sample(candidate.id).await;
        }

        if let Some(learning) = &self.learning {
            let record = ReviewRecord {
                candidate_id: candidate.id,
                final_score: candidate.final_score,
                routing: candidate.routing,
                outcome,
                timestamp: Utc::now(),
            };
            if let Err(e) = learning.record_review(record).await {
                warn!(candidate_id = candidate.id, error = %e, "Failed to record review for learning");
            }
        }
    }

    async fn count_calibration_sample(&self, candidate_id: i64) {
        match self.candidates.get_calibration_status().await {
            Ok(before) if before.is_complete => return,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Failed to read calibration status");
                return;
            }
        }

        match self.candidates.claim_calibration_sample(candidate_id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(candidate_id, "Calibration sample already counted");
                return;
            }
            Err(e) => {
                warn!(candidate_id, error = %e, "Failed to claim calibration sample");
                return;
            }
        }

        match self.candidates.increment_calibration_count().await {
            Ok(after) if after.is_complete => {
                info!(samples = after.samples_collected, "Calibration phase complete");
                self.events.emit_lossy(PipelineEvent::CalibrationCompleted {
                    samples_collected: after.samples_collected,
                    timestamp: Utc::now(),
                });
            }
            Ok(_) => {}
            Err(e) => warn!(candidate_id, error = %e, "Failed to count calibration sample"),
        }
    }

    async fn delete_faq_best_effort(&self, faq_id: &str) {
        match self.faq_store.delete_faq(faq_id).await {
            Ok(true) => debug!(faq_id, "Deleted FAQ"),
            Ok(false) => warn!(faq_id, "FAQ to delete was not found"),
            Err(e) => warn!(faq_id, error = %e, "Failed to delete FAQ, continuing"),
        }
    }

    fn emit_reviewed(&self, candidate_id: i64, action: &str, reviewer: Option<&str>, faq_id: Option<String>) {
        self.events.emit_lossy(PipelineEvent::CandidateReviewed {
            candidate_id,
            action: action.to_string(),
            reviewer: reviewer.map(str::to_string),
            faq_id,
            timestamp: Utc::now(),
        });
    }

    fn emit_rescored(&self, candidate: &Candidate, reason: &str) {
        self.events.emit_lossy(PipelineEvent::CandidateRescored {
            candidate_id: candidate.id,
            routing: candidate.routing.as_str().to_string(),
            final_score: candidate.final_score,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
    }
}

fn require_status(candidate: &Candidate, expected: ReviewStatus, verb: &str) -> PipelineResult<()> {
    if candidate.review_status == expected {
        Ok(())
    } else {
        Err(PipelineError::InvalidState(format!(
            "cannot {} candidate {}: status is {}, expected {}",
            verb, candidate.id, candidate.review_status, expected
        )))
    }
}
