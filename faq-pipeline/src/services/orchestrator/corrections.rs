//! Staff corrections
//!
//! Two separate paths:
//!
//! - pre-approval ([`process_correction`](PipelineOrchestrator::process_correction)):
//!   the linked candidate is not approved yet, so it is re-scored in place
//!   against its existing generated answer
//! - post-approval ([`process_post_approval_correction`](PipelineOrchestrator::process_post_approval_correction)):
//!   the thread is closed with a FAQ; the thread is reopened and the FAQ is
//!   flagged, never edited
//!
//! The pre-approval path decides on `candidate.review_status`, the
//! post-approval path on `thread.state` plus `thread.faq_id`.

use chrono::Utc;
use faq_common::events::PipelineEvent;
use tracing::{info, warn};

use super::PipelineOrchestrator;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{
    CandidateUpdate, ConversationThread, CorrectionEvent, CorrectionOutcome, FlaggedFaq, MessageType,
    PostApprovalCorrectionResult, ProcessingResult, ResolveAction, ReviewStatus, SkipReason, ThreadState,
    TransitionTrigger,
};
use crate::services::metrics;

/// Correction text kept in the thread's `correction_reason`
const REASON_EXCERPT_CHARS: usize = 200;

impl PipelineOrchestrator {
    /// Route a correction to whichever path applies
    ///
    /// A closed thread with a FAQ takes the post-approval path; everything
    /// else goes through [`process_correction`](Self::process_correction).
    pub async fn handle_correction(&self, correction: &CorrectionEvent) -> PipelineResult<CorrectionOutcome> {
        if let Some(result) = self.process_post_approval_correction(correction).await? {
            return Ok(CorrectionOutcome::PostApproval(result));
        }
        Ok(CorrectionOutcome::PreApproval(self.process_correction(correction).await?))
    }

    /// Apply a correction to a candidate that is still under review
    pub async fn process_correction(&self, correction: &CorrectionEvent) -> PipelineResult<ProcessingResult> {
        let source = correction.source;
        let event_id = correction.event_id.as_str();

        let Some(thread) = self.threads.find_thread_by_message(&correction.reply_to_id).await? else {
            return Ok(self.skipped(source, event_id, SkipReason::NoExistingThread));
        };
        let Some(candidate_id) = thread.candidate_id else {
            return Ok(self.skipped(source, event_id, SkipReason::NoCandidateForThread));
        };
        let candidate = self.get_candidate(candidate_id).await?;
        if candidate.review_status == ReviewStatus::Approved {
            return Ok(self.skipped(source, event_id, SkipReason::CandidateAlreadyApproved));
        }

        // A thread left in has_correction by an interrupted attempt resumes here
        let resuming = thread.state == ThreadState::HasCorrection;
        if !resuming {
            thread.state.apply(TransitionTrigger::CorrectionReceived)?;
        }

        let already_stored = self
            .threads
            .get_thread_messages(thread.id)
            .await?
            .iter()
            .any(|m| m.message_id == event_id);
        if already_stored && !resuming {
            return Ok(self.skipped(source, event_id, SkipReason::Duplicate));
        }

        // Collaborator calls come before any thread write, so a failure
        // leaves the thread where it was and the event can be retried
        let comparison = self
            .compare_answers(
                &candidate.source_event_id,
                candidate.effective_question(),
                &correction.content,
                candidate.generated_answer.as_deref(),
            )
            .await?;
        let (routing, calibration_sample) = self.routing.determine_routing(comparison.final_score).await?;

        self.threads
            .add_message_to_thread(
                thread.id,
                event_id,
                MessageType::Correction,
                &correction.content,
                Some(&correction.staff_sender),
                correction.timestamp,
            )
            .await?;

        let thread = if resuming {
            thread
        } else {
            self.threads
                .transition_thread_state(
                    thread.id,
                    ThreadState::HasCorrection,
                    TransitionTrigger::CorrectionReceived,
                    Some(serde_json::json!({ "correction_event_id": event_id })),
                )
                .await?
        };

        let update = CandidateUpdate {
            staff_answer: Some(correction.content.clone()),
            comparison: Some(comparison),
            routing: Some(routing),
            is_calibration_sample: Some(candidate.is_calibration_sample || calibration_sample),
            has_correction: Some(true),
            ..Default::default()
        };
        let updated = self.candidates.update_candidate(candidate.id, &update).await?;

        let back = thread.state.apply(TransitionTrigger::CandidateCreated)?;
        self.threads
            .transition_thread_state(
                thread.id,
                back,
                TransitionTrigger::CandidateCreated,
                Some(serde_json::json!({ "candidate_id": updated.id, "rescored": true })),
            )
            .await?;
        if let Err(e) = self.threads.mark_message_processed(thread.id, event_id).await {
            warn!(thread_id = thread.id, error = %e, "Failed to mark correction processed");
        }

        info!(
            candidate_id = updated.id,
            event_id = %event_id,
            old_score = candidate.final_score,
            new_score = updated.final_score,
            routing = %updated.routing,
            "Applied staff correction"
        );

        metrics::record_processed(updated.routing, updated.final_score);
        self.events.emit_lossy(PipelineEvent::CandidateRescored {
            candidate_id: updated.id,
            routing: updated.routing.as_str().to_string(),
            final_score: updated.final_score,
            reason: "correction".to_string(),
            timestamp: Utc::now(),
        });
        self.publish_queue_counts().await;

        Ok(ProcessingResult::from_candidate(&updated))
    }

    /// Flag an approved FAQ whose answer staff corrected afterwards
    ///
    /// Returns `None` when the thread is unknown, not closed, or has no FAQ.
    pub async fn process_post_approval_correction(
        &self,
        correction: &CorrectionEvent,
    ) -> PipelineResult<Option<PostApprovalCorrectionResult>> {
        let Some(thread) = self.threads.find_thread_by_message(&correction.reply_to_id).await? else {
            return Ok(None);
        };
        if thread.state != ThreadState::Closed {
            return Ok(None);
        }
        let Some(faq_id) = thread.faq_id.clone() else {
            return Ok(None);
        };

        let reopened = thread.state.apply(TransitionTrigger::StaffCorrection)?;
        debug_assert_eq!(reopened, ThreadState::ReopenedForCorrection);

        let stored = self
            .threads
            .add_message_to_thread(
                thread.id,
                &correction.event_id,
                MessageType::PostApprovalCorrection,
                &correction.content,
                Some(&correction.staff_sender),
                correction.timestamp,
            )
            .await?;

        let reason = correction_reason(&correction.staff_sender, &correction.content);
        self.threads
            .reopen_thread_for_correction(thread.id, &reason, TransitionTrigger::StaffCorrection)
            .await?;

        info!(
            thread_id = thread.id,
            faq_id = %faq_id,
            event_id = %correction.event_id,
            "Approved FAQ flagged by staff correction"
        );
        self.events.emit_lossy(PipelineEvent::FaqFlagged {
            thread_id: thread.id,
            faq_id: faq_id.clone(),
            correction_reason: reason.clone(),
            timestamp: Utc::now(),
        });

        Ok(Some(PostApprovalCorrectionResult {
            thread_id: thread.id,
            faq_id,
            faq_flagged: true,
            correction_stored: stored,
            correction_reason: reason,
        }))
    }

    /// Threads reopened by a post-approval correction, newest first
    pub async fn get_flagged_faqs(&self) -> PipelineResult<Vec<FlaggedFaq>> {
        let threads = self
            .threads
            .get_threads_by_state(ThreadState::ReopenedForCorrection)
            .await?;

        let mut flagged = Vec::with_capacity(threads.len());
        for thread in threads {
            let latest_correction = self
                .threads
                .latest_message_of_type(thread.id, MessageType::PostApprovalCorrection)
                .await?;
            flagged.push(FlaggedFaq {
                thread_id: thread.id,
                faq_id: thread.faq_id,
                source: thread.source,
                candidate_id: thread.candidate_id,
                correction_reason: thread.correction_reason,
                latest_correction,
                flagged_at: thread.updated_at,
            });
        }
        Ok(flagged)
    }

    /// Settle a flagged FAQ; the thread ends in `closed_updated`
    ///
    /// `update` writes `updated_answer` (or the latest correction text when
    /// none is given) to the FAQ; `confirm` keeps it; `delete` removes it.
    pub async fn resolve_flagged_faq(
        &self,
        thread_id: i64,
        action: ResolveAction,
        updated_answer: Option<&str>,
        reviewer: &str,
    ) -> PipelineResult<ConversationThread> {
        let thread = self
            .threads
            .get_thread(thread_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("thread {}", thread_id)))?;
        let trigger = action.trigger();
        let next = thread.state.apply(trigger)?;
        let faq_id = thread
            .faq_id
            .clone()
            .ok_or_else(|| PipelineError::InvalidState(format!("thread {} has no linked FAQ", thread_id)))?;

        match action {
            ResolveAction::Update => {
                let answer = match updated_answer {
                    Some(answer) if !answer.trim().is_empty() => answer.to_string(),
                    _ => self
                        .threads
                        .latest_message_of_type(thread_id, MessageType::PostApprovalCorrection)
                        .await?
                        .map(|m| m.content)
                        .ok_or_else(|| {
                            PipelineError::InvalidState(format!("thread {} has no correction to apply", thread_id))
                        })?,
                };
                self.faq_store
                    .update_faq_answer(&faq_id, &answer)
                    .await
                    .map_err(PipelineError::FaqStore)?;
                if let Some(candidate_id) = thread.candidate_id {
                    let update = CandidateUpdate {
                        edited_staff_answer: Some(answer),
                        has_correction: Some(true),
                        ..Default::default()
                    };
                    self.candidates.update_candidate(candidate_id, &update).await?;
                }
            }
            ResolveAction::Confirm => {}
            ResolveAction::Delete => {
                let deleted = self
                    .faq_store
                    .delete_faq(&faq_id)
                    .await
                    .map_err(PipelineError::FaqStore)?;
                if !deleted {
                    warn!(faq_id = %faq_id, "Flagged FAQ was already gone");
                }
            }
        }

        let resolved = self
            .threads
            .transition_thread_state(
                thread_id,
                next,
                trigger,
                Some(serde_json::json!({ "action": action.as_str(), "reviewer": reviewer })),
            )
            .await?;

        info!(thread_id, faq_id = %faq_id, action = action.as_str(), reviewer, "Resolved flagged FAQ");
        metrics::record_review(match action {
            ResolveAction::Update => "resolve_update",
            ResolveAction::Confirm => "resolve_confirm",
            ResolveAction::Delete => "resolve_delete",
        });
        self.events.emit_lossy(PipelineEvent::FaqResolved {
            thread_id,
            faq_id,
            action: action.as_str().to_string(),
            timestamp: Utc::now(),
        });

        Ok(resolved)
    }
}

fn correction_reason(staff_sender: &str, content: &str) -> String {
    let excerpt: String = content.trim().chars().take(REASON_EXCERPT_CHARS).collect();
    format!("Staff correction from {}: {}", staff_sender, excerpt)
}
