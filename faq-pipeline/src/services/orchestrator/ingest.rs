//! Ingestion paths
//!
//! Every path funnels into [`PipelineOrchestrator::process_pair`]:
//! dedup gate, length gate, thread management, protocol detection,
//! generation, comparison, routing, persistence, side effects.

use chrono::{DateTime, Utc};
use faq_common::events::PipelineEvent;
use tracing::{error, info, warn};

use super::PipelineOrchestrator;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{
    BatchExtractionResult, BatchRequest, BisqConversation, ConversationThread, ExtractedFaq, MatrixAnswer,
    MessageType, NewCandidate, ProcessingResult, SkipReason, Source, ThreadState, TransitionTrigger,
};
use crate::services::{metrics, normalize, protocol_detector};

/// One question/answer pair on its way to becoming a candidate
#[derive(Debug, Clone)]
pub(crate) struct PairInput {
    pub source: Source,
    pub source_event_id: String,
    pub room_id: Option<String>,
    pub question_id: String,
    pub question_text: String,
    pub question_sender: Option<String>,
    pub question_timestamp: Option<DateTime<Utc>>,
    pub answer_id: String,
    pub answer_text: String,
    pub staff_sender: Option<String>,
    pub answer_timestamp: Option<DateTime<Utc>>,
    pub category: Option<String>,
    pub original_user_question: Option<String>,
    pub original_staff_answer: Option<String>,
}

/// Dedup key for a Bisq 2 answer
pub fn bisq_event_id(conversation_id: &str, answer_id: &str) -> String {
    format!("bisq2_{}_{}", conversation_id, answer_id)
}

impl PipelineOrchestrator {
    /// Ingest a Bisq 2 question with its staff answer
    pub async fn process_bisq_conversation(&self, conversation: &BisqConversation) -> PipelineResult<ProcessingResult> {
        let input = PairInput {
            source: Source::Bisq2,
            source_event_id: bisq_event_id(&conversation.thread_id, &conversation.answer.id),
            room_id: conversation.channel_id.clone(),
            question_id: conversation.question.id.clone(),
            question_text: conversation.question.text.clone(),
            question_sender: Some(conversation.question.sender.clone()),
            question_timestamp: conversation.question.timestamp,
            answer_id: conversation.answer.id.clone(),
            answer_text: conversation.answer.text.clone(),
            staff_sender: Some(conversation.answer.sender.clone()),
            answer_timestamp: conversation.answer.timestamp,
            category: None,
            original_user_question: None,
            original_staff_answer: None,
        };
        self.process_pair(input).await
    }

    /// Ingest a staff reply to a user question in a Matrix room
    pub async fn process_matrix_answer(&self, answer: &MatrixAnswer) -> PipelineResult<ProcessingResult> {
        let input = PairInput {
            source: Source::Matrix,
            source_event_id: answer.event_id.clone(),
            room_id: answer.room_id.clone(),
            question_id: answer.reply_to_event_id.clone(),
            question_text: answer.question_text.clone(),
            question_sender: answer.question_sender.clone(),
            question_timestamp: None,
            answer_id: answer.event_id.clone(),
            answer_text: answer.staff_answer.clone(),
            staff_sender: Some(answer.staff_sender.clone()),
            answer_timestamp: answer.timestamp,
            category: None,
            original_user_question: None,
            original_staff_answer: None,
        };
        self.process_pair(input).await
    }

    /// Ingest one pair returned by an extractor
    ///
    /// Extractor-polished text becomes the candidate text; the raw chat text
    /// is kept in `original_user_question` / `original_staff_answer`.
    pub async fn process_extracted_faq(
        &self,
        faq: &ExtractedFaq,
        source: Source,
        room_id: Option<&str>,
    ) -> PipelineResult<ProcessingResult> {
        let source_event_id = match source {
            Source::Bisq2 => bisq_event_id(&faq.question_msg_id, &faq.answer_msg_id),
            Source::Matrix => faq.answer_msg_id.clone(),
        };

        let input = PairInput {
            source,
            source_event_id,
            room_id: room_id.map(str::to_string),
            question_id: faq.question_msg_id.clone(),
            question_text: faq.question_text.clone(),
            question_sender: faq.question_sender.clone(),
            question_timestamp: None,
            answer_id: faq.answer_msg_id.clone(),
            answer_text: faq.answer_text.clone(),
            staff_sender: faq.answer_sender.clone(),
            answer_timestamp: faq.timestamp,
            category: faq.category.clone(),
            original_user_question: faq.original_question_text.clone(),
            original_staff_answer: faq.original_answer_text.clone(),
        };
        self.process_pair(input).await
    }

    /// Extract pairs from a raw batch and process each
    ///
    /// A failing item is logged and counted; the batch continues.
    pub async fn extract_faqs_batch(&self, request: &BatchRequest) -> PipelineResult<BatchExtractionResult> {
        let messages = normalize::normalize_batch(&request.messages);
        let extracted = self
            .extractor
            .extract(&messages, request.source, &request.staff_identifiers)
            .await
            .map_err(PipelineError::Extractor)?;

        info!(
            source = %request.source,
            messages = messages.len(),
            pairs = extracted.len(),
            "Extracted FAQ pairs from batch"
        );

        let mut result = BatchExtractionResult {
            extracted: extracted.len(),
            ..Default::default()
        };

        for faq in &extracted {
            match self
                .process_extracted_faq(faq, request.source, request.room_id.as_deref())
                .await
            {
                Ok(processed) => {
                    if processed.is_skipped() {
                        result.skipped += 1;
                    } else {
                        result.processed += 1;
                    }
                    result.results.push(processed);
                }
                Err(e) => {
                    error!(
                        question_id = %faq.question_msg_id,
                        answer_id = %faq.answer_msg_id,
                        error = %e,
                        "Failed to process extracted pair"
                    );
                    result.failed += 1;
                }
            }
        }

        info!(
            processed = result.processed,
            skipped = result.skipped,
            failed = result.failed,
            "Batch extraction complete"
        );
        Ok(result)
    }

    pub(crate) async fn process_pair(&self, input: PairInput) -> PipelineResult<ProcessingResult> {
        let source = input.source;
        let event_id = input.source_event_id.as_str();

        if self.candidates.exists_by_event_id(event_id).await? {
            return Ok(self.skipped(source, event_id, SkipReason::Duplicate));
        }

        if self.too_short(&input.question_text) || self.too_short(&input.answer_text) {
            return Ok(self.skipped(source, event_id, SkipReason::TooShort));
        }

        let thread = self.prepare_thread(&input).await?;
        if thread.candidate_id.is_some() {
            return Ok(self.skipped(source, event_id, SkipReason::ThreadHasCandidate));
        }
        // Fail before any collaborator call if the thread cannot take a candidate
        thread.state.apply(TransitionTrigger::CandidateCreated)?;

        let protocol =
            protocol_detector::detect_protocol_with_fallback(&input.question_text, &input.answer_text, source);

        let generated = self
            .generator
            .generate(&input.question_text, &[], protocol)
            .await
            .map_err(PipelineError::Generator)?;

        let comparison = self
            .compare_answers(
                event_id,
                &input.question_text,
                &input.answer_text,
                Some(generated.answer.as_str()),
            )
            .await?;

        let (routing, is_calibration_sample) = self.routing.determine_routing(comparison.final_score).await?;

        let new_candidate = NewCandidate {
            source,
            source_event_id: input.source_event_id.clone(),
            source_timestamp: input.answer_timestamp,
            question_text: input.question_text.clone(),
            staff_answer: input.answer_text.clone(),
            staff_sender: input.staff_sender.clone(),
            generated_answer: Some(generated.answer.clone()),
            generated_answer_sources: generated.sources.clone(),
            generation_confidence: generated.confidence,
            comparison,
            routing,
            is_calibration_sample,
            protocol,
            category: input.category.clone(),
            original_user_question: input.original_user_question.clone(),
            original_staff_answer: input.original_staff_answer.clone(),
        };

        let Some(candidate) = self.candidates.create(&new_candidate).await? else {
            // Another poll cycle created it while we were generating
            return Ok(self.skipped(source, event_id, SkipReason::Duplicate));
        };

        self.threads.link_thread_to_candidate(thread.id, candidate.id).await?;
        if let Err(e) = self.threads.mark_message_processed(thread.id, &input.answer_id).await {
            warn!(thread_id = thread.id, error = %e, "Failed to mark answer processed");
        }

        info!(
            candidate_id = candidate.id,
            event_id = %candidate.source_event_id,
            routing = %candidate.routing,
            final_score = candidate.final_score,
            calibration = candidate.is_calibration_sample,
            "Created FAQ candidate"
        );

        metrics::record_processed(candidate.routing, candidate.final_score);
        self.events.emit_lossy(PipelineEvent::CandidateCreated {
            candidate_id: candidate.id,
            source: source.as_str().to_string(),
            source_event_id: candidate.source_event_id.clone(),
            routing: candidate.routing.as_str().to_string(),
            final_score: candidate.final_score,
            is_calibration_sample: candidate.is_calibration_sample,
            timestamp: Utc::now(),
        });
        self.publish_queue_counts().await;

        Ok(ProcessingResult::from_candidate(&candidate))
    }

    /// Find or create the thread for a pair and record both messages
    async fn prepare_thread(&self, input: &PairInput) -> PipelineResult<ConversationThread> {
        let mut thread = match self.threads.find_thread_by_message(&input.question_id).await? {
            Some(thread) => thread,
            None => {
                let thread = self
                    .threads
                    .create_thread(input.source, &input.question_id, input.room_id.as_deref())
                    .await?;
                self.threads
                    .add_message_to_thread(
                        thread.id,
                        &input.question_id,
                        MessageType::Question,
                        &input.question_text,
                        input.question_sender.as_deref(),
                        input.question_timestamp,
                    )
                    .await?;
                thread
            }
        };

        if thread.state == ThreadState::PendingQuestion {
            let trigger = TransitionTrigger::StaffAnswerReceived;
            let next = thread.state.apply(trigger)?;
            thread = self
                .threads
                .transition_thread_state(
                    thread.id,
                    next,
                    trigger,
                    Some(serde_json::json!({ "answer_id": input.answer_id })),
                )
                .await?;
        }

        self.threads
            .add_message_to_thread(
                thread.id,
                &input.answer_id,
                MessageType::StaffAnswer,
                &input.answer_text,
                input.staff_sender.as_deref(),
                input.answer_timestamp,
            )
            .await?;

        Ok(thread)
    }
}
