//! End-to-end orchestrator behavior with mock collaborators

mod helpers;

use faq_common::events::PipelineEvent;
use faq_pipeline::models::{
    CorrectionOutcome, MessageType, Protocol, ResolveAction, ReviewStatus, Routing, SkipReason, Source, ThreadState,
    TransitionTrigger, UndoAction,
};
use faq_pipeline::PipelineError;
use helpers::{
    bisq_conversation, correction, create_test_pipeline, end_calibration, matrix_answer, WALLET_ANSWER,
    WALLET_QUESTION,
};
use std::sync::atomic::Ordering;

#[tokio::test]
async fn test_wallet_restore_routes_to_full_review_during_calibration() {
    let pipeline = create_test_pipeline(0.92).await.unwrap();

    let result = pipeline
        .orchestrator
        .process_bisq_conversation(&bisq_conversation("c1", WALLET_QUESTION, WALLET_ANSWER))
        .await
        .unwrap();

    assert!(!result.is_skipped());
    assert_eq!(result.routing, Routing::FullReview);
    let candidate = pipeline
        .orchestrator
        .get_candidate(result.candidate_id.unwrap())
        .await
        .unwrap();
    assert!(candidate.is_calibration_sample);
    assert_eq!(candidate.final_score, 0.92);
    assert_eq!(candidate.source_event_id, "bisq2_c1_c1-a");
    assert_eq!(candidate.protocol, Some(Protocol::BisqEasy));
}

#[tokio::test]
async fn test_wallet_restore_auto_approves_after_calibration() {
    let pipeline = create_test_pipeline(0.92).await.unwrap();
    end_calibration(&pipeline).await;

    let result = pipeline
        .orchestrator
        .process_bisq_conversation(&bisq_conversation("c2", WALLET_QUESTION, WALLET_ANSWER))
        .await
        .unwrap();

    assert_eq!(result.routing, Routing::AutoApprove);
    let candidate = pipeline
        .orchestrator
        .get_candidate(result.candidate_id.unwrap())
        .await
        .unwrap();
    assert!(!candidate.is_calibration_sample);
    assert_eq!(pipeline.orchestrator.get_queue_counts(None).await.unwrap().auto_approve, 1);
}

#[tokio::test]
async fn test_dao_question_in_bisq2_chat_uses_multisig_protocol() {
    let pipeline = create_test_pipeline(0.8).await.unwrap();

    pipeline
        .orchestrator
        .process_bisq_conversation(&bisq_conversation(
            "dao1",
            "How can I vote on DAO proposals with my BSQ?",
            "Open the DAO tab in Bisq 1, go to Governance and cast your vote.",
        ))
        .await
        .unwrap();
    assert_eq!(pipeline.generator.last_protocol(), Some(Protocol::MultisigV1));

    pipeline
        .orchestrator
        .process_bisq_conversation(&bisq_conversation("plain1", WALLET_QUESTION, WALLET_ANSWER))
        .await
        .unwrap();
    assert_eq!(pipeline.generator.last_protocol(), Some(Protocol::BisqEasy));

    pipeline
        .orchestrator
        .process_matrix_answer(&matrix_answer("$a1", "$q1", WALLET_QUESTION, WALLET_ANSWER))
        .await
        .unwrap();
    assert_eq!(pipeline.generator.last_protocol(), None);
}

#[tokio::test]
async fn test_duplicate_event_is_skipped_before_any_collaborator_call() {
    let pipeline = create_test_pipeline(0.8).await.unwrap();
    let conversation = bisq_conversation("dup", WALLET_QUESTION, WALLET_ANSWER);

    let first = pipeline.orchestrator.process_bisq_conversation(&conversation).await.unwrap();
    let second = pipeline.orchestrator.process_bisq_conversation(&conversation).await.unwrap();

    assert!(!first.is_skipped());
    assert_eq!(second.skipped_reason, Some(SkipReason::Duplicate));
    assert_eq!(pipeline.generator.call_count(), 1);
    assert_eq!(pipeline.comparison.call_count(), 1);
    assert_eq!(pipeline.orchestrator.count_pending_reviews(None, None).await.unwrap(), 1);
}

#[tokio::test]
async fn test_short_text_is_skipped() {
    let pipeline = create_test_pipeline(0.8).await.unwrap();

    let result = pipeline
        .orchestrator
        .process_bisq_conversation(&bisq_conversation("short", WALLET_QUESTION, "yes"))
        .await
        .unwrap();

    assert_eq!(result.skipped_reason, Some(SkipReason::TooShort));
    assert_eq!(pipeline.generator.call_count(), 0);
}

#[tokio::test]
async fn test_empty_generated_answer_scores_zero_without_comparison() {
    let pipeline = create_test_pipeline(0.9).await.unwrap();
    end_calibration(&pipeline).await;
    pipeline.generator.set_answer("   ");

    let result = pipeline
        .orchestrator
        .process_bisq_conversation(&bisq_conversation("empty", WALLET_QUESTION, WALLET_ANSWER))
        .await
        .unwrap();

    assert_eq!(pipeline.comparison.call_count(), 0);
    assert_eq!(result.final_score, 0.0);
    assert_eq!(result.routing, Routing::FullReview);
    let candidate = pipeline
        .orchestrator
        .get_candidate(result.candidate_id.unwrap())
        .await
        .unwrap();
    assert!(candidate.llm_reasoning.unwrap().contains("empty response"));
}

#[tokio::test]
async fn test_second_answer_in_thread_does_not_create_candidate() {
    let pipeline = create_test_pipeline(0.8).await.unwrap();

    let first = pipeline
        .orchestrator
        .process_matrix_answer(&matrix_answer("$a1", "$q1", WALLET_QUESTION, WALLET_ANSWER))
        .await
        .unwrap();
    let second = pipeline
        .orchestrator
        .process_matrix_answer(&matrix_answer(
            "$a2",
            "$q1",
            WALLET_QUESTION,
            "You can also restore from a backup file in the data directory.",
        ))
        .await
        .unwrap();

    assert!(!first.is_skipped());
    assert_eq!(second.skipped_reason, Some(SkipReason::ThreadHasCandidate));
    assert_eq!(pipeline.generator.call_count(), 1);

    let thread = pipeline.threads().find_thread_by_message("$q1").await.unwrap().unwrap();
    assert_eq!(thread.candidate_id, first.candidate_id);
    assert_eq!(thread.state, ThreadState::CandidateCreated);
    // The extra answer is still recorded on the thread
    assert!(pipeline.threads().find_thread_by_message("$a2").await.unwrap().is_some());
}

#[tokio::test]
async fn test_pre_approval_correction_rescores_without_regenerating() {
    let pipeline = create_test_pipeline(0.4).await.unwrap();
    let created = pipeline
        .orchestrator
        .process_matrix_answer(&matrix_answer("$a1", "$q1", WALLET_QUESTION, WALLET_ANSWER))
        .await
        .unwrap();
    let candidate_id = created.candidate_id.unwrap();

    pipeline.comparison.set_score(0.85);
    let fix = correction(
        Source::Matrix,
        "$fix1",
        "$a1",
        "Correction: you need all 12 seed words plus the wallet password if you set one.",
    );
    let outcome = pipeline.orchestrator.handle_correction(&fix).await.unwrap();

    let result = match outcome {
        CorrectionOutcome::PreApproval(result) => result,
        other => panic!("expected pre-approval path, got {:?}", other),
    };
    assert_eq!(result.candidate_id, Some(candidate_id));
    assert_eq!(pipeline.generator.call_count(), 1);
    assert_eq!(pipeline.comparison.call_count(), 2);
    assert_eq!(
        pipeline.comparison.staff_answers.lock().unwrap().last().map(String::as_str),
        Some(fix.content.as_str())
    );

    let candidate = pipeline.orchestrator.get_candidate(candidate_id).await.unwrap();
    assert_eq!(candidate.staff_answer, fix.content);
    assert!(candidate.has_correction);
    assert_eq!(candidate.final_score, 0.85);
    assert_eq!(candidate.review_status, ReviewStatus::Pending);

    let thread = pipeline.threads().find_thread_by_candidate(candidate_id).await.unwrap().unwrap();
    assert_eq!(thread.state, ThreadState::CandidateCreated);
    let states: Vec<_> = pipeline
        .threads()
        .get_state_transitions(thread.id)
        .await
        .unwrap()
        .iter()
        .map(|t| t.to_state)
        .collect();
    assert!(states.contains(&ThreadState::HasCorrection));

    // Re-polling the same correction changes nothing
    let again = pipeline.orchestrator.process_correction(&fix).await.unwrap();
    assert_eq!(again.skipped_reason, Some(SkipReason::Duplicate));
    assert_eq!(pipeline.comparison.call_count(), 2);
}

#[tokio::test]
async fn test_correction_without_thread_is_skipped() {
    let pipeline = create_test_pipeline(0.8).await.unwrap();

    let outcome = pipeline
        .orchestrator
        .handle_correction(&correction(Source::Matrix, "$fix", "$nowhere", "Actually it is different now."))
        .await
        .unwrap();

    match outcome {
        CorrectionOutcome::PreApproval(result) => {
            assert_eq!(result.skipped_reason, Some(SkipReason::NoExistingThread))
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn test_post_approval_correction_flags_faq_without_touching_it() {
    let pipeline = create_test_pipeline(0.8).await.unwrap();
    let created = pipeline
        .orchestrator
        .process_matrix_answer(&matrix_answer("$a1", "$q1", WALLET_QUESTION, WALLET_ANSWER))
        .await
        .unwrap();
    let candidate_id = created.candidate_id.unwrap();
    let approved = pipeline
        .orchestrator
        .approve_candidate(candidate_id, "alice")
        .await
        .unwrap();
    let faq_id = approved.faq_id.clone().unwrap();
    let mutations_after_approval = pipeline.faq_store.mutation_count();

    let mut events = pipeline.events.subscribe();
    let fix = correction(
        Source::Matrix,
        "$fix2",
        "$a1",
        "Update: newer versions ask for 24 seed words, not 12.",
    );
    let outcome = pipeline.orchestrator.handle_correction(&fix).await.unwrap();

    let result = match outcome {
        CorrectionOutcome::PostApproval(result) => result,
        other => panic!("expected post-approval path, got {:?}", other),
    };
    assert_eq!(result.faq_id, faq_id);
    assert!(result.faq_flagged);
    assert!(result.correction_stored);
    assert!(result.correction_reason.starts_with("Staff correction from @staff:matrix.org: "));

    assert_eq!(pipeline.faq_store.mutation_count(), mutations_after_approval);
    assert_eq!(pipeline.generator.call_count(), 1);
    let candidate = pipeline.orchestrator.get_candidate(candidate_id).await.unwrap();
    assert_eq!(candidate.review_status, ReviewStatus::Approved);
    assert_eq!(candidate.staff_answer, WALLET_ANSWER);

    let flagged = pipeline.orchestrator.get_flagged_faqs().await.unwrap();
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].faq_id.as_deref(), Some(faq_id.as_str()));
    let latest = flagged[0].latest_correction.as_ref().unwrap();
    assert_eq!(latest.message_type, MessageType::PostApprovalCorrection);
    assert_eq!(latest.content, fix.content);

    let event = events.recv().await.unwrap();
    assert!(matches!(event, PipelineEvent::FaqFlagged { .. }));
}

#[tokio::test]
async fn test_resolving_flagged_faq_with_update_writes_correction() {
    let pipeline = create_test_pipeline(0.8).await.unwrap();
    let created = pipeline
        .orchestrator
        .process_matrix_answer(&matrix_answer("$a1", "$q1", WALLET_QUESTION, WALLET_ANSWER))
        .await
        .unwrap();
    let candidate_id = created.candidate_id.unwrap();
    pipeline.orchestrator.approve_candidate(candidate_id, "alice").await.unwrap();
    let fix = correction(Source::Matrix, "$fix3", "$a1", "Newer wallets use 24 seed words, enter all of them.");
    let flag = match pipeline.orchestrator.handle_correction(&fix).await.unwrap() {
        CorrectionOutcome::PostApproval(flag) => flag,
        other => panic!("expected post-approval path, got {:?}", other),
    };

    let thread = pipeline
        .orchestrator
        .resolve_flagged_faq(flag.thread_id, ResolveAction::Update, None, "bob")
        .await
        .unwrap();

    assert_eq!(thread.state, ThreadState::ClosedUpdated);
    assert_eq!(pipeline.faq_store.updates.load(Ordering::SeqCst), 1);
    let faq = faq_pipeline::services::FaqStore::get_faq(pipeline.faq_store.as_ref(), &flag.faq_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(faq.item.answer, fix.content);
    let candidate = pipeline.orchestrator.get_candidate(candidate_id).await.unwrap();
    assert_eq!(candidate.edited_staff_answer.as_deref(), Some(fix.content.as_str()));
    assert!(pipeline.orchestrator.get_flagged_faqs().await.unwrap().is_empty());

    // Resolving twice is an illegal transition
    let again = pipeline
        .orchestrator
        .resolve_flagged_faq(flag.thread_id, ResolveAction::Confirm, None, "bob")
        .await;
    assert!(matches!(again, Err(PipelineError::InvalidState(_))));
}

#[tokio::test]
async fn test_undo_approval_restores_previous_state() {
    let pipeline = create_test_pipeline(0.8).await.unwrap();
    let created = pipeline
        .orchestrator
        .process_matrix_answer(&matrix_answer("$a1", "$q1", WALLET_QUESTION, WALLET_ANSWER))
        .await
        .unwrap();
    let candidate_id = created.candidate_id.unwrap();
    let before = pipeline.orchestrator.get_candidate(candidate_id).await.unwrap();

    pipeline.orchestrator.approve_candidate(candidate_id, "alice").await.unwrap();
    assert_eq!(pipeline.faq_store.len().await, 1);

    let undone = pipeline
        .orchestrator
        .undo_action(candidate_id, UndoAction::Approve, None)
        .await
        .unwrap();

    assert_eq!(undone.review_status, ReviewStatus::Pending);
    assert!(undone.faq_id.is_none());
    assert!(undone.reviewed_by.is_none());
    assert_eq!(undone.routing, before.routing);
    assert_eq!(undone.final_score, before.final_score);
    assert_eq!(pipeline.faq_store.len().await, 0);

    let thread = pipeline.threads().find_thread_by_candidate(candidate_id).await.unwrap().unwrap();
    assert_eq!(thread.state, ThreadState::CandidateCreated);
    assert!(thread.faq_id.is_none());

    // Approving again goes through cleanly
    let approved = pipeline.orchestrator.approve_candidate(candidate_id, "alice").await.unwrap();
    assert_eq!(approved.review_status, ReviewStatus::Approved);
}

#[tokio::test]
async fn test_undo_reject_and_wrong_status() {
    let pipeline = create_test_pipeline(0.8).await.unwrap();
    let created = pipeline
        .orchestrator
        .process_bisq_conversation(&bisq_conversation("r1", WALLET_QUESTION, WALLET_ANSWER))
        .await
        .unwrap();
    let candidate_id = created.candidate_id.unwrap();

    let wrong = pipeline
        .orchestrator
        .undo_action(candidate_id, UndoAction::Approve, None)
        .await;
    assert!(matches!(wrong, Err(PipelineError::InvalidState(_))));

    let rejected = pipeline
        .orchestrator
        .reject_candidate(candidate_id, "alice", Some("not a FAQ"))
        .await
        .unwrap();
    assert_eq!(rejected.review_status, ReviewStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("not a FAQ"));

    let undone = pipeline
        .orchestrator
        .undo_action(candidate_id, UndoAction::Reject, None)
        .await
        .unwrap();
    assert_eq!(undone.review_status, ReviewStatus::Pending);
    assert!(undone.rejection_reason.is_none());
}

#[tokio::test]
async fn test_skip_moves_item_behind_queue() {
    let pipeline = create_test_pipeline(0.5).await.unwrap();
    let mut ids = Vec::new();
    for n in 0..3 {
        let result = pipeline
            .orchestrator
            .process_bisq_conversation(&bisq_conversation(
                &format!("s{}", n),
                &format!("{} (case {})", WALLET_QUESTION, n),
                WALLET_ANSWER,
            ))
            .await
            .unwrap();
        ids.push(result.candidate_id.unwrap());
    }

    let head = pipeline.orchestrator.get_current_item(None, None).await.unwrap().unwrap();
    assert_eq!(head.id, ids[0]);

    pipeline.orchestrator.skip_candidate(ids[0]).await.unwrap();
    let head = pipeline.orchestrator.get_current_item(None, None).await.unwrap().unwrap();
    assert_eq!(head.id, ids[1]);

    let order: Vec<i64> = pipeline
        .orchestrator
        .get_pending_reviews(None, None, 10, 0)
        .await
        .unwrap()
        .iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(order, vec![ids[1], ids[2], ids[0]]);

    let undone = pipeline
        .orchestrator
        .undo_action(ids[0], UndoAction::Skip, None)
        .await
        .unwrap();
    assert_eq!(undone.skip_order, 0);
    let head = pipeline.orchestrator.get_current_item(None, None).await.unwrap().unwrap();
    assert_eq!(head.id, ids[0]);
}

#[tokio::test]
async fn test_duplicate_faq_gate_blocks_approval_unless_forced() {
    let pipeline = create_test_pipeline(0.8).await.unwrap();
    let first = pipeline
        .orchestrator
        .process_bisq_conversation(&bisq_conversation("g1", WALLET_QUESTION, WALLET_ANSWER))
        .await
        .unwrap();
    let second = pipeline
        .orchestrator
        .process_bisq_conversation(&bisq_conversation("g2", WALLET_QUESTION, WALLET_ANSWER))
        .await
        .unwrap();

    pipeline
        .orchestrator
        .approve_candidate(first.candidate_id.unwrap(), "alice")
        .await
        .unwrap();

    let blocked = pipeline
        .orchestrator
        .approve_candidate(second.candidate_id.unwrap(), "alice")
        .await;
    match blocked {
        Err(PipelineError::DuplicateFaq {
            candidate_id,
            similar_faqs,
        }) => {
            assert_eq!(candidate_id, second.candidate_id.unwrap());
            assert_eq!(similar_faqs.len(), 1);
            assert!(similar_faqs[0].similarity >= 0.85);
        }
        other => panic!("expected duplicate gate, got {:?}", other),
    }
    assert_eq!(
        pipeline
            .orchestrator
            .get_candidate(second.candidate_id.unwrap())
            .await
            .unwrap()
            .review_status,
        ReviewStatus::Pending
    );

    let forced = pipeline
        .orchestrator
        .approve_candidate_force(second.candidate_id.unwrap(), "alice")
        .await
        .unwrap();
    assert_eq!(forced.review_status, ReviewStatus::Approved);
    assert_eq!(pipeline.faq_store.len().await, 2);
}

#[tokio::test]
async fn test_calibration_completes_after_required_reviews() {
    let pipeline = create_test_pipeline(0.92).await.unwrap();
    pipeline
        .candidates()
        .apply_calibration_settings(Some(2), None, None)
        .await
        .unwrap();
    let mut events = pipeline.events.subscribe();

    let a = pipeline
        .orchestrator
        .process_bisq_conversation(&bisq_conversation("k1", WALLET_QUESTION, WALLET_ANSWER))
        .await
        .unwrap();
    let b = pipeline
        .orchestrator
        .process_bisq_conversation(&bisq_conversation(
            "k2",
            "Where can I find my trade history in the app?",
            "Open Portfolio and select the History tab to see closed trades.",
        ))
        .await
        .unwrap();
    assert_eq!(a.routing, Routing::FullReview);
    assert_eq!(b.routing, Routing::FullReview);

    pipeline
        .orchestrator
        .approve_candidate(a.candidate_id.unwrap(), "alice")
        .await
        .unwrap();
    assert!(!pipeline.orchestrator.get_calibration_status().await.unwrap().is_complete);
    pipeline
        .orchestrator
        .reject_candidate(b.candidate_id.unwrap(), "alice", None)
        .await
        .unwrap();

    let status = pipeline.orchestrator.get_calibration_status().await.unwrap();
    assert!(status.is_complete);
    assert_eq!(status.samples_collected, 2);

    let mut saw_completion = false;
    while let Ok(event) = events.try_recv() {
        if let PipelineEvent::CalibrationCompleted { samples_collected, .. } = event {
            assert_eq!(samples_collected, 2);
            saw_completion = true;
        }
    }
    assert!(saw_completion);

    let c = pipeline
        .orchestrator
        .process_bisq_conversation(&bisq_conversation(
            "k3",
            "How long does a fiat payment usually take to arrive?",
            "SEPA usually takes one to two business days, Instant SEPA is faster.",
        ))
        .await
        .unwrap();
    assert_eq!(c.routing, Routing::AutoApprove);
}

#[tokio::test]
async fn test_edit_answer_rescores_candidate() {
    let pipeline = create_test_pipeline(0.5).await.unwrap();
    let created = pipeline
        .orchestrator
        .process_bisq_conversation(&bisq_conversation("e1", WALLET_QUESTION, WALLET_ANSWER))
        .await
        .unwrap();
    let candidate_id = created.candidate_id.unwrap();

    pipeline.comparison.set_score(0.7);
    let updated = pipeline
        .orchestrator
        .update_candidate(
            candidate_id,
            faq_pipeline::models::CandidateUpdate {
                edited_staff_answer: Some("Settings > Wallet > Restore, then enter the seed words.".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.final_score, 0.7);
    assert_eq!(pipeline.comparison.call_count(), 2);

    // Category-only edits do not re-score
    pipeline
        .orchestrator
        .update_candidate(
            candidate_id,
            faq_pipeline::models::CandidateUpdate {
                category: Some("Wallet".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(pipeline.comparison.call_count(), 2);
}

#[tokio::test]
async fn test_regenerate_uses_explicit_protocol() {
    let pipeline = create_test_pipeline(0.6).await.unwrap();
    let created = pipeline
        .orchestrator
        .process_bisq_conversation(&bisq_conversation("rg", WALLET_QUESTION, WALLET_ANSWER))
        .await
        .unwrap();

    let regenerated = pipeline
        .orchestrator
        .regenerate_candidate_answer(created.candidate_id.unwrap(), Some(Protocol::MultisigV1))
        .await
        .unwrap();

    assert_eq!(pipeline.generator.call_count(), 2);
    assert_eq!(pipeline.generator.last_protocol(), Some(Protocol::MultisigV1));
    assert_eq!(regenerated.protocol, Some(Protocol::MultisigV1));
}

#[tokio::test]
async fn test_generator_failure_propagates_on_single_item_path() {
    let pipeline = create_test_pipeline(0.8).await.unwrap();
    pipeline.generator.fail_on("restore");

    let result = pipeline
        .orchestrator
        .process_bisq_conversation(&bisq_conversation("f1", WALLET_QUESTION, WALLET_ANSWER))
        .await;

    assert!(matches!(result, Err(PipelineError::Generator(_))));
    assert_eq!(pipeline.orchestrator.count_pending_reviews(None, None).await.unwrap(), 0);
}

#[tokio::test]
async fn test_pipeline_stats_aggregate_state() {
    let pipeline = create_test_pipeline(0.8).await.unwrap();
    pipeline
        .orchestrator
        .process_bisq_conversation(&bisq_conversation("st", WALLET_QUESTION, WALLET_ANSWER))
        .await
        .unwrap();

    let stats = pipeline.orchestrator.get_pipeline_stats().await.unwrap();
    assert_eq!(stats.queue_counts.full_review, 1);
    assert_eq!(stats.status_counts.pending, 1);
    assert_eq!(stats.threads_by_state.get("candidate_created"), Some(&1));
    assert_eq!(stats.flagged_faqs, 0);
    assert!(!stats.calibration.is_complete);
}

#[tokio::test]
async fn test_failed_correction_comparison_can_be_retried() {
    let pipeline = create_test_pipeline(0.4).await.unwrap();
    let created = pipeline
        .orchestrator
        .process_matrix_answer(&matrix_answer("$a1", "$q1", WALLET_QUESTION, WALLET_ANSWER))
        .await
        .unwrap();
    let candidate_id = created.candidate_id.unwrap();

    pipeline.comparison.set_score(0.85);
    pipeline.comparison.fail_next(1);
    let fix = correction(
        Source::Matrix,
        "$fix1",
        "$a1",
        "Correction: restore needs the seed words and the wallet password if one was set.",
    );

    let failed = pipeline.orchestrator.process_correction(&fix).await;
    assert!(matches!(failed, Err(PipelineError::Comparison(_))));

    // Nothing was written, so the thread still accepts corrections
    let thread = pipeline.threads().find_thread_by_candidate(candidate_id).await.unwrap().unwrap();
    assert_eq!(thread.state, ThreadState::CandidateCreated);
    let messages = pipeline.threads().get_thread_messages(thread.id).await.unwrap();
    assert!(messages.iter().all(|m| m.message_id != "$fix1"));

    let retried = pipeline.orchestrator.process_correction(&fix).await.unwrap();
    assert_eq!(retried.candidate_id, Some(candidate_id));
    assert!(!retried.is_skipped());

    let candidate = pipeline.orchestrator.get_candidate(candidate_id).await.unwrap();
    assert_eq!(candidate.staff_answer, fix.content);
    assert!(candidate.has_correction);
    assert_eq!(candidate.final_score, 0.85);

    // A later correction still applies and the candidate stays approvable
    let second = correction(Source::Matrix, "$fix2", "$a1", "Also: make sure you are on the latest release first.");
    let result = pipeline.orchestrator.process_correction(&second).await.unwrap();
    assert!(!result.is_skipped());
    let approved = pipeline.orchestrator.approve_candidate(candidate_id, "alice").await.unwrap();
    assert_eq!(approved.review_status, ReviewStatus::Approved);
}

#[tokio::test]
async fn test_correction_resumes_thread_left_in_has_correction() {
    let pipeline = create_test_pipeline(0.4).await.unwrap();
    let created = pipeline
        .orchestrator
        .process_matrix_answer(&matrix_answer("$a1", "$q1", WALLET_QUESTION, WALLET_ANSWER))
        .await
        .unwrap();
    let candidate_id = created.candidate_id.unwrap();
    let thread = pipeline.threads().find_thread_by_candidate(candidate_id).await.unwrap().unwrap();

    // Interrupted attempt: message stored and state moved, candidate untouched
    let fix = correction(Source::Matrix, "$fix1", "$a1", "Correction: use the 24 word seed on newer wallets.");
    pipeline
        .threads()
        .add_message_to_thread(thread.id, "$fix1", MessageType::Correction, &fix.content, None, None)
        .await
        .unwrap();
    pipeline
        .threads()
        .transition_thread_state(
            thread.id,
            ThreadState::HasCorrection,
            TransitionTrigger::CorrectionReceived,
            None,
        )
        .await
        .unwrap();

    pipeline.comparison.set_score(0.8);
    let result = pipeline.orchestrator.process_correction(&fix).await.unwrap();
    assert_eq!(result.candidate_id, Some(candidate_id));
    assert_ne!(result.skipped_reason, Some(SkipReason::Duplicate));

    let candidate = pipeline.orchestrator.get_candidate(candidate_id).await.unwrap();
    assert_eq!(candidate.staff_answer, fix.content);
    let thread = pipeline.threads().get_thread(thread.id).await.unwrap().unwrap();
    assert_eq!(thread.state, ThreadState::CandidateCreated);
}

#[tokio::test]
async fn test_correction_on_thread_without_candidate_is_skipped() {
    let pipeline = create_test_pipeline(0.8).await.unwrap();
    let thread = pipeline
        .threads()
        .create_thread(Source::Matrix, "$q9", Some("!support:matrix.org"))
        .await
        .unwrap();
    pipeline
        .threads()
        .add_message_to_thread(thread.id, "$q9", MessageType::Question, WALLET_QUESTION, None, None)
        .await
        .unwrap();

    let result = pipeline
        .orchestrator
        .process_correction(&correction(Source::Matrix, "$fix9", "$q9", "Please check the wallet backup first."))
        .await
        .unwrap();
    assert_eq!(result.skipped_reason, Some(SkipReason::NoCandidateForThread));
    assert_eq!(pipeline.comparison.call_count(), 0);
}

#[tokio::test]
async fn test_correction_on_approved_candidate_without_faq_link_is_skipped() {
    let pipeline = create_test_pipeline(0.8).await.unwrap();
    let created = pipeline
        .orchestrator
        .process_matrix_answer(&matrix_answer("$a1", "$q1", WALLET_QUESTION, WALLET_ANSWER))
        .await
        .unwrap();
    let candidate_id = created.candidate_id.unwrap();

    // Candidate approved but the thread never got its FAQ link
    assert!(pipeline.candidates().approve(candidate_id, "alice", "faq-lost").await.unwrap());

    let fix = correction(Source::Matrix, "$fix1", "$a1", "Correction: newer wallets use 24 seed words.");
    let outcome = pipeline.orchestrator.handle_correction(&fix).await.unwrap();
    let result = match outcome {
        CorrectionOutcome::PreApproval(result) => result,
        other => panic!("expected pre-approval path, got {:?}", other),
    };
    assert_eq!(result.skipped_reason, Some(SkipReason::CandidateAlreadyApproved));

    let candidate = pipeline.orchestrator.get_candidate(candidate_id).await.unwrap();
    assert_eq!(candidate.staff_answer, WALLET_ANSWER);
    assert_eq!(pipeline.comparison.call_count(), 1);
}

#[tokio::test]
async fn test_resolving_flagged_faq_with_delete_removes_faq() {
    let pipeline = create_test_pipeline(0.8).await.unwrap();
    let created = pipeline
        .orchestrator
        .process_matrix_answer(&matrix_answer("$a1", "$q1", WALLET_QUESTION, WALLET_ANSWER))
        .await
        .unwrap();
    pipeline
        .orchestrator
        .approve_candidate(created.candidate_id.unwrap(), "alice")
        .await
        .unwrap();
    let fix = correction(Source::Matrix, "$fix4", "$a1", "This answer is wrong for the current release, drop it.");
    let flag = match pipeline.orchestrator.handle_correction(&fix).await.unwrap() {
        CorrectionOutcome::PostApproval(flag) => flag,
        other => panic!("expected post-approval path, got {:?}", other),
    };

    let thread = pipeline
        .orchestrator
        .resolve_flagged_faq(flag.thread_id, ResolveAction::Delete, None, "bob")
        .await
        .unwrap();

    assert_eq!(thread.state, ThreadState::ClosedUpdated);
    assert_eq!(pipeline.faq_store.deletes.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.faq_store.len().await, 0);
    let faq = faq_pipeline::services::FaqStore::get_faq(pipeline.faq_store.as_ref(), &flag.faq_id)
        .await
        .unwrap();
    assert!(faq.is_none());
    assert!(pipeline.orchestrator.get_flagged_faqs().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_regenerate_without_protocol_clears_stored_protocol() {
    let pipeline = create_test_pipeline(0.8).await.unwrap();
    let created = pipeline
        .orchestrator
        .process_bisq_conversation(&bisq_conversation("rn", WALLET_QUESTION, WALLET_ANSWER))
        .await
        .unwrap();
    let candidate_id = created.candidate_id.unwrap();
    assert_eq!(
        pipeline.orchestrator.get_candidate(candidate_id).await.unwrap().protocol,
        Some(Protocol::BisqEasy)
    );

    let regenerated = pipeline
        .orchestrator
        .regenerate_candidate_answer(candidate_id, None)
        .await
        .unwrap();
    assert_eq!(pipeline.generator.last_protocol(), None);
    assert_eq!(regenerated.protocol, None);

    let approved = pipeline.orchestrator.approve_candidate(candidate_id, "alice").await.unwrap();
    let faq = faq_pipeline::services::FaqStore::get_faq(pipeline.faq_store.as_ref(), approved.faq_id.as_deref().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(faq.item.protocol, None);
}

#[tokio::test]
async fn test_calibration_sample_counts_once_across_undo() {
    let pipeline = create_test_pipeline(0.8).await.unwrap();
    pipeline
        .candidates()
        .apply_calibration_settings(Some(3), None, None)
        .await
        .unwrap();
    let created = pipeline
        .orchestrator
        .process_bisq_conversation(&bisq_conversation("cc", WALLET_QUESTION, WALLET_ANSWER))
        .await
        .unwrap();
    let candidate_id = created.candidate_id.unwrap();
    assert!(created.is_calibration_sample);

    pipeline.orchestrator.approve_candidate(candidate_id, "alice").await.unwrap();
    pipeline
        .orchestrator
        .undo_action(candidate_id, UndoAction::Approve, None)
        .await
        .unwrap();
    pipeline.orchestrator.approve_candidate(candidate_id, "alice").await.unwrap();
    pipeline
        .orchestrator
        .undo_action(candidate_id, UndoAction::Approve, None)
        .await
        .unwrap();
    pipeline
        .orchestrator
        .reject_candidate(candidate_id, "alice", Some("outdated"))
        .await
        .unwrap();

    let status = pipeline.orchestrator.get_calibration_status().await.unwrap();
    assert_eq!(status.samples_collected, 1);
    assert!(!status.is_complete);
}
