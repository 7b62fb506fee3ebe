//! Bulk extraction path: raw messages through the extractor into candidates

mod helpers;

use std::sync::Arc;

use faq_pipeline::models::{
    Bisq2Citation, Bisq2Message, BatchRequest, MatrixInReplyTo, MatrixMessage, MatrixRelatesTo, RawMessage, Routing,
    SkipReason, Source,
};
use faq_pipeline::PipelineError;
use helpers::{
    bisq_conversation, create_test_pipeline, create_test_pipeline_with, FailingExtractor, WALLET_ANSWER,
    WALLET_QUESTION,
};

const STAFF: &str = "@staff:matrix.org";

fn matrix(event_id: &str, sender: &str, body: &str, reply_to: Option<&str>) -> RawMessage {
    RawMessage::Matrix(MatrixMessage {
        event_id: event_id.to_string(),
        sender: sender.to_string(),
        body: body.to_string(),
        origin_server_ts: 1_740_830_400_000,
        relates_to: reply_to.map(|id| MatrixRelatesTo {
            in_reply_to: Some(MatrixInReplyTo { event_id: id.to_string() }),
            rel_type: None,
            event_id: None,
        }),
    })
}

fn matrix_batch(messages: Vec<RawMessage>) -> BatchRequest {
    BatchRequest {
        source: Source::Matrix,
        room_id: Some("!support:matrix.org".to_string()),
        messages,
        staff_identifiers: vec![STAFF.to_string()],
    }
}

#[tokio::test]
async fn test_matrix_batch_creates_candidate_for_reply() {
    let pipeline = create_test_pipeline(0.6).await.unwrap();
    let request = matrix_batch(vec![
        matrix("$q1", "@alice:matrix.org", WALLET_QUESTION, None),
        matrix("$a1", STAFF, WALLET_ANSWER, Some("$q1")),
    ]);

    let result = pipeline.orchestrator.extract_faqs_batch(&request).await.unwrap();
    assert_eq!(result.extracted, 1);
    assert_eq!(result.processed, 1);
    assert_eq!((result.skipped, result.failed), (0, 0));

    let processed = &result.results[0];
    assert_eq!(processed.source_event_id, "$a1");
    assert_eq!(processed.routing, Routing::FullReview);

    let candidate = pipeline
        .candidates()
        .require(processed.candidate_id.unwrap())
        .await
        .unwrap();
    assert_eq!(candidate.source, Source::Matrix);
    assert_eq!(candidate.question_text, WALLET_QUESTION);
    assert_eq!(candidate.staff_answer, WALLET_ANSWER);

    let thread = pipeline.threads().find_thread_by_message("$q1").await.unwrap().unwrap();
    assert_eq!(thread.candidate_id, Some(candidate.id));
    assert_eq!(thread.room_id.as_deref(), Some("!support:matrix.org"));
}

#[tokio::test]
async fn test_rerunning_batch_skips_known_pairs() {
    let pipeline = create_test_pipeline(0.6).await.unwrap();
    let request = matrix_batch(vec![
        matrix("$q1", "@alice:matrix.org", WALLET_QUESTION, None),
        matrix("$a1", STAFF, WALLET_ANSWER, Some("$q1")),
    ]);

    pipeline.orchestrator.extract_faqs_batch(&request).await.unwrap();
    let again = pipeline.orchestrator.extract_faqs_batch(&request).await.unwrap();

    assert_eq!(again.processed, 0);
    assert_eq!(again.skipped, 1);
    assert_eq!(again.results[0].skipped_reason, Some(SkipReason::Duplicate));
    assert_eq!(pipeline.generator.call_count(), 1);
}

#[tokio::test]
async fn test_failing_item_does_not_stop_batch() {
    let pipeline = create_test_pipeline(0.6).await.unwrap();
    pipeline.generator.fail_on("offer");

    let request = matrix_batch(vec![
        matrix("$q1", "@alice:matrix.org", "Why can I not take this offer in Bisq Easy?", None),
        matrix("$a1", STAFF, "The offer needs a matching payment method on your side.", Some("$q1")),
        matrix("$q2", "@bob:matrix.org", WALLET_QUESTION, None),
        matrix("$a2", STAFF, WALLET_ANSWER, Some("$q2")),
    ]);

    let result = pipeline.orchestrator.extract_faqs_batch(&request).await.unwrap();
    assert_eq!(result.extracted, 2);
    assert_eq!(result.failed, 1);
    assert_eq!(result.processed, 1);
    assert_eq!(result.results.len(), 1);
    assert_eq!(result.results[0].source_event_id, "$a2");
    assert!(!pipeline.candidates().exists_by_event_id("$a1").await.unwrap());
}

#[tokio::test]
async fn test_bisq2_batch_uses_composite_event_id() {
    let pipeline = create_test_pipeline(0.6).await.unwrap();
    let request = BatchRequest {
        source: Source::Bisq2,
        room_id: None,
        messages: vec![
            RawMessage::Bisq2(Bisq2Message {
                message_id: "m-100".to_string(),
                author: "trader42".to_string(),
                message: WALLET_QUESTION.to_string(),
                date: serde_json::json!(1_740_830_400_000_i64),
                citation: None,
            }),
            RawMessage::Bisq2(Bisq2Message {
                message_id: "m-101".to_string(),
                author: "suddenwhipvapor".to_string(),
                message: WALLET_ANSWER.to_string(),
                date: serde_json::json!("2025-03-01T12:05:00Z"),
                citation: Some(Bisq2Citation {
                    message_id: Some("m-100".to_string()),
                    author: Some("trader42".to_string()),
                    text: Some(WALLET_QUESTION.to_string()),
                }),
            }),
        ],
        staff_identifiers: vec!["suddenwhipvapor".to_string()],
    };

    let result = pipeline.orchestrator.extract_faqs_batch(&request).await.unwrap();
    assert_eq!(result.processed, 1);
    assert_eq!(result.results[0].source, Source::Bisq2);
    assert_eq!(result.results[0].source_event_id, "bisq2_m-100_m-101");
    assert!(pipeline.candidates().exists_by_event_id("bisq2_m-100_m-101").await.unwrap());
}

#[tokio::test]
async fn test_bisq2_pair_seen_live_then_in_batch_is_skipped_by_thread() {
    let pipeline = create_test_pipeline(0.6).await.unwrap();
    let live = pipeline
        .orchestrator
        .process_bisq_conversation(&bisq_conversation("conv-7", WALLET_QUESTION, WALLET_ANSWER))
        .await
        .unwrap();
    assert_eq!(live.source_event_id, "bisq2_conv-7_conv-7-a");

    let request = BatchRequest {
        source: Source::Bisq2,
        room_id: None,
        messages: vec![
            RawMessage::Bisq2(Bisq2Message {
                message_id: "conv-7-q".to_string(),
                author: "user1".to_string(),
                message: WALLET_QUESTION.to_string(),
                date: serde_json::json!(1_740_830_400_000_i64),
                citation: None,
            }),
            RawMessage::Bisq2(Bisq2Message {
                message_id: "conv-7-a".to_string(),
                author: "suddenwhipvapor".to_string(),
                message: WALLET_ANSWER.to_string(),
                date: serde_json::json!(1_740_830_700_000_i64),
                citation: Some(Bisq2Citation {
                    message_id: Some("conv-7-q".to_string()),
                    author: Some("user1".to_string()),
                    text: Some(WALLET_QUESTION.to_string()),
                }),
            }),
        ],
        staff_identifiers: vec!["suddenwhipvapor".to_string()],
    };

    // Different event id, same question message, so the thread already owns a candidate
    let result = pipeline.orchestrator.extract_faqs_batch(&request).await.unwrap();
    assert_eq!(result.processed, 0);
    assert_eq!(result.skipped, 1);
    assert_eq!(result.results[0].source_event_id, "bisq2_conv-7-q_conv-7-a");
    assert_eq!(result.results[0].skipped_reason, Some(SkipReason::ThreadHasCandidate));
    assert_eq!(pipeline.generator.call_count(), 1);
    assert_eq!(pipeline.candidates().count_pending(None, None).await.unwrap(), 1);
}

#[tokio::test]
async fn test_batch_without_staff_reply_extracts_nothing() {
    let pipeline = create_test_pipeline(0.6).await.unwrap();
    let request = matrix_batch(vec![
        matrix("$q1", "@alice:matrix.org", WALLET_QUESTION, None),
        matrix("$c1", "@bob:matrix.org", "thanks", None),
    ]);

    let result = pipeline.orchestrator.extract_faqs_batch(&request).await.unwrap();
    assert_eq!(result.extracted, 0);
    assert!(result.results.is_empty());
    assert_eq!(pipeline.generator.call_count(), 0);
}

#[tokio::test]
async fn test_extractor_failure_fails_whole_call() {
    let pipeline = create_test_pipeline_with(0.6, Arc::new(FailingExtractor)).await.unwrap();
    let request = matrix_batch(vec![
        matrix("$q1", "@alice:matrix.org", WALLET_QUESTION, None),
        matrix("$a1", STAFF, WALLET_ANSWER, Some("$q1")),
    ]);

    let result = pipeline.orchestrator.extract_faqs_batch(&request).await;
    assert!(matches!(result, Err(PipelineError::Extractor(_))));
    assert_eq!(pipeline.candidates().count_pending(None, None).await.unwrap(), 0);
}
