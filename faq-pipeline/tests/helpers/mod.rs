//! Test Helper Utilities
//!
//! Shared utilities for testing faq-pipeline

#![allow(dead_code)]

pub mod db_utils;
pub mod mocks;

pub use db_utils::{create_test_db, create_test_pipeline, create_test_pipeline_with, end_calibration, TestPipeline};
pub use mocks::{CountingFaqStore, FailingExtractor, MockComparison, MockGenerator};

use chrono::{TimeZone, Utc};
use faq_pipeline::models::{BisqConversation, CorrectionEvent, MatrixAnswer, NormalizedMessage, Source};

pub const WALLET_QUESTION: &str = "How do I restore my wallet from the seed words?";
pub const WALLET_ANSWER: &str =
    "Go to Settings, choose Wallet, then Restore, and enter your 12 seed words in order.";

pub fn message(id: &str, sender: &str, text: &str) -> NormalizedMessage {
    NormalizedMessage {
        id: id.to_string(),
        sender: sender.to_string(),
        text: text.to_string(),
        timestamp: Some(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()),
        reply_to: None,
        replaces: None,
    }
}

pub fn bisq_conversation(thread_id: &str, question: &str, answer: &str) -> BisqConversation {
    BisqConversation {
        thread_id: thread_id.to_string(),
        channel_id: Some("support".to_string()),
        question: message(&format!("{}-q", thread_id), "user1", question),
        answer: message(&format!("{}-a", thread_id), "suddenwhipvapor", answer),
    }
}

pub fn matrix_answer(event_id: &str, question_id: &str, question: &str, answer: &str) -> MatrixAnswer {
    MatrixAnswer {
        event_id: event_id.to_string(),
        room_id: Some("!support:matrix.org".to_string()),
        staff_answer: answer.to_string(),
        staff_sender: "@staff:matrix.org".to_string(),
        reply_to_event_id: question_id.to_string(),
        question_text: question.to_string(),
        question_sender: Some("@user:matrix.org".to_string()),
        timestamp: None,
    }
}

pub fn correction(source: Source, event_id: &str, reply_to: &str, content: &str) -> CorrectionEvent {
    CorrectionEvent {
        source,
        event_id: event_id.to_string(),
        content: content.to_string(),
        reply_to_id: reply_to.to_string(),
        staff_sender: "@staff:matrix.org".to_string(),
        timestamp: None,
    }
}
