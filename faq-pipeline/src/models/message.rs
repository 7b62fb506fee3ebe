//! Inbound message shapes
//!
//! Each source has its own wire shape. Adapters in
//! `services::normalize` turn them into [`NormalizedMessage`]; nothing past
//! that point looks at the raw shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::thread::Source;

/// Source-independent chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    pub id: String,
    pub sender: String,
    pub text: String,
    pub timestamp: Option<DateTime<Utc>>,
    /// Id of the message this one replies to (citation or reply relation)
    pub reply_to: Option<String>,
    /// Id of the message this one replaces (edit relation)
    #[serde(default)]
    pub replaces: Option<String>,
}

/// Quoted message inside a Bisq 2 support message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bisq2Citation {
    pub message_id: Option<String>,
    pub author: Option<String>,
    pub text: Option<String>,
}

/// Bisq 2 support API message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bisq2Message {
    pub message_id: String,
    pub author: String,
    pub message: String,
    /// Unix milliseconds or an RFC 3339 string
    pub date: serde_json::Value,
    #[serde(default)]
    pub citation: Option<Bisq2Citation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixInReplyTo {
    pub event_id: String,
}

/// `m.relates_to` block of a Matrix event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatrixRelatesTo {
    #[serde(rename = "m.in_reply_to", default)]
    pub in_reply_to: Option<MatrixInReplyTo>,
    #[serde(default)]
    pub rel_type: Option<String>,
    #[serde(default)]
    pub event_id: Option<String>,
}

/// Matrix room message (flattened content)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixMessage {
    pub event_id: String,
    pub sender: String,
    pub body: String,
    pub origin_server_ts: i64,
    #[serde(rename = "m.relates_to", default)]
    pub relates_to: Option<MatrixRelatesTo>,
}

/// Raw batch payload from either source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawMessage {
    Bisq2(Bisq2Message),
    Matrix(MatrixMessage),
}

/// A question and its staff answer from the Bisq 2 support chat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BisqConversation {
    /// Conversation id assigned by the Bisq 2 API
    pub thread_id: String,
    #[serde(default)]
    pub channel_id: Option<String>,
    pub question: NormalizedMessage,
    pub answer: NormalizedMessage,
}

/// A staff reply to a user question in a Matrix room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixAnswer {
    pub event_id: String,
    #[serde(default)]
    pub room_id: Option<String>,
    pub staff_answer: String,
    pub staff_sender: String,
    /// Event id of the user question
    pub reply_to_event_id: String,
    pub question_text: String,
    #[serde(default)]
    pub question_sender: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A staff message correcting an earlier answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionEvent {
    pub source: Source,
    pub event_id: String,
    pub content: String,
    /// Message id the correction refers to (question or original answer)
    pub reply_to_id: String,
    pub staff_sender: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Q&A pair produced by an extractor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFaq {
    pub question_text: String,
    pub answer_text: String,
    pub question_msg_id: String,
    pub answer_msg_id: String,
    #[serde(default)]
    pub question_sender: Option<String>,
    #[serde(default)]
    pub answer_sender: Option<String>,
    /// Text before any rewording by the extractor
    #[serde(default)]
    pub original_question_text: Option<String>,
    #[serde(default)]
    pub original_answer_text: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Input of the bulk extraction path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub source: Source,
    #[serde(default)]
    pub room_id: Option<String>,
    pub messages: Vec<RawMessage>,
    #[serde(default)]
    pub staff_identifiers: Vec<String>,
}
