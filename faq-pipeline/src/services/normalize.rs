//! Per-source adapters to [`NormalizedMessage`]

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::models::{Bisq2Message, MatrixMessage, NormalizedMessage, RawMessage};

/// Matrix relation type for edits
const MATRIX_REPLACE: &str = "m.replace";

pub fn normalize_bisq2(msg: &Bisq2Message) -> NormalizedMessage {
    NormalizedMessage {
        id: msg.message_id.clone(),
        sender: msg.author.clone(),
        text: msg.message.clone(),
        timestamp: parse_bisq2_date(&msg.date),
        reply_to: msg
            .citation
            .as_ref()
            .and_then(|c| c.message_id.clone())
            .filter(|id| !id.is_empty()),
        replaces: None,
    }
}

pub fn normalize_matrix(msg: &MatrixMessage) -> NormalizedMessage {
    let relates_to = msg.relates_to.as_ref();
    let reply_to = relates_to
        .and_then(|r| r.in_reply_to.as_ref())
        .map(|r| r.event_id.clone());
    let replaces = relates_to
        .filter(|r| r.rel_type.as_deref() == Some(MATRIX_REPLACE))
        .and_then(|r| r.event_id.clone());

    // Edit events carry a "* " fallback prefix in the body
    let text = if replaces.is_some() {
        msg.body.strip_prefix("* ").unwrap_or(&msg.body).to_string()
    } else {
        msg.body.clone()
    };

    NormalizedMessage {
        id: msg.event_id.clone(),
        sender: msg.sender.clone(),
        text,
        timestamp: faq_common::time::from_unix_millis(msg.origin_server_ts),
        reply_to,
        replaces,
    }
}

pub fn normalize(msg: &RawMessage) -> NormalizedMessage {
    match msg {
        RawMessage::Bisq2(m) => normalize_bisq2(m),
        RawMessage::Matrix(m) => normalize_matrix(m),
    }
}

/// Normalize a batch, ordered by timestamp (messages without one keep
/// their relative position at the end)
pub fn normalize_batch(messages: &[RawMessage]) -> Vec<NormalizedMessage> {
    let mut normalized: Vec<NormalizedMessage> = messages.iter().map(normalize).collect();
    normalized.sort_by_key(|m| (m.timestamp.is_none(), m.timestamp));
    normalized
}

/// Bisq 2 dates arrive as Unix millis (number or numeric string) or RFC 3339
fn parse_bisq2_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(faq_common::time::from_unix_millis),
        Value::String(s) => {
            if let Ok(millis) = s.parse::<i64>() {
                return faq_common::time::from_unix_millis(millis);
            }
            faq_common::time::from_db(s).ok()
        }
        _ => None,
    }
}
