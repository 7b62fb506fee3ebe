//! Heuristic message classification and reply-chain pairing
//!
//! [`ReplyChainExtractor`] is the built-in [`FaqExtractor`]. It pairs a staff
//! reply with the user question it cites, or with the most recent open
//! question when the reply cites nothing.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CollaboratorError;
use crate::models::{ExtractedFaq, NormalizedMessage, Source};
use crate::services::collaborators::FaqExtractor;

/// Shorter messages are never questions or answers
pub const MIN_MESSAGE_LENGTH: usize = 10;

const QUESTION_OPENERS: &[&str] = &[
    "how", "what", "why", "when", "where", "which", "who", "can", "could", "is", "are", "does", "do", "did",
    "should", "would", "will", "any", "anyone", "help",
];

const PROBLEM_MARKERS: &[&str] = &[
    "not working",
    "doesn't work",
    "does not work",
    "can't",
    "cannot",
    "stuck",
    "error",
    "problem",
    "issue",
    "failed",
    "missing",
];

const NOISE_PHRASES: &[&str] = &[
    "thanks",
    "thank you",
    "thx",
    "ok",
    "okay",
    "hi",
    "hello",
    "hey",
    "gm",
    "good morning",
    "cheers",
    "great",
    "nice",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    Question,
    StaffAnswer,
    Noise,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub role: MessageRole,
    pub confidence: f64,
}

/// Role classification against a set of staff identities
pub struct MessageClassifier {
    staff: HashSet<String>,
}

impl MessageClassifier {
    /// Identifiers match case-insensitively; Matrix ids also match on their
    /// localpart (`@alice:server` matches `alice`)
    pub fn new(staff_identifiers: &[String]) -> Self {
        let staff = staff_identifiers
            .iter()
            .flat_map(|id| {
                let lower = id.trim().to_lowercase();
                let local = matrix_localpart(&lower).map(str::to_string);
                std::iter::once(lower).chain(local)
            })
            .filter(|id| !id.is_empty())
            .collect();
        Self { staff }
    }

    pub fn is_staff(&self, sender: &str) -> bool {
        let lower = sender.trim().to_lowercase();
        if self.staff.contains(&lower) {
            return true;
        }
        matrix_localpart(&lower).is_some_and(|local| self.staff.contains(local))
    }

    pub fn classify(&self, msg: &NormalizedMessage) -> Classification {
        let text = msg.text.trim();

        if self.is_staff(&msg.sender) {
            let role = if text.chars().count() >= MIN_MESSAGE_LENGTH {
                MessageRole::StaffAnswer
            } else {
                MessageRole::Noise
            };
            return Classification { role, confidence: 0.95 };
        }

        if text.chars().count() < MIN_MESSAGE_LENGTH || is_noise(text) {
            return Classification {
                role: MessageRole::Noise,
                confidence: 0.9,
            };
        }

        let lower = text.to_lowercase();
        let first_word = lower
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .find(|w| !w.is_empty())
            .unwrap_or("");

        let mut confidence: f64 = 0.0;
        if text.contains('?') {
            confidence += 0.6;
        }
        if QUESTION_OPENERS.contains(&first_word) {
            confidence += 0.3;
        }
        if PROBLEM_MARKERS.iter().any(|m| lower.contains(m)) {
            confidence += 0.3;
        }

        if confidence >= 0.5 {
            Classification {
                role: MessageRole::Question,
                confidence: confidence.min(0.95),
            }
        } else {
            Classification {
                role: MessageRole::Noise,
                confidence: 1.0 - confidence,
            }
        }
    }
}

fn matrix_localpart(id: &str) -> Option<&str> {
    let rest = id.strip_prefix('@')?;
    Some(rest.split(':').next().unwrap_or(rest))
}

fn is_noise(text: &str) -> bool {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    let cleaned = cleaned.trim();
    NOISE_PHRASES.iter().any(|p| cleaned == *p)
}

/// Built-in extractor pairing staff replies with user questions
#[derive(Debug, Default, Clone)]
pub struct ReplyChainExtractor;

impl ReplyChainExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Pairs in message order; each question is answered at most once.
    /// Staff edits replace the text of the answer they edit.
    pub fn pair(&self, messages: &[NormalizedMessage], staff_identifiers: &[String]) -> Vec<ExtractedFaq> {
        let classifier = MessageClassifier::new(staff_identifiers);
        let by_id: HashMap<&str, &NormalizedMessage> = messages.iter().map(|m| (m.id.as_str(), m)).collect();

        let mut open_questions: Vec<&NormalizedMessage> = Vec::new();
        let mut pairs: Vec<ExtractedFaq> = Vec::new();
        let mut answered: HashSet<&str> = HashSet::new();

        for msg in messages {
            if let Some(edited) = msg.replaces.as_deref() {
                if let Some(pair) = pairs.iter_mut().find(|p| p.answer_msg_id == edited) {
                    debug!(answer = %edited, "Applying staff edit to extracted answer");
                    pair.answer_text = msg.text.trim().to_string();
                    pair.original_answer_text = Some(msg.text.clone());
                }
                continue;
            }

            let classification = classifier.classify(msg);
            match classification.role {
                MessageRole::Question => open_questions.push(msg),
                MessageRole::StaffAnswer => {
                    let question = msg
                        .reply_to
                        .as_deref()
                        .and_then(|id| by_id.get(id).copied())
                        .filter(|q| !classifier.is_staff(&q.sender))
                        .or_else(|| {
                            open_questions
                                .iter()
                                .rev()
                                .find(|q| !answered.contains(q.id.as_str()))
                                .copied()
                        });

                    let Some(question) = question else {
                        continue;
                    };
                    if !answered.insert(question.id.as_str()) {
                        continue;
                    }

                    pairs.push(ExtractedFaq {
                        question_text: question.text.trim().to_string(),
                        answer_text: msg.text.trim().to_string(),
                        question_msg_id: question.id.clone(),
                        answer_msg_id: msg.id.clone(),
                        question_sender: Some(question.sender.clone()),
                        answer_sender: Some(msg.sender.clone()),
                        original_question_text: Some(question.text.clone()),
                        original_answer_text: Some(msg.text.clone()),
                        category: None,
                        confidence: Some(classification.confidence),
                        timestamp: msg.timestamp,
                    });
                }
                MessageRole::Noise => {}
            }
        }

        pairs
    }
}

#[async_trait]
impl FaqExtractor for ReplyChainExtractor {
    async fn extract(
        &self,
        messages: &[NormalizedMessage],
        _source: Source,
        staff_identifiers: &[String],
    ) -> Result<Vec<ExtractedFaq>, CollaboratorError> {
        Ok(self.pair(messages, staff_identifiers))
    }
}
