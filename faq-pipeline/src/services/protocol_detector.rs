//! Protocol detection from message text
//!
//! Bisq has two trading protocols with separate documentation. A question
//! about DAO voting needs multisig (Bisq 1) context even when it was asked
//! in the Bisq 2 support chat, so text signals always beat the source default.

use crate::models::{Protocol, Source};

/// Minimum confidence for a text match to be accepted
pub const DETECTION_THRESHOLD: f64 = 0.6;

const STRONG_BASE: f64 = 0.7;
const WEAK_WEIGHT: f64 = 0.35;
const EXTRA_MATCH_BONUS: f64 = 0.1;
const MAX_CONFIDENCE: f64 = 0.95;

/// Phrases that on their own identify a protocol
const MULTISIG_STRONG: &[&str] = &[
    "dao",
    "bsq",
    "multisig",
    "multi-sig",
    "arbitration",
    "arbitrator",
    "mediator",
    "mediation",
    "delayed payout",
    "burning man",
    "burningman",
    "refund agent",
    "bisq 1",
    "bisq1",
];

const MULTISIG_WEAK: &[&str] = &["security deposit", "escrow", "deposit tx", "trade protocol"];

const BISQ_EASY_STRONG: &[&str] = &[
    "bisq easy",
    "bisq 2",
    "bisq2",
    "reputation",
    "bonded role",
    "trade chat",
];

const BISQ_EASY_WEAK: &[&str] = &["offerbook", "profile age", "reputation score", "burn bsq for reputation"];

/// Detect a protocol from free text
///
/// Returns `(None, 0.0)` when nothing matches or both protocols score the same.
pub fn detect_protocol_from_text(text: &str) -> (Option<Protocol>, f64) {
    let normalized = normalize(text);
    if normalized.trim().is_empty() {
        return (None, 0.0);
    }

    let multisig = score(&normalized, MULTISIG_STRONG, MULTISIG_WEAK);
    let bisq_easy = score(&normalized, BISQ_EASY_STRONG, BISQ_EASY_WEAK);

    if multisig == 0.0 && bisq_easy == 0.0 {
        return (None, 0.0);
    }
    if (multisig - bisq_easy).abs() < f64::EPSILON {
        return (None, 0.0);
    }
    if multisig > bisq_easy {
        (Some(Protocol::MultisigV1), multisig)
    } else {
        (Some(Protocol::BisqEasy), bisq_easy)
    }
}

/// Protocol used when the text carries no signal
pub fn source_default(source: Source) -> Option<Protocol> {
    match source {
        Source::Bisq2 => Some(Protocol::BisqEasy),
        Source::Matrix => None,
    }
}

/// Question text, then staff answer, then source default
pub fn detect_protocol_with_fallback(question: &str, staff_answer: &str, source: Source) -> Option<Protocol> {
    let (protocol, confidence) = detect_protocol_from_text(question);
    if protocol.is_some() && confidence >= DETECTION_THRESHOLD {
        return protocol;
    }

    let (protocol, confidence) = detect_protocol_from_text(staff_answer);
    if protocol.is_some() && confidence >= DETECTION_THRESHOLD {
        return protocol;
    }

    source_default(source)
}

/// Lowercase, punctuation to spaces, padded so phrase lookups match whole words
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push(' ');
    let mut last_space = true;
    for ch in text.chars() {
        if ch.is_alphanumeric() || ch == '-' {
            out.extend(ch.to_lowercase());
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    if !last_space {
        out.push(' ');
    }
    out
}

fn score(normalized: &str, strong: &[&str], weak: &[&str]) -> f64 {
    let strong_hits = count_hits(normalized, strong);
    let weak_hits = count_hits(normalized, weak);

    let raw = if strong_hits > 0 {
        STRONG_BASE + EXTRA_MATCH_BONUS * (strong_hits + weak_hits - 1) as f64
    } else {
        WEAK_WEIGHT * weak_hits as f64
    };
    raw.min(MAX_CONFIDENCE)
}

fn count_hits(normalized: &str, phrases: &[&str]) -> usize {
    phrases
        .iter()
        .filter(|phrase| normalized.contains(&format!(" {} ", phrase)))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dao_is_strong_multisig_signal() {
        let (protocol, confidence) = detect_protocol_from_text("How do I vote in the DAO?");
        assert_eq!(protocol, Some(Protocol::MultisigV1));
        assert!(confidence >= DETECTION_THRESHOLD);
    }

    #[test]
    fn test_keywords_match_whole_words_only() {
        // "daodao" and "bsqx" are not keywords
        assert_eq!(detect_protocol_from_text("daodao bsqx").0, None);
        assert_eq!(detect_protocol_from_text("").0, None);
    }

    #[test]
    fn test_single_weak_keyword_is_below_threshold() {
        let (protocol, confidence) = detect_protocol_from_text("Where is my escrow?");
        assert_eq!(protocol, Some(Protocol::MultisigV1));
        assert!(confidence < DETECTION_THRESHOLD);
    }

    #[test]
    fn test_bisq_easy_detection() {
        let (protocol, _) = detect_protocol_from_text("How does reputation work in Bisq Easy?");
        assert_eq!(protocol, Some(Protocol::BisqEasy));
    }

    #[test]
    fn test_staff_answer_overrides_source_default() {
        let protocol = detect_protocol_with_fallback(
            "My trade is stuck, what now?",
            "Open a ticket with the DAO mediator.",
            Source::Bisq2,
        );
        assert_eq!(protocol, Some(Protocol::MultisigV1));
    }

    #[test]
    fn test_source_defaults() {
        assert_eq!(
            detect_protocol_with_fallback("How do I restore my wallet?", "Go to Settings > Backup", Source::Bisq2),
            Some(Protocol::BisqEasy)
        );
        assert_eq!(
            detect_protocol_with_fallback("How do I restore my wallet?", "Go to Settings > Backup", Source::Matrix),
            None
        );
    }

    #[test]
    fn test_question_wins_over_answer() {
        let protocol =
            detect_protocol_with_fallback("Is my BSQ safe?", "Bisq Easy uses reputation instead.", Source::Matrix);
        assert_eq!(protocol, Some(Protocol::MultisigV1));
    }
}
