//! Verified FAQ entries (owned by the external FAQ store)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::candidate::Protocol;

/// Default category for approved FAQs without one
pub const DEFAULT_CATEGORY: &str = "General";

/// FAQ payload built on approval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaqItem {
    pub question: String,
    pub answer: String,
    /// Human-readable provenance, e.g. "Bisq Support Chat"
    pub source: String,
    pub verified: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub protocol: Option<Protocol>,
    pub category: String,
}

/// Stored FAQ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Faq {
    pub id: String,
    #[serde(flatten)]
    pub item: FaqItem,
}

/// Similarity search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarFaq {
    pub id: String,
    pub question: String,
    pub answer: String,
    pub similarity: f64,
}
