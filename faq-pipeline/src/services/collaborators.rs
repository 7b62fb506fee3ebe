//! Interfaces to the services the pipeline depends on
//!
//! The orchestrator only sees these traits. Concrete adapters live in
//! `http_clients` (remote services), `local_faq_store` and `classifier`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;
use crate::models::{
    AnswerSource, ComparisonResult, ExtractedFaq, Faq, FaqItem, NormalizedMessage, Protocol, ReviewRecord,
    Routing, SimilarFaq, Source,
};

/// One prior turn passed to the generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

/// Answer produced by the RAG generator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratedAnswer {
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<AnswerSource>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub routing_action: Option<String>,
}

impl GeneratedAnswer {
    /// True when there is nothing to compare a staff answer against
    pub fn is_empty(&self) -> bool {
        self.answer.trim().is_empty()
    }
}

#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// `protocol` restricts retrieval to one protocol's documents; `None`
    /// means no filtering
    async fn generate(
        &self,
        question: &str,
        chat_history: &[ChatTurn],
        protocol: Option<Protocol>,
    ) -> Result<GeneratedAnswer, CollaboratorError>;
}

#[async_trait]
pub trait ComparisonEngine: Send + Sync {
    async fn compare(
        &self,
        question_event_id: &str,
        question: &str,
        staff_answer: &str,
        generated_answer: &str,
    ) -> Result<ComparisonResult, CollaboratorError>;
}

#[async_trait]
pub trait FaqStore: Send + Sync {
    async fn add_faq(&self, item: &FaqItem) -> Result<Faq, CollaboratorError>;

    /// Returns `false` when no FAQ had that id
    async fn delete_faq(&self, faq_id: &str) -> Result<bool, CollaboratorError>;

    async fn update_faq_answer(&self, faq_id: &str, answer: &str) -> Result<Faq, CollaboratorError>;

    async fn get_faq(&self, faq_id: &str) -> Result<Option<Faq>, CollaboratorError>;

    /// FAQs whose question scores at least `threshold`, best first
    async fn search_faq_similarity(
        &self,
        question: &str,
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<SimilarFaq>, CollaboratorError>;
}

/// Groups a message batch into question/answer pairs
#[async_trait]
pub trait FaqExtractor: Send + Sync {
    async fn extract(
        &self,
        messages: &[NormalizedMessage],
        source: Source,
        staff_identifiers: &[String],
    ) -> Result<Vec<ExtractedFaq>, CollaboratorError>;
}

/// Adaptive routing thresholds learned from reviewer decisions
#[async_trait]
pub trait LearningEngine: Send + Sync {
    async fn recommend_routing(&self, final_score: f64) -> faq_common::Result<Routing>;

    async fn record_review(&self, record: ReviewRecord) -> faq_common::Result<()>;
}
