//! Hand-written collaborator mocks with call counters

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use faq_pipeline::error::CollaboratorError;
use faq_pipeline::models::{
    ComparisonResult, ExtractedFaq, Faq, FaqItem, NormalizedMessage, Protocol, SimilarFaq, Source,
};
use faq_pipeline::services::{
    AnswerGenerator, ChatTurn, ComparisonEngine, FaqExtractor, FaqStore, GeneratedAnswer, InMemoryFaqStore,
};

pub struct MockGenerator {
    answer: Mutex<String>,
    /// Questions containing this text fail
    fail_on: Mutex<Option<String>>,
    pub calls: AtomicUsize,
    pub protocols: Mutex<Vec<Option<Protocol>>>,
}

impl MockGenerator {
    pub fn new(answer: &str) -> Self {
        Self {
            answer: Mutex::new(answer.to_string()),
            fail_on: Mutex::new(None),
            calls: AtomicUsize::new(0),
            protocols: Mutex::new(Vec::new()),
        }
    }

    pub fn set_answer(&self, answer: &str) {
        *self.answer.lock().unwrap() = answer.to_string();
    }

    pub fn fail_on(&self, needle: &str) {
        *self.fail_on.lock().unwrap() = Some(needle.to_string());
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_protocol(&self) -> Option<Protocol> {
        self.protocols.lock().unwrap().last().copied().flatten()
    }
}

#[async_trait]
impl AnswerGenerator for MockGenerator {
    async fn generate(
        &self,
        question: &str,
        _chat_history: &[ChatTurn],
        protocol: Option<Protocol>,
    ) -> Result<GeneratedAnswer, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.protocols.lock().unwrap().push(protocol);

        if let Some(needle) = self.fail_on.lock().unwrap().as_deref() {
            if question.contains(needle) {
                return Err(CollaboratorError::Unavailable("generator down".to_string()));
            }
        }

        Ok(GeneratedAnswer {
            answer: self.answer.lock().unwrap().clone(),
            sources: vec![],
            confidence: Some(0.8),
            routing_action: None,
        })
    }
}

pub struct MockComparison {
    score: Mutex<f64>,
    /// Upcoming calls that fail before scoring resumes
    failures_left: AtomicUsize,
    pub calls: AtomicUsize,
    pub staff_answers: Mutex<Vec<String>>,
}

impl MockComparison {
    pub fn new(score: f64) -> Self {
        Self {
            score: Mutex::new(score),
            failures_left: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            staff_answers: Mutex::new(Vec::new()),
        }
    }

    pub fn set_score(&self, score: f64) {
        *self.score.lock().unwrap() = score;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Fail the next `n` calls
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl ComparisonEngine for MockComparison {
    async fn compare(
        &self,
        _question_event_id: &str,
        _question: &str,
        staff_answer: &str,
        _generated_answer: &str,
    ) -> Result<ComparisonResult, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CollaboratorError::Unavailable("timeout".to_string()));
        }
        self.staff_answers.lock().unwrap().push(staff_answer.to_string());
        let score = *self.score.lock().unwrap();
        Ok(ComparisonResult {
            embedding_similarity: score,
            factual_alignment: score,
            contradiction_score: 1.0 - score,
            completeness: score,
            hallucination_risk: 1.0 - score,
            final_score: score,
            llm_reasoning: "mock".to_string(),
        })
    }
}

/// In-memory FAQ store that counts mutations
pub struct CountingFaqStore {
    inner: InMemoryFaqStore,
    pub adds: AtomicUsize,
    pub updates: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl CountingFaqStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryFaqStore::new(),
            adds: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    pub fn mutation_count(&self) -> usize {
        self.adds.load(Ordering::SeqCst) + self.updates.load(Ordering::SeqCst) + self.deletes.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.inner.len().await
    }
}

#[async_trait]
impl FaqStore for CountingFaqStore {
    async fn add_faq(&self, item: &FaqItem) -> Result<Faq, CollaboratorError> {
        self.adds.fetch_add(1, Ordering::SeqCst);
        self.inner.add_faq(item).await
    }

    async fn delete_faq(&self, faq_id: &str) -> Result<bool, CollaboratorError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_faq(faq_id).await
    }

    async fn update_faq_answer(&self, faq_id: &str, answer: &str) -> Result<Faq, CollaboratorError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.inner.update_faq_answer(faq_id, answer).await
    }

    async fn get_faq(&self, faq_id: &str) -> Result<Option<Faq>, CollaboratorError> {
        self.inner.get_faq(faq_id).await
    }

    async fn search_faq_similarity(
        &self,
        question: &str,
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<SimilarFaq>, CollaboratorError> {
        self.inner.search_faq_similarity(question, threshold, limit).await
    }
}

/// Extractor that always fails
pub struct FailingExtractor;

#[async_trait]
impl FaqExtractor for FailingExtractor {
    async fn extract(
        &self,
        _messages: &[NormalizedMessage],
        _source: Source,
        _staff_identifiers: &[String],
    ) -> Result<Vec<ExtractedFaq>, CollaboratorError> {
        Err(CollaboratorError::Unavailable("extractor down".to_string()))
    }
}
