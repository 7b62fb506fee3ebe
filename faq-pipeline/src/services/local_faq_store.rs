//! In-process FAQ store
//!
//! Used when no FAQ service URL is configured. Contents live only as long
//! as the process.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::CollaboratorError;
use crate::models::{Faq, FaqItem, SimilarFaq};
use crate::services::collaborators::FaqStore;

#[derive(Default)]
pub struct InMemoryFaqStore {
    faqs: RwLock<BTreeMap<String, Faq>>,
}

impl InMemoryFaqStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.faqs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.faqs.read().await.is_empty()
    }
}

/// Fuzzy question similarity in [0, 1]
pub fn question_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_question(a);
    let b = normalize_question(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    strsim::normalized_levenshtein(&a, &b).max(strsim::sorensen_dice(&a, &b))
}

fn normalize_question(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl FaqStore for InMemoryFaqStore {
    async fn add_faq(&self, item: &FaqItem) -> Result<Faq, CollaboratorError> {
        let faq = Faq {
            id: Uuid::new_v4().to_string(),
            item: item.clone(),
        };
        self.faqs.write().await.insert(faq.id.clone(), faq.clone());
        Ok(faq)
    }

    async fn delete_faq(&self, faq_id: &str) -> Result<bool, CollaboratorError> {
        Ok(self.faqs.write().await.remove(faq_id).is_some())
    }

    async fn update_faq_answer(&self, faq_id: &str, answer: &str) -> Result<Faq, CollaboratorError> {
        let mut faqs = self.faqs.write().await;
        let faq = faqs
            .get_mut(faq_id)
            .ok_or_else(|| CollaboratorError::NotFound(format!("FAQ {}", faq_id)))?;
        faq.item.answer = answer.to_string();
        Ok(faq.clone())
    }

    async fn get_faq(&self, faq_id: &str) -> Result<Option<Faq>, CollaboratorError> {
        Ok(self.faqs.read().await.get(faq_id).cloned())
    }

    async fn search_faq_similarity(
        &self,
        question: &str,
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<SimilarFaq>, CollaboratorError> {
        let faqs = self.faqs.read().await;
        let mut hits: Vec<SimilarFaq> = faqs
            .values()
            .map(|faq| SimilarFaq {
                id: faq.id.clone(),
                question: faq.item.question.clone(),
                answer: faq.item.answer.clone(),
                similarity: question_similarity(question, &faq.item.question),
            })
            .filter(|hit| hit.similarity >= threshold)
            .collect();

        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        hits.truncate(limit);
        Ok(hits)
    }
}
