//! HTTP adapters for the remote generator, comparison engine and FAQ store
//!
//! Outbound calls share one rate limiter per client. Timeouts are set on the
//! underlying `reqwest::Client`.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CollaboratorError;
use crate::models::{ComparisonResult, Faq, FaqItem, Protocol, SimilarFaq};
use crate::services::collaborators::{AnswerGenerator, ChatTurn, ComparisonEngine, FaqStore, GeneratedAnswer};

const USER_AGENT: &str = concat!("faq-pipeline/", env!("CARGO_PKG_VERSION"));

/// Outbound requests per second per client
pub const DEFAULT_REQUESTS_PER_SECOND: u32 = 5;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Shared plumbing: base URL, client, limiter
struct ServiceClient {
    client: reqwest::Client,
    base_url: String,
    limiter: DirectLimiter,
}

impl ServiceClient {
    fn new(base_url: &str, timeout: Duration, requests_per_second: u32) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            limiter: RateLimiter::direct(quota),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, CollaboratorError> {
        self.limiter.until_ready().await;
        let url = self.url(path);
        debug!(url = %url, "POST");
        let response = self.client.post(&url).json(body).send().await?;
        parse_json(response).await
    }
}

async fn check_status(response: Response) -> Result<Response, CollaboratorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::NOT_FOUND {
        return Err(CollaboratorError::NotFound(body));
    }
    if status == StatusCode::SERVICE_UNAVAILABLE {
        return Err(CollaboratorError::Unavailable(body));
    }
    Err(CollaboratorError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T, CollaboratorError> {
    let response = check_status(response).await?;
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| CollaboratorError::InvalidResponse(e.to_string()))
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    question: &'a str,
    chat_history: &'a [ChatTurn],
    #[serde(skip_serializing_if = "Option::is_none")]
    override_version: Option<Protocol>,
}

/// RAG generator at `POST {base}/query`
pub struct HttpAnswerGenerator {
    inner: ServiceClient,
}

impl HttpAnswerGenerator {
    pub fn new(base_url: &str, timeout: Duration, requests_per_second: u32) -> Result<Self, CollaboratorError> {
        Ok(Self {
            inner: ServiceClient::new(base_url, timeout, requests_per_second)?,
        })
    }
}

#[async_trait]
impl AnswerGenerator for HttpAnswerGenerator {
    async fn generate(
        &self,
        question: &str,
        chat_history: &[ChatTurn],
        protocol: Option<Protocol>,
    ) -> Result<GeneratedAnswer, CollaboratorError> {
        self.inner
            .post(
                "/query",
                &QueryRequest {
                    question,
                    chat_history,
                    override_version: protocol,
                },
            )
            .await
    }
}

#[derive(Serialize)]
struct CompareRequest<'a> {
    question_event_id: &'a str,
    question: &'a str,
    staff_answer: &'a str,
    generated_answer: &'a str,
}

/// Comparison engine at `POST {base}/compare`
pub struct HttpComparisonEngine {
    inner: ServiceClient,
}

impl HttpComparisonEngine {
    pub fn new(base_url: &str, timeout: Duration, requests_per_second: u32) -> Result<Self, CollaboratorError> {
        Ok(Self {
            inner: ServiceClient::new(base_url, timeout, requests_per_second)?,
        })
    }
}

#[async_trait]
impl ComparisonEngine for HttpComparisonEngine {
    async fn compare(
        &self,
        question_event_id: &str,
        question: &str,
        staff_answer: &str,
        generated_answer: &str,
    ) -> Result<ComparisonResult, CollaboratorError> {
        self.inner
            .post(
                "/compare",
                &CompareRequest {
                    question_event_id,
                    question,
                    staff_answer,
                    generated_answer,
                },
            )
            .await
    }
}

#[derive(Serialize)]
struct SimilarityRequest<'a> {
    question: &'a str,
    threshold: f64,
    limit: usize,
}

#[derive(Serialize)]
struct AnswerUpdate<'a> {
    answer: &'a str,
}

#[derive(Deserialize)]
struct DeleteResponse {
    #[serde(default = "default_true")]
    deleted: bool,
}

fn default_true() -> bool {
    true
}

/// FAQ service under `{base}/faqs`
pub struct HttpFaqStore {
    inner: ServiceClient,
}

impl HttpFaqStore {
    pub fn new(base_url: &str, timeout: Duration, requests_per_second: u32) -> Result<Self, CollaboratorError> {
        Ok(Self {
            inner: ServiceClient::new(base_url, timeout, requests_per_second)?,
        })
    }
}

#[async_trait]
impl FaqStore for HttpFaqStore {
    async fn add_faq(&self, item: &FaqItem) -> Result<Faq, CollaboratorError> {
        self.inner.post("/faqs", item).await
    }

    async fn delete_faq(&self, faq_id: &str) -> Result<bool, CollaboratorError> {
        self.inner.limiter.until_ready().await;
        let response = self
            .inner
            .client
            .delete(self.inner.url(&format!("/faqs/{}", faq_id)))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(true);
        }
        let parsed: DeleteResponse = parse_json(response).await?;
        Ok(parsed.deleted)
    }

    async fn update_faq_answer(&self, faq_id: &str, answer: &str) -> Result<Faq, CollaboratorError> {
        self.inner.limiter.until_ready().await;
        let response = self
            .inner
            .client
            .patch(self.inner.url(&format!("/faqs/{}", faq_id)))
            .json(&AnswerUpdate { answer })
            .send()
            .await?;
        parse_json(response).await
    }

    async fn get_faq(&self, faq_id: &str) -> Result<Option<Faq>, CollaboratorError> {
        self.inner.limiter.until_ready().await;
        let response = self
            .inner
            .client
            .get(self.inner.url(&format!("/faqs/{}", faq_id)))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        parse_json(response).await.map(Some)
    }

    async fn search_faq_similarity(
        &self,
        question: &str,
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<SimilarFaq>, CollaboratorError> {
        self.inner
            .post(
                "/faqs/similar",
                &SimilarityRequest {
                    question,
                    threshold,
                    limit,
                },
            )
            .await
    }
}
