//! Error types for faq-pipeline
//!
//! - [`CollaboratorError`]: failures of the generator, comparison engine,
//!   FAQ store or extractor
//! - [`PipelineError`]: what orchestrator operations return
//! - [`ApiError`]: HTTP mapping of the above

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::SimilarFaq;

/// Failure of an external collaborator
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),
}

/// Error returned by pipeline operations
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// Precondition failed (wrong review status, illegal transition, missing link)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Approval blocked by similar existing FAQs
    #[error("Candidate {candidate_id} duplicates {} existing FAQ(s)", similar_faqs.len())]
    DuplicateFaq {
        candidate_id: i64,
        similar_faqs: Vec<SimilarFaq>,
    },

    #[error("Answer generation failed: {0}")]
    Generator(#[source] CollaboratorError),

    #[error("Answer comparison failed: {0}")]
    Comparison(#[source] CollaboratorError),

    #[error("FAQ store failed: {0}")]
    FaqStore(#[source] CollaboratorError),

    #[error("FAQ extraction failed: {0}")]
    Extractor(#[source] CollaboratorError),

    #[error(transparent)]
    Common(#[from] faq_common::Error),
}

impl PipelineError {
    /// True for collaborator failures (the pipeline itself is healthy)
    pub fn is_collaborator(&self) -> bool {
        matches!(
            self,
            PipelineError::Generator(_)
                | PipelineError::Comparison(_)
                | PipelineError::FaqStore(_)
                | PipelineError::Extractor(_)
        )
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl From<faq_common::Error> for ApiError {
    fn from(err: faq_common::Error) -> Self {
        ApiError::Pipeline(PipelineError::Common(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, None),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg, None),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg, None),
            ApiError::Pipeline(err) => match err {
                PipelineError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
                PipelineError::InvalidState(msg) => (StatusCode::BAD_REQUEST, "INVALID_STATE", msg, None),
                PipelineError::DuplicateFaq {
                    candidate_id,
                    similar_faqs,
                } => (
                    StatusCode::CONFLICT,
                    "DUPLICATE_FAQ",
                    format!(
                        "Candidate {} duplicates {} existing FAQ(s)",
                        candidate_id,
                        similar_faqs.len()
                    ),
                    Some(json!({
                        "candidate_id": candidate_id,
                        "similar_faqs": similar_faqs,
                    })),
                ),
                PipelineError::Common(faq_common::Error::NotFound(msg)) => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None)
                }
                PipelineError::Common(faq_common::Error::InvalidInput(msg)) => {
                    (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, None)
                }
                ref e if e.is_collaborator() => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", e.to_string(), None),
                other => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", other.to_string(), None),
            },
        };

        let mut error = json!({
            "code": code,
            "message": message,
        });
        if let (Some(details), Some(obj)) = (details, error.as_object_mut()) {
            obj.insert("details".to_string(), details);
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
