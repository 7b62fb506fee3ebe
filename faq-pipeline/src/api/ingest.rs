//! Ingestion endpoints used by the chat sync services

use axum::{extract::State, routing::post, Json, Router};

use crate::error::{ApiError, ApiResult};
use crate::models::{
    BatchExtractionResult, BatchRequest, BisqConversation, CorrectionEvent, CorrectionOutcome, MatrixAnswer,
    ProcessingResult,
};
use crate::AppState;

/// POST /ingest/bisq
pub async fn ingest_bisq(
    State(state): State<AppState>,
    Json(conversation): Json<BisqConversation>,
) -> ApiResult<Json<ProcessingResult>> {
    Ok(Json(state.orchestrator.process_bisq_conversation(&conversation).await?))
}

/// POST /ingest/matrix
pub async fn ingest_matrix(
    State(state): State<AppState>,
    Json(answer): Json<MatrixAnswer>,
) -> ApiResult<Json<ProcessingResult>> {
    Ok(Json(state.orchestrator.process_matrix_answer(&answer).await?))
}

/// POST /ingest/correction
pub async fn ingest_correction(
    State(state): State<AppState>,
    Json(correction): Json<CorrectionEvent>,
) -> ApiResult<Json<CorrectionOutcome>> {
    if correction.reply_to_id.trim().is_empty() {
        return Err(ApiError::BadRequest("reply_to_id must not be empty".to_string()));
    }
    Ok(Json(state.orchestrator.handle_correction(&correction).await?))
}

/// POST /ingest/batch
pub async fn ingest_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> ApiResult<Json<BatchExtractionResult>> {
    tracing::info!(
        source = %request.source,
        messages = request.messages.len(),
        "Batch extraction requested"
    );
    Ok(Json(state.orchestrator.extract_faqs_batch(&request).await?))
}

/// Build ingestion routes
pub fn ingest_routes() -> Router<AppState> {
    Router::new()
        .route("/ingest/bisq", post(ingest_bisq))
        .route("/ingest/matrix", post(ingest_matrix))
        .route("/ingest/correction", post(ingest_correction))
        .route("/ingest/batch", post(ingest_batch))
}
