//! Review API handlers
//!
//! Candidate queue, reviewer actions, calibration, stats and flagged FAQs.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::models::{
    CalibrationStatus, Candidate, CandidateUpdate, ConversationThread, FlaggedFaq, PipelineStats, Protocol,
    QueueCounts, ResolveAction, Routing, Source, ThreadHistory, UndoAction,
};
use crate::AppState;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 200;

/// Queue filter shared by the list endpoints
#[derive(Debug, Default, Deserialize)]
pub struct QueueQuery {
    pub source: Option<Source>,
    pub routing: Option<Routing>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /candidates/pending response
#[derive(Debug, Serialize)]
pub struct PendingResponse {
    pub candidates: Vec<Candidate>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// GET /candidates/current response
#[derive(Debug, Serialize)]
pub struct CurrentItemResponse {
    pub candidate: Option<Candidate>,
    pub remaining: i64,
}

/// Reviewer-editable fields of a candidate
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CandidatePatch {
    pub edited_question_text: Option<String>,
    pub edited_staff_answer: Option<String>,
    pub category: Option<String>,
    pub protocol: Option<Protocol>,
}

impl From<CandidatePatch> for CandidateUpdate {
    fn from(patch: CandidatePatch) -> Self {
        CandidateUpdate {
            edited_question_text: patch.edited_question_text,
            edited_staff_answer: patch.edited_staff_answer,
            category: patch.category,
            protocol: patch.protocol.map(Some),
            ..Default::default()
        }
    }
}

/// POST /candidates/:id/approve request
#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub reviewer: String,
    /// Approve even when similar FAQs exist
    #[serde(default)]
    pub force: bool,
}

/// POST /candidates/:id/reject request
#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reviewer: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// POST /candidates/:id/undo request
#[derive(Debug, Deserialize)]
pub struct UndoRequest {
    pub action: UndoAction,
    #[serde(default)]
    pub faq_id: Option<String>,
}

/// POST /candidates/:id/regenerate request
#[derive(Debug, Default, Deserialize)]
pub struct RegenerateRequest {
    #[serde(default)]
    pub protocol: Option<Protocol>,
}

/// POST /flagged-faqs/:thread_id/resolve request
#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub action: ResolveAction,
    #[serde(default)]
    pub updated_answer: Option<String>,
    pub reviewer: String,
}

fn require_reviewer(reviewer: &str) -> ApiResult<()> {
    if reviewer.trim().is_empty() {
        return Err(ApiError::BadRequest("reviewer must not be empty".to_string()));
    }
    Ok(())
}

/// GET /candidates/pending
pub async fn list_pending(
    State(state): State<AppState>,
    Query(query): Query<QueueQuery>,
) -> ApiResult<Json<PendingResponse>> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0).max(0);

    let candidates = state
        .orchestrator
        .get_pending_reviews(query.source, query.routing, limit, offset)
        .await?;
    let total = state
        .orchestrator
        .count_pending_reviews(query.source, query.routing)
        .await?;

    Ok(Json(PendingResponse {
        candidates,
        total,
        limit,
        offset,
    }))
}

/// GET /candidates/current
pub async fn current_item(
    State(state): State<AppState>,
    Query(query): Query<QueueQuery>,
) -> ApiResult<Json<CurrentItemResponse>> {
    let candidate = state
        .orchestrator
        .get_current_item(query.source, query.routing)
        .await?;
    let remaining = state
        .orchestrator
        .count_pending_reviews(query.source, query.routing)
        .await?;
    Ok(Json(CurrentItemResponse { candidate, remaining }))
}

/// GET /candidates/:id
pub async fn get_candidate(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Candidate>> {
    Ok(Json(state.orchestrator.get_candidate(id).await?))
}

/// PATCH /candidates/:id
pub async fn patch_candidate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<CandidatePatch>,
) -> ApiResult<Json<Candidate>> {
    Ok(Json(state.orchestrator.update_candidate(id, patch.into()).await?))
}

/// POST /candidates/:id/approve
///
/// 409 with the similar FAQs when the duplicate gate blocks approval.
pub async fn approve(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<ApproveRequest>,
) -> ApiResult<Json<Candidate>> {
    require_reviewer(&request.reviewer)?;
    let candidate = if request.force {
        state.orchestrator.approve_candidate_force(id, &request.reviewer).await?
    } else {
        state.orchestrator.approve_candidate(id, &request.reviewer).await?
    };
    Ok(Json(candidate))
}

/// POST /candidates/:id/reject
pub async fn reject(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<RejectRequest>,
) -> ApiResult<Json<Candidate>> {
    require_reviewer(&request.reviewer)?;
    Ok(Json(
        state
            .orchestrator
            .reject_candidate(id, &request.reviewer, request.reason.as_deref())
            .await?,
    ))
}

/// POST /candidates/:id/skip
pub async fn skip(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Candidate>> {
    Ok(Json(state.orchestrator.skip_candidate(id).await?))
}

/// POST /candidates/:id/undo
pub async fn undo(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<UndoRequest>,
) -> ApiResult<Json<Candidate>> {
    Ok(Json(
        state
            .orchestrator
            .undo_action(id, request.action, request.faq_id.as_deref())
            .await?,
    ))
}

/// POST /candidates/:id/regenerate
pub async fn regenerate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Option<Json<RegenerateRequest>>,
) -> ApiResult<Json<Candidate>> {
    let protocol = body.and_then(|Json(r)| r.protocol);
    Ok(Json(state.orchestrator.regenerate_candidate_answer(id, protocol).await?))
}

/// GET /queue/counts
pub async fn queue_counts(
    State(state): State<AppState>,
    Query(query): Query<QueueQuery>,
) -> ApiResult<Json<QueueCounts>> {
    Ok(Json(state.orchestrator.get_queue_counts(query.source).await?))
}

/// GET /calibration
pub async fn calibration(State(state): State<AppState>) -> ApiResult<Json<CalibrationStatus>> {
    Ok(Json(state.orchestrator.get_calibration_status().await?))
}

/// GET /stats
pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<PipelineStats>> {
    Ok(Json(state.orchestrator.get_pipeline_stats().await?))
}

/// GET /threads/:id
pub async fn thread_history(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<ThreadHistory>> {
    Ok(Json(state.orchestrator.get_thread_history(id).await?))
}

/// GET /flagged-faqs
pub async fn flagged_faqs(State(state): State<AppState>) -> ApiResult<Json<Vec<FlaggedFaq>>> {
    Ok(Json(state.orchestrator.get_flagged_faqs().await?))
}

/// POST /flagged-faqs/:thread_id/resolve
pub async fn resolve_flagged(
    State(state): State<AppState>,
    Path(thread_id): Path<i64>,
    Json(request): Json<ResolveRequest>,
) -> ApiResult<Json<ConversationThread>> {
    require_reviewer(&request.reviewer)?;
    Ok(Json(
        state
            .orchestrator
            .resolve_flagged_faq(
                thread_id,
                request.action,
                request.updated_answer.as_deref(),
                &request.reviewer,
            )
            .await?,
    ))
}

/// Build candidate queue and review routes
pub fn review_routes() -> Router<AppState> {
    Router::new()
        .route("/candidates/pending", get(list_pending))
        .route("/candidates/current", get(current_item))
        .route("/candidates/:id", get(get_candidate).patch(patch_candidate))
        .route("/candidates/:id/approve", post(approve))
        .route("/candidates/:id/reject", post(reject))
        .route("/candidates/:id/skip", post(skip))
        .route("/candidates/:id/undo", post(undo))
        .route("/candidates/:id/regenerate", post(regenerate))
        .route("/queue/counts", get(queue_counts))
        .route("/calibration", get(calibration))
        .route("/stats", get(stats))
        .route("/threads/:id", get(thread_history))
}

/// Build flagged FAQ routes
pub fn flagged_routes() -> Router<AppState> {
    Router::new()
        .route("/flagged-faqs", get(flagged_faqs))
        .route("/flagged-faqs/:thread_id/resolve", post(resolve_flagged))
}
