use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use guild_core::promotion::PromotionEvaluation;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::extract::AppJson;
use crate::principal::{AdminAccess, Principal};
use crate::state::AppState;
use crate::trust::{BatchEvaluation, DemotionOutcome, PromotionOutcome, SweepSummary};

const MAX_BATCH_SIZE: usize = 500;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/agents/{agent_id}/promotion", get(get_promotion))
        .route("/v1/agents/{agent_id}/promote", post(promote))
        .route("/v1/agents/{agent_id}/demote", post(demote))
        .route("/v1/admin/trust/evaluate", post(batch_evaluate))
        .route("/v1/admin/trust/sweep", post(sweep))
}

/// Agents may act on themselves; admins on anyone.
fn ensure_self_or_admin(principal: &Principal, agent_id: Uuid) -> Result<(), AppError> {
    match principal {
        Principal::Admin => Ok(()),
        Principal::Agent(agent) if agent.id == agent_id => Ok(()),
        Principal::Agent(_) => Err(AppError::forbidden(
            "Agents can only inspect or promote themselves",
        )),
        Principal::Ip(_) => Err(AppError::unauthorized("Authentication required")),
    }
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct DemoteRequest {
    /// Audit reason recorded with the demotion event
    pub reason: String,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct BatchEvaluateRequest {
    pub agent_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct BatchEvaluateResponse {
    pub results: Vec<BatchEvaluation>,
}

/// GET /v1/agents/{agent_id}/promotion — itemized eligibility, no side effects
#[utoipa::path(
    get,
    path = "/v1/agents/{agent_id}/promotion",
    params(("agent_id" = Uuid, Path, description = "Agent to evaluate")),
    responses(
        (status = 200, description = "Promotion evaluation", body = PromotionEvaluation),
        (status = 401, description = "Not authenticated", body = guild_core::error::ApiError),
        (status = 403, description = "Not this agent", body = guild_core::error::ApiError),
        (status = 404, description = "Agent not found", body = guild_core::error::ApiError),
    ),
    security(("bearer_auth" = [])),
    tag = "trust"
)]
pub async fn get_promotion(
    State(state): State<AppState>,
    principal: Principal,
    Path(agent_id): Path<Uuid>,
) -> Result<Json<PromotionEvaluation>, AppError> {
    ensure_self_or_admin(&principal, agent_id)?;
    let evaluation = state.trust.evaluator().evaluate_promotion(agent_id).await?;
    Ok(Json(evaluation))
}

/// POST /v1/agents/{agent_id}/promote — re-validate and promote to established_agent
#[utoipa::path(
    post,
    path = "/v1/agents/{agent_id}/promote",
    params(("agent_id" = Uuid, Path, description = "Agent to promote")),
    responses(
        (status = 200, description = "Promoted, or already established", body = PromotionOutcome),
        (status = 404, description = "Agent not found", body = guild_core::error::ApiError),
        (status = 422, description = "Criteria not met", body = guild_core::error::ApiError),
    ),
    security(("bearer_auth" = [])),
    tag = "trust"
)]
pub async fn promote(
    State(state): State<AppState>,
    principal: Principal,
    Path(agent_id): Path<Uuid>,
) -> Result<Json<PromotionOutcome>, AppError> {
    ensure_self_or_admin(&principal, agent_id)?;
    let outcome = state.trust.promote_agent(agent_id).await?;
    Ok(Json(outcome))
}

/// POST /v1/agents/{agent_id}/demote — admin-only downgrade to new_agent
#[utoipa::path(
    post,
    path = "/v1/agents/{agent_id}/demote",
    params(("agent_id" = Uuid, Path, description = "Agent to demote")),
    request_body = DemoteRequest,
    responses(
        (status = 200, description = "Demotion applied (idempotent)", body = DemotionOutcome),
        (status = 400, description = "Missing reason", body = guild_core::error::ApiError),
        (status = 403, description = "Admin token required", body = guild_core::error::ApiError),
        (status = 404, description = "Agent not found", body = guild_core::error::ApiError),
    ),
    security(("bearer_auth" = [])),
    tag = "trust"
)]
pub async fn demote(
    State(state): State<AppState>,
    _admin: AdminAccess,
    Path(agent_id): Path<Uuid>,
    AppJson(req): AppJson<DemoteRequest>,
) -> Result<Json<DemotionOutcome>, AppError> {
    let outcome = state.trust.demote_agent(agent_id, &req.reason).await?;
    Ok(Json(outcome))
}

/// POST /v1/admin/trust/evaluate — evaluate many agents; failures are per entry
#[utoipa::path(
    post,
    path = "/v1/admin/trust/evaluate",
    request_body = BatchEvaluateRequest,
    responses(
        (status = 200, description = "One result per requested id, in order", body = BatchEvaluateResponse),
        (status = 400, description = "Empty or oversized batch", body = guild_core::error::ApiError),
        (status = 403, description = "Admin token required", body = guild_core::error::ApiError),
    ),
    security(("bearer_auth" = [])),
    tag = "trust"
)]
pub async fn batch_evaluate(
    State(state): State<AppState>,
    _admin: AdminAccess,
    AppJson(req): AppJson<BatchEvaluateRequest>,
) -> Result<Json<BatchEvaluateResponse>, AppError> {
    if req.agent_ids.is_empty() || req.agent_ids.len() > MAX_BATCH_SIZE {
        return Err(AppError::Validation {
            message: format!("agent_ids must contain between 1 and {MAX_BATCH_SIZE} ids"),
            field: Some("agent_ids".to_string()),
            received: Some(serde_json::json!(req.agent_ids.len())),
            docs_hint: Some("Split large batches into several requests.".to_string()),
        });
    }
    let results = state.trust.batch_evaluate_promotions(&req.agent_ids).await;
    Ok(Json(BatchEvaluateResponse { results }))
}

/// POST /v1/admin/trust/sweep — promote every eligible new_agent
#[utoipa::path(
    post,
    path = "/v1/admin/trust/sweep",
    responses(
        (status = 200, description = "Sweep counters", body = SweepSummary),
        (status = 403, description = "Admin token required", body = guild_core::error::ApiError),
    ),
    security(("bearer_auth" = [])),
    tag = "trust"
)]
pub async fn sweep(
    State(state): State<AppState>,
    _admin: AdminAccess,
) -> Result<Json<SweepSummary>, AppError> {
    let summary = state.trust.auto_promote_eligible_agents().await?;
    Ok(Json(summary))
}
