//! Approval endpoints

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{Duration, Utc};

use anumate_types::{
    ApprovalId, ApprovalStepPolicy, Clarification, ClarificationId, Decision, QuorumRule, RunId,
};

use crate::dto::{
    ApprovalResponse, CreateApprovalRequest, CreateApprovalResponse, DecisionRequest,
    DelegateRequest, OkResponse,
};
use crate::extractors::Tenant;
use crate::{ApiError, ApiResult, AppState};

pub async fn create(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Json(body): Json<CreateApprovalRequest>,
) -> ApiResult<(StatusCode, Json<CreateApprovalResponse>)> {
    let run_id =
        RunId::parse(&body.run_id).map_err(|_| ApiError::bad_request("invalid run id"))?;
    if body.approvers.is_empty() {
        return Err(ApiError::bad_request("approvers must not be empty"));
    }
    let quorum = match body.quorum.as_deref() {
        None | Some("any") => QuorumRule::Any,
        Some("all") => QuorumRule::All,
        Some(other) => {
            return Err(ApiError::bad_request(format!("unknown quorum '{other}'")))
        }
    };

    let clarification = Clarification {
        clarification_id: ClarificationId::new(),
        run_id,
        question: body.question,
        step_id: None,
        context: serde_json::json!({}),
    };
    let policy = ApprovalStepPolicy {
        name: "manual".to_string(),
        approvers: body.approvers,
        quorum,
        deadline: Utc::now() + Duration::seconds(body.deadline_secs.max(1) as i64),
        escalate_to: body.escalate_to,
        escalation_extension_secs: body.escalation_extension_secs,
    };

    let approval_id = state
        .approvals
        .create(tenant_id, clarification, vec![policy])
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateApprovalResponse {
            approval_id: approval_id.to_string(),
        }),
    ))
}

pub async fn get(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Path(approval_id): Path<String>,
) -> ApiResult<Json<ApprovalResponse>> {
    let approval_id = parse_approval_id(&approval_id)?;
    let summary = state.approvals.get(&tenant_id, &approval_id).await?;
    Ok(Json(ApprovalResponse { summary }))
}

pub async fn approve(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Path(approval_id): Path<String>,
    Json(body): Json<DecisionRequest>,
) -> ApiResult<Json<ApprovalResponse>> {
    decide(state, tenant_id, &approval_id, Decision::Approve, body).await
}

pub async fn reject(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Path(approval_id): Path<String>,
    Json(body): Json<DecisionRequest>,
) -> ApiResult<Json<ApprovalResponse>> {
    decide(state, tenant_id, &approval_id, Decision::Reject, body).await
}

pub async fn delegate(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Path(approval_id): Path<String>,
    Json(body): Json<DelegateRequest>,
) -> ApiResult<Json<OkResponse>> {
    let approval_id = parse_approval_id(&approval_id)?;
    state
        .approvals
        .delegate(&tenant_id, &approval_id, &body.from, &body.to, body.reason)
        .await?;
    Ok(Json(OkResponse::ok()))
}

pub async fn poll_by_clarification(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Path(clarification_id): Path<String>,
) -> ApiResult<Json<ApprovalResponse>> {
    let clarification_id = ClarificationId::parse(&clarification_id)
        .map_err(|_| ApiError::bad_request("invalid clarification id"))?;
    let summary = state
        .approvals
        .poll_by_clarification(&tenant_id, &clarification_id)
        .await?;
    Ok(Json(ApprovalResponse { summary }))
}

async fn decide(
    state: AppState,
    tenant_id: anumate_types::TenantId,
    approval_id: &str,
    decision: Decision,
    body: DecisionRequest,
) -> ApiResult<Json<ApprovalResponse>> {
    let approval_id = parse_approval_id(approval_id)?;
    let summary = state
        .approvals
        .decide(&tenant_id, &approval_id, &body.actor, decision, body.reason)
        .await?;
    Ok(Json(ApprovalResponse { summary }))
}

fn parse_approval_id(raw: &str) -> ApiResult<ApprovalId> {
    ApprovalId::parse(raw).map_err(|_| ApiError::bad_request("invalid approval id"))
}
