//! Execution endpoints

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use anumate_orchestrator::ExecutionRequest;
use anumate_types::RunId;

use crate::dto::{ExecuteRequest, ExecuteResponse, ExecutionStatusResponse, OkResponse};
use crate::extractors::{Correlation, IdempotencyKey, Tenant};
use crate::{ApiError, ApiResult, AppState};

pub async fn execute(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Correlation(correlation_id): Correlation,
    IdempotencyKey(header_key): IdempotencyKey,
    Json(body): Json<ExecuteRequest>,
) -> ApiResult<(StatusCode, Json<ExecuteResponse>)> {
    let request = ExecutionRequest {
        plan_hash: body.plan_hash,
        plan: body.plan,
        engine: body.engine,
        parameters: body.parameters,
        require_approval: body.require_approval,
        approvers: body.approvers,
        idempotency_key: header_key.or(body.idempotency_key),
        correlation_id: Some(correlation_id.to_string()),
    };

    let response = state
        .orchestrator
        .execute(tenant_id, request)
        .await
        .map_err(|e| ApiError::from(e).with_correlation(correlation_id.to_string()))?;

    let status = if response.cached {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((
        status,
        Json(ExecuteResponse {
            run_id: response.run_id.to_string(),
            status: response.status,
            receipt_id: response.receipt_id.map(|r| r.to_string()),
            correlation_id: response.correlation_id.to_string(),
            cached: response.cached,
        }),
    ))
}

pub async fn status(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Path(run_id): Path<String>,
) -> ApiResult<Json<ExecutionStatusResponse>> {
    let run_id = parse_run_id(&run_id)?;
    let run = state.orchestrator.get(&tenant_id, &run_id).await?;
    Ok(Json(ExecutionStatusResponse {
        run_id: run.run_id.to_string(),
        status: run.status,
        progress: run.progress,
        plan_hash: run.plan_hash,
        results: run.results,
        error: run.error,
        receipt_id: run.receipt_id.map(|r| r.to_string()),
        approval_ids: run.approval_ids.iter().map(|a| a.to_string()).collect(),
    }))
}

pub async fn pause(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Path(run_id): Path<String>,
) -> ApiResult<Json<OkResponse>> {
    let run_id = parse_run_id(&run_id)?;
    state.orchestrator.pause(&tenant_id, &run_id).await?;
    Ok(Json(OkResponse::ok()))
}

pub async fn resume(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Path(run_id): Path<String>,
) -> ApiResult<Json<OkResponse>> {
    let run_id = parse_run_id(&run_id)?;
    state.orchestrator.resume(&tenant_id, &run_id).await?;
    Ok(Json(OkResponse::ok()))
}

pub async fn cancel(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Path(run_id): Path<String>,
) -> ApiResult<Json<OkResponse>> {
    let run_id = parse_run_id(&run_id)?;
    state.orchestrator.cancel(&tenant_id, &run_id).await?;
    Ok(Json(OkResponse::ok()))
}

fn parse_run_id(raw: &str) -> ApiResult<RunId> {
    RunId::parse(raw).map_err(|_| ApiError::bad_request("invalid run id"))
}
