//! GhostRun simulation endpoints

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use anumate_ghostrun::{GhostRunConfig, PreflightReport};
use anumate_types::GhostRunId;

use crate::dto::{GhostRunRequest, GhostRunResponse, GhostRunStatusResponse, OkResponse};
use crate::extractors::Tenant;
use crate::{ApiError, ApiResult, AppState};

pub async fn start(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Json(body): Json<GhostRunRequest>,
) -> ApiResult<(StatusCode, Json<GhostRunResponse>)> {
    let plan = state
        .plan_cache
        .get(&tenant_id, &body.plan_hash)
        .await
        .ok_or_else(|| ApiError::not_found(format!("plan {} not found", body.plan_hash)))?;

    let config = GhostRunConfig {
        seed: body.seed,
        ..Default::default()
    };
    let run_id = state.ghostrun.start(tenant_id, plan, config).await;

    Ok((
        StatusCode::ACCEPTED,
        Json(GhostRunResponse {
            run_id: run_id.to_string(),
            status: "Queued".to_string(),
        }),
    ))
}

pub async fn status(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Path(run_id): Path<String>,
) -> ApiResult<Json<GhostRunStatusResponse>> {
    let run_id = parse_run_id(&run_id)?;
    let run = state.ghostrun.status(&tenant_id, &run_id).await?;
    Ok(Json(GhostRunStatusResponse {
        run_id: run.run_id.to_string(),
        status: run.status.to_string(),
        progress: run.progress,
        error: run.error,
    }))
}

pub async fn report(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Path(run_id): Path<String>,
) -> ApiResult<Json<PreflightReport>> {
    let run_id = parse_run_id(&run_id)?;
    let report = state.ghostrun.report(&tenant_id, &run_id).await?;
    Ok(Json(report))
}

pub async fn cancel(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Path(run_id): Path<String>,
) -> ApiResult<Json<OkResponse>> {
    let run_id = parse_run_id(&run_id)?;
    state.ghostrun.cancel(&tenant_id, &run_id).await?;
    Ok(Json(OkResponse::ok()))
}

fn parse_run_id(raw: &str) -> ApiResult<GhostRunId> {
    GhostRunId::parse(raw).map_err(|_| ApiError::bad_request("invalid simulation run id"))
}
