//! Compilation endpoints

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use anumate_compiler::{parse_capsule_yaml, JobStatus, OptimizationLevel};
use anumate_types::{CapsuleDefinition, CompileJobId, ExecutablePlan};

use crate::dto::{CompileJobResponse, CompileRequest, CompileResponse};
use crate::extractors::Tenant;
use crate::{ApiError, ApiResult, AppState};

fn definition_from(body: &CompileRequest) -> ApiResult<CapsuleDefinition> {
    match (&body.yaml, &body.definition) {
        (Some(yaml), _) => Ok(parse_capsule_yaml(yaml)?),
        (None, Some(definition)) => Ok(definition.clone()),
        (None, None) => Err(ApiError::bad_request(
            "provide either 'yaml' or 'definition'",
        )),
    }
}

fn level_from(body: &CompileRequest) -> ApiResult<OptimizationLevel> {
    match body.optimization_level.as_deref() {
        None | Some("standard") => Ok(OptimizationLevel::Standard),
        Some("none") => Ok(OptimizationLevel::None),
        Some(other) => Err(ApiError::bad_request(format!(
            "unknown optimization level '{other}'"
        ))),
    }
}

pub async fn compile(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Json(body): Json<CompileRequest>,
) -> ApiResult<axum::response::Response> {
    use axum::response::IntoResponse;

    let definition = definition_from(&body)?;
    let level = level_from(&body)?;

    if body.r#async {
        let job_id = state
            .compile_jobs
            .submit(tenant_id, definition, level)
            .await;
        return Ok((
            StatusCode::ACCEPTED,
            Json(CompileJobResponse {
                job_id: job_id.to_string(),
                status: "queued".to_string(),
            }),
        )
            .into_response());
    }

    let result = state.compiler.compile(tenant_id, &definition, level).await?;

    if !result.cached {
        let _ = state
            .events
            .publish(
                anumate_types::subjects::PLAN_COMPILED,
                "com.anumate.plan.compiled",
                tenant_id,
                None,
                serde_json::json!({
                    "plan_hash": result.plan_hash,
                    "capsule_name": definition.name,
                    "capsule_version": definition.version,
                }),
            )
            .await;
    }

    Ok(Json(CompileResponse {
        plan_hash: result.plan_hash,
        compiled_plan: (*result.plan).clone(),
        warnings: result.warnings,
        resolved_dependencies: result.resolved_dependencies,
        cached: result.cached,
    })
    .into_response())
}

pub async fn job_status(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Path(job_id): Path<String>,
) -> ApiResult<Json<CompileJobResponse>> {
    let job_id = CompileJobId::parse(&job_id)
        .map_err(|_| ApiError::bad_request("invalid compile job id"))?;
    let status = state.compile_jobs.status(&tenant_id, &job_id).await?;
    Ok(Json(CompileJobResponse {
        job_id: job_id.to_string(),
        status: status.as_str().to_string(),
    }))
}

pub async fn get_plan(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Path(plan_hash): Path<String>,
) -> ApiResult<Json<ExecutablePlan>> {
    let plan = state
        .plan_cache
        .get(&tenant_id, &plan_hash)
        .await
        .ok_or_else(|| ApiError::not_found(format!("plan {plan_hash} not found")))?;
    Ok(Json((*plan).clone()))
}

// Surfaced so callers can retrieve a finished async compilation
pub async fn job_result(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Path(job_id): Path<String>,
) -> ApiResult<Json<CompileResponse>> {
    let job_id = CompileJobId::parse(&job_id)
        .map_err(|_| ApiError::bad_request("invalid compile job id"))?;
    match state.compile_jobs.status(&tenant_id, &job_id).await? {
        JobStatus::Completed(result) => Ok(Json(CompileResponse {
            plan_hash: result.plan_hash,
            compiled_plan: (*result.plan).clone(),
            warnings: result.warnings,
            resolved_dependencies: result.resolved_dependencies,
            cached: result.cached,
        })),
        JobStatus::Failed(error) => Err(ApiError::bad_request(error)),
        _ => Err(ApiError::new(
            anumate_types::ErrorKind::Conflict,
            "compilation has not completed",
        )),
    }
}
