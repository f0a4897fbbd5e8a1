//! Capsule registry endpoints
//!
//! A thin surface over the registry collaborator, enough for tenants to
//! register definitions and for the compiler to resolve dependencies.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;

use anumate_compiler::{parse_capsule_yaml, validate_definition};
use anumate_types::{Capsule, CapsuleId};

use crate::dto::{RegisterCapsuleRequest, RegisterCapsuleResponse};
use crate::extractors::Tenant;
use crate::{ApiError, ApiResult, AppState};

pub async fn register(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Json(body): Json<RegisterCapsuleRequest>,
) -> ApiResult<(StatusCode, Json<RegisterCapsuleResponse>)> {
    let definition = match (&body.yaml, &body.definition) {
        (Some(yaml), _) => parse_capsule_yaml(yaml)?,
        (None, Some(definition)) => definition.clone(),
        (None, None) => {
            return Err(ApiError::bad_request("provide either 'yaml' or 'definition'"))
        }
    };

    let report = validate_definition(&definition);
    if !report.is_valid() {
        return Err(ApiError::bad_request(report.errors.join("; ")));
    }

    let checksum = anumate_crypto_checksum(&definition)?;
    let capsule = Capsule {
        id: CapsuleId::new(),
        tenant_id,
        name: definition.name.clone(),
        version: definition.version.clone(),
        definition,
        checksum: checksum.clone(),
        signature: None,
        created_at: Utc::now(),
        deleted_at: None,
    };
    let response = RegisterCapsuleResponse {
        capsule_id: capsule.id.to_string(),
        name: capsule.name.clone(),
        version: capsule.version.clone(),
        checksum,
    };
    state.registry.register(capsule).await;

    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn get(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Path(capsule_id): Path<String>,
) -> ApiResult<Json<Capsule>> {
    let capsule_id =
        CapsuleId::parse(&capsule_id).map_err(|_| ApiError::bad_request("invalid capsule id"))?;
    let capsule = state
        .registry
        .get_by_id(&tenant_id, &capsule_id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("capsule {capsule_id} not found")))?;
    Ok(Json(capsule))
}

fn anumate_crypto_checksum(
    definition: &anumate_types::CapsuleDefinition,
) -> ApiResult<String> {
    anumate_crypto::hash_canonical(definition)
        .map_err(|e| ApiError::new(anumate_types::ErrorKind::Internal, e.to_string()))
}
