//! Receipt endpoints

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;

use anumate_types::{ReceiptAuditEntry, ReceiptId, ReceiptVerification};

use crate::dto::{AuditQuery, CreateReceiptRequest, CreateReceiptResponse};
use crate::extractors::Tenant;
use crate::{ApiError, ApiResult, AppState};

pub async fn create(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Json(body): Json<CreateReceiptRequest>,
) -> ApiResult<(StatusCode, Json<CreateReceiptResponse>)> {
    let mut payload = body.payload;
    // The header tenant is authoritative
    payload.tenant_id = tenant_id;

    let receipt = state.receipts.create(payload).await?;
    Ok((StatusCode::CREATED, Json(CreateReceiptResponse::from(&receipt))))
}

pub async fn get(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Path(receipt_id): Path<String>,
) -> ApiResult<Json<anumate_types::Receipt>> {
    let receipt_id = parse_receipt_id(&receipt_id)?;
    let receipt = state.receipts.get(&tenant_id, &receipt_id).await?;
    Ok(Json(receipt))
}

pub async fn verify(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Path(receipt_id): Path<String>,
) -> ApiResult<Json<ReceiptVerification>> {
    let receipt_id = parse_receipt_id(&receipt_id)?;
    let verification = state.receipts.verify(&tenant_id, &receipt_id).await?;
    Ok(Json(verification))
}

pub async fn export(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Path(receipt_id): Path<String>,
) -> ApiResult<Json<anumate_types::Receipt>> {
    let receipt_id = parse_receipt_id(&receipt_id)?;
    let receipt = state.receipts.export(&tenant_id, &receipt_id).await?;
    Ok(Json(receipt))
}

pub async fn audit(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Query(query): Query<AuditQuery>,
) -> ApiResult<Json<Vec<ReceiptAuditEntry>>> {
    let entries = state
        .receipts
        .audit_log(&tenant_id, query.limit, query.offset)
        .await;
    Ok(Json(entries))
}

fn parse_receipt_id(raw: &str) -> ApiResult<ReceiptId> {
    ReceiptId::parse(raw).map_err(|_| ApiError::bad_request("invalid receipt id"))
}
