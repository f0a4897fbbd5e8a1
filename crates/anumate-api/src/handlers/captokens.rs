//! Capability token endpoints

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;

use crate::dto::{
    AuditQuery, IssueTokenRequest, IssueTokenResponse, OkResponse, RefreshTokenRequest,
    RevokeTokenRequest, VerifyTokenRequest, VerifyTokenResponse,
};
use crate::extractors::{Client, Tenant};
use crate::{ApiResult, AppState};

pub async fn issue(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Json(body): Json<IssueTokenRequest>,
) -> ApiResult<(StatusCode, Json<IssueTokenResponse>)> {
    let issued = state
        .tokens
        .issue(tenant_id, &body.subject, body.capabilities, body.ttl_secs, None)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(IssueTokenResponse {
            token: issued.token,
            jti: issued.token_id,
            exp: issued.expires_at.timestamp(),
        }),
    ))
}

pub async fn verify(
    State(state): State<AppState>,
    Tenant(_tenant_id): Tenant,
    Client(attrs): Client,
    Json(body): Json<VerifyTokenRequest>,
) -> ApiResult<Json<VerifyTokenResponse>> {
    let claims = state.tokens.verify(&body.token, &attrs).await?;
    Ok(Json(VerifyTokenResponse {
        valid: true,
        claims,
    }))
}

pub async fn refresh(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Json(body): Json<RefreshTokenRequest>,
) -> ApiResult<Json<IssueTokenResponse>> {
    let issued = state
        .tokens
        .refresh(&body.token, tenant_id, body.new_ttl)
        .await?;
    Ok(Json(IssueTokenResponse {
        token: issued.token,
        jti: issued.token_id,
        exp: issued.expires_at.timestamp(),
    }))
}

pub async fn revoke(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Json(body): Json<RevokeTokenRequest>,
) -> ApiResult<Json<OkResponse>> {
    state.tokens.revoke(tenant_id, &body.token_id).await?;
    Ok(Json(OkResponse::ok()))
}

pub async fn audit(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Query(query): Query<AuditQuery>,
) -> ApiResult<Json<Vec<anumate_types::TokenAuditRecord>>> {
    let records = state
        .tokens
        .audit_trail(tenant_id, None, query.limit)
        .await?;
    Ok(Json(records))
}
