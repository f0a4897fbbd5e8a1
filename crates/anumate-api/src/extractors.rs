//! Request extractors
//!
//! Tenant and correlation context comes from headers: `X-Tenant-ID` is
//! mandatory on every call, `X-Correlation-ID` is honored when present and
//! generated otherwise, `Idempotency-Key` is optional.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use anumate_captokens::ClientAttrs;
use anumate_types::{CorrelationId, TenantId};

use crate::ApiError;

/// Header carrying the tenant
pub const TENANT_HEADER: &str = "x-tenant-id";
/// Header carrying the correlation ID
pub const CORRELATION_HEADER: &str = "x-correlation-id";
/// Header carrying the idempotency key
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

/// The active tenant, required on every request
#[derive(Debug, Clone, Copy)]
pub struct Tenant(pub TenantId);

impl<S> FromRequestParts<S> for Tenant
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::bad_request("missing X-Tenant-ID header"))?;
        let tenant_id = TenantId::parse(raw)
            .map_err(|_| ApiError::bad_request("X-Tenant-ID is not a valid tenant id"))?;
        Ok(Tenant(tenant_id))
    }
}

/// Correlation ID, generated when the caller does not supply one
#[derive(Debug, Clone)]
pub struct Correlation(pub CorrelationId);

impl<S> FromRequestParts<S> for Correlation
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let correlation = parts
            .headers
            .get(CORRELATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(CorrelationId::from_string)
            .unwrap_or_default();
        Ok(Correlation(correlation))
    }
}

/// Optional idempotency key header
#[derive(Debug, Clone)]
pub struct IdempotencyKey(pub Option<String>);

impl<S> FromRequestParts<S> for IdempotencyKey
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let key = parts
            .headers
            .get(IDEMPOTENCY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        Ok(IdempotencyKey(key))
    }
}

/// Client attributes captured for audit records
#[derive(Debug, Clone, Default)]
pub struct Client(pub ClientAttrs);

impl<S> FromRequestParts<S> for Client
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let client_ip = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').next().unwrap_or(v).trim().to_string());
        let user_agent = parts
            .headers
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        Ok(Client(ClientAttrs {
            client_ip,
            user_agent,
        }))
    }
}
