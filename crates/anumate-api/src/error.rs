//! API error handling
//!
//! User-visible failures follow the RFC 7807 problem shape and always carry
//! the correlation ID. Every error kind maps to exactly one HTTP status;
//! internal detail is redacted.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use anumate_captokens::TokenError;
use anumate_types::{ErrorKind, IntoErrorKind};

/// RFC 7807 problem document
#[derive(Debug, Serialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// API error: a taxonomy kind plus presentation detail
#[derive(Debug)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub detail: String,
    pub correlation_id: Option<String>,
    /// Optional status override for cases the taxonomy cannot express
    /// (e.g. expired tokens answer 410)
    status_override: Option<StatusCode>,
    /// Retry-After header value for busy responses
    retry_after: Option<u64>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            correlation_id: None,
            status_override: None,
            retry_after: None,
        }
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status_override = Some(status);
        self
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after = Some(secs);
        self
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, detail)
    }

    pub fn status(&self) -> StatusCode {
        if let Some(status) = self.status_override {
            return status;
        }
        match self.kind {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Denied => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Build from any component error carrying a taxonomy kind
    pub fn from_component<E>(error: E) -> Self
    where
        E: IntoErrorKind + std::fmt::Display,
    {
        let kind = error.error_kind();
        let detail = match kind {
            // Internal detail stays out of responses
            ErrorKind::Internal => "internal error".to_string(),
            _ => error.to_string(),
        };
        Self::new(kind, detail)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(
                detail = %self.detail,
                correlation_id = ?self.correlation_id,
                "Request failed"
            );
        }
        let problem = Problem {
            problem_type: format!("https://anumate.dev/errors/{}", self.kind.code()),
            title: self.kind.code().to_string(),
            status: status.as_u16(),
            detail: self.detail,
            correlation_id: self.correlation_id,
        };
        let mut response = (status, Json(problem)).into_response();
        if let Some(secs) = self.retry_after {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}

/// Token errors carry two statuses the taxonomy cannot express
impl From<TokenError> for ApiError {
    fn from(error: TokenError) -> Self {
        let base = Self::from_component(&error);
        match error {
            TokenError::Expired => base.with_status(StatusCode::GONE),
            _ => base,
        }
    }
}

impl From<anumate_orchestrator::OrchestratorError> for ApiError {
    fn from(error: anumate_orchestrator::OrchestratorError) -> Self {
        let retry_after = match &error {
            anumate_orchestrator::OrchestratorError::ServiceBusy { retry_after_secs } => {
                Some(*retry_after_secs)
            }
            _ => None,
        };
        let mut api = Self::from_component(&error);
        if let Some(secs) = retry_after {
            api = api.with_retry_after(secs);
        }
        api
    }
}

impl From<anumate_compiler::CompileError> for ApiError {
    fn from(error: anumate_compiler::CompileError) -> Self {
        Self::from_component(&error)
    }
}

impl From<anumate_ghostrun::GhostRunError> for ApiError {
    fn from(error: anumate_ghostrun::GhostRunError) -> Self {
        Self::from_component(&error)
    }
}

impl From<anumate_approvals::ApprovalError> for ApiError {
    fn from(error: anumate_approvals::ApprovalError) -> Self {
        Self::from_component(&error)
    }
}

impl From<anumate_receipts::ReceiptError> for ApiError {
    fn from(error: anumate_receipts::ReceiptError) -> Self {
        Self::from_component(&error)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_status_mapping() {
        assert_eq!(
            ApiError::new(ErrorKind::Validation, "x").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::new(ErrorKind::Conflict, "x").status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::new(ErrorKind::Denied, "x").status(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn test_expired_token_is_gone() {
        let api: ApiError = TokenError::Expired.into();
        assert_eq!(api.status(), StatusCode::GONE);
    }

    #[test]
    fn test_replay_is_conflict() {
        let api: ApiError = TokenError::ReplayDetected { jti: "j".into() }.into();
        assert_eq!(api.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_internal_detail_is_redacted() {
        let api = ApiError::from_component(&anumate_orchestrator::OrchestratorError::Internal(
            "secret db string".to_string(),
        ));
        assert_eq!(api.detail, "internal error");
    }
}
