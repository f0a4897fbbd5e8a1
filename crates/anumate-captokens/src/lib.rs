//! Anumate Capability Tokens
//!
//! Short-lived bearer credentials binding {subject, capabilities, tenant} to
//! a time window for a single execution. Tokens are JWTs signed with Ed25519
//! (EdDSA) and expire after at most five minutes.
//!
//! # Replay protection
//!
//! A token's jti is consumed on first successful verification through the
//! [`ReplayGuard`]; a second verification of the same jti within the token's
//! lifetime fails with [`TokenError::ReplayDetected`]. The in-memory guard is
//! for tests and local development only; production deployments use the
//! durable guard from `anumate-db`.

pub mod audit;
pub mod replay;
pub mod service;
pub mod store;

pub use audit::*;
pub use replay::*;
pub use service::*;
pub use store::*;

use anumate_types::{ErrorKind, IntoErrorKind};
use thiserror::Error;

/// Capability token errors
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Token TTL cannot exceed {max} seconds, got {requested}")]
    InvalidTtl { requested: u64, max: u64 },

    #[error("Invalid token: {0}")]
    Invalid(String),

    #[error("Token has expired")]
    Expired,

    #[error("Token replay detected for jti {jti}")]
    ReplayDetected { jti: String },

    #[error("Token has been revoked")]
    Revoked,

    #[error("Token {token_id} not found")]
    NotFound { token_id: String },

    #[error("Token tenant does not match request tenant")]
    TenantMismatch,

    #[error("Missing capability: {capability}")]
    MissingCapability { capability: String },

    #[error("Token store error: {0}")]
    Store(String),

    #[error("Internal token error: {0}")]
    Internal(String),
}

pub type TokenResult<T> = Result<T, TokenError>;

impl IntoErrorKind for TokenError {
    fn error_kind(&self) -> ErrorKind {
        match self {
            Self::InvalidTtl { .. } => ErrorKind::Validation,
            Self::Invalid(_) | Self::Expired | Self::Revoked => ErrorKind::Unauthorized,
            Self::MissingCapability { .. } | Self::TenantMismatch => ErrorKind::Unauthorized,
            Self::ReplayDetected { .. } => ErrorKind::Conflict,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Store(_) => ErrorKind::Transient,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}
