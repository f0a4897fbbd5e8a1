//! Error taxonomy for Anumate
//!
//! A closed set of user-facing error kinds, distinct from transport-level
//! framing. Component crates define their own error enums and map them into
//! this taxonomy via [`ErrorKind`]; the API layer maps each kind to exactly
//! one HTTP status.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for operations returning the shared error taxonomy
pub type Result<T> = std::result::Result<T, AnumateError>;

/// Closed set of user-facing error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed input or schema failure; not retried
    Validation,
    /// Capability missing, invalid, or expired; not retried
    Unauthorized,
    /// Idempotency or state-machine conflict; not retried automatically
    Conflict,
    /// Policy or approval rejection; not retried
    Denied,
    /// Missing plan, run, or receipt
    NotFound,
    /// Network or dependency unavailability; retryable per policy
    Transient,
    /// Invariant violation; never retried silently, always logged
    Internal,
}

impl ErrorKind {
    /// Whether errors of this kind may be retried per policy
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Stable error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Conflict => "CONFLICT",
            Self::Denied => "DENIED",
            Self::NotFound => "NOT_FOUND",
            Self::Transient => "TRANSIENT",
            Self::Internal => "INTERNAL_ERROR",
        }
    }
}

/// Shared error type carrying a kind plus a human-readable message
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct AnumateError {
    pub kind: ErrorKind,
    pub message: String,
}

impl AnumateError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Denied, message)
    }

    pub fn not_found(resource: &str, id: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::NotFound, format!("{resource} {id} not found"))
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn is_retriable(&self) -> bool {
        self.kind.is_retriable()
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }
}

/// Trait for component errors that map into the shared taxonomy
pub trait IntoErrorKind {
    /// The taxonomy kind this error belongs to
    fn error_kind(&self) -> ErrorKind;
}

impl<T: IntoErrorKind> IntoErrorKind for &T {
    fn error_kind(&self) -> ErrorKind {
        (*self).error_kind()
    }
}
