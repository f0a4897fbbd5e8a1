//! Anumate Orchestrator - The execution core
//!
//! Coordinates a single execution from request to signed receipt: plan
//! resolution, idempotency, approval coupling, capability issuance, tool
//! invocation over the remote tool protocol, retries, and event emission.
//!
//! # Concurrency model
//!
//! Every run is owned by one cooperative task (the run actor). All state
//! transitions for a run happen inside its actor, so the state machine needs
//! no cross-run locking; parallelism exists across runs, not within one.
//! Pause, resume, cancel and approval decisions arrive as commands consumed
//! at suspension points.

pub mod bridge;
pub mod config;
pub mod idempotency;
pub mod observer;
pub mod retry;
pub mod runs;
pub mod service;
pub mod tool;

mod actor;

pub use bridge::*;
pub use config::*;
pub use idempotency::*;
pub use observer::*;
pub use retry::*;
pub use runs::*;
pub use service::*;
pub use tool::*;

use anumate_types::{ErrorKind, IntoErrorKind};
use thiserror::Error;

/// Orchestrator errors
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Plan {plan_hash} not found")]
    PlanNotFound { plan_hash: String },

    #[error("Run {run_id} not found")]
    RunNotFound { run_id: String },

    #[error("Run {run_id} cannot transition from {from} to {to}")]
    InvalidTransition {
        run_id: String,
        from: String,
        to: String,
    },

    #[error("Idempotency key '{key}' was used with a different request")]
    IdempotencyConflict { key: String },

    #[error("Tenant has reached its concurrent run limit; retry after {retry_after_secs}s")]
    ServiceBusy { retry_after_secs: u64 },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Denied: {0}")]
    Denied(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Internal orchestrator error: {0}")]
    Internal(String),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

impl IntoErrorKind for OrchestratorError {
    fn error_kind(&self) -> ErrorKind {
        match self {
            Self::PlanNotFound { .. } | Self::RunNotFound { .. } => ErrorKind::NotFound,
            Self::InvalidTransition { .. } | Self::IdempotencyConflict { .. } => ErrorKind::Conflict,
            Self::ServiceBusy { .. } | Self::Transient(_) => ErrorKind::Transient,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::Denied(_) => ErrorKind::Denied,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}
