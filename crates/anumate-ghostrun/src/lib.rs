//! Anumate GhostRun - Preflight simulation
//!
//! Executes a compiled plan's DAG without external side effects. Every step
//! resolves against a mock tool registry; responses carry sampled latency
//! (base ± 30%) and fail with a probability derived from the step's risk
//! level. The output is a PreflightReport: per-step results, aggregate risk,
//! feasibility, critical-path duration, cost estimate and heuristic
//! recommendations.

pub mod engine;
pub mod mocks;
pub mod report;
pub mod risk;
pub mod service;

pub use engine::*;
pub use mocks::*;
pub use report::*;
pub use risk::*;
pub use service::*;

use anumate_types::{ErrorKind, IntoErrorKind};
use thiserror::Error;

/// GhostRun errors
#[derive(Debug, Error)]
pub enum GhostRunError {
    #[error("Plan is not simulatable: {0}")]
    PlanInvalid(String),

    #[error("Simulation run {run_id} not found")]
    RunNotFound { run_id: String },

    #[error("Simulation run {run_id} has not completed")]
    NotCompleted { run_id: String },

    #[error("Simulation run {run_id} was cancelled")]
    Cancelled { run_id: String },

    #[error("Internal simulation error: {0}")]
    Internal(String),
}

pub type GhostRunResult<T> = Result<T, GhostRunError>;

impl IntoErrorKind for GhostRunError {
    fn error_kind(&self) -> ErrorKind {
        match self {
            Self::PlanInvalid(_) => ErrorKind::Validation,
            Self::RunNotFound { .. } => ErrorKind::NotFound,
            Self::NotCompleted { .. } | Self::Cancelled { .. } => ErrorKind::Conflict,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}
