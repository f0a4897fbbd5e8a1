//! Anumate Approvals - Human-in-the-loop decision workflows
//!
//! Bridges execution-time clarifications to a workflow of approval steps.
//! Each step names its approver set, quorum rule and deadline; expired steps
//! either fail the workflow or escalate to a follow-up target with an
//! extended deadline. Every transition appends an immutable audit entry.

pub mod service;
pub mod workflow;

pub use service::*;
pub use workflow::*;

use anumate_types::{ErrorKind, IntoErrorKind};
use thiserror::Error;

/// Approval workflow errors
#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("Approval {approval_id} not found")]
    NotFound { approval_id: String },

    #[error("Approval {approval_id} is already settled")]
    AlreadySettled { approval_id: String },

    #[error("Actor '{actor}' is not an approver for this step")]
    NotAnApprover { actor: String },

    #[error("Cannot delegate to '{target}': {reason}")]
    InvalidDelegation { target: String, reason: String },

    #[error("Internal approvals error: {0}")]
    Internal(String),
}

pub type ApprovalResult<T> = Result<T, ApprovalError>;

impl IntoErrorKind for ApprovalError {
    fn error_kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadySettled { .. } => ErrorKind::Conflict,
            Self::NotAnApprover { .. } => ErrorKind::Denied,
            Self::InvalidDelegation { .. } => ErrorKind::Validation,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}
