//! Anumate Plan Compiler
//!
//! Transforms a validated Capsule into an ExecutablePlan with a deterministic
//! `plan_hash`. The pipeline runs validation (syntax → structure → business
//! rules), transitive dependency resolution against the registry interface,
//! optimization (topological sort, parallel batching, resource envelopes) and
//! finally content-addressed hashing. Compiled plans are cached by hash.

pub mod cache;
pub mod hasher;
pub mod jobs;
pub mod optimizer;
pub mod resolver;
pub mod service;
pub mod validator;

pub use cache::*;
pub use hasher::*;
pub use jobs::*;
pub use optimizer::*;
pub use resolver::*;
pub use service::*;
pub use validator::*;

use anumate_types::{ErrorKind, IntoErrorKind};
use thiserror::Error;

/// Plan compilation errors
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Capsule YAML is malformed: {0}")]
    Yaml(String),

    #[error("Capsule validation failed: {}", errors.join("; "))]
    Validation { errors: Vec<String> },

    #[error("Dependency not found: {reference}")]
    DependencyNotFound { reference: String },

    #[error("Circular dependency detected involving {name}")]
    CycleDetected { name: String },

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Compile job {job_id} not found")]
    JobNotFound { job_id: String },

    #[error("Internal compiler error: {0}")]
    Internal(String),
}

pub type CompileResult<T> = Result<T, CompileError>;

impl IntoErrorKind for CompileError {
    fn error_kind(&self) -> ErrorKind {
        match self {
            Self::Yaml(_) | Self::Validation { .. } => ErrorKind::Validation,
            Self::DependencyNotFound { .. } => ErrorKind::Validation,
            Self::CycleDetected { .. } => ErrorKind::Conflict,
            Self::JobNotFound { .. } => ErrorKind::NotFound,
            Self::Registry(_) => ErrorKind::Transient,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}
