//! Execution run types and the run state machine
//!
//! Transitions are serialized per run; terminal states are immutable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ApprovalId, CorrelationId, ReceiptId, RunId, TenantId};

/// Status of an execution run
///
/// ```text
/// Pending → Validating → AwaitingApproval? → Running → {Succeeded, Failed, Cancelled}
///                                 ↑↓
///                              Paused
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    Validating,
    AwaitingApproval,
    Running,
    Paused,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Whether this status is terminal. Terminal runs are immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Whether a transition from `self` to `next` follows the state graph
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        use RunStatus::*;
        match (self, next) {
            (Pending, Validating) => true,
            (Validating, AwaitingApproval | Running | Failed) => true,
            (AwaitingApproval, Running | Paused | Failed | Cancelled) => true,
            (Running, Succeeded | Failed | Cancelled | Paused) => true,
            (Paused, Running | AwaitingApproval | Cancelled | Failed) => true,
            // Cancellation can land at any pre-terminal point
            (Pending | Validating, Cancelled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Validating => "Validating",
            Self::AwaitingApproval => "AwaitingApproval",
            Self::Running => "Running",
            Self::Paused => "Paused",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        };
        write!(f, "{s}")
    }
}

/// An execution run record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRun {
    /// Unique run ID
    pub run_id: RunId,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Hash of the plan being executed
    pub plan_hash: String,
    /// Execution engine / tool runtime selector
    pub engine: String,
    /// Current status
    pub status: RunStatus,
    /// Completed step fraction in [0, 1]
    pub progress: f64,
    /// Caller-supplied parameters
    pub parameters: serde_json::Value,
    /// Per-step results captured during execution
    pub results: serde_json::Value,
    /// Terminal error message, if failed
    pub error: Option<String>,
    /// Approvals opened by this run, in order
    pub approval_ids: Vec<ApprovalId>,
    /// Receipt emitted on completion
    pub receipt_id: Option<ReceiptId>,
    /// jti of the capability token bound to this run
    pub capability_token_jti: Option<String>,
    /// Correlation ID threaded through events and logs
    pub correlation_id: CorrelationId,
    /// Client idempotency key, when supplied
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionRun {
    /// Create a fresh run in `Pending`
    pub fn new(
        tenant_id: TenantId,
        plan_hash: impl Into<String>,
        engine: impl Into<String>,
        parameters: serde_json::Value,
        correlation_id: CorrelationId,
    ) -> Self {
        Self {
            run_id: RunId::new(),
            tenant_id,
            plan_hash: plan_hash.into(),
            engine: engine.into(),
            status: RunStatus::Pending,
            progress: 0.0,
            parameters,
            results: serde_json::Value::Null,
            error: None,
            approval_ids: Vec::new(),
            receipt_id: None,
            capability_token_jti: None,
            correlation_id,
            idempotency_key: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Retry policy for tool invocations
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts including the first
    pub max_attempts: u32,
    /// Initial backoff delay in milliseconds
    pub base_delay_ms: u64,
    /// Backoff ceiling in milliseconds
    pub max_delay_ms: u64,
    /// Jitter as a fraction of the computed delay, in [0, 1]
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
            jitter_ratio: 0.2,
        }
    }
}
