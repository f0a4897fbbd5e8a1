//! Approval workflow types
//!
//! Approvals pause a run until a human decision arrives. A workflow is an
//! ordered list of steps; each step names its approver set, quorum rule and
//! deadline, and may escalate to a follow-up target on timeout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ApprovalId, ClarificationId, RunId, TenantId};

/// Status of an approval workflow step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalStatus {
    Pending,
    InProgress,
    Approved,
    Rejected,
    Expired,
    Escalated,
    Done,
}

impl ApprovalStatus {
    /// Whether this status admits no further decision
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            Self::Approved | Self::Rejected | Self::Expired | Self::Done
        )
    }
}

/// Quorum rule for an approver set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuorumRule {
    /// Every listed approver must approve
    All,
    /// A single approval settles the step
    Any,
}

/// A decision submitted by an approver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

/// Configuration of one step in an approval workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalStepPolicy {
    /// Human-readable step name
    pub name: String,
    /// Approvers allowed to decide this step
    pub approvers: Vec<String>,
    /// Quorum rule over the approver set
    pub quorum: QuorumRule,
    /// Deadline for the decision
    pub deadline: DateTime<Utc>,
    /// Target approvers to escalate to on timeout; empty means fail
    #[serde(default)]
    pub escalate_to: Vec<String>,
    /// Deadline extension granted on escalation, in seconds
    #[serde(default)]
    pub escalation_extension_secs: u64,
}

/// The clarification that triggered an approval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clarification {
    pub clarification_id: ClarificationId,
    pub run_id: RunId,
    /// What the approver is being asked to confirm
    pub question: String,
    /// Step that raised the clarification, if any
    pub step_id: Option<String>,
    /// Context shown to the approver
    #[serde(default)]
    pub context: serde_json::Value,
}

/// Summary view of an approval workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalSummary {
    pub approval_id: ApprovalId,
    pub tenant_id: TenantId,
    pub run_id: RunId,
    pub clarification_id: ClarificationId,
    pub status: ApprovalStatus,
    /// Zero-based index of the step currently awaiting a decision
    pub current_step: usize,
    /// Final decision once the workflow settles
    pub final_decision: Option<Decision>,
    /// Why the workflow completed the way it did
    pub completion_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// An immutable audit entry recording one workflow transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalAuditEntry {
    pub approval_id: ApprovalId,
    pub tenant_id: TenantId,
    /// Transition kind, e.g. `created`, `decided`, `escalated`, `delegated`
    pub event: String,
    /// Who performed the action (`system` for sweeper transitions)
    pub actor: String,
    /// Decision recorded, when the event is a decision
    pub decision: Option<Decision>,
    /// Free-form reason supplied by the actor
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settled_statuses() {
        assert!(ApprovalStatus::Approved.is_settled());
        assert!(ApprovalStatus::Expired.is_settled());
        assert!(!ApprovalStatus::InProgress.is_settled());
        assert!(!ApprovalStatus::Escalated.is_settled());
    }
}
