//! Approvals bridge
//!
//! The orchestrator talks to the approvals workflow through this narrow
//! interface; the concrete service lives in `anumate-approvals`. The
//! orchestrator couples to decisions by polling at a sub-second interval,
//! which keeps decision-to-observation latency under the two second target.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use anumate_approvals::ApprovalsService;
use anumate_types::{
    ApprovalId, ApprovalStatus, ApprovalStepPolicy, Clarification, Decision, QuorumRule, TenantId,
};

use crate::{OrchestratorError, OrchestratorResult};

/// Decision state as seen by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeDecision {
    Open,
    Approved,
    Rejected,
    Expired,
}

/// Narrow interface to the approvals workflow
#[async_trait]
pub trait ApprovalsBridge: Send + Sync {
    /// Open an approval workflow for a clarification
    async fn open(
        &self,
        tenant_id: TenantId,
        clarification: Clarification,
        approvers: Vec<String>,
        deadline_secs: u64,
    ) -> OrchestratorResult<ApprovalId>;

    /// Poll the decision state
    async fn poll(
        &self,
        tenant_id: &TenantId,
        approval_id: &ApprovalId,
    ) -> OrchestratorResult<BridgeDecision>;
}

/// Bridge backed by the in-process approvals service
pub struct WorkflowApprovalsBridge {
    service: Arc<ApprovalsService>,
    quorum: QuorumRule,
}

impl WorkflowApprovalsBridge {
    pub fn new(service: Arc<ApprovalsService>) -> Self {
        Self {
            service,
            quorum: QuorumRule::Any,
        }
    }

    pub fn with_quorum(mut self, quorum: QuorumRule) -> Self {
        self.quorum = quorum;
        self
    }
}

#[async_trait]
impl ApprovalsBridge for WorkflowApprovalsBridge {
    async fn open(
        &self,
        tenant_id: TenantId,
        clarification: Clarification,
        approvers: Vec<String>,
        deadline_secs: u64,
    ) -> OrchestratorResult<ApprovalId> {
        let policy = ApprovalStepPolicy {
            name: "execution-gate".to_string(),
            approvers,
            quorum: self.quorum,
            deadline: Utc::now() + Duration::seconds(deadline_secs.max(1) as i64),
            escalate_to: vec![],
            escalation_extension_secs: 0,
        };
        self.service
            .create(tenant_id, clarification, vec![policy])
            .await
            .map_err(|e| OrchestratorError::Internal(format!("approval open failed: {e}")))
    }

    async fn poll(
        &self,
        tenant_id: &TenantId,
        approval_id: &ApprovalId,
    ) -> OrchestratorResult<BridgeDecision> {
        let summary = self
            .service
            .get(tenant_id, approval_id)
            .await
            .map_err(|e| OrchestratorError::Internal(format!("approval poll failed: {e}")))?;

        Ok(match summary.status {
            ApprovalStatus::Approved => BridgeDecision::Approved,
            ApprovalStatus::Rejected => BridgeDecision::Rejected,
            ApprovalStatus::Expired => BridgeDecision::Expired,
            ApprovalStatus::Done => match summary.final_decision {
                Some(Decision::Approve) => BridgeDecision::Approved,
                Some(Decision::Reject) => BridgeDecision::Rejected,
                None => BridgeDecision::Open,
            },
            _ => BridgeDecision::Open,
        })
    }
}
