//! Approvals service
//!
//! Stores workflows, exposes create/get/decide/delegate/poll, broadcasts
//! settlement updates for sub-second propagation to the orchestrator, and
//! runs the deadline sweeper.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};

use anumate_types::{
    ApprovalAuditEntry, ApprovalId, ApprovalStatus, ApprovalStepPolicy, ApprovalSummary,
    Clarification, ClarificationId, Decision, TenantId,
};

use crate::{ApprovalError, ApprovalResult, ApprovalWorkflow, Transition};

/// Broadcast payload emitted when a workflow changes state
#[derive(Debug, Clone)]
pub struct ApprovalUpdate {
    pub approval_id: ApprovalId,
    pub tenant_id: TenantId,
    pub status: ApprovalStatus,
    pub final_decision: Option<Decision>,
}

/// The approvals service
pub struct ApprovalsService {
    workflows: Arc<RwLock<HashMap<ApprovalId, ApprovalWorkflow>>>,
    by_clarification: Arc<RwLock<HashMap<ClarificationId, ApprovalId>>>,
    audit: Arc<RwLock<Vec<ApprovalAuditEntry>>>,
    updates: broadcast::Sender<ApprovalUpdate>,
}

impl ApprovalsService {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(256);
        Self {
            workflows: Arc::new(RwLock::new(HashMap::new())),
            by_clarification: Arc::new(RwLock::new(HashMap::new())),
            audit: Arc::new(RwLock::new(Vec::new())),
            updates,
        }
    }

    /// Subscribe to workflow state changes
    pub fn subscribe(&self) -> broadcast::Receiver<ApprovalUpdate> {
        self.updates.subscribe()
    }

    /// Create a workflow for a clarification. The first step opens
    /// immediately.
    pub async fn create(
        &self,
        tenant_id: TenantId,
        clarification: Clarification,
        policies: Vec<ApprovalStepPolicy>,
    ) -> ApprovalResult<ApprovalId> {
        if policies.is_empty() {
            return Err(ApprovalError::Internal(
                "workflow needs at least one step".to_string(),
            ));
        }
        let run_id = clarification.run_id;
        let clarification_id = clarification.clarification_id;
        let workflow = ApprovalWorkflow::new(tenant_id, run_id, clarification, policies);
        let approval_id = workflow.approval_id;

        self.workflows.write().await.insert(approval_id, workflow);
        self.by_clarification
            .write()
            .await
            .insert(clarification_id, approval_id);

        self.append_audit(approval_id, tenant_id, "created", "system", None, None)
            .await;
        tracing::info!(approval_id = %approval_id, run_id = %run_id, "Approval workflow created");
        Ok(approval_id)
    }

    /// Summary view of a workflow, tenant-scoped
    pub async fn get(
        &self,
        tenant_id: &TenantId,
        approval_id: &ApprovalId,
    ) -> ApprovalResult<ApprovalSummary> {
        let workflows = self.workflows.read().await;
        workflows
            .get(approval_id)
            .filter(|w| w.tenant_id == *tenant_id)
            .map(summary)
            .ok_or_else(|| ApprovalError::NotFound {
                approval_id: approval_id.to_string(),
            })
    }

    /// Full workflow state, tenant-scoped
    pub async fn get_workflow(
        &self,
        tenant_id: &TenantId,
        approval_id: &ApprovalId,
    ) -> ApprovalResult<ApprovalWorkflow> {
        let workflows = self.workflows.read().await;
        workflows
            .get(approval_id)
            .filter(|w| w.tenant_id == *tenant_id)
            .cloned()
            .ok_or_else(|| ApprovalError::NotFound {
                approval_id: approval_id.to_string(),
            })
    }

    /// Record a decision on the current step
    pub async fn decide(
        &self,
        tenant_id: &TenantId,
        approval_id: &ApprovalId,
        actor: &str,
        decision: Decision,
        reason: Option<String>,
    ) -> ApprovalResult<ApprovalSummary> {
        let mut workflows = self.workflows.write().await;
        let workflow = workflows
            .get_mut(approval_id)
            .filter(|w| w.tenant_id == *tenant_id)
            .ok_or_else(|| ApprovalError::NotFound {
                approval_id: approval_id.to_string(),
            })?;

        let transition = workflow.decide(actor, decision, Utc::now(), reason.clone())?;
        let update = ApprovalUpdate {
            approval_id: *approval_id,
            tenant_id: *tenant_id,
            status: workflow.status,
            final_decision: workflow.final_decision,
        };
        let result = summary(workflow);
        drop(workflows);

        self.append_audit(
            *approval_id,
            *tenant_id,
            "decided",
            actor,
            Some(decision),
            reason,
        )
        .await;
        if matches!(transition, Transition::Settled { .. }) {
            let _ = self.updates.send(update);
        }
        Ok(result)
    }

    /// Transfer an approver seat within the current step
    pub async fn delegate(
        &self,
        tenant_id: &TenantId,
        approval_id: &ApprovalId,
        from: &str,
        to: &str,
        reason: Option<String>,
    ) -> ApprovalResult<()> {
        let mut workflows = self.workflows.write().await;
        let workflow = workflows
            .get_mut(approval_id)
            .filter(|w| w.tenant_id == *tenant_id)
            .ok_or_else(|| ApprovalError::NotFound {
                approval_id: approval_id.to_string(),
            })?;
        workflow.delegate(from, to)?;
        drop(workflows);

        self.append_audit(
            *approval_id,
            *tenant_id,
            "delegated",
            from,
            None,
            reason.or_else(|| Some(format!("delegated to {to}"))),
        )
        .await;
        Ok(())
    }

    /// Look up a workflow by the clarification that spawned it
    pub async fn poll_by_clarification(
        &self,
        tenant_id: &TenantId,
        clarification_id: &ClarificationId,
    ) -> ApprovalResult<ApprovalSummary> {
        let approval_id = {
            let index = self.by_clarification.read().await;
            index.get(clarification_id).copied()
        }
        .ok_or_else(|| ApprovalError::NotFound {
            approval_id: clarification_id.to_string(),
        })?;
        self.get(tenant_id, &approval_id).await
    }

    /// Immutable audit trail for a workflow
    pub async fn audit_trail(
        &self,
        tenant_id: &TenantId,
        approval_id: &ApprovalId,
    ) -> Vec<ApprovalAuditEntry> {
        let audit = self.audit.read().await;
        audit
            .iter()
            .filter(|e| e.tenant_id == *tenant_id && e.approval_id == *approval_id)
            .cloned()
            .collect()
    }

    /// One sweeper pass over all open workflows. Returns transitions taken.
    pub async fn sweep(&self) -> Vec<(ApprovalId, Transition)> {
        let now = Utc::now();
        let mut transitions = Vec::new();
        let mut updates = Vec::new();

        {
            let mut workflows = self.workflows.write().await;
            for workflow in workflows.values_mut() {
                if let Some(transition) = workflow.sweep(now) {
                    if matches!(transition, Transition::Expired) {
                        updates.push(ApprovalUpdate {
                            approval_id: workflow.approval_id,
                            tenant_id: workflow.tenant_id,
                            status: workflow.status,
                            final_decision: workflow.final_decision,
                        });
                    }
                    transitions.push((workflow.approval_id, workflow.tenant_id, transition));
                }
            }
        }

        for (approval_id, tenant_id, transition) in &transitions {
            let event = match transition {
                Transition::Expired => "expired",
                Transition::Escalated { .. } => "escalated",
                _ => continue,
            };
            self.append_audit(*approval_id, *tenant_id, event, "system", None, None)
                .await;
        }
        for update in updates {
            let _ = self.updates.send(update);
        }

        transitions
            .into_iter()
            .map(|(id, _, t)| (id, t))
            .collect()
    }

    async fn append_audit(
        &self,
        approval_id: ApprovalId,
        tenant_id: TenantId,
        event: &str,
        actor: &str,
        decision: Option<Decision>,
        reason: Option<String>,
    ) {
        self.audit.write().await.push(ApprovalAuditEntry {
            approval_id,
            tenant_id,
            event: event.to_string(),
            actor: actor.to_string(),
            decision,
            reason,
            timestamp: Utc::now(),
        });
    }
}

impl Default for ApprovalsService {
    fn default() -> Self {
        Self::new()
    }
}

fn summary(workflow: &ApprovalWorkflow) -> ApprovalSummary {
    ApprovalSummary {
        approval_id: workflow.approval_id,
        tenant_id: workflow.tenant_id,
        run_id: workflow.run_id,
        clarification_id: workflow.clarification.clarification_id,
        status: workflow.status,
        current_step: workflow.current_step,
        final_decision: workflow.final_decision,
        completion_reason: workflow.completion_reason.clone(),
        created_at: workflow.created_at,
        completed_at: workflow.completed_at,
    }
}

/// Background deadline sweeper
pub struct ApprovalSweeperTask {
    service: Arc<ApprovalsService>,
    interval: Duration,
}

impl ApprovalSweeperTask {
    pub fn new(service: Arc<ApprovalsService>, interval: Duration) -> Self {
        Self { service, interval }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let transitions = self.service.sweep().await;
                for (approval_id, transition) in transitions {
                    tracing::info!(
                        approval_id = %approval_id,
                        ?transition,
                        "Approval deadline transition"
                    );
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anumate_types::{QuorumRule, RunId};
    use chrono::Duration as ChronoDuration;

    fn clarification(run_id: RunId) -> Clarification {
        Clarification {
            clarification_id: ClarificationId::new(),
            run_id,
            question: "Proceed?".to_string(),
            step_id: None,
            context: serde_json::json!({}),
        }
    }

    fn policy(approvers: &[&str], deadline_secs: i64) -> ApprovalStepPolicy {
        ApprovalStepPolicy {
            name: "review".to_string(),
            approvers: approvers.iter().map(|a| a.to_string()).collect(),
            quorum: QuorumRule::Any,
            deadline: Utc::now() + ChronoDuration::seconds(deadline_secs),
            escalate_to: vec![],
            escalation_extension_secs: 0,
        }
    }

    #[tokio::test]
    async fn test_create_decide_poll() {
        let service = ApprovalsService::new();
        let tenant = TenantId::new();
        let run_id = RunId::new();
        let clar = clarification(run_id);
        let clar_id = clar.clarification_id;

        let approval_id = service
            .create(tenant, clar, vec![policy(&["alice"], 60)])
            .await
            .unwrap();

        let polled = service
            .poll_by_clarification(&tenant, &clar_id)
            .await
            .unwrap();
        assert_eq!(polled.approval_id, approval_id);
        assert_eq!(polled.status, ApprovalStatus::InProgress);

        let result = service
            .decide(&tenant, &approval_id, "alice", Decision::Approve, None)
            .await
            .unwrap();
        assert_eq!(result.status, ApprovalStatus::Approved);
        assert_eq!(result.final_decision, Some(Decision::Approve));
    }

    #[tokio::test]
    async fn test_settlement_broadcast() {
        let service = ApprovalsService::new();
        let tenant = TenantId::new();
        let mut updates = service.subscribe();

        let approval_id = service
            .create(tenant, clarification(RunId::new()), vec![policy(&["alice"], 60)])
            .await
            .unwrap();
        service
            .decide(&tenant, &approval_id, "alice", Decision::Approve, None)
            .await
            .unwrap();

        let update = updates.recv().await.unwrap();
        assert_eq!(update.approval_id, approval_id);
        assert_eq!(update.final_decision, Some(Decision::Approve));
    }

    #[tokio::test]
    async fn test_sweep_expires_overdue() {
        let service = ApprovalsService::new();
        let tenant = TenantId::new();
        let approval_id = service
            .create(tenant, clarification(RunId::new()), vec![policy(&["alice"], -5)])
            .await
            .unwrap();

        let transitions = service.sweep().await;
        assert_eq!(transitions.len(), 1);
        assert!(matches!(transitions[0].1, Transition::Expired));

        let summary = service.get(&tenant, &approval_id).await.unwrap();
        assert_eq!(summary.status, ApprovalStatus::Expired);
    }

    #[tokio::test]
    async fn test_audit_trail_grows() {
        let service = ApprovalsService::new();
        let tenant = TenantId::new();
        let approval_id = service
            .create(tenant, clarification(RunId::new()), vec![policy(&["alice"], 60)])
            .await
            .unwrap();
        service
            .decide(&tenant, &approval_id, "alice", Decision::Approve, Some("ok".into()))
            .await
            .unwrap();

        let trail = service.audit_trail(&tenant, &approval_id).await;
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[0].event, "created");
        assert_eq!(trail[1].event, "decided");
    }

    #[tokio::test]
    async fn test_tenant_isolation() {
        let service = ApprovalsService::new();
        let tenant = TenantId::new();
        let approval_id = service
            .create(tenant, clarification(RunId::new()), vec![policy(&["alice"], 60)])
            .await
            .unwrap();

        let err = service
            .get(&TenantId::new(), &approval_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::NotFound { .. }));
    }
}
