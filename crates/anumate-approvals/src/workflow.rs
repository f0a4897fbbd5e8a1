//! Approval workflow state
//!
//! A workflow is an ordered list of steps. Steps settle by quorum (`any` or
//! `all`), by rejection, or by deadline. On timeout a step either fails the
//! workflow or escalates: approvers are replaced by the escalation target
//! and the deadline extends. Deadlines are monotonic; escalation never
//! shortens them.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use anumate_types::{
    ApprovalId, ApprovalStatus, ApprovalStepPolicy, Clarification, Decision, QuorumRule, RunId,
    TenantId,
};

use crate::{ApprovalError, ApprovalResult};

/// One recorded decision within a step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedDecision {
    pub actor: String,
    pub decision: Decision,
    pub reason: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// Runtime state of one workflow step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepState {
    pub policy: ApprovalStepPolicy,
    pub status: ApprovalStatus,
    pub decisions: Vec<RecordedDecision>,
    /// How many times this step has escalated
    pub escalations: u32,
}

impl StepState {
    fn new(policy: ApprovalStepPolicy) -> Self {
        Self {
            policy,
            status: ApprovalStatus::Pending,
            decisions: Vec::new(),
            escalations: 0,
        }
    }

    fn has_decided(&self, actor: &str) -> bool {
        self.decisions.iter().any(|d| d.actor == actor)
    }

    fn approvals(&self) -> usize {
        self.decisions
            .iter()
            .filter(|d| d.decision == Decision::Approve)
            .count()
    }
}

/// What a transition did, for audit and event emission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// A decision was recorded but the step is still open (quorum `all`)
    Recorded,
    /// The step settled and the workflow advanced to the next step
    StepApproved { next_step: usize },
    /// The entire workflow settled
    Settled { decision: Decision },
    /// The workflow expired without escalation
    Expired,
    /// The step escalated; approvers replaced, deadline extended
    Escalated { new_deadline: DateTime<Utc> },
}

/// A multi-step approval workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalWorkflow {
    pub approval_id: ApprovalId,
    pub tenant_id: TenantId,
    pub run_id: RunId,
    pub clarification: Clarification,
    pub steps: Vec<StepState>,
    pub current_step: usize,
    pub status: ApprovalStatus,
    pub final_decision: Option<Decision>,
    pub completion_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ApprovalWorkflow {
    /// Create a workflow; the first step opens immediately
    pub fn new(
        tenant_id: TenantId,
        run_id: RunId,
        clarification: Clarification,
        policies: Vec<ApprovalStepPolicy>,
    ) -> Self {
        let mut steps: Vec<StepState> = policies.into_iter().map(StepState::new).collect();
        if let Some(first) = steps.first_mut() {
            first.status = ApprovalStatus::InProgress;
        }
        Self {
            approval_id: ApprovalId::new(),
            tenant_id,
            run_id,
            clarification,
            steps,
            current_step: 0,
            status: ApprovalStatus::InProgress,
            final_decision: None,
            completion_reason: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.status.is_settled()
    }

    /// Record a decision by an approver on the current step.
    pub fn decide(
        &mut self,
        actor: &str,
        decision: Decision,
        now: DateTime<Utc>,
        reason: Option<String>,
    ) -> ApprovalResult<Transition> {
        if self.is_settled() {
            return Err(ApprovalError::AlreadySettled {
                approval_id: self.approval_id.to_string(),
            });
        }
        let step_index = self.current_step;
        let step = &mut self.steps[step_index];

        if !step.policy.approvers.iter().any(|a| a == actor) {
            return Err(ApprovalError::NotAnApprover {
                actor: actor.to_string(),
            });
        }
        if step.has_decided(actor) {
            return Err(ApprovalError::AlreadySettled {
                approval_id: self.approval_id.to_string(),
            });
        }

        step.decisions.push(RecordedDecision {
            actor: actor.to_string(),
            decision,
            reason,
            decided_at: now,
        });

        match decision {
            Decision::Reject => {
                step.status = ApprovalStatus::Rejected;
                self.settle(Decision::Reject, format!("rejected by {actor}"), now);
                Ok(Transition::Settled {
                    decision: Decision::Reject,
                })
            }
            Decision::Approve => {
                let quorum_met = match step.policy.quorum {
                    QuorumRule::Any => true,
                    QuorumRule::All => step.approvals() == step.policy.approvers.len(),
                };
                if !quorum_met {
                    return Ok(Transition::Recorded);
                }
                step.status = ApprovalStatus::Approved;
                self.advance(now)
            }
        }
    }

    /// Transfer an approver's seat to another actor within the current step.
    pub fn delegate(&mut self, from: &str, to: &str) -> ApprovalResult<()> {
        if self.is_settled() {
            return Err(ApprovalError::AlreadySettled {
                approval_id: self.approval_id.to_string(),
            });
        }
        let step = &mut self.steps[self.current_step];

        let seat = step
            .policy
            .approvers
            .iter()
            .position(|a| a == from)
            .ok_or_else(|| ApprovalError::NotAnApprover {
                actor: from.to_string(),
            })?;
        if step.policy.approvers.iter().any(|a| a == to) {
            return Err(ApprovalError::InvalidDelegation {
                target: to.to_string(),
                reason: "already an approver for this step".to_string(),
            });
        }
        if step.has_decided(from) {
            return Err(ApprovalError::InvalidDelegation {
                target: to.to_string(),
                reason: format!("'{from}' already decided"),
            });
        }
        step.policy.approvers[seat] = to.to_string();
        Ok(())
    }

    /// Apply deadline handling. Returns the transition taken, if any.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Option<Transition> {
        if self.is_settled() {
            return None;
        }
        let step = &mut self.steps[self.current_step];
        if now <= step.policy.deadline {
            return None;
        }

        if step.policy.escalate_to.is_empty() {
            step.status = ApprovalStatus::Expired;
            self.settle(Decision::Reject, "deadline passed".to_string(), now);
            self.status = ApprovalStatus::Expired;
            return Some(Transition::Expired);
        }

        // Escalate: replace approvers, extend the deadline monotonically
        let extension = Duration::seconds(step.policy.escalation_extension_secs.max(1) as i64);
        let new_deadline = step.policy.deadline + extension;
        step.policy.approvers = std::mem::take(&mut step.policy.escalate_to);
        step.policy.deadline = new_deadline;
        step.escalations += 1;
        step.status = ApprovalStatus::InProgress;
        self.status = ApprovalStatus::Escalated;
        Some(Transition::Escalated { new_deadline })
    }

    fn advance(&mut self, now: DateTime<Utc>) -> ApprovalResult<Transition> {
        self.steps[self.current_step].status = ApprovalStatus::Done;
        if self.current_step + 1 < self.steps.len() {
            self.current_step += 1;
            self.steps[self.current_step].status = ApprovalStatus::InProgress;
            self.status = ApprovalStatus::InProgress;
            Ok(Transition::StepApproved {
                next_step: self.current_step,
            })
        } else {
            self.settle(Decision::Approve, "all steps approved".to_string(), now);
            Ok(Transition::Settled {
                decision: Decision::Approve,
            })
        }
    }

    fn settle(&mut self, decision: Decision, reason: String, now: DateTime<Utc>) {
        self.status = match decision {
            Decision::Approve => ApprovalStatus::Approved,
            Decision::Reject => ApprovalStatus::Rejected,
        };
        self.final_decision = Some(decision);
        self.completion_reason = Some(reason);
        self.completed_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anumate_types::ClarificationId;

    fn clarification(run_id: RunId) -> Clarification {
        Clarification {
            clarification_id: ClarificationId::new(),
            run_id,
            question: "Proceed with payment?".to_string(),
            step_id: Some("pay".to_string()),
            context: serde_json::json!({}),
        }
    }

    fn policy(approvers: &[&str], quorum: QuorumRule, deadline_secs: i64) -> ApprovalStepPolicy {
        ApprovalStepPolicy {
            name: "review".to_string(),
            approvers: approvers.iter().map(|a| a.to_string()).collect(),
            quorum,
            deadline: Utc::now() + Duration::seconds(deadline_secs),
            escalate_to: vec![],
            escalation_extension_secs: 0,
        }
    }

    fn workflow(policies: Vec<ApprovalStepPolicy>) -> ApprovalWorkflow {
        let run_id = RunId::new();
        ApprovalWorkflow::new(TenantId::new(), run_id, clarification(run_id), policies)
    }

    #[test]
    fn test_any_quorum_single_approval_settles() {
        let mut wf = workflow(vec![policy(&["alice", "bob"], QuorumRule::Any, 60)]);
        let t = wf.decide("alice", Decision::Approve, Utc::now(), None).unwrap();
        assert_eq!(
            t,
            Transition::Settled {
                decision: Decision::Approve
            }
        );
        assert_eq!(wf.status, ApprovalStatus::Approved);
        assert_eq!(wf.final_decision, Some(Decision::Approve));
    }

    #[test]
    fn test_all_quorum_waits_for_everyone() {
        let mut wf = workflow(vec![policy(&["alice", "bob"], QuorumRule::All, 60)]);
        let t = wf.decide("alice", Decision::Approve, Utc::now(), None).unwrap();
        assert_eq!(t, Transition::Recorded);
        assert!(!wf.is_settled());

        let t = wf.decide("bob", Decision::Approve, Utc::now(), None).unwrap();
        assert_eq!(
            t,
            Transition::Settled {
                decision: Decision::Approve
            }
        );
    }

    #[test]
    fn test_single_reject_settles_all_quorum() {
        let mut wf = workflow(vec![policy(&["alice", "bob"], QuorumRule::All, 60)]);
        let t = wf.decide("bob", Decision::Reject, Utc::now(), Some("too risky".into())).unwrap();
        assert_eq!(
            t,
            Transition::Settled {
                decision: Decision::Reject
            }
        );
        assert_eq!(wf.status, ApprovalStatus::Rejected);
    }

    #[test]
    fn test_multi_step_advances() {
        let mut wf = workflow(vec![
            policy(&["alice"], QuorumRule::Any, 60),
            policy(&["carol"], QuorumRule::Any, 60),
        ]);
        let t = wf.decide("alice", Decision::Approve, Utc::now(), None).unwrap();
        assert_eq!(t, Transition::StepApproved { next_step: 1 });
        assert!(!wf.is_settled());

        // Carol owns step 2; alice is not an approver there
        assert!(matches!(
            wf.decide("alice", Decision::Approve, Utc::now(), None),
            Err(ApprovalError::NotAnApprover { .. })
        ));

        let t = wf.decide("carol", Decision::Approve, Utc::now(), None).unwrap();
        assert_eq!(
            t,
            Transition::Settled {
                decision: Decision::Approve
            }
        );
    }

    #[test]
    fn test_stranger_cannot_decide() {
        let mut wf = workflow(vec![policy(&["alice"], QuorumRule::Any, 60)]);
        assert!(matches!(
            wf.decide("mallory", Decision::Approve, Utc::now(), None),
            Err(ApprovalError::NotAnApprover { .. })
        ));
    }

    #[test]
    fn test_double_decision_rejected() {
        let mut wf = workflow(vec![policy(&["alice", "bob"], QuorumRule::All, 60)]);
        wf.decide("alice", Decision::Approve, Utc::now(), None).unwrap();
        assert!(wf.decide("alice", Decision::Approve, Utc::now(), None).is_err());
    }

    #[test]
    fn test_settled_workflow_refuses_decisions() {
        let mut wf = workflow(vec![policy(&["alice"], QuorumRule::Any, 60)]);
        wf.decide("alice", Decision::Approve, Utc::now(), None).unwrap();
        assert!(matches!(
            wf.decide("alice", Decision::Approve, Utc::now(), None),
            Err(ApprovalError::AlreadySettled { .. })
        ));
    }

    #[test]
    fn test_timeout_without_escalation_expires() {
        let mut wf = workflow(vec![policy(&["alice"], QuorumRule::Any, -1)]);
        let t = wf.sweep(Utc::now()).unwrap();
        assert_eq!(t, Transition::Expired);
        assert_eq!(wf.status, ApprovalStatus::Expired);
        assert_eq!(wf.final_decision, Some(Decision::Reject));
    }

    #[test]
    fn test_timeout_with_escalation_extends_deadline() {
        let mut p = policy(&["alice"], QuorumRule::Any, -1);
        let old_deadline = p.deadline;
        p.escalate_to = vec!["manager".to_string()];
        p.escalation_extension_secs = 3600;
        let mut wf = workflow(vec![p]);

        let t = wf.sweep(Utc::now()).unwrap();
        match t {
            Transition::Escalated { new_deadline } => {
                assert!(new_deadline > old_deadline);
            }
            other => panic!("expected escalation, got {other:?}"),
        }
        assert_eq!(wf.status, ApprovalStatus::Escalated);

        // The escalation target can now decide
        let t = wf.decide("manager", Decision::Approve, Utc::now(), None).unwrap();
        assert_eq!(
            t,
            Transition::Settled {
                decision: Decision::Approve
            }
        );
    }

    #[test]
    fn test_sweep_before_deadline_is_noop() {
        let mut wf = workflow(vec![policy(&["alice"], QuorumRule::Any, 60)]);
        assert!(wf.sweep(Utc::now()).is_none());
    }

    #[test]
    fn test_delegation() {
        let mut wf = workflow(vec![policy(&["alice"], QuorumRule::Any, 60)]);
        wf.delegate("alice", "dave").unwrap();

        assert!(matches!(
            wf.decide("alice", Decision::Approve, Utc::now(), None),
            Err(ApprovalError::NotAnApprover { .. })
        ));
        wf.decide("dave", Decision::Approve, Utc::now(), None).unwrap();
        assert_eq!(wf.status, ApprovalStatus::Approved);
    }

    #[test]
    fn test_delegation_to_existing_approver_rejected() {
        let mut wf = workflow(vec![policy(&["alice", "bob"], QuorumRule::All, 60)]);
        assert!(matches!(
            wf.delegate("alice", "bob"),
            Err(ApprovalError::InvalidDelegation { .. })
        ));
    }
}
