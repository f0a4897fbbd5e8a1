//! Orchestrator service
//!
//! The public surface: execute, get, pause, resume, cancel. Submissions are
//! accepted asynchronously; a run actor owns every transition afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};

use anumate_captokens::TokenService;
use anumate_events::EventPublisher;
use anumate_receipts::ReceiptService;
use anumate_types::{
    CorrelationId, ExecutablePlan, ExecutionRun, ReceiptId, RunId, RunStatus, TenantId,
};

use crate::{
    actor, request_fingerprint, ApprovalsBridge, ExecutionObserver, IdempotencyStatus,
    IdempotencyStore, OrchestratorConfig, OrchestratorError, OrchestratorResult, Reservation,
    RunStore, ToolRuntime,
};

/// Plan lookup interface; backed by the compiler cache and plan store
#[async_trait]
pub trait PlanResolver: Send + Sync {
    async fn resolve(
        &self,
        tenant_id: &TenantId,
        plan_hash: &str,
    ) -> OrchestratorResult<Option<Arc<ExecutablePlan>>>;
}

/// In-memory plan resolver for tests
#[derive(Default)]
pub struct InMemoryPlanResolver {
    plans: RwLock<HashMap<(TenantId, String), Arc<ExecutablePlan>>>,
}

impl InMemoryPlanResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, plan: Arc<ExecutablePlan>) {
        self.plans
            .write()
            .await
            .insert((plan.tenant_id, plan.plan_hash.clone()), plan);
    }
}

#[async_trait]
impl PlanResolver for InMemoryPlanResolver {
    async fn resolve(
        &self,
        tenant_id: &TenantId,
        plan_hash: &str,
    ) -> OrchestratorResult<Option<Arc<ExecutablePlan>>> {
        let plans = self.plans.read().await;
        Ok(plans.get(&(*tenant_id, plan_hash.to_string())).cloned())
    }
}

/// An execution request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Content hash of the plan to execute
    pub plan_hash: String,
    /// Optional inline plan; its recomputed hash must equal `plan_hash`
    #[serde(default)]
    pub plan: Option<ExecutablePlan>,
    /// Execution engine / tool runtime selector
    pub engine: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub require_approval: bool,
    /// Approvers for the execution gate; required when approval applies
    #[serde(default)]
    pub approvers: Vec<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

/// Response to an execution request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResponse {
    pub run_id: RunId,
    pub status: RunStatus,
    pub receipt_id: Option<ReceiptId>,
    pub correlation_id: CorrelationId,
    /// True when served from the idempotency cache
    #[serde(default)]
    pub cached: bool,
}

// Fields participating in the request fingerprint. Correlation IDs and other
// volatile attributes are deliberately absent so that a client retry with a
// fresh correlation ID still matches.
#[derive(Serialize)]
struct NormalizedRequest<'a> {
    tenant_id: &'a TenantId,
    plan_hash: &'a str,
    engine: &'a str,
    parameters: &'a serde_json::Value,
    require_approval: bool,
}

/// Commands consumed by a run actor at suspension points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunCommand {
    Pause,
    Resume,
    Cancel,
}

/// Shared dependencies, one per orchestrator
pub(crate) struct Shared {
    pub config: OrchestratorConfig,
    pub plans: Arc<dyn PlanResolver>,
    pub tokens: Arc<TokenService>,
    pub approvals: Arc<dyn ApprovalsBridge>,
    pub receipts: Arc<ReceiptService>,
    pub events: Arc<EventPublisher>,
    pub runtime: Arc<dyn ToolRuntime>,
    pub idempotency: Arc<dyn IdempotencyStore>,
    pub runs: Arc<dyn RunStore>,
    pub observers: Vec<Arc<dyn ExecutionObserver>>,
    pub handles: RwLock<HashMap<RunId, mpsc::UnboundedSender<RunCommand>>>,
}

/// The orchestrator
#[derive(Clone)]
pub struct Orchestrator {
    pub(crate) shared: Arc<Shared>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: OrchestratorConfig,
        plans: Arc<dyn PlanResolver>,
        tokens: Arc<TokenService>,
        approvals: Arc<dyn ApprovalsBridge>,
        receipts: Arc<ReceiptService>,
        events: Arc<EventPublisher>,
        runtime: Arc<dyn ToolRuntime>,
        idempotency: Arc<dyn IdempotencyStore>,
        runs: Arc<dyn RunStore>,
        observers: Vec<Arc<dyn ExecutionObserver>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config: config.validated(),
                plans,
                tokens,
                approvals,
                receipts,
                events,
                runtime,
                idempotency,
                runs,
                observers,
                handles: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Accept an execution request. Returns immediately; the run proceeds
    /// asynchronously under its own actor.
    pub async fn execute(
        &self,
        tenant_id: TenantId,
        request: ExecutionRequest,
    ) -> OrchestratorResult<ExecutionResponse> {
        let shared = &self.shared;

        // Backpressure: bounded concurrent runs per tenant
        let active = shared.runs.active_count(&tenant_id).await?;
        if active >= shared.config.max_concurrent_runs_per_tenant {
            return Err(OrchestratorError::ServiceBusy {
                retry_after_secs: shared.config.busy_retry_after_secs,
            });
        }

        let correlation_id = request
            .correlation_id
            .clone()
            .map(CorrelationId::from_string)
            .unwrap_or_default();

        let run = ExecutionRun::new(
            tenant_id,
            request.plan_hash.clone(),
            request.engine.clone(),
            request.parameters.clone(),
            correlation_id.clone(),
        );
        let run_id = run.run_id;

        // Idempotency: reserve before any work
        if let Some(key) = &request.idempotency_key {
            let fingerprint = request_fingerprint(&NormalizedRequest {
                tenant_id: &tenant_id,
                plan_hash: &request.plan_hash,
                engine: &request.engine,
                parameters: &request.parameters,
                require_approval: request.require_approval,
            })?;
            let expires_at =
                Utc::now() + Duration::hours(shared.config.idempotency_ttl_hours as i64);

            match shared
                .idempotency
                .reserve(&tenant_id, key, &fingerprint, run_id, expires_at)
                .await?
            {
                Reservation::Reserved => {}
                Reservation::Existing(record) => {
                    if record.request_fingerprint != fingerprint {
                        return Err(OrchestratorError::IdempotencyConflict { key: key.clone() });
                    }
                    return match record.status {
                        IdempotencyStatus::Completed => {
                            let mut response: ExecutionResponse = record
                                .cached_response
                                .as_ref()
                                .map(|v| serde_json::from_value(v.clone()))
                                .transpose()
                                .map_err(|e| {
                                    OrchestratorError::Internal(format!(
                                        "cached response corrupt: {e}"
                                    ))
                                })?
                                .ok_or_else(|| {
                                    OrchestratorError::Internal(
                                        "completed record without response".to_string(),
                                    )
                                })?;
                            response.cached = true;
                            Ok(response)
                        }
                        IdempotencyStatus::InFlight => {
                            // The original submission is still running
                            let existing = shared
                                .runs
                                .get(&tenant_id, &record.run_id)
                                .await?
                                .ok_or_else(|| OrchestratorError::RunNotFound {
                                    run_id: record.run_id.to_string(),
                                })?;
                            Ok(ExecutionResponse {
                                run_id: existing.run_id,
                                status: existing.status,
                                receipt_id: existing.receipt_id,
                                correlation_id: existing.correlation_id,
                                cached: true,
                            })
                        }
                    };
                }
            }
        }

        let mut run = run;
        run.idempotency_key = request.idempotency_key.clone();
        shared.runs.insert(run).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        shared.handles.write().await.insert(run_id, tx);

        let shared_for_actor = Arc::clone(shared);
        tokio::spawn(async move {
            actor::drive(shared_for_actor, tenant_id, run_id, request, rx).await;
        });

        Ok(ExecutionResponse {
            run_id,
            status: RunStatus::Pending,
            receipt_id: None,
            correlation_id,
            cached: false,
        })
    }

    /// Fetch a run, tenant-scoped
    pub async fn get(&self, tenant_id: &TenantId, run_id: &RunId) -> OrchestratorResult<ExecutionRun> {
        self.shared
            .runs
            .get(tenant_id, run_id)
            .await?
            .ok_or_else(|| OrchestratorError::RunNotFound {
                run_id: run_id.to_string(),
            })
    }

    /// Pause a run at its next suspension point
    pub async fn pause(&self, tenant_id: &TenantId, run_id: &RunId) -> OrchestratorResult<()> {
        let run = self.get(tenant_id, run_id).await?;
        if !matches!(run.status, RunStatus::Running | RunStatus::AwaitingApproval) {
            return Err(OrchestratorError::InvalidTransition {
                run_id: run_id.to_string(),
                from: run.status.to_string(),
                to: RunStatus::Paused.to_string(),
            });
        }
        self.send_command(run_id, RunCommand::Pause).await
    }

    /// Resume a paused run
    pub async fn resume(&self, tenant_id: &TenantId, run_id: &RunId) -> OrchestratorResult<()> {
        let run = self.get(tenant_id, run_id).await?;
        if run.status != RunStatus::Paused {
            return Err(OrchestratorError::InvalidTransition {
                run_id: run_id.to_string(),
                from: run.status.to_string(),
                to: RunStatus::Running.to_string(),
            });
        }
        self.send_command(run_id, RunCommand::Resume).await
    }

    /// Request cooperative cancellation. Idempotent: cancelling a run that
    /// is already cancelled (or finished cancelling) succeeds.
    pub async fn cancel(&self, tenant_id: &TenantId, run_id: &RunId) -> OrchestratorResult<()> {
        let run = self.get(tenant_id, run_id).await?;
        if run.status == RunStatus::Cancelled {
            return Ok(());
        }
        if run.status.is_terminal() {
            return Err(OrchestratorError::InvalidTransition {
                run_id: run_id.to_string(),
                from: run.status.to_string(),
                to: RunStatus::Cancelled.to_string(),
            });
        }
        self.send_command(run_id, RunCommand::Cancel).await
    }

    async fn send_command(&self, run_id: &RunId, command: RunCommand) -> OrchestratorResult<()> {
        let handles = self.shared.handles.read().await;
        let tx = handles
            .get(run_id)
            .ok_or_else(|| OrchestratorError::RunNotFound {
                run_id: run_id.to_string(),
            })?;
        tx.send(command)
            .map_err(|_| OrchestratorError::Internal("run actor is gone".to_string()))
    }
}
