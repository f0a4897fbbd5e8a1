//! GhostRun service
//!
//! Tracks simulation runs: start, status, report retrieval and cancellation.
//! Each run executes in its own task; the report is retained until the run
//! record is dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use anumate_events::EventPublisher;
use anumate_types::{subjects, ExecutablePlan, GhostRunId, TenantId};

use crate::{
    GhostRunConfig, GhostRunError, GhostRunResult, PreflightReport, SimulationEngine,
    SimulationMetrics, SimulationStatus,
};

/// Public view of a simulation run
#[derive(Debug, Clone)]
pub struct SimulationRun {
    pub run_id: GhostRunId,
    pub tenant_id: TenantId,
    pub plan_hash: String,
    pub status: SimulationStatus,
    pub progress: f64,
    pub error: Option<String>,
}

struct RunState {
    view: SimulationRun,
    report: Option<PreflightReport>,
    metrics: Option<SimulationMetrics>,
    cancel: Arc<AtomicBool>,
}

/// The GhostRun service
pub struct GhostRunService {
    engine: Arc<SimulationEngine>,
    runs: Arc<RwLock<HashMap<GhostRunId, RunState>>>,
    events: Option<Arc<EventPublisher>>,
}

impl GhostRunService {
    pub fn new(engine: SimulationEngine) -> Self {
        Self {
            engine: Arc::new(engine),
            runs: Arc::new(RwLock::new(HashMap::new())),
            events: None,
        }
    }

    /// Publish `events.preflight.completed` when simulations finish
    pub fn with_events(mut self, events: Arc<EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Start a simulation, returning its run id immediately
    pub async fn start(
        &self,
        tenant_id: TenantId,
        plan: Arc<ExecutablePlan>,
        config: GhostRunConfig,
    ) -> GhostRunId {
        let run_id = GhostRunId::new();
        let cancel = Arc::new(AtomicBool::new(false));

        self.runs.write().await.insert(
            run_id,
            RunState {
                view: SimulationRun {
                    run_id,
                    tenant_id,
                    plan_hash: plan.plan_hash.clone(),
                    status: SimulationStatus::Queued,
                    progress: 0.0,
                    error: None,
                },
                report: None,
                metrics: None,
                cancel: Arc::clone(&cancel),
            },
        );

        let engine = Arc::clone(&self.engine);
        let runs = Arc::clone(&self.runs);
        let events = self.events.clone();
        tokio::spawn(async move {
            {
                let mut guard = runs.write().await;
                if let Some(state) = guard.get_mut(&run_id) {
                    state.view.status = SimulationStatus::Running;
                }
            }

            // Progress updates flow through a channel so the engine itself
            // stays free of run bookkeeping
            let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel::<f64>();
            let progress_runs = Arc::clone(&runs);
            let progress_task = tokio::spawn(async move {
                while let Some(p) = progress_rx.recv().await {
                    let mut guard = progress_runs.write().await;
                    if let Some(state) = guard.get_mut(&run_id) {
                        state.view.progress = p;
                    }
                }
            });

            let outcome = engine
                .simulate(tenant_id, run_id, &plan, &config, &cancel, |p| {
                    let _ = progress_tx.send(p);
                })
                .await;
            drop(progress_tx);
            let _ = progress_task.await;

            let mut completed = None;
            {
                let mut guard = runs.write().await;
                if let Some(state) = guard.get_mut(&run_id) {
                    match outcome {
                        Ok((report, metrics)) => {
                            state.view.status = SimulationStatus::Completed;
                            state.view.progress = 1.0;
                            completed = Some((
                                report.report_id,
                                report.plan_hash.clone(),
                                report.overall_risk,
                                report.feasible,
                            ));
                            state.report = Some(report);
                            state.metrics = Some(metrics);
                        }
                        Err(GhostRunError::Cancelled { .. }) => {
                            state.view.status = SimulationStatus::Cancelled;
                        }
                        Err(e) => {
                            state.view.status = SimulationStatus::Failed;
                            state.view.error = Some(e.to_string());
                        }
                    }
                }
            }

            if let (Some(events), Some((report_id, plan_hash, risk, feasible))) =
                (events, completed)
            {
                let _ = events
                    .publish(
                        subjects::PREFLIGHT_COMPLETED,
                        "com.anumate.preflight.completed",
                        tenant_id,
                        Some(run_id.to_string()),
                        serde_json::json!({
                            "run_id": run_id,
                            "report_id": report_id,
                            "plan_hash": plan_hash,
                            "overall_risk": risk,
                            "feasible": feasible,
                        }),
                    )
                    .await;
            }
        });

        run_id
    }

    /// Status and progress of a run, tenant-scoped
    pub async fn status(
        &self,
        tenant_id: &TenantId,
        run_id: &GhostRunId,
    ) -> GhostRunResult<SimulationRun> {
        let runs = self.runs.read().await;
        runs.get(run_id)
            .filter(|s| s.view.tenant_id == *tenant_id)
            .map(|s| s.view.clone())
            .ok_or_else(|| GhostRunError::RunNotFound {
                run_id: run_id.to_string(),
            })
    }

    /// The preflight report of a completed run
    pub async fn report(
        &self,
        tenant_id: &TenantId,
        run_id: &GhostRunId,
    ) -> GhostRunResult<PreflightReport> {
        let runs = self.runs.read().await;
        let state = runs
            .get(run_id)
            .filter(|s| s.view.tenant_id == *tenant_id)
            .ok_or_else(|| GhostRunError::RunNotFound {
                run_id: run_id.to_string(),
            })?;
        state
            .report
            .clone()
            .ok_or_else(|| GhostRunError::NotCompleted {
                run_id: run_id.to_string(),
            })
    }

    /// Timing metrics of a completed run
    pub async fn metrics(
        &self,
        tenant_id: &TenantId,
        run_id: &GhostRunId,
    ) -> GhostRunResult<SimulationMetrics> {
        let runs = self.runs.read().await;
        let state = runs
            .get(run_id)
            .filter(|s| s.view.tenant_id == *tenant_id)
            .ok_or_else(|| GhostRunError::RunNotFound {
                run_id: run_id.to_string(),
            })?;
        state
            .metrics
            .clone()
            .ok_or_else(|| GhostRunError::NotCompleted {
                run_id: run_id.to_string(),
            })
    }

    /// Request cancellation of a running simulation. Idempotent.
    pub async fn cancel(&self, tenant_id: &TenantId, run_id: &GhostRunId) -> GhostRunResult<()> {
        let runs = self.runs.read().await;
        let state = runs
            .get(run_id)
            .filter(|s| s.view.tenant_id == *tenant_id)
            .ok_or_else(|| GhostRunError::RunNotFound {
                run_id: run_id.to_string(),
            })?;
        state.cancel.store(true, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MockToolRegistry, ToolOverride};
    use anumate_types::{
        ExecutionFlow, ExecutionStep, PlanMetadata, ResourceEnvelope, RiskLevel, SecurityContext,
    };

    fn plan(tenant: TenantId) -> Arc<ExecutablePlan> {
        Arc::new(ExecutablePlan {
            plan_hash: "abc123".into(),
            tenant_id: tenant,
            name: "demo".into(),
            version: "1.0.0".into(),
            flows: vec![ExecutionFlow {
                flow_id: "main".into(),
                name: "main".into(),
                steps: vec![ExecutionStep {
                    step_id: "a".into(),
                    name: "a".into(),
                    tool: "http".into(),
                    action: None,
                    parameters: serde_json::json!({}),
                    depends_on: vec![],
                    timeout_secs: 30,
                    retries: 1,
                    requires_approval: false,
                    idempotent: true,
                    resources: ResourceEnvelope::default(),
                    risk: RiskLevel::Low,
                }],
                parallel_batches: vec![vec!["a".into()]],
            }],
            main_flow: "main".into(),
            tool_allowlist: vec!["http".into()],
            security_context: SecurityContext::default(),
            metadata: PlanMetadata {
                source_capsule_name: "demo".into(),
                source_capsule_version: "1.0.0".into(),
                source_capsule_checksum: "c".into(),
                compiler_version: "1.0.0".into(),
                resolved_dependencies: vec![],
                optimization_level: "standard".into(),
            },
        })
    }

    fn config() -> GhostRunConfig {
        let mut config = GhostRunConfig {
            seed: Some(1),
            ..Default::default()
        };
        config.connector_overrides.insert(
            "http".into(),
            ToolOverride {
                force_success: Some(true),
                ..Default::default()
            },
        );
        config
    }

    async fn wait_terminal(
        service: &GhostRunService,
        tenant: &TenantId,
        run_id: &GhostRunId,
    ) -> SimulationRun {
        for _ in 0..200 {
            let run = service.status(tenant, run_id).await.unwrap();
            if run.status.is_terminal() {
                return run;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("simulation did not settle");
    }

    #[tokio::test]
    async fn test_start_to_report() {
        let service = GhostRunService::new(SimulationEngine::new(MockToolRegistry::with_defaults()));
        let tenant = TenantId::new();
        let run_id = service.start(tenant, plan(tenant), config()).await;

        let run = wait_terminal(&service, &tenant, &run_id).await;
        assert_eq!(run.status, SimulationStatus::Completed);

        let report = service.report(&tenant, &run_id).await.unwrap();
        assert_eq!(report.plan_hash, "abc123");
        assert!(report.feasible);

        let metrics = service.metrics(&tenant, &run_id).await.unwrap();
        assert_eq!(metrics.steps_simulated, 1);
    }

    #[tokio::test]
    async fn test_report_before_completion_conflicts() {
        let service = GhostRunService::new(SimulationEngine::new(MockToolRegistry::with_defaults()));
        let tenant = TenantId::new();
        // Never started: unknown run id
        let err = service.report(&tenant, &GhostRunId::new()).await.unwrap_err();
        assert!(matches!(err, GhostRunError::RunNotFound { .. }));
    }

    #[tokio::test]
    async fn test_tenant_isolation() {
        let service = GhostRunService::new(SimulationEngine::new(MockToolRegistry::with_defaults()));
        let tenant = TenantId::new();
        let run_id = service.start(tenant, plan(tenant), config()).await;

        let err = service
            .status(&TenantId::new(), &run_id)
            .await
            .unwrap_err();
        assert!(matches!(err, GhostRunError::RunNotFound { .. }));
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let service = GhostRunService::new(SimulationEngine::new(MockToolRegistry::with_defaults()));
        let tenant = TenantId::new();
        let run_id = service.start(tenant, plan(tenant), config()).await;

        service.cancel(&tenant, &run_id).await.unwrap();
        service.cancel(&tenant, &run_id).await.unwrap();
    }
}
