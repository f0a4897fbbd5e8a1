//! Run persistence
//!
//! The run store holds the externally visible state of every run. Actors
//! write through `transition`, which enforces the state graph; a run in a
//! terminal state admits no further writes.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use anumate_types::{ExecutionRun, RunId, RunStatus, TenantId};

use crate::{OrchestratorError, OrchestratorResult};

/// Durable run store
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn insert(&self, run: ExecutionRun) -> OrchestratorResult<()>;

    async fn get(&self, tenant_id: &TenantId, run_id: &RunId)
        -> OrchestratorResult<Option<ExecutionRun>>;

    /// Apply `update` to the run under the store's lock, enforcing the
    /// state graph when the update changes status.
    async fn update(
        &self,
        tenant_id: &TenantId,
        run_id: &RunId,
        update: RunUpdate,
    ) -> OrchestratorResult<ExecutionRun>;

    /// Count non-terminal runs for a tenant
    async fn active_count(&self, tenant_id: &TenantId) -> OrchestratorResult<usize>;
}

/// A partial update applied to a run
#[derive(Debug, Default, Clone)]
pub struct RunUpdate {
    pub status: Option<RunStatus>,
    pub progress: Option<f64>,
    pub results: Option<serde_json::Value>,
    pub error: Option<String>,
    pub push_approval_id: Option<anumate_types::ApprovalId>,
    pub receipt_id: Option<anumate_types::ReceiptId>,
    pub capability_token_jti: Option<String>,
    pub mark_started: bool,
    pub mark_completed: bool,
}

impl RunUpdate {
    pub fn status(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

/// In-memory run store for tests and local development
#[derive(Default)]
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<RunId, ExecutionRun>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn insert(&self, run: ExecutionRun) -> OrchestratorResult<()> {
        self.runs.write().await.insert(run.run_id, run);
        Ok(())
    }

    async fn get(
        &self,
        tenant_id: &TenantId,
        run_id: &RunId,
    ) -> OrchestratorResult<Option<ExecutionRun>> {
        let runs = self.runs.read().await;
        Ok(runs
            .get(run_id)
            .filter(|r| r.tenant_id == *tenant_id)
            .cloned())
    }

    async fn update(
        &self,
        tenant_id: &TenantId,
        run_id: &RunId,
        update: RunUpdate,
    ) -> OrchestratorResult<ExecutionRun> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(run_id)
            .filter(|r| r.tenant_id == *tenant_id)
            .ok_or_else(|| OrchestratorError::RunNotFound {
                run_id: run_id.to_string(),
            })?;

        apply_update(run, update)?;
        Ok(run.clone())
    }

    async fn active_count(&self, tenant_id: &TenantId) -> OrchestratorResult<usize> {
        let runs = self.runs.read().await;
        Ok(runs
            .values()
            .filter(|r| r.tenant_id == *tenant_id && !r.status.is_terminal())
            .count())
    }
}

/// Apply a partial update, enforcing the state graph. Shared by store
/// implementations.
pub fn apply_update(run: &mut ExecutionRun, update: RunUpdate) -> OrchestratorResult<()> {
    if let Some(next) = update.status {
        if !run.status.can_transition_to(next) {
            return Err(OrchestratorError::InvalidTransition {
                run_id: run.run_id.to_string(),
                from: run.status.to_string(),
                to: next.to_string(),
            });
        }
        run.status = next;
    }
    if let Some(progress) = update.progress {
        run.progress = progress.clamp(0.0, 1.0);
    }
    if let Some(results) = update.results {
        run.results = results;
    }
    if let Some(error) = update.error {
        run.error = Some(error);
    }
    if let Some(approval_id) = update.push_approval_id {
        run.approval_ids.push(approval_id);
    }
    if let Some(receipt_id) = update.receipt_id {
        run.receipt_id = Some(receipt_id);
    }
    if let Some(jti) = update.capability_token_jti {
        run.capability_token_jti = Some(jti);
    }
    if update.mark_started {
        run.started_at = Some(Utc::now());
    }
    if update.mark_completed {
        run.completed_at = Some(Utc::now());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anumate_types::CorrelationId;

    fn run(tenant: TenantId) -> ExecutionRun {
        ExecutionRun::new(
            tenant,
            "abc123",
            "demo_tool",
            serde_json::json!({}),
            CorrelationId::new(),
        )
    }

    #[tokio::test]
    async fn test_transition_enforced() {
        let store = InMemoryRunStore::new();
        let tenant = TenantId::new();
        let r = run(tenant);
        let run_id = r.run_id;
        store.insert(r).await.unwrap();

        // Pending -> Running is not on the graph
        let err = store
            .update(&tenant, &run_id, RunUpdate::status(RunStatus::Running))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTransition { .. }));

        store
            .update(&tenant, &run_id, RunUpdate::status(RunStatus::Validating))
            .await
            .unwrap();
        store
            .update(&tenant, &run_id, RunUpdate::status(RunStatus::Running))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_terminal_runs_are_immutable() {
        let store = InMemoryRunStore::new();
        let tenant = TenantId::new();
        let r = run(tenant);
        let run_id = r.run_id;
        store.insert(r).await.unwrap();

        for status in [RunStatus::Validating, RunStatus::Running, RunStatus::Succeeded] {
            store
                .update(&tenant, &run_id, RunUpdate::status(status))
                .await
                .unwrap();
        }

        let err = store
            .update(&tenant, &run_id, RunUpdate::status(RunStatus::Running))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_active_count_excludes_terminal() {
        let store = InMemoryRunStore::new();
        let tenant = TenantId::new();
        let r1 = run(tenant);
        let r1_id = r1.run_id;
        store.insert(r1).await.unwrap();
        store.insert(run(tenant)).await.unwrap();
        assert_eq!(store.active_count(&tenant).await.unwrap(), 2);

        for status in [RunStatus::Validating, RunStatus::Cancelled] {
            store
                .update(&tenant, &r1_id, RunUpdate::status(status))
                .await
                .unwrap();
        }
        assert_eq!(store.active_count(&tenant).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_tenant_scoped_reads() {
        let store = InMemoryRunStore::new();
        let tenant = TenantId::new();
        let r = run(tenant);
        let run_id = r.run_id;
        store.insert(r).await.unwrap();

        assert!(store.get(&tenant, &run_id).await.unwrap().is_some());
        assert!(store.get(&TenantId::new(), &run_id).await.unwrap().is_none());
    }
}
