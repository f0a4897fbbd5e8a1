//! Durable run store
//!
//! Updates run in a transaction with a row lock so the state graph check
//! and the write are atomic even across processes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use anumate_orchestrator::{apply_update, OrchestratorError, OrchestratorResult, RunStore, RunUpdate};
use anumate_types::{ApprovalId, CorrelationId, ExecutionRun, ReceiptId, RunId, RunStatus, TenantId};

/// Postgres-backed run store
pub struct PgRunStore {
    pool: PgPool,
}

impl PgRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn status_to_str(status: RunStatus) -> String {
    status.to_string()
}

fn status_from_str(s: &str) -> OrchestratorResult<RunStatus> {
    Ok(match s {
        "Pending" => RunStatus::Pending,
        "Validating" => RunStatus::Validating,
        "AwaitingApproval" => RunStatus::AwaitingApproval,
        "Running" => RunStatus::Running,
        "Paused" => RunStatus::Paused,
        "Succeeded" => RunStatus::Succeeded,
        "Failed" => RunStatus::Failed,
        "Cancelled" => RunStatus::Cancelled,
        other => {
            return Err(OrchestratorError::Internal(format!(
                "unknown run status '{other}' in store"
            )))
        }
    })
}

#[derive(sqlx::FromRow)]
struct RunRow {
    run_id: Uuid,
    tenant_id: Uuid,
    plan_hash: String,
    engine: String,
    status: String,
    progress: f64,
    parameters: serde_json::Value,
    results: serde_json::Value,
    error: Option<String>,
    approval_ids: Vec<Uuid>,
    receipt_id: Option<Uuid>,
    capability_token_jti: Option<String>,
    correlation_id: String,
    idempotency_key: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl RunRow {
    fn into_run(self) -> OrchestratorResult<ExecutionRun> {
        Ok(ExecutionRun {
            run_id: RunId::from_uuid(self.run_id),
            tenant_id: TenantId::from_uuid(self.tenant_id),
            plan_hash: self.plan_hash,
            engine: self.engine,
            status: status_from_str(&self.status)?,
            progress: self.progress,
            parameters: self.parameters,
            results: self.results,
            error: self.error,
            approval_ids: self
                .approval_ids
                .into_iter()
                .map(ApprovalId::from_uuid)
                .collect(),
            receipt_id: self.receipt_id.map(ReceiptId::from_uuid),
            capability_token_jti: self.capability_token_jti,
            correlation_id: CorrelationId::from_string(self.correlation_id),
            idempotency_key: self.idempotency_key,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

fn store_err(e: sqlx::Error) -> OrchestratorError {
    OrchestratorError::Transient(format!("run store: {e}"))
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn insert(&self, run: ExecutionRun) -> OrchestratorResult<()> {
        sqlx::query(
            r#"
            INSERT INTO runs (run_id, tenant_id, plan_hash, engine, status, progress,
                parameters, results, error, approval_ids, receipt_id,
                capability_token_jti, correlation_id, idempotency_key,
                created_at, started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(run.run_id.as_uuid())
        .bind(run.tenant_id.as_uuid())
        .bind(&run.plan_hash)
        .bind(&run.engine)
        .bind(status_to_str(run.status))
        .bind(run.progress)
        .bind(&run.parameters)
        .bind(&run.results)
        .bind(&run.error)
        .bind(
            run.approval_ids
                .iter()
                .map(|a| *a.as_uuid())
                .collect::<Vec<_>>(),
        )
        .bind(run.receipt_id.map(|r| *r.as_uuid()))
        .bind(&run.capability_token_jti)
        .bind(run.correlation_id.as_str())
        .bind(&run.idempotency_key)
        .bind(run.created_at)
        .bind(run.started_at)
        .bind(run.completed_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn get(
        &self,
        tenant_id: &TenantId,
        run_id: &RunId,
    ) -> OrchestratorResult<Option<ExecutionRun>> {
        let row = sqlx::query_as::<_, RunRow>(
            "SELECT * FROM runs WHERE tenant_id = $1 AND run_id = $2",
        )
        .bind(tenant_id.as_uuid())
        .bind(run_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.map(RunRow::into_run).transpose()
    }

    async fn update(
        &self,
        tenant_id: &TenantId,
        run_id: &RunId,
        update: RunUpdate,
    ) -> OrchestratorResult<ExecutionRun> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let row = sqlx::query_as::<_, RunRow>(
            "SELECT * FROM runs WHERE tenant_id = $1 AND run_id = $2 FOR UPDATE",
        )
        .bind(tenant_id.as_uuid())
        .bind(run_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_err)?
        .ok_or_else(|| OrchestratorError::RunNotFound {
            run_id: run_id.to_string(),
        })?;

        let mut run = row.into_run()?;
        apply_update(&mut run, update)?;

        sqlx::query(
            r#"
            UPDATE runs SET status = $3, progress = $4, results = $5, error = $6,
                approval_ids = $7, receipt_id = $8, capability_token_jti = $9,
                started_at = $10, completed_at = $11
            WHERE tenant_id = $1 AND run_id = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(run_id.as_uuid())
        .bind(status_to_str(run.status))
        .bind(run.progress)
        .bind(&run.results)
        .bind(&run.error)
        .bind(
            run.approval_ids
                .iter()
                .map(|a| *a.as_uuid())
                .collect::<Vec<_>>(),
        )
        .bind(run.receipt_id.map(|r| *r.as_uuid()))
        .bind(&run.capability_token_jti)
        .bind(run.started_at)
        .bind(run.completed_at)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        tx.commit().await.map_err(store_err)?;
        Ok(run)
    }

    async fn active_count(&self, tenant_id: &TenantId) -> OrchestratorResult<usize> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM runs
            WHERE tenant_id = $1 AND status NOT IN ('Succeeded', 'Failed', 'Cancelled')
            "#,
        )
        .bind(tenant_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            RunStatus::Pending,
            RunStatus::Validating,
            RunStatus::AwaitingApproval,
            RunStatus::Running,
            RunStatus::Paused,
            RunStatus::Succeeded,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            assert_eq!(status_from_str(&status_to_str(status)).unwrap(), status);
        }
    }

    #[test]
    fn test_unknown_status_is_internal_error() {
        assert!(matches!(
            status_from_str("Exploded"),
            Err(OrchestratorError::Internal(_))
        ));
    }
}
