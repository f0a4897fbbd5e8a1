//! Durable idempotency record store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use anumate_orchestrator::{
    IdempotencyRecord, IdempotencyStatus, IdempotencyStore, OrchestratorError,
    OrchestratorResult, Reservation,
};
use anumate_types::{RunId, TenantId};

/// Postgres-backed idempotency store
pub struct PgIdempotencyStore {
    pool: PgPool,
}

impl PgIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn store_err(e: sqlx::Error) -> OrchestratorError {
    OrchestratorError::Transient(format!("idempotency store: {e}"))
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    tenant_id: Uuid,
    key: String,
    request_fingerprint: String,
    run_id: Uuid,
    status: String,
    cached_response: Option<serde_json::Value>,
    expires_at: DateTime<Utc>,
}

impl From<RecordRow> for IdempotencyRecord {
    fn from(row: RecordRow) -> Self {
        Self {
            key: row.key,
            tenant_id: TenantId::from_uuid(row.tenant_id),
            request_fingerprint: row.request_fingerprint,
            run_id: RunId::from_uuid(row.run_id),
            status: if row.status == "completed" {
                IdempotencyStatus::Completed
            } else {
                IdempotencyStatus::InFlight
            },
            cached_response: row.cached_response,
            expires_at: row.expires_at,
        }
    }
}

#[async_trait]
impl IdempotencyStore for PgIdempotencyStore {
    async fn reserve(
        &self,
        tenant_id: &TenantId,
        key: &str,
        fingerprint: &str,
        run_id: RunId,
        expires_at: DateTime<Utc>,
    ) -> OrchestratorResult<Reservation> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        sqlx::query(
            "DELETE FROM idempotency_records WHERE tenant_id = $1 AND key = $2 AND expires_at <= now()",
        )
        .bind(tenant_id.as_uuid())
        .bind(key)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO idempotency_records
                (tenant_id, key, request_fingerprint, run_id, status, expires_at)
            VALUES ($1, $2, $3, $4, 'in_flight', $5)
            ON CONFLICT (tenant_id, key) DO NOTHING
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(key)
        .bind(fingerprint)
        .bind(run_id.as_uuid())
        .bind(expires_at)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        if inserted.rows_affected() == 1 {
            tx.commit().await.map_err(store_err)?;
            return Ok(Reservation::Reserved);
        }

        let row = sqlx::query_as::<_, RecordRow>(
            "SELECT * FROM idempotency_records WHERE tenant_id = $1 AND key = $2",
        )
        .bind(tenant_id.as_uuid())
        .bind(key)
        .fetch_one(&mut *tx)
        .await
        .map_err(store_err)?;
        tx.commit().await.map_err(store_err)?;

        Ok(Reservation::Existing(row.into()))
    }

    async fn finalize(
        &self,
        tenant_id: &TenantId,
        key: &str,
        response: serde_json::Value,
    ) -> OrchestratorResult<()> {
        sqlx::query(
            r#"
            UPDATE idempotency_records SET status = 'completed', cached_response = $3
            WHERE tenant_id = $1 AND key = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(key)
        .bind(response)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn release(&self, tenant_id: &TenantId, key: &str) -> OrchestratorResult<()> {
        sqlx::query("DELETE FROM idempotency_records WHERE tenant_id = $1 AND key = $2")
            .bind(tenant_id.as_uuid())
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }
}
