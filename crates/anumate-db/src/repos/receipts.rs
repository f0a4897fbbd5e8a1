//! Durable receipt store
//!
//! The chain head lives in its own table; `compare_and_set_head` advances it
//! with a guarded UPDATE (or a conflict-free INSERT for the first link), so
//! concurrent appenders observe success or a clean miss.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use anumate_receipts::{ReceiptError, ReceiptResult, ReceiptStore};
use anumate_types::{Receipt, ReceiptId, ReceiptPayload, TenantId};

/// Postgres-backed receipt store
pub struct PgReceiptStore {
    pool: PgPool,
}

impl PgReceiptStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ReceiptRow {
    receipt_id: Uuid,
    tenant_id: Uuid,
    payload: serde_json::Value,
    content_hash: String,
    signature: String,
    signer_public_key: String,
    prior_receipt_hash: Option<String>,
    worm_uri: Option<String>,
    created_at: DateTime<Utc>,
    retention_until: Option<DateTime<Utc>>,
}

impl ReceiptRow {
    fn into_receipt(self) -> ReceiptResult<Receipt> {
        let payload: ReceiptPayload = serde_json::from_value(self.payload)
            .map_err(|e| ReceiptError::Store(format!("payload decode: {e}")))?;
        Ok(Receipt {
            receipt_id: ReceiptId::from_uuid(self.receipt_id),
            tenant_id: TenantId::from_uuid(self.tenant_id),
            payload,
            content_hash: self.content_hash,
            signature: self.signature,
            signer_public_key: self.signer_public_key,
            prior_receipt_hash: self.prior_receipt_hash,
            worm_uri: self.worm_uri,
            created_at: self.created_at,
            retention_until: self.retention_until,
        })
    }
}

fn store_err(e: sqlx::Error) -> ReceiptError {
    ReceiptError::Store(e.to_string())
}

#[async_trait]
impl ReceiptStore for PgReceiptStore {
    async fn insert(&self, receipt: Receipt) -> ReceiptResult<()> {
        let payload = serde_json::to_value(&receipt.payload)
            .map_err(|e| ReceiptError::Store(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO receipts (receipt_id, tenant_id, payload, content_hash,
                signature, signer_public_key, prior_receipt_hash, worm_uri,
                created_at, retention_until)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(receipt.receipt_id.as_uuid())
        .bind(receipt.tenant_id.as_uuid())
        .bind(payload)
        .bind(&receipt.content_hash)
        .bind(&receipt.signature)
        .bind(&receipt.signer_public_key)
        .bind(&receipt.prior_receipt_hash)
        .bind(&receipt.worm_uri)
        .bind(receipt.created_at)
        .bind(receipt.retention_until)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn get(
        &self,
        tenant_id: &TenantId,
        receipt_id: &ReceiptId,
    ) -> ReceiptResult<Option<Receipt>> {
        let row = sqlx::query_as::<_, ReceiptRow>(
            "SELECT * FROM receipts WHERE tenant_id = $1 AND receipt_id = $2",
        )
        .bind(tenant_id.as_uuid())
        .bind(receipt_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.map(ReceiptRow::into_receipt).transpose()
    }

    async fn list(
        &self,
        tenant_id: &TenantId,
        limit: usize,
        offset: usize,
    ) -> ReceiptResult<Vec<Receipt>> {
        let rows = sqlx::query_as::<_, ReceiptRow>(
            r#"
            SELECT * FROM receipts WHERE tenant_id = $1
            ORDER BY created_at DESC LIMIT $2 OFFSET $3
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(limit.min(i64::MAX as usize) as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        rows.into_iter().map(ReceiptRow::into_receipt).collect()
    }

    async fn chain_head(&self, tenant_id: &TenantId) -> ReceiptResult<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT head FROM receipt_chain_heads WHERE tenant_id = $1")
                .bind(tenant_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(store_err)?;
        Ok(row.map(|(head,)| head))
    }

    async fn compare_and_set_head(
        &self,
        tenant_id: &TenantId,
        expected: Option<&str>,
        new_head: &str,
    ) -> ReceiptResult<bool> {
        let result = match expected {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO receipt_chain_heads (tenant_id, head)
                    VALUES ($1, $2) ON CONFLICT (tenant_id) DO NOTHING
                    "#,
                )
                .bind(tenant_id.as_uuid())
                .bind(new_head)
                .execute(&self.pool)
                .await
            }
            Some(expected) => {
                sqlx::query(
                    "UPDATE receipt_chain_heads SET head = $3 WHERE tenant_id = $1 AND head = $2",
                )
                .bind(tenant_id.as_uuid())
                .bind(expected)
                .bind(new_head)
                .execute(&self.pool)
                .await
            }
        }
        .map_err(store_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_worm_uri(
        &self,
        tenant_id: &TenantId,
        receipt_id: &ReceiptId,
        worm_uri: &str,
    ) -> ReceiptResult<()> {
        sqlx::query(
            "UPDATE receipts SET worm_uri = $3 WHERE tenant_id = $1 AND receipt_id = $2",
        )
        .bind(tenant_id.as_uuid())
        .bind(receipt_id.as_uuid())
        .bind(worm_uri)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }
}
