//! Durable token record store and audit log

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use anumate_captokens::{TokenAuditLog, TokenError, TokenRecord, TokenResult, TokenStore};
use anumate_types::{TenantId, TokenAuditAction, TokenAuditRecord};

/// Postgres-backed token record store
pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct TokenRow {
    token_id: String,
    tenant_id: Uuid,
    subject: String,
    capabilities: Vec<String>,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    revoked: bool,
    revoked_at: Option<DateTime<Utc>>,
    created_by: Option<String>,
}

impl From<TokenRow> for TokenRecord {
    fn from(row: TokenRow) -> Self {
        Self {
            token_id: row.token_id,
            tenant_id: TenantId::from_uuid(row.tenant_id),
            subject: row.subject,
            capabilities: row.capabilities,
            issued_at: row.issued_at,
            expires_at: row.expires_at,
            revoked: row.revoked,
            revoked_at: row.revoked_at,
            created_by: row.created_by,
        }
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn insert(&self, record: TokenRecord) -> TokenResult<()> {
        sqlx::query(
            r#"
            INSERT INTO captokens (token_id, tenant_id, subject, capabilities,
                issued_at, expires_at, revoked, revoked_at, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&record.token_id)
        .bind(record.tenant_id.as_uuid())
        .bind(&record.subject)
        .bind(&record.capabilities)
        .bind(record.issued_at)
        .bind(record.expires_at)
        .bind(record.revoked)
        .bind(record.revoked_at)
        .bind(&record.created_by)
        .execute(&self.pool)
        .await
        .map_err(|e| TokenError::Store(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, tenant_id: &TenantId, token_id: &str) -> TokenResult<Option<TokenRecord>> {
        let row = sqlx::query_as::<_, TokenRow>(
            "SELECT * FROM captokens WHERE tenant_id = $1 AND token_id = $2",
        )
        .bind(tenant_id.as_uuid())
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| TokenError::Store(e.to_string()))?;
        Ok(row.map(Into::into))
    }

    async fn mark_revoked(&self, tenant_id: &TenantId, token_id: &str) -> TokenResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE captokens SET revoked = TRUE, revoked_at = now()
            WHERE tenant_id = $1 AND token_id = $2 AND NOT revoked
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(token_id)
        .execute(&self.pool)
        .await
        .map_err(|e| TokenError::Store(e.to_string()))?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_expired(&self, now: DateTime<Utc>) -> TokenResult<Vec<(TenantId, String)>> {
        let rows: Vec<(Uuid, String)> = sqlx::query_as(
            r#"
            UPDATE captokens SET revoked = TRUE, revoked_at = $1
            WHERE expires_at < $1 AND NOT revoked
            RETURNING tenant_id, token_id
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| TokenError::Store(e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|(tenant, token)| (TenantId::from_uuid(tenant), token))
            .collect())
    }
}

/// Postgres-backed token audit log
pub struct PgTokenAuditLog {
    pool: PgPool,
}

impl PgTokenAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    token_id: String,
    tenant_id: Uuid,
    action: String,
    result: String,
    capability_checked: Option<String>,
    error_message: Option<String>,
    client_ip: Option<String>,
    user_agent: Option<String>,
    created_at: DateTime<Utc>,
}

fn action_to_str(action: TokenAuditAction) -> &'static str {
    match action {
        TokenAuditAction::Issued => "issued",
        TokenAuditAction::Verified => "verified",
        TokenAuditAction::CapabilityCheck => "capability_check",
        TokenAuditAction::Revoked => "revoked",
        TokenAuditAction::Refreshed => "refreshed",
        TokenAuditAction::Expired => "expired",
        TokenAuditAction::Failed => "failed",
    }
}

fn action_from_str(s: &str) -> TokenAuditAction {
    match s {
        "issued" => TokenAuditAction::Issued,
        "verified" => TokenAuditAction::Verified,
        "capability_check" => TokenAuditAction::CapabilityCheck,
        "revoked" => TokenAuditAction::Revoked,
        "refreshed" => TokenAuditAction::Refreshed,
        "expired" => TokenAuditAction::Expired,
        _ => TokenAuditAction::Failed,
    }
}

#[async_trait]
impl TokenAuditLog for PgTokenAuditLog {
    async fn append(&self, record: TokenAuditRecord) -> TokenResult<()> {
        sqlx::query(
            r#"
            INSERT INTO captoken_audit (token_id, tenant_id, action, result,
                capability_checked, error_message, client_ip, user_agent, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&record.token_id)
        .bind(record.tenant_id.as_uuid())
        .bind(action_to_str(record.action))
        .bind(&record.result)
        .bind(&record.capability_checked)
        .bind(&record.error_message)
        .bind(&record.client_ip)
        .bind(&record.user_agent)
        .bind(record.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| TokenError::Store(e.to_string()))?;
        Ok(())
    }

    async fn query(
        &self,
        tenant_id: &TenantId,
        token_id: Option<&str>,
        limit: usize,
    ) -> TokenResult<Vec<TokenAuditRecord>> {
        let rows = if let Some(token_id) = token_id {
            sqlx::query_as::<_, AuditRow>(
                r#"
                SELECT token_id, tenant_id, action, result, capability_checked,
                       error_message, client_ip, user_agent, created_at
                FROM captoken_audit
                WHERE tenant_id = $1 AND token_id = $2
                ORDER BY created_at DESC LIMIT $3
                "#,
            )
            .bind(tenant_id.as_uuid())
            .bind(token_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, AuditRow>(
                r#"
                SELECT token_id, tenant_id, action, result, capability_checked,
                       error_message, client_ip, user_agent, created_at
                FROM captoken_audit
                WHERE tenant_id = $1
                ORDER BY created_at DESC LIMIT $2
                "#,
            )
            .bind(tenant_id.as_uuid())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| TokenError::Store(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| TokenAuditRecord {
                token_id: row.token_id,
                tenant_id: TenantId::from_uuid(row.tenant_id),
                action: action_from_str(&row.action),
                result: row.result,
                capability_checked: row.capability_checked,
                error_message: row.error_message,
                client_ip: row.client_ip,
                user_agent: row.user_agent,
                timestamp: row.created_at,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_roundtrip() {
        for action in [
            TokenAuditAction::Issued,
            TokenAuditAction::Verified,
            TokenAuditAction::CapabilityCheck,
            TokenAuditAction::Revoked,
            TokenAuditAction::Refreshed,
            TokenAuditAction::Expired,
            TokenAuditAction::Failed,
        ] {
            assert_eq!(action_from_str(action_to_str(action)), action);
        }
    }
}
