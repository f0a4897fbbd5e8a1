//! Token audit trail
//!
//! Every token lifecycle action appends an immutable audit record. Records
//! never contain token material, only the jti.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use anumate_types::{TenantId, TokenAuditAction, TokenAuditRecord};

use crate::TokenResult;

/// Client attributes captured for audit purposes
#[derive(Debug, Clone, Default)]
pub struct ClientAttrs {
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Append-only token audit log
#[async_trait]
pub trait TokenAuditLog: Send + Sync {
    async fn append(&self, record: TokenAuditRecord) -> TokenResult<()>;

    /// Query records for a tenant, newest first, optionally for one token
    async fn query(
        &self,
        tenant_id: &TenantId,
        token_id: Option<&str>,
        limit: usize,
    ) -> TokenResult<Vec<TokenAuditRecord>>;
}

/// In-memory audit log for tests and local development
#[derive(Default)]
pub struct InMemoryTokenAuditLog {
    records: RwLock<Vec<TokenAuditRecord>>,
}

impl InMemoryTokenAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenAuditLog for InMemoryTokenAuditLog {
    async fn append(&self, record: TokenAuditRecord) -> TokenResult<()> {
        self.records.write().await.push(record);
        Ok(())
    }

    async fn query(
        &self,
        tenant_id: &TenantId,
        token_id: Option<&str>,
        limit: usize,
    ) -> TokenResult<Vec<TokenAuditRecord>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .rev()
            .filter(|r| r.tenant_id == *tenant_id)
            .filter(|r| token_id.map_or(true, |id| r.token_id == id))
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Build an audit record with the current timestamp
pub fn audit_record(
    token_id: &str,
    tenant_id: TenantId,
    action: TokenAuditAction,
    result: &str,
    error_message: Option<String>,
    attrs: &ClientAttrs,
) -> TokenAuditRecord {
    TokenAuditRecord {
        token_id: token_id.to_string(),
        tenant_id,
        action,
        result: result.to_string(),
        capability_checked: None,
        error_message,
        client_ip: attrs.client_ip.clone(),
        user_agent: attrs.user_agent.clone(),
        timestamp: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_query_is_tenant_scoped_and_newest_first() {
        let log = InMemoryTokenAuditLog::new();
        let t1 = TenantId::new();
        let t2 = TenantId::new();
        let attrs = ClientAttrs::default();

        log.append(audit_record("a", t1, TokenAuditAction::Issued, "success", None, &attrs))
            .await
            .unwrap();
        log.append(audit_record("b", t1, TokenAuditAction::Verified, "success", None, &attrs))
            .await
            .unwrap();
        log.append(audit_record("c", t2, TokenAuditAction::Issued, "success", None, &attrs))
            .await
            .unwrap();

        let records = log.query(&t1, None, 10).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].token_id, "b");

        let filtered = log.query(&t1, Some("a"), 10).await.unwrap();
        assert_eq!(filtered.len(), 1);
    }
}
