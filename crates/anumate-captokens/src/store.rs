//! Issued-token record store
//!
//! Tracks issued tokens per tenant so that revocation and expiry cleanup can
//! be enforced independently of the stateless JWT validation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use anumate_types::TenantId;

use crate::TokenResult;

/// A stored record of an issued token
#[derive(Debug, Clone)]
pub struct TokenRecord {
    pub token_id: String,
    pub tenant_id: TenantId,
    pub subject: String,
    pub capabilities: Vec<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
}

/// Durable store of issued token records
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert(&self, record: TokenRecord) -> TokenResult<()>;

    /// Fetch a record scoped to its tenant
    async fn get(&self, tenant_id: &TenantId, token_id: &str) -> TokenResult<Option<TokenRecord>>;

    /// Mark a token revoked. Returns `false` when it was already revoked.
    async fn mark_revoked(&self, tenant_id: &TenantId, token_id: &str) -> TokenResult<bool>;

    /// Mark all expired, unrevoked tokens revoked. Returns the token ids.
    async fn revoke_expired(&self, now: DateTime<Utc>) -> TokenResult<Vec<(TenantId, String)>>;
}

/// In-memory token store for tests and local development
#[derive(Default)]
pub struct InMemoryTokenStore {
    records: RwLock<HashMap<String, TokenRecord>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn insert(&self, record: TokenRecord) -> TokenResult<()> {
        self.records
            .write()
            .await
            .insert(record.token_id.clone(), record);
        Ok(())
    }

    async fn get(&self, tenant_id: &TenantId, token_id: &str) -> TokenResult<Option<TokenRecord>> {
        let records = self.records.read().await;
        Ok(records
            .get(token_id)
            .filter(|r| r.tenant_id == *tenant_id)
            .cloned())
    }

    async fn mark_revoked(&self, tenant_id: &TenantId, token_id: &str) -> TokenResult<bool> {
        let mut records = self.records.write().await;
        match records
            .get_mut(token_id)
            .filter(|r| r.tenant_id == *tenant_id)
        {
            Some(record) if !record.revoked => {
                record.revoked = true;
                record.revoked_at = Some(Utc::now());
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Ok(false),
        }
    }

    async fn revoke_expired(&self, now: DateTime<Utc>) -> TokenResult<Vec<(TenantId, String)>> {
        let mut records = self.records.write().await;
        let mut revoked = Vec::new();
        for record in records.values_mut() {
            if !record.revoked && record.expires_at < now {
                record.revoked = true;
                record.revoked_at = Some(now);
                revoked.push((record.tenant_id, record.token_id.clone()));
            }
        }
        Ok(revoked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(tenant: TenantId, id: &str, expires_in: i64) -> TokenRecord {
        TokenRecord {
            token_id: id.to_string(),
            tenant_id: tenant,
            subject: "svc".into(),
            capabilities: vec!["read".into()],
            issued_at: Utc::now(),
            expires_at: Utc::now() + Duration::seconds(expires_in),
            revoked: false,
            revoked_at: None,
            created_by: None,
        }
    }

    #[tokio::test]
    async fn test_tenant_scoping() {
        let store = InMemoryTokenStore::new();
        let t1 = TenantId::new();
        let t2 = TenantId::new();
        store.insert(record(t1, "tok-1", 60)).await.unwrap();

        assert!(store.get(&t1, "tok-1").await.unwrap().is_some());
        assert!(store.get(&t2, "tok-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_revoked_is_idempotent() {
        let store = InMemoryTokenStore::new();
        let tenant = TenantId::new();
        store.insert(record(tenant, "tok-1", 60)).await.unwrap();

        assert!(store.mark_revoked(&tenant, "tok-1").await.unwrap());
        assert!(!store.mark_revoked(&tenant, "tok-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_expired() {
        let store = InMemoryTokenStore::new();
        let tenant = TenantId::new();
        store.insert(record(tenant, "live", 300)).await.unwrap();
        store.insert(record(tenant, "stale", -5)).await.unwrap();

        let revoked = store.revoke_expired(Utc::now()).await.unwrap();
        assert_eq!(revoked.len(), 1);
        assert_eq!(revoked[0].1, "stale");
    }
}
