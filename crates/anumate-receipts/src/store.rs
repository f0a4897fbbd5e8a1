//! Receipt persistence
//!
//! The chain head is writable only under compare-and-set: concurrent
//! appenders see either success or a conflict, never silent interleaving.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use anumate_types::{Receipt, ReceiptId, TenantId};

use crate::ReceiptResult;

/// Durable receipt store
#[async_trait]
pub trait ReceiptStore: Send + Sync {
    async fn insert(&self, receipt: Receipt) -> ReceiptResult<()>;

    async fn get(&self, tenant_id: &TenantId, receipt_id: &ReceiptId)
        -> ReceiptResult<Option<Receipt>>;

    /// List receipts for a tenant, newest first
    async fn list(
        &self,
        tenant_id: &TenantId,
        limit: usize,
        offset: usize,
    ) -> ReceiptResult<Vec<Receipt>>;

    /// Current chain head (content hash of the latest receipt)
    async fn chain_head(&self, tenant_id: &TenantId) -> ReceiptResult<Option<String>>;

    /// Atomically advance the chain head from `expected` to `new_head`.
    /// Returns `false` when the head no longer matches `expected`.
    async fn compare_and_set_head(
        &self,
        tenant_id: &TenantId,
        expected: Option<&str>,
        new_head: &str,
    ) -> ReceiptResult<bool>;

    /// Set the WORM URI on a stored receipt
    async fn set_worm_uri(
        &self,
        tenant_id: &TenantId,
        receipt_id: &ReceiptId,
        worm_uri: &str,
    ) -> ReceiptResult<()>;
}

/// In-memory receipt store for tests and local development
#[derive(Default)]
pub struct InMemoryReceiptStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    receipts: HashMap<(TenantId, ReceiptId), Receipt>,
    order: Vec<(TenantId, ReceiptId)>,
    heads: HashMap<TenantId, String>,
}

impl InMemoryReceiptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReceiptStore for InMemoryReceiptStore {
    async fn insert(&self, receipt: Receipt) -> ReceiptResult<()> {
        let mut inner = self.inner.lock().await;
        let key = (receipt.tenant_id, receipt.receipt_id);
        inner.order.push(key);
        inner.receipts.insert(key, receipt);
        Ok(())
    }

    async fn get(
        &self,
        tenant_id: &TenantId,
        receipt_id: &ReceiptId,
    ) -> ReceiptResult<Option<Receipt>> {
        let inner = self.inner.lock().await;
        Ok(inner.receipts.get(&(*tenant_id, *receipt_id)).cloned())
    }

    async fn list(
        &self,
        tenant_id: &TenantId,
        limit: usize,
        offset: usize,
    ) -> ReceiptResult<Vec<Receipt>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .order
            .iter()
            .rev()
            .filter(|(t, _)| t == tenant_id)
            .skip(offset)
            .take(limit)
            .filter_map(|key| inner.receipts.get(key).cloned())
            .collect())
    }

    async fn chain_head(&self, tenant_id: &TenantId) -> ReceiptResult<Option<String>> {
        let inner = self.inner.lock().await;
        Ok(inner.heads.get(tenant_id).cloned())
    }

    async fn compare_and_set_head(
        &self,
        tenant_id: &TenantId,
        expected: Option<&str>,
        new_head: &str,
    ) -> ReceiptResult<bool> {
        let mut inner = self.inner.lock().await;
        let current = inner.heads.get(tenant_id).map(|s| s.as_str());
        if current != expected {
            return Ok(false);
        }
        inner.heads.insert(*tenant_id, new_head.to_string());
        Ok(true)
    }

    async fn set_worm_uri(
        &self,
        tenant_id: &TenantId,
        receipt_id: &ReceiptId,
        worm_uri: &str,
    ) -> ReceiptResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(receipt) = inner.receipts.get_mut(&(*tenant_id, *receipt_id)) {
            receipt.worm_uri = Some(worm_uri.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cas_head() {
        let store = InMemoryReceiptStore::new();
        let tenant = TenantId::new();

        assert!(store
            .compare_and_set_head(&tenant, None, "h1")
            .await
            .unwrap());
        // Stale expectation fails
        assert!(!store
            .compare_and_set_head(&tenant, None, "h2")
            .await
            .unwrap());
        assert!(store
            .compare_and_set_head(&tenant, Some("h1"), "h2")
            .await
            .unwrap());
        assert_eq!(store.chain_head(&tenant).await.unwrap().unwrap(), "h2");
    }

    #[tokio::test]
    async fn test_heads_are_per_tenant() {
        let store = InMemoryReceiptStore::new();
        let t1 = TenantId::new();
        let t2 = TenantId::new();

        store.compare_and_set_head(&t1, None, "h1").await.unwrap();
        assert!(store.chain_head(&t2).await.unwrap().is_none());
    }
}
