//! WORM export sinks
//!
//! Write-once-read-many storage for compliance export. The sink returns a
//! URI; re-fetching it must yield exactly the bytes written.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use anumate_types::{ReceiptId, TenantId};

use crate::{ReceiptError, ReceiptResult};

/// Append-only export sink
#[async_trait]
pub trait WormSink: Send + Sync {
    /// Write the serialized receipt, returning its URI. Writing the same
    /// receipt twice fails: the store is write-once.
    async fn put(
        &self,
        tenant_id: &TenantId,
        receipt_id: &ReceiptId,
        content: &[u8],
    ) -> ReceiptResult<String>;

    /// Fetch previously written content by URI
    async fn fetch(&self, worm_uri: &str) -> ReceiptResult<Vec<u8>>;
}

/// In-memory WORM sink for tests and local development
#[derive(Default)]
pub struct InMemoryWormSink {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryWormSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn uri(tenant_id: &TenantId, receipt_id: &ReceiptId) -> String {
        format!("worm://{tenant_id}/{receipt_id}")
    }
}

#[async_trait]
impl WormSink for InMemoryWormSink {
    async fn put(
        &self,
        tenant_id: &TenantId,
        receipt_id: &ReceiptId,
        content: &[u8],
    ) -> ReceiptResult<String> {
        let uri = Self::uri(tenant_id, receipt_id);
        let mut objects = self.objects.write().await;
        if objects.contains_key(&uri) {
            return Err(ReceiptError::Worm(format!("object {uri} already written")));
        }
        objects.insert(uri.clone(), content.to_vec());
        Ok(uri)
    }

    async fn fetch(&self, worm_uri: &str) -> ReceiptResult<Vec<u8>> {
        let objects = self.objects.read().await;
        objects
            .get(worm_uri)
            .cloned()
            .ok_or_else(|| ReceiptError::Worm(format!("object {worm_uri} not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_fetch_roundtrip() {
        let sink = InMemoryWormSink::new();
        let tenant = TenantId::new();
        let receipt = ReceiptId::new();

        let uri = sink.put(&tenant, &receipt, b"payload").await.unwrap();
        assert_eq!(sink.fetch(&uri).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_write_once() {
        let sink = InMemoryWormSink::new();
        let tenant = TenantId::new();
        let receipt = ReceiptId::new();

        sink.put(&tenant, &receipt, b"first").await.unwrap();
        assert!(sink.put(&tenant, &receipt, b"second").await.is_err());
    }
}
