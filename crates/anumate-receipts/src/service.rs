//! Receipt service
//!
//! Creation, verification, chain maintenance and audit export.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::RwLock;

use anumate_crypto::{canonical_bytes, sha256_hex, verify_signature, Keypair};
use anumate_types::{
    Receipt, ReceiptAuditEntry, ReceiptId, ReceiptPayload, ReceiptVerification, TenantId,
};

use crate::{ReceiptError, ReceiptResult, ReceiptStore, WormSink};

/// How many CAS attempts before giving up on the chain head
const CHAIN_CAS_ATTEMPTS: usize = 8;

/// Receipt service configuration
#[derive(Debug, Clone)]
pub struct ReceiptConfig {
    /// Retention period applied to new receipts, in days
    pub retention_days: Option<i64>,
    /// Export every receipt to the WORM sink on creation
    pub export_to_worm: bool,
}

impl Default for ReceiptConfig {
    fn default() -> Self {
        Self {
            retention_days: Some(365),
            export_to_worm: false,
        }
    }
}

/// The receipt service
pub struct ReceiptService {
    config: ReceiptConfig,
    keypair: Arc<Keypair>,
    store: Arc<dyn ReceiptStore>,
    worm: Option<Arc<dyn WormSink>>,
    audit: RwLock<Vec<ReceiptAuditEntry>>,
}

impl ReceiptService {
    pub fn new(
        config: ReceiptConfig,
        keypair: Arc<Keypair>,
        store: Arc<dyn ReceiptStore>,
        worm: Option<Arc<dyn WormSink>>,
    ) -> Self {
        Self {
            config,
            keypair,
            store,
            worm,
            audit: RwLock::new(Vec::new()),
        }
    }

    /// Public key receipts are verifiable against
    pub fn public_key_hex(&self) -> String {
        self.keypair.public_key_hex()
    }

    /// Create a signed, chained receipt from an execution payload.
    pub async fn create(&self, payload: ReceiptPayload) -> ReceiptResult<Receipt> {
        let tenant_id = payload.tenant_id;

        let bytes = canonical_bytes(&payload)
            .map_err(|e| ReceiptError::SigningFailed(e.to_string()))?;
        let content_hash = sha256_hex(&bytes);
        let signature = anumate_crypto::sign(&self.keypair, content_hash.as_bytes());

        // Link the per-tenant chain under compare-and-set; contenders retry
        // against the fresh head
        let mut prior = self.store.chain_head(&tenant_id).await?;
        let mut linked = false;
        for _ in 0..CHAIN_CAS_ATTEMPTS {
            if self
                .store
                .compare_and_set_head(&tenant_id, prior.as_deref(), &content_hash)
                .await?
            {
                linked = true;
                break;
            }
            prior = self.store.chain_head(&tenant_id).await?;
        }
        if !linked {
            self.append_audit(None, tenant_id, "create_failed", false, Some("chain contention"))
                .await;
            return Err(ReceiptError::ChainContention);
        }

        let receipt = Receipt {
            receipt_id: ReceiptId::new(),
            tenant_id,
            payload,
            content_hash: content_hash.clone(),
            signature,
            signer_public_key: self.keypair.public_key_hex(),
            prior_receipt_hash: prior,
            worm_uri: None,
            created_at: Utc::now(),
            retention_until: self
                .config
                .retention_days
                .map(|days| Utc::now() + Duration::days(days)),
        };

        self.store.insert(receipt.clone()).await?;
        self.append_audit(Some(receipt.receipt_id), tenant_id, "created", true, None)
            .await;

        tracing::info!(
            receipt_id = %receipt.receipt_id,
            content_hash = %content_hash,
            "Receipt created"
        );

        if self.config.export_to_worm {
            return self.export(&tenant_id, &receipt.receipt_id).await;
        }
        Ok(receipt)
    }

    /// Fetch a receipt, tenant-scoped
    pub async fn get(
        &self,
        tenant_id: &TenantId,
        receipt_id: &ReceiptId,
    ) -> ReceiptResult<Receipt> {
        self.store
            .get(tenant_id, receipt_id)
            .await?
            .ok_or_else(|| ReceiptError::NotFound {
                receipt_id: receipt_id.to_string(),
            })
    }

    /// Verify a receipt: recompute the canonical hash, check the signature,
    /// and when a WORM copy exists compare it byte for byte.
    pub async fn verify(
        &self,
        tenant_id: &TenantId,
        receipt_id: &ReceiptId,
    ) -> ReceiptResult<ReceiptVerification> {
        let receipt = self.get(tenant_id, receipt_id).await?;
        let verification = self.verify_receipt(&receipt).await;
        self.append_audit(
            Some(receipt.receipt_id),
            *tenant_id,
            "verified",
            verification.valid,
            verification.reason.clone().as_deref(),
        )
        .await;
        Ok(verification)
    }

    async fn verify_receipt(&self, receipt: &Receipt) -> ReceiptVerification {
        let bytes = match canonical_bytes(&receipt.payload) {
            Ok(b) => b,
            Err(e) => {
                return ReceiptVerification::invalid(
                    receipt.receipt_id,
                    format!("payload not canonicalizable: {e}"),
                )
            }
        };
        let recomputed = sha256_hex(&bytes);
        if recomputed != receipt.content_hash {
            return ReceiptVerification::invalid(
                receipt.receipt_id,
                format!(
                    "content hash mismatch: expected {}, got {recomputed}",
                    receipt.content_hash
                ),
            );
        }

        if verify_signature(
            &receipt.signer_public_key,
            receipt.content_hash.as_bytes(),
            &receipt.signature,
        )
        .is_err()
        {
            return ReceiptVerification::invalid(receipt.receipt_id, "signature invalid");
        }

        if let (Some(uri), Some(worm)) = (&receipt.worm_uri, &self.worm) {
            match worm.fetch(uri).await {
                Ok(stored) => {
                    let serialized = serde_json::to_vec(&receipt_without_worm(receipt))
                        .unwrap_or_default();
                    if stored != serialized {
                        return ReceiptVerification::invalid(
                            receipt.receipt_id,
                            "WORM copy differs from stored receipt",
                        );
                    }
                }
                Err(e) => {
                    return ReceiptVerification::invalid(
                        receipt.receipt_id,
                        format!("WORM fetch failed: {e}"),
                    )
                }
            }
        }

        ReceiptVerification::valid(receipt.receipt_id)
    }

    /// Export a receipt to the WORM sink, recording the URI
    pub async fn export(
        &self,
        tenant_id: &TenantId,
        receipt_id: &ReceiptId,
    ) -> ReceiptResult<Receipt> {
        let worm = self
            .worm
            .as_ref()
            .ok_or_else(|| ReceiptError::Worm("no WORM sink configured".to_string()))?;
        let mut receipt = self.get(tenant_id, receipt_id).await?;
        if receipt.worm_uri.is_some() {
            return Ok(receipt);
        }

        let serialized = serde_json::to_vec(&receipt)
            .map_err(|e| ReceiptError::Internal(e.to_string()))?;
        let uri = worm.put(tenant_id, receipt_id, &serialized).await?;
        self.store.set_worm_uri(tenant_id, receipt_id, &uri).await?;
        receipt.worm_uri = Some(uri);

        self.append_audit(Some(*receipt_id), *tenant_id, "exported", true, None)
            .await;
        Ok(receipt)
    }

    /// List receipts for a tenant, newest first
    pub async fn list(
        &self,
        tenant_id: &TenantId,
        limit: usize,
        offset: usize,
    ) -> ReceiptResult<Vec<Receipt>> {
        self.store.list(tenant_id, limit, offset).await
    }

    /// Walk the tenant's chain from the head back, checking linkage
    pub async fn verify_chain(&self, tenant_id: &TenantId) -> ReceiptResult<bool> {
        let receipts = self.store.list(tenant_id, usize::MAX, 0).await?;
        let Some(head) = self.store.chain_head(tenant_id).await? else {
            return Ok(receipts.is_empty());
        };

        let mut expected = Some(head);
        for receipt in &receipts {
            match expected {
                Some(ref hash) if *hash == receipt.content_hash => {
                    expected = receipt.prior_receipt_hash.clone();
                }
                _ => return Ok(false),
            }
        }
        Ok(expected.is_none())
    }

    /// Audit log export with pagination, newest first
    pub async fn audit_log(
        &self,
        tenant_id: &TenantId,
        limit: usize,
        offset: usize,
    ) -> Vec<ReceiptAuditEntry> {
        let audit = self.audit.read().await;
        audit
            .iter()
            .rev()
            .filter(|e| e.tenant_id == *tenant_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    async fn append_audit(
        &self,
        receipt_id: Option<ReceiptId>,
        tenant_id: TenantId,
        event: &str,
        success: bool,
        detail: Option<&str>,
    ) {
        self.audit.write().await.push(ReceiptAuditEntry {
            receipt_id,
            tenant_id,
            event: event.to_string(),
            success,
            detail: detail.map(|d| d.to_string()),
            timestamp: Utc::now(),
        });
    }
}

// The WORM copy is written before the URI lands on the record, so strip it
// when comparing
fn receipt_without_worm(receipt: &Receipt) -> Receipt {
    Receipt {
        worm_uri: None,
        ..receipt.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryReceiptStore, InMemoryWormSink};
    use anumate_types::{RunId, RunStatus};

    fn payload(tenant: TenantId) -> ReceiptPayload {
        ReceiptPayload {
            run_id: RunId::new(),
            plan_hash: "abc123".to_string(),
            tenant_id: tenant,
            status: RunStatus::Succeeded,
            results_digest: "d".repeat(64),
            started_at: Utc::now(),
            completed_at: Utc::now(),
            capability_token_jti: Some("jti-1".to_string()),
        }
    }

    fn service() -> ReceiptService {
        ReceiptService::new(
            ReceiptConfig::default(),
            Arc::new(Keypair::generate()),
            Arc::new(InMemoryReceiptStore::new()),
            Some(Arc::new(InMemoryWormSink::new())),
        )
    }

    #[tokio::test]
    async fn test_create_and_verify() {
        let svc = service();
        let tenant = TenantId::new();
        let receipt = svc.create(payload(tenant)).await.unwrap();

        assert_eq!(receipt.content_hash.len(), 64);
        assert!(receipt.prior_receipt_hash.is_none());

        let verification = svc.verify(&tenant, &receipt.receipt_id).await.unwrap();
        assert!(verification.valid, "reason: {:?}", verification.reason);
    }

    #[tokio::test]
    async fn test_tampered_payload_fails_verification() {
        let keypair = Arc::new(Keypair::generate());
        let store = Arc::new(InMemoryReceiptStore::new());
        let svc = ReceiptService::new(
            ReceiptConfig::default(),
            Arc::clone(&keypair),
            Arc::clone(&store) as Arc<dyn ReceiptStore>,
            None,
        );
        let tenant = TenantId::new();
        let receipt = svc.create(payload(tenant)).await.unwrap();

        // Flip a field behind the service's back
        let mut tampered = receipt.clone();
        tampered.payload.plan_hash = "evil".to_string();
        store.insert(tampered).await.unwrap();

        let verification = svc.verify(&tenant, &receipt.receipt_id).await.unwrap();
        assert!(!verification.valid);
        assert!(verification.reason.unwrap().contains("hash mismatch"));
    }

    #[tokio::test]
    async fn test_chain_links_receipts() {
        let svc = service();
        let tenant = TenantId::new();

        let first = svc.create(payload(tenant)).await.unwrap();
        let second = svc.create(payload(tenant)).await.unwrap();

        assert_eq!(
            second.prior_receipt_hash.as_deref(),
            Some(first.content_hash.as_str())
        );
        assert!(svc.verify_chain(&tenant).await.unwrap());
    }

    #[tokio::test]
    async fn test_chains_are_per_tenant() {
        let svc = service();
        let t1 = TenantId::new();
        let t2 = TenantId::new();

        svc.create(payload(t1)).await.unwrap();
        let other = svc.create(payload(t2)).await.unwrap();
        assert!(other.prior_receipt_hash.is_none());
    }

    #[tokio::test]
    async fn test_worm_export_roundtrip() {
        let svc = service();
        let tenant = TenantId::new();
        let receipt = svc.create(payload(tenant)).await.unwrap();

        let exported = svc.export(&tenant, &receipt.receipt_id).await.unwrap();
        let uri = exported.worm_uri.clone().unwrap();
        assert!(uri.starts_with("worm://"));

        // Export is idempotent
        let again = svc.export(&tenant, &receipt.receipt_id).await.unwrap();
        assert_eq!(again.worm_uri.unwrap(), uri);

        let verification = svc.verify(&tenant, &receipt.receipt_id).await.unwrap();
        assert!(verification.valid, "reason: {:?}", verification.reason);
    }

    #[tokio::test]
    async fn test_unknown_receipt_not_found() {
        let svc = service();
        let err = svc
            .verify(&TenantId::new(), &ReceiptId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ReceiptError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_audit_log_records_events() {
        let svc = service();
        let tenant = TenantId::new();
        let receipt = svc.create(payload(tenant)).await.unwrap();
        svc.verify(&tenant, &receipt.receipt_id).await.unwrap();

        let log = svc.audit_log(&tenant, 10, 0).await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].event, "verified");
        assert_eq!(log[1].event, "created");
    }

    #[tokio::test]
    async fn test_retention_applied() {
        let svc = service();
        let receipt = svc.create(payload(TenantId::new())).await.unwrap();
        assert!(receipt.retention_until.is_some());
    }
}
