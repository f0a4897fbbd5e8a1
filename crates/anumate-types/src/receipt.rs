//! Receipt types
//!
//! Receipts are immutable, signed, optionally chained records of execution
//! outcomes. The content hash covers the canonical payload; the signature
//! covers the content hash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ReceiptId, RunId, RunStatus, TenantId};

/// The payload assembled when an execution completes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptPayload {
    pub run_id: RunId,
    /// Exact hash of the plan that was executed; the preview→execute contract
    pub plan_hash: String,
    pub tenant_id: TenantId,
    /// Terminal run status
    pub status: RunStatus,
    /// SHA-256 over the canonical per-step results, hex encoded
    pub results_digest: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// jti of the capability token used for tool calls
    pub capability_token_jti: Option<String>,
}

/// A signed execution receipt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub receipt_id: ReceiptId,
    pub tenant_id: TenantId,
    pub payload: ReceiptPayload,
    /// SHA-256 of the canonical payload, hex encoded
    pub content_hash: String,
    /// Ed25519 signature over the content hash, hex encoded
    pub signature: String,
    /// Public key of the signer, hex encoded
    pub signer_public_key: String,
    /// Hash of the previous receipt in this tenant's chain
    pub prior_receipt_hash: Option<String>,
    /// URI of the WORM export, when exported
    pub worm_uri: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Earliest date the receipt may be purged, per retention policy
    pub retention_until: Option<DateTime<Utc>>,
}

/// Outcome of verifying a receipt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptVerification {
    pub valid: bool,
    pub receipt_id: ReceiptId,
    /// Explanation when invalid
    pub reason: Option<String>,
}

impl ReceiptVerification {
    pub fn valid(receipt_id: ReceiptId) -> Self {
        Self {
            valid: true,
            receipt_id,
            reason: None,
        }
    }

    pub fn invalid(receipt_id: ReceiptId, reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            receipt_id,
            reason: Some(reason.into()),
        }
    }
}

/// Auditable receipt lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptAuditEntry {
    pub receipt_id: Option<ReceiptId>,
    pub tenant_id: TenantId,
    /// `created`, `verified`, `exported`, or a `*_failed` variant
    pub event: String,
    pub success: bool,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}
