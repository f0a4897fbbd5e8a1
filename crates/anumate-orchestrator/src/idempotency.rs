//! Idempotency records
//!
//! A client-supplied key deduplicates retries of the same logical request.
//! The record is reserved atomically before any work starts; the same key
//! with the same fingerprint returns the cached response, the same key with
//! a different fingerprint is a conflict.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::Mutex;

use anumate_types::{RunId, TenantId};

use crate::{OrchestratorError, OrchestratorResult};

/// Status of an idempotency record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyStatus {
    /// Reserved; the original request is still executing
    InFlight,
    /// Finished; `cached_response` holds the result
    Completed,
}

/// A stored idempotency record
#[derive(Debug, Clone)]
pub struct IdempotencyRecord {
    pub key: String,
    pub tenant_id: TenantId,
    pub request_fingerprint: String,
    pub run_id: RunId,
    pub status: IdempotencyStatus,
    pub cached_response: Option<serde_json::Value>,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of attempting to reserve a key
#[derive(Debug, Clone)]
pub enum Reservation {
    /// This call reserved the key; proceed with the work
    Reserved,
    /// The key exists; the caller must compare fingerprints
    Existing(IdempotencyRecord),
}

/// Atomic idempotency record store
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Reserve `key` for a new run. Atomic: concurrent contenders see
    /// either `Reserved` (exactly one) or `Existing`.
    async fn reserve(
        &self,
        tenant_id: &TenantId,
        key: &str,
        fingerprint: &str,
        run_id: RunId,
        expires_at: DateTime<Utc>,
    ) -> OrchestratorResult<Reservation>;

    /// Finalize a reserved record with the cached response
    async fn finalize(
        &self,
        tenant_id: &TenantId,
        key: &str,
        response: serde_json::Value,
    ) -> OrchestratorResult<()>;

    /// Drop a reservation without caching (the run never reached a
    /// cacheable outcome, e.g. rejected before start)
    async fn release(&self, tenant_id: &TenantId, key: &str) -> OrchestratorResult<()>;
}

/// Compute the request fingerprint over the canonical normalized request
pub fn request_fingerprint<T: Serialize>(normalized: &T) -> OrchestratorResult<String> {
    anumate_crypto::hash_canonical(normalized)
        .map_err(|e| OrchestratorError::Internal(format!("fingerprint failed: {e}")))
}

/// In-memory idempotency store for tests and local development
#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    records: Mutex<HashMap<(TenantId, String), IdempotencyRecord>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn reserve(
        &self,
        tenant_id: &TenantId,
        key: &str,
        fingerprint: &str,
        run_id: RunId,
        expires_at: DateTime<Utc>,
    ) -> OrchestratorResult<Reservation> {
        let mut records = self.records.lock().await;
        let map_key = (*tenant_id, key.to_string());
        let now = Utc::now();

        if let Some(existing) = records.get(&map_key) {
            if existing.expires_at > now {
                return Ok(Reservation::Existing(existing.clone()));
            }
        }

        records.insert(
            map_key,
            IdempotencyRecord {
                key: key.to_string(),
                tenant_id: *tenant_id,
                request_fingerprint: fingerprint.to_string(),
                run_id,
                status: IdempotencyStatus::InFlight,
                cached_response: None,
                expires_at,
            },
        );
        Ok(Reservation::Reserved)
    }

    async fn finalize(
        &self,
        tenant_id: &TenantId,
        key: &str,
        response: serde_json::Value,
    ) -> OrchestratorResult<()> {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(&(*tenant_id, key.to_string())) {
            record.status = IdempotencyStatus::Completed;
            record.cached_response = Some(response);
        }
        Ok(())
    }

    async fn release(&self, tenant_id: &TenantId, key: &str) -> OrchestratorResult<()> {
        let mut records = self.records.lock().await;
        records.remove(&(*tenant_id, key.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_reserve_then_existing() {
        let store = InMemoryIdempotencyStore::new();
        let tenant = TenantId::new();
        let run = RunId::new();
        let exp = Utc::now() + Duration::hours(24);

        let first = store.reserve(&tenant, "k-1", "fp", run, exp).await.unwrap();
        assert!(matches!(first, Reservation::Reserved));

        let second = store.reserve(&tenant, "k-1", "fp", run, exp).await.unwrap();
        match second {
            Reservation::Existing(record) => {
                assert_eq!(record.run_id, run);
                assert_eq!(record.status, IdempotencyStatus::InFlight);
            }
            _ => panic!("expected existing record"),
        }
    }

    #[tokio::test]
    async fn test_finalize_caches_response() {
        let store = InMemoryIdempotencyStore::new();
        let tenant = TenantId::new();
        let exp = Utc::now() + Duration::hours(24);
        store
            .reserve(&tenant, "k-1", "fp", RunId::new(), exp)
            .await
            .unwrap();
        store
            .finalize(&tenant, "k-1", serde_json::json!({"run_id": "r"}))
            .await
            .unwrap();

        match store
            .reserve(&tenant, "k-1", "fp", RunId::new(), exp)
            .await
            .unwrap()
        {
            Reservation::Existing(record) => {
                assert_eq!(record.status, IdempotencyStatus::Completed);
                assert!(record.cached_response.is_some());
            }
            _ => panic!("expected existing record"),
        }
    }

    #[tokio::test]
    async fn test_expired_record_is_replaced() {
        let store = InMemoryIdempotencyStore::new();
        let tenant = TenantId::new();
        let past = Utc::now() - Duration::hours(1);
        store
            .reserve(&tenant, "k-1", "fp", RunId::new(), past)
            .await
            .unwrap();

        let again = store
            .reserve(
                &tenant,
                "k-1",
                "fp2",
                RunId::new(),
                Utc::now() + Duration::hours(24),
            )
            .await
            .unwrap();
        assert!(matches!(again, Reservation::Reserved));
    }

    #[tokio::test]
    async fn test_keys_are_tenant_scoped() {
        let store = InMemoryIdempotencyStore::new();
        let exp = Utc::now() + Duration::hours(24);
        store
            .reserve(&TenantId::new(), "k-1", "fp", RunId::new(), exp)
            .await
            .unwrap();

        let other = store
            .reserve(&TenantId::new(), "k-1", "fp", RunId::new(), exp)
            .await
            .unwrap();
        assert!(matches!(other, Reservation::Reserved));
    }

    #[test]
    fn test_fingerprint_ignores_field_order() {
        #[derive(Serialize)]
        struct A {
            x: u32,
            y: u32,
        }
        #[derive(Serialize)]
        struct B {
            y: u32,
            x: u32,
        }
        let a = request_fingerprint(&A { x: 1, y: 2 }).unwrap();
        let b = request_fingerprint(&B { y: 2, x: 1 }).unwrap();
        assert_eq!(a, b);
    }
}
