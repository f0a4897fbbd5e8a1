//! Replay guard backends
//!
//! The guard provides one atomic operation: `insert_if_absent(jti, exp)`.
//! The first verification of a jti inserts it and succeeds; every later
//! insert of the same jti fails until the entry expires.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::TokenResult;

/// Atomic jti consumption store
#[async_trait]
pub trait ReplayGuard: Send + Sync {
    /// Insert the jti if absent. Returns `true` when this call inserted it,
    /// `false` when the jti was already present (replay).
    async fn insert_if_absent(&self, jti: &str, expires_at: DateTime<Utc>) -> TokenResult<bool>;

    /// Drop entries whose expiry has passed. Returns the number removed.
    async fn purge_expired(&self) -> TokenResult<usize>;
}

/// In-memory replay guard.
///
/// Permitted only in tests and local development; it does not survive
/// restarts. Production deployments use the Postgres-backed guard from
/// `anumate-db`, wired in at `TokenService::new`.
#[derive(Default)]
pub struct InMemoryReplayGuard {
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl InMemoryReplayGuard {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReplayGuard for InMemoryReplayGuard {
    async fn insert_if_absent(&self, jti: &str, expires_at: DateTime<Utc>) -> TokenResult<bool> {
        let mut entries = self.entries.lock().await;
        let now = Utc::now();
        // An expired entry no longer blocks the jti
        if let Some(existing) = entries.get(jti) {
            if *existing > now {
                return Ok(false);
            }
        }
        entries.insert(jti.to_string(), expires_at);
        Ok(true)
    }

    async fn purge_expired(&self) -> TokenResult<usize> {
        let mut entries = self.entries.lock().await;
        let now = Utc::now();
        let before = entries.len();
        entries.retain(|_, exp| *exp > now);
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_first_insert_succeeds_second_fails() {
        let guard = InMemoryReplayGuard::new();
        let exp = Utc::now() + Duration::seconds(60);

        assert!(guard.insert_if_absent("jti-1", exp).await.unwrap());
        assert!(!guard.insert_if_absent("jti-1", exp).await.unwrap());
    }

    #[tokio::test]
    async fn test_distinct_jtis_are_independent() {
        let guard = InMemoryReplayGuard::new();
        let exp = Utc::now() + Duration::seconds(60);

        assert!(guard.insert_if_absent("jti-a", exp).await.unwrap());
        assert!(guard.insert_if_absent("jti-b", exp).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_entry_is_reusable() {
        let guard = InMemoryReplayGuard::new();
        let past = Utc::now() - Duration::seconds(1);

        assert!(guard.insert_if_absent("jti-x", past).await.unwrap());
        // Entry expired, so the jti may be consumed again
        let future = Utc::now() + Duration::seconds(60);
        assert!(guard.insert_if_absent("jti-x", future).await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let guard = InMemoryReplayGuard::new();
        guard
            .insert_if_absent("old", Utc::now() - Duration::seconds(5))
            .await
            .unwrap();
        guard
            .insert_if_absent("live", Utc::now() + Duration::seconds(60))
            .await
            .unwrap();

        assert_eq!(guard.purge_expired().await.unwrap(), 1);
        assert_eq!(guard.purge_expired().await.unwrap(), 0);
    }
}
