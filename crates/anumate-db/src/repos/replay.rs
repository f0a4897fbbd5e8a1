//! Durable replay guard
//!
//! The production backend for jti consumption. `INSERT ... ON CONFLICT DO
//! NOTHING` gives the atomic insert-if-absent; expired rows are cleared
//! before the attempt so a jti becomes reusable only after its expiry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use anumate_captokens::{ReplayGuard, TokenError, TokenResult};

/// Postgres-backed replay guard
pub struct PgReplayGuard {
    pool: PgPool,
}

impl PgReplayGuard {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReplayGuard for PgReplayGuard {
    async fn insert_if_absent(&self, jti: &str, expires_at: DateTime<Utc>) -> TokenResult<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| TokenError::Store(e.to_string()))?;

        sqlx::query("DELETE FROM replay_guard WHERE jti = $1 AND expires_at <= now()")
            .bind(jti)
            .execute(&mut *tx)
            .await
            .map_err(|e| TokenError::Store(e.to_string()))?;

        let result = sqlx::query(
            "INSERT INTO replay_guard (jti, expires_at) VALUES ($1, $2) ON CONFLICT (jti) DO NOTHING",
        )
        .bind(jti)
        .bind(expires_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| TokenError::Store(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| TokenError::Store(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn purge_expired(&self) -> TokenResult<usize> {
        let result = sqlx::query("DELETE FROM replay_guard WHERE expires_at <= now()")
            .execute(&self.pool)
            .await
            .map_err(|e| TokenError::Store(e.to_string()))?;
        Ok(result.rows_affected() as usize)
    }
}
