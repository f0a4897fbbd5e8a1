//! Capability token service
//!
//! Issues, verifies, refreshes and revokes EdDSA-signed capability tokens.
//! Verification consumes the token's jti through the replay guard, so a
//! token authorizes at most one execution.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use anumate_crypto::Keypair;
use anumate_types::{CapabilityClaims, IssuedToken, TenantId, TokenAuditAction, MAX_TOKEN_TTL_SECS};

use crate::{
    audit_record, ClientAttrs, ReplayGuard, TokenAuditLog, TokenError, TokenRecord, TokenResult,
    TokenStore,
};

/// Token service configuration
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// Issuer claim on every token
    pub issuer: String,
    /// Maximum TTL in seconds; clamped to the hard bound of 300
    pub max_ttl_secs: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            issuer: "anumate-captokens".to_string(),
            max_ttl_secs: MAX_TOKEN_TTL_SECS,
        }
    }
}

impl TokenConfig {
    /// The effective TTL ceiling, never above the hard bound
    pub fn effective_max_ttl(&self) -> u64 {
        self.max_ttl_secs.min(MAX_TOKEN_TTL_SECS)
    }
}

// Key material behind the hot-reload gate: the verification path takes the
// read side, rotation takes the write side.
struct KeyMaterial {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    public_key_hex: String,
}

impl KeyMaterial {
    fn from_keypair(keypair: &Keypair) -> TokenResult<Self> {
        let der = keypair
            .pkcs8_der()
            .map_err(|e| TokenError::Internal(e.to_string()))?;
        Ok(Self {
            encoding_key: EncodingKey::from_ed_der(&der),
            decoding_key: DecodingKey::from_ed_der(&keypair.public_key_bytes()),
            public_key_hex: keypair.public_key_hex(),
        })
    }
}

/// Capability token service
pub struct TokenService {
    config: TokenConfig,
    keys: parking_lot::RwLock<KeyMaterial>,
    replay_guard: Arc<dyn ReplayGuard>,
    store: Arc<dyn TokenStore>,
    audit: Arc<dyn TokenAuditLog>,
}

impl TokenService {
    /// Create a new token service.
    ///
    /// The replay guard handle is the swap point between the in-memory
    /// backend (tests) and the durable backend (production).
    pub fn new(
        config: TokenConfig,
        keypair: &Keypair,
        replay_guard: Arc<dyn ReplayGuard>,
        store: Arc<dyn TokenStore>,
        audit: Arc<dyn TokenAuditLog>,
    ) -> TokenResult<Self> {
        Ok(Self {
            config,
            keys: parking_lot::RwLock::new(KeyMaterial::from_keypair(keypair)?),
            replay_guard,
            store,
            audit,
        })
    }

    /// Hex-encoded public key used to verify tokens
    pub fn public_key_hex(&self) -> String {
        self.keys.read().public_key_hex.clone()
    }

    /// Hot-reload the signing key. Tokens issued under the previous key
    /// stop verifying; rotation is expected during idle windows.
    pub fn rotate_signing_key(&self, keypair: &Keypair) -> TokenResult<()> {
        let material = KeyMaterial::from_keypair(keypair)?;
        *self.keys.write() = material;
        tracing::info!("Capability signing key rotated");
        Ok(())
    }

    /// Issue a new capability token.
    ///
    /// Rejects `ttl_secs` above the configured ceiling (at most 300 seconds).
    pub async fn issue(
        &self,
        tenant_id: TenantId,
        subject: &str,
        capabilities: Vec<String>,
        ttl_secs: u64,
        created_by: Option<&str>,
    ) -> TokenResult<IssuedToken> {
        let max = self.config.effective_max_ttl();
        if ttl_secs == 0 || ttl_secs > max {
            return Err(TokenError::InvalidTtl {
                requested: ttl_secs,
                max,
            });
        }

        let now = Utc::now();
        let expires_at = now + chrono::Duration::seconds(ttl_secs as i64);
        let token_id = Uuid::new_v4().to_string();

        let claims = CapabilityClaims {
            jti: token_id.clone(),
            iss: self.config.issuer.clone(),
            sub: subject.to_string(),
            aud: CapabilityClaims::audience_for(&tenant_id),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            cap: capabilities.clone(),
            tid: tenant_id,
        };

        let token = self.encode(&claims)?;

        self.store
            .insert(TokenRecord {
                token_id: token_id.clone(),
                tenant_id,
                subject: subject.to_string(),
                capabilities: capabilities.clone(),
                issued_at: now,
                expires_at,
                revoked: false,
                revoked_at: None,
                created_by: created_by.map(|s| s.to_string()),
            })
            .await?;

        self.audit
            .append(audit_record(
                &token_id,
                tenant_id,
                TokenAuditAction::Issued,
                "success",
                None,
                &ClientAttrs::default(),
            ))
            .await?;

        tracing::info!(token_id = %token_id, subject = %subject, "Issued capability token");

        Ok(IssuedToken {
            token,
            token_id,
            subject: subject.to_string(),
            capabilities,
            tenant_id,
            issued_at: now,
            expires_at,
        })
    }

    /// Verify a token, consuming its jti in the replay guard.
    ///
    /// Validates the signature, expiry and audience, then checks revocation
    /// and records the jti. A second verification of the same jti fails with
    /// `ReplayDetected`.
    pub async fn verify(&self, token: &str, attrs: &ClientAttrs) -> TokenResult<CapabilityClaims> {
        let claims = match self.decode(token) {
            Ok(claims) => claims,
            Err(e) => {
                // Best effort: pull the jti out of the unverified payload for audit
                let (jti, tenant) = self.unverified_identity(token);
                if let Some(tenant) = tenant {
                    self.audit
                        .append(audit_record(
                            &jti,
                            tenant,
                            TokenAuditAction::Failed,
                            "invalid",
                            Some(e.to_string()),
                            attrs,
                        ))
                        .await?;
                }
                return Err(e);
            }
        };

        let record = self.store.get(&claims.tid, &claims.jti).await?;
        let revoked = match record {
            Some(r) => r.revoked,
            // A token we have no record of cannot be trusted
            None => true,
        };
        if revoked {
            self.audit
                .append(audit_record(
                    &claims.jti,
                    claims.tid,
                    TokenAuditAction::Failed,
                    "revoked",
                    None,
                    attrs,
                ))
                .await?;
            return Err(TokenError::Revoked);
        }

        let expires_at = chrono::DateTime::from_timestamp(claims.exp, 0)
            .ok_or_else(|| TokenError::Invalid("exp out of range".to_string()))?;
        if !self
            .replay_guard
            .insert_if_absent(&claims.jti, expires_at)
            .await?
        {
            self.audit
                .append(audit_record(
                    &claims.jti,
                    claims.tid,
                    TokenAuditAction::Failed,
                    "replay",
                    None,
                    attrs,
                ))
                .await?;
            return Err(TokenError::ReplayDetected {
                jti: claims.jti.clone(),
            });
        }

        self.audit
            .append(audit_record(
                &claims.jti,
                claims.tid,
                TokenAuditAction::Verified,
                "success",
                None,
                attrs,
            ))
            .await?;

        Ok(claims)
    }

    /// Verify a token and require a capability.
    pub async fn check_capability(
        &self,
        token: &str,
        required: &str,
        attrs: &ClientAttrs,
    ) -> TokenResult<CapabilityClaims> {
        let claims = self.verify(token, attrs).await?;
        let has = claims.has_capability(required);

        let mut record = audit_record(
            &claims.jti,
            claims.tid,
            TokenAuditAction::CapabilityCheck,
            if has { "success" } else { "insufficient_capability" },
            None,
            attrs,
        );
        record.capability_checked = Some(required.to_string());
        self.audit.append(record).await?;

        if !has {
            return Err(TokenError::MissingCapability {
                capability: required.to_string(),
            });
        }
        Ok(claims)
    }

    /// Rotate a token before expiry.
    ///
    /// The old jti is consumed in the replay guard and its record revoked;
    /// subject, capabilities and tenant carry over. When `new_ttl` is not
    /// supplied the default is the remaining lifetime capped at 60 seconds.
    pub async fn refresh(
        &self,
        token: &str,
        tenant_id: TenantId,
        new_ttl: Option<u64>,
    ) -> TokenResult<IssuedToken> {
        let claims = self.decode(token)?;
        if claims.tid != tenant_id {
            return Err(TokenError::TenantMismatch);
        }

        let record = self
            .store
            .get(&tenant_id, &claims.jti)
            .await?
            .ok_or_else(|| TokenError::NotFound {
                token_id: claims.jti.clone(),
            })?;
        if record.revoked {
            return Err(TokenError::Revoked);
        }

        let remaining = (claims.exp - Utc::now().timestamp()).max(1) as u64;
        let ttl = new_ttl.unwrap_or_else(|| remaining.min(60));
        let max = self.config.effective_max_ttl();
        if ttl > max {
            return Err(TokenError::InvalidTtl {
                requested: ttl,
                max,
            });
        }

        // Consume the old jti so it cannot be verified after rotation
        let old_expires = chrono::DateTime::from_timestamp(claims.exp, 0)
            .ok_or_else(|| TokenError::Invalid("exp out of range".to_string()))?;
        if !self
            .replay_guard
            .insert_if_absent(&claims.jti, old_expires)
            .await?
        {
            return Err(TokenError::ReplayDetected {
                jti: claims.jti.clone(),
            });
        }
        self.store.mark_revoked(&tenant_id, &claims.jti).await?;

        let new_token = self
            .issue(tenant_id, &claims.sub, claims.cap.clone(), ttl, Some("refresh"))
            .await?;

        self.audit
            .append(audit_record(
                &claims.jti,
                tenant_id,
                TokenAuditAction::Refreshed,
                "success",
                None,
                &ClientAttrs::default(),
            ))
            .await?;

        tracing::info!(
            old = %claims.jti,
            new = %new_token.token_id,
            "Refreshed capability token"
        );

        Ok(new_token)
    }

    /// Revoke a token by its ID. Idempotent: revoking an already revoked
    /// token succeeds without effect.
    pub async fn revoke(&self, tenant_id: TenantId, token_id: &str) -> TokenResult<()> {
        if self.store.get(&tenant_id, token_id).await?.is_none() {
            return Err(TokenError::NotFound {
                token_id: token_id.to_string(),
            });
        }
        self.store.mark_revoked(&tenant_id, token_id).await?;
        self.audit
            .append(audit_record(
                token_id,
                tenant_id,
                TokenAuditAction::Revoked,
                "success",
                None,
                &ClientAttrs::default(),
            ))
            .await?;
        Ok(())
    }

    /// Audit trail for a tenant, newest first
    pub async fn audit_trail(
        &self,
        tenant_id: TenantId,
        token_id: Option<&str>,
        limit: usize,
    ) -> TokenResult<Vec<anumate_types::TokenAuditRecord>> {
        self.audit.query(&tenant_id, token_id, limit).await
    }

    /// Mark all expired tokens revoked and purge stale replay entries.
    /// Returns the number of tokens cleaned up.
    pub async fn cleanup_expired(&self) -> TokenResult<usize> {
        let revoked = self.store.revoke_expired(Utc::now()).await?;
        for (tenant_id, token_id) in &revoked {
            self.audit
                .append(audit_record(
                    token_id,
                    *tenant_id,
                    TokenAuditAction::Expired,
                    "automatic_cleanup",
                    None,
                    &ClientAttrs::default(),
                ))
                .await?;
        }
        self.replay_guard.purge_expired().await?;
        if !revoked.is_empty() {
            tracing::info!(count = revoked.len(), "Cleaned up expired tokens");
        }
        Ok(revoked.len())
    }

    fn encode(&self, claims: &CapabilityClaims) -> TokenResult<String> {
        let keys = self.keys.read();
        encode(&Header::new(Algorithm::EdDSA), claims, &keys.encoding_key)
            .map_err(|e| TokenError::Internal(format!("failed to encode token: {e}")))
    }

    fn decode(&self, token: &str) -> TokenResult<CapabilityClaims> {
        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.leeway = 0;
        validation.validate_exp = true;
        // The audience varies per tenant; checked against the tid claim below
        validation.validate_aud = false;
        validation.set_issuer(&[&self.config.issuer]);

        let data = {
            let keys = self.keys.read();
            decode::<CapabilityClaims>(token, &keys.decoding_key, &validation)
        }
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Invalid(e.to_string()),
        })?;

        let claims = data.claims;
        if claims.aud != CapabilityClaims::audience_for(&claims.tid) {
            return Err(TokenError::Invalid("audience mismatch".to_string()));
        }
        Ok(claims)
    }

    // Decode without verification, for audit of rejected tokens only
    fn unverified_identity(&self, token: &str) -> (String, Option<TenantId>) {
        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let keys = self.keys.read();
        match decode::<CapabilityClaims>(token, &keys.decoding_key, &validation) {
            Ok(data) => (data.claims.jti, Some(data.claims.tid)),
            Err(_) => ("unknown".to_string(), None),
        }
    }
}

/// Background sweeper marking expired tokens revoked
pub struct TokenCleanupTask {
    service: Arc<TokenService>,
    interval: Duration,
}

impl TokenCleanupTask {
    pub fn new(service: Arc<TokenService>, interval: Duration) -> Self {
        Self { service, interval }
    }

    /// Spawn the sweeper loop
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = self.service.cleanup_expired().await {
                    tracing::warn!(error = %e, "Token cleanup failed");
                }
            }
        })
    }
}
