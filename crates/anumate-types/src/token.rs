//! Capability token types
//!
//! Capability tokens are short-lived EdDSA-signed JWTs binding a subject and
//! a capability list to a tenant for at most five minutes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::TenantId;

/// Hard upper bound on token lifetime, in seconds
pub const MAX_TOKEN_TTL_SECS: u64 = 300;

/// JWT claims carried by a capability token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityClaims {
    /// Unique token ID
    pub jti: String,
    /// Issuer
    pub iss: String,
    /// Subject (user or service identifier)
    pub sub: String,
    /// Audience, always `tenant:<tenant_id>`
    pub aud: String,
    /// Issued-at, seconds since epoch
    pub iat: i64,
    /// Expiry, seconds since epoch; at most `iat + 300`
    pub exp: i64,
    /// Granted capability strings
    pub cap: Vec<String>,
    /// Tenant ID
    pub tid: TenantId,
}

impl CapabilityClaims {
    /// The audience string expected for a tenant
    pub fn audience_for(tenant_id: &TenantId) -> String {
        format!("tenant:{tenant_id}")
    }

    /// Whether the token carries a capability
    pub fn has_capability(&self, required: &str) -> bool {
        self.cap.iter().any(|c| c == required)
    }
}

/// An issued token plus its metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedToken {
    /// The encoded JWT
    pub token: String,
    /// Token ID (jti)
    pub token_id: String,
    /// Subject the token was issued to
    pub subject: String,
    /// Granted capabilities
    pub capabilities: Vec<String>,
    /// Owning tenant
    pub tenant_id: TenantId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Auditable token lifecycle actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenAuditAction {
    Issued,
    Verified,
    CapabilityCheck,
    Revoked,
    Refreshed,
    Expired,
    Failed,
}

/// One entry in the token audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenAuditRecord {
    pub token_id: String,
    pub tenant_id: TenantId,
    pub action: TokenAuditAction,
    /// `success`, or a failure classification
    pub result: String,
    /// Capability checked, for `CapabilityCheck` entries
    pub capability_checked: Option<String>,
    /// Error detail for failed entries. Never contains token material.
    pub error_message: Option<String>,
    /// Client IP, when known
    pub client_ip: Option<String>,
    /// Client user agent, when known
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audience_format() {
        let tenant = TenantId::new();
        let aud = CapabilityClaims::audience_for(&tenant);
        assert_eq!(aud, format!("tenant:{}", tenant.0));
    }

    #[test]
    fn test_has_capability() {
        let claims = CapabilityClaims {
            jti: "j".into(),
            iss: "anumate-captokens".into(),
            sub: "svc".into(),
            aud: "tenant:x".into(),
            iat: 0,
            exp: 60,
            cap: vec!["payments.execute".into()],
            tid: TenantId::new(),
        };
        assert!(claims.has_capability("payments.execute"));
        assert!(!claims.has_capability("payments.refund"));
    }
}
