//! Identity types for Anumate
//!
//! All identity types are strongly typed wrappers around UUIDs to prevent
//! accidental mixing of different ID types.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Macro to generate ID types with common implementations
macro_rules! define_id_type {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random ID
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create from an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Parse from a string (with or without prefix)
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                let s = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ok(Self(Uuid::parse_str(s)?))
            }

            /// Get the inner UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Convert to prefixed string
            pub fn to_prefixed_string(&self) -> String {
                format!("{}_{}", $prefix, self.0)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl AsRef<Uuid> for $name {
            fn as_ref(&self) -> &Uuid {
                &self.0
            }
        }
    };
}

// Tenancy
define_id_type!(TenantId, "tenant", "Unique identifier for a tenant");

// Artifacts
define_id_type!(CapsuleId, "capsule", "Unique identifier for a stored capsule");
define_id_type!(CompileJobId, "compile", "Unique identifier for an async compilation job");

// Execution
define_id_type!(RunId, "run", "Unique identifier for an execution run");
define_id_type!(GhostRunId, "ghost", "Unique identifier for a preflight simulation run");
define_id_type!(ApprovalId, "approval", "Unique identifier for an approval workflow");
define_id_type!(ClarificationId, "clar", "Unique identifier for a runtime clarification");

// Records
define_id_type!(ReceiptId, "receipt", "Unique identifier for a signed execution receipt");
define_id_type!(ReportId, "report", "Unique identifier for a preflight report");
define_id_type!(AuditEntryId, "audit", "Unique identifier for an audit log entry");
define_id_type!(EventId, "event", "Unique identifier for a published event");

/// Correlation identifier threaded through every request, event and log line.
///
/// Unlike the other IDs this is a free-form string: external callers may
/// supply their own value via `X-Correlation-ID`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    /// Generate a fresh correlation ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an externally supplied value
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
