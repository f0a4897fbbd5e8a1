//! Capsule types for Anumate
//!
//! A Capsule is the declarative automation artifact authored by a tenant.
//! Capsules are immutable per (tenant, name, version); their definition is
//! checksummed with SHA-256 over the canonical serialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CapsuleId, TenantId};

/// A stored capsule record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capsule {
    /// Unique capsule ID assigned by the registry
    pub id: CapsuleId,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Capsule name (lowercase-hyphen)
    pub name: String,
    /// Semantic version
    pub version: String,
    /// The structured definition
    pub definition: CapsuleDefinition,
    /// SHA-256 of the canonical definition, hex encoded
    pub checksum: String,
    /// Optional Ed25519 signature over the checksum, hex encoded
    pub signature: Option<String>,
    /// When the capsule was registered
    pub created_at: DateTime<Utc>,
    /// Soft-delete marker
    pub deleted_at: Option<DateTime<Utc>>,
}

/// The structured body of a capsule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapsuleDefinition {
    /// Capsule name, must match the record name
    pub name: String,
    /// Semantic version, must match the record version
    pub version: String,
    /// Human-readable description
    #[serde(default)]
    pub description: Option<String>,
    /// The automation flow
    pub automation: AutomationSpec,
    /// Tools this capsule is allowed to invoke
    #[serde(default)]
    pub tools: Vec<String>,
    /// Policy references evaluated by the policy collaborator
    #[serde(default)]
    pub policies: Vec<String>,
    /// Capsule dependencies as `name@version` references
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Free-form metadata
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// The automation section of a capsule definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationSpec {
    /// Ordered list of declared steps
    pub steps: Vec<CapsuleStep>,
    /// Maximum steps simulated or executed in parallel
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,
}

fn default_max_parallelism() -> usize {
    4
}

/// A single declared step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapsuleStep {
    /// Step name, unique within the capsule
    pub name: String,
    /// Tool invoked by this step
    pub tool: String,
    /// Tool action, when the tool exposes more than one
    #[serde(default)]
    pub action: Option<String>,
    /// Step parameters passed to the tool
    #[serde(default)]
    pub parameters: serde_json::Value,
    /// Names of steps that must complete first
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Per-step timeout in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Per-step retry attempts
    #[serde(default)]
    pub retries: Option<u32>,
    /// Whether this step requires a human approval before execution
    #[serde(default)]
    pub requires_approval: bool,
    /// Whether the tool call is safe to retry
    #[serde(default = "default_idempotent")]
    pub idempotent: bool,
}

fn default_idempotent() -> bool {
    true
}

impl CapsuleDefinition {
    /// Iterate all declared step names
    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.automation.steps.iter().map(|s| s.name.as_str())
    }

    /// Whether any step declares an approval gate
    pub fn requires_approval(&self) -> bool {
        self.automation.steps.iter().any(|s| s.requires_approval)
    }
}

/// A `name@version` dependency reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapsuleRef {
    pub name: String,
    pub version: String,
}

impl CapsuleRef {
    /// Parse a `name@version` reference string
    pub fn parse(s: &str) -> Option<Self> {
        let (name, version) = s.split_once('@')?;
        if name.is_empty() || version.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            version: version.to_string(),
        })
    }
}

impl std::fmt::Display for CapsuleRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}
