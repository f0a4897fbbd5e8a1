//! Executable plan types
//!
//! An ExecutablePlan is the compiled, canonicalized, content-addressed form
//! of a capsule. The plan hash is computed over the canonical serialization
//! of the compiled definition, the tool allowlist and the security context;
//! nothing time-dependent participates in the hash.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::TenantId;

/// Risk classification for a step or a whole plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Probability that a simulated call at this risk level fails
    pub fn failure_probability(&self) -> f64 {
        match self {
            Self::Low => 0.01,
            Self::Medium => 0.05,
            Self::High => 0.15,
            Self::Critical => 0.30,
        }
    }
}

impl Default for RiskLevel {
    fn default() -> Self {
        Self::Low
    }
}

/// A compiled, immutable, content-addressed plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutablePlan {
    /// SHA-256 of the canonical compiled definition, hex encoded
    pub plan_hash: String,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Plan name (from the source capsule)
    pub name: String,
    /// Plan version (from the source capsule)
    pub version: String,
    /// Compiled execution flows
    pub flows: Vec<ExecutionFlow>,
    /// Flow executed first
    pub main_flow: String,
    /// Tools this plan may invoke; every referenced tool must be a member
    pub tool_allowlist: Vec<String>,
    /// Security requirements derived from the capsule
    pub security_context: SecurityContext,
    /// Compilation provenance
    pub metadata: PlanMetadata,
}

impl ExecutablePlan {
    /// All steps across all flows
    pub fn steps(&self) -> impl Iterator<Item = &ExecutionStep> {
        self.flows.iter().flat_map(|f| f.steps.iter())
    }

    /// Total step count
    pub fn step_count(&self) -> usize {
        self.flows.iter().map(|f| f.steps.len()).sum()
    }

    /// Whether any step requires an approval gate
    pub fn requires_approval(&self) -> bool {
        self.steps().any(|s| s.requires_approval)
    }

    /// The set of tools referenced by steps
    pub fn referenced_tools(&self) -> BTreeSet<&str> {
        self.steps().map(|s| s.tool.as_str()).collect()
    }

    /// Estimated wall-clock duration over the critical path, in seconds
    pub fn estimated_duration_secs(&self) -> u64 {
        self.flows
            .iter()
            .map(|f| {
                f.parallel_batches
                    .iter()
                    .map(|batch| {
                        batch
                            .iter()
                            .filter_map(|id| f.step(id))
                            .map(|s| s.resources.estimated_duration_secs)
                            .max()
                            .unwrap_or(0)
                    })
                    .sum::<u64>()
            })
            .max()
            .unwrap_or(0)
    }
}

/// A single flow: a DAG of steps plus the batch schedule derived from it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFlow {
    /// Flow identifier, unique within the plan
    pub flow_id: String,
    /// Human-readable flow name
    pub name: String,
    /// Steps in topological order
    pub steps: Vec<ExecutionStep>,
    /// Groups of step ids that may execute concurrently, in schedule order
    pub parallel_batches: Vec<Vec<String>>,
}

impl ExecutionFlow {
    /// Look up a step by id
    pub fn step(&self, step_id: &str) -> Option<&ExecutionStep> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }
}

/// A compiled step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    /// Step identifier, unique within the flow
    pub step_id: String,
    /// Step name from the capsule
    pub name: String,
    /// Tool invoked
    pub tool: String,
    /// Tool action, when the tool exposes more than one
    pub action: Option<String>,
    /// Parameters passed to the tool
    pub parameters: serde_json::Value,
    /// Step ids that must complete first
    pub depends_on: Vec<String>,
    /// Per-step timeout in seconds
    pub timeout_secs: u64,
    /// Per-step retry attempts
    pub retries: u32,
    /// Whether execution pauses for a human approval before this step
    pub requires_approval: bool,
    /// Whether the tool call is safe to retry
    pub idempotent: bool,
    /// Estimated resource envelope
    pub resources: ResourceEnvelope,
    /// Risk classification
    pub risk: RiskLevel,
}

/// Estimated resource envelope attached by the optimizer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceEnvelope {
    /// Expected duration in seconds
    pub estimated_duration_secs: u64,
    /// Expected monetary cost in USD
    pub estimated_cost_usd: f64,
    /// Expected memory footprint in MiB
    pub estimated_memory_mib: u64,
}

impl Default for ResourceEnvelope {
    fn default() -> Self {
        Self {
            estimated_duration_secs: 5,
            estimated_cost_usd: 0.0,
            estimated_memory_mib: 64,
        }
    }
}

/// Security requirements derived from the capsule
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SecurityContext {
    /// Capabilities a token must carry to execute this plan
    pub required_capabilities: Vec<String>,
    /// Policy references evaluated before execution
    pub policies: Vec<String>,
    /// Parameter names treated as sensitive for redaction
    pub sensitive_parameters: Vec<String>,
}

/// Compilation provenance. Excluded from the plan hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanMetadata {
    /// Source capsule name
    pub source_capsule_name: String,
    /// Source capsule version
    pub source_capsule_version: String,
    /// Source capsule checksum
    pub source_capsule_checksum: String,
    /// Compiler version string
    pub compiler_version: String,
    /// Transitively resolved dependency references
    pub resolved_dependencies: Vec<String>,
    /// Optimization level applied
    pub optimization_level: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, duration: u64) -> ExecutionStep {
        ExecutionStep {
            step_id: id.to_string(),
            name: id.to_string(),
            tool: "http".to_string(),
            action: None,
            parameters: serde_json::json!({}),
            depends_on: vec![],
            timeout_secs: 30,
            retries: 0,
            requires_approval: false,
            idempotent: true,
            resources: ResourceEnvelope {
                estimated_duration_secs: duration,
                ..Default::default()
            },
            risk: RiskLevel::Low,
        }
    }

    #[test]
    fn test_estimated_duration_is_critical_path() {
        let plan = ExecutablePlan {
            plan_hash: "h".into(),
            tenant_id: TenantId::new(),
            name: "demo".into(),
            version: "1.0.0".into(),
            flows: vec![ExecutionFlow {
                flow_id: "main".into(),
                name: "main".into(),
                steps: vec![step("a", 10), step("b", 3), step("c", 7)],
                parallel_batches: vec![
                    vec!["a".into(), "b".into()],
                    vec!["c".into()],
                ],
            }],
            main_flow: "main".into(),
            tool_allowlist: vec!["http".into()],
            security_context: SecurityContext::default(),
            metadata: PlanMetadata {
                source_capsule_name: "demo".into(),
                source_capsule_version: "1.0.0".into(),
                source_capsule_checksum: "c".into(),
                compiler_version: "1.0.0".into(),
                resolved_dependencies: vec![],
                optimization_level: "standard".into(),
            },
        };

        // Batch 1 takes max(10, 3) = 10, batch 2 takes 7
        assert_eq!(plan.estimated_duration_secs(), 17);
    }

    #[test]
    fn test_risk_ordering() {
        assert!(RiskLevel::Critical > RiskLevel::High);
        assert!(RiskLevel::High > RiskLevel::Low);
    }
}
