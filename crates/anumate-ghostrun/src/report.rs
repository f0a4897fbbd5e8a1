//! Preflight report types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use anumate_types::{GhostRunId, ReportId, RiskLevel, TenantId};

/// The report produced by a completed simulation, bound 1:1 to a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightReport {
    pub report_id: ReportId,
    pub run_id: GhostRunId,
    pub tenant_id: TenantId,
    /// Hash of the simulated plan
    pub plan_hash: String,
    /// Maximum risk across all steps
    pub overall_risk: RiskLevel,
    /// True when no critical issue was found
    pub feasible: bool,
    /// Critical-path duration over the sampled latencies, in milliseconds
    pub estimated_duration_ms: u64,
    /// Sum of step cost estimates, in USD
    pub estimated_cost_usd: f64,
    pub step_results: Vec<StepSimulationResult>,
    /// Plan-level blocking issues
    pub issues: Vec<String>,
    /// Plan-level non-blocking warnings
    pub warnings: Vec<String>,
    pub recommendations: Vec<PreflightRecommendation>,
    pub created_at: DateTime<Utc>,
}

/// Result of simulating a single step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSimulationResult {
    pub step_id: String,
    pub step_name: String,
    pub tool: String,
    /// Whether the step would execute successfully
    pub would_execute: bool,
    /// Sampled latency for the mock tool call, in milliseconds
    pub simulated_latency_ms: u64,
    pub risk: RiskLevel,
    /// The mock tool's schema-typed response payload
    pub response: serde_json::Value,
    pub issues: Vec<String>,
}

/// Severity of a recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationSeverity {
    Info,
    Warning,
    Critical,
}

/// A heuristic recommendation attached to a report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightRecommendation {
    pub severity: RecommendationSeverity,
    /// Heuristic family, e.g. `timeout`, `retries`, `approval`, `cost`
    pub category: String,
    pub message: String,
    /// Step the recommendation points at, when step-specific
    pub step_id: Option<String>,
}

/// Timing metrics for a simulation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationMetrics {
    pub total_ms: u64,
    pub validation_ms: u64,
    pub simulation_ms: u64,
    pub report_ms: u64,
    pub steps_simulated: usize,
    pub tools_touched: usize,
}

/// Lifecycle status of a simulation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimulationStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SimulationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for SimulationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "Queued",
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        };
        write!(f, "{s}")
    }
}
