//! Recommendation heuristics
//!
//! Rules derived from production incident patterns: missing timeouts and
//! retries on network tools, unguarded high-risk steps, large monetary
//! parameters, and sensitive values embedded in step parameters.

use regex::Regex;

use anumate_types::{ExecutablePlan, ExecutionStep, RiskLevel};

use crate::{PreflightRecommendation, RecommendationSeverity};

/// Monetary amount above which a cost recommendation fires
const HIGH_COST_THRESHOLD_USD: f64 = 1_000.0;

/// Analyzes plans for risky patterns
pub struct RiskAnalyzer {
    sensitive_pattern: Regex,
}

impl RiskAnalyzer {
    pub fn new() -> Self {
        Self {
            sensitive_pattern: Regex::new(
                r"(?i)(password|passwd|secret|token|api[_-]?key|credential|private[_-]?key)",
            )
            .expect("static pattern compiles"),
        }
    }

    /// Produce recommendations for a plan
    pub fn analyze(&self, plan: &ExecutablePlan) -> Vec<PreflightRecommendation> {
        let mut recommendations = Vec::new();

        for step in plan.steps() {
            self.analyze_step(step, &mut recommendations);
        }

        let total_cost: f64 = plan
            .steps()
            .filter_map(|s| s.parameters.get("amount").and_then(|v| v.as_f64()))
            .sum();
        if total_cost > HIGH_COST_THRESHOLD_USD {
            recommendations.push(PreflightRecommendation {
                severity: RecommendationSeverity::Warning,
                category: "cost".to_string(),
                message: format!(
                    "plan moves {total_cost:.2} USD in monetary parameters; consider an approval gate"
                ),
                step_id: None,
            });
        }

        recommendations
    }

    fn analyze_step(&self, step: &ExecutionStep, out: &mut Vec<PreflightRecommendation>) {
        if step.timeout_secs == 0 || step.timeout_secs > 300 {
            out.push(PreflightRecommendation {
                severity: RecommendationSeverity::Warning,
                category: "timeout".to_string(),
                message: format!(
                    "step '{}' has timeout {}s; bound it below 300s",
                    step.name, step.timeout_secs
                ),
                step_id: Some(step.step_id.clone()),
            });
        }

        if step.retries == 0 && is_network_tool(&step.tool) && step.idempotent {
            out.push(PreflightRecommendation {
                severity: RecommendationSeverity::Info,
                category: "retries".to_string(),
                message: format!(
                    "step '{}' calls '{}' without retries; transient failures will fail the run",
                    step.name, step.tool
                ),
                step_id: Some(step.step_id.clone()),
            });
        }

        if step.risk >= RiskLevel::High && !step.requires_approval {
            out.push(PreflightRecommendation {
                severity: RecommendationSeverity::Critical,
                category: "approval".to_string(),
                message: format!(
                    "step '{}' is {:?} risk but declares no approval gate",
                    step.name, step.risk
                ),
                step_id: Some(step.step_id.clone()),
            });
        }

        let params = serde_json::to_string(&step.parameters).unwrap_or_default();
        if self.sensitive_pattern.is_match(&params) {
            out.push(PreflightRecommendation {
                severity: RecommendationSeverity::Critical,
                category: "sensitive-data".to_string(),
                message: format!(
                    "step '{}' embeds a sensitive-looking parameter; move it to the secrets collaborator",
                    step.name
                ),
                step_id: Some(step.step_id.clone()),
            });
        }
    }
}

impl Default for RiskAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn is_network_tool(tool: &str) -> bool {
    matches!(tool, "http" | "api" | "webhook" | "payment_gateway")
}
