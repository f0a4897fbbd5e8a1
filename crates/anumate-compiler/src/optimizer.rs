//! Plan optimization
//!
//! Turns the validated capsule automation into compiled flows: steps in
//! topological order, parallel batches grouped by absence of data
//! dependencies (capped at `max_parallelism`), and an estimated resource
//! envelope attached to every step.

use std::collections::{HashMap, HashSet};

use anumate_types::{
    CapsuleDefinition, CapsuleStep, ExecutionFlow, ExecutionStep, ResourceEnvelope, RiskLevel,
};

use crate::{CompileError, CompileResult};

/// Optimization level applied during compilation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationLevel {
    /// Topological order only, one step per batch
    None,
    /// Parallel batching plus resource estimation
    Standard,
}

impl OptimizationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Standard => "standard",
        }
    }
}

impl Default for OptimizationLevel {
    fn default() -> Self {
        Self::Standard
    }
}

/// Default per-step timeout when the capsule does not declare one
const DEFAULT_STEP_TIMEOUT_SECS: u64 = 30;

/// Build the main execution flow from a capsule definition
pub fn build_flow(def: &CapsuleDefinition, level: OptimizationLevel) -> CompileResult<ExecutionFlow> {
    let order = topological_order(&def.automation.steps)?;

    let steps: Vec<ExecutionStep> = order
        .iter()
        .map(|name| {
            let declared = def
                .automation
                .steps
                .iter()
                .find(|s| &s.name == name)
                .expect("ordered names come from the step list");
            compile_step(declared)
        })
        .collect();

    let parallel_batches = match level {
        OptimizationLevel::None => order.iter().map(|n| vec![n.clone()]).collect(),
        OptimizationLevel::Standard => batch_steps(&steps, def.automation.max_parallelism),
    };

    Ok(ExecutionFlow {
        flow_id: "main".to_string(),
        name: def.name.clone(),
        steps,
        parallel_batches,
    })
}

fn compile_step(declared: &CapsuleStep) -> ExecutionStep {
    ExecutionStep {
        step_id: declared.name.clone(),
        name: declared.name.clone(),
        tool: declared.tool.clone(),
        action: declared.action.clone(),
        parameters: declared.parameters.clone(),
        depends_on: declared.depends_on.clone(),
        timeout_secs: declared.timeout_secs.unwrap_or(DEFAULT_STEP_TIMEOUT_SECS),
        retries: declared.retries.unwrap_or(0),
        requires_approval: declared.requires_approval,
        idempotent: declared.idempotent,
        resources: estimate_resources(declared),
        risk: classify_risk(declared),
    }
}

// Kahn's algorithm; validation has already rejected cycles, but compilation
// may run on definitions that skipped validation, so the error is kept.
fn topological_order(steps: &[CapsuleStep]) -> CompileResult<Vec<String>> {
    let mut indegree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for step in steps {
        indegree.entry(step.name.as_str()).or_insert(0);
        for dep in &step.depends_on {
            *indegree.entry(step.name.as_str()).or_insert(0) += 1;
            dependents.entry(dep.as_str()).or_default().push(step.name.as_str());
        }
    }

    // Stable order: among ready steps, keep declaration order
    let mut order = Vec::with_capacity(steps.len());
    let mut ready: Vec<&str> = steps
        .iter()
        .map(|s| s.name.as_str())
        .filter(|n| indegree[n] == 0)
        .collect();

    while !ready.is_empty() {
        let node = ready.remove(0);
        order.push(node.to_string());
        if let Some(deps) = dependents.get(node) {
            for dependent in deps.clone() {
                let entry = indegree.get_mut(dependent).expect("registered above");
                *entry -= 1;
                if *entry == 0 {
                    // Insert respecting declaration order
                    let pos = steps
                        .iter()
                        .position(|s| s.name == dependent)
                        .unwrap_or(steps.len());
                    let insert_at = ready
                        .iter()
                        .position(|r| {
                            steps.iter().position(|s| &s.name == r).unwrap_or(steps.len()) > pos
                        })
                        .unwrap_or(ready.len());
                    ready.insert(insert_at, dependent);
                }
            }
        }
    }

    if order.len() != steps.len() {
        let stuck = steps
            .iter()
            .find(|s| !order.contains(&s.name))
            .map(|s| s.name.clone())
            .unwrap_or_default();
        return Err(CompileError::CycleDetected { name: stuck });
    }
    Ok(order)
}

// Group steps into waves where every step's dependencies live in an earlier
// wave, then split waves larger than max_parallelism.
fn batch_steps(steps: &[ExecutionStep], max_parallelism: usize) -> Vec<Vec<String>> {
    let max_parallelism = max_parallelism.max(1);
    let mut placed: HashSet<&str> = HashSet::new();
    let mut remaining: Vec<&ExecutionStep> = steps.iter().collect();
    let mut batches = Vec::new();

    while !remaining.is_empty() {
        let wave: Vec<&ExecutionStep> = remaining
            .iter()
            .filter(|s| s.depends_on.iter().all(|d| placed.contains(d.as_str())))
            .copied()
            .collect();

        debug_assert!(!wave.is_empty(), "cycle should have been rejected earlier");
        if wave.is_empty() {
            // Degenerate input: fall back to sequential emission
            for step in remaining.drain(..) {
                batches.push(vec![step.step_id.clone()]);
            }
            break;
        }

        for chunk in wave.chunks(max_parallelism) {
            batches.push(chunk.iter().map(|s| s.step_id.clone()).collect());
        }
        for step in &wave {
            placed.insert(step.step_id.as_str());
        }
        remaining.retain(|s| !placed.contains(s.step_id.as_str()));
    }

    batches
}

// Per-tool envelope heuristics, from observed connector latencies
fn estimate_resources(step: &CapsuleStep) -> ResourceEnvelope {
    let (duration, cost, memory) = match step.tool.as_str() {
        "http" | "api" | "webhook" => (3, 0.001, 64),
        "database" | "sql" => (5, 0.002, 128),
        "payment_gateway" => (8, 0.01, 64),
        "email" | "slack" | "notification" => (2, 0.0005, 32),
        "compute" | "transform" => (10, 0.005, 256),
        "file" => (4, 0.001, 128),
        _ => (5, 0.002, 64),
    };
    ResourceEnvelope {
        estimated_duration_secs: duration,
        estimated_cost_usd: cost,
        estimated_memory_mib: memory,
    }
}

fn classify_risk(step: &CapsuleStep) -> RiskLevel {
    let tool_risk = match step.tool.as_str() {
        "payment_gateway" => RiskLevel::High,
        "database" | "sql" | "file" => RiskLevel::Medium,
        "http" | "api" | "webhook" => RiskLevel::Medium,
        _ => RiskLevel::Low,
    };

    // Large monetary parameters escalate the risk one level
    let monetary = step
        .parameters
        .get("amount")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);
    if monetary > 10_000.0 {
        return RiskLevel::Critical;
    }
    if monetary > 1_000.0 && tool_risk < RiskLevel::High {
        return RiskLevel::High;
    }
    tool_risk
}

#[cfg(test)]
mod tests {
    use super::*;
    use anumate_types::AutomationSpec;

    fn step(name: &str, tool: &str, depends_on: &[&str]) -> CapsuleStep {
        CapsuleStep {
            name: name.to_string(),
            tool: tool.to_string(),
            action: None,
            parameters: serde_json::json!({}),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            timeout_secs: None,
            retries: None,
            requires_approval: false,
            idempotent: true,
        }
    }

    fn definition(steps: Vec<CapsuleStep>, max_parallelism: usize) -> CapsuleDefinition {
        CapsuleDefinition {
            name: "demo".to_string(),
            version: "1.0.0".to_string(),
            description: None,
            automation: AutomationSpec {
                steps,
                max_parallelism,
            },
            tools: vec![],
            policies: vec![],
            dependencies: vec![],
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_topological_order_respects_dependencies() {
        let def = definition(
            vec![
                step("c", "compute", &["a", "b"]),
                step("a", "http", &[]),
                step("b", "http", &["a"]),
            ],
            4,
        );
        let flow = build_flow(&def, OptimizationLevel::Standard).unwrap();
        let order: Vec<&str> = flow.steps.iter().map(|s| s.step_id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_independent_steps_share_a_batch() {
        let def = definition(
            vec![
                step("a", "http", &[]),
                step("b", "http", &[]),
                step("c", "compute", &["a", "b"]),
            ],
            4,
        );
        let flow = build_flow(&def, OptimizationLevel::Standard).unwrap();
        assert_eq!(
            flow.parallel_batches,
            vec![
                vec!["a".to_string(), "b".to_string()],
                vec!["c".to_string()]
            ]
        );
    }

    #[test]
    fn test_max_parallelism_splits_waves() {
        let def = definition(
            vec![step("a", "http", &[]), step("b", "http", &[]), step("c", "http", &[])],
            2,
        );
        let flow = build_flow(&def, OptimizationLevel::Standard).unwrap();
        assert_eq!(flow.parallel_batches.len(), 2);
        assert_eq!(flow.parallel_batches[0].len(), 2);
        assert_eq!(flow.parallel_batches[1].len(), 1);
    }

    #[test]
    fn test_optimization_none_is_sequential() {
        let def = definition(vec![step("a", "http", &[]), step("b", "http", &[])], 4);
        let flow = build_flow(&def, OptimizationLevel::None).unwrap();
        assert_eq!(flow.parallel_batches.len(), 2);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let def = definition(vec![step("a", "http", &["b"]), step("b", "http", &["a"])], 4);
        assert!(matches!(
            build_flow(&def, OptimizationLevel::Standard),
            Err(CompileError::CycleDetected { .. })
        ));
    }

    #[test]
    fn test_payment_risk_classification() {
        let mut pay = step("pay", "payment_gateway", &[]);
        pay.parameters = serde_json::json!({"amount": 50.0});
        assert_eq!(classify_risk(&pay), RiskLevel::High);

        pay.parameters = serde_json::json!({"amount": 50_000.0});
        assert_eq!(classify_risk(&pay), RiskLevel::Critical);
    }

    #[test]
    fn test_monetary_escalation_for_low_risk_tools() {
        let mut notify = step("notify", "slack", &[]);
        assert_eq!(classify_risk(&notify), RiskLevel::Low);
        notify.parameters = serde_json::json!({"amount": 2_000.0});
        assert_eq!(classify_risk(&notify), RiskLevel::High);
    }

    #[test]
    fn test_default_timeout_applied() {
        let def = definition(vec![step("a", "http", &[])], 4);
        let flow = build_flow(&def, OptimizationLevel::Standard).unwrap();
        assert_eq!(flow.steps[0].timeout_secs, DEFAULT_STEP_TIMEOUT_SECS);
    }
}
