//! Simulation engine
//!
//! Walks the plan's parallel batches in schedule order. Within a batch the
//! simulated duration is the slowest step, so the total is the critical-path
//! sum. Cancellation is cooperative and checked between steps.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;

use anumate_types::{ExecutablePlan, GhostRunId, ReportId, RiskLevel, TenantId};

use crate::{
    sample_latency, sample_success, GhostRunError, GhostRunResult, MockToolRegistry,
    PreflightReport, RiskAnalyzer, SimulationMetrics, StepSimulationResult, ToolOverride,
};

/// Configuration for one simulation run
#[derive(Debug, Clone, Default)]
pub struct GhostRunConfig {
    /// Per-tool behavior overrides
    pub connector_overrides: HashMap<String, ToolOverride>,
    /// Seed for deterministic sampling; defaults to entropy
    pub seed: Option<u64>,
    /// Sleep the sampled latencies (scaled down 100x) instead of returning
    /// immediately. Off by default; the report is identical either way.
    pub simulate_delays: bool,
}

/// The simulation engine
pub struct SimulationEngine {
    registry: MockToolRegistry,
    analyzer: RiskAnalyzer,
}

impl SimulationEngine {
    pub fn new(registry: MockToolRegistry) -> Self {
        Self {
            registry,
            analyzer: RiskAnalyzer::new(),
        }
    }

    /// Simulate a plan, producing its preflight report and timing metrics.
    pub async fn simulate(
        &self,
        tenant_id: TenantId,
        run_id: GhostRunId,
        plan: &ExecutablePlan,
        config: &GhostRunConfig,
        cancel: &Arc<AtomicBool>,
        on_progress: impl Fn(f64),
    ) -> GhostRunResult<(PreflightReport, SimulationMetrics)> {
        let started = Instant::now();

        let validation_started = Instant::now();
        self.validate_structure(plan)?;
        let validation_ms = validation_started.elapsed().as_millis() as u64;

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let simulation_started = Instant::now();
        let mut step_results = Vec::new();
        let mut issues = Vec::new();
        let mut warnings = Vec::new();
        let mut estimated_duration_ms = 0u64;
        let mut estimated_cost_usd = 0f64;

        let total_steps = plan.step_count().max(1);
        let mut completed_steps = 0usize;

        for flow in &plan.flows {
            for batch in &flow.parallel_batches {
                if cancel.load(Ordering::Relaxed) {
                    return Err(GhostRunError::Cancelled {
                        run_id: run_id.to_string(),
                    });
                }

                let mut batch_duration = 0u64;
                for step_id in batch {
                    let step = flow.step(step_id).ok_or_else(|| {
                        GhostRunError::PlanInvalid(format!(
                            "batch references unknown step '{step_id}'"
                        ))
                    })?;

                    let result = self.simulate_step(step, config, &mut rng);
                    batch_duration = batch_duration.max(result.simulated_latency_ms);
                    estimated_cost_usd += self
                        .registry
                        .get(&step.tool)
                        .map(|b| b.cost_usd)
                        .unwrap_or(0.0);

                    if !result.would_execute {
                        let message = format!(
                            "step '{}' would fail ({} via '{}')",
                            step.name,
                            result.issues.join(", "),
                            step.tool
                        );
                        if step.risk >= RiskLevel::High {
                            issues.push(message);
                        } else {
                            warnings.push(message);
                        }
                    }

                    step_results.push(result);
                    completed_steps += 1;
                    on_progress(completed_steps as f64 / total_steps as f64);
                }
                estimated_duration_ms += batch_duration;

                if config.simulate_delays {
                    tokio::time::sleep(std::time::Duration::from_millis(batch_duration / 100))
                        .await;
                } else {
                    tokio::task::yield_now().await;
                }
            }
        }
        let simulation_ms = simulation_started.elapsed().as_millis() as u64;

        let report_started = Instant::now();
        let recommendations = self.analyzer.analyze(plan);
        let overall_risk = step_results
            .iter()
            .map(|r| r.risk)
            .max()
            .unwrap_or(RiskLevel::Low);
        let feasible = issues.is_empty();

        let tools_touched = plan.referenced_tools().len();
        let report = PreflightReport {
            report_id: ReportId::new(),
            run_id,
            tenant_id,
            plan_hash: plan.plan_hash.clone(),
            overall_risk,
            feasible,
            estimated_duration_ms,
            estimated_cost_usd,
            step_results,
            issues,
            warnings,
            recommendations,
            created_at: Utc::now(),
        };
        let report_ms = report_started.elapsed().as_millis() as u64;

        let metrics = SimulationMetrics {
            total_ms: started.elapsed().as_millis() as u64,
            validation_ms,
            simulation_ms,
            report_ms,
            steps_simulated: total_steps,
            tools_touched,
        };

        Ok((report, metrics))
    }

    fn simulate_step(
        &self,
        step: &anumate_types::ExecutionStep,
        config: &GhostRunConfig,
        rng: &mut StdRng,
    ) -> StepSimulationResult {
        let overrides = config.connector_overrides.get(&step.tool);

        let Some(behavior) = self.registry.get(&step.tool) else {
            return StepSimulationResult {
                step_id: step.step_id.clone(),
                step_name: step.name.clone(),
                tool: step.tool.clone(),
                would_execute: false,
                simulated_latency_ms: 0,
                risk: RiskLevel::Critical,
                response: serde_json::Value::Null,
                issues: vec![format!("no connector registered for tool '{}'", step.tool)],
            };
        };

        let base_latency = overrides
            .and_then(|o| o.base_latency_ms)
            .unwrap_or(behavior.base_latency_ms);
        let risk = overrides
            .and_then(|o| o.risk)
            .unwrap_or(behavior.risk)
            .max(step.risk);

        let latency = sample_latency(rng, base_latency);
        let success = match overrides.and_then(|o| o.force_success) {
            Some(forced) => forced,
            None => sample_success(rng, risk),
        };

        StepSimulationResult {
            step_id: step.step_id.clone(),
            step_name: step.name.clone(),
            tool: step.tool.clone(),
            would_execute: success,
            simulated_latency_ms: latency,
            risk,
            response: if success {
                behavior.response.clone()
            } else {
                serde_json::Value::Null
            },
            issues: if success {
                vec![]
            } else {
                vec!["simulated failure".to_string()]
            },
        }
    }

    fn validate_structure(&self, plan: &ExecutablePlan) -> GhostRunResult<()> {
        if plan.flows.is_empty() {
            return Err(GhostRunError::PlanInvalid(
                "plan has no execution flows".to_string(),
            ));
        }
        if !plan.flows.iter().any(|f| f.flow_id == plan.main_flow) {
            return Err(GhostRunError::PlanInvalid(format!(
                "main flow '{}' not found",
                plan.main_flow
            )));
        }
        for flow in &plan.flows {
            for step in &flow.steps {
                for dep in &step.depends_on {
                    if flow.step(dep).is_none() {
                        return Err(GhostRunError::PlanInvalid(format!(
                            "step '{}' depends on unknown step '{dep}'",
                            step.step_id
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
