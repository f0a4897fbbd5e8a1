//! Mock tool registry
//!
//! Each simulated tool call resolves against a registry entry keyed by tool
//! name. Entries declare a base latency, a risk level (which derives the
//! failure probability) and a schema-typed response payload. Latency samples
//! vary ±30% around the base.

use std::collections::HashMap;

use rand::Rng;

use anumate_types::RiskLevel;

/// Behavior of one mocked tool
#[derive(Debug, Clone)]
pub struct MockToolBehavior {
    pub tool: String,
    /// Base latency in milliseconds; samples vary ±30%
    pub base_latency_ms: u64,
    pub risk: RiskLevel,
    /// Response payload returned on simulated success
    pub response: serde_json::Value,
    /// Cost per call in USD
    pub cost_usd: f64,
}

/// Per-run override of a registry entry
#[derive(Debug, Clone, Default)]
pub struct ToolOverride {
    pub base_latency_ms: Option<u64>,
    pub risk: Option<RiskLevel>,
    /// Force the outcome instead of sampling
    pub force_success: Option<bool>,
}

/// Registry of mocked tools
#[derive(Debug, Clone)]
pub struct MockToolRegistry {
    tools: HashMap<String, MockToolBehavior>,
}

impl MockToolRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Registry pre-populated with the standard connector set
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let defaults = [
            ("http", 120, RiskLevel::Medium, 0.001),
            ("api", 150, RiskLevel::Medium, 0.001),
            ("webhook", 100, RiskLevel::Medium, 0.001),
            ("database", 40, RiskLevel::Medium, 0.002),
            ("sql", 40, RiskLevel::Medium, 0.002),
            ("file", 20, RiskLevel::Low, 0.0005),
            ("compute", 300, RiskLevel::Low, 0.005),
            ("transform", 80, RiskLevel::Low, 0.001),
            ("notification", 60, RiskLevel::Low, 0.0005),
            ("email", 200, RiskLevel::Low, 0.0005),
            ("slack", 90, RiskLevel::Low, 0.0005),
            ("payment_gateway", 400, RiskLevel::High, 0.01),
            ("validator", 30, RiskLevel::Low, 0.0),
            ("fraud_detector", 250, RiskLevel::Medium, 0.003),
            ("demo_tool", 50, RiskLevel::Low, 0.0),
        ];
        for (tool, latency, risk, cost) in defaults {
            registry.register(MockToolBehavior {
                tool: tool.to_string(),
                base_latency_ms: latency,
                risk,
                response: serde_json::json!({
                    "tool": tool,
                    "status": "ok",
                    "simulated": true,
                }),
                cost_usd: cost,
            });
        }
        registry
    }

    pub fn register(&mut self, behavior: MockToolBehavior) {
        self.tools.insert(behavior.tool.clone(), behavior);
    }

    pub fn get(&self, tool: &str) -> Option<&MockToolBehavior> {
        self.tools.get(tool)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for MockToolRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Sample a latency in [base * 0.7, base * 1.3]
pub fn sample_latency<R: Rng>(rng: &mut R, base_ms: u64) -> u64 {
    let base = base_ms.max(1) as f64;
    let factor = rng.gen_range(0.7..=1.3);
    (base * factor).round() as u64
}

/// Sample success for a risk level
pub fn sample_success<R: Rng>(rng: &mut R, risk: RiskLevel) -> bool {
    rng.gen_range(0.0..1.0) >= risk.failure_probability()
}
