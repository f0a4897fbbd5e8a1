//! Plan compiler service
//!
//! Drives the pipeline: validate → resolve dependencies → optimize → hash →
//! cache. Compilation is pure with respect to time: the same capsule always
//! produces the same plan hash.

use std::sync::Arc;
use std::time::Instant;

use anumate_types::{
    CapsuleDefinition, ExecutablePlan, PlanMetadata, SecurityContext, TenantId,
};

use crate::{
    build_flow, compute_plan_hash, validate_definition, CapsuleRegistry, CompileError,
    CompileResult, DependencyResolver, OptimizationLevel, PlanCache,
};

/// Compiler version recorded in plan metadata
pub const COMPILER_VERSION: &str = "1.0.0";

/// Outcome of a compilation
#[derive(Debug, Clone)]
pub struct CompilationResult {
    pub plan_hash: String,
    pub plan: Arc<ExecutablePlan>,
    pub warnings: Vec<String>,
    pub resolved_dependencies: Vec<String>,
    pub compilation_time_ms: u64,
    /// Whether the result came from the plan cache
    pub cached: bool,
}

/// The plan compiler
pub struct PlanCompiler {
    resolver: DependencyResolver,
    cache: Arc<PlanCache>,
}

impl PlanCompiler {
    pub fn new(registry: Arc<dyn CapsuleRegistry>, cache: Arc<PlanCache>) -> Self {
        Self {
            resolver: DependencyResolver::new(registry),
            cache,
        }
    }

    /// The shared plan cache; lookups by hash are O(1)
    pub fn cache(&self) -> &Arc<PlanCache> {
        &self.cache
    }

    /// Compile a capsule definition into an executable plan.
    pub async fn compile(
        &self,
        tenant_id: TenantId,
        definition: &CapsuleDefinition,
        level: OptimizationLevel,
    ) -> CompileResult<CompilationResult> {
        let started = Instant::now();

        let report = validate_definition(definition);
        if !report.is_valid() {
            return Err(CompileError::Validation {
                errors: report.errors,
            });
        }

        let resolved = self
            .resolver
            .resolve(&tenant_id, &definition.name, &definition.dependencies)
            .await?;

        let flow = build_flow(definition, level)?;
        let flows = vec![flow];

        let tool_allowlist = if definition.tools.is_empty() {
            // Derive the allowlist from the steps when not declared
            let mut tools: Vec<String> = definition
                .automation
                .steps
                .iter()
                .map(|s| s.tool.clone())
                .collect();
            tools.sort();
            tools.dedup();
            tools
        } else {
            let mut tools = definition.tools.clone();
            tools.sort();
            tools.dedup();
            tools
        };

        let security_context = SecurityContext {
            required_capabilities: tool_allowlist
                .iter()
                .map(|t| format!("tool:{t}"))
                .collect(),
            policies: definition.policies.clone(),
            sensitive_parameters: vec![
                "password".to_string(),
                "secret".to_string(),
                "api_key".to_string(),
                "token".to_string(),
            ],
        };

        let plan_hash = compute_plan_hash(&flows, "main", &tool_allowlist, &security_context)?;

        // Write-on-miss: identical hashes carry identical content
        if let Some(cached) = self.cache.get(&tenant_id, &plan_hash).await {
            tracing::debug!(plan_hash = %plan_hash, "Plan cache hit");
            return Ok(CompilationResult {
                plan_hash,
                plan: cached,
                warnings: report.warnings,
                resolved_dependencies: resolved
                    .resolved
                    .iter()
                    .map(|r| r.to_string())
                    .collect(),
                compilation_time_ms: started.elapsed().as_millis() as u64,
                cached: true,
            });
        }

        let checksum = anumate_crypto::hash_canonical(definition)
            .map_err(|e| CompileError::Internal(e.to_string()))?;

        let resolved_refs: Vec<String> =
            resolved.resolved.iter().map(|r| r.to_string()).collect();

        let plan = Arc::new(ExecutablePlan {
            plan_hash: plan_hash.clone(),
            tenant_id,
            name: definition.name.clone(),
            version: definition.version.clone(),
            flows,
            main_flow: "main".to_string(),
            tool_allowlist,
            security_context,
            metadata: PlanMetadata {
                source_capsule_name: definition.name.clone(),
                source_capsule_version: definition.version.clone(),
                source_capsule_checksum: checksum,
                compiler_version: COMPILER_VERSION.to_string(),
                resolved_dependencies: resolved_refs.clone(),
                optimization_level: level.as_str().to_string(),
            },
        });

        self.cache
            .put(
                Arc::clone(&plan),
                vec![
                    format!("capsule:{}", definition.name),
                    format!("version:{}", definition.version),
                    format!("optimization:{}", level.as_str()),
                ],
            )
            .await;

        let compilation_time_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            capsule = %definition.name,
            version = %definition.version,
            plan_hash = %plan_hash,
            time_ms = compilation_time_ms,
            "Capsule compiled"
        );

        Ok(CompilationResult {
            plan_hash,
            plan,
            warnings: report.warnings,
            resolved_dependencies: resolved_refs,
            compilation_time_ms,
            cached: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryCapsuleRegistry;
    use anumate_types::{AutomationSpec, CapsuleStep};

    fn compiler() -> PlanCompiler {
        PlanCompiler::new(
            Arc::new(InMemoryCapsuleRegistry::new()),
            Arc::new(PlanCache::new()),
        )
    }

    fn definition() -> CapsuleDefinition {
        CapsuleDefinition {
            name: "demo-flow".to_string(),
            version: "1.2.3".to_string(),
            description: Some("demo".to_string()),
            automation: AutomationSpec {
                steps: vec![
                    CapsuleStep {
                        name: "fetch".to_string(),
                        tool: "http".to_string(),
                        action: None,
                        parameters: serde_json::json!({"url": "https://example.com"}),
                        depends_on: vec![],
                        timeout_secs: Some(15),
                        retries: Some(2),
                        requires_approval: false,
                        idempotent: true,
                    },
                    CapsuleStep {
                        name: "store".to_string(),
                        tool: "database".to_string(),
                        action: Some("insert".to_string()),
                        parameters: serde_json::json!({"table": "items"}),
                        depends_on: vec!["fetch".to_string()],
                        timeout_secs: None,
                        retries: None,
                        requires_approval: false,
                        idempotent: false,
                    },
                ],
                max_parallelism: 2,
            },
            tools: vec![],
            policies: vec![],
            dependencies: vec![],
            metadata: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_compile_produces_plan() {
        let compiler = compiler();
        let result = compiler
            .compile(TenantId::new(), &definition(), OptimizationLevel::Standard)
            .await
            .unwrap();

        assert_eq!(result.plan_hash.len(), 64);
        assert_eq!(result.plan.step_count(), 2);
        assert_eq!(result.plan.tool_allowlist, vec!["database", "http"]);
        assert!(!result.cached);
    }

    #[tokio::test]
    async fn test_plan_hash_is_deterministic_across_compilers() {
        let tenant = TenantId::new();
        let def = definition();

        let h1 = compiler()
            .compile(tenant, &def, OptimizationLevel::Standard)
            .await
            .unwrap()
            .plan_hash;
        let h2 = compiler()
            .compile(tenant, &def, OptimizationLevel::Standard)
            .await
            .unwrap()
            .plan_hash;
        assert_eq!(h1, h2);
    }

    #[tokio::test]
    async fn test_second_compile_hits_cache() {
        let compiler = compiler();
        let tenant = TenantId::new();
        let def = definition();

        let first = compiler
            .compile(tenant, &def, OptimizationLevel::Standard)
            .await
            .unwrap();
        let second = compiler
            .compile(tenant, &def, OptimizationLevel::Standard)
            .await
            .unwrap();

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.plan_hash, second.plan_hash);
    }

    #[tokio::test]
    async fn test_invalid_definition_fails() {
        let compiler = compiler();
        let mut def = definition();
        def.version = "not-semver".to_string();

        let err = compiler
            .compile(TenantId::new(), &def, OptimizationLevel::Standard)
            .await
            .unwrap_err();
        assert!(matches!(err, CompileError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_every_referenced_tool_in_allowlist() {
        let compiler = compiler();
        let result = compiler
            .compile(TenantId::new(), &definition(), OptimizationLevel::Standard)
            .await
            .unwrap();

        for tool in result.plan.referenced_tools() {
            assert!(result.plan.tool_allowlist.iter().any(|t| t == tool));
        }
    }
}
