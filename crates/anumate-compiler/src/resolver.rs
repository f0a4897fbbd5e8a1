//! Capsule dependency resolution
//!
//! Resolves `name@version` references transitively through the registry
//! interface. The registry itself is an external collaborator; only its
//! read surface is consumed here.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use anumate_types::{Capsule, CapsuleRef, TenantId};

use crate::{CompileError, CompileResult};

/// Read interface of the capsule registry collaborator
#[async_trait]
pub trait CapsuleRegistry: Send + Sync {
    /// Fetch a capsule by exact name and version, tenant-scoped
    async fn get(
        &self,
        tenant_id: &TenantId,
        name: &str,
        version: &str,
    ) -> CompileResult<Option<Capsule>>;
}

/// Result of resolving a capsule's dependency closure
#[derive(Debug, Clone, Default)]
pub struct ResolvedDependencies {
    /// All transitively resolved references, in discovery order
    pub resolved: Vec<CapsuleRef>,
}

/// Dependency resolver walking the registry breadth-first
pub struct DependencyResolver {
    registry: Arc<dyn CapsuleRegistry>,
}

impl DependencyResolver {
    pub fn new(registry: Arc<dyn CapsuleRegistry>) -> Self {
        Self { registry }
    }

    /// Resolve the transitive dependency closure of `refs`.
    ///
    /// Depth-first, post-order: every dependency settles before its
    /// dependents, so `resolved` is in installation order. Fails with
    /// `DependencyNotFound` when a reference has no registry entry and
    /// `CycleDetected` when the graph loops back onto a capsule currently
    /// on the resolution path.
    pub async fn resolve(
        &self,
        tenant_id: &TenantId,
        root_name: &str,
        refs: &[String],
    ) -> CompileResult<ResolvedDependencies> {
        enum Phase {
            Visit,
            Finish,
        }

        let mut resolved = Vec::new();
        let mut settled: HashSet<String> = HashSet::new();
        // Names on the current resolution path
        let mut path: HashSet<String> = HashSet::new();
        path.insert(root_name.to_string());

        let roots: Vec<CapsuleRef> = refs
            .iter()
            .map(|r| {
                CapsuleRef::parse(r).ok_or_else(|| CompileError::Validation {
                    errors: vec![format!("dependency '{r}' must be of the form name@version")],
                })
            })
            .collect::<CompileResult<Vec<_>>>()?;

        let mut stack: Vec<(CapsuleRef, Phase)> = roots
            .into_iter()
            .rev()
            .map(|r| (r, Phase::Visit))
            .collect();

        while let Some((reference, phase)) = stack.pop() {
            match phase {
                Phase::Visit => {
                    let key = reference.to_string();
                    if settled.contains(&key) {
                        continue;
                    }
                    if path.contains(&reference.name) {
                        return Err(CompileError::CycleDetected {
                            name: reference.name,
                        });
                    }

                    let capsule = self
                        .registry
                        .get(tenant_id, &reference.name, &reference.version)
                        .await?
                        .ok_or_else(|| CompileError::DependencyNotFound {
                            reference: key.clone(),
                        })?;

                    path.insert(reference.name.clone());

                    let children: Vec<CapsuleRef> = capsule
                        .definition
                        .dependencies
                        .iter()
                        .filter_map(|d| CapsuleRef::parse(d))
                        .collect();

                    stack.push((reference, Phase::Finish));
                    for child in children.into_iter().rev() {
                        stack.push((child, Phase::Visit));
                    }
                }
                Phase::Finish => {
                    path.remove(&reference.name);
                    settled.insert(reference.to_string());
                    resolved.push(reference);
                }
            }
        }

        Ok(ResolvedDependencies { resolved })
    }
}

/// In-memory capsule registry for tests and local development
#[derive(Default)]
pub struct InMemoryCapsuleRegistry {
    capsules: RwLock<HashMap<(TenantId, String, String), Capsule>>,
}

impl InMemoryCapsuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capsule
    pub async fn register(&self, capsule: Capsule) {
        let key = (
            capsule.tenant_id,
            capsule.name.clone(),
            capsule.version.clone(),
        );
        self.capsules.write().await.insert(key, capsule);
    }

    /// Look up a capsule by its registry ID, tenant-scoped
    pub async fn get_by_id(
        &self,
        tenant_id: &TenantId,
        id: &anumate_types::CapsuleId,
    ) -> Option<Capsule> {
        let capsules = self.capsules.read().await;
        capsules
            .values()
            .find(|c| c.tenant_id == *tenant_id && c.id == *id)
            .cloned()
    }
}

#[async_trait]
impl CapsuleRegistry for InMemoryCapsuleRegistry {
    async fn get(
        &self,
        tenant_id: &TenantId,
        name: &str,
        version: &str,
    ) -> CompileResult<Option<Capsule>> {
        let key = (*tenant_id, name.to_string(), version.to_string());
        Ok(self.capsules.read().await.get(&key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anumate_types::{AutomationSpec, CapsuleDefinition, CapsuleId, CapsuleStep};
    use chrono::Utc;

    fn capsule(tenant: TenantId, name: &str, version: &str, deps: &[&str]) -> Capsule {
        Capsule {
            id: CapsuleId::new(),
            tenant_id: tenant,
            name: name.to_string(),
            version: version.to_string(),
            definition: CapsuleDefinition {
                name: name.to_string(),
                version: version.to_string(),
                description: None,
                automation: AutomationSpec {
                    steps: vec![CapsuleStep {
                        name: "noop".to_string(),
                        tool: "compute".to_string(),
                        action: None,
                        parameters: serde_json::json!({}),
                        depends_on: vec![],
                        timeout_secs: None,
                        retries: None,
                        requires_approval: false,
                        idempotent: true,
                    }],
                    max_parallelism: 1,
                },
                tools: vec![],
                policies: vec![],
                dependencies: deps.iter().map(|d| d.to_string()).collect(),
                metadata: serde_json::Value::Null,
            },
            checksum: String::new(),
            signature: None,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn test_resolves_transitively() {
        let tenant = TenantId::new();
        let registry = Arc::new(InMemoryCapsuleRegistry::new());
        registry.register(capsule(tenant, "leaf", "1.0.0", &[])).await;
        registry
            .register(capsule(tenant, "mid", "1.0.0", &["leaf@1.0.0"]))
            .await;

        let resolver = DependencyResolver::new(registry);
        let result = resolver
            .resolve(&tenant, "root", &["mid@1.0.0".to_string()])
            .await
            .unwrap();

        let names: Vec<String> = result.resolved.iter().map(|r| r.to_string()).collect();
        assert_eq!(names, vec!["leaf@1.0.0", "mid@1.0.0"]);
    }

    #[tokio::test]
    async fn test_missing_dependency() {
        let tenant = TenantId::new();
        let resolver = DependencyResolver::new(Arc::new(InMemoryCapsuleRegistry::new()));
        let err = resolver
            .resolve(&tenant, "root", &["ghost@1.0.0".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, CompileError::DependencyNotFound { .. }));
    }

    #[tokio::test]
    async fn test_cycle_detected() {
        let tenant = TenantId::new();
        let registry = Arc::new(InMemoryCapsuleRegistry::new());
        registry
            .register(capsule(tenant, "a", "1.0.0", &["b@1.0.0"]))
            .await;
        registry
            .register(capsule(tenant, "b", "1.0.0", &["a@1.0.0"]))
            .await;

        let resolver = DependencyResolver::new(registry);
        let err = resolver
            .resolve(&tenant, "root", &["a@1.0.0".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, CompileError::CycleDetected { .. }));
    }

    #[tokio::test]
    async fn test_self_cycle_detected() {
        let tenant = TenantId::new();
        let registry = Arc::new(InMemoryCapsuleRegistry::new());
        registry
            .register(capsule(tenant, "root", "1.0.0", &[]))
            .await;

        let resolver = DependencyResolver::new(registry);
        let err = resolver
            .resolve(&tenant, "root", &["root@1.0.0".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, CompileError::CycleDetected { .. }));
    }

    #[tokio::test]
    async fn test_tenant_isolation() {
        let t1 = TenantId::new();
        let t2 = TenantId::new();
        let registry = Arc::new(InMemoryCapsuleRegistry::new());
        registry.register(capsule(t1, "shared", "1.0.0", &[])).await;

        let resolver = DependencyResolver::new(registry);
        let err = resolver
            .resolve(&t2, "root", &["shared@1.0.0".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, CompileError::DependencyNotFound { .. }));
    }
}
