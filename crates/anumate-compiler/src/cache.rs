//! Compiled plan cache
//!
//! Read-mostly, write-on-miss. Plans are keyed by their content hash, so a
//! cache hit is an O(1) map lookup and writes deduplicate by construction.
//! Entries carry tags for targeted invalidation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use anumate_types::{ExecutablePlan, TenantId};

/// In-memory, tag-aware plan cache
#[derive(Default)]
pub struct PlanCache {
    plans: RwLock<HashMap<(TenantId, String), CacheEntry>>,
}

struct CacheEntry {
    plan: Arc<ExecutablePlan>,
    tags: HashSet<String>,
}

impl PlanCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a plan by hash, tenant-scoped
    pub async fn get(&self, tenant_id: &TenantId, plan_hash: &str) -> Option<Arc<ExecutablePlan>> {
        let plans = self.plans.read().await;
        plans
            .get(&(*tenant_id, plan_hash.to_string()))
            .map(|e| Arc::clone(&e.plan))
    }

    /// Insert a plan under its hash. A plan already present under the same
    /// hash is left untouched; identical hashes imply identical content.
    pub async fn put(&self, plan: Arc<ExecutablePlan>, tags: Vec<String>) {
        let key = (plan.tenant_id, plan.plan_hash.clone());
        let mut plans = self.plans.write().await;
        plans.entry(key).or_insert_with(|| CacheEntry {
            plan,
            tags: tags.into_iter().collect(),
        });
    }

    /// Drop every entry carrying the tag. Returns the number removed.
    pub async fn invalidate_by_tag(&self, tenant_id: &TenantId, tag: &str) -> usize {
        let mut plans = self.plans.write().await;
        let before = plans.len();
        plans.retain(|(t, _), entry| t != tenant_id || !entry.tags.contains(tag));
        before - plans.len()
    }

    /// Number of cached plans
    pub async fn len(&self) -> usize {
        self.plans.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.plans.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anumate_types::{PlanMetadata, SecurityContext};

    fn plan(tenant: TenantId, hash: &str) -> Arc<ExecutablePlan> {
        Arc::new(ExecutablePlan {
            plan_hash: hash.to_string(),
            tenant_id: tenant,
            name: "demo".into(),
            version: "1.0.0".into(),
            flows: vec![],
            main_flow: "main".into(),
            tool_allowlist: vec![],
            security_context: SecurityContext::default(),
            metadata: PlanMetadata {
                source_capsule_name: "demo".into(),
                source_capsule_version: "1.0.0".into(),
                source_capsule_checksum: "c".into(),
                compiler_version: "1.0.0".into(),
                resolved_dependencies: vec![],
                optimization_level: "standard".into(),
            },
        })
    }

    #[tokio::test]
    async fn test_get_after_put() {
        let cache = PlanCache::new();
        let tenant = TenantId::new();
        cache
            .put(plan(tenant, "h1"), vec!["capsule:demo".into()])
            .await;

        assert!(cache.get(&tenant, "h1").await.is_some());
        assert!(cache.get(&tenant, "h2").await.is_none());
    }

    #[tokio::test]
    async fn test_tenant_scoping() {
        let cache = PlanCache::new();
        let t1 = TenantId::new();
        let t2 = TenantId::new();
        cache.put(plan(t1, "h1"), vec![]).await;

        assert!(cache.get(&t1, "h1").await.is_some());
        assert!(cache.get(&t2, "h1").await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_by_tag() {
        let cache = PlanCache::new();
        let tenant = TenantId::new();
        cache
            .put(plan(tenant, "h1"), vec!["capsule:demo".into()])
            .await;
        cache
            .put(plan(tenant, "h2"), vec!["capsule:other".into()])
            .await;

        assert_eq!(cache.invalidate_by_tag(&tenant, "capsule:demo").await, 1);
        assert!(cache.get(&tenant, "h1").await.is_none());
        assert!(cache.get(&tenant, "h2").await.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_put_is_deduplicated() {
        let cache = PlanCache::new();
        let tenant = TenantId::new();
        cache.put(plan(tenant, "h1"), vec![]).await;
        cache.put(plan(tenant, "h1"), vec![]).await;
        assert_eq!(cache.len().await, 1);
    }
}
