//! Application state shared across handlers
//!
//! Explicit dependency injection: every component receives its
//! collaborators at construction; there are no process-wide singletons.

use std::sync::Arc;

use async_trait::async_trait;

use anumate_approvals::ApprovalsService;
use anumate_captokens::TokenService;
use anumate_compiler::{CompileJobs, InMemoryCapsuleRegistry, PlanCache, PlanCompiler};
use anumate_events::EventPublisher;
use anumate_ghostrun::GhostRunService;
use anumate_orchestrator::{Orchestrator, OrchestratorResult, PlanResolver};
use anumate_receipts::ReceiptService;
use anumate_types::{ExecutablePlan, TenantId};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<TokenService>,
    pub compiler: Arc<PlanCompiler>,
    pub compile_jobs: Arc<CompileJobs>,
    pub plan_cache: Arc<PlanCache>,
    pub ghostrun: Arc<GhostRunService>,
    pub approvals: Arc<ApprovalsService>,
    pub receipts: Arc<ReceiptService>,
    pub orchestrator: Orchestrator,
    pub events: Arc<EventPublisher>,
    /// Development capsule registry; production deployments wire the real
    /// registry collaborator here
    pub registry: Arc<InMemoryCapsuleRegistry>,
}

/// Plan resolver backed by the compiler's plan cache
pub struct CachePlanResolver {
    cache: Arc<PlanCache>,
}

impl CachePlanResolver {
    pub fn new(cache: Arc<PlanCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl PlanResolver for CachePlanResolver {
    async fn resolve(
        &self,
        tenant_id: &TenantId,
        plan_hash: &str,
    ) -> OrchestratorResult<Option<Arc<ExecutablePlan>>> {
        Ok(self.cache.get(tenant_id, plan_hash).await)
    }
}
