//! Async compilation jobs
//!
//! Large capsules compile off the request path. `submit` returns a job id
//! immediately; `status` reports Queued, Running, Completed or Failed.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use anumate_types::{CapsuleDefinition, CompileJobId, TenantId};

use crate::{CompilationResult, CompileError, CompileResult, OptimizationLevel, PlanCompiler};

/// Status of an async compile job
#[derive(Debug, Clone)]
pub enum JobStatus {
    Queued,
    Running,
    Completed(CompilationResult),
    Failed(String),
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed(_) => "completed",
            Self::Failed(_) => "failed",
        }
    }
}

/// Tracks async compilation jobs
pub struct CompileJobs {
    compiler: Arc<PlanCompiler>,
    jobs: Arc<RwLock<HashMap<CompileJobId, (TenantId, JobStatus)>>>,
}

impl CompileJobs {
    pub fn new(compiler: Arc<PlanCompiler>) -> Self {
        Self {
            compiler,
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Submit a compilation job, returning immediately with its id
    pub async fn submit(
        &self,
        tenant_id: TenantId,
        definition: CapsuleDefinition,
        level: OptimizationLevel,
    ) -> CompileJobId {
        let job_id = CompileJobId::new();
        self.jobs
            .write()
            .await
            .insert(job_id, (tenant_id, JobStatus::Queued));

        let compiler = Arc::clone(&self.compiler);
        let jobs = Arc::clone(&self.jobs);
        tokio::spawn(async move {
            {
                let mut guard = jobs.write().await;
                if let Some(entry) = guard.get_mut(&job_id) {
                    entry.1 = JobStatus::Running;
                }
            }
            let outcome = compiler.compile(tenant_id, &definition, level).await;
            let mut guard = jobs.write().await;
            if let Some(entry) = guard.get_mut(&job_id) {
                entry.1 = match outcome {
                    Ok(result) => JobStatus::Completed(result),
                    Err(e) => JobStatus::Failed(e.to_string()),
                };
            }
        });

        job_id
    }

    /// Status of a job, tenant-scoped
    pub async fn status(
        &self,
        tenant_id: &TenantId,
        job_id: &CompileJobId,
    ) -> CompileResult<JobStatus> {
        let jobs = self.jobs.read().await;
        match jobs.get(job_id) {
            Some((owner, status)) if owner == tenant_id => Ok(status.clone()),
            _ => Err(CompileError::JobNotFound {
                job_id: job_id.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryCapsuleRegistry, PlanCache};
    use anumate_types::{AutomationSpec, CapsuleStep};

    fn definition() -> CapsuleDefinition {
        CapsuleDefinition {
            name: "demo".to_string(),
            version: "1.0.0".to_string(),
            description: None,
            automation: AutomationSpec {
                steps: vec![CapsuleStep {
                    name: "a".to_string(),
                    tool: "http".to_string(),
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
            dependencies: vec![],
            metadata: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_submit_and_poll_to_completion() {
        let compiler = Arc::new(PlanCompiler::new(
            Arc::new(InMemoryCapsuleRegistry::new()),
            Arc::new(PlanCache::new()),
        ));
        let jobs = CompileJobs::new(compiler);
        let tenant = TenantId::new();

        let job_id = jobs
            .submit(tenant, definition(), OptimizationLevel::Standard)
            .await;

        // Poll until the spawned task settles
        for _ in 0..100 {
            match jobs.status(&tenant, &job_id).await.unwrap() {
                JobStatus::Completed(result) => {
                    assert_eq!(result.plan_hash.len(), 64);
                    return;
                }
                JobStatus::Failed(e) => panic!("job failed: {e}"),
                _ => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
            }
        }
        panic!("job did not complete");
    }

    #[tokio::test]
    async fn test_status_is_tenant_scoped() {
        let compiler = Arc::new(PlanCompiler::new(
            Arc::new(InMemoryCapsuleRegistry::new()),
            Arc::new(PlanCache::new()),
        ));
        let jobs = CompileJobs::new(compiler);
        let tenant = TenantId::new();
        let job_id = jobs
            .submit(tenant, definition(), OptimizationLevel::Standard)
            .await;

        let err = jobs.status(&TenantId::new(), &job_id).await.unwrap_err();
        assert!(matches!(err, CompileError::JobNotFound { .. }));
    }
}
