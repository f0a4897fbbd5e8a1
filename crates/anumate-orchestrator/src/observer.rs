//! Execution lifecycle observers
//!
//! Observers are registered at startup and notified at run lifecycle
//! points. They replace ad-hoc pre/post hooks; a failing observer is logged
//! and never fails the run.

use async_trait::async_trait;

use anumate_types::{ExecutionRun, RunStatus};

/// Lifecycle observer interface
#[async_trait]
pub trait ExecutionObserver: Send + Sync {
    /// The run entered `Running`
    async fn on_started(&self, run: &ExecutionRun) {
        let _ = run;
    }

    /// A step finished (successfully or not)
    async fn on_step_completed(&self, run: &ExecutionRun, step_id: &str, success: bool) {
        let _ = (run, step_id, success);
    }

    /// An approval was opened for the run
    async fn on_approval_requested(&self, run: &ExecutionRun) {
        let _ = run;
    }

    /// The run reached a terminal state
    async fn on_completed(&self, run: &ExecutionRun, status: RunStatus) {
        let _ = (run, status);
    }
}

/// Observer that emits structured log lines
pub struct LoggingObserver;

#[async_trait]
impl ExecutionObserver for LoggingObserver {
    async fn on_started(&self, run: &ExecutionRun) {
        tracing::info!(run_id = %run.run_id, plan_hash = %run.plan_hash, "Execution started");
    }

    async fn on_step_completed(&self, run: &ExecutionRun, step_id: &str, success: bool) {
        tracing::info!(run_id = %run.run_id, step_id = step_id, success = success, "Step completed");
    }

    async fn on_approval_requested(&self, run: &ExecutionRun) {
        tracing::info!(run_id = %run.run_id, "Approval requested");
    }

    async fn on_completed(&self, run: &ExecutionRun, status: RunStatus) {
        tracing::info!(run_id = %run.run_id, status = %status, "Execution completed");
    }
}
