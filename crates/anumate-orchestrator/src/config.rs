//! Orchestrator configuration
//!
//! A single immutable value built at startup; no runtime mutation.

use anumate_types::RetryPolicy;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Concurrent run bound per tenant; submissions past it get ServiceBusy
    pub max_concurrent_runs_per_tenant: usize,
    /// Retry policy for idempotent tool calls
    pub retry: RetryPolicy,
    /// How often the approval bridge is polled, in milliseconds
    pub approval_poll_interval_ms: u64,
    /// How long a run waits on an approval before giving up, in seconds
    pub approval_timeout_secs: u64,
    /// Default approval deadline handed to the bridge, in seconds
    pub approval_deadline_secs: u64,
    /// Idempotency record lifetime, in hours; at least 24
    pub idempotency_ttl_hours: u64,
    /// Seconds added to the estimated duration when sizing the capability
    /// token TTL (capped at the 300 second bound)
    pub token_ttl_margin_secs: u64,
    /// Retry-after hint returned with ServiceBusy, in seconds
    pub busy_retry_after_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs_per_tenant: 32,
            retry: RetryPolicy::default(),
            approval_poll_interval_ms: 500,
            approval_timeout_secs: 3600,
            approval_deadline_secs: 3600,
            idempotency_ttl_hours: 24,
            token_ttl_margin_secs: 60,
            busy_retry_after_secs: 5,
        }
    }
}

impl OrchestratorConfig {
    /// Clamp fields to their specified bounds
    pub fn validated(mut self) -> Self {
        self.idempotency_ttl_hours = self.idempotency_ttl_hours.max(24);
        self.approval_poll_interval_ms = self.approval_poll_interval_ms.clamp(50, 1_000);
        self.max_concurrent_runs_per_tenant = self.max_concurrent_runs_per_tenant.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validated_enforces_floors() {
        let config = OrchestratorConfig {
            idempotency_ttl_hours: 1,
            approval_poll_interval_ms: 5_000,
            max_concurrent_runs_per_tenant: 0,
            ..Default::default()
        }
        .validated();

        assert_eq!(config.idempotency_ttl_hours, 24);
        assert_eq!(config.approval_poll_interval_ms, 1_000);
        assert_eq!(config.max_concurrent_runs_per_tenant, 1);
    }
}
