//! Tool protocol client
//!
//! Tools live behind the external agent runtime's streaming tool protocol.
//! Each session negotiates a protocol version before invoking; every call
//! carries the run's capability token and a bounded deadline. The runtime is
//! a trait so that tests (and explicitly configured demo deployments) can
//! substitute a simulated implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use anumate_types::{RunId, TenantId};

/// Tool invocation errors, classified for retry decisions
#[derive(Debug, Error)]
pub enum ToolError {
    /// Network-level failure or 5xx from the runtime; retryable
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The call exceeded its deadline; retryable for idempotent steps
    #[error("Tool call timed out after {0:?}")]
    Timeout(Duration),

    /// The runtime rejected the call; not retryable
    #[error("Tool rejected the call: {0}")]
    Rejected(String),

    /// Version negotiation failed; not retryable
    #[error("Protocol negotiation failed: {0}")]
    Negotiation(String),
}

impl ToolError {
    /// Whether a retry may help
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}

pub type ToolResult<T> = Result<T, ToolError>;

/// Negotiated protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// One tool invocation
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub tenant_id: TenantId,
    pub run_id: RunId,
    pub step_id: String,
    pub tool: String,
    pub action: Option<String>,
    pub parameters: serde_json::Value,
    /// Bearer capability token; present on every call
    pub capability_token: String,
    /// Bounded deadline propagated from the run's budget
    pub deadline: Duration,
    /// Idempotency key passed through to the tool when the step itself is
    /// not idempotent but the protocol supports safe retry
    pub idempotency_key: Option<String>,
}

/// Result of a tool invocation
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub output: serde_json::Value,
    pub protocol: ProtocolVersion,
}

/// The remote tool runtime
#[async_trait]
pub trait ToolRuntime: Send + Sync {
    /// Negotiate the protocol version for a session
    async fn negotiate(&self) -> ToolResult<ProtocolVersion>;

    /// Invoke a tool. Implementations honor `call.deadline`.
    async fn invoke(&self, call: &ToolCall) -> ToolResult<ToolOutcome>;

    /// Best-effort cancellation of an in-flight call. Runtimes without
    /// protocol-level cancellation return Ok and the orchestrator abandons
    /// the response instead.
    async fn cancel(&self, run_id: &RunId, step_id: &str) -> ToolResult<()>;
}

/// Scripted failure behavior for one tool in the simulated runtime
#[derive(Debug, Clone, Default)]
pub struct SimulatedBehavior {
    /// Fail this many calls with a transport error before succeeding
    pub fail_first: u32,
    /// Always reject (non-retryable)
    pub reject: bool,
    /// Artificial latency per call
    pub latency: Duration,
}

/// Simulated tool runtime.
///
/// Used by tests, and available to demo deployments through explicit
/// configuration only; the orchestrator never falls back to it on failure.
pub struct SimulatedRuntime {
    version: ProtocolVersion,
    behaviors: Mutex<HashMap<String, SimulatedBehavior>>,
    attempts: Mutex<HashMap<String, u32>>,
    calls: Arc<Mutex<Vec<ToolCall>>>,
    cancelled: Mutex<Vec<(RunId, String)>>,
}

impl SimulatedRuntime {
    pub fn new() -> Self {
        Self {
            version: ProtocolVersion { major: 1, minor: 2 },
            behaviors: Mutex::new(HashMap::new()),
            attempts: Mutex::new(HashMap::new()),
            calls: Arc::new(Mutex::new(Vec::new())),
            cancelled: Mutex::new(Vec::new()),
        }
    }

    /// Script behavior for a tool
    pub async fn set_behavior(&self, tool: &str, behavior: SimulatedBehavior) {
        self.behaviors.lock().await.insert(tool.to_string(), behavior);
    }

    /// All calls observed so far
    pub async fn calls(&self) -> Vec<ToolCall> {
        self.calls.lock().await.clone()
    }

    /// Cancellations received
    pub async fn cancellations(&self) -> Vec<(RunId, String)> {
        self.cancelled.lock().await.clone()
    }
}

impl Default for SimulatedRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolRuntime for SimulatedRuntime {
    async fn negotiate(&self) -> ToolResult<ProtocolVersion> {
        Ok(self.version)
    }

    async fn invoke(&self, call: &ToolCall) -> ToolResult<ToolOutcome> {
        if call.capability_token.is_empty() {
            return Err(ToolError::Rejected("missing capability token".to_string()));
        }
        self.calls.lock().await.push(call.clone());

        let behavior = self
            .behaviors
            .lock()
            .await
            .get(&call.tool)
            .cloned()
            .unwrap_or_default();

        if behavior.latency > Duration::ZERO {
            if behavior.latency >= call.deadline {
                return Err(ToolError::Timeout(call.deadline));
            }
            tokio::time::sleep(behavior.latency).await;
        }

        if behavior.reject {
            return Err(ToolError::Rejected(format!(
                "tool '{}' refused the request",
                call.tool
            )));
        }

        let mut attempts = self.attempts.lock().await;
        let count = attempts.entry(format!("{}:{}", call.run_id, call.step_id)).or_insert(0);
        *count += 1;
        if *count <= behavior.fail_first {
            return Err(ToolError::Transport(format!(
                "simulated transport failure {count}/{}",
                behavior.fail_first
            )));
        }

        Ok(ToolOutcome {
            output: serde_json::json!({
                "tool": call.tool,
                "step": call.step_id,
                "status": "ok",
            }),
            protocol: self.version,
        })
    }

    async fn cancel(&self, run_id: &RunId, step_id: &str) -> ToolResult<()> {
        self.cancelled
            .lock()
            .await
            .push((*run_id, step_id.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(tool: &str) -> ToolCall {
        ToolCall {
            tenant_id: TenantId::new(),
            run_id: RunId::new(),
            step_id: "s1".into(),
            tool: tool.into(),
            action: None,
            parameters: serde_json::json!({}),
            capability_token: "tok".into(),
            deadline: Duration::from_secs(5),
            idempotency_key: None,
        }
    }

    #[tokio::test]
    async fn test_negotiate_then_invoke() {
        let runtime = SimulatedRuntime::new();
        let version = runtime.negotiate().await.unwrap();
        assert_eq!(version.to_string(), "1.2");

        let outcome = runtime.invoke(&call("http")).await.unwrap();
        assert_eq!(outcome.protocol, version);
        assert_eq!(outcome.output["status"], "ok");
    }

    #[tokio::test]
    async fn test_missing_token_rejected() {
        let runtime = SimulatedRuntime::new();
        let mut c = call("http");
        c.capability_token = String::new();
        assert!(matches!(
            runtime.invoke(&c).await.unwrap_err(),
            ToolError::Rejected(_)
        ));
    }

    #[tokio::test]
    async fn test_fail_first_then_succeed() {
        let runtime = SimulatedRuntime::new();
        runtime
            .set_behavior(
                "flaky",
                SimulatedBehavior {
                    fail_first: 2,
                    ..Default::default()
                },
            )
            .await;

        let c = call("flaky");
        assert!(runtime.invoke(&c).await.is_err());
        assert!(runtime.invoke(&c).await.is_err());
        assert!(runtime.invoke(&c).await.is_ok());
    }

    #[test]
    fn test_retryability_classification() {
        assert!(ToolError::Transport("x".into()).is_retryable());
        assert!(ToolError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!ToolError::Rejected("x".into()).is_retryable());
        assert!(!ToolError::Negotiation("x".into()).is_retryable());
    }
}
