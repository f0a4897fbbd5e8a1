//! Request and response bodies for the /v1 surface

use serde::{Deserialize, Serialize};

use anumate_types::{
    ApprovalSummary, CapsuleDefinition, ExecutablePlan, Receipt, ReceiptPayload, RunStatus,
};

// ============================================================================
// Capability tokens
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct IssueTokenRequest {
    pub subject: String,
    pub capabilities: Vec<String>,
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,
}

fn default_ttl() -> u64 {
    300
}

#[derive(Debug, Serialize)]
pub struct IssueTokenResponse {
    pub token: String,
    pub jti: String,
    pub exp: i64,
}

#[derive(Debug, Deserialize)]
pub struct VerifyTokenRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyTokenResponse {
    pub valid: bool,
    pub claims: anumate_types::CapabilityClaims,
}

#[derive(Debug, Deserialize)]
pub struct RefreshTokenRequest {
    pub token: String,
    #[serde(default)]
    pub new_ttl: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct RevokeTokenRequest {
    pub token_id: String,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    pub fn ok() -> Self {
        Self { ok: true }
    }
}

// ============================================================================
// Capsules and compilation
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RegisterCapsuleRequest {
    /// Capsule definition as YAML text, or structured JSON
    #[serde(default)]
    pub yaml: Option<String>,
    #[serde(default)]
    pub definition: Option<CapsuleDefinition>,
}

#[derive(Debug, Serialize)]
pub struct RegisterCapsuleResponse {
    pub capsule_id: String,
    pub name: String,
    pub version: String,
    pub checksum: String,
}

#[derive(Debug, Deserialize)]
pub struct CompileRequest {
    #[serde(default)]
    pub yaml: Option<String>,
    #[serde(default)]
    pub definition: Option<CapsuleDefinition>,
    /// `none` or `standard`
    #[serde(default)]
    pub optimization_level: Option<String>,
    /// Compile asynchronously, returning a job id
    #[serde(default)]
    pub r#async: bool,
}

#[derive(Debug, Serialize)]
pub struct CompileResponse {
    pub plan_hash: String,
    pub compiled_plan: ExecutablePlan,
    pub warnings: Vec<String>,
    pub resolved_dependencies: Vec<String>,
    pub cached: bool,
}

#[derive(Debug, Serialize)]
pub struct CompileJobResponse {
    pub job_id: String,
    pub status: String,
}

// ============================================================================
// GhostRun
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct GhostRunRequest {
    pub plan_hash: String,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct GhostRunResponse {
    pub run_id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct GhostRunStatusResponse {
    pub run_id: String,
    pub status: String,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Execution
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub plan_hash: String,
    #[serde(default)]
    pub plan: Option<ExecutablePlan>,
    pub engine: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub require_approval: bool,
    #[serde(default)]
    pub approvers: Vec<String>,
    /// Body-level idempotency key; the `Idempotency-Key` header wins
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub run_id: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_id: Option<String>,
    pub correlation_id: String,
    pub cached: bool,
}

#[derive(Debug, Serialize)]
pub struct ExecutionStatusResponse {
    pub run_id: String,
    pub status: RunStatus,
    pub progress: f64,
    pub plan_hash: String,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub results: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_id: Option<String>,
    pub approval_ids: Vec<String>,
}

// ============================================================================
// Approvals
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateApprovalRequest {
    pub run_id: String,
    pub question: String,
    pub approvers: Vec<String>,
    #[serde(default = "default_deadline")]
    pub deadline_secs: u64,
    /// `any` (default) or `all`
    #[serde(default)]
    pub quorum: Option<String>,
    #[serde(default)]
    pub escalate_to: Vec<String>,
    #[serde(default)]
    pub escalation_extension_secs: u64,
}

fn default_deadline() -> u64 {
    3600
}

#[derive(Debug, Serialize)]
pub struct CreateApprovalResponse {
    pub approval_id: String,
}

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub actor: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DelegateRequest {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ApprovalResponse {
    #[serde(flatten)]
    pub summary: ApprovalSummary,
}

// ============================================================================
// Receipts
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateReceiptRequest {
    pub payload: ReceiptPayload,
}

#[derive(Debug, Serialize)]
pub struct CreateReceiptResponse {
    pub receipt_id: String,
    pub content_hash: String,
    pub signature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prior_receipt_hash: Option<String>,
}

impl From<&Receipt> for CreateReceiptResponse {
    fn from(receipt: &Receipt) -> Self {
        Self {
            receipt_id: receipt.receipt_id.to_string(),
            content_hash: receipt.content_hash.clone(),
            signature: receipt.signature.clone(),
            prior_receipt_hash: receipt.prior_receipt_hash.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    100
}
