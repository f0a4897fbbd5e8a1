//! Plan hashing
//!
//! `plan_hash = SHA-256(canonical(flows + tool_allowlist + security_context))`.
//! The hashed payload excludes metadata and anything time-dependent, so the
//! hash is identical across runs for the same compiled output.

use serde::Serialize;

use anumate_types::{ExecutionFlow, SecurityContext};

use crate::{CompileError, CompileResult};

#[derive(Serialize)]
struct HashedPayload<'a> {
    flows: &'a [ExecutionFlow],
    main_flow: &'a str,
    tool_allowlist: &'a [String],
    security_context: &'a SecurityContext,
}

/// Compute the deterministic plan hash
pub fn compute_plan_hash(
    flows: &[ExecutionFlow],
    main_flow: &str,
    tool_allowlist: &[String],
    security_context: &SecurityContext,
) -> CompileResult<String> {
    let payload = HashedPayload {
        flows,
        main_flow,
        tool_allowlist,
        security_context,
    };
    anumate_crypto::hash_canonical(&payload).map_err(|e| CompileError::Internal(e.to_string()))
}
