//! The run actor
//!
//! One cooperative task per run owns every state transition. Commands
//! (pause, resume, cancel) are consumed at suspension points: between steps,
//! while waiting on approvals, and during outstanding tool calls.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use anumate_types::{
    subjects, Clarification, ClarificationId, ExecutablePlan, ReceiptPayload, RunId, RunStatus,
    TenantId,
};

use crate::{
    with_retry, BridgeDecision, ExecutionRequest, ExecutionResponse, OrchestratorResult,
    RunCommand, RunUpdate, Shared, ToolCall, ToolError,
};

/// Control flow outcome of a suspension point
enum Ctl {
    Continue,
    Cancelled,
}

/// Entry point for a spawned run actor
pub(crate) async fn drive(
    shared: Arc<Shared>,
    tenant_id: TenantId,
    run_id: RunId,
    request: ExecutionRequest,
    mut rx: mpsc::UnboundedReceiver<RunCommand>,
) {
    if let Err(e) = lifecycle(&shared, tenant_id, run_id, &request, &mut rx).await {
        tracing::error!(run_id = %run_id, error = %e, "Run actor failed");
        // Best effort: leave the run terminal so it cannot wedge
        let _ = fail(&shared, tenant_id, run_id, &request.plan_hash, e.to_string()).await;
    }

    shared.handles.write().await.remove(&run_id);

    // Finalize the idempotency record with the terminal response
    if let Some(key) = &request.idempotency_key {
        if let Ok(Some(run)) = shared.runs.get(&tenant_id, &run_id).await {
            if run.status.is_terminal() {
                let response = ExecutionResponse {
                    run_id: run.run_id,
                    status: run.status,
                    receipt_id: run.receipt_id,
                    correlation_id: run.correlation_id.clone(),
                    cached: false,
                };
                if let Ok(value) = serde_json::to_value(&response) {
                    let _ = shared.idempotency.finalize(&tenant_id, key, value).await;
                }
            }
        }
    }
}

async fn lifecycle(
    shared: &Arc<Shared>,
    tenant_id: TenantId,
    run_id: RunId,
    request: &ExecutionRequest,
    rx: &mut mpsc::UnboundedReceiver<RunCommand>,
) -> OrchestratorResult<()> {
    shared
        .runs
        .update(&tenant_id, &run_id, RunUpdate::status(RunStatus::Validating))
        .await?;

    // Resolve the plan: inline (hash re-verified) or by hash
    let plan = match resolve_plan(shared, &tenant_id, request).await {
        Ok(plan) => plan,
        Err(e) => {
            return fail(shared, tenant_id, run_id, &request.plan_hash, e.to_string()).await;
        }
    };

    // Approval gate
    if request.require_approval || plan.requires_approval() {
        match await_approval(shared, tenant_id, run_id, request, &plan, rx).await? {
            ApprovalOutcome::Approved => {}
            ApprovalOutcome::Denied(reason) => {
                return fail(shared, tenant_id, run_id, &plan.plan_hash, reason).await;
            }
            ApprovalOutcome::Cancelled => {
                return cancel(shared, tenant_id, run_id, &plan.plan_hash).await;
            }
        }
    }

    // Capability issuance scoped to the plan's tool allowlist,
    // TTL = min(estimated duration + margin, 300)
    let ttl = (plan.estimated_duration_secs() + shared.config.token_ttl_margin_secs)
        .clamp(1, anumate_types::MAX_TOKEN_TTL_SECS);
    let token = match shared
        .tokens
        .issue(
            tenant_id,
            &format!("run:{run_id}"),
            plan.security_context.required_capabilities.clone(),
            ttl,
            Some("anumate-orchestrator"),
        )
        .await
    {
        Ok(token) => token,
        Err(e) => {
            return fail(
                shared,
                tenant_id,
                run_id,
                &plan.plan_hash,
                format!("capability issuance failed: {e}"),
            )
            .await;
        }
    };
    shared
        .runs
        .update(
            &tenant_id,
            &run_id,
            RunUpdate {
                capability_token_jti: Some(token.token_id.clone()),
                ..Default::default()
            },
        )
        .await?;

    // Version negotiation precedes every session
    let protocol = match shared.runtime.negotiate().await {
        Ok(version) => version,
        Err(e) => {
            return fail(
                shared,
                tenant_id,
                run_id,
                &plan.plan_hash,
                format!("protocol negotiation failed: {e}"),
            )
            .await;
        }
    };
    tracing::debug!(run_id = %run_id, protocol = %protocol, "Tool protocol negotiated");

    let run = shared
        .runs
        .update(
            &tenant_id,
            &run_id,
            RunUpdate {
                status: Some(RunStatus::Running),
                mark_started: true,
                ..Default::default()
            },
        )
        .await?;
    publish_run_event(shared, &run, subjects::EXECUTION_STARTED, "started", None).await;
    for observer in &shared.observers {
        observer.on_started(&run).await;
    }

    // Execute steps. Parallelism exists across runs, not within one: steps
    // run sequentially in batch order.
    let total_steps = plan.step_count().max(1);
    let mut completed_steps = 0usize;
    let mut results = serde_json::Map::new();

    for flow in &plan.flows {
        for batch in &flow.parallel_batches {
            for step_id in batch {
                let Some(step) = flow.step(step_id) else {
                    return fail(
                        shared,
                        tenant_id,
                        run_id,
                        &plan.plan_hash,
                        format!("plan references unknown step '{step_id}'"),
                    )
                    .await;
                };

                match suspension_point(shared, &tenant_id, &run_id, rx, RunStatus::Running).await? {
                    Ctl::Continue => {}
                    Ctl::Cancelled => {
                        return cancel(shared, tenant_id, run_id, &plan.plan_hash).await;
                    }
                }

                let call = ToolCall {
                    tenant_id,
                    run_id,
                    step_id: step.step_id.clone(),
                    tool: step.tool.clone(),
                    action: step.action.clone(),
                    parameters: step.parameters.clone(),
                    capability_token: token.token.clone(),
                    deadline: Duration::from_secs(step.timeout_secs.max(1)),
                    idempotency_key: request.idempotency_key.clone(),
                };
                // Non-idempotent steps retry only when the tool protocol
                // received an idempotency key to deduplicate on
                let retry_safe = step.idempotent || call.idempotency_key.is_some();

                let mut pending_pause = false;
                let outcome = {
                    let runtime = Arc::clone(&shared.runtime);
                    let retry_policy = shared.config.retry;
                    let mut invoke = Box::pin(async move {
                        with_retry(&retry_policy, retry_safe, || {
                            let runtime = Arc::clone(&runtime);
                            let call = call.clone();
                            async move {
                                match tokio::time::timeout(call.deadline, runtime.invoke(&call))
                                    .await
                                {
                                    Ok(result) => result,
                                    Err(_) => Err(ToolError::Timeout(call.deadline)),
                                }
                            }
                        })
                        .await
                    });

                    loop {
                        tokio::select! {
                            result = &mut invoke => break result,
                            command = rx.recv() => match command {
                                Some(RunCommand::Cancel) => {
                                    // Protocol-level cancellation where the
                                    // runtime supports it; otherwise the
                                    // response is abandoned
                                    let _ = shared.runtime.cancel(&run_id, &step.step_id).await;
                                    return cancel(shared, tenant_id, run_id, &plan.plan_hash).await;
                                }
                                // The in-flight call completes; the pause
                                // takes effect at the next suspension point
                                Some(RunCommand::Pause) => pending_pause = true,
                                Some(RunCommand::Resume) => pending_pause = false,
                                None => {}
                            }
                        }
                    }
                };

                if pending_pause {
                    match pause_wait(shared, &tenant_id, &run_id, rx, RunStatus::Running).await? {
                        Ctl::Continue => {}
                        Ctl::Cancelled => {
                            return cancel(shared, tenant_id, run_id, &plan.plan_hash).await;
                        }
                    }
                }

                match outcome {
                    Ok(tool_outcome) => {
                        completed_steps += 1;
                        results.insert(step.step_id.clone(), tool_outcome.output);
                        let run = shared
                            .runs
                            .update(
                                &tenant_id,
                                &run_id,
                                RunUpdate {
                                    progress: Some(completed_steps as f64 / total_steps as f64),
                                    ..Default::default()
                                },
                            )
                            .await?;
                        for observer in &shared.observers {
                            observer.on_step_completed(&run, &step.step_id, true).await;
                        }
                    }
                    Err(e) => {
                        if let Ok(Some(run)) = shared.runs.get(&tenant_id, &run_id).await {
                            for observer in &shared.observers {
                                observer.on_step_completed(&run, &step.step_id, false).await;
                            }
                        }
                        return fail(
                            shared,
                            tenant_id,
                            run_id,
                            &plan.plan_hash,
                            format!("step '{}' failed: {e}", step.step_id),
                        )
                        .await;
                    }
                }
            }
        }
    }

    succeed(
        shared,
        tenant_id,
        run_id,
        &plan,
        serde_json::Value::Object(results),
        &token.token_id,
    )
    .await
}

async fn resolve_plan(
    shared: &Arc<Shared>,
    tenant_id: &TenantId,
    request: &ExecutionRequest,
) -> OrchestratorResult<Arc<ExecutablePlan>> {
    if let Some(inline) = &request.plan {
        // Preview→execute binding: the inline plan must hash to the
        // requested plan_hash
        let recomputed = anumate_compiler::compute_plan_hash(
            &inline.flows,
            &inline.main_flow,
            &inline.tool_allowlist,
            &inline.security_context,
        )
        .map_err(|e| crate::OrchestratorError::Validation(e.to_string()))?;
        if recomputed != request.plan_hash {
            return Err(crate::OrchestratorError::Validation(format!(
                "inline plan hashes to {recomputed}, request names {}",
                request.plan_hash
            )));
        }
        return Ok(Arc::new(inline.clone()));
    }

    shared
        .plans
        .resolve(tenant_id, &request.plan_hash)
        .await?
        .ok_or_else(|| crate::OrchestratorError::PlanNotFound {
            plan_hash: request.plan_hash.clone(),
        })
}

enum ApprovalOutcome {
    Approved,
    Denied(String),
    Cancelled,
}

async fn await_approval(
    shared: &Arc<Shared>,
    tenant_id: TenantId,
    run_id: RunId,
    request: &ExecutionRequest,
    plan: &ExecutablePlan,
    rx: &mut mpsc::UnboundedReceiver<RunCommand>,
) -> OrchestratorResult<ApprovalOutcome> {
    let run = shared
        .runs
        .update(
            &tenant_id,
            &run_id,
            RunUpdate::status(RunStatus::AwaitingApproval),
        )
        .await?;

    let clarification = Clarification {
        clarification_id: ClarificationId::new(),
        run_id,
        question: format!(
            "Execute plan '{}' version {} ({} steps)?",
            plan.name,
            plan.version,
            plan.step_count()
        ),
        step_id: plan
            .steps()
            .find(|s| s.requires_approval)
            .map(|s| s.step_id.clone()),
        context: serde_json::json!({
            "plan_hash": plan.plan_hash,
            "engine": request.engine,
        }),
    };

    let approvers = if request.approvers.is_empty() {
        vec!["tenant-admin".to_string()]
    } else {
        request.approvers.clone()
    };
    let approval_id = shared
        .approvals
        .open(
            tenant_id,
            clarification,
            approvers,
            shared.config.approval_deadline_secs,
        )
        .await?;

    let run = shared
        .runs
        .update(
            &tenant_id,
            &run_id,
            RunUpdate {
                push_approval_id: Some(approval_id),
                ..Default::default()
            },
        )
        .await?;
    publish_run_event(shared, &run, subjects::APPROVAL_REQUESTED, "requested", None).await;
    for observer in &shared.observers {
        observer.on_approval_requested(&run).await;
    }

    let poll_interval = Duration::from_millis(shared.config.approval_poll_interval_ms);
    let deadline = tokio::time::Instant::now()
        + Duration::from_secs(shared.config.approval_timeout_secs);

    loop {
        match suspension_point(shared, &tenant_id, &run_id, rx, RunStatus::AwaitingApproval)
            .await?
        {
            Ctl::Continue => {}
            Ctl::Cancelled => return Ok(ApprovalOutcome::Cancelled),
        }

        match shared.approvals.poll(&tenant_id, &approval_id).await? {
            BridgeDecision::Approved => {
                let run = shared.runs.get(&tenant_id, &run_id).await?.ok_or_else(|| {
                    crate::OrchestratorError::RunNotFound {
                        run_id: run_id.to_string(),
                    }
                })?;
                publish_run_event(shared, &run, subjects::APPROVAL_GRANTED, "granted", None).await;
                return Ok(ApprovalOutcome::Approved);
            }
            BridgeDecision::Rejected => {
                let run = shared.runs.get(&tenant_id, &run_id).await?.ok_or_else(|| {
                    crate::OrchestratorError::RunNotFound {
                        run_id: run_id.to_string(),
                    }
                })?;
                publish_run_event(shared, &run, subjects::APPROVAL_REJECTED, "rejected", None)
                    .await;
                return Ok(ApprovalOutcome::Denied("approval rejected".to_string()));
            }
            BridgeDecision::Expired => {
                return Ok(ApprovalOutcome::Denied("approval expired".to_string()));
            }
            BridgeDecision::Open => {}
        }

        if tokio::time::Instant::now() >= deadline {
            return Ok(ApprovalOutcome::Denied(
                "approval wait timed out".to_string(),
            ));
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Process pending commands. Pausing blocks here until resume or cancel.
async fn suspension_point(
    shared: &Arc<Shared>,
    tenant_id: &TenantId,
    run_id: &RunId,
    rx: &mut mpsc::UnboundedReceiver<RunCommand>,
    resume_to: RunStatus,
) -> OrchestratorResult<Ctl> {
    loop {
        match rx.try_recv() {
            Ok(RunCommand::Cancel) => return Ok(Ctl::Cancelled),
            Ok(RunCommand::Pause) => {
                match pause_wait(shared, tenant_id, run_id, rx, resume_to).await? {
                    Ctl::Continue => {}
                    Ctl::Cancelled => return Ok(Ctl::Cancelled),
                }
            }
            Ok(RunCommand::Resume) => {}
            Err(mpsc::error::TryRecvError::Empty)
            | Err(mpsc::error::TryRecvError::Disconnected) => return Ok(Ctl::Continue),
        }
    }
}

/// Enter `Paused` and block until resume or cancel
async fn pause_wait(
    shared: &Arc<Shared>,
    tenant_id: &TenantId,
    run_id: &RunId,
    rx: &mut mpsc::UnboundedReceiver<RunCommand>,
    resume_to: RunStatus,
) -> OrchestratorResult<Ctl> {
    shared
        .runs
        .update(tenant_id, run_id, RunUpdate::status(RunStatus::Paused))
        .await?;
    loop {
        match rx.recv().await {
            Some(RunCommand::Resume) => {
                shared
                    .runs
                    .update(tenant_id, run_id, RunUpdate::status(resume_to))
                    .await?;
                return Ok(Ctl::Continue);
            }
            Some(RunCommand::Cancel) => return Ok(Ctl::Cancelled),
            Some(RunCommand::Pause) => {}
            None => return Ok(Ctl::Continue),
        }
    }
}

async fn succeed(
    shared: &Arc<Shared>,
    tenant_id: TenantId,
    run_id: RunId,
    plan: &ExecutablePlan,
    results: serde_json::Value,
    token_jti: &str,
) -> OrchestratorResult<()> {
    let run = shared
        .runs
        .update(
            &tenant_id,
            &run_id,
            RunUpdate {
                status: Some(RunStatus::Succeeded),
                progress: Some(1.0),
                results: Some(results.clone()),
                mark_completed: true,
                ..Default::default()
            },
        )
        .await?;

    let receipt_id = emit_receipt(shared, &run, Some(token_jti)).await;
    let run = match receipt_id {
        Some(receipt_id) => {
            shared
                .runs
                .update(
                    &tenant_id,
                    &run_id,
                    RunUpdate {
                        receipt_id: Some(receipt_id),
                        ..Default::default()
                    },
                )
                .await?
        }
        None => run,
    };

    publish_run_event(
        shared,
        &run,
        subjects::EXECUTION_COMPLETED,
        "completed",
        run.receipt_id.map(|r| r.to_string()),
    )
    .await;
    for observer in &shared.observers {
        observer.on_completed(&run, RunStatus::Succeeded).await;
    }
    tracing::info!(run_id = %run_id, plan_hash = %plan.plan_hash, "Run succeeded");
    Ok(())
}

async fn fail(
    shared: &Arc<Shared>,
    tenant_id: TenantId,
    run_id: RunId,
    plan_hash: &str,
    error: String,
) -> OrchestratorResult<()> {
    let Ok(run) = shared
        .runs
        .update(
            &tenant_id,
            &run_id,
            RunUpdate {
                status: Some(RunStatus::Failed),
                error: Some(error.clone()),
                mark_completed: true,
                ..Default::default()
            },
        )
        .await
    else {
        // Already terminal; nothing more to record
        return Ok(());
    };

    let receipt_id = emit_receipt(shared, &run, run.capability_token_jti.as_deref()).await;
    let run = match receipt_id {
        Some(receipt_id) => shared
            .runs
            .update(
                &tenant_id,
                &run_id,
                RunUpdate {
                    receipt_id: Some(receipt_id),
                    ..Default::default()
                },
            )
            .await
            .unwrap_or(run),
        None => run,
    };

    publish_run_event(shared, &run, subjects::EXECUTION_FAILED, "failed", None).await;
    for observer in &shared.observers {
        observer.on_completed(&run, RunStatus::Failed).await;
    }
    tracing::warn!(run_id = %run_id, plan_hash = plan_hash, error = %error, "Run failed");
    Ok(())
}

async fn cancel(
    shared: &Arc<Shared>,
    tenant_id: TenantId,
    run_id: RunId,
    plan_hash: &str,
) -> OrchestratorResult<()> {
    let run = shared
        .runs
        .update(
            &tenant_id,
            &run_id,
            RunUpdate {
                status: Some(RunStatus::Cancelled),
                mark_completed: true,
                ..Default::default()
            },
        )
        .await?;

    let receipt_id = emit_receipt(shared, &run, run.capability_token_jti.as_deref()).await;
    let run = match receipt_id {
        Some(receipt_id) => shared
            .runs
            .update(
                &tenant_id,
                &run_id,
                RunUpdate {
                    receipt_id: Some(receipt_id),
                    ..Default::default()
                },
            )
            .await
            .unwrap_or(run),
        None => run,
    };

    publish_run_event(shared, &run, subjects::EXECUTION_CANCELLED, "cancelled", None).await;
    for observer in &shared.observers {
        observer.on_completed(&run, RunStatus::Cancelled).await;
    }
    tracing::info!(run_id = %run_id, plan_hash = plan_hash, "Run cancelled");
    Ok(())
}

/// Create the signed receipt for a terminal run. The receipt carries the
/// exact plan hash the run executed; it is the contract that the executed
/// work matches the previewed plan.
async fn emit_receipt(
    shared: &Arc<Shared>,
    run: &anumate_types::ExecutionRun,
    token_jti: Option<&str>,
) -> Option<anumate_types::ReceiptId> {
    let results_digest = anumate_crypto::hash_canonical(&run.results).ok()?;
    let payload = ReceiptPayload {
        run_id: run.run_id,
        plan_hash: run.plan_hash.clone(),
        tenant_id: run.tenant_id,
        status: run.status,
        results_digest,
        started_at: run.started_at.unwrap_or(run.created_at),
        completed_at: run.completed_at.unwrap_or_else(chrono::Utc::now),
        capability_token_jti: token_jti.map(|s| s.to_string()),
    };
    match shared.receipts.create(payload).await {
        Ok(receipt) => Some(receipt.receipt_id),
        Err(e) => {
            tracing::error!(run_id = %run.run_id, error = %e, "Receipt emission failed");
            None
        }
    }
}

async fn publish_run_event(
    shared: &Arc<Shared>,
    run: &anumate_types::ExecutionRun,
    subject: &str,
    phase: &str,
    receipt_id: Option<String>,
) {
    let domain = subject.rsplit('.').nth(1).unwrap_or("execution");
    let event_type = format!("com.anumate.{domain}.{phase}");
    let mut data = serde_json::json!({
        "tenant_id": run.tenant_id,
        "run_id": run.run_id,
        "plan_hash": run.plan_hash,
        "correlation_id": run.correlation_id,
        "occurred_at": chrono::Utc::now(),
        "status": run.status,
    });
    if let Some(receipt_id) = receipt_id {
        data["receipt_id"] = serde_json::Value::String(receipt_id);
    }

    if let Err(e) = shared
        .events
        .publish(
            subject,
            &event_type,
            run.tenant_id,
            Some(run.run_id.to_string()),
            data,
        )
        .await
    {
        tracing::warn!(subject = subject, error = %e, "Event publish failed");
    }
}
