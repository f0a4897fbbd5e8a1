//! API integration tests against in-memory collaborators

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use anumate_api::{create_test_router, AppState, CachePlanResolver};
use anumate_approvals::ApprovalsService;
use anumate_captokens::{
    InMemoryReplayGuard, InMemoryTokenAuditLog, InMemoryTokenStore, TokenConfig, TokenService,
};
use anumate_compiler::{CompileJobs, InMemoryCapsuleRegistry, PlanCache, PlanCompiler};
use anumate_crypto::Keypair;
use anumate_events::{EventBus, EventPublisher, EventSink, StreamConfig};
use anumate_ghostrun::{GhostRunService, MockToolRegistry, SimulationEngine};
use anumate_orchestrator::{
    InMemoryIdempotencyStore, InMemoryRunStore, Orchestrator, OrchestratorConfig,
    SimulatedRuntime, WorkflowApprovalsBridge,
};
use anumate_receipts::{InMemoryReceiptStore, InMemoryWormSink, ReceiptConfig, ReceiptService};
use anumate_types::TenantId;

async fn test_state() -> AppState {
    let keypair = Keypair::generate();
    let tokens = Arc::new(
        TokenService::new(
            TokenConfig::default(),
            &keypair,
            Arc::new(InMemoryReplayGuard::new()),
            Arc::new(InMemoryTokenStore::new()),
            Arc::new(InMemoryTokenAuditLog::new()),
        )
        .unwrap(),
    );

    let registry = Arc::new(InMemoryCapsuleRegistry::new());
    let plan_cache = Arc::new(PlanCache::new());
    let compiler = Arc::new(PlanCompiler::new(
        Arc::clone(&registry) as Arc<_>,
        Arc::clone(&plan_cache),
    ));
    let compile_jobs = Arc::new(CompileJobs::new(Arc::clone(&compiler)));

    let approvals = Arc::new(ApprovalsService::new());
    let receipts = Arc::new(ReceiptService::new(
        ReceiptConfig::default(),
        Arc::new(Keypair::generate()),
        Arc::new(InMemoryReceiptStore::new()),
        Some(Arc::new(InMemoryWormSink::new())),
    ));

    let bus = Arc::new(EventBus::new());
    bus.add_stream(StreamConfig::all_events("events")).await.unwrap();
    let events = Arc::new(EventPublisher::new(
        "anumate-api-test",
        Arc::clone(&bus) as Arc<dyn EventSink>,
    ));

    let ghostrun = Arc::new(
        GhostRunService::new(SimulationEngine::new(MockToolRegistry::with_defaults()))
            .with_events(Arc::clone(&events)),
    );

    let orchestrator = Orchestrator::new(
        OrchestratorConfig::default(),
        Arc::new(CachePlanResolver::new(Arc::clone(&plan_cache))),
        Arc::clone(&tokens),
        Arc::new(WorkflowApprovalsBridge::new(Arc::clone(&approvals))),
        Arc::clone(&receipts),
        Arc::clone(&events),
        Arc::new(SimulatedRuntime::new()),
        Arc::new(InMemoryIdempotencyStore::new()),
        Arc::new(InMemoryRunStore::new()),
        vec![],
    );

    AppState {
        tokens,
        compiler,
        compile_jobs,
        plan_cache,
        ghostrun,
        approvals,
        receipts,
        orchestrator,
        events,
        registry,
    }
}

async fn send(
    state: &AppState,
    method: &str,
    uri: &str,
    tenant: Option<&TenantId>,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    send_with_headers(state, method, uri, tenant, body, &[]).await
}

async fn send_with_headers(
    state: &AppState,
    method: &str,
    uri: &str,
    tenant: Option<&TenantId>,
    body: Option<serde_json::Value>,
    headers: &[(&str, &str)],
) -> (StatusCode, serde_json::Value) {
    let app = create_test_router(state.clone());
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(tenant) = tenant {
        builder = builder.header("X-Tenant-ID", tenant.to_string());
    }
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}

const CAPSULE_YAML: &str = r#"
name: demo-flow
version: 1.0.0
automation:
  steps:
    - name: fetch
      tool: demo_tool
      parameters:
        x: 1
tools: [demo_tool]
"#;

async fn compile_demo(state: &AppState, tenant: &TenantId) -> String {
    let (status, body) = send(
        state,
        "POST",
        "/v1/compile",
        Some(tenant),
        Some(serde_json::json!({"yaml": CAPSULE_YAML})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "compile failed: {body}");
    body["plan_hash"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health() {
    let state = test_state().await;
    let (status, body) = send(&state, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_missing_tenant_header_is_rejected() {
    let state = test_state().await;
    let (status, body) = send(
        &state,
        "POST",
        "/v1/captokens",
        None,
        Some(serde_json::json!({"subject": "s", "capabilities": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["title"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_token_issue_verify_replay() {
    let state = test_state().await;
    let tenant = TenantId::new();

    let (status, body) = send(
        &state,
        "POST",
        "/v1/captokens",
        Some(&tenant),
        Some(serde_json::json!({
            "subject": "svc", "capabilities": ["read"], "ttl_secs": 60
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let token = body["token"].as_str().unwrap().to_string();

    let (status, body) = send(
        &state,
        "POST",
        "/v1/captokens/verify",
        Some(&tenant),
        Some(serde_json::json!({"token": token})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);

    // Same jti a second time: replay
    let (status, _) = send(
        &state,
        "POST",
        "/v1/captokens/verify",
        Some(&tenant),
        Some(serde_json::json!({"token": token})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_token_ttl_bound() {
    let state = test_state().await;
    let (status, _) = send(
        &state,
        "POST",
        "/v1/captokens",
        Some(&TenantId::new()),
        Some(serde_json::json!({
            "subject": "svc", "capabilities": [], "ttl_secs": 301
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_capsule_tenant_isolation() {
    let state = test_state().await;
    let t1 = TenantId::new();
    let t2 = TenantId::new();

    let (status, body) = send(
        &state,
        "POST",
        "/v1/capsules",
        Some(&t1),
        Some(serde_json::json!({"yaml": CAPSULE_YAML})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let capsule_id = body["capsule_id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &state,
        "GET",
        &format!("/v1/capsules/{capsule_id}"),
        Some(&t1),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Another tenant sees nothing
    let (status, _) = send(
        &state,
        "GET",
        &format!("/v1/capsules/{capsule_id}"),
        Some(&t2),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_compile_is_deterministic_and_plan_retrievable() {
    let state = test_state().await;
    let tenant = TenantId::new();

    let h1 = compile_demo(&state, &tenant).await;
    let h2 = compile_demo(&state, &tenant).await;
    assert_eq!(h1, h2);

    let (status, body) = send(&state, "GET", &format!("/v1/plans/{h1}"), Some(&tenant), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["plan_hash"], h1.as_str());
}

#[tokio::test]
async fn test_ghostrun_lifecycle() {
    let state = test_state().await;
    let tenant = TenantId::new();
    let plan_hash = compile_demo(&state, &tenant).await;

    let (status, body) = send(
        &state,
        "POST",
        "/v1/ghostrun",
        Some(&tenant),
        Some(serde_json::json!({"plan_hash": plan_hash, "seed": 7})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let run_id = body["run_id"].as_str().unwrap().to_string();

    // Report before completion answers 409 or the run completes quickly
    for _ in 0..200 {
        let (status, body) = send(
            &state,
            "GET",
            &format!("/v1/ghostrun/{run_id}"),
            Some(&tenant),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        if body["status"] == "Completed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let (status, body) = send(
        &state,
        "GET",
        &format!("/v1/ghostrun/{run_id}/report"),
        Some(&tenant),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["plan_hash"], plan_hash.as_str());
}

async fn wait_terminal_execution(
    state: &AppState,
    tenant: &TenantId,
    run_id: &str,
) -> serde_json::Value {
    for _ in 0..400 {
        let (status, body) = send(
            state,
            "GET",
            &format!("/v1/executions/{run_id}"),
            Some(tenant),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let s = body["status"].as_str().unwrap_or_default().to_string();
        if matches!(s.as_str(), "Succeeded" | "Failed" | "Cancelled") {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("execution never settled");
}

#[tokio::test]
async fn test_execute_happy_path_with_receipt() {
    let state = test_state().await;
    let tenant = TenantId::new();
    let plan_hash = compile_demo(&state, &tenant).await;

    let (status, body) = send(
        &state,
        "POST",
        "/v1/execute",
        Some(&tenant),
        Some(serde_json::json!({
            "plan_hash": plan_hash,
            "engine": "demo_tool",
            "parameters": {"x": 1},
            "require_approval": false,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED, "body: {body}");
    let run_id = body["run_id"].as_str().unwrap().to_string();

    let terminal = wait_terminal_execution(&state, &tenant, &run_id).await;
    assert_eq!(terminal["status"], "Succeeded");
    let receipt_id = terminal["receipt_id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &state,
        "POST",
        &format!("/v1/receipts/{receipt_id}/verify"),
        Some(&tenant),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true, "reason: {:?}", body["reason"]);
}

#[tokio::test]
async fn test_idempotent_replay_and_conflict() {
    let state = test_state().await;
    let tenant = TenantId::new();
    let plan_hash = compile_demo(&state, &tenant).await;

    let body = serde_json::json!({
        "plan_hash": plan_hash,
        "engine": "demo_tool",
        "parameters": {"x": 1},
        "require_approval": false,
    });

    let (status, first) = send_with_headers(
        &state,
        "POST",
        "/v1/execute",
        Some(&tenant),
        Some(body.clone()),
        &[("Idempotency-Key", "k-1")],
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let run_id = first["run_id"].as_str().unwrap().to_string();
    wait_terminal_execution(&state, &tenant, &run_id).await;

    // Same key, same body: cached response with the same run id
    let (status, replay) = send_with_headers(
        &state,
        "POST",
        "/v1/execute",
        Some(&tenant),
        Some(body),
        &[("Idempotency-Key", "k-1")],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replay["run_id"], run_id.as_str());
    assert_eq!(replay["cached"], true);

    // Same key, different body: conflict
    let (status, _) = send_with_headers(
        &state,
        "POST",
        "/v1/execute",
        Some(&tenant),
        Some(serde_json::json!({
            "plan_hash": plan_hash,
            "engine": "demo_tool",
            "parameters": {"x": 2},
            "require_approval": false,
        })),
        &[("Idempotency-Key", "k-1")],
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_approval_gate_via_api() {
    let state = test_state().await;
    let tenant = TenantId::new();
    let plan_hash = compile_demo(&state, &tenant).await;

    let (status, body) = send(
        &state,
        "POST",
        "/v1/execute",
        Some(&tenant),
        Some(serde_json::json!({
            "plan_hash": plan_hash,
            "engine": "demo_tool",
            "require_approval": true,
            "approvers": ["alice"],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let run_id = body["run_id"].as_str().unwrap().to_string();

    // Wait for the approval to open
    let mut approval_id = None;
    for _ in 0..200 {
        let (_, body) = send(
            &state,
            "GET",
            &format!("/v1/executions/{run_id}"),
            Some(&tenant),
            None,
        )
        .await;
        if body["status"] == "AwaitingApproval" {
            if let Some(id) = body["approval_ids"][0].as_str() {
                approval_id = Some(id.to_string());
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let approval_id = approval_id.expect("approval opened");

    let (status, _) = send(
        &state,
        "POST",
        &format!("/v1/approvals/{approval_id}/approve"),
        Some(&tenant),
        Some(serde_json::json!({"actor": "alice"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let terminal = wait_terminal_execution(&state, &tenant, &run_id).await;
    assert_eq!(terminal["status"], "Succeeded");
}

#[tokio::test]
async fn test_unknown_execution_is_404() {
    let state = test_state().await;
    let (status, _) = send(
        &state,
        "GET",
        &format!("/v1/executions/{}", uuid::Uuid::new_v4()),
        Some(&TenantId::new()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
