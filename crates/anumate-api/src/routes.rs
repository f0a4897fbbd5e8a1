//! Route definitions for the /v1 surface

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers;
use crate::AppState;

/// Create the /v1 routes
pub fn v1_routes() -> Router<AppState> {
    Router::new()
        // Capability tokens
        .route("/captokens", post(handlers::captokens::issue))
        .route("/captokens/verify", post(handlers::captokens::verify))
        .route("/captokens/refresh", post(handlers::captokens::refresh))
        .route("/captokens/revoke", post(handlers::captokens::revoke))
        .route("/captokens/audit", get(handlers::captokens::audit))
        // Capsules
        .route("/capsules", post(handlers::capsules::register))
        .route("/capsules/{capsule_id}", get(handlers::capsules::get))
        // Compilation
        .route("/compile", post(handlers::compile::compile))
        .route("/compile/jobs/{job_id}", get(handlers::compile::job_status))
        .route(
            "/compile/jobs/{job_id}/result",
            get(handlers::compile::job_result),
        )
        .route("/plans/{plan_hash}", get(handlers::compile::get_plan))
        // GhostRun
        .route("/ghostrun", post(handlers::ghostrun::start))
        .route("/ghostrun/{run_id}", get(handlers::ghostrun::status))
        .route("/ghostrun/{run_id}/report", get(handlers::ghostrun::report))
        .route("/ghostrun/{run_id}/cancel", post(handlers::ghostrun::cancel))
        // Execution
        .route("/execute", post(handlers::executions::execute))
        .route("/executions/{run_id}", get(handlers::executions::status))
        .route("/executions/{run_id}/pause", post(handlers::executions::pause))
        .route(
            "/executions/{run_id}/resume",
            post(handlers::executions::resume),
        )
        .route(
            "/executions/{run_id}/cancel",
            post(handlers::executions::cancel),
        )
        // Approvals
        .route("/approvals", post(handlers::approvals::create))
        .route("/approvals/{approval_id}", get(handlers::approvals::get))
        .route(
            "/approvals/{approval_id}/approve",
            post(handlers::approvals::approve),
        )
        .route(
            "/approvals/{approval_id}/reject",
            post(handlers::approvals::reject),
        )
        .route(
            "/approvals/{approval_id}/delegate",
            post(handlers::approvals::delegate),
        )
        .route(
            "/approvals/by-clarification/{clarification_id}",
            get(handlers::approvals::poll_by_clarification),
        )
        // Receipts
        .route("/receipts", post(handlers::receipts::create))
        .route("/receipts/audit", get(handlers::receipts::audit))
        .route("/receipts/{receipt_id}", get(handlers::receipts::get))
        .route(
            "/receipts/{receipt_id}/verify",
            post(handlers::receipts::verify),
        )
        .route(
            "/receipts/{receipt_id}/export",
            post(handlers::receipts::export),
        )
}
