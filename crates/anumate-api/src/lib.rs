//! Anumate API - REST surface for the control plane
//!
//! Versioned at `/v1`. Every request carries `X-Tenant-ID`; correlation IDs
//! are propagated from `X-Correlation-ID` or generated. Errors follow the
//! RFC 7807 problem shape and map one error kind to one HTTP status.
//!
//! ```text
//! /v1/
//! ├── /captokens      - issue, verify, refresh, revoke, audit
//! ├── /capsules       - register, fetch
//! ├── /compile        - sync and async compilation
//! ├── /plans          - compiled plan retrieval by hash
//! ├── /ghostrun       - start, status, report, cancel
//! ├── /execute        - submit an execution
//! ├── /executions     - status, pause, resume, cancel
//! ├── /approvals      - create, decide, delegate, poll
//! └── /receipts       - create, verify, export, audit
//! ```

pub mod dto;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

use axum::http::HeaderName;
use axum::Router;
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

pub use error::{ApiError, ApiResult, Problem};
pub use state::{AppState, CachePlanResolver};

/// API configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Enable CORS for browser clients
    pub enable_cors: bool,
    /// Enable response compression
    pub enable_compression: bool,
    /// Enable request tracing
    pub enable_tracing: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enable_cors: true,
            enable_compression: true,
            enable_tracing: true,
        }
    }
}

/// Create the main router with all middleware
pub fn create_router(state: AppState, config: ApiConfig) -> Router {
    let mut router = Router::new()
        .nest("/v1", routes::v1_routes())
        .route("/health", axum::routing::get(handlers::health::health))
        .route("/ready", axum::routing::get(handlers::health::ready))
        .layer(axum::middleware::from_fn(middleware::timing_middleware))
        .with_state(state);

    let x_request_id = HeaderName::from_static("x-request-id");
    router = router
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(PropagateRequestIdLayer::new(x_request_id));

    if config.enable_tracing {
        router = router.layer(TraceLayer::new_for_http());
    }
    if config.enable_compression {
        router = router.layer(CompressionLayer::new());
    }
    if config.enable_cors {
        router = router.layer(CorsLayer::permissive());
    }

    router
}

/// Create a minimal router for tests
pub fn create_test_router(state: AppState) -> Router {
    Router::new()
        .nest("/v1", routes::v1_routes())
        .route("/health", axum::routing::get(handlers::health::health))
        .with_state(state)
}
