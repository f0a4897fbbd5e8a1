//! Anumate Server
//!
//! Wires the control plane together: capability tokens, plan compiler,
//! GhostRun, approvals, receipts, event bus and orchestrator behind the
//! REST surface. Lifecycle is explicit: components are constructed once at
//! startup with their collaborators and torn down on shutdown.
//!
//! # Usage
//!
//! ```bash
//! # In-memory backends (development)
//! anumate-server
//!
//! # Durable backends
//! ANUMATE__DATABASE__URL=postgres://... anumate-server
//!
//! # Custom config file
//! anumate-server --config /etc/anumate/config.toml
//! ```

mod config;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use anumate_api::{create_router, ApiConfig, AppState, CachePlanResolver};
use anumate_approvals::{ApprovalSweeperTask, ApprovalsService};
use anumate_captokens::{
    InMemoryReplayGuard, InMemoryTokenAuditLog, InMemoryTokenStore, ReplayGuard, TokenAuditLog,
    TokenCleanupTask, TokenConfig, TokenService, TokenStore,
};
use anumate_compiler::{CompileJobs, InMemoryCapsuleRegistry, PlanCache, PlanCompiler};
use anumate_crypto::Keypair;
use anumate_db::{Database, PgIdempotencyStore, PgReceiptStore, PgReplayGuard, PgRunStore, PgTokenAuditLog, PgTokenStore};
use anumate_events::{EventBus, EventPublisher, EventSink, StreamConfig};
use anumate_ghostrun::{GhostRunService, MockToolRegistry, SimulationEngine};
use anumate_orchestrator::{
    IdempotencyStore, InMemoryIdempotencyStore, InMemoryRunStore, LoggingObserver, Orchestrator,
    OrchestratorConfig, RunStore, SimulatedRuntime, WorkflowApprovalsBridge,
};
use anumate_receipts::{
    InMemoryReceiptStore, InMemoryWormSink, ReceiptConfig, ReceiptService, ReceiptStore,
};

use crate::config::ServerConfig;

/// Anumate control plane server
#[derive(Parser, Debug)]
#[command(name = "anumate-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a configuration file (TOML, JSON or YAML)
    #[arg(short, long, env = "ANUMATE_CONFIG")]
    config: Option<String>,

    /// Host to bind to
    #[arg(long, env = "ANUMATE_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "ANUMATE_PORT")]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "ANUMATE_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut server_config = ServerConfig::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        server_config.server.host = host;
    }
    if let Some(port) = args.port {
        server_config.server.port = port;
    }
    if let Some(level) = args.log_level {
        server_config.logging.level = level;
    }

    init_logging(&server_config)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Anumate server");

    let state = build_state(&server_config).await?;
    let app = create_router(state, ApiConfig::default());

    let addr = server_config.server.socket_addr()?;
    tracing::info!(%addr, "Server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(server_config.server.shutdown_timeout()))
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn init_logging(config: &ServerConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let subscriber = tracing_subscriber::registry().with(env_filter);

    match config.logging.format.as_str() {
        "json" => subscriber.with(fmt::layer().json().with_target(true)).init(),
        _ => subscriber.with(fmt::layer().with_target(true)).init(),
    }
    Ok(())
}

fn load_signing_key(config: &ServerConfig) -> anyhow::Result<Keypair> {
    match &config.crypto.signing_key_ref {
        Some(env_var) => {
            let seed_hex = std::env::var(env_var).map_err(|_| {
                anyhow::anyhow!("signing key env var '{env_var}' is not set")
            })?;
            Ok(Keypair::from_seed_hex(seed_hex.trim())?)
        }
        None => {
            tracing::warn!(
                "No crypto.signing_key_ref configured; generating an ephemeral key. \
                 Receipts and tokens will not verify across restarts."
            );
            Ok(Keypair::generate())
        }
    }
}

async fn build_state(config: &ServerConfig) -> anyhow::Result<AppState> {
    let keypair = load_signing_key(config)?;

    // Backends: durable when a database is configured, in-memory otherwise
    let database = match &config.database {
        Some(db_config) => {
            tracing::info!("Connecting to Postgres");
            let db = Database::connect(db_config).await?;
            if !db.health_check().await? {
                anyhow::bail!("database health check failed");
            }
            Some(db)
        }
        None => {
            tracing::warn!(
                "No database configured; using in-memory backends (development only)"
            );
            None
        }
    };

    let (replay_guard, token_store, token_audit): (
        Arc<dyn ReplayGuard>,
        Arc<dyn TokenStore>,
        Arc<dyn TokenAuditLog>,
    ) = match &database {
        Some(db) => (
            Arc::new(PgReplayGuard::new(db.pool().clone())),
            Arc::new(PgTokenStore::new(db.pool().clone())),
            Arc::new(PgTokenAuditLog::new(db.pool().clone())),
        ),
        None => (
            Arc::new(InMemoryReplayGuard::new()),
            Arc::new(InMemoryTokenStore::new()),
            Arc::new(InMemoryTokenAuditLog::new()),
        ),
    };

    let tokens = Arc::new(TokenService::new(
        TokenConfig {
            issuer: "anumate-captokens".to_string(),
            max_ttl_secs: config.token.max_ttl_seconds,
        },
        &keypair,
        replay_guard,
        token_store,
        token_audit,
    )?);
    TokenCleanupTask::new(
        Arc::clone(&tokens),
        Duration::from_secs(config.token.cleanup_interval_secs),
    )
    .spawn();

    let registry = Arc::new(InMemoryCapsuleRegistry::new());
    let plan_cache = Arc::new(PlanCache::new());
    let compiler = Arc::new(PlanCompiler::new(
        Arc::clone(&registry) as Arc<_>,
        Arc::clone(&plan_cache),
    ));
    let compile_jobs = Arc::new(CompileJobs::new(Arc::clone(&compiler)));

    let approvals = Arc::new(ApprovalsService::new());
    ApprovalSweeperTask::new(
        Arc::clone(&approvals),
        Duration::from_secs(config.approval.sweep_interval_secs.max(1)),
    )
    .spawn();

    let receipt_store: Arc<dyn ReceiptStore> = match &database {
        Some(db) => Arc::new(PgReceiptStore::new(db.pool().clone())),
        None => Arc::new(InMemoryReceiptStore::new()),
    };
    let receipts = Arc::new(ReceiptService::new(
        ReceiptConfig::default(),
        Arc::new(keypair),
        receipt_store,
        Some(Arc::new(InMemoryWormSink::new())),
    ));

    let bus = Arc::new(EventBus::new());
    bus.add_stream(StreamConfig {
        name: "events".to_string(),
        subjects: vec!["events.*".to_string()],
        max_age: chrono::Duration::days(config.event_bus.stream_retention_days),
        max_events: config.event_bus.stream_max_events,
        max_deliver: config.event_bus.max_deliver,
        dlq_subject: config.event_bus.dlq_subject.clone(),
    })
    .await
    .map_err(|e| anyhow::anyhow!("event bus setup failed: {e}"))?;
    let events = Arc::new(EventPublisher::new(
        "anumate-orchestrator",
        Arc::clone(&bus) as Arc<dyn EventSink>,
    ));

    let ghostrun = Arc::new(
        GhostRunService::new(SimulationEngine::new(MockToolRegistry::with_defaults()))
            .with_events(Arc::clone(&events)),
    );

    let (idempotency, run_store): (Arc<dyn IdempotencyStore>, Arc<dyn RunStore>) =
        match &database {
            Some(db) => (
                Arc::new(PgIdempotencyStore::new(db.pool().clone())),
                Arc::new(PgRunStore::new(db.pool().clone())),
            ),
            None => (
                Arc::new(InMemoryIdempotencyStore::new()),
                Arc::new(InMemoryRunStore::new()),
            ),
        };

    let orchestrator = Orchestrator::new(
        OrchestratorConfig {
            max_concurrent_runs_per_tenant: config.orchestrator.max_concurrent_runs_per_tenant,
            retry: anumate_types::RetryPolicy {
                max_attempts: config.retry.max_attempts,
                base_delay_ms: config.retry.base_delay_ms,
                max_delay_ms: config.retry.max_delay_ms,
                jitter_ratio: config.retry.jitter_ratio,
            },
            approval_deadline_secs: config.approval.default_deadline_seconds,
            idempotency_ttl_hours: config.idempotency.record_ttl_hours,
            ..Default::default()
        },
        Arc::new(CachePlanResolver::new(Arc::clone(&plan_cache))),
        Arc::clone(&tokens),
        Arc::new(WorkflowApprovalsBridge::new(Arc::clone(&approvals))),
        Arc::clone(&receipts),
        Arc::clone(&events),
        // The simulated runtime is the explicitly configured development
        // engine; production deployments plug the remote tool runtime in
        // here. Failures never fall back to simulation.
        Arc::new(SimulatedRuntime::new()),
        idempotency,
        run_store,
        vec![Arc::new(LoggingObserver)],
    );

    Ok(AppState {
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
    })
}

/// Wait for Ctrl+C or SIGTERM, then allow in-flight requests to drain
async fn shutdown_signal(timeout: Duration) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }

    tracing::info!(timeout_secs = timeout.as_secs(), "Draining in-flight requests");
    tokio::time::sleep(timeout).await;
}
