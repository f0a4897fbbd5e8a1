//! Server configuration
//!
//! A single immutable value assembled at startup from defaults, an optional
//! config file and `ANUMATE_`-prefixed environment variables. No runtime
//! mutation.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use anumate_db::DbConfig;

/// Top-level server configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSettings,

    /// Postgres settings; absent means in-memory backends (development only)
    #[serde(default)]
    pub database: Option<DbConfig>,

    #[serde(default)]
    pub token: TokenSettings,

    #[serde(default)]
    pub approval: ApprovalSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub orchestrator: OrchestratorSettings,

    #[serde(default)]
    pub event_bus: EventBusSettings,

    #[serde(default)]
    pub idempotency: IdempotencySettings,

    #[serde(default)]
    pub crypto: CryptoSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSettings {
    /// Hard-capped at 300 seconds
    #[serde(default = "default_max_ttl")]
    pub max_ttl_seconds: u64,
    /// Expired-token sweeper interval
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            max_ttl_seconds: default_max_ttl(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalSettings {
    #[serde(default = "default_approval_deadline")]
    pub default_deadline_seconds: u64,
    /// Deadline sweeper interval
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for ApprovalSettings {
    fn default() -> Self {
        Self {
            default_deadline_seconds: default_approval_deadline(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter_ratio: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            jitter_ratio: default_jitter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    #[serde(default = "default_max_runs")]
    pub max_concurrent_runs_per_tenant: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_concurrent_runs_per_tenant: default_max_runs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusSettings {
    #[serde(default = "default_retention_days")]
    pub stream_retention_days: i64,
    #[serde(default = "default_max_events")]
    pub stream_max_events: usize,
    #[serde(default = "default_max_deliver")]
    pub max_deliver: u32,
    #[serde(default = "default_dlq_subject")]
    pub dlq_subject: String,
}

impl Default for EventBusSettings {
    fn default() -> Self {
        Self {
            stream_retention_days: default_retention_days(),
            stream_max_events: default_max_events(),
            max_deliver: default_max_deliver(),
            dlq_subject: default_dlq_subject(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencySettings {
    /// At least 24
    #[serde(default = "default_record_ttl")]
    pub record_ttl_hours: u64,
}

impl Default for IdempotencySettings {
    fn default() -> Self {
        Self {
            record_ttl_hours: default_record_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CryptoSettings {
    /// Name of the environment variable holding the hex-encoded Ed25519
    /// seed, resolved through the secrets collaborator in production
    #[serde(default)]
    pub signing_key_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `json` or `pretty`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// ============================================================================
// Defaults
// ============================================================================

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_timeout() -> u64 {
    15
}

fn default_max_ttl() -> u64 {
    300
}

fn default_cleanup_interval() -> u64 {
    300
}

fn default_approval_deadline() -> u64 {
    3600
}

fn default_sweep_interval() -> u64 {
    1
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    200
}

fn default_max_delay() -> u64 {
    5_000
}

fn default_jitter() -> f64 {
    0.2
}

fn default_max_runs() -> usize {
    32
}

fn default_retention_days() -> i64 {
    7
}

fn default_max_events() -> usize {
    1_000_000
}

fn default_max_deliver() -> u32 {
    5
}

fn default_dlq_subject() -> String {
    "events.dlq".to_string()
}

fn default_record_ttl() -> u64 {
    24
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl ServerConfig {
    /// Load configuration from environment and optional config file
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }
        builder = builder
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("ANUMATE")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        let mut server_config: ServerConfig = config.try_deserialize()?;

        // Spec floors and ceilings
        server_config.token.max_ttl_seconds = server_config.token.max_ttl_seconds.min(300);
        server_config.idempotency.record_ttl_hours =
            server_config.idempotency.record_ttl_hours.max(24);

        Ok(server_config)
    }
}
