use config::builder::DefaultState;
use config::ConfigBuilder;
use serde::Deserialize;
use thiserror::Error;

/// Errors raised while validating a loaded configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Main configuration for the transient router
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Routing rules and destination zone
    pub routing: RoutingConfig,
    /// Object storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Audit (EtlEvent) persistence
    #[serde(default)]
    pub audit: AuditConfig,
    /// HTTP trigger endpoint
    #[serde(default)]
    pub api: ApiConfig,
    /// Optional Kafka trigger source
    pub kafka: Option<KafkaConfig>,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Routing configuration shared read-only by every invocation
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
    /// Container (bucket) of the raw zone
    #[serde(default)]
    pub output_container: String,
    /// Project identifier, first segment of every destination key
    #[serde(default)]
    pub project_id: String,
    /// Organizational prefix stripped from station and table names
    #[serde(default = "default_station_prefix")]
    pub station_prefix: String,
    /// UTC offset of the logger clocks, in hours
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
    /// Caller name written into audit records
    #[serde(default = "default_caller_name")]
    pub caller_name: String,
    /// Caller version written into audit records
    #[serde(default = "default_caller_version")]
    pub caller_version: String,
    /// Storage API verbs that mark a fully committed write
    #[serde(default = "default_allowed_apis")]
    pub allowed_apis: Vec<String>,
}

/// Object storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (MinIO, LocalStack, data lake gateway)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Named credential profile used to authenticate
    pub identity: Option<String>,
}

/// Where audit records are persisted
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuditSinkKind {
    #[default]
    ObjectStore,
    Postgres,
}

/// Audit configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Sink used for audit records
    #[serde(default)]
    pub sink: AuditSinkKind,
    /// Environment label recorded in each audit record
    #[serde(default = "default_audit_environment")]
    pub environment: String,
    /// PostgreSQL connection URL (postgres sink only)
    pub database_url: Option<String>,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// HTTP trigger endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// Listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
}

/// Kafka consumer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers
    pub bootstrap_servers: String,
    /// Consumer group ID
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    /// Topic carrying storage events
    #[serde(default = "default_events_topic")]
    pub events_topic: String,
    /// Auto offset reset policy
    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: String,
    /// Session timeout in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u32,
}

// Default value functions
fn default_service_name() -> String {
    "transient-router".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_station_prefix() -> String {
    "LTAR_".to_string()
}

fn default_utc_offset_hours() -> i32 {
    -8
}

fn default_caller_name() -> String {
    "TransientRouter.route()".to_string()
}

fn default_caller_version() -> String {
    format!("v{}", env!("CARGO_PKG_VERSION"))
}

fn default_allowed_apis() -> Vec<String> {
    ["FlushWithClose", "PutBlob", "PutBlockList", "CopyBlob"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_audit_environment() -> String {
    "Service".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_consumer_group() -> String {
    "transient-router".to_string()
}

fn default_events_topic() -> String {
    "datalake.transient.events".to_string()
}

fn default_auto_offset_reset() -> String {
    "earliest".to_string()
}

fn default_session_timeout_ms() -> u32 {
    30000
}

/// Legacy environment variables and the keys they override
const LEGACY_ENV_OVERRIDES: &[(&str, &str)] = &[
    ("OUTPUT_CONTAINER", "routing.output_container"),
    ("PROJECT_ID", "routing.project_id"),
    ("DATALAKE_ENDPOINT", "storage.endpoint_url"),
    ("FUNCTION_OBJECT_ID", "storage.identity"),
];

/// Apply the legacy variables found by `lookup`, taking precedence over every source
fn apply_legacy_overrides(
    mut builder: ConfigBuilder<DefaultState>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ConfigBuilder<DefaultState>, config::ConfigError> {
    for (var, key) in LEGACY_ENV_OVERRIDES {
        if let Some(value) = lookup(var) {
            builder = builder.set_override(*key, value)?;
        }
    }
    Ok(builder)
}

impl Config {
    /// Load configuration from config files and the environment
    pub fn load() -> anyhow::Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/router").required(false))
            .add_source(config::File::with_name("/etc/transient-router/router").required(false))
            // ROUTER__ROUTING__PROJECT_ID -> routing.project_id
            .add_source(
                config::Environment::with_prefix("ROUTER")
                    .separator("__")
                    .try_parsing(true),
            );

        builder = apply_legacy_overrides(builder, |var| std::env::var(var).ok())?;

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the values every invocation depends on are present
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.routing.output_container.trim().is_empty() {
            return Err(ConfigError::MissingRequired(
                "routing.output_container".to_string(),
            ));
        }
        if self.routing.project_id.trim().is_empty() {
            return Err(ConfigError::MissingRequired("routing.project_id".to_string()));
        }
        if !(-12..=14).contains(&self.routing.utc_offset_hours) {
            return Err(ConfigError::InvalidValue {
                key: "routing.utc_offset_hours".to_string(),
                message: format!("{} is outside -12..=14", self.routing.utc_offset_hours),
            });
        }
        if self.audit.sink == AuditSinkKind::Postgres && self.audit.database_url.is_none() {
            return Err(ConfigError::MissingRequired("audit.database_url".to_string()));
        }
        Ok(())
    }
}

impl RoutingConfig {
    /// Routing defaults for the given destination zone and project
    pub fn new(output_container: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            output_container: output_container.into(),
            project_id: project_id.into(),
            station_prefix: default_station_prefix(),
            utc_offset_hours: default_utc_offset_hours(),
            caller_name: default_caller_name(),
            caller_version: default_caller_version(),
            allowed_apis: default_allowed_apis(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            identity: None,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            sink: AuditSinkKind::default(),
            environment: default_audit_environment(),
            database_url: None,
            max_connections: default_max_connections(),
            run_migrations: default_true(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}
