//! Configuration management for authgate
//!
//! This module handles loading, parsing, and validating application configuration
//! from YAML files and environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::auth::{Account, FlowGateConfig, TokenConfig, VerificationConfig};
use crate::store::RedisStoreConfig;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Session token configuration
    #[serde(default)]
    pub jwt: JwtConfig,

    /// Per-address request throttling
    #[serde(default)]
    pub flow: FlowConfig,

    /// Verification code timing
    #[serde(default)]
    pub verify: VerifyConfig,

    /// CORS headers
    #[serde(default)]
    pub cors: CorsConfig,

    /// Request logging stage
    #[serde(default)]
    pub request_log: RequestLogConfig,

    /// Static account directory
    #[serde(default)]
    pub accounts: Vec<Account>,

    /// OpenTelemetry configuration
    #[serde(default)]
    pub otel: OtelConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Request id generation
    #[serde(default)]
    pub request_id: RequestIdConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(yaml);
        serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))
    }

    /// Load configuration from environment variables with prefix AUTHGATE_
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Ok(host) = std::env::var("AUTHGATE_SERVER_HOST") {
            config.server.host = host;
        }
        if let Some(port) = env_parse("AUTHGATE_SERVER_PORT")? {
            config.server.port = port;
        }

        if let Ok(backend) = std::env::var("AUTHGATE_STORE_BACKEND") {
            config.store.backend = match backend.to_ascii_lowercase().as_str() {
                "redis" => StoreBackend::Redis,
                "memory" => StoreBackend::Memory,
                other => {
                    return Err(ConfigError::InvalidValue(format!(
                        "Unknown store backend: {}",
                        other
                    )))
                }
            };
        }
        if let Ok(url) = std::env::var("AUTHGATE_STORE_URL") {
            config.store.url = Some(url);
        }

        if let Ok(key) = std::env::var("AUTHGATE_JWT_KEY") {
            config.jwt.key = key;
        }
        if let Some(hours) = env_parse("AUTHGATE_JWT_EXPIRE_HOURS")? {
            config.jwt.expire_hours = hours;
        }

        if let Some(limit) = env_parse("AUTHGATE_FLOW_LIMIT")? {
            config.flow.limit = limit;
        }
        if let Some(period) = env_parse("AUTHGATE_FLOW_PERIOD_SECS")? {
            config.flow.period_secs = period;
        }
        if let Some(block) = env_parse("AUTHGATE_FLOW_BLOCK_SECS")? {
            config.flow.block_secs = block;
        }

        if let Ok(origin) = std::env::var("AUTHGATE_CORS_ORIGIN") {
            config.cors.origin = origin;
        }

        if let Ok(enabled) = std::env::var("AUTHGATE_OTEL_ENABLED") {
            config.otel.enabled = enabled.parse().unwrap_or(false);
        }
        if let Ok(endpoint) = std::env::var("AUTHGATE_OTEL_ENDPOINT") {
            config.otel.endpoint = Some(endpoint);
        }

        if let Ok(level) = std::env::var("AUTHGATE_LOG_LEVEL") {
            config.logging.level = level;
        }

        Ok(config)
    }

    /// Check values that would make the service unsafe or unusable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.key.trim().is_empty() {
            return Err(ConfigError::MissingRequired("jwt.key".to_string()));
        }
        if self.jwt.expire_hours == 0 || self.jwt.expire_hours > MAX_EXPIRE_HOURS {
            return Err(ConfigError::InvalidValue(format!(
                "jwt.expire_hours must be between 1 and {}",
                MAX_EXPIRE_HOURS
            )));
        }
        let limit = &self.jwt.limit;
        if limit.frequency == 0 || limit.base == 0 || limit.upgrade == 0 {
            return Err(ConfigError::InvalidValue(
                "jwt.limit values must be greater than zero".to_string(),
            ));
        }
        if self.flow.limit == 0 || self.flow.period_secs == 0 || self.flow.block_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "flow values must be greater than zero".to_string(),
            ));
        }
        if self.verify.mail_limit_secs == 0 || self.verify.code_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "verify values must be greater than zero".to_string(),
            ));
        }
        if self.store.backend == StoreBackend::Redis && self.store.url.is_none() {
            return Err(ConfigError::MissingRequired("store.url".to_string()));
        }
        if self.request_id.worker_id > MAX_WORKER_ID {
            return Err(ConfigError::InvalidValue(format!(
                "request_id.worker_id must be at most {}",
                MAX_WORKER_ID
            )));
        }
        Ok(())
    }

    /// Token manager settings
    pub fn token_config(&self) -> TokenConfig {
        TokenConfig {
            secret: self.jwt.key.clone(),
            lifetime: Duration::from_secs(self.jwt.expire_hours.saturating_mul(3600)),
            frequency: self.jwt.limit.frequency,
            base: Duration::from_secs(self.jwt.limit.base),
            upgrade: Duration::from_secs(self.jwt.limit.upgrade),
        }
    }

    /// Request gate settings
    pub fn flow_gate_config(&self) -> FlowGateConfig {
        FlowGateConfig {
            limit: self.flow.limit,
            period: Duration::from_secs(self.flow.period_secs),
            block: Duration::from_secs(self.flow.block_secs),
        }
    }

    /// Verification code settings
    pub fn verification_config(&self) -> VerificationConfig {
        VerificationConfig {
            mail_limit: Duration::from_secs(self.verify.mail_limit_secs),
            code_ttl: Duration::from_secs(self.verify.code_ttl_secs),
        }
    }

    /// Redis connection settings, if the redis backend is selected
    pub fn redis_store_config(&self) -> Option<RedisStoreConfig> {
        match (&self.store.backend, &self.store.url) {
            (StoreBackend::Redis, Some(url)) => Some(RedisStoreConfig {
                url: url.clone(),
                prefix: self.store.prefix.clone(),
                command_timeout: Duration::from_millis(self.store.command_timeout_ms),
            }),
            _ => None,
        }
    }
}

/// Highest worker id that fits the request id layout
pub const MAX_WORKER_ID: u16 = 1023;

/// Longest accepted token lifetime, one hundred years
pub const MAX_EXPIRE_HOURS: u64 = 100 * 365 * 24;

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Parse(format!("Invalid value for {}", name))),
        Err(_) => Ok(None),
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Counter store backend
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    #[default]
    Memory,
}

/// Counter store configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis URL, required for the redis backend
    pub url: Option<String>,

    /// Prefix for every key
    #[serde(default = "default_store_prefix")]
    pub prefix: String,

    /// Per-command timeout in milliseconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: None,
            prefix: default_store_prefix(),
            command_timeout_ms: default_command_timeout(),
        }
    }
}

fn default_store_prefix() -> String {
    "authgate:".to_string()
}

fn default_command_timeout() -> u64 {
    500
}

/// Session token configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JwtConfig {
    /// Signing secret
    #[serde(default)]
    pub key: String,

    /// Token lifetime in hours
    #[serde(default = "default_expire_hours")]
    pub expire_hours: u64,

    /// Issuance frequency gate
    #[serde(default)]
    pub limit: JwtLimitConfig,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            key: String::new(),
            expire_hours: default_expire_hours(),
            limit: JwtLimitConfig::default(),
        }
    }
}

fn default_expire_hours() -> u64 {
    72
}

/// Issuance frequency gate, per subject
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JwtLimitConfig {
    /// Counting window in seconds
    #[serde(default = "default_jwt_base")]
    pub base: u64,

    /// Lockout in seconds once the window overflows
    #[serde(default = "default_jwt_upgrade")]
    pub upgrade: u64,

    /// Issuances permitted per window
    #[serde(default = "default_jwt_frequency")]
    pub frequency: u32,
}

impl Default for JwtLimitConfig {
    fn default() -> Self {
        Self {
            base: default_jwt_base(),
            upgrade: default_jwt_upgrade(),
            frequency: default_jwt_frequency(),
        }
    }
}

fn default_jwt_base() -> u64 {
    10
}

fn default_jwt_upgrade() -> u64 {
    300
}

fn default_jwt_frequency() -> u32 {
    30
}

/// Per-address request throttling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowConfig {
    /// Requests permitted per period
    #[serde(default = "default_flow_limit")]
    pub limit: u32,

    /// Counting window in seconds
    #[serde(default = "default_flow_period")]
    pub period_secs: u64,

    /// Block duration in seconds once the limit is exceeded
    #[serde(default = "default_flow_block")]
    pub block_secs: u64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            limit: default_flow_limit(),
            period_secs: default_flow_period(),
            block_secs: default_flow_block(),
        }
    }
}

fn default_flow_limit() -> u32 {
    20
}

fn default_flow_period() -> u64 {
    3
}

fn default_flow_block() -> u64 {
    30
}

/// Verification code timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerifyConfig {
    /// Cooldown between code requests from one address, seconds
    #[serde(default = "default_mail_limit")]
    pub mail_limit_secs: u64,

    /// Code lifetime, seconds
    #[serde(default = "default_code_ttl")]
    pub code_ttl_secs: u64,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            mail_limit_secs: default_mail_limit(),
            code_ttl_secs: default_code_ttl(),
        }
    }
}

fn default_mail_limit() -> u64 {
    60
}

fn default_code_ttl() -> u64 {
    180
}

/// CORS headers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorsConfig {
    /// Allowed origin, `*` echoes the request origin
    #[serde(default = "default_wildcard")]
    pub origin: String,

    /// Allowed methods, `*` expands to the standard set
    #[serde(default = "default_wildcard")]
    pub methods: String,

    /// Whether to send `Access-Control-Allow-Credentials: true`
    #[serde(default)]
    pub credentials: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origin: default_wildcard(),
            methods: default_wildcard(),
            credentials: false,
        }
    }
}

fn default_wildcard() -> String {
    "*".to_string()
}

/// Request logging stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestLogConfig {
    /// Path prefixes that are not logged
    #[serde(default = "default_ignore")]
    pub ignore: Vec<String>,

    /// Maximum characters of response body to log
    #[serde(default = "default_snippet_length")]
    pub snippet_length: usize,
}

impl Default for RequestLogConfig {
    fn default() -> Self {
        Self {
            ignore: default_ignore(),
            snippet_length: default_snippet_length(),
        }
    }
}

fn default_ignore() -> Vec<String> {
    vec!["/health".to_string()]
}

fn default_snippet_length() -> usize {
    1000
}

/// Request id generation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RequestIdConfig {
    /// Worker id embedded in each request id, 0..=1023
    #[serde(default)]
    pub worker_id: u16,
}

/// OpenTelemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OtelConfig {
    /// Whether OpenTelemetry is enabled
    #[serde(default)]
    pub enabled: bool,

    /// OTLP endpoint URL
    pub endpoint: Option<String>,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            service_name: default_service_name(),
        }
    }
}

fn default_service_name() -> String {
    "authgate".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format, `json` or `pretty`
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

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Configuration error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    /// Error parsing configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// Expand `${VAR}` references from the environment
///
/// Unknown variables are left as written.
fn expand_env_vars(input: &str) -> String {
    let Ok(re) = regex_lite::Regex::new(r"\$\{([^}]+)\}") else {
        return input.to_string();
    };

    re.replace_all(input, |caps: &regex_lite::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}
