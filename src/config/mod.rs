//! Configuration management for fpl-sync
//!
//! This module handles loading, parsing, and validating application configuration
//! from YAML files and environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::client::TimeoutClass;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Upstream API configuration
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Outbound HTTP behavior: timeouts, retry, rate limiting
    #[serde(default)]
    pub http: HttpConfig,

    /// Cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Batch sync configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// OpenTelemetry configuration
    #[serde(default)]
    pub otel: OtelConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
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
        // First, expand environment variables in the YAML string
        let expanded = expand_env_vars(yaml);
        let config: Config = serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables with prefix FPL_SYNC_
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Ok(url) = std::env::var("FPL_SYNC_UPSTREAM_BASE_URL") {
            config.upstream.base_url = url;
        }

        if let Ok(path) = std::env::var("FPL_SYNC_DATABASE_PATH") {
            config.database.path = path;
        }

        if let Ok(attempts) = std::env::var("FPL_SYNC_RETRY_ATTEMPTS") {
            config.http.retry.max_attempts = parse_env("FPL_SYNC_RETRY_ATTEMPTS", &attempts)?;
        }
        if let Ok(capacity) = std::env::var("FPL_SYNC_RATE_LIMIT_CAPACITY") {
            config.http.rate_limit.capacity = parse_env("FPL_SYNC_RATE_LIMIT_CAPACITY", &capacity)?;
        }
        if let Ok(rate) = std::env::var("FPL_SYNC_RATE_LIMIT_REFILL_RATE") {
            config.http.rate_limit.tokens_per_interval =
                parse_env("FPL_SYNC_RATE_LIMIT_REFILL_RATE", &rate)?;
        }

        if let Ok(ttl) = std::env::var("FPL_SYNC_CACHE_TTL_SECS") {
            config.cache.ttl_secs = parse_env("FPL_SYNC_CACHE_TTL_SECS", &ttl)?;
        }

        if let Ok(cycles) = std::env::var("FPL_SYNC_MAX_RETRY_CYCLES") {
            config.sync.max_retry_cycles = parse_env("FPL_SYNC_MAX_RETRY_CYCLES", &cycles)?;
        }

        if let Ok(level) = std::env::var("FPL_SYNC_LOG_LEVEL") {
            config.logging.level = level;
        }

        // OTEL config from env
        if let Ok(enabled) = std::env::var("FPL_SYNC_OTEL_ENABLED") {
            config.otel.enabled = enabled.parse().unwrap_or(false);
        }
        if let Ok(endpoint) = std::env::var("FPL_SYNC_OTEL_ENDPOINT") {
            config.otel.endpoint = Some(endpoint);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the components cannot operate with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "http.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.http.rate_limit.capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "http.rate_limit.capacity must be at least 1".to_string(),
            ));
        }
        if self.http.rate_limit.tokens_per_interval == 0 {
            return Err(ConfigError::InvalidValue(
                "http.rate_limit.tokens_per_interval must be at least 1".to_string(),
            ));
        }
        if self.http.rate_limit.interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "http.rate_limit.interval_ms must be at least 1".to_string(),
            ));
        }
        if self.http.max_concurrent == 0 {
            return Err(ConfigError::InvalidValue(
                "http.max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.sync.concurrency == 0 {
            return Err(ConfigError::InvalidValue(
                "sync.concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Parse(format!("Invalid value for {}: {}", name, value)))
}

/// Upstream API configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpstreamConfig {
    /// Base URL that request paths are joined onto
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_base_url() -> String {
    "https://fantasy.premierleague.com/api".to_string()
}

fn default_user_agent() -> String {
    concat!("fpl-sync/", env!("CARGO_PKG_VERSION")).to_string()
}

/// Outbound HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpConfig {
    /// Per-attempt timeouts by class
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Retry configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Token bucket configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Maximum number of in-flight upstream requests
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeouts: TimeoutConfig::default(),
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

fn default_max_concurrent() -> usize {
    4
}

/// Timeout durations for each request timeout class
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeoutConfig {
    /// SHORT timeout in seconds
    #[serde(default = "default_short_timeout")]
    pub short_secs: u64,

    /// DEFAULT timeout in seconds
    #[serde(default = "default_default_timeout")]
    pub default_secs: u64,

    /// LONG timeout in seconds
    #[serde(default = "default_long_timeout")]
    pub long_secs: u64,
}

impl TimeoutConfig {
    /// Duration for a timeout class
    pub fn duration(&self, class: TimeoutClass) -> Duration {
        let secs = match class {
            TimeoutClass::Short => self.short_secs,
            TimeoutClass::Default => self.default_secs,
            TimeoutClass::Long => self.long_secs,
        };
        Duration::from_secs(secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            short_secs: default_short_timeout(),
            default_secs: default_default_timeout(),
            long_secs: default_long_timeout(),
        }
    }
}

fn default_short_timeout() -> u64 {
    5
}

fn default_default_timeout() -> u64 {
    30
}

fn default_long_timeout() -> u64 {
    120
}

/// Retry configuration for upstream calls
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Total attempts per call, initial attempt included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff before the second attempt, in milliseconds
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Cap on the exponential part of the backoff, in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Upper bound of the uniform jitter added to every backoff, in milliseconds
    #[serde(default = "default_jitter_max")]
    pub jitter_max_ms: u64,

    /// Longest Retry-After wait honoured from a 429, in seconds
    #[serde(default = "default_max_retry_after")]
    pub max_retry_after_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            jitter_max_ms: default_jitter_max(),
            max_retry_after_secs: default_max_retry_after(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_jitter_max() -> u64 {
    250
}

fn default_max_retry_after() -> u64 {
    300
}

/// What the client does when the token bucket is empty
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitMode {
    /// Sleep until the next refill step, then proceed
    #[default]
    Wait,
    /// Fail the attempt with `RateLimitExceeded`
    FailFast,
}

/// Token bucket configuration for the upstream client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// Maximum tokens in the bucket
    #[serde(default = "default_capacity")]
    pub capacity: u32,

    /// Tokens added per refill step
    #[serde(default = "default_tokens_per_interval")]
    pub tokens_per_interval: u32,

    /// Refill step length in milliseconds
    #[serde(default = "default_interval")]
    pub interval_ms: u64,

    /// Behavior when the bucket is empty
    #[serde(default)]
    pub mode: RateLimitMode,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            tokens_per_interval: default_tokens_per_interval(),
            interval_ms: default_interval(),
            mode: RateLimitMode::default(),
        }
    }
}

fn default_capacity() -> u32 {
    10
}

fn default_tokens_per_interval() -> u32 {
    10
}

fn default_interval() -> u64 {
    1000
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Key prefix for every cache entry
    #[serde(default = "default_cache_prefix")]
    pub prefix: String,

    /// Default TTL in seconds
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    /// TTL for the current-gameweek entry in seconds
    #[serde(default = "default_event_ttl")]
    pub event_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prefix: default_cache_prefix(),
            ttl_secs: default_cache_ttl(),
            event_ttl_secs: default_event_ttl(),
        }
    }
}

fn default_cache_prefix() -> String {
    "fpl".to_string()
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_event_ttl() -> u64 {
    300
}

/// Batch sync configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// Follow-up generations allowed after the initial run
    #[serde(default = "default_max_retry_cycles")]
    pub max_retry_cycles: u32,

    /// Entity syncs run concurrently within one job (1 = sequential)
    #[serde(default = "default_sync_concurrency")]
    pub concurrency: usize,

    /// Bounded job queue capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Periodic full sync
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retry_cycles: default_max_retry_cycles(),
            concurrency: default_sync_concurrency(),
            queue_capacity: default_queue_capacity(),
            schedule: ScheduleConfig::default(),
        }
    }
}

fn default_max_retry_cycles() -> u32 {
    2
}

fn default_sync_concurrency() -> usize {
    1
}

fn default_queue_capacity() -> usize {
    64
}

/// Periodic full sync configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleConfig {
    /// Whether the periodic sync is enabled
    #[serde(default)]
    pub enabled: bool,

    /// Interval between full syncs in seconds
    #[serde(default = "default_schedule_interval")]
    pub interval_secs: u64,

    /// Delay before the first scheduled sync in seconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,

    /// Upper bound of random delay added to each tick in seconds
    #[serde(default = "default_schedule_jitter")]
    pub jitter_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_schedule_interval(),
            initial_delay_secs: default_initial_delay(),
            jitter_secs: default_schedule_jitter(),
        }
    }
}

fn default_schedule_interval() -> u64 {
    3600
}

fn default_initial_delay() -> u64 {
    5
}

fn default_schedule_jitter() -> u64 {
    60
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "/data/db/fpl-sync.db".to_string()
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
    "fpl-sync".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "pretty"
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
}

/// Expand environment variables in a string
///
/// Supports `${VAR_NAME}` syntax
fn expand_env_vars(input: &str) -> String {
    let re = match regex_lite::Regex::new(r"\$\{([^}]+)\}") {
        Ok(re) => re,
        Err(_) => return input.to_string(),
    };

    re.replace_all(input, |caps: &regex_lite::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}
