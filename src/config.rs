//! Configuration handling for the SQL gateway.
//!
//! This module provides configuration management via CLI arguments and environment variables.

use clap::Parser;
use std::time::Duration;

pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Settings applied to every pool the registry creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    /// Physical connections per (endpoint, user) key
    pub max_connections: u32,
    /// Budget for opening a new physical connection
    pub connect_timeout: Duration,
    /// Budget for a single statement round trip
    pub query_timeout: Duration,
    /// Idle connections are closed after this long
    pub idle_timeout: Duration,
    /// Longest a request waits on a saturated pool before backpressure is reported
    pub acquire_timeout: Duration,
    /// Request TCP keep-alive on physical connections (driver permitting)
    pub keep_alive: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            query_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
            keep_alive: true,
        }
    }
}

impl PoolSettings {
    /// Validate pool settings and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_connections == 0 {
            return Err("max_connections must be greater than 0".to_string());
        }
        for (name, value) in [
            ("connect_timeout", self.connect_timeout),
            ("query_timeout", self.query_timeout),
            ("idle_timeout", self.idle_timeout),
            ("acquire_timeout", self.acquire_timeout),
        ] {
            if value.is_zero() {
                return Err(format!("{} must be greater than 0", name));
            }
        }
        Ok(())
    }
}

/// Configuration for the SQL gateway.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "sql-gateway",
    about = "Multi-tenant SQL access layer - pooled MySQL statement and procedure execution",
    version,
    author
)]
pub struct Config {
    /// HTTP host to bind to
    #[arg(long, default_value = DEFAULT_HTTP_HOST, env = "SQLGW_HTTP_HOST")]
    pub http_host: String,

    /// HTTP port to bind to
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT, env = "SQLGW_HTTP_PORT")]
    pub http_port: u16,

    /// Maximum accepted request body size in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_BODY_BYTES, env = "SQLGW_MAX_BODY_BYTES")]
    pub max_body_bytes: usize,

    /// Maximum physical connections per (endpoint, user) pool
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS, env = "SQLGW_MAX_CONNECTIONS")]
    pub max_connections: u32,

    /// Connection timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS,
        env = "SQLGW_CONNECT_TIMEOUT"
    )]
    pub connect_timeout: u64,

    /// Query timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_QUERY_TIMEOUT_SECS,
        env = "SQLGW_QUERY_TIMEOUT"
    )]
    pub query_timeout: u64,

    /// Idle connection timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_IDLE_TIMEOUT_SECS,
        env = "SQLGW_IDLE_TIMEOUT"
    )]
    pub idle_timeout: u64,

    /// Seconds a request may wait on a saturated pool
    #[arg(
        long,
        default_value_t = DEFAULT_ACQUIRE_TIMEOUT_SECS,
        env = "SQLGW_ACQUIRE_TIMEOUT"
    )]
    pub acquire_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "SQLGW_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "SQLGW_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            http_host: DEFAULT_HTTP_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_SECS,
            query_timeout: DEFAULT_QUERY_TIMEOUT_SECS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT_SECS,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT_SECS,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }

    /// Get the HTTP bind address.
    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    /// Build the pool settings shared by every registry pool.
    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.max_connections,
            connect_timeout: Duration::from_secs(self.connect_timeout),
            query_timeout: Duration::from_secs(self.query_timeout),
            idle_timeout: Duration::from_secs(self.idle_timeout),
            acquire_timeout: Duration::from_secs(self.acquire_timeout),
            keep_alive: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}
