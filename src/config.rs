//! Configuration handling for the Snowflake MCP Server.
//!
//! This module provides configuration management via CLI arguments and environment
//! variables. Everything is read once at startup; the warehouse settings derived
//! from it are immutable for the lifetime of the process.

use crate::snowflake::SqlApiOptions;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_TOKEN_TYPE: &str = "OAUTH";

// Pool policy constants
pub const DEFAULT_MAX_POOL_SIZE: usize = 5;
pub const DEFAULT_MAX_OVERFLOW: usize = 10;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECTION_RECYCLE_SECS: u64 = 1800;

/// Sizing and lifetime policy for an engine's connection pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolPolicy {
    /// Connections kept idle for reuse
    pub max_pool_size: usize,
    /// Extra connections allowed beyond `max_pool_size`; closed when returned
    pub max_overflow: usize,
    /// Longest wait for a free connection before giving up
    pub acquire_timeout: Duration,
    /// Connections older than this are closed and replaced on checkout
    pub connection_recycle_age: Duration,
}

impl PoolPolicy {
    /// Upper bound on simultaneously checked-out connections.
    pub fn max_connections(&self) -> usize {
        self.max_pool_size + self.max_overflow
    }

    /// Validate the policy and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_connections() == 0 {
            return Err("max_pool_size + max_overflow must be greater than 0".to_string());
        }
        if self.acquire_timeout.is_zero() {
            return Err("acquire_timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl Default for PoolPolicy {
    fn default() -> Self {
        Self {
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            max_overflow: DEFAULT_MAX_OVERFLOW,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
            connection_recycle_age: Duration::from_secs(DEFAULT_CONNECTION_RECYCLE_SECS),
        }
    }
}

/// Process-wide Snowflake settings.
///
/// Every field is optional at this level: a missing account, user or warehouse
/// only becomes an error when the first engine is created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarehouseSettings {
    pub account: Option<String>,
    pub user: Option<String>,
    pub warehouse: Option<String>,
    pub role: Option<String>,
    /// Default database when a request does not name one
    pub database: Option<String>,
    /// Default schema when a request does not name one
    pub schema: Option<String>,
}

/// Configuration for the Snowflake MCP Server.
#[derive(Clone, Parser)]
#[command(
    name = "snowflake-mcp-server",
    about = "MCP server that lets AI assistants run SQL against Snowflake",
    version,
    author
)]
pub struct Config {
    /// Snowflake account identifier (e.g. "xy12345.eu-central-1" or "myorg-myaccount")
    #[arg(long, env = "SNOWFLAKE_ACCOUNT")]
    pub account: Option<String>,

    /// Snowflake login name
    #[arg(long, env = "SNOWFLAKE_USER")]
    pub user: Option<String>,

    /// Virtual warehouse used to run queries
    #[arg(long, env = "SNOWFLAKE_WAREHOUSE")]
    pub warehouse: Option<String>,

    /// Role to assume for the session
    #[arg(long, env = "SNOWFLAKE_ROLE")]
    pub role: Option<String>,

    /// Default database (requests may override it)
    #[arg(long, env = "SNOWFLAKE_DATABASE")]
    pub database: Option<String>,

    /// Default schema (requests may override it)
    #[arg(long, env = "SNOWFLAKE_SCHEMA")]
    pub schema: Option<String>,

    /// Session token issued by the external browser sign-in
    #[arg(long, env = "SNOWFLAKE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Kind of session token: OAUTH, KEYPAIR_JWT or PROGRAMMATIC_ACCESS_TOKEN
    #[arg(long, default_value = DEFAULT_TOKEN_TYPE, env = "SNOWFLAKE_TOKEN_TYPE")]
    pub token_type: String,

    /// Override the account URL (default: https://<account>.snowflakecomputing.com)
    #[arg(long, env = "SNOWFLAKE_HOST")]
    pub host: Option<String>,

    /// Statement timeout in seconds (0 leaves the limit to the server)
    #[arg(
        long,
        default_value_t = DEFAULT_QUERY_TIMEOUT_SECS,
        env = "MCP_QUERY_TIMEOUT"
    )]
    pub query_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "MCP_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "MCP_JSON_LOGS")]
    pub json_logs: bool,

    /// Enable logging output (disabled by default to avoid interfering with stdio transport)
    #[arg(long, env = "MCP_ENABLE_LOGS")]
    pub enable_logs: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("account", &self.account)
            .field("user", &self.user)
            .field("warehouse", &self.warehouse)
            .field("role", &self.role)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("token_type", &self.token_type)
            .field("host", &self.host)
            .field("query_timeout", &self.query_timeout)
            .field("log_level", &self.log_level)
            .field("json_logs", &self.json_logs)
            .field("enable_logs", &self.enable_logs)
            .finish()
    }
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            account: None,
            user: None,
            warehouse: None,
            role: None,
            database: None,
            schema: None,
            token: None,
            token_type: DEFAULT_TOKEN_TYPE.to_string(),
            host: None,
            query_timeout: DEFAULT_QUERY_TIMEOUT_SECS,
            log_level: "info".to_string(),
            json_logs: false,
            enable_logs: false,
        }
    }

    /// Build the immutable warehouse settings. Blank values count as unset.
    pub fn warehouse_settings(&self) -> WarehouseSettings {
        WarehouseSettings {
            account: non_blank(&self.account),
            user: non_blank(&self.user),
            warehouse: non_blank(&self.warehouse),
            role: non_blank(&self.role),
            database: non_blank(&self.database),
            schema: non_blank(&self.schema),
        }
    }

    /// Options for the SQL API driver.
    ///
    /// The token type is not checked here; a bad value fails each query
    /// with a configuration error instead of stopping startup.
    pub fn sql_api_options(&self) -> SqlApiOptions {
        SqlApiOptions {
            token: non_blank(&self.token),
            token_type: self.token_type.trim().to_string(),
            host: non_blank(&self.host),
            statement_timeout: self.query_timeout_duration(),
        }
    }

    /// Get the query timeout as a Duration.
    pub fn query_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.query_timeout)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

/// Load a `.env` file into the process environment.
///
/// With no explicit path the usual lookup applies (current directory and its
/// parents). Returns the file that was loaded, if any. Variables already set in
/// the environment win over the file.
pub fn load_env_file(path: Option<&Path>) -> Option<PathBuf> {
    match path {
        Some(path) => dotenvy::from_path(path).ok().map(|_| path.to_path_buf()),
        None => dotenvy::dotenv().ok(),
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}
