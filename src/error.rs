//! Error types for the Snowflake MCP Server.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Every failure on the query path lands in one of these variants, and the
//! executor turns each of them into the same `{ "error": ... }` response shape.

use thiserror::Error;

/// Message returned when a tool call arrives without query text.
pub const QUERY_REQUIRED_MESSAGE: &str = "Query parameter is required";

#[derive(Error, Debug)]
pub enum WarehouseError {
    /// Bad or missing request fields.
    #[error("{message}")]
    Validation { message: String },

    /// Missing or unusable process configuration.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Authentication or network failure while establishing a session.
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    /// SQL rejected or aborted by the warehouse.
    #[error("{message}")]
    Execution {
        message: String,
        /// Snowflake error code, e.g. "002003" for a missing object
        code: Option<String>,
        /// e.g. "42S02"
        sql_state: Option<String>,
    },

    #[error("Pool exhausted: no connection available within {timeout_secs}s")]
    PoolExhausted { timeout_secs: u64 },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl WarehouseError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// The error returned for an empty or absent query.
    pub fn query_required() -> Self {
        Self::validation(QUERY_REQUIRED_MESSAGE)
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an execution error with optional Snowflake code and SQL state.
    pub fn execution(
        message: impl Into<String>,
        code: Option<String>,
        sql_state: Option<String>,
    ) -> Self {
        Self::Execution {
            message: message.into(),
            code,
            sql_state,
        }
    }

    /// Create a pool exhausted error.
    pub fn pool_exhausted(timeout_secs: u64) -> Self {
        Self::PoolExhausted { timeout_secs }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Short category name, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::Config { .. } => "config",
            Self::Connection { .. } => "connection",
            Self::Execution { .. } => "execution",
            Self::PoolExhausted { .. } => "pool_exhausted",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Convert reqwest transport failures to WarehouseError.
impl From<reqwest::Error> for WarehouseError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            WarehouseError::execution(
                format!("Request to Snowflake timed out: {}", err),
                None,
                None,
            )
        } else if err.is_connect() {
            WarehouseError::connection(
                format!("Unable to reach Snowflake: {}", err),
                "Check network connectivity and the account identifier",
            )
        } else if err.is_decode() {
            WarehouseError::internal(format!("Malformed response from Snowflake: {}", err))
        } else {
            WarehouseError::connection(
                format!("HTTP error: {}", err),
                "Check network connectivity and proxy settings",
            )
        }
    }
}

/// Result type alias for warehouse operations.
pub type WarehouseResult<T> = Result<T, WarehouseError>;
