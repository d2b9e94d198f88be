//! Data models for the Snowflake MCP Server.
//!
//! This module re-exports all model types used throughout the application.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{Authenticator, ConnectionDescriptor, TransactionState};
pub use query::{
    AFFECTED_MESSAGE, ColumnMetadata, ExecuteResponse, QueryInput, QueryOutcome, QueryRequest,
    StatementResult,
};
