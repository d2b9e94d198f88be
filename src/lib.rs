//! Snowflake MCP Server Library
//!
//! This library provides an MCP (Model Context Protocol) tool for AI assistants
//! to run SQL against the Snowflake data warehouse.

pub mod config;
pub mod db;
pub mod error;
pub mod mcp;
pub mod models;
pub mod snowflake;
pub mod transport;

pub use config::Config;
pub use error::WarehouseError;
pub use mcp::SnowflakeService;
