//! Snowflake MCP Server - Main entry point.
//!
//! This server provides an MCP (Model Context Protocol) tool for AI assistants
//! to run SQL against Snowflake.

use snowflake_mcp_server::config::{Config, load_env_file};
use snowflake_mcp_server::db::{EngineFactory, QueryExecutor};
use snowflake_mcp_server::snowflake::SqlApiDriver;
use snowflake_mcp_server::transport::{StdioTransport, Transport};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
///
/// Stdout carries the protocol, so logs go to stderr.
fn init_tracing(config: &Config) {
    if !config.enable_logs {
        return;
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Variables already in the environment win over .env
    let env_file = load_env_file(None);

    let config = Config::parse_args();
    init_tracing(&config);

    info!(
        env_file = ?env_file,
        "Starting Snowflake MCP Server v{}",
        env!("CARGO_PKG_VERSION")
    );

    let settings = config.warehouse_settings();
    if settings.account.is_none() || settings.user.is_none() || settings.warehouse.is_none() {
        warn!(
            "SNOWFLAKE_ACCOUNT, SNOWFLAKE_USER and SNOWFLAKE_WAREHOUSE must all be set \
             before queries can run"
        );
    }
    if config.token.is_none() {
        warn!("SNOWFLAKE_TOKEN is not set; queries will fail until a session token is provided");
    }

    let options = config.sql_api_options();
    if let Err(e) = options.token_type() {
        warn!(error = %e, "Queries will fail until SNOWFLAKE_TOKEN_TYPE is corrected");
    }
    let driver = Arc::new(SqlApiDriver::new(options)?);
    let factory = EngineFactory::new(Arc::new(settings), driver);
    let executor = Arc::new(QueryExecutor::new(Arc::new(factory)));

    let transport = StdioTransport::new(executor);
    info!(transport = transport.name(), "Using stdio transport");

    if let Err(e) = transport.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
