//! MCP service implementation using rmcp.
//!
//! This module defines the SnowflakeService struct, which exposes the
//! `execute` tool via the MCP protocol using the rmcp framework's macros.

use crate::db::QueryExecutor;
use crate::models::QueryInput;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{CallToolResult, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct SnowflakeService {
    /// Shared executor; every call still gets its own engine
    executor: Arc<QueryExecutor>,
    /// Tool router for MCP tool dispatch (auto-generated)
    tool_router: ToolRouter<Self>,
}

impl SnowflakeService {
    /// Create a new SnowflakeService instance.
    pub fn new(executor: Arc<QueryExecutor>) -> Self {
        Self {
            executor,
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router]
impl SnowflakeService {
    #[tool(
        description = "Execute a SQL query on the specified Snowflake database.\nThe query runs inside a transaction that is committed on success and rolled back on failure.\n`database` and `schema` default to SNOWFLAKE_DATABASE and SNOWFLAKE_SCHEMA.\nReturns `{\"results\": [rows]}` for queries that return rows, `{\"results\": {\"rowcount\": n, \"message\": ...}}` for statements that change rows, or `{\"error\": message}`."
    )]
    async fn execute(
        &self,
        Parameters(input): Parameters<QueryInput>,
    ) -> Result<CallToolResult, McpError> {
        let response = self.executor.execute(input).await;
        let value = response.to_value();
        if response.is_error() {
            Ok(CallToolResult::structured_error(value))
        } else {
            Ok(CallToolResult::structured(value))
        }
    }
}

#[tool_handler]
impl ServerHandler for SnowflakeService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "snowflake".to_owned(),
                title: Some("Snowflake MCP Server".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Run SQL against Snowflake.\n\
                \n\
                ## Tool\n\
                - `execute`: takes `query` (required), `database` and `schema` (optional overrides)\n\
                \n\
                ## Results\n\
                - Row-returning queries: `results` is a list of objects keyed by column name, in column order\n\
                - Other statements: `results` is `{rowcount, message}`\n\
                - Failures: `error` carries the Snowflake message; nothing is committed\n\
                \n\
                ## Notes\n\
                - Snowflake upper-cases unquoted identifiers, so column keys are usually upper case\n\
                - Each call is its own transaction; there is no state between calls"
                    .to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WarehouseSettings;
    use crate::db::{EngineFactory, MockDriver};
    use crate::models::{ColumnMetadata, StatementResult};
    use serde_json::json;

    fn create_test_service(driver: MockDriver) -> SnowflakeService {
        let settings = WarehouseSettings {
            account: Some("xy12345".to_string()),
            user: Some("analyst".to_string()),
            warehouse: Some("COMPUTE_WH".to_string()),
            ..WarehouseSettings::default()
        };
        let factory = EngineFactory::new(Arc::new(settings), Arc::new(driver));
        SnowflakeService::new(Arc::new(QueryExecutor::new(Arc::new(factory))))
    }

    #[test]
    fn test_server_info() {
        let service = create_test_service(MockDriver::new());
        let info = service.get_info();
        assert_eq!(info.server_info.name, "snowflake");
        assert!(info.capabilities.tools.is_some());
        assert!(info.instructions.unwrap().contains("execute"));
    }

    #[tokio::test]
    async fn test_execute_returns_structured_rows() {
        let service = create_test_service(MockDriver::new().with_result(StatementResult::rows(
            vec![ColumnMetadata::new("X", "fixed", false)],
            vec![vec![json!(1)]],
        )));

        let result = service
            .execute(Parameters(QueryInput::new("SELECT 1 AS x")))
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(false));
        assert_eq!(result.structured_content, Some(json!({ "results": [{ "X": 1 }] })));
    }

    #[tokio::test]
    async fn test_execute_missing_query_is_tool_error() {
        let service = create_test_service(MockDriver::new());
        let result = service
            .execute(Parameters(QueryInput::default()))
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
        assert_eq!(
            result.structured_content,
            Some(json!({ "error": "Query parameter is required" }))
        );
    }
}
