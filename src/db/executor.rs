//! Query execution.
//!
//! One call to [`QueryExecutor::execute`] runs the whole request lifecycle:
//!
//! 1. Validate the request
//! 2. Create an engine for the requested database/schema
//! 3. Check out a connection and run the query inside a transaction
//! 4. Classify the result as rows or an affected-row count
//! 5. Return the connection and dispose the engine, on every path
//!
//! Failures never escape as faults; they become `{ "error": ... }` responses.

use crate::db::engine::EngineFactory;
use crate::db::pool::{Engine, PooledConnection};
use crate::error::{WarehouseError, WarehouseResult};
use crate::models::{ExecuteResponse, QueryInput, QueryOutcome, QueryRequest, StatementResult};
use humansize::{DECIMAL, format_size};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runs `execute` tool calls against engines from one factory.
pub struct QueryExecutor {
    factory: Arc<EngineFactory>,
}

impl QueryExecutor {
    pub fn new(factory: Arc<EngineFactory>) -> Self {
        Self { factory }
    }

    /// Get the engine factory.
    pub fn factory(&self) -> &EngineFactory {
        &self.factory
    }

    /// Execute one request and build the tool response.
    pub async fn execute(&self, input: QueryInput) -> ExecuteResponse {
        let start = Instant::now();
        let result = self.run(input).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(outcome @ QueryOutcome::Rows { .. }) => info!(
                rows = outcome.row_count(),
                size = %format_size(payload_size(outcome), DECIMAL),
                elapsed_ms,
                "Query returned rows"
            ),
            Ok(outcome) => info!(
                rows_affected = outcome.row_count(),
                elapsed_ms,
                "Query executed"
            ),
            Err(err) => warn!(kind = err.kind(), error = %err, elapsed_ms, "Query failed"),
        }

        ExecuteResponse::from(result)
    }

    async fn run(&self, input: QueryInput) -> WarehouseResult<QueryOutcome> {
        let request = QueryRequest::try_from(input)?;
        debug!(
            sql = %request.query,
            database = ?request.database,
            schema = ?request.schema,
            "Executing query"
        );

        let engine = self
            .factory
            .create_engine(request.database.as_deref(), request.schema.as_deref())?;
        let result = run_on_engine(&engine, &request.query).await;
        engine.dispose().await;
        result
    }
}

async fn run_on_engine(engine: &Engine, sql: &str) -> WarehouseResult<QueryOutcome> {
    let mut conn = engine.acquire().await?;
    let result = run_in_transaction(&mut conn, sql).await;
    conn.release().await;
    result
}

/// Commit on success, roll back on any failure.
async fn run_in_transaction(
    conn: &mut PooledConnection,
    sql: &str,
) -> WarehouseResult<QueryOutcome> {
    conn.begin().await?;

    let outcome = match conn.execute(sql).await.and_then(classify) {
        Ok(outcome) => outcome,
        Err(err) => {
            rollback_quietly(conn).await;
            return Err(err);
        }
    };

    if let Err(err) = conn.commit().await {
        rollback_quietly(conn).await;
        return Err(err);
    }
    Ok(outcome)
}

async fn rollback_quietly(conn: &mut PooledConnection) {
    if let Err(err) = conn.rollback().await {
        warn!(error = %err, "Rollback failed");
    }
}

/// Classify a statement result and marshal its rows.
///
/// Each row becomes a mapping from column name to value in column order.
/// Duplicate column names collapse into one key; the last value wins.
pub fn classify(result: StatementResult) -> WarehouseResult<QueryOutcome> {
    if !result.returns_rows {
        return Ok(QueryOutcome::affected(result.rows_affected));
    }

    let columns: Vec<String> = result.columns.into_iter().map(|c| c.name).collect();
    let rows = result
        .rows
        .into_iter()
        .enumerate()
        .map(|(idx, values)| {
            if values.len() != columns.len() {
                return Err(WarehouseError::internal(format!(
                    "Row {} has {} values for {} columns",
                    idx,
                    values.len(),
                    columns.len()
                )));
            }
            Ok(columns
                .iter()
                .cloned()
                .zip(values)
                .collect::<Map<String, JsonValue>>())
        })
        .collect::<WarehouseResult<Vec<_>>>()?;

    Ok(QueryOutcome::Rows { columns, rows })
}

fn payload_size(outcome: &QueryOutcome) -> usize {
    serde_json::to_vec(outcome).map(|v| v.len()).unwrap_or(0)
}
