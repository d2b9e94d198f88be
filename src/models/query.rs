//! Query-related data models.
//!
//! This module defines the tool request, what a driver reports for a
//! statement, and the outcome shapes returned to the caller.

use crate::error::{WarehouseError, WarehouseResult};
use schemars::JsonSchema;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value as JsonValue;

/// Message attached to row-affecting outcomes.
pub const AFFECTED_MESSAGE: &str = "Query executed successfully";

/// Raw input of the `execute` tool.
///
/// Every field is optional on the wire so that a missing query reaches the
/// executor and gets the regular error response instead of a protocol error.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct QueryInput {
    /// SQL statement to execute. Sent to Snowflake as-is.
    #[serde(default)]
    pub query: Option<String>,
    /// Database to run against. Defaults to SNOWFLAKE_DATABASE.
    #[serde(default)]
    pub database: Option<String>,
    /// Schema to run against. Defaults to SNOWFLAKE_SCHEMA.
    #[serde(default)]
    pub schema: Option<String>,
}

impl QueryInput {
    /// Create input for the given query text.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Self::default()
        }
    }

    /// Set the database override.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the schema override.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }
}

/// A validated query request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    /// Never empty or whitespace-only
    pub query: String,
    pub database: Option<String>,
    pub schema: Option<String>,
}

impl TryFrom<QueryInput> for QueryRequest {
    type Error = WarehouseError;

    fn try_from(input: QueryInput) -> WarehouseResult<Self> {
        let query = input
            .query
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(WarehouseError::query_required)?;

        Ok(Self {
            query,
            database: input.database.filter(|s| !s.trim().is_empty()),
            schema: input.schema.filter(|s| !s.trim().is_empty()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    /// Snowflake result type (e.g., "fixed", "text", "timestamp_ntz")
    pub type_name: String,
    pub nullable: bool,
    /// Digits after the decimal point for `fixed` columns
    pub scale: Option<i64>,
}

impl ColumnMetadata {
    /// Create new column metadata.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            nullable,
            scale: None,
        }
    }

    /// Set the scale.
    pub fn with_scale(mut self, scale: i64) -> Self {
        self.scale = Some(scale);
        self
    }
}

/// What the driver reports for one executed statement.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementResult {
    /// True when the statement produced a result set
    pub returns_rows: bool,
    /// Result columns in driver order. Empty unless `returns_rows`.
    pub columns: Vec<ColumnMetadata>,
    /// Decoded values, one inner vector per row, aligned with `columns`
    pub rows: Vec<Vec<JsonValue>>,
    /// Driver-reported affected-row count
    pub rows_affected: u64,
}

impl StatementResult {
    /// Create a result for a row-returning statement.
    pub fn rows(columns: Vec<ColumnMetadata>, rows: Vec<Vec<JsonValue>>) -> Self {
        let rows_affected = rows.len() as u64;
        Self {
            returns_rows: true,
            columns,
            rows,
            rows_affected,
        }
    }

    /// Create a result for a row-affecting statement.
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            returns_rows: false,
            columns: Vec::new(),
            rows: Vec::new(),
            rows_affected,
        }
    }

    /// Get the number of rows in the result set.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Classified outcome of a successful query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// Result set; each row maps column name to value in column order
    Rows {
        columns: Vec<String>,
        rows: Vec<serde_json::Map<String, JsonValue>>,
    },
    /// Statement changed rows instead of returning them
    Affected { row_count: u64, message: String },
}

impl QueryOutcome {
    /// Create a row-affecting outcome with the standard message.
    pub fn affected(row_count: u64) -> Self {
        Self::Affected {
            row_count,
            message: AFFECTED_MESSAGE.to_string(),
        }
    }

    /// Number of rows returned or affected.
    pub fn row_count(&self) -> u64 {
        match self {
            Self::Rows { rows, .. } => rows.len() as u64,
            Self::Affected { row_count, .. } => *row_count,
        }
    }
}

/// Rows serialize as a bare array of objects, affected counts as
/// `{"rowcount": n, "message": ...}`.
impl Serialize for QueryOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Rows { rows, .. } => {
                let mut seq = serializer.serialize_seq(Some(rows.len()))?;
                for row in rows {
                    seq.serialize_element(row)?;
                }
                seq.end()
            }
            Self::Affected { row_count, message } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("rowcount", row_count)?;
                map.serialize_entry("message", message)?;
                map.end()
            }
        }
    }
}

/// Response of the `execute` tool: `{"results": ...}` or `{"error": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExecuteResponse {
    Success { results: QueryOutcome },
    Failure { error: String },
}

impl ExecuteResponse {
    /// Build a failure response from any warehouse error.
    pub fn from_error(err: &WarehouseError) -> Self {
        Self::Failure {
            error: err.to_string(),
        }
    }

    /// Check if this response carries an error.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    /// Get the outcome of a successful response.
    pub fn results(&self) -> Option<&QueryOutcome> {
        match self {
            Self::Success { results } => Some(results),
            Self::Failure { .. } => None,
        }
    }

    /// Get the error message of a failed response.
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error } => Some(error),
        }
    }

    /// Render as a JSON value.
    pub fn to_value(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({ "error": format!("Failed to serialize results: {e}") })
        })
    }
}

impl From<WarehouseResult<QueryOutcome>> for ExecuteResponse {
    fn from(result: WarehouseResult<QueryOutcome>) -> Self {
        match result {
            Ok(results) => Self::Success { results },
            Err(err) => Self::from_error(&err),
        }
    }
}
