//! SQL API v2 request and response bodies.

use crate::db::types::decode_row;
use crate::models::{ColumnMetadata, StatementResult};
use serde::{Deserialize, Serialize};

/// Allow any number of statements in one request.
pub const MULTI_STATEMENT_ANY: &str = "0";

/// Raw `jsonv2` row: one optional string per column.
pub type RawRow = Vec<Option<String>>;

/// Body of `POST /api/v2/statements`.
#[derive(Debug, Serialize)]
pub struct StatementRequest<'a> {
    pub statement: &'a str,
    /// Server-side statement timeout in seconds
    pub timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<&'a str>,
    pub warehouse: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<StatementParameters>,
}

#[derive(Debug, Serialize)]
pub struct StatementParameters {
    #[serde(rename = "MULTI_STATEMENT_COUNT")]
    pub multi_statement_count: String,
}

/// Response body for submitted or polled statements.
///
/// The same shape is returned for finished (200) and running (202)
/// statements; running ones carry no result set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementResponse {
    pub code: Option<String>,
    pub sql_state: Option<String>,
    pub message: Option<String>,
    pub statement_handle: Option<String>,
    /// Present for multi-statement requests, one handle per statement
    pub statement_handles: Option<Vec<String>>,
    pub statement_status_url: Option<String>,
    pub result_set_meta_data: Option<ResultSetMetaData>,
    #[serde(default)]
    pub data: Vec<RawRow>,
    /// Present for DML statements only
    pub stats: Option<DmlStats>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSetMetaData {
    pub num_rows: Option<u64>,
    pub format: Option<String>,
    #[serde(default)]
    pub row_type: Vec<RowType>,
    #[serde(default)]
    pub partition_info: Vec<PartitionInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RowType {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub scale: Option<i64>,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionInfo {
    pub row_count: u64,
    pub uncompressed_size: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DmlStats {
    #[serde(default)]
    pub num_rows_inserted: u64,
    #[serde(default)]
    pub num_rows_updated: u64,
    #[serde(default)]
    pub num_rows_deleted: u64,
    #[serde(default)]
    pub num_dml_duplicates: u64,
}

impl DmlStats {
    /// Total rows touched by the statement.
    ///
    /// `numDmlDuplicates` is the "number of multi-joined rows updated" column:
    /// target rows an UPDATE or MERGE changed more than once through a join.
    pub fn total(&self) -> u64 {
        self.num_rows_inserted
            + self.num_rows_updated
            + self.num_rows_deleted
            + self.num_dml_duplicates
    }
}

/// Body of `GET /api/v2/statements/{handle}?partition=n`.
#[derive(Debug, Default, Deserialize)]
pub struct PartitionResponse {
    #[serde(default)]
    pub data: Vec<RawRow>,
}

/// Error body returned with 4xx/5xx statuses.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub code: Option<String>,
    pub message: Option<String>,
    pub sql_state: Option<String>,
    pub statement_handle: Option<String>,
}

impl StatementResponse {
    /// True unless the response reports DML counts.
    pub fn returns_rows(&self) -> bool {
        self.stats.is_none()
    }

    /// Number of result partitions, including the inline first one.
    pub fn partition_count(&self) -> usize {
        self.result_set_meta_data
            .as_ref()
            .map(|meta| meta.partition_info.len())
            .unwrap_or(0)
    }

    /// Uncompressed result size across all partitions, if reported.
    pub fn uncompressed_size(&self) -> u64 {
        self.result_set_meta_data
            .as_ref()
            .map(|meta| {
                meta.partition_info
                    .iter()
                    .filter_map(|p| p.uncompressed_size)
                    .sum()
            })
            .unwrap_or(0)
    }

    pub fn columns(&self) -> Vec<ColumnMetadata> {
        self.result_set_meta_data
            .as_ref()
            .map(|meta| {
                meta.row_type
                    .iter()
                    .map(|col| ColumnMetadata {
                        name: col.name.clone(),
                        type_name: col.type_name.clone(),
                        nullable: col.nullable,
                        scale: col.scale,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Build the statement result, appending later partitions in order.
    pub fn into_result(self, partitions: Vec<Vec<RawRow>>) -> StatementResult {
        if let Some(stats) = self.stats {
            return StatementResult::affected(stats.total());
        }

        let columns = self.columns();
        let rows = self
            .data
            .iter()
            .chain(partitions.iter().flatten())
            .map(|raw| decode_row(raw, &columns))
            .collect();
        StatementResult::rows(columns, rows)
    }
}

/// Wrap SQL text so that it runs in one transaction.
///
/// Trailing semicolons, whitespace and comments are stripped so that every
/// fragment between `BEGIN` and `COMMIT` is a user statement. Returns `None`
/// when nothing but comments and separators remain.
pub fn transaction_batch(sql: &str) -> Option<String> {
    let body = &sql[..statement_end(sql)];
    if body.is_empty() {
        return None;
    }
    Some(format!("BEGIN TRANSACTION;\n{body};\nCOMMIT;"))
}

/// Byte offset just past the last character that belongs to a statement.
///
/// Quoted strings, quoted identifiers and `$$` blocks count as statement text
/// even when they contain comment markers or semicolons.
fn statement_end(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut end = 0;
    let mut i = 0;
    while i < bytes.len() {
        let next = bytes.get(i + 1).copied();
        match (bytes[i], next) {
            (b'-', Some(b'-')) | (b'/', Some(b'/')) => {
                i = find_from(bytes, i + 2, b"\n").unwrap_or(bytes.len());
            }
            (b'/', Some(b'*')) => {
                i = find_from(bytes, i + 2, b"*/").map_or(bytes.len(), |pos| pos + 2);
            }
            (b'$', Some(b'$')) => {
                i = find_from(bytes, i + 2, b"$$").map_or(bytes.len(), |pos| pos + 2);
                end = i;
            }
            (quote @ (b'\'' | b'"'), _) => {
                i = skip_quoted(bytes, i + 1, quote);
                end = i;
            }
            (b';', _) => i += 1,
            (c, _) if c.is_ascii_whitespace() => i += 1,
            _ => {
                i += 1;
                end = i;
            }
        }
    }
    end
}

fn find_from(bytes: &[u8], start: usize, needle: &[u8]) -> Option<usize> {
    bytes
        .get(start..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| start + pos)
}

/// Offset just past the closing quote, or the end of input if unterminated.
fn skip_quoted(bytes: &[u8], mut i: usize, quote: u8) -> usize {
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if quote == b'\'' => i += 2,
            c if c == quote => {
                if bytes.get(i + 1) == Some(&quote) {
                    i += 2;
                } else {
                    return i + 1;
                }
            }
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Handle of the last user statement in a transaction batch.
///
/// The first handle belongs to `BEGIN` and the last one to `COMMIT`.
pub fn last_user_handle(handles: &[String]) -> Option<&str> {
    if handles.len() < 3 {
        return None;
    }
    handles.get(handles.len() - 2).map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SELECT_RESPONSE: &str = r#"{
        "resultSetMetaData": {
            "numRows": 2,
            "format": "jsonv2",
            "partitionInfo": [{ "rowCount": 2, "uncompressedSize": 64 }],
            "rowType": [
                { "name": "ID", "type": "fixed", "scale": 0, "precision": 38, "nullable": false },
                { "name": "NAME", "type": "text", "nullable": true },
                { "name": "PRICE", "type": "fixed", "scale": 2, "precision": 10, "nullable": true }
            ]
        },
        "data": [["1", "widget", "9.99"], ["2", null, null]],
        "code": "090001",
        "statementStatusUrl": "/api/v2/statements/01b2c3?requestId=abc",
        "requestId": "abc",
        "sqlState": "00000",
        "statementHandle": "01b2c3",
        "message": "Statement executed successfully.",
        "createdOn": 1700000000000
    }"#;

    const UPDATE_RESPONSE: &str = r#"{
        "resultSetMetaData": {
            "numRows": 1,
            "format": "jsonv2",
            "partitionInfo": [{ "rowCount": 1, "uncompressedSize": 4 }],
            "rowType": [
                { "name": "number of rows updated", "type": "fixed", "scale": 0, "nullable": false },
                { "name": "number of multi-joined rows updated", "type": "fixed", "scale": 0, "nullable": false }
            ]
        },
        "data": [["1", "0"]],
        "code": "090001",
        "statementHandle": "01b2c4",
        "message": "Statement executed successfully.",
        "stats": { "numRowsInserted": 0, "numRowsUpdated": 1, "numRowsDeleted": 0, "numDmlDuplicates": 0 }
    }"#;

    #[test]
    fn test_parse_select_response() {
        let response: StatementResponse = serde_json::from_str(SELECT_RESPONSE).unwrap();
        assert!(response.returns_rows());
        assert_eq!(response.partition_count(), 1);
        assert_eq!(response.uncompressed_size(), 64);

        let result = response.into_result(Vec::new());
        assert!(result.returns_rows);
        assert_eq!(result.columns.len(), 3);
        assert_eq!(result.columns[2].scale, Some(2));
        assert_eq!(result.rows[0], vec![json!(1), json!("widget"), json!("9.99")]);
        assert_eq!(result.rows[1], vec![json!(2), json!(null), json!(null)]);
    }

    #[test]
    fn test_parse_update_response() {
        let response: StatementResponse = serde_json::from_str(UPDATE_RESPONSE).unwrap();
        assert!(!response.returns_rows());
        let result = response.into_result(Vec::new());
        assert!(!result.returns_rows);
        assert_eq!(result.rows_affected, 1);
    }

    #[test]
    fn test_partitions_appended_in_order() {
        let response: StatementResponse = serde_json::from_str(SELECT_RESPONSE).unwrap();
        let extra = vec![
            vec![vec![Some("3".to_string()), None, None]],
            vec![vec![Some("4".to_string()), None, None]],
        ];
        let result = response.into_result(extra);
        let ids: Vec<_> = result.rows.iter().map(|r| r[0].clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(2), json!(3), json!(4)]);
    }

    #[test]
    fn test_parse_pending_response() {
        let body = r#"{
            "code": "333334",
            "message": "Asynchronous execution in progress. Use provided query id to perform query monitoring and management.",
            "statementHandle": "01b2c5",
            "statementStatusUrl": "/api/v2/statements/01b2c5"
        }"#;
        let response: StatementResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.statement_handle.as_deref(), Some("01b2c5"));
        assert!(response.result_set_meta_data.is_none());
        assert!(response.data.is_empty());
    }

    #[test]
    fn test_parse_error_response() {
        let body = r#"{
            "code": "002003",
            "message": "SQL compilation error:\nObject 'NOPE' does not exist or not authorized.",
            "sqlState": "42S02",
            "statementHandle": "01b2c6"
        }"#;
        let error: ErrorResponse = serde_json::from_str(body).unwrap();
        assert_eq!(error.code.as_deref(), Some("002003"));
        assert_eq!(error.sql_state.as_deref(), Some("42S02"));
    }

    #[test]
    fn test_request_serialization() {
        let request = StatementRequest {
            statement: "SELECT 1",
            timeout: 60,
            database: Some("SANDBOX"),
            schema: None,
            warehouse: "COMPUTE_WH",
            role: None,
            parameters: Some(StatementParameters {
                multi_statement_count: MULTI_STATEMENT_ANY.to_string(),
            }),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "statement": "SELECT 1",
                "timeout": 60,
                "database": "SANDBOX",
                "warehouse": "COMPUTE_WH",
                "parameters": { "MULTI_STATEMENT_COUNT": "0" }
            })
        );
    }

    #[test]
    fn test_transaction_batch() {
        assert_eq!(
            transaction_batch("UPDATE t SET a = 1;;  \n").as_deref(),
            Some("BEGIN TRANSACTION;\nUPDATE t SET a = 1;\nCOMMIT;")
        );
        assert_eq!(
            transaction_batch("SELECT 1 -- trailing").as_deref(),
            Some("BEGIN TRANSACTION;\nSELECT 1;\nCOMMIT;")
        );
    }

    #[test]
    fn test_transaction_batch_drops_comment_after_last_statement() {
        assert_eq!(
            transaction_batch("SELECT 1; -- note").as_deref(),
            Some("BEGIN TRANSACTION;\nSELECT 1;\nCOMMIT;")
        );
        assert_eq!(
            transaction_batch("SELECT 1;\n/* done */\n// end\n").as_deref(),
            Some("BEGIN TRANSACTION;\nSELECT 1;\nCOMMIT;")
        );
        // Leading and inner comments are part of the statements
        let sql = "-- first\nINSERT INTO t VALUES (1); -- one\nSELECT 2; -- two";
        assert_eq!(
            transaction_batch(sql).as_deref(),
            Some(
                "BEGIN TRANSACTION;\n-- first\nINSERT INTO t VALUES (1); -- one\nSELECT 2;\nCOMMIT;"
            )
        );
    }

    #[test]
    fn test_transaction_batch_keeps_quoted_text() {
        assert_eq!(
            transaction_batch("SELECT '-- not a comment;'").as_deref(),
            Some("BEGIN TRANSACTION;\nSELECT '-- not a comment;';\nCOMMIT;")
        );
        assert_eq!(
            transaction_batch("SELECT 'it''s', 'a\\'b' AS \"x;--\"").as_deref(),
            Some("BEGIN TRANSACTION;\nSELECT 'it''s', 'a\\'b' AS \"x;--\";\nCOMMIT;")
        );
        assert_eq!(
            transaction_batch("SELECT $$ -- ; $$ /* tail */").as_deref(),
            Some("BEGIN TRANSACTION;\nSELECT $$ -- ; $$;\nCOMMIT;")
        );
    }

    #[test]
    fn test_transaction_batch_without_statements() {
        assert_eq!(transaction_batch("-- nothing here"), None);
        assert_eq!(transaction_batch(" ; /* */ ;"), None);
    }

    #[test]
    fn test_last_user_handle() {
        let handles: Vec<String> = ["begin", "first", "second", "commit"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(last_user_handle(&handles), Some("second"));
        assert_eq!(last_user_handle(&handles[..2]), None);
    }
}
