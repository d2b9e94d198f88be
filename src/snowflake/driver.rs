//! [`Driver`] implementation over the SQL API.
//!
//! The SQL API keeps no session between requests, so a transaction cannot
//! span several calls. Inside a transaction scope the query is sent as one
//! multi-statement request, `BEGIN TRANSACTION; <query>; COMMIT;`, and the
//! result of the last user statement is fetched by handle. A failing
//! statement aborts the request before `COMMIT`, and Snowflake rolls back the
//! open transaction when the request's session ends.

use crate::db::driver::{Driver, WarehouseConnection};
use crate::error::{WarehouseError, WarehouseResult};
use crate::models::{ConnectionDescriptor, StatementResult, TransactionState};
use crate::snowflake::client::SqlApiClient;
use crate::snowflake::wire::{
    self, MULTI_STATEMENT_ANY, StatementParameters, StatementRequest, StatementResponse,
};
use crate::snowflake::SqlApiOptions;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens SQL API sessions.
#[derive(Debug, Clone)]
pub struct SqlApiDriver {
    http: Client,
    options: SqlApiOptions,
}

impl SqlApiDriver {
    pub fn new(options: SqlApiOptions) -> WarehouseResult<Self> {
        let http = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .gzip(true)
            .build()
            .map_err(|e| WarehouseError::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http, options })
    }
}

/// Account URL for the SQL API.
///
/// `host` wins when set and may omit the scheme. Otherwise the account
/// identifier maps to `https://<account>.snowflakecomputing.com`, lowercased
/// and with underscores replaced by hyphens.
pub fn account_url(account: &str, host: Option<&str>) -> WarehouseResult<Url> {
    let raw = match host {
        Some(host) if host.contains("://") => host.to_string(),
        Some(host) => format!("https://{}", host),
        None => format!(
            "https://{}.snowflakecomputing.com",
            account.trim().to_lowercase().replace('_', "-")
        ),
    };

    Url::parse(&raw)
        .map_err(|e| WarehouseError::config(format!("Invalid Snowflake URL '{}': {}", raw, e)))
}

#[async_trait]
impl Driver for SqlApiDriver {
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> WarehouseResult<Box<dyn WarehouseConnection>> {
        let token_type = self.options.token_type()?;
        let token = self.options.token.clone().ok_or_else(|| {
            WarehouseError::connection(
                format!(
                    "No session token for {}@{} (authenticator={})",
                    descriptor.user, descriptor.account, descriptor.authenticator
                ),
                "Complete the browser sign-in and set SNOWFLAKE_TOKEN",
            )
        })?;

        let base_url = account_url(&descriptor.account, self.options.host.as_deref())?;
        debug!(url = %base_url, "Opening SQL API session");

        let client = SqlApiClient::new(
            self.http.clone(),
            base_url,
            token,
            token_type,
            self.options.statement_timeout,
        );
        Ok(Box::new(SqlApiConnection::new(client, descriptor.clone())))
    }

    fn name(&self) -> &'static str {
        "snowflake-sql-api"
    }
}

/// One logical session against the SQL API.
#[derive(Debug)]
pub struct SqlApiConnection {
    client: SqlApiClient,
    descriptor: ConnectionDescriptor,
    transaction: TransactionState,
    /// Set once a transaction batch, including its COMMIT, has succeeded
    batch_committed: bool,
    closed: bool,
}

impl SqlApiConnection {
    pub fn new(client: SqlApiClient, descriptor: ConnectionDescriptor) -> Self {
        Self {
            client,
            descriptor,
            transaction: TransactionState::Idle,
            batch_committed: false,
            closed: false,
        }
    }

    fn request<'a>(&'a self, statement: &'a str, batch: bool) -> StatementRequest<'a> {
        StatementRequest {
            statement,
            timeout: self.client.statement_timeout_secs(),
            database: self.descriptor.database.as_deref(),
            schema: self.descriptor.schema.as_deref(),
            warehouse: &self.descriptor.warehouse,
            role: self.descriptor.role.as_deref(),
            parameters: batch.then(|| StatementParameters {
                multi_statement_count: MULTI_STATEMENT_ANY.to_string(),
            }),
        }
    }

    async fn execute_batch(&self, sql: &str) -> WarehouseResult<StatementResponse> {
        let batch = wire::transaction_batch(sql).ok_or_else(|| {
            WarehouseError::validation("Query contains no SQL statements, only comments")
        })?;
        let response = self.client.submit(&self.request(&batch, true)).await?;

        let handles = response.statement_handles.unwrap_or_default();
        let handle = wire::last_user_handle(&handles).ok_or_else(|| {
            WarehouseError::internal(format!(
                "Expected at least 3 statement handles, got {}",
                handles.len()
            ))
        })?;
        debug!(handle, statements = handles.len() - 2, "Transaction batch committed");

        self.client.statement(handle).await
    }

    fn ensure_open(&self) -> WarehouseResult<()> {
        if self.closed {
            return Err(WarehouseError::internal("Connection is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl WarehouseConnection for SqlApiConnection {
    async fn begin(&mut self) -> WarehouseResult<()> {
        self.ensure_open()?;
        if self.transaction.is_active() {
            return Err(WarehouseError::internal("Transaction already active"));
        }
        self.transaction = TransactionState::Active;
        self.batch_committed = false;
        Ok(())
    }

    async fn execute(&mut self, sql: &str) -> WarehouseResult<StatementResult> {
        self.ensure_open()?;

        let response = if self.transaction.is_active() {
            if self.batch_committed {
                return Err(WarehouseError::internal(
                    "Only one statement batch per transaction is supported",
                ));
            }
            let response = self.execute_batch(sql).await?;
            self.batch_committed = true;
            response
        } else {
            self.client.submit(&self.request(sql, false)).await?
        };

        self.client.collect(response).await
    }

    async fn commit(&mut self) -> WarehouseResult<()> {
        self.ensure_open()?;
        if !self.transaction.is_active() {
            return Err(WarehouseError::internal("No active transaction"));
        }
        self.transaction = TransactionState::Committed;
        Ok(())
    }

    async fn rollback(&mut self) -> WarehouseResult<()> {
        self.ensure_open()?;
        if self.batch_committed {
            warn!("Rollback requested after the transaction batch committed");
        }
        self.transaction = TransactionState::RolledBack;
        Ok(())
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            debug!(url = %self.client.base_url(), "Closed SQL API session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Authenticator;
    use crate::snowflake::TokenType;

    fn descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor {
            account: "MyOrg-My_Account".to_string(),
            user: "analyst".to_string(),
            warehouse: "COMPUTE_WH".to_string(),
            role: Some("ANALYST".to_string()),
            authenticator: Authenticator::ExternalBrowser,
            database: Some("SANDBOX".to_string()),
            schema: None,
        }
    }

    fn options(token: Option<&str>) -> SqlApiOptions {
        SqlApiOptions {
            token: token.map(String::from),
            token_type: "OAUTH".to_string(),
            host: None,
            statement_timeout: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_account_url() {
        assert_eq!(
            account_url("MyOrg-My_Account", None).unwrap().as_str(),
            "https://myorg-my-account.snowflakecomputing.com/"
        );
        assert_eq!(
            account_url("ignored", Some("xy12345.privatelink.snowflakecomputing.com"))
                .unwrap()
                .as_str(),
            "https://xy12345.privatelink.snowflakecomputing.com/"
        );
        assert_eq!(
            account_url("ignored", Some("http://localhost:8080")).unwrap().as_str(),
            "http://localhost:8080/"
        );
    }

    #[tokio::test]
    async fn test_connect_without_token_fails() {
        let driver = SqlApiDriver::new(options(None)).unwrap();
        let Err(err) = driver.connect(&descriptor()).await else {
            panic!("expected missing token error");
        };
        assert_eq!(err.kind(), "connection");
        assert!(err.suggestion().unwrap().contains("SNOWFLAKE_TOKEN"));
    }

    #[tokio::test]
    async fn test_connect_with_unknown_token_type_fails() {
        let driver = SqlApiDriver::new(SqlApiOptions {
            token_type: "PASSWORD".to_string(),
            ..options(Some("token"))
        })
        .unwrap();
        let Err(err) = driver.connect(&descriptor()).await else {
            panic!("expected token type error");
        };
        assert_eq!(err.kind(), "config");
        assert!(err.to_string().contains("Unknown token type 'PASSWORD'"));
    }

    #[tokio::test]
    async fn test_transaction_state_is_local() {
        let driver = SqlApiDriver::new(options(Some("token"))).unwrap();
        let mut conn = driver.connect(&descriptor()).await.unwrap();

        assert!(conn.commit().await.is_err());
        conn.begin().await.unwrap();
        assert!(conn.begin().await.is_err());
        conn.commit().await.unwrap();

        conn.close().await;
        assert!(conn.begin().await.is_err());
    }

    #[test]
    fn test_request_carries_descriptor_context() {
        let client = SqlApiClient::new(
            Client::new(),
            account_url("xy12345", None).unwrap(),
            "token".to_string(),
            TokenType::Oauth,
            Duration::from_secs(90),
        );
        let conn = SqlApiConnection::new(client, descriptor());
        let request = conn.request("SELECT 1", true);
        assert_eq!(request.timeout, 90);
        assert_eq!(request.database, Some("SANDBOX"));
        assert_eq!(request.warehouse, "COMPUTE_WH");
        assert_eq!(request.role, Some("ANALYST"));
        assert!(request.parameters.is_some());
        assert!(conn.request("SELECT 1", false).parameters.is_none());
        assert_eq!(conn.transaction, TransactionState::Idle);
    }
}
