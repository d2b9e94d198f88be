//! HTTP client for the Snowflake SQL API v2.
//!
//! Submits statements, polls running ones until they finish, and downloads
//! the remaining result partitions.

use crate::error::{WarehouseError, WarehouseResult};
use crate::models::StatementResult;
use crate::snowflake::TokenType;
use crate::snowflake::wire::{
    ErrorResponse, PartitionResponse, RawRow, StatementRequest, StatementResponse,
};
use futures_util::future::try_join_all;
use humansize::{DECIMAL, format_size};
use reqwest::{Client, RequestBuilder, StatusCode};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

const STATEMENTS_PATH: &str = "/api/v2/statements";

/// First wait between status polls; doubles up to `POLL_MAX_INTERVAL`.
const POLL_INITIAL_INTERVAL: Duration = Duration::from_millis(250);
const POLL_MAX_INTERVAL: Duration = Duration::from_secs(2);

/// Outcome of one round trip.
enum Poll {
    Done(StatementResponse),
    Running(StatementResponse),
}

/// Authenticated client bound to one account URL.
#[derive(Clone)]
pub struct SqlApiClient {
    http: Client,
    base_url: Url,
    token: String,
    token_type: TokenType,
    statement_timeout: Duration,
}

impl std::fmt::Debug for SqlApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("token", &"***")
            .field("token_type", &self.token_type)
            .field("statement_timeout", &self.statement_timeout)
            .finish()
    }
}

impl SqlApiClient {
    pub fn new(
        http: Client,
        base_url: Url,
        token: String,
        token_type: TokenType,
        statement_timeout: Duration,
    ) -> Self {
        Self {
            http,
            base_url,
            token,
            token_type,
            statement_timeout,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Statement timeout in whole seconds, as sent to the server.
    pub fn statement_timeout_secs(&self) -> u64 {
        self.statement_timeout.as_secs()
    }

    /// Submit a statement and wait for it to finish.
    pub async fn submit(
        &self,
        request: &StatementRequest<'_>,
    ) -> WarehouseResult<StatementResponse> {
        let mut url = self.endpoint(STATEMENTS_PATH)?;
        url.query_pairs_mut()
            .append_pair("requestId", &Uuid::new_v4().to_string());

        let started = Instant::now();
        let first = self.send(self.http.post(url).json(request)).await?;
        self.wait(first, started).await
    }

    /// Fetch the status and first partition of a statement by handle.
    pub async fn statement(&self, handle: &str) -> WarehouseResult<StatementResponse> {
        let started = Instant::now();
        let first = self.send(self.http.get(self.statement_url(handle)?)).await?;
        self.wait(first, started).await
    }

    /// Turn a finished response into a statement result, downloading any
    /// further partitions.
    pub async fn collect(&self, response: StatementResponse) -> WarehouseResult<StatementResult> {
        let partitions = response.partition_count();
        if !response.returns_rows() || partitions <= 1 {
            return Ok(response.into_result(Vec::new()));
        }

        let handle = response.statement_handle.clone().ok_or_else(|| {
            WarehouseError::internal("Partitioned result without a statement handle")
        })?;
        debug!(
            handle = %handle,
            partitions,
            size = %format_size(response.uncompressed_size(), DECIMAL),
            "Fetching result partitions"
        );

        let extra = try_join_all((1..partitions).map(|p| self.partition(&handle, p))).await?;
        Ok(response.into_result(extra))
    }

    /// Ask the server to cancel a running statement. Failures are logged.
    pub async fn cancel(&self, handle: &str) {
        let url = match self.endpoint(&format!("{STATEMENTS_PATH}/{handle}/cancel")) {
            Ok(url) => url,
            Err(err) => {
                warn!(error = %err, "Cannot build cancel URL");
                return;
            }
        };
        match self.authorize(self.http.post(url)).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(handle, "Statement cancelled");
            }
            Ok(response) => warn!(handle, status = %response.status(), "Cancel rejected"),
            Err(err) => warn!(handle, error = %err, "Cancel request failed"),
        }
    }

    async fn partition(&self, handle: &str, partition: usize) -> WarehouseResult<Vec<RawRow>> {
        let mut url = self.statement_url(handle)?;
        url.query_pairs_mut()
            .append_pair("partition", &partition.to_string());

        let response = self.authorize(self.http.get(url)).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if status != StatusCode::OK {
            return Err(parse_error(status, &body));
        }

        let partition: PartitionResponse = parse_body(&body)?;
        Ok(partition.data)
    }

    async fn wait(&self, mut poll: Poll, started: Instant) -> WarehouseResult<StatementResponse> {
        let mut interval = POLL_INITIAL_INTERVAL;
        loop {
            let running = match poll {
                Poll::Done(response) => return Ok(response),
                Poll::Running(response) => response,
            };

            let handle = running
                .statement_handle
                .ok_or_else(|| WarehouseError::internal("Running statement without a handle"))?;

            if self.timed_out(started) {
                self.cancel(&handle).await;
                return Err(WarehouseError::execution(
                    format!("Statement timed out after {:?}", self.statement_timeout),
                    None,
                    None,
                ));
            }

            tokio::time::sleep(interval).await;
            interval = (interval * 2).min(POLL_MAX_INTERVAL);

            let url = match running.statement_status_url.as_deref() {
                Some(path) => self.endpoint(path)?,
                None => self.statement_url(&handle)?,
            };
            debug!(handle = %handle, "Polling statement status");
            poll = self.send(self.http.get(url)).await?;
        }
    }

    /// A zero timeout leaves the limit to the server.
    fn timed_out(&self, started: Instant) -> bool {
        !self.statement_timeout.is_zero() && started.elapsed() >= self.statement_timeout
    }

    async fn send(&self, builder: RequestBuilder) -> WarehouseResult<Poll> {
        let response = self.authorize(builder).send().await?;
        let status = response.status();
        let body = response.text().await?;

        match status {
            StatusCode::OK => Ok(Poll::Done(parse_body(&body)?)),
            StatusCode::ACCEPTED => Ok(Poll::Running(parse_body(&body)?)),
            _ => Err(parse_error(status, &body)),
        }
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(&self.token)
            .header(
                "X-Snowflake-Authorization-Token-Type",
                self.token_type.as_header(),
            )
            .header("Accept", "application/json")
    }

    fn endpoint(&self, path: &str) -> WarehouseResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| WarehouseError::internal(format!("Invalid endpoint '{}': {}", path, e)))
    }

    fn statement_url(&self, handle: &str) -> WarehouseResult<Url> {
        self.endpoint(&format!("{STATEMENTS_PATH}/{handle}"))
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &str) -> WarehouseResult<T> {
    serde_json::from_str(body)
        .map_err(|e| WarehouseError::internal(format!("Malformed response from Snowflake: {}", e)))
}

/// Map an unsuccessful HTTP status and its body to a warehouse error.
pub(crate) fn parse_error(status: StatusCode, body: &str) -> WarehouseError {
    let parsed: Option<ErrorResponse> = serde_json::from_str(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|e| e.message.clone())
        .unwrap_or_else(|| format!("Snowflake returned HTTP {}: {}", status, body.trim()));

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => WarehouseError::connection(
            format!("Authentication rejected: {}", message),
            "Sign in through the browser again and refresh SNOWFLAKE_TOKEN",
        ),
        StatusCode::REQUEST_TIMEOUT => WarehouseError::execution(
            format!("Statement timed out: {}", message),
            parsed.as_ref().and_then(|e| e.code.clone()),
            parsed.as_ref().and_then(|e| e.sql_state.clone()),
        ),
        _ => match parsed {
            Some(error) => WarehouseError::execution(message, error.code, error.sql_state),
            None => WarehouseError::connection(
                message,
                "Check the account identifier and SNOWFLAKE_HOST",
            ),
        },
    }
}
