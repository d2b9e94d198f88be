//! Warehouse driver interface.
//!
//! The pool and the executor only ever talk to these two traits. The SQL API
//! client in [`crate::snowflake`] implements them for Snowflake, and
//! [`super::mock::MockDriver`] implements them in memory for tests.

use crate::error::WarehouseResult;
use crate::models::{ConnectionDescriptor, StatementResult};
use async_trait::async_trait;

/// Opens sessions against the warehouse.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Open a new session for the given descriptor.
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> WarehouseResult<Box<dyn WarehouseConnection>>;

    /// Name of this driver for logging.
    fn name(&self) -> &'static str;
}

/// One open session.
#[async_trait]
pub trait WarehouseConnection: Send {
    /// Open a transaction scope.
    async fn begin(&mut self) -> WarehouseResult<()>;

    /// Execute SQL text verbatim and report rows or the affected-row count.
    async fn execute(&mut self, sql: &str) -> WarehouseResult<StatementResult>;

    /// Make the open transaction's changes permanent.
    async fn commit(&mut self) -> WarehouseResult<()>;

    /// Discard the open transaction's changes.
    async fn rollback(&mut self) -> WarehouseResult<()>;

    /// Close the session. Must be safe to call more than once.
    async fn close(&mut self);
}
