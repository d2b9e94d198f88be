//! In-memory driver for tests.
//!
//! Results are scripted up front and handed out in order, one per executed
//! statement. Every session lifecycle call is counted so tests can assert
//! that nothing is left open.

use crate::db::driver::{Driver, WarehouseConnection};
use crate::error::{WarehouseError, WarehouseResult};
use crate::models::{ConnectionDescriptor, StatementResult, TransactionState};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

enum Scripted {
    Result(StatementResult),
    Failure {
        message: String,
        code: Option<String>,
    },
}

#[derive(Default)]
struct MockState {
    script: VecDeque<Scripted>,
    stats: MockStats,
    descriptors: Vec<ConnectionDescriptor>,
}

/// Snapshot of everything the mock has been asked to do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockStats {
    pub connects: usize,
    pub closes: usize,
    pub begins: usize,
    pub commits: usize,
    pub rollbacks: usize,
    /// SQL text in execution order
    pub statements: Vec<String>,
}

impl MockStats {
    /// Sessions opened and not yet closed.
    pub fn open_connections(&self) -> usize {
        self.connects - self.closes
    }
}

/// Scriptable in-memory [`Driver`].
#[derive(Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
    connect_failure: Option<String>,
    commit_failure: Option<String>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a result for the next executed statement.
    pub fn with_result(self, result: StatementResult) -> Self {
        self.lock().script.push_back(Scripted::Result(result));
        self
    }

    /// Queue a warehouse failure for the next executed statement.
    pub fn with_failure(self, message: impl Into<String>, code: Option<&str>) -> Self {
        self.lock().script.push_back(Scripted::Failure {
            message: message.into(),
            code: code.map(String::from),
        });
        self
    }

    /// Make every connect attempt fail.
    pub fn fail_connect(mut self, message: impl Into<String>) -> Self {
        self.connect_failure = Some(message.into());
        self
    }

    /// Make every commit fail.
    pub fn fail_commit(mut self, message: impl Into<String>) -> Self {
        self.commit_failure = Some(message.into());
        self
    }

    pub fn stats(&self) -> MockStats {
        self.lock().stats.clone()
    }

    /// Descriptors passed to `connect`, in order.
    pub fn descriptors(&self) -> Vec<ConnectionDescriptor> {
        self.lock().descriptors.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> WarehouseResult<Box<dyn WarehouseConnection>> {
        if let Some(message) = &self.connect_failure {
            return Err(WarehouseError::connection(
                message.clone(),
                "Sign in through the browser again",
            ));
        }

        {
            let mut state = self.lock();
            state.stats.connects += 1;
            state.descriptors.push(descriptor.clone());
        }

        Ok(Box::new(MockConnection {
            driver: self.clone(),
            transaction: TransactionState::Idle,
            closed: false,
        }))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

struct MockConnection {
    driver: MockDriver,
    transaction: TransactionState,
    closed: bool,
}

impl MockConnection {
    fn ensure_open(&self) -> WarehouseResult<()> {
        if self.closed {
            return Err(WarehouseError::internal("Connection is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl WarehouseConnection for MockConnection {
    async fn begin(&mut self) -> WarehouseResult<()> {
        self.ensure_open()?;
        if self.transaction.is_active() {
            return Err(WarehouseError::internal("Transaction already active"));
        }
        self.driver.lock().stats.begins += 1;
        self.transaction = TransactionState::Active;
        Ok(())
    }

    async fn execute(&mut self, sql: &str) -> WarehouseResult<StatementResult> {
        self.ensure_open()?;
        let next = {
            let mut state = self.driver.lock();
            state.stats.statements.push(sql.to_string());
            state.script.pop_front()
        };

        match next {
            Some(Scripted::Result(result)) => Ok(result),
            Some(Scripted::Failure { message, code }) => {
                Err(WarehouseError::execution(message, code, None))
            }
            None => Ok(StatementResult::affected(0)),
        }
    }

    async fn commit(&mut self) -> WarehouseResult<()> {
        self.ensure_open()?;
        if !self.transaction.is_active() {
            return Err(WarehouseError::internal("No active transaction"));
        }
        if let Some(message) = &self.driver.commit_failure {
            self.transaction = TransactionState::RolledBack;
            return Err(WarehouseError::execution(message.clone(), None, None));
        }
        self.driver.lock().stats.commits += 1;
        self.transaction = TransactionState::Committed;
        Ok(())
    }

    async fn rollback(&mut self) -> WarehouseResult<()> {
        self.ensure_open()?;
        self.driver.lock().stats.rollbacks += 1;
        self.transaction = TransactionState::RolledBack;
        Ok(())
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.driver.lock().stats.closes += 1;
        }
    }
}
