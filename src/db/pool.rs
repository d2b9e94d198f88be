//! Connection pool management.
//!
//! An [`Engine`] is a pooled capability to open warehouse sessions for one
//! connection descriptor. It is cheap to create: no session is opened until
//! the first [`Engine::acquire`].
//!
//! # Pool policy
//!
//! - At most `max_pool_size + max_overflow` connections are checked out at
//!   once; waiting longer than `acquire_timeout` yields `PoolExhausted`.
//! - Returned connections stay idle up to `max_pool_size`; the rest are closed.
//! - Idle connections older than `connection_recycle_age` are closed and
//!   replaced on checkout.
//!
//! # Disposal
//!
//! [`Engine::dispose`] closes all idle connections and makes every later
//! return close its connection instead of pooling it. Dropping an engine that
//! was never disposed does the same from a spawned task and logs a warning.

use crate::config::PoolPolicy;
use crate::db::driver::{Driver, WarehouseConnection};
use crate::error::{WarehouseError, WarehouseResult};
use crate::models::{ConnectionDescriptor, StatementResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Engine lifecycle counters shared with the factory that created the engine.
#[derive(Debug, Default)]
pub struct LifecycleCounters {
    created: AtomicUsize,
    disposed: AtomicUsize,
}

impl LifecycleCounters {
    pub(crate) fn record_created(&self) {
        self.created.fetch_add(1, Ordering::AcqRel);
    }

    fn record_disposed(&self) {
        self.disposed.fetch_add(1, Ordering::AcqRel);
    }

    /// Number of engines created so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Acquire)
    }

    /// Number of engines disposed so far.
    pub fn disposed(&self) -> usize {
        self.disposed.load(Ordering::Acquire)
    }
}

/// Point-in-time view of one engine's pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Sessions opened through the driver
    pub opened: usize,
    /// Sessions closed by the pool
    pub closed: usize,
    /// Sessions waiting in the pool for reuse
    pub idle: usize,
    /// Sessions currently checked out
    pub in_use: usize,
}

struct IdleConnection {
    conn: Box<dyn WarehouseConnection>,
    created_at: Instant,
}

struct EngineInner {
    descriptor: ConnectionDescriptor,
    policy: PoolPolicy,
    driver: Arc<dyn Driver>,
    permits: Arc<Semaphore>,
    /// Never held across an await point.
    idle: Mutex<Vec<IdleConnection>>,
    disposed: AtomicBool,
    opened: AtomicUsize,
    closed: AtomicUsize,
    counters: Option<Arc<LifecycleCounters>>,
}

impl EngineInner {
    fn lock_idle(&self) -> std::sync::MutexGuard<'_, Vec<IdleConnection>> {
        // A panic while holding the lock cannot leave the Vec inconsistent
        self.idle.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Flip to disposed. Returns false if already disposed.
    fn mark_disposed(&self) -> bool {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.permits.close();
        if let Some(counters) = &self.counters {
            counters.record_disposed();
        }
        true
    }

    fn take_idle(&self) -> Vec<IdleConnection> {
        std::mem::take(&mut *self.lock_idle())
    }

    async fn close_connection(&self, conn: &mut Box<dyn WarehouseConnection>) {
        conn.close().await;
        self.closed.fetch_add(1, Ordering::AcqRel);
    }

    /// Return a connection: pool it, or close it when disposed or full.
    async fn checkin(&self, conn: Box<dyn WarehouseConnection>, created_at: Instant) {
        let rejected = {
            let mut idle = self.lock_idle();
            if self.disposed.load(Ordering::Acquire) || idle.len() >= self.policy.max_pool_size
            {
                Some(conn)
            } else {
                idle.push(IdleConnection { conn, created_at });
                None
            }
        };

        if let Some(mut conn) = rejected {
            self.close_connection(&mut conn).await;
        }
    }
}

/// A pooled, lazily connecting handle to the warehouse.
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("descriptor", &self.inner.descriptor.to_string())
            .field("policy", &self.inner.policy)
            .field("driver", &self.inner.driver.name())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create a new engine. No connection is opened here.
    pub fn new(
        descriptor: ConnectionDescriptor,
        policy: PoolPolicy,
        driver: Arc<dyn Driver>,
    ) -> Self {
        Self::with_counters(descriptor, policy, driver, None)
    }

    pub(crate) fn with_counters(
        descriptor: ConnectionDescriptor,
        policy: PoolPolicy,
        driver: Arc<dyn Driver>,
        counters: Option<Arc<LifecycleCounters>>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                descriptor,
                policy,
                driver,
                permits: Arc::new(Semaphore::new(policy.max_connections())),
                idle: Mutex::new(Vec::new()),
                disposed: AtomicBool::new(false),
                opened: AtomicUsize::new(0),
                closed: AtomicUsize::new(0),
                counters,
            }),
        }
    }

    /// Check if the engine has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Get the current pool statistics.
    pub fn stats(&self) -> PoolStats {
        let idle = self.inner.lock_idle().len();
        let in_use = if self.is_disposed() {
            0
        } else {
            self.inner.policy.max_connections() - self.inner.permits.available_permits()
        };
        PoolStats {
            opened: self.inner.opened.load(Ordering::Acquire),
            closed: self.inner.closed.load(Ordering::Acquire),
            idle,
            in_use,
        }
    }

    /// Check out a connection, opening or recycling one as needed.
    pub async fn acquire(&self) -> WarehouseResult<PooledConnection> {
        let acquire_timeout = self.inner.policy.acquire_timeout;
        let checkout = self.inner.permits.clone().acquire_owned();
        let permit = match timeout(acquire_timeout, checkout).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(WarehouseError::internal("Engine has been disposed")),
            Err(_) => {
                warn!(
                    timeout_secs = acquire_timeout.as_secs(),
                    "Timed out waiting for a pooled connection"
                );
                return Err(WarehouseError::pool_exhausted(acquire_timeout.as_secs()));
            }
        };

        let recycle_age = self.inner.policy.connection_recycle_age;
        loop {
            let candidate = self.inner.lock_idle().pop();
            match candidate {
                Some(idle) if idle.created_at.elapsed() < recycle_age => {
                    debug!("Reusing pooled connection");
                    return Ok(PooledConnection::new(
                        idle.conn,
                        idle.created_at,
                        Arc::clone(&self.inner),
                        permit,
                    ));
                }
                Some(mut stale) => {
                    debug!(
                        age_secs = stale.created_at.elapsed().as_secs(),
                        "Recycling connection past its maximum age"
                    );
                    self.inner.close_connection(&mut stale.conn).await;
                }
                None => break,
            }
        }

        let conn = self.inner.driver.connect(&self.inner.descriptor).await?;
        self.inner.opened.fetch_add(1, Ordering::AcqRel);
        debug!(driver = self.inner.driver.name(), "Opened new connection");

        Ok(PooledConnection::new(
            conn,
            Instant::now(),
            Arc::clone(&self.inner),
            permit,
        ))
    }

    /// Close every pooled connection and stop reuse.
    ///
    /// Returns false if the engine was already disposed.
    pub async fn dispose(&self) -> bool {
        if !self.inner.mark_disposed() {
            return false;
        }

        let idle = self.inner.take_idle();
        let count = idle.len();
        for mut entry in idle {
            self.inner.close_connection(&mut entry.conn).await;
        }
        debug!(closed = count, "Engine disposed");
        true
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if !self.inner.mark_disposed() {
            return;
        }

        let idle = self.inner.take_idle();
        warn!(
            idle = idle.len(),
            "Engine dropped without dispose - closing connections in background"
        );
        if idle.is_empty() {
            return;
        }

        // Without a runtime the sessions are dropped unclosed
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let inner = Arc::clone(&self.inner);
            handle.spawn(async move {
                for mut entry in idle {
                    inner.close_connection(&mut entry.conn).await;
                }
            });
        }
    }
}

/// A connection checked out of an [`Engine`].
///
/// Call [`PooledConnection::release`] when done. Dropping it instead closes
/// the session from a spawned task rather than returning it to the pool.
pub struct PooledConnection {
    conn: Option<Box<dyn WarehouseConnection>>,
    created_at: Instant,
    engine: Arc<EngineInner>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    fn new(
        conn: Box<dyn WarehouseConnection>,
        created_at: Instant,
        engine: Arc<EngineInner>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            conn: Some(conn),
            created_at,
            engine,
            _permit: permit,
        }
    }

    fn conn(&mut self) -> WarehouseResult<&mut Box<dyn WarehouseConnection>> {
        self.conn
            .as_mut()
            .ok_or_else(|| WarehouseError::internal("Connection already released"))
    }

    /// Open a transaction scope.
    pub async fn begin(&mut self) -> WarehouseResult<()> {
        self.conn()?.begin().await
    }

    /// Execute SQL text.
    pub async fn execute(&mut self, sql: &str) -> WarehouseResult<StatementResult> {
        self.conn()?.execute(sql).await
    }

    /// Commit the open transaction.
    pub async fn commit(&mut self) -> WarehouseResult<()> {
        self.conn()?.commit().await
    }

    /// Roll back the open transaction.
    pub async fn rollback(&mut self) -> WarehouseResult<()> {
        self.conn()?.rollback().await
    }

    /// Return the connection to its engine.
    pub async fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            self.engine.checkin(conn, self.created_at).await;
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };

        warn!("Pooled connection dropped without release - closing it");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let engine = Arc::clone(&self.engine);
            handle.spawn(async move {
                engine.close_connection(&mut conn).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock::MockDriver;
    use crate::models::Authenticator;
    use std::time::Duration;

    fn descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor {
            account: "xy12345".to_string(),
            user: "analyst".to_string(),
            warehouse: "COMPUTE_WH".to_string(),
            role: None,
            authenticator: Authenticator::ExternalBrowser,
            database: Some("SANDBOX".to_string()),
            schema: None,
        }
    }

    fn policy(max_pool_size: usize, max_overflow: usize) -> PoolPolicy {
        PoolPolicy {
            max_pool_size,
            max_overflow,
            acquire_timeout: Duration::from_millis(50),
            connection_recycle_age: Duration::from_secs(1800),
        }
    }

    #[tokio::test]
    async fn test_engine_is_lazy() {
        let driver = Arc::new(MockDriver::new());
        let engine = Engine::new(descriptor(), PoolPolicy::default(), driver.clone());
        assert_eq!(driver.stats().connects, 0);
        assert_eq!(engine.stats().opened, 0);
        engine.dispose().await;
    }

    #[tokio::test]
    async fn test_released_connection_is_reused() {
        let driver = Arc::new(MockDriver::new());
        let engine = Engine::new(descriptor(), policy(2, 0), driver.clone());

        engine.acquire().await.unwrap().release().await;
        engine.acquire().await.unwrap().release().await;

        assert_eq!(driver.stats().connects, 1);
        assert_eq!(engine.stats().idle, 1);
        engine.dispose().await;
    }

    #[tokio::test]
    async fn test_overflow_connections_closed_on_return() {
        let driver = Arc::new(MockDriver::new());
        let engine = Engine::new(descriptor(), policy(1, 1), driver.clone());

        let first = engine.acquire().await.unwrap();
        let second = engine.acquire().await.unwrap();
        assert_eq!(engine.stats().in_use, 2);

        first.release().await;
        second.release().await;

        let stats = engine.stats();
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.closed, 1);
        assert_eq!(stats.in_use, 0);
        engine.dispose().await;
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_exhausted() {
        let driver = Arc::new(MockDriver::new());
        let engine = Engine::new(descriptor(), policy(1, 0), driver);

        let held = engine.acquire().await.unwrap();
        let Err(err) = engine.acquire().await else {
            panic!("expected pool exhaustion");
        };
        assert!(matches!(err, WarehouseError::PoolExhausted { .. }));

        held.release().await;
        engine.dispose().await;
    }

    #[tokio::test]
    async fn test_stale_connection_recycled() {
        let driver = Arc::new(MockDriver::new());
        let engine = Engine::new(
            descriptor(),
            PoolPolicy {
                connection_recycle_age: Duration::ZERO,
                ..policy(2, 0)
            },
            driver.clone(),
        );

        engine.acquire().await.unwrap().release().await;
        engine.acquire().await.unwrap().release().await;

        let stats = driver.stats();
        assert_eq!(stats.connects, 2);
        assert_eq!(stats.closes, 1);
        engine.dispose().await;
    }

    #[tokio::test]
    async fn test_dispose_closes_idle_and_late_returns() {
        let driver = Arc::new(MockDriver::new());
        let engine = Engine::new(descriptor(), policy(2, 0), driver.clone());

        let idle = engine.acquire().await.unwrap();
        let busy = engine.acquire().await.unwrap();
        idle.release().await;

        assert!(engine.dispose().await);
        assert!(!engine.dispose().await);
        busy.release().await;

        let stats = driver.stats();
        assert_eq!(stats.connects, 2);
        assert_eq!(stats.closes, 2);
        assert!(engine.acquire().await.is_err());
    }

    #[tokio::test]
    async fn test_connect_failure_frees_permit() {
        let driver = Arc::new(MockDriver::new().fail_connect("authentication failed"));
        let engine = Engine::new(descriptor(), policy(1, 0), driver);

        assert!(matches!(
            engine.acquire().await,
            Err(WarehouseError::Connection { .. })
        ));
        assert_eq!(engine.stats().in_use, 0);
        engine.dispose().await;
    }

    #[tokio::test]
    async fn test_lifecycle_counters() {
        let counters = Arc::new(LifecycleCounters::default());
        let driver = Arc::new(MockDriver::new());
        let engine = Engine::with_counters(
            descriptor(),
            PoolPolicy::default(),
            driver,
            Some(counters.clone()),
        );
        engine.dispose().await;
        engine.dispose().await;
        drop(engine);
        assert_eq!(counters.disposed(), 1);
    }
}
