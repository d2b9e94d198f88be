//! Warehouse access layer.
//!
//! This module provides:
//! - Driver traits the pool and executor are written against
//! - Engine factory and connection pool management
//! - Query execution with transaction scoping and result classification
//! - Snowflake type mappings
//! - An in-memory driver for tests

pub mod driver;
pub mod engine;
pub mod executor;
pub mod mock;
pub mod pool;
pub mod types;

pub use driver::{Driver, WarehouseConnection};
pub use engine::{EngineFactory, EngineStats};
pub use executor::QueryExecutor;
pub use mock::{MockDriver, MockStats};
pub use pool::{Engine, LifecycleCounters, PoolStats, PooledConnection};
