//! Engine factory.
//!
//! Resolves the process-wide warehouse settings plus per-request
//! database/schema overrides into a connection descriptor, and wraps it in a
//! lazily connecting [`Engine`].

use crate::config::{PoolPolicy, WarehouseSettings};
use crate::db::driver::Driver;
use crate::db::pool::{Engine, LifecycleCounters};
use crate::error::{WarehouseError, WarehouseResult};
use crate::models::{Authenticator, ConnectionDescriptor};
use std::sync::Arc;
use tracing::debug;

/// Engine lifecycle counts for one factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStats {
    pub created: usize,
    pub disposed: usize,
}

/// Builds engines for the configured warehouse.
pub struct EngineFactory {
    settings: Arc<WarehouseSettings>,
    driver: Arc<dyn Driver>,
    policy: PoolPolicy,
    counters: Arc<LifecycleCounters>,
}

impl EngineFactory {
    /// Create a factory with the default pool policy.
    pub fn new(settings: Arc<WarehouseSettings>, driver: Arc<dyn Driver>) -> Self {
        Self {
            settings,
            driver,
            policy: PoolPolicy::default(),
            counters: Arc::new(LifecycleCounters::default()),
        }
    }

    /// Replace the pool policy.
    pub fn with_policy(mut self, policy: PoolPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Build the descriptor for the given overrides.
    ///
    /// Absent or blank overrides fall back to the configured defaults.
    pub fn descriptor(
        &self,
        database: Option<&str>,
        schema: Option<&str>,
    ) -> WarehouseResult<ConnectionDescriptor> {
        let settings = &*self.settings;

        let missing: Vec<&str> = [
            ("SNOWFLAKE_ACCOUNT", settings.account.is_none()),
            ("SNOWFLAKE_USER", settings.user.is_none()),
            ("SNOWFLAKE_WAREHOUSE", settings.warehouse.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, absent)| absent.then_some(name))
        .collect();

        let (Some(account), Some(user), Some(warehouse)) =
            (&settings.account, &settings.user, &settings.warehouse)
        else {
            return Err(WarehouseError::config(format!(
                "Missing required environment variables: {}",
                missing.join(", ")
            )));
        };

        Ok(ConnectionDescriptor {
            account: account.clone(),
            user: user.clone(),
            warehouse: warehouse.clone(),
            role: settings.role.clone(),
            authenticator: Authenticator::ExternalBrowser,
            database: override_or(database, &settings.database),
            schema: override_or(schema, &settings.schema),
        })
    }

    /// Create an engine. Opens no connection.
    pub fn create_engine(
        &self,
        database: Option<&str>,
        schema: Option<&str>,
    ) -> WarehouseResult<Engine> {
        self.policy.validate().map_err(WarehouseError::config)?;
        let descriptor = self.descriptor(database, schema)?;
        debug!(
            target_url = %descriptor,
            driver = self.driver.name(),
            max_connections = self.policy.max_connections(),
            "Creating engine"
        );

        self.counters.record_created();
        Ok(Engine::with_counters(
            descriptor,
            self.policy,
            Arc::clone(&self.driver),
            Some(Arc::clone(&self.counters)),
        ))
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            created: self.counters.created(),
            disposed: self.counters.disposed(),
        }
    }
}

fn override_or(value: Option<&str>, fallback: &Option<String>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .or_else(|| fallback.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock::MockDriver;

    fn settings() -> WarehouseSettings {
        WarehouseSettings {
            account: Some("xy12345".to_string()),
            user: Some("analyst".to_string()),
            warehouse: Some("COMPUTE_WH".to_string()),
            role: Some("ANALYST".to_string()),
            database: Some("SANDBOX".to_string()),
            schema: Some("PUBLIC".to_string()),
        }
    }

    fn build_factory(settings: WarehouseSettings) -> (EngineFactory, Arc<MockDriver>) {
        let driver = Arc::new(MockDriver::new());
        (EngineFactory::new(Arc::new(settings), driver.clone()), driver)
    }

    #[test]
    fn test_defaults_used_without_overrides() {
        let (factory, _) = build_factory(settings());
        let descriptor = factory.descriptor(None, Some("  ")).unwrap();
        assert_eq!(descriptor.database.as_deref(), Some("SANDBOX"));
        assert_eq!(descriptor.schema.as_deref(), Some("PUBLIC"));
        assert_eq!(descriptor.authenticator, Authenticator::ExternalBrowser);
    }

    #[test]
    fn test_overrides_win() {
        let (factory, _) = build_factory(settings());
        let descriptor = factory.descriptor(Some("ANALYTICS"), Some("RAW")).unwrap();
        assert_eq!(descriptor.database.as_deref(), Some("ANALYTICS"));
        assert_eq!(descriptor.schema.as_deref(), Some("RAW"));
        assert_eq!(descriptor.role.as_deref(), Some("ANALYST"));
    }

    #[test]
    fn test_missing_settings_named_in_error() {
        let (factory, _) = build_factory(WarehouseSettings {
            account: None,
            warehouse: None,
            ..settings()
        });
        let err = factory.create_engine(None, None).unwrap_err();
        let message = err.to_string();
        assert_eq!(err.kind(), "config");
        assert!(message.contains("SNOWFLAKE_ACCOUNT"));
        assert!(message.contains("SNOWFLAKE_WAREHOUSE"));
        assert!(!message.contains("SNOWFLAKE_USER"));
        assert_eq!(factory.stats().created, 0);
    }

    #[tokio::test]
    async fn test_create_engine_is_lazy_and_counted() {
        let (factory, driver) = build_factory(settings());
        let engine = factory.create_engine(None, None).unwrap();
        assert_eq!(driver.stats().connects, 0);
        assert_eq!(factory.stats().created, 1);

        engine.dispose().await;
        assert_eq!(
            factory.stats(),
            EngineStats {
                created: 1,
                disposed: 1
            }
        );
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let (factory, _) = build_factory(settings());
        let factory = factory.with_policy(PoolPolicy {
            max_pool_size: 0,
            max_overflow: 0,
            ..PoolPolicy::default()
        });
        assert!(factory.create_engine(None, None).is_err());
    }
}
