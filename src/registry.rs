//! Driver registry.
//!
//! The registry owns the constructed driver instances. It is built once at
//! startup from a [`GatewayConfig`], populated with [`Registry::register`],
//! and then shared (typically behind an `Arc`) with request handlers, which
//! call [`Registry::resolve`]. Registration and lookup share one
//! reader/writer lock: lookups run in parallel, registrations are exclusive.

use crate::config::{DriverConfig, GatewayConfig};
use crate::driver::{Driver, Initializer};
use crate::errors::{PayError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Named, constructed gateway drivers.
pub struct Registry {
    config: GatewayConfig,
    drivers: RwLock<HashMap<String, Arc<dyn Driver>>>,
}

impl Registry {
    /// Creates an empty registry over the given configuration sections.
    ///
    /// # Examples
    ///
    /// ```
    /// use shaparak_rs::config::{DriverConfig, GatewayConfig};
    /// use shaparak_rs::registry::Registry;
    ///
    /// let config = GatewayConfig::new()
    ///     .with_driver("zarinpal_v4", DriverConfig::new().set("merchant_id", "xxxx"));
    /// let registry = Registry::new(config);
    /// ```
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            drivers: RwLock::new(HashMap::new()),
        }
    }

    /// Constructs and registers a driver under `name`.
    ///
    /// Fails if `name` is already registered, if the configuration has no
    /// section for `name`, or if the constructor fails. A failed registration
    /// leaves the registry unchanged.
    pub async fn register<F>(&self, name: &str, init: F) -> Result<()>
    where
        F: FnOnce(&DriverConfig) -> Result<Arc<dyn Driver>>,
    {
        let mut drivers = self.drivers.write().await;

        if drivers.contains_key(name) {
            return Err(PayError::AlreadyRegistered(name.to_string()));
        }

        let driver_config = self
            .config
            .driver(name)
            .ok_or_else(|| PayError::MissingDriverConfig(name.to_string()))?;

        let driver = init(driver_config).map_err(|e| PayError::DriverInit {
            name: name.to_string(),
            source: Box::new(e),
        })?;

        tracing::info!(
            driver = name,
            capabilities = ?driver.capabilities(),
            "registered payment driver"
        );
        drivers.insert(name.to_string(), driver);
        Ok(())
    }

    /// Registers every driver in `initializers` that has a configuration
    /// section, skipping the rest. Returns the names registered.
    ///
    /// Stops at the first failure; drivers registered before it stay.
    pub async fn register_configured<'a, I>(&self, initializers: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = (&'a str, Initializer)>,
    {
        let mut registered = Vec::new();
        for (name, init) in initializers {
            if self.config.driver(name).is_none() {
                tracing::debug!(driver = name, "no configuration section, skipping");
                continue;
            }
            self.register(name, init).await?;
            registered.push(name.to_string());
        }
        Ok(registered)
    }

    /// Returns the driver registered under `name`.
    pub async fn resolve(&self, name: &str) -> Result<Arc<dyn Driver>> {
        self.drivers
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| PayError::DriverNotFound(name.to_string()))
    }

    /// Returns true if a driver is registered under `name`.
    pub async fn contains(&self, name: &str) -> bool {
        self.drivers.read().await.contains_key(name)
    }

    /// Lists registered driver names, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.drivers.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("configured", &self.config.drivers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::mock::MockDriver;

    fn config() -> GatewayConfig {
        GatewayConfig::new()
            .with_driver("mock", DriverConfig::new())
            .with_driver("other", DriverConfig::new())
    }

    fn mock_init(_: &DriverConfig) -> Result<Arc<dyn Driver>> {
        Ok(Arc::new(MockDriver::new()))
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let registry = Registry::new(config());
        registry.register("mock", mock_init).await.unwrap();

        let driver = registry.resolve("mock").await.unwrap();
        assert_eq!(driver.name(), "mock");
        assert!(registry.contains("mock").await);
        assert_eq!(registry.names().await, vec!["mock".to_string()]);
    }

    #[tokio::test]
    async fn test_duplicate_registration_keeps_first() {
        let registry = Registry::new(config());
        registry.register("mock", mock_init).await.unwrap();
        let first = registry.resolve("mock").await.unwrap();

        let err = registry.register("mock", mock_init).await.unwrap_err();
        assert!(matches!(err, PayError::AlreadyRegistered(ref n) if n == "mock"));

        let still = registry.resolve("mock").await.unwrap();
        assert!(Arc::ptr_eq(&first, &still));
    }

    #[tokio::test]
    async fn test_missing_config_section() {
        let registry = Registry::new(config());
        let err = registry.register("absent", mock_init).await.unwrap_err();
        assert!(matches!(err, PayError::MissingDriverConfig(_)));
        assert!(!registry.contains("absent").await);
    }

    #[tokio::test]
    async fn test_failing_constructor_is_not_registered() {
        let registry = Registry::new(config());
        let err = registry
            .register("other", |_| Err(PayError::config("other", "missing 'x'")))
            .await
            .unwrap_err();
        assert!(matches!(err, PayError::DriverInit { .. }));
        assert!(matches!(
            registry.resolve("other").await,
            Err(PayError::DriverNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_register_configured_skips_unconfigured() {
        let config = GatewayConfig::new().with_driver(
            "zarinpal_v4",
            DriverConfig::new().set("merchant_id", "00000000-0000-0000-0000-000000000000"),
        );
        let registry = Registry::new(config);
        let names = registry
            .register_configured(crate::drivers::builtin())
            .await
            .unwrap();
        assert_eq!(names, vec!["zarinpal_v4".to_string()]);
        assert!(!registry.contains("parsian_v1").await);
    }

    #[tokio::test]
    async fn test_resolve_unknown() {
        let registry = Registry::new(config());
        let err = registry.resolve("nope").await.err().unwrap();
        assert_eq!(err.to_string(), "driver 'nope' not found or not registered");
    }
}
