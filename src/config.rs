//! Driver configuration.
//!
//! Credentials arrive as an untyped string bag per driver. Drivers validate
//! the bag once, at construction, and convert it into their own typed
//! settings; nothing past construction reads a [`DriverConfig`].

use crate::errors::{PayError, Result};
use crate::utils::ensure_payment_url;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

/// Default outbound request timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Key-value credentials for a single driver.
///
/// # Examples
///
/// ```
/// use shaparak_rs::config::DriverConfig;
///
/// let config = DriverConfig::new()
///     .set("terminal_id", "1234")
///     .set("sandbox", "true");
///
/// assert_eq!(config.parse::<i64>("behpardakht_v1", "terminal_id").unwrap(), 1234);
/// assert!(config.flag("behpardakht_v1", "sandbox").unwrap());
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct DriverConfig(HashMap<String, String>);

impl DriverConfig {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a key.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Returns a key's value, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Returns a key's value, failing if it is absent or blank.
    pub fn require(&self, driver: &str, key: &str) -> Result<&str> {
        match self.get(key) {
            Some(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(PayError::config(driver, format!("missing '{}'", key))),
        }
    }

    /// Parses a required key.
    pub fn parse<T>(&self, driver: &str, key: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.require(driver, key)?;
        raw.trim()
            .parse()
            .map_err(|e| PayError::config(driver, format!("'{}' is invalid: {}", key, e)))
    }

    /// Reads a boolean flag. Absent means false; malformed is an error.
    pub fn flag(&self, driver: &str, key: &str) -> Result<bool> {
        match self.get(key).map(str::trim) {
            None | Some("") => Ok(false),
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(PayError::config(
                    driver,
                    format!("'{}' is not a boolean: {}", key, raw),
                )),
            },
        }
    }

    /// Outbound request timeout from `timeout_secs`.
    pub fn timeout(&self, driver: &str) -> Result<Duration> {
        match self.get("timeout_secs") {
            None => Ok(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            Some(_) => {
                let secs: u64 = self.parse(driver, "timeout_secs")?;
                if secs == 0 {
                    return Err(PayError::config(driver, "'timeout_secs' must be positive"));
                }
                Ok(Duration::from_secs(secs))
            }
        }
    }

    /// Returns an endpoint override, or the default. The chosen URL must be
    /// absolute http(s).
    pub fn endpoint(&self, driver: &str, key: &str, default: &str) -> Result<String> {
        let url = self
            .get(key)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(default);
        ensure_payment_url(url)
            .map_err(|e| PayError::config(driver, format!("invalid '{}': {}", key, e.message)))?;
        Ok(url.to_string())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DriverConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Configuration sections for every driver, keyed by driver name.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Per-driver credential bags
    #[serde(default)]
    pub drivers: HashMap<String, DriverConfig>,
}

impl GatewayConfig {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a driver section.
    pub fn with_driver(mut self, name: impl Into<String>, config: DriverConfig) -> Self {
        self.drivers.insert(name.into(), config);
        self
    }

    /// Returns a driver's section.
    pub fn driver(&self, name: &str) -> Option<&DriverConfig> {
        self.drivers.get(name)
    }

    /// Parses a JSON document of the form `{"drivers": {"name": {"key": "value"}}}`.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
