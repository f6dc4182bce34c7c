//! Inbound callback representation.
//!
//! After paying, the gateway sends the payer back to the caller's callback
//! URL with a handful of string fields, either in the query string or as a
//! posted form. Drivers only need lookup by name, so the HTTP layer hands
//! them a [`Callback`] instead of a framework request type.

use crate::errors::{GatewayError, GatewayResult, Result};
use std::collections::HashMap;
use std::str::FromStr;

/// String-keyed fields delivered to the callback endpoint.
///
/// # Examples
///
/// ```
/// use shaparak_rs::callback::Callback;
///
/// let callback = Callback::from_urlencoded("Authority=A0001&Status=OK").unwrap();
/// assert_eq!(callback.get("Status"), Some("OK"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Callback {
    fields: HashMap<String, String>,
}

impl Callback {
    /// Builds a callback from key/value pairs. Later duplicates win.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Decodes a query string or `application/x-www-form-urlencoded` body.
    pub fn from_urlencoded(encoded: &str) -> Result<Self> {
        let pairs: Vec<(String, String)> =
            serde_urlencoded::from_str(encoded.trim_start_matches('?'))?;
        Ok(Self::from_pairs(pairs))
    }

    /// Returns a field, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Returns a trimmed non-empty field, if present.
    pub fn get_non_empty(&self, name: &str) -> Option<&str> {
        self.get(name).map(str::trim).filter(|v| !v.is_empty())
    }

    /// Returns a trimmed field, failing if it is absent or blank.
    pub fn require(&self, name: &str) -> GatewayResult<&str> {
        self.get_non_empty(name)
            .ok_or_else(|| GatewayError::callback(format!("callback is missing '{}'", name)))
    }

    /// Parses a required field.
    pub fn parse<T>(&self, name: &str) -> GatewayResult<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        let raw = self.require(name)?;
        raw.parse().map_err(|e| {
            GatewayError::callback(format!("callback field '{}' is malformed: {}", name, raw))
                .with_cause(e)
        })
    }

    /// Parses an optional field. Absent or blank is `None`; malformed is an error.
    pub fn parse_optional<T>(&self, name: &str) -> GatewayResult<Option<T>>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.get_non_empty(name) {
            None => Ok(None),
            Some(_) => self.parse(name).map(Some),
        }
    }

    /// All fields, for audit records.
    pub fn fields(&self) -> &HashMap<String, String> {
        &self.fields
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Callback {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}
