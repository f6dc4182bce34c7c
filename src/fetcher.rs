//! Transaction lookup collaborator.
//!
//! Drivers never persist anything. Before confirming a payment they ask the
//! caller, through a [`TransactionFetcher`], what amount was originally
//! requested for the authority or order id named in the callback.

use crate::errors::BoxError;
use crate::types::OriginalTransaction;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use tokio::sync::RwLock;

/// Looks up the transaction recorded at purchase time.
///
/// Implementations must return the exact amount recorded for `identifier`,
/// or an error if the identifier is unknown.
#[async_trait]
pub trait TransactionFetcher: Send + Sync {
    /// Fetches the original transaction for an authority or order id.
    async fn fetch(&self, identifier: &str) -> Result<OriginalTransaction, BoxError>;
}

/// Adapts an async closure into a [`TransactionFetcher`].
///
/// # Examples
///
/// ```
/// use shaparak_rs::errors::BoxError;
/// use shaparak_rs::fetcher::FnFetcher;
/// use shaparak_rs::types::OriginalTransaction;
///
/// let fetcher = FnFetcher::new(|_id: String| async move {
///     Ok::<_, BoxError>(OriginalTransaction { amount: 10_000 })
/// });
/// ```
pub struct FnFetcher<F> {
    f: F,
}

impl<F> FnFetcher<F> {
    /// Wraps a closure taking the identifier by value.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> TransactionFetcher for FnFetcher<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<OriginalTransaction, BoxError>> + Send + 'static,
{
    async fn fetch(&self, identifier: &str) -> Result<OriginalTransaction, BoxError> {
        (self.f)(identifier.to_string()).await
    }
}

/// Error returned by [`MemoryFetcher`] for unknown identifiers.
#[derive(Debug, thiserror::Error)]
#[error("transaction '{0}' not found")]
pub struct TransactionNotFound(pub String);

/// In-memory fetcher, handy for demos and tests.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    transactions: RwLock<HashMap<String, OriginalTransaction>>,
}

impl MemoryFetcher {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the amount requested under an identifier.
    pub async fn insert(&self, identifier: impl Into<String>, amount: i64) {
        self.transactions
            .write()
            .await
            .insert(identifier.into(), OriginalTransaction { amount });
    }
}

#[async_trait]
impl TransactionFetcher for MemoryFetcher {
    async fn fetch(&self, identifier: &str) -> Result<OriginalTransaction, BoxError> {
        self.transactions
            .read()
            .await
            .get(identifier)
            .copied()
            .ok_or_else(|| TransactionNotFound(identifier.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_fetcher() {
        let fetcher = MemoryFetcher::new();
        fetcher.insert("1001", 10_000).await;

        assert_eq!(fetcher.fetch("1001").await.unwrap().amount, 10_000);
        let err = fetcher.fetch("1002").await.unwrap_err();
        assert_eq!(err.to_string(), "transaction '1002' not found");
    }

    #[tokio::test]
    async fn test_fn_fetcher() {
        let fetcher = FnFetcher::new(|id: String| async move {
            if id == "A1" {
                Ok::<_, BoxError>(OriginalTransaction { amount: 500 })
            } else {
                Err("unknown".into())
            }
        });

        assert_eq!(fetcher.fetch("A1").await.unwrap().amount, 500);
        assert!(fetcher.fetch("A2").await.is_err());
    }
}
