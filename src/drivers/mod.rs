//! Gateway drivers.
//!
//! Each bank driver exports a `NAME` constant and an `initializer` suitable
//! for [`Registry::register`](crate::registry::Registry::register).

pub mod behpardakht;
pub mod fanava;
pub mod mock;
pub mod parsian;
pub mod zarinpal;

use crate::driver::Initializer;
use crate::errors::{GatewayError, GatewayResult};
use crate::fetcher::TransactionFetcher;
use crate::types::OriginalTransaction;

/// Name and initializer of every built-in bank driver.
///
/// # Examples
///
/// ```
/// use shaparak_rs::drivers;
///
/// let names: Vec<&str> = drivers::builtin().iter().map(|(name, _)| *name).collect();
/// assert!(names.contains(&"zarinpal_v4"));
/// ```
pub fn builtin() -> Vec<(&'static str, Initializer)> {
    vec![
        (behpardakht::NAME, behpardakht::initializer as Initializer),
        (parsian::NAME, parsian::initializer as Initializer),
        (fanava::NAME, fanava::initializer as Initializer),
        (zarinpal::NAME, zarinpal::initializer as Initializer),
    ]
}

/// Looks up the purchase-time record, wrapping fetcher failures.
pub(crate) async fn fetch_original(
    driver: &str,
    fetcher: &dyn TransactionFetcher,
    identifier: &str,
) -> GatewayResult<OriginalTransaction> {
    fetcher.fetch(identifier).await.map_err(|e| {
        tracing::warn!(driver, id = identifier, error = %e, "transaction fetcher failed");
        GatewayError::collaborator(
            format!("failed to fetch original transaction '{}'", identifier),
            e,
        )
    })
}
