//! Gateway driver capability traits.
//!
//! Every driver implements [`Driver`]. Drivers that take payers through the
//! bank's payment page also implement [`RedirectPayer`], and drivers that can
//! reverse a captured payment implement [`Refundable`]. Callers holding a
//! `dyn Driver` ask for a capability with [`Driver::redirect_payer`] or
//! [`Driver::refundable`] rather than downcasting.

use crate::callback::Callback;
use crate::config::DriverConfig;
use crate::errors::{GatewayResult, PayError, Result};
use crate::fetcher::TransactionFetcher;
use crate::types::{
    PaymentResponse, RefundRequest, RefundResponse, TransactionRequest, VerificationResult,
};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Optional behaviour a driver may offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Purchase followed by verify-and-confirm on the callback
    RedirectPayment,
    /// Post-hoc reversal of a captured payment
    Refund,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::RedirectPayment => f.write_str("redirect payment"),
            Capability::Refund => f.write_str("refund"),
        }
    }
}

/// Base trait of every gateway driver.
///
/// Drivers hold only immutable settings and a shared HTTP client, so a single
/// instance may serve any number of concurrent requests.
pub trait Driver: Send + Sync {
    /// Returns the registry name of this driver (e.g. "behpardakht_v1").
    fn name(&self) -> &str;

    /// Returns the redirect-payment capability, if implemented.
    fn as_redirect_payer(&self) -> Option<&dyn RedirectPayer> {
        None
    }

    /// Returns the refund capability, if implemented.
    fn as_refundable(&self) -> Option<&dyn Refundable> {
        None
    }

    /// Checks a single capability.
    fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::RedirectPayment => self.as_redirect_payer().is_some(),
            Capability::Refund => self.as_refundable().is_some(),
        }
    }

    /// Lists every capability this driver offers.
    fn capabilities(&self) -> Vec<Capability> {
        [Capability::RedirectPayment, Capability::Refund]
            .into_iter()
            .filter(|c| self.supports(*c))
            .collect()
    }

    /// Returns the redirect-payment capability or an `Unsupported` error.
    fn redirect_payer(&self) -> Result<&dyn RedirectPayer> {
        self.as_redirect_payer().ok_or_else(|| PayError::Unsupported {
            driver: self.name().to_string(),
            capability: Capability::RedirectPayment,
        })
    }

    /// Returns the refund capability or an `Unsupported` error.
    fn refundable(&self) -> Result<&dyn Refundable> {
        self.as_refundable().ok_or_else(|| PayError::Unsupported {
            driver: self.name().to_string(),
            capability: Capability::Refund,
        })
    }
}

/// Redirect-based purchase flow.
#[async_trait]
pub trait RedirectPayer: Send + Sync {
    /// Registers the purchase with the gateway and returns where to send the payer.
    ///
    /// On success `authority` is non-empty and `payment_url` is an absolute URL.
    /// The caller must persist the amount keyed by the identifier the driver's
    /// `verify_and_confirm` will later look up.
    async fn purchase(&self, request: &TransactionRequest) -> GatewayResult<PaymentResponse>;

    /// Processes the gateway callback and, when the payer paid, verifies and
    /// captures the payment.
    ///
    /// Business outcomes (decline, cancellation, amount mismatch, repeat
    /// verification) come back as `Ok` with the matching status. `Err` is
    /// reserved for a malformed callback, transport or protocol failures, and
    /// fetcher failures. No capture call is made unless the confirmed amount
    /// equals the amount returned by `fetcher`.
    async fn verify_and_confirm(
        &self,
        callback: &Callback,
        fetcher: &dyn TransactionFetcher,
    ) -> GatewayResult<VerificationResult>;
}

/// Post-hoc reversal.
#[async_trait]
pub trait Refundable: Send + Sync {
    /// Reverses a captured payment.
    async fn refund(&self, request: &RefundRequest) -> GatewayResult<RefundResponse>;
}

/// Named driver constructor. Fails without side effects on bad configuration.
pub type Initializer = fn(&DriverConfig) -> Result<Arc<dyn Driver>>;
