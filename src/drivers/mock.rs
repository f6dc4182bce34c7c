//! In-process driver for tests and demos.
//!
//! Without overrides the mock behaves like a well-mannered single-call
//! gateway: purchases return `MOCK-<key>` authorities, callbacks carrying
//! `Authority`, `Status` (`OK`, `CANCEL`, anything else fails) and an
//! optional `Amount` are checked against the fetcher, and a second verify of
//! the same authority reports `AlreadyVerified`. Each operation can be
//! replaced with a closure, and every call is counted.
//!
//! [`MockDriver::two_phase`] behaves like a verify-then-settle gateway
//! instead: the payment page is reached with `?Authority=<authority>` and a
//! separate settle step, counted on its own, runs after a passed amount check.

use crate::callback::Callback;
use crate::config::DriverConfig;
use crate::driver::{Driver, RedirectPayer, Refundable};
use crate::drivers::fetch_original;
use crate::errors::{GatewayError, GatewayResult, Result};
use crate::fetcher::TransactionFetcher;
use crate::lifecycle::{check_amount, AmountVerified, Integrity, Lifecycle, Phase};
use crate::types::{
    PaymentResponse, RefundRequest, RefundResponse, TransactionRequest, VerificationResult,
};
use crate::utils::{ensure_payment_url, join_path, with_query};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Registry name of this driver.
pub const NAME: &str = "mock";

const PAYMENT_URL: &str = "https://mock.gateway.local/pay/";

type PurchaseFn = dyn Fn(&TransactionRequest) -> GatewayResult<PaymentResponse> + Send + Sync;
type VerifyFn = dyn Fn(&Callback) -> GatewayResult<VerificationResult> + Send + Sync;
type RefundFn = dyn Fn(&RefundRequest) -> GatewayResult<RefundResponse> + Send + Sync;

/// Programmable driver.
///
/// # Examples
///
/// ```
/// use shaparak_rs::drivers::mock::MockDriver;
/// use shaparak_rs::types::PaymentResponse;
///
/// let mock = MockDriver::new().on_purchase(|req| {
///     assert_eq!(req.amount, 50_000);
///     Ok(PaymentResponse::get("MOCK-AUTH-12345", "http://mock.local/MOCK-AUTH-12345"))
/// });
/// assert_eq!(mock.purchase_calls(), 0);
/// ```
pub struct MockDriver {
    payment_url: String,
    two_phase: bool,
    on_purchase: Option<Box<PurchaseFn>>,
    on_verify: Option<Box<VerifyFn>>,
    on_refund: Option<Box<RefundFn>>,
    settled: Mutex<HashSet<String>>,
    purchase_calls: AtomicUsize,
    verify_calls: AtomicUsize,
    settle_calls: AtomicUsize,
    refund_calls: AtomicUsize,
}

impl MockDriver {
    /// Creates a mock with the default behaviour and no refund capability.
    pub fn new() -> Self {
        Self {
            payment_url: PAYMENT_URL.to_string(),
            two_phase: false,
            on_purchase: None,
            on_verify: None,
            on_refund: None,
            settled: Mutex::new(HashSet::new()),
            purchase_calls: AtomicUsize::new(0),
            verify_calls: AtomicUsize::new(0),
            settle_calls: AtomicUsize::new(0),
            refund_calls: AtomicUsize::new(0),
        }
    }

    /// Creates a mock that settles in a separate step after verification.
    pub fn two_phase() -> Self {
        Self {
            two_phase: true,
            ..Self::new()
        }
    }

    /// Builds a mock from configuration. Accepts an optional `payment_url`
    /// and a `two_phase` flag.
    pub fn from_config(config: &DriverConfig) -> Result<Self> {
        let payment_url = config.endpoint(NAME, "payment_url", PAYMENT_URL)?;
        Ok(Self {
            payment_url,
            two_phase: config.flag(NAME, "two_phase")?,
            ..Self::new()
        })
    }

    /// Replaces the purchase behaviour.
    pub fn on_purchase<F>(mut self, f: F) -> Self
    where
        F: Fn(&TransactionRequest) -> GatewayResult<PaymentResponse> + Send + Sync + 'static,
    {
        self.on_purchase = Some(Box::new(f));
        self
    }

    /// Replaces the verify behaviour. The fetcher is not consulted.
    pub fn on_verify<F>(mut self, f: F) -> Self
    where
        F: Fn(&Callback) -> GatewayResult<VerificationResult> + Send + Sync + 'static,
    {
        self.on_verify = Some(Box::new(f));
        self
    }

    /// Enables the refund capability with the given behaviour.
    pub fn on_refund<F>(mut self, f: F) -> Self
    where
        F: Fn(&RefundRequest) -> GatewayResult<RefundResponse> + Send + Sync + 'static,
    {
        self.on_refund = Some(Box::new(f));
        self
    }

    /// Number of purchase calls so far.
    pub fn purchase_calls(&self) -> usize {
        self.purchase_calls.load(Ordering::SeqCst)
    }

    /// Number of verify calls so far.
    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    /// Number of settle steps run so far. Always zero for single-call mocks.
    pub fn settle_calls(&self) -> usize {
        self.settle_calls.load(Ordering::SeqCst)
    }

    /// Number of refund calls so far.
    pub fn refund_calls(&self) -> usize {
        self.refund_calls.load(Ordering::SeqCst)
    }

    async fn default_verify(
        &self,
        callback: &Callback,
        fetcher: &dyn TransactionFetcher,
    ) -> GatewayResult<VerificationResult> {
        let authority = callback.require("Authority")?;
        let status = callback.require("Status")?;
        let echoed: Option<i64> = callback.parse_optional("Amount")?;
        let mut lifecycle = Lifecycle::callback(NAME, authority);

        match status {
            "OK" => {}
            "CANCEL" => {
                lifecycle.terminate("cancelled");
                return Ok(VerificationResult::cancelled());
            }
            other => {
                lifecycle.terminate("declined");
                return Ok(VerificationResult::failed(GatewayError::business(
                    GatewayError::LOCAL_CODE,
                    format!("mock payment declined (Status={})", other),
                )));
            }
        }
        lifecycle.advance(Phase::Verifying)?;

        let original = fetch_original(NAME, fetcher, authority).await?;
        let verified = match check_amount(&original, echoed.unwrap_or(original.amount)) {
            Integrity::Verified(verified) => verified,
            Integrity::Mismatch {
                expected,
                confirmed,
            } => {
                lifecycle.terminate("amount mismatch");
                return Ok(VerificationResult::amount_mismatch(expected, confirmed));
            }
        };

        let reference_id = format!("REF-{}", authority);
        let newly_settled = if self.two_phase {
            if self.settled.lock().await.contains(authority) {
                false
            } else {
                lifecycle.advance(Phase::Confirmed)?;
                self.settle(&verified, authority).await
            }
        } else {
            self.settled.lock().await.insert(authority.to_string())
        };
        if !newly_settled {
            lifecycle.terminate("already settled");
            return Ok(VerificationResult::already_verified(reference_id));
        }
        lifecycle.advance(Phase::Settled)?;
        Ok(VerificationResult::success(reference_id)
            .with_data("Authority", authority)
            .with_data("Amount", verified.amount()))
    }

    /// Separate capture step of the two-phase mode.
    async fn settle(&self, _verified: &AmountVerified, authority: &str) -> bool {
        self.settle_calls.fetch_add(1, Ordering::SeqCst);
        self.settled.lock().await.insert(authority.to_string())
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDriver")
            .field("payment_url", &self.payment_url)
            .field("two_phase", &self.two_phase)
            .field("purchase_calls", &self.purchase_calls())
            .field("verify_calls", &self.verify_calls())
            .field("settle_calls", &self.settle_calls())
            .field("refund_calls", &self.refund_calls())
            .finish_non_exhaustive()
    }
}

/// Registry constructor.
pub fn initializer(config: &DriverConfig) -> Result<Arc<dyn Driver>> {
    Ok(Arc::new(MockDriver::from_config(config)?))
}

impl Driver for MockDriver {
    fn name(&self) -> &str {
        NAME
    }

    fn as_redirect_payer(&self) -> Option<&dyn RedirectPayer> {
        Some(self)
    }

    fn as_refundable(&self) -> Option<&dyn Refundable> {
        self.on_refund.as_ref().map(|_| self as &dyn Refundable)
    }
}

#[async_trait]
impl RedirectPayer for MockDriver {
    async fn purchase(&self, request: &TransactionRequest) -> GatewayResult<PaymentResponse> {
        self.purchase_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(f) = &self.on_purchase {
            return f(request);
        }

        let key = request.idempotency_key.trim();
        if key.is_empty() {
            return Err(GatewayError::invalid_request("idempotency key must not be empty"));
        }
        if request.amount <= 0 {
            return Err(GatewayError::invalid_request("amount must be positive"));
        }
        ensure_payment_url(&request.callback_url)?;

        let authority = format!("MOCK-{}", key);
        let payment_url = if self.two_phase {
            with_query(&self.payment_url, "Authority", &authority)?
        } else {
            join_path(&self.payment_url, &authority)?
        };
        Ok(PaymentResponse::get(authority, payment_url))
    }

    async fn verify_and_confirm(
        &self,
        callback: &Callback,
        fetcher: &dyn TransactionFetcher,
    ) -> GatewayResult<VerificationResult> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        match &self.on_verify {
            Some(f) => f(callback),
            None => self.default_verify(callback, fetcher).await,
        }
    }
}

#[async_trait]
impl Refundable for MockDriver {
    async fn refund(&self, request: &RefundRequest) -> GatewayResult<RefundResponse> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        match &self.on_refund {
            Some(f) => f(request),
            None => Err(GatewayError::invalid_request("mock refund is not configured")),
        }
    }
}
