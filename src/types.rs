//! Core type definitions shared by every gateway driver.
//!
//! These are the gateway-neutral shapes of the payment lifecycle: the
//! caller's purchase request, the redirect instructions returned by a
//! purchase, and the normalized outcome of the verify phase.

use crate::errors::GatewayError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// A caller's request to start one purchase attempt.
///
/// # Examples
///
/// ```
/// use shaparak_rs::types::TransactionRequest;
///
/// let request = TransactionRequest::new(10_000, "https://shop.example/callback", "1001")
///     .with_description("Order #1001");
/// assert_eq!(request.amount, 10_000);
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    /// Amount in the currency's minor unit (Rial)
    pub amount: i64,

    /// URL the gateway sends the payer back to
    pub callback_url: String,

    /// Free-form description shown by some gateways
    #[serde(default)]
    pub description: String,

    /// Caller-supplied key identifying this purchase attempt.
    /// Some gateways require it to be numeric.
    pub idempotency_key: String,
}

impl TransactionRequest {
    /// Creates a request with an empty description.
    pub fn new(
        amount: i64,
        callback_url: impl Into<String>,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            amount,
            callback_url: callback_url.into(),
            description: String::new(),
            idempotency_key: idempotency_key.into(),
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// HTTP method the payer's browser must use to reach the payment page.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum RedirectMethod {
    /// Plain redirect to `payment_url`
    #[default]
    Get,
    /// Auto-submitted form posting `redirect_params` to `payment_url`
    Post,
}

/// Redirect instructions returned by a successful purchase.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PaymentResponse {
    /// Gateway-assigned handle joining the purchase to its later callback
    pub authority: String,

    /// Absolute URL of the gateway's payment page
    pub payment_url: String,

    /// How the payer must be sent to `payment_url`
    pub redirect_method: RedirectMethod,

    /// Form fields to post; empty for GET redirects
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub redirect_params: HashMap<String, String>,
}

impl PaymentResponse {
    /// Creates a GET redirect response.
    pub fn get(authority: impl Into<String>, payment_url: impl Into<String>) -> Self {
        Self {
            authority: authority.into(),
            payment_url: payment_url.into(),
            redirect_method: RedirectMethod::Get,
            redirect_params: HashMap::new(),
        }
    }

    /// Creates a POST redirect response carrying form fields.
    pub fn post(
        authority: impl Into<String>,
        payment_url: impl Into<String>,
        params: HashMap<String, String>,
    ) -> Self {
        Self {
            authority: authority.into(),
            payment_url: payment_url.into(),
            redirect_method: RedirectMethod::Post,
            redirect_params: params,
        }
    }
}

/// Closed set of verification outcomes.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    /// Payment captured
    Success,
    /// Gateway declined the payment
    Failed,
    /// The transaction was already verified and settled earlier
    AlreadyVerified,
    /// Confirmed amount differs from the originally requested amount
    AmountMismatch,
    /// The payer aborted at the gateway
    Cancelled,
    /// The gateway does not recognise the transaction handle
    Invalid,
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VerificationStatus::Success => "success",
            VerificationStatus::Failed => "failed",
            VerificationStatus::AlreadyVerified => "already verified",
            VerificationStatus::AmountMismatch => "amount mismatch",
            VerificationStatus::Cancelled => "cancelled",
            VerificationStatus::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

/// Normalized outcome of the verify phase.
///
/// `Failed` and `Invalid` results always carry the [`GatewayError`] that
/// explains them; the other statuses never do. Use the constructors to keep
/// that pairing intact.
#[derive(Serialize, Debug, Clone)]
pub struct VerificationResult {
    /// Outcome
    pub status: VerificationStatus,

    /// Gateway's permanent reference (RRN), empty unless known
    pub reference_id: String,

    /// Masked card number, when the gateway returns one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_number: Option<String>,

    /// Raw gateway fields kept for audit
    pub original_data: Map<String, Value>,

    /// Why the payment failed (only for `Failed` and `Invalid`)
    #[serde(skip)]
    pub error: Option<GatewayError>,
}

impl VerificationResult {
    fn with_status(status: VerificationStatus) -> Self {
        Self {
            status,
            reference_id: String::new(),
            card_number: None,
            original_data: Map::new(),
            error: None,
        }
    }

    /// Captured payment with its permanent reference.
    pub fn success(reference_id: impl Into<String>) -> Self {
        let mut result = Self::with_status(VerificationStatus::Success);
        result.reference_id = reference_id.into();
        result
    }

    /// Gateway decline.
    pub fn failed(error: GatewayError) -> Self {
        let mut result = Self::with_status(VerificationStatus::Failed);
        result.error = Some(error);
        result
    }

    /// Unknown or invalid transaction handle.
    pub fn invalid(error: GatewayError) -> Self {
        let mut result = Self::with_status(VerificationStatus::Invalid);
        result.error = Some(error);
        result
    }

    /// Payer aborted at the gateway.
    pub fn cancelled() -> Self {
        Self::with_status(VerificationStatus::Cancelled)
    }

    /// The transaction had already been captured.
    pub fn already_verified(reference_id: impl Into<String>) -> Self {
        let mut result = Self::with_status(VerificationStatus::AlreadyVerified);
        result.reference_id = reference_id.into();
        result
    }

    /// Confirmed and original amounts differ. Both are recorded in `original_data`.
    pub fn amount_mismatch(expected: i64, confirmed: i64) -> Self {
        Self::with_status(VerificationStatus::AmountMismatch)
            .with_data("expected_amount", expected)
            .with_data("confirmed_amount", confirmed)
    }

    /// The gateway refused the amount without reporting the one it holds.
    pub fn amount_rejected(expected: i64) -> Self {
        Self::with_status(VerificationStatus::AmountMismatch).with_data("expected_amount", expected)
    }

    /// Sets the masked card number when the gateway supplied a non-empty one.
    pub fn with_card_number(mut self, card_number: Option<impl Into<String>>) -> Self {
        self.card_number = card_number.map(Into::into).filter(|c: &String| !c.is_empty());
        self
    }

    /// Sets the reference id.
    pub fn with_reference_id(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = reference_id.into();
        self
    }

    /// Records a raw gateway field.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.original_data.insert(key.into(), value.into());
        self
    }

    /// Returns true if the payment is captured, either now or earlier.
    pub fn is_paid(&self) -> bool {
        matches!(
            self.status,
            VerificationStatus::Success | VerificationStatus::AlreadyVerified
        )
    }
}

/// The purchase as recorded by the caller at purchase time.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct OriginalTransaction {
    /// Amount originally requested, in the request's minor unit
    pub amount: i64,
}

/// Request to reverse a captured transaction.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RefundRequest {
    /// Gateway's permanent reference returned by verification
    pub reference_id: String,

    /// Identifier used at purchase time (order id or authority/token,
    /// whichever the gateway keys reversals on)
    pub order_id: String,

    /// Amount to reverse, in the request's minor unit
    pub amount: i64,
}

/// Accepted reversal. Gateway rejections are returned as errors instead.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RefundResponse {
    /// Reference of the reversed transaction
    pub reference_id: String,

    /// Raw gateway fields
    #[serde(default)]
    pub original_data: Map<String, Value>,
}

impl RefundResponse {
    /// Creates a response for the reversed reference.
    pub fn new(reference_id: impl Into<String>) -> Self {
        Self {
            reference_id: reference_id.into(),
            original_data: Map::new(),
        }
    }

    /// Records a raw gateway field.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.original_data.insert(key.into(), value.into());
        self
    }
}
