//! Zarinpal v4 gateway.
//!
//! JSON API priced in Toman, so request amounts (Rial) are divided by ten.
//! Verification is a single call that captures the payment; the amount is
//! sent with it and the gateway refuses a mismatch itself. Replies put the
//! outcome in `data` on success and in `errors` otherwise, the unused one
//! being an empty array.

use crate::callback::Callback;
use crate::config::DriverConfig;
use crate::driver::{Driver, RedirectPayer};
use crate::drivers::fetch_original;
use crate::errors::{GatewayError, GatewayResult, Result};
use crate::fetcher::TransactionFetcher;
use crate::lifecycle::{AmountVerified, Lifecycle, Phase};
use crate::transport;
use crate::types::{PaymentResponse, TransactionRequest, VerificationResult};
use crate::utils::{ensure_payment_url, join_path, to_gateway_amount};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Registry name of this driver.
pub const NAME: &str = "zarinpal_v4";

const REQUEST_URL: &str = "https://api.zarinpal.com/pg/v4/payment/request.json";
const VERIFY_URL: &str = "https://api.zarinpal.com/pg/v4/payment/verify.json";
const PAYMENT_URL: &str = "https://www.zarinpal.com/pg/StartPay/";

const SANDBOX_REQUEST_URL: &str = "https://sandbox.zarinpal.com/pg/v4/payment/request.json";
const SANDBOX_VERIFY_URL: &str = "https://sandbox.zarinpal.com/pg/v4/payment/verify.json";
const SANDBOX_PAYMENT_URL: &str = "https://sandbox.zarinpal.com/pg/StartPay/";

/// Toman = Rial / 10.
const AMOUNT_DIVISOR: i64 = 10;

const OK: i64 = 100;
const ALREADY_VERIFIED: i64 = 101;
const AMOUNT_MISMATCH: i64 = -50;
const SESSION_INVALID: i64 = -51;
const AUTHORITY_INVALID: i64 = -54;

/// Translates a Zarinpal result code.
pub fn status_message(code: i64) -> String {
    let message = match code {
        100 => "success",
        101 => "transaction already verified",
        -9 => "validation error",
        -10 => "terminal is not valid (merchant id or IP)",
        -11 => "terminal is not active",
        -12 => "too many attempts, try again later",
        -15 => "terminal user is suspended",
        -16 => "terminal user level is not valid",
        -30 => "terminal does not allow floating wages",
        -31 => "terminal has no default bank account",
        -33 => "wage percentage exceeds the limit",
        -34 => "wage total exceeds the amount",
        -35 => "too many wage participants",
        -40 => "invalid extra parameters",
        -50 => "session amount does not match the paid amount",
        -51 => "payment session is not valid or failed",
        -52 => "unexpected error at the gateway",
        -53 => "session does not belong to this merchant",
        -54 => "invalid authority",
        _ => return format!("unknown zarinpal code {}", code),
    };
    message.to_string()
}

#[derive(Serialize, Debug)]
struct PaymentRequest<'a> {
    merchant_id: &'a str,
    amount: i64,
    callback_url: &'a str,
    description: &'a str,
    metadata: Metadata<'a>,
}

#[derive(Serialize, Debug)]
struct Metadata<'a> {
    order_id: &'a str,
}

#[derive(Serialize, Debug)]
struct VerifyRequest<'a> {
    merchant_id: &'a str,
    amount: i64,
    authority: &'a str,
}

/// Raw v4 reply. `data` and `errors` are objects or empty arrays.
#[derive(Deserialize, Debug, Default)]
struct Reply {
    #[serde(default)]
    data: Value,
    #[serde(default)]
    errors: Value,
}

/// What a reply means once the empty half is discarded.
#[derive(Debug)]
enum Outcome<'a> {
    Data(i64, &'a Value),
    Error(i64, &'a Value),
}

impl Reply {
    fn outcome(&self) -> Option<Outcome<'_>> {
        let code = |v: &Value| v.get("code").and_then(Value::as_i64);
        if let Some(c) = code(&self.data) {
            return Some(Outcome::Data(c, &self.data));
        }
        code(&self.errors).map(|c| Outcome::Error(c, &self.errors))
    }

    fn raw(&self) -> String {
        serde_json::json!({ "data": self.data, "errors": self.errors }).to_string()
    }
}

fn error_for(code: i64, payload: &Value) -> GatewayError {
    let message = payload
        .get("message")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| status_message(code));
    GatewayError::business(
        i32::try_from(code).unwrap_or(GatewayError::LOCAL_CODE),
        message,
    )
}

fn text(payload: &Value, key: &str) -> Option<String> {
    match payload.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone)]
struct Settings {
    merchant_id: String,
    sandbox: bool,
    request_url: String,
    verify_url: String,
    payment_url: String,
}

/// Zarinpal v4 driver. Refunds are not offered.
#[derive(Debug, Clone)]
pub struct Zarinpal {
    settings: Settings,
    client: Client,
}

impl Zarinpal {
    /// Builds the driver from its configuration section.
    ///
    /// Requires `merchant_id`; `sandbox` switches to the sandbox hosts.
    pub fn new(config: &DriverConfig) -> Result<Self> {
        let sandbox = config.flag(NAME, "sandbox")?;
        let (request_url, verify_url, payment_url) = if sandbox {
            (SANDBOX_REQUEST_URL, SANDBOX_VERIFY_URL, SANDBOX_PAYMENT_URL)
        } else {
            (REQUEST_URL, VERIFY_URL, PAYMENT_URL)
        };
        let settings = Settings {
            merchant_id: config.require(NAME, "merchant_id")?.to_string(),
            sandbox,
            request_url: config.endpoint(NAME, "request_url", request_url)?,
            verify_url: config.endpoint(NAME, "verify_url", verify_url)?,
            payment_url: config.endpoint(NAME, "payment_url", payment_url)?,
        };
        let client = transport::build_client(config.timeout(NAME)?)?;
        Ok(Self { settings, client })
    }

    /// Returns true when talking to the sandbox hosts.
    pub fn is_sandbox(&self) -> bool {
        self.settings.sandbox
    }

    async fn verify(&self, verified: &AmountVerified, authority: &str) -> GatewayResult<Reply> {
        let body = VerifyRequest {
            merchant_id: &self.settings.merchant_id,
            amount: to_gateway_amount(verified.amount(), AMOUNT_DIVISOR)?,
            authority,
        };
        transport::post_json(&self.client, &self.settings.verify_url, "verify", &body).await
    }
}

/// Registry constructor.
pub fn initializer(config: &DriverConfig) -> Result<Arc<dyn Driver>> {
    Ok(Arc::new(Zarinpal::new(config)?))
}

impl Driver for Zarinpal {
    fn name(&self) -> &str {
        NAME
    }

    fn as_redirect_payer(&self) -> Option<&dyn RedirectPayer> {
        Some(self)
    }
}

#[async_trait]
impl RedirectPayer for Zarinpal {
    async fn purchase(&self, request: &TransactionRequest) -> GatewayResult<PaymentResponse> {
        let order_id = request.idempotency_key.trim();
        if order_id.is_empty() {
            return Err(GatewayError::invalid_request("idempotency key must not be empty"));
        }
        let amount = to_gateway_amount(request.amount, AMOUNT_DIVISOR)?;
        ensure_payment_url(&request.callback_url)?;
        let mut lifecycle = Lifecycle::purchase(NAME, order_id);

        let body = PaymentRequest {
            merchant_id: &self.settings.merchant_id,
            amount,
            callback_url: &request.callback_url,
            description: &request.description,
            metadata: Metadata { order_id },
        };
        let reply: Reply =
            transport::post_json(&self.client, &self.settings.request_url, "request", &body).await?;

        let authority = match reply.outcome() {
            Some(Outcome::Data(OK, data)) => text(data, "authority").ok_or_else(|| {
                GatewayError::protocol("payment request succeeded without an authority", reply.raw())
            })?,
            Some(Outcome::Data(code, payload)) | Some(Outcome::Error(code, payload)) => {
                lifecycle.terminate("purchase rejected");
                tracing::warn!(driver = NAME, order_id, code, "purchase rejected by gateway");
                return Err(error_for(code, payload));
            }
            None => {
                return Err(GatewayError::protocol(
                    "payment request reply has no code",
                    reply.raw(),
                ))
            }
        };

        lifecycle.advance(Phase::Redirected)?;
        let payment_url = join_path(&self.settings.payment_url, &authority)?;
        Ok(PaymentResponse::get(authority, payment_url))
    }

    async fn verify_and_confirm(
        &self,
        callback: &Callback,
        fetcher: &dyn TransactionFetcher,
    ) -> GatewayResult<VerificationResult> {
        let authority = callback.require("Authority")?;
        let status = callback.require("Status")?;
        let mut lifecycle = Lifecycle::callback(NAME, authority);

        if !status.eq_ignore_ascii_case("OK") {
            lifecycle.terminate("payment not completed at gateway");
            return Ok(VerificationResult::failed(GatewayError::business(
                GatewayError::LOCAL_CODE,
                format!("payment was not completed (Status={})", status),
            ))
            .with_data("Authority", authority)
            .with_data("Status", status));
        }
        lifecycle.advance(Phase::Verifying)?;

        let original = fetch_original(NAME, fetcher, authority).await?;
        // Zarinpal echoes no amount; a paid amount differing from the one
        // sent with verify comes back as -50.
        let verified = AmountVerified::enforced_by_gateway(&original);

        let reply = self.verify(&verified, authority).await?;
        match reply.outcome() {
            Some(Outcome::Data(OK, data)) => {
                lifecycle.advance(Phase::Settled)?;
                let ref_id = text(data, "ref_id").unwrap_or_else(|| {
                    tracing::warn!(driver = NAME, authority, "payment captured but verify reply has no ref_id");
                    String::new()
                });
                tracing::info!(driver = NAME, authority, amount = verified.amount(), "payment verified");
                Ok(VerificationResult::success(ref_id)
                    .with_card_number(text(data, "card_pan"))
                    .with_data("Authority", authority)
                    .with_data("code", OK))
            }
            Some(Outcome::Data(ALREADY_VERIFIED, data)) => {
                lifecycle.terminate("already verified");
                Ok(VerificationResult::already_verified(
                    text(data, "ref_id").unwrap_or_default(),
                )
                .with_card_number(text(data, "card_pan"))
                .with_data("Authority", authority)
                .with_data("code", ALREADY_VERIFIED))
            }
            Some(Outcome::Data(code, payload)) | Some(Outcome::Error(code, payload)) => {
                lifecycle.terminate("verify rejected");
                tracing::warn!(driver = NAME, authority, code, "verify rejected");
                let result = match code {
                    AMOUNT_MISMATCH => VerificationResult::amount_rejected(original.amount),
                    SESSION_INVALID | AUTHORITY_INVALID => {
                        VerificationResult::invalid(error_for(code, payload))
                    }
                    _ => VerificationResult::failed(error_for(code, payload)),
                };
                Ok(result.with_data("Authority", authority).with_data("code", code))
            }
            None => Err(GatewayError::protocol("verify reply has no code", reply.raw())),
        }
    }
}
