//! Parsian (PEC) gateway.
//!
//! SOAP services with a single `ConfirmPayment` call that both verifies and
//! captures. Purchases are keyed by a numeric order id; everything after the
//! purchase is keyed by the token the sale service returns.

use crate::callback::Callback;
use crate::config::DriverConfig;
use crate::driver::{Driver, RedirectPayer, Refundable};
use crate::drivers::fetch_original;
use crate::errors::{GatewayError, GatewayResult, Result};
use crate::fetcher::TransactionFetcher;
use crate::lifecycle::{check_amount, AmountVerified, Integrity, Lifecycle, Phase};
use crate::soap::{self, Namespacing, SoapRequest};
use crate::transport;
use crate::types::{
    PaymentResponse, RefundRequest, RefundResponse, TransactionRequest, VerificationResult,
};
use crate::utils::{ensure_payment_url, parse_order_id, to_gateway_amount, with_query};
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry name of this driver.
pub const NAME: &str = "parsian_v1";

const SALE_URL: &str = "https://pec.shaparak.ir/NewIPGServices/Sale/SaleService.asmx";
const CONFIRM_URL: &str = "https://pec.shaparak.ir/NewIPGServices/Confirm/ConfirmService.asmx";
const REVERSAL_URL: &str = "https://pec.shaparak.ir/NewIPGServices/Reverse/ReversalService.asmx";
const PAYMENT_URL: &str = "https://pec.shaparak.ir/NewIPG/";

const SALE_NS: &str = "https://pec.Shaparak.ir/NewIPGServices/Sale/SaleService";
const CONFIRM_NS: &str = "https://pec.Shaparak.ir/NewIPGServices/Confirm/ConfirmService";
const REVERSAL_NS: &str = "https://pec.Shaparak.ir/NewIPGServices/Reverse/ReversalService";

const AMOUNT_DIVISOR: i64 = 1;

const OK: i32 = 0;
const USER_CANCELLED: i32 = -138;
const ALREADY_CONFIRMED: i32 = -1533;
const ALREADY_REVERSED: i32 = -1551;

/// Translates a Parsian status code.
pub fn status_message(code: i32) -> String {
    let message = match code {
        0 => "operation completed successfully",
        -1 => "internal error at the bank",
        -2 => "duplicate or invalid transaction",
        -3 => "invalid response from the central switch",
        -100 => "merchant is disabled",
        -101 => "merchant authentication failed (login account or IP)",
        -102 => "request data is incomplete or invalid",
        -111 => "amount exceeds the merchant limit",
        -112 => "duplicate order id",
        -127 => "caller IP is not whitelisted",
        -138 => "payer cancelled the payment",
        -1533 => "transaction already confirmed",
        -1551 => "transaction already reversed",
        c if c > 0 => return format!("shaparak error code {}; check the transaction status", c),
        _ => return format!("unknown parsian status code {}", code),
    };
    message.to_string()
}

#[derive(Debug, Clone)]
struct Settings {
    login_account: String,
    sale_url: String,
    confirm_url: String,
    reversal_url: String,
    payment_url: String,
}

/// Parsian driver.
#[derive(Debug, Clone)]
pub struct Parsian {
    settings: Settings,
    client: Client,
}

impl Parsian {
    /// Builds the driver from its configuration section.
    ///
    /// Requires `login_account`.
    pub fn new(config: &DriverConfig) -> Result<Self> {
        let settings = Settings {
            login_account: config.require(NAME, "login_account")?.to_string(),
            sale_url: config.endpoint(NAME, "sale_url", SALE_URL)?,
            confirm_url: config.endpoint(NAME, "confirm_url", CONFIRM_URL)?,
            reversal_url: config.endpoint(NAME, "reversal_url", REVERSAL_URL)?,
            payment_url: config.endpoint(NAME, "payment_url", PAYMENT_URL)?,
        };
        let client = transport::build_client(config.timeout(NAME)?)?;
        Ok(Self { settings, client })
    }

    async fn call(
        &self,
        url: &str,
        namespace: &'static str,
        operation: &'static str,
        request: SoapRequest,
    ) -> GatewayResult<(HashMap<String, String>, String)> {
        let action = format!("{}/{}", namespace, operation);
        let body = transport::post_soap(&self.client, url, &action, request.render()).await?;
        let fields = soap::parse_reply(&body)?;
        Ok((fields, body))
    }

    fn request(&self, operation: &'static str, namespace: &'static str) -> SoapRequest {
        SoapRequest::new(operation, namespace, Namespacing::Default)
            .wrapped_in("requestData")
            .field("LoginAccount", &self.settings.login_account)
    }

    async fn confirm(
        &self,
        _verified: &AmountVerified,
        token: i64,
    ) -> GatewayResult<(HashMap<String, String>, String)> {
        let request = self
            .request("ConfirmPayment", CONFIRM_NS)
            .field("Token", token);
        self.call(&self.settings.confirm_url, CONFIRM_NS, "ConfirmPayment", request)
            .await
    }
}

/// Parses the callback's echoed amount, which PEC may format with
/// thousands separators.
fn echoed_amount(callback: &Callback) -> GatewayResult<Option<i64>> {
    match callback.get_non_empty("Amount") {
        None => Ok(None),
        Some(raw) => raw.replace(',', "").parse().map(Some).map_err(|e| {
            GatewayError::callback(format!("callback field 'Amount' is malformed: {}", raw))
                .with_cause(e)
        }),
    }
}

/// Registry constructor.
pub fn initializer(config: &DriverConfig) -> Result<Arc<dyn Driver>> {
    Ok(Arc::new(Parsian::new(config)?))
}

impl Driver for Parsian {
    fn name(&self) -> &str {
        NAME
    }

    fn as_redirect_payer(&self) -> Option<&dyn RedirectPayer> {
        Some(self)
    }

    fn as_refundable(&self) -> Option<&dyn Refundable> {
        Some(self)
    }
}

#[async_trait]
impl RedirectPayer for Parsian {
    async fn purchase(&self, request: &TransactionRequest) -> GatewayResult<PaymentResponse> {
        let order_id = parse_order_id(&request.idempotency_key)?;
        let amount = to_gateway_amount(request.amount, AMOUNT_DIVISOR)?;
        ensure_payment_url(&request.callback_url)?;
        let mut lifecycle = Lifecycle::purchase(NAME, order_id.to_string());

        let envelope = self
            .request("SalePaymentRequest", SALE_NS)
            .field("Amount", amount)
            .field("OrderId", order_id)
            .field("CallBackUrl", &request.callback_url)
            .field("AdditionalData", &request.description);
        let (fields, raw) = self
            .call(&self.settings.sale_url, SALE_NS, "SalePaymentRequest", envelope)
            .await?;

        let status: i32 = soap::required_number(&fields, "Status", &raw)?;
        if status != OK {
            lifecycle.terminate("purchase rejected");
            tracing::warn!(driver = NAME, order_id, status, "purchase rejected by gateway");
            return Err(GatewayError::business(status, status_message(status)));
        }

        let token: i64 = soap::required_number(&fields, "Token", &raw)?;
        if token <= 0 {
            return Err(GatewayError::protocol(
                format!("sale service returned invalid token {}", token),
                raw,
            ));
        }

        lifecycle.advance(Phase::Redirected)?;
        let token = token.to_string();
        let payment_url = with_query(&self.settings.payment_url, "Token", &token)?;
        Ok(PaymentResponse::get(token, payment_url))
    }

    async fn verify_and_confirm(
        &self,
        callback: &Callback,
        fetcher: &dyn TransactionFetcher,
    ) -> GatewayResult<VerificationResult> {
        let token_key = callback.require("Token")?;
        let token: i64 = callback.parse("Token")?;
        let status: i32 = callback.parse("status")?;
        let mut lifecycle = Lifecycle::callback(NAME, token_key);

        if status != OK {
            lifecycle.terminate("payment not completed at gateway");
            let result = if status == USER_CANCELLED {
                VerificationResult::cancelled()
            } else {
                VerificationResult::failed(GatewayError::business(status, status_message(status)))
            };
            return Ok(result.with_data("status", status).with_data("Token", token));
        }

        let echoed = echoed_amount(callback)?;
        lifecycle.advance(Phase::Verifying)?;

        let original = fetch_original(NAME, fetcher, token_key).await?;
        let verified = match check_amount(&original, echoed.unwrap_or(original.amount)) {
            Integrity::Verified(verified) => verified,
            Integrity::Mismatch {
                expected,
                confirmed,
            } => {
                tracing::warn!(driver = NAME, token, expected, confirmed, "amount mismatch, not confirming");
                lifecycle.terminate("amount mismatch");
                return Ok(VerificationResult::amount_mismatch(expected, confirmed)
                    .with_data("Token", token));
            }
        };

        let (fields, raw) = self.confirm(&verified, token).await?;
        let confirm_status: i32 = soap::required_number(&fields, "Status", &raw)?;
        let rrn = fields
            .get("RRN")
            .map(|r| r.trim())
            .filter(|r| !r.is_empty() && *r != "0")
            .or_else(|| callback.get_non_empty("RRN"))
            .unwrap_or_default()
            .to_string();
        let card_number = fields.get("CardNumberMasked").map(String::as_str);

        match confirm_status {
            OK => {
                lifecycle.advance(Phase::Settled)?;
                if rrn.is_empty() {
                    tracing::warn!(driver = NAME, token, "payment captured but confirm reply has no RRN");
                }
                tracing::info!(driver = NAME, token, amount = verified.amount(), "payment confirmed");
                Ok(VerificationResult::success(rrn)
                    .with_card_number(card_number)
                    .with_data("Token", token))
            }
            ALREADY_CONFIRMED => {
                lifecycle.terminate("already confirmed");
                Ok(VerificationResult::already_verified(rrn)
                    .with_card_number(card_number)
                    .with_data("Token", token)
                    .with_data("Status", confirm_status))
            }
            code => {
                lifecycle.terminate("confirm rejected");
                tracing::warn!(driver = NAME, token, code, "confirm rejected");
                Ok(VerificationResult::failed(GatewayError::business(code, status_message(code)))
                    .with_data("Token", token)
                    .with_data("Status", code))
            }
        }
    }
}

#[async_trait]
impl Refundable for Parsian {
    async fn refund(&self, request: &RefundRequest) -> GatewayResult<RefundResponse> {
        let token = parse_order_id(&request.order_id)
            .map_err(|e| GatewayError::invalid_request(format!("invalid token: {}", e.message)))?;
        to_gateway_amount(request.amount, AMOUNT_DIVISOR)?;

        let envelope = self
            .request("ReversalRequest", REVERSAL_NS)
            .field("Token", token);
        let (fields, raw) = self
            .call(&self.settings.reversal_url, REVERSAL_NS, "ReversalRequest", envelope)
            .await?;
        let status: i32 = soap::required_number(&fields, "Status", &raw)?;

        match status {
            OK | ALREADY_REVERSED => {
                tracing::info!(driver = NAME, token, status, "payment reversed");
                Ok(RefundResponse::new(request.reference_id.trim())
                    .with_data("Token", token)
                    .with_data("Status", status)
                    .with_data("already_reversed", status == ALREADY_REVERSED))
            }
            code => {
                tracing::warn!(driver = NAME, token, code, "reversal rejected");
                Err(GatewayError::business(code, status_message(code)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GatewayErrorKind;
    use crate::fetcher::MemoryFetcher;
    use crate::types::VerificationStatus;

    fn config() -> DriverConfig {
        DriverConfig::new()
            .set("login_account", "login")
            .set("confirm_url", "http://127.0.0.1:1/confirm")
    }

    #[test]
    fn test_missing_login_account() {
        assert!(Parsian::new(&DriverConfig::new()).is_err());
    }

    #[test]
    fn test_status_message() {
        assert_eq!(status_message(-138), "payer cancelled the payment");
        assert!(status_message(25).contains("shaparak error code 25"));
        assert!(status_message(-9999).contains("unknown"));
    }

    #[test]
    fn test_echoed_amount_accepts_separators() {
        let callback = Callback::from_pairs([("Amount", "10,000")]);
        assert_eq!(echoed_amount(&callback).unwrap(), Some(10_000));
        assert_eq!(echoed_amount(&Callback::default()).unwrap(), None);
        assert!(echoed_amount(&Callback::from_pairs([("Amount", "ten")])).is_err());
    }

    #[tokio::test]
    async fn test_user_cancel_is_cancelled() {
        let driver = Parsian::new(&config()).unwrap();
        let callback = Callback::from_pairs([("Token", "123456"), ("status", "-138")]);
        let result = driver
            .verify_and_confirm(&callback, &MemoryFetcher::new())
            .await
            .unwrap();
        assert_eq!(result.status, VerificationStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_missing_token_is_callback_error() {
        let driver = Parsian::new(&config()).unwrap();
        let callback = Callback::from_pairs([("status", "0")]);
        let err = driver
            .verify_and_confirm(&callback, &MemoryFetcher::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, GatewayErrorKind::Callback);
    }

    #[tokio::test]
    async fn test_echoed_amount_mismatch_skips_confirm() {
        let driver = Parsian::new(&config()).unwrap();
        let fetcher = MemoryFetcher::new();
        fetcher.insert("123456", 50_000).await;
        let callback = Callback::from_pairs([
            ("Token", "123456"),
            ("status", "0"),
            ("Amount", "5,000"),
        ]);
        let result = driver.verify_and_confirm(&callback, &fetcher).await.unwrap();
        assert_eq!(result.status, VerificationStatus::AmountMismatch);
        assert_eq!(result.original_data["confirmed_amount"], 5_000);
    }
}
