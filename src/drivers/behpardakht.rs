//! Behpardakht Mellat gateway.
//!
//! A two-phase SOAP gateway: after the payer returns, the transaction is
//! first verified (`bpVerifyRequest`) and then settled (`bpSettleRequest`).
//! Money is only captured by the settle call. Order ids must be numeric.

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
use crate::utils::{
    bank_date_time, ensure_payment_url, from_gateway_amount, parse_order_id, tehran_now,
    to_gateway_amount,
};
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry name of this driver.
pub const NAME: &str = "behpardakht_v1";

const SERVICE_URL: &str = "https://pgwsf.bpm.bankmellat.ir/pgwchannel/services/pgw.asmx";
const PAYMENT_URL: &str = "https://bpm.shaparak.ir/pgwchannel/startpay.mellat";
const NAMESPACE: &str = "http://interfaces.core.sw.bps.com/";
const PREFIX: Namespacing = Namespacing::Prefixed("com");

/// Amounts are sent in Rial.
const AMOUNT_DIVISOR: i64 = 1;

const PAY_REQUEST: &str = "bpPayRequest";
const VERIFY_REQUEST: &str = "bpVerifyRequest";
const SETTLE_REQUEST: &str = "bpSettleRequest";
const REVERSAL_REQUEST: &str = "bpReversalRequest";

const OK: i32 = 0;
const USER_CANCELLED: i32 = 17;
const ALREADY_VERIFIED: i32 = 43;
const ALREADY_SETTLED: i32 = 45;
const NO_SUCH_TRANSACTION: i32 = 54;
const INVALID_TRANSACTION: i32 = 55;

/// Translates a Behpardakht result code.
pub fn status_message(code: i32) -> String {
    let message = match code {
        0 => "transaction completed successfully",
        11 => "invalid card number",
        12 => "insufficient funds",
        13 => "incorrect PIN",
        14 => "too many PIN attempts",
        15 => "invalid card",
        17 => "payer cancelled the transaction",
        18 => "card has expired",
        21 => "invalid merchant",
        41 => "duplicate order id",
        43 => "transaction already verified",
        45 => "transaction already settled",
        46 => "transaction not settled",
        51 => "duplicate transaction",
        54 => "reference transaction does not exist",
        55 => "invalid transaction",
        61 => "deposit failed",
        _ => return format!("unknown behpardakht result code {}", code),
    };
    message.to_string()
}

#[derive(Debug, Clone)]
struct Settings {
    terminal_id: i64,
    username: String,
    password: String,
    service_url: String,
    payment_url: String,
}

impl Settings {
    fn from_config(config: &DriverConfig) -> Result<Self> {
        Ok(Self {
            terminal_id: config.parse(NAME, "terminal_id")?,
            username: config.require(NAME, "username")?.to_string(),
            password: config.require(NAME, "password")?.to_string(),
            service_url: config.endpoint(NAME, "service_url", SERVICE_URL)?,
            payment_url: config.endpoint(NAME, "payment_url", PAYMENT_URL)?,
        })
    }
}

/// Behpardakht Mellat driver.
#[derive(Debug, Clone)]
pub struct Behpardakht {
    settings: Settings,
    client: Client,
}

impl Behpardakht {
    /// Builds the driver from its configuration section.
    ///
    /// Requires `terminal_id` (numeric), `username` and `password`. Accepts
    /// `service_url`, `payment_url` and `timeout_secs` overrides.
    pub fn new(config: &DriverConfig) -> Result<Self> {
        let settings = Settings::from_config(config)?;
        let client = transport::build_client(config.timeout(NAME)?)?;
        Ok(Self { settings, client })
    }

    /// Starts a request carrying the terminal credentials.
    fn request(&self, operation: &'static str) -> SoapRequest {
        SoapRequest::new(operation, NAMESPACE, PREFIX)
            .field("terminalId", self.settings.terminal_id)
            .field("userName", &self.settings.username)
            .field("userPassword", &self.settings.password)
    }

    async fn call(
        &self,
        operation: &'static str,
        request: SoapRequest,
    ) -> GatewayResult<(HashMap<String, String>, String)> {
        let action = format!("urn:{}", operation);
        let body = transport::post_soap(
            &self.client,
            &self.settings.service_url,
            &action,
            request.render(),
        )
        .await?;
        let fields = soap::parse_reply(&body)?;
        Ok((fields, body))
    }

    /// Calls one of the follow-up operations, which all take the same
    /// identifiers and return a bare result code.
    async fn follow_up(
        &self,
        operation: &'static str,
        sale_order_id: i64,
        sale_reference_id: i64,
    ) -> GatewayResult<i32> {
        let request = self
            .request(operation)
            .field("orderId", sale_order_id)
            .field("saleOrderId", sale_order_id)
            .field("saleReferenceId", sale_reference_id);
        let (fields, raw) = self.call(operation, request).await?;
        soap::required_number(&fields, "return", &raw)
    }

    async fn verify(
        &self,
        _verified: &AmountVerified,
        sale_order_id: i64,
        sale_reference_id: i64,
    ) -> GatewayResult<i32> {
        self.follow_up(VERIFY_REQUEST, sale_order_id, sale_reference_id)
            .await
    }

    async fn settle(
        &self,
        _verified: &AmountVerified,
        sale_order_id: i64,
        sale_reference_id: i64,
    ) -> GatewayResult<i32> {
        self.follow_up(SETTLE_REQUEST, sale_order_id, sale_reference_id)
            .await
    }
}

/// Splits the `bpPayRequest` reply (`"ResCode,RefId"`, or a bare `ResCode`
/// on rejection).
fn parse_pay_reply(reply: &str, raw: &str) -> GatewayResult<(i32, Option<String>)> {
    let mut parts = reply.trim().splitn(2, ',');
    let code = parts
        .next()
        .and_then(|c| c.trim().parse::<i32>().ok())
        .ok_or_else(|| {
            GatewayError::protocol(format!("invalid bpPayRequest reply '{}'", reply), raw)
        })?;
    let ref_id = parts
        .next()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string);

    if code == OK && ref_id.is_none() {
        return Err(GatewayError::protocol(
            format!("bpPayRequest reply '{}' has no RefId", reply),
            raw,
        ));
    }
    Ok((code, ref_id))
}

/// Maps a failed verify/settle code onto a result.
fn rejected(code: i32) -> VerificationResult {
    let error = GatewayError::business(code, status_message(code));
    let result = match code {
        NO_SUCH_TRANSACTION | INVALID_TRANSACTION => VerificationResult::invalid(error),
        _ => VerificationResult::failed(error),
    };
    result.with_data("ResCode", code)
}

/// Registry constructor.
pub fn initializer(config: &DriverConfig) -> Result<Arc<dyn Driver>> {
    Ok(Arc::new(Behpardakht::new(config)?))
}

impl Driver for Behpardakht {
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
impl RedirectPayer for Behpardakht {
    async fn purchase(&self, request: &TransactionRequest) -> GatewayResult<PaymentResponse> {
        let order_id = parse_order_id(&request.idempotency_key)?;
        let amount = to_gateway_amount(request.amount, AMOUNT_DIVISOR)?;
        ensure_payment_url(&request.callback_url)?;

        let mut lifecycle = Lifecycle::purchase(NAME, order_id.to_string());
        let (local_date, local_time) = bank_date_time(&tehran_now());

        let envelope = self
            .request(PAY_REQUEST)
            .field("orderId", order_id)
            .field("amount", amount)
            .field("localDate", local_date)
            .field("localTime", local_time)
            .field("additionalData", &request.description)
            .field("callBackUrl", &request.callback_url)
            .field("payerId", 0);
        let (fields, raw) = self.call(PAY_REQUEST, envelope).await?;
        let (code, ref_id) = parse_pay_reply(soap::required(&fields, "return", &raw)?, &raw)?;

        let ref_id = match ref_id {
            Some(ref_id) if code == OK => ref_id,
            _ => {
                lifecycle.terminate("purchase rejected");
                tracing::warn!(driver = NAME, order_id, code, "purchase rejected by gateway");
                return Err(GatewayError::business(code, status_message(code)));
            }
        };

        lifecycle.advance(Phase::Redirected)?;
        let params = HashMap::from([("RefId".to_string(), ref_id.clone())]);
        Ok(PaymentResponse::post(
            ref_id,
            self.settings.payment_url.clone(),
            params,
        ))
    }

    async fn verify_and_confirm(
        &self,
        callback: &Callback,
        fetcher: &dyn TransactionFetcher,
    ) -> GatewayResult<VerificationResult> {
        let res_code: i32 = callback.parse("ResCode")?;
        let mut lifecycle =
            Lifecycle::callback(NAME, callback.get_non_empty("SaleOrderId").unwrap_or_default());

        if res_code != OK {
            lifecycle.terminate("payment not completed at gateway");
            let result = if res_code == USER_CANCELLED {
                VerificationResult::cancelled()
            } else {
                VerificationResult::failed(GatewayError::business(
                    res_code,
                    status_message(res_code),
                ))
            };
            return Ok(result.with_data("ResCode", res_code));
        }

        let order_key = callback.require("SaleOrderId")?;
        let sale_order_id: i64 = callback.parse("SaleOrderId")?;
        let sale_reference_id: i64 = callback.parse("SaleReferenceId")?;
        let final_amount: Option<i64> = callback.parse_optional("FinalAmount")?;
        let card_number = callback.get_non_empty("CardHolderPan");
        lifecycle.advance(Phase::Verifying)?;

        let original = fetch_original(NAME, fetcher, order_key).await?;
        let confirmed = final_amount
            .map(|a| from_gateway_amount(a, AMOUNT_DIVISOR))
            .unwrap_or(original.amount);

        let verified = match check_amount(&original, confirmed) {
            Integrity::Verified(verified) => verified,
            Integrity::Mismatch {
                expected,
                confirmed,
            } => {
                tracing::warn!(
                    driver = NAME,
                    sale_order_id,
                    expected,
                    confirmed,
                    "amount mismatch, not settling"
                );
                lifecycle.terminate("amount mismatch");
                return Ok(VerificationResult::amount_mismatch(expected, confirmed)
                    .with_reference_id(sale_reference_id.to_string()));
            }
        };

        let verify_code = self
            .verify(&verified, sale_order_id, sale_reference_id)
            .await?;
        if verify_code != OK && verify_code != ALREADY_VERIFIED {
            lifecycle.terminate("verify rejected");
            tracing::warn!(driver = NAME, sale_order_id, code = verify_code, "verify rejected");
            return Ok(rejected(verify_code));
        }
        lifecycle.advance(Phase::Confirmed)?;

        let settle_code = self
            .settle(&verified, sale_order_id, sale_reference_id)
            .await?;
        let reference_id = sale_reference_id.to_string();
        match settle_code {
            OK => {
                lifecycle.advance(Phase::Settled)?;
                tracing::info!(
                    driver = NAME,
                    sale_order_id,
                    amount = verified.amount(),
                    "payment settled"
                );
                Ok(VerificationResult::success(reference_id)
                    .with_card_number(card_number)
                    .with_data("SaleOrderId", sale_order_id)
                    .with_data("VerifyResCode", verify_code))
            }
            ALREADY_SETTLED => {
                lifecycle.terminate("already settled");
                Ok(VerificationResult::already_verified(reference_id)
                    .with_card_number(card_number)
                    .with_data("SaleOrderId", sale_order_id)
                    .with_data("ResCode", settle_code))
            }
            code => {
                lifecycle.terminate("settle rejected");
                tracing::warn!(driver = NAME, sale_order_id, code, "settle rejected");
                Ok(rejected(code))
            }
        }
    }
}

#[async_trait]
impl Refundable for Behpardakht {
    async fn refund(&self, request: &RefundRequest) -> GatewayResult<RefundResponse> {
        let sale_order_id = parse_order_id(&request.order_id)?;
        let sale_reference_id: i64 = request.reference_id.trim().parse().map_err(|e| {
            GatewayError::invalid_request(format!(
                "invalid sale reference id '{}'",
                request.reference_id
            ))
            .with_cause(e)
        })?;
        to_gateway_amount(request.amount, AMOUNT_DIVISOR)?;

        let code = self
            .follow_up(REVERSAL_REQUEST, sale_order_id, sale_reference_id)
            .await?;
        if code != OK {
            tracing::warn!(driver = NAME, sale_order_id, code, "reversal rejected");
            return Err(GatewayError::business(code, status_message(code)));
        }

        tracing::info!(driver = NAME, sale_order_id, "payment reversed");
        Ok(RefundResponse::new(request.reference_id.trim())
            .with_data("SaleOrderId", sale_order_id)
            .with_data("ResCode", code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{GatewayErrorKind, PayError};
    use crate::fetcher::MemoryFetcher;
    use crate::types::VerificationStatus;

    fn config() -> DriverConfig {
        DriverConfig::new()
            .set("terminal_id", "1234567")
            .set("username", "shop")
            .set("password", "secret")
            .set("service_url", "http://127.0.0.1:1/pgw")
    }

    #[test]
    fn test_non_numeric_terminal_id_fails_construction() {
        let err = Behpardakht::new(&config().set("terminal_id", "abc")).unwrap_err();
        assert!(matches!(err, PayError::Config { .. }));
    }

    #[test]
    fn test_missing_password_fails_construction() {
        let config: DriverConfig = [("terminal_id", "1"), ("username", "u")].into_iter().collect();
        assert!(initializer(&config).is_err());
    }

    #[test]
    fn test_capabilities() {
        let driver = Behpardakht::new(&config()).unwrap();
        assert_eq!(driver.name(), NAME);
        assert!(driver.as_redirect_payer().is_some());
        assert!(driver.as_refundable().is_some());
    }

    #[test]
    fn test_parse_pay_reply() {
        assert_eq!(
            parse_pay_reply("0,AF82041a2Bf6989c7fF9", "").unwrap(),
            (0, Some("AF82041a2Bf6989c7fF9".to_string()))
        );
        assert_eq!(parse_pay_reply("21", "").unwrap(), (21, None));
        assert!(parse_pay_reply("0", "").is_err());
        assert!(parse_pay_reply("garbage", "").is_err());
    }

    #[test]
    fn test_rejected_maps_unknown_transaction_to_invalid() {
        assert_eq!(rejected(54).status, VerificationStatus::Invalid);
        assert_eq!(rejected(55).status, VerificationStatus::Invalid);
        let failed = rejected(61);
        assert_eq!(failed.status, VerificationStatus::Failed);
        assert_eq!(failed.error.unwrap().message, "deposit failed");
    }

    #[tokio::test]
    async fn test_non_numeric_order_id_is_rejected_locally() {
        let driver = Behpardakht::new(&config()).unwrap();
        let request = TransactionRequest::new(10_000, "https://shop.example/cb", "order-1");
        let err = driver.purchase(&request).await.unwrap_err();
        assert_eq!(err.kind, GatewayErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn test_cancelled_callback_makes_no_remote_call() {
        // service_url is unreachable, so any remote call would surface as a transport error
        let driver = Behpardakht::new(&config()).unwrap();
        let callback = Callback::from_pairs([("ResCode", "17"), ("SaleOrderId", "1001")]);
        let result = driver
            .verify_and_confirm(&callback, &MemoryFetcher::new())
            .await
            .unwrap();
        assert_eq!(result.status, VerificationStatus::Cancelled);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_declined_callback_carries_error() {
        let driver = Behpardakht::new(&config()).unwrap();
        let callback = Callback::from_pairs([("ResCode", "12"), ("SaleOrderId", "1001")]);
        let result = driver
            .verify_and_confirm(&callback, &MemoryFetcher::new())
            .await
            .unwrap();
        assert_eq!(result.status, VerificationStatus::Failed);
        assert_eq!(result.error.unwrap().code, 12);
    }

    #[tokio::test]
    async fn test_malformed_callback_is_an_error() {
        let driver = Behpardakht::new(&config()).unwrap();
        let callback = Callback::from_pairs([("ResCode", "zero")]);
        let err = driver
            .verify_and_confirm(&callback, &MemoryFetcher::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, GatewayErrorKind::Callback);
    }

    #[tokio::test]
    async fn test_final_amount_mismatch_skips_verify() {
        let driver = Behpardakht::new(&config()).unwrap();
        let fetcher = MemoryFetcher::new();
        fetcher.insert("1001", 10_000).await;
        let callback = Callback::from_pairs([
            ("ResCode", "0"),
            ("SaleOrderId", "1001"),
            ("SaleReferenceId", "998877"),
            ("FinalAmount", "9000"),
        ]);
        let result = driver.verify_and_confirm(&callback, &fetcher).await.unwrap();
        assert_eq!(result.status, VerificationStatus::AmountMismatch);
        assert_eq!(result.reference_id, "998877");
    }

    #[tokio::test]
    async fn test_unknown_order_is_a_collaborator_error() {
        let driver = Behpardakht::new(&config()).unwrap();
        let callback = Callback::from_pairs([
            ("ResCode", "0"),
            ("SaleOrderId", "1001"),
            ("SaleReferenceId", "998877"),
        ]);
        let err = driver
            .verify_and_confirm(&callback, &MemoryFetcher::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, GatewayErrorKind::Collaborator);
    }
}
