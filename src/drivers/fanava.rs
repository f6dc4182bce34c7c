//! Fanava gateway.
//!
//! JSON services. The verify call both captures the payment and reports the
//! captured amount, so the amount check happens on its reply; a mismatched
//! capture is reversed straight away. Results are string enums
//! (`erSucceed`, `erAAS_…`, `erMts_…`) rather than numeric codes.

use crate::callback::Callback;
use crate::config::DriverConfig;
use crate::driver::{Driver, RedirectPayer, Refundable};
use crate::drivers::fetch_original;
use crate::errors::{GatewayError, GatewayResult, Result};
use crate::fetcher::TransactionFetcher;
use crate::lifecycle::{check_amount, Integrity, Lifecycle, Phase};
use crate::transport;
use crate::types::{
    PaymentResponse, RefundRequest, RefundResponse, TransactionRequest, VerificationResult,
};
use crate::utils::{ensure_payment_url, from_gateway_amount, to_gateway_amount};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry name of this driver.
pub const NAME: &str = "fanava_v1";

const TOKEN_URL: &str =
    "https://fcp.shaparak.ir/ref-payment/RestServices/mts/generateTokenWithNoSign/";
const VERIFY_URL: &str = "https://fcp.shaparak.ir/ref-payment/RestServices/mts/verifyMerchantTrans/";
const REVERSE_URL: &str =
    "https://fcp.shaparak.ir/ref-payment/RestServices/mts/reverseMerchantTrans/";
const PAYMENT_URL: &str = "https://fep.shaparak.ir/ipgw//payment/";

const AMOUNT_DIVISOR: i64 = 1;
const TRANS_TYPE: &str = "EN_GOODS";

const SUCCEED: &str = "erSucceed";
const STATE_OK: &str = "OK";
const STATE_CANCELLED: &str = "Canceled By User";

#[derive(Serialize, Debug, Clone)]
struct WsContext<'a> {
    #[serde(rename = "UserId")]
    user_id: &'a str,
    #[serde(rename = "Password")]
    password: &'a str,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct GenerateTokenRequest<'a> {
    #[serde(rename = "WSContext")]
    ws_context: WsContext<'a>,
    trans_type: &'static str,
    reserve_num: &'a str,
    amount: String,
    redirect_url: &'a str,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct GenerateTokenResponse {
    result: String,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    expiration_date: Option<i64>,
}

/// Body shared by the verify and reverse calls.
#[derive(Serialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct TransactionRef<'a> {
    #[serde(rename = "WSContext")]
    ws_context: WsContext<'a>,
    token: &'a str,
    ref_num: &'a str,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct MerchantTransResponse {
    result: String,
    #[serde(default)]
    amount: Option<Value>,
    #[serde(default)]
    ref_num: Option<String>,
}

impl MerchantTransResponse {
    /// Amount as a number, whether the service sent it as a number or a string.
    fn amount(&self) -> Option<i64> {
        match self.amount.as_ref()? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

fn rejection(call: &str, result: &str) -> GatewayError {
    GatewayError::business(
        GatewayError::LOCAL_CODE,
        format!("fanava {} failed: {}", call, result),
    )
}

#[derive(Debug, Clone)]
struct Settings {
    user_id: String,
    password: String,
    token_url: String,
    verify_url: String,
    reverse_url: String,
    payment_url: String,
}

/// Fanava driver.
#[derive(Debug, Clone)]
pub struct Fanava {
    settings: Settings,
    client: Client,
}

impl Fanava {
    /// Builds the driver from its configuration section.
    ///
    /// Requires `user_id` and `password`.
    pub fn new(config: &DriverConfig) -> Result<Self> {
        let settings = Settings {
            user_id: config.require(NAME, "user_id")?.to_string(),
            password: config.require(NAME, "password")?.to_string(),
            token_url: config.endpoint(NAME, "token_url", TOKEN_URL)?,
            verify_url: config.endpoint(NAME, "verify_url", VERIFY_URL)?,
            reverse_url: config.endpoint(NAME, "reverse_url", REVERSE_URL)?,
            payment_url: config.endpoint(NAME, "payment_url", PAYMENT_URL)?,
        };
        let client = transport::build_client(config.timeout(NAME)?)?;
        Ok(Self { settings, client })
    }

    fn ws_context(&self) -> WsContext<'_> {
        WsContext {
            user_id: &self.settings.user_id,
            password: &self.settings.password,
        }
    }

    async fn merchant_trans(
        &self,
        url: &str,
        call: &str,
        token: &str,
        ref_num: &str,
    ) -> GatewayResult<MerchantTransResponse> {
        let body = TransactionRef {
            ws_context: self.ws_context(),
            token,
            ref_num,
        };
        transport::post_json(&self.client, url, call, &body).await
    }

    /// Reverses a transaction, failing on anything but `erSucceed`.
    async fn reverse(&self, token: &str, ref_num: &str) -> GatewayResult<MerchantTransResponse> {
        let reply = self
            .merchant_trans(&self.settings.reverse_url, "reverseMerchantTrans", token, ref_num)
            .await?;
        if reply.result != SUCCEED {
            return Err(rejection("reverse", &reply.result));
        }
        Ok(reply)
    }
}

/// Registry constructor.
pub fn initializer(config: &DriverConfig) -> Result<Arc<dyn Driver>> {
    Ok(Arc::new(Fanava::new(config)?))
}

impl Driver for Fanava {
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
impl RedirectPayer for Fanava {
    async fn purchase(&self, request: &TransactionRequest) -> GatewayResult<PaymentResponse> {
        let reserve_num = request.idempotency_key.trim();
        if reserve_num.is_empty() {
            return Err(GatewayError::invalid_request("idempotency key must not be empty"));
        }
        let amount = to_gateway_amount(request.amount, AMOUNT_DIVISOR)?;
        ensure_payment_url(&request.callback_url)?;
        let mut lifecycle = Lifecycle::purchase(NAME, reserve_num);

        let body = GenerateTokenRequest {
            ws_context: self.ws_context(),
            trans_type: TRANS_TYPE,
            reserve_num,
            amount: amount.to_string(),
            redirect_url: &request.callback_url,
        };
        let reply: GenerateTokenResponse = transport::post_json(
            &self.client,
            &self.settings.token_url,
            "generateTokenWithNoSign",
            &body,
        )
        .await?;

        if reply.result != SUCCEED {
            lifecycle.terminate("purchase rejected");
            tracing::warn!(driver = NAME, reserve_num, result = %reply.result, "purchase rejected by gateway");
            return Err(rejection("token generation", &reply.result));
        }
        let token = match reply.token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => token.to_string(),
            _ => {
                return Err(GatewayError::protocol(
                    "token generation succeeded without a token",
                    format!("{:?}", reply),
                ))
            }
        };

        lifecycle.advance(Phase::Redirected)?;
        tracing::debug!(driver = NAME, reserve_num, expires = ?reply.expiration_date, "token issued");
        let params = HashMap::from([
            ("token".to_string(), token.clone()),
            ("language".to_string(), "fa".to_string()),
        ]);
        Ok(PaymentResponse::post(
            token,
            self.settings.payment_url.clone(),
            params,
        ))
    }

    async fn verify_and_confirm(
        &self,
        callback: &Callback,
        fetcher: &dyn TransactionFetcher,
    ) -> GatewayResult<VerificationResult> {
        let state = callback.require("State")?;
        let mut lifecycle = Lifecycle::callback(NAME, callback.get_non_empty("token").unwrap_or_default());

        if state != STATE_OK {
            lifecycle.terminate("payment not completed at gateway");
            let result = if state == STATE_CANCELLED {
                VerificationResult::cancelled()
            } else {
                VerificationResult::failed(rejection("payment", state))
            };
            return Ok(result.with_data("State", state));
        }

        let token = callback.require("token")?;
        let ref_num = callback.require("RefNum")?;
        let card_number = callback.get_non_empty("CardMaskPan");
        lifecycle.advance(Phase::Verifying)?;

        let original = fetch_original(NAME, fetcher, token).await?;
        let reply = self
            .merchant_trans(&self.settings.verify_url, "verifyMerchantTrans", token, ref_num)
            .await?;
        if reply.result != SUCCEED {
            lifecycle.terminate("verify rejected");
            tracing::warn!(driver = NAME, token, result = %reply.result, "verify rejected");
            return Ok(VerificationResult::failed(rejection("verify", &reply.result))
                .with_reference_id(ref_num)
                .with_data("Result", reply.result));
        }

        // The verify call has captured the payment; without an amount it is unwound.
        let confirmed = match reply.amount() {
            Some(amount) => from_gateway_amount(amount, AMOUNT_DIVISOR),
            None => {
                let missing =
                    GatewayError::protocol("verify reply has no amount", format!("{:?}", reply));
                tracing::warn!(driver = NAME, token, "captured without an amount, reversing");
                lifecycle.terminate("amount missing");
                if let Err(e) = self.reverse(token, ref_num).await {
                    tracing::warn!(driver = NAME, token, error = %e, "reversal after missing amount failed");
                    return Err(GatewayError::protocol(
                        format!(
                            "payment {} was captured without an amount and could not be reversed: {}",
                            ref_num, e.message
                        ),
                        missing.raw_body.clone().unwrap_or_default(),
                    )
                    .with_cause(e));
                }
                return Ok(VerificationResult::invalid(missing)
                    .with_reference_id(ref_num)
                    .with_data("Token", token)
                    .with_data("reversal", "reversed"));
            }
        };

        match check_amount(&original, confirmed) {
            Integrity::Verified(verified) => {
                lifecycle.advance(Phase::Settled)?;
                tracing::info!(driver = NAME, token, amount = verified.amount(), "payment verified");
                let reference_id = reply
                    .ref_num
                    .as_deref()
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .unwrap_or(ref_num);
                Ok(VerificationResult::success(reference_id)
                    .with_card_number(card_number)
                    .with_data("Token", token)
                    .with_data("Amount", confirmed))
            }
            Integrity::Mismatch {
                expected,
                confirmed,
            } => {
                tracing::warn!(driver = NAME, token, expected, confirmed, "amount mismatch, reversing");
                lifecycle.terminate("amount mismatch");
                let reversal = match self.reverse(token, ref_num).await {
                    Ok(_) => "reversed".to_string(),
                    Err(e) => {
                        tracing::warn!(driver = NAME, token, error = %e, "reversal after mismatch failed");
                        format!("reversal failed: {}", e.message)
                    }
                };
                Ok(VerificationResult::amount_mismatch(expected, confirmed)
                    .with_reference_id(ref_num)
                    .with_data("Token", token)
                    .with_data("reversal", reversal))
            }
        }
    }
}

#[async_trait]
impl Refundable for Fanava {
    async fn refund(&self, request: &RefundRequest) -> GatewayResult<RefundResponse> {
        let token = request.order_id.trim();
        let ref_num = request.reference_id.trim();
        if token.is_empty() || ref_num.is_empty() {
            return Err(GatewayError::invalid_request(
                "refund needs the token and the reference number",
            ));
        }
        to_gateway_amount(request.amount, AMOUNT_DIVISOR)?;

        let reply = self.reverse(token, ref_num).await.map_err(|e| {
            tracing::warn!(driver = NAME, token, error = %e, "reversal rejected");
            e
        })?;
        tracing::info!(driver = NAME, token, "payment reversed");
        Ok(RefundResponse::new(ref_num)
            .with_data("Token", token)
            .with_data("Result", reply.result))
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
            .set("user_id", "merchant")
            .set("password", "secret")
            .set("verify_url", "http://127.0.0.1:1/verify")
    }

    #[test]
    fn test_requires_credentials() {
        let err = Fanava::new(&DriverConfig::new().set("user_id", "u")).unwrap_err();
        assert!(err.to_string().contains("password"));
    }

    #[test]
    fn test_request_serialization() {
        let driver = Fanava::new(&config()).unwrap();
        let body = GenerateTokenRequest {
            ws_context: driver.ws_context(),
            trans_type: TRANS_TYPE,
            reserve_num: "order-1",
            amount: "10000".to_string(),
            redirect_url: "https://shop.example/cb",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["WSContext"]["UserId"], "merchant");
        assert_eq!(json["TransType"], "EN_GOODS");
        assert_eq!(json["ReserveNum"], "order-1");
        assert_eq!(json["Amount"], "10000");
        assert_eq!(json["RedirectUrl"], "https://shop.example/cb");
    }

    #[test]
    fn test_amount_accepts_number_or_string() {
        let reply: MerchantTransResponse =
            serde_json::from_str(r#"{"Result":"erSucceed","Amount":10000}"#).unwrap();
        assert_eq!(reply.amount(), Some(10_000));
        let reply: MerchantTransResponse =
            serde_json::from_str(r#"{"Result":"erSucceed","Amount":"10000"}"#).unwrap();
        assert_eq!(reply.amount(), Some(10_000));
    }

    #[tokio::test]
    async fn test_cancelled_state() {
        let driver = Fanava::new(&config()).unwrap();
        let callback = Callback::from_pairs([("State", "Canceled By User"), ("token", "T1")]);
        let result = driver
            .verify_and_confirm(&callback, &MemoryFetcher::new())
            .await
            .unwrap();
        assert_eq!(result.status, VerificationStatus::Cancelled);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_other_state_fails_with_enum_in_message() {
        let driver = Fanava::new(&config()).unwrap();
        let callback = Callback::from_pairs([("State", "Invalid Card Number"), ("token", "T1")]);
        let result = driver
            .verify_and_confirm(&callback, &MemoryFetcher::new())
            .await
            .unwrap();
        assert_eq!(result.status, VerificationStatus::Failed);
        let err = result.error.unwrap();
        assert_eq!(err.code, GatewayError::LOCAL_CODE);
        assert!(err.message.contains("Invalid Card Number"));
    }

    #[tokio::test]
    async fn test_empty_idempotency_key() {
        let driver = Fanava::new(&config()).unwrap();
        let request = TransactionRequest::new(10_000, "https://shop.example/cb", "  ");
        let err = driver.purchase(&request).await.unwrap_err();
        assert_eq!(err.kind, GatewayErrorKind::InvalidRequest);
    }
}
