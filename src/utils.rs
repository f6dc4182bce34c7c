//! Utility functions shared by the gateway drivers.
//!
//! Amount-unit conversion, order-id parsing, payment-URL checks and bank-local
//! timestamps.

use crate::errors::{GatewayError, GatewayResult};
use chrono::{DateTime, FixedOffset, Utc};
use url::Url;

/// Iran Standard Time offset (UTC+03:30, no daylight saving since 2022).
const TEHRAN_OFFSET_SECS: i32 = 3 * 3600 + 30 * 60;

/// Converts a request amount (Rial) into a gateway's unit.
///
/// `divisor` is the gateway's fixed conversion factor (1 for Rial gateways,
/// 10 for Toman gateways). Amounts must be positive and exactly divisible.
///
/// # Examples
///
/// ```
/// use shaparak_rs::utils::to_gateway_amount;
///
/// assert_eq!(to_gateway_amount(10_000, 10).unwrap(), 1_000);
/// assert!(to_gateway_amount(10_005, 10).is_err());
/// assert!(to_gateway_amount(0, 1).is_err());
/// ```
pub fn to_gateway_amount(amount: i64, divisor: i64) -> GatewayResult<i64> {
    if amount <= 0 {
        return Err(GatewayError::invalid_request(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    if divisor <= 0 || amount % divisor != 0 {
        return Err(GatewayError::invalid_request(format!(
            "amount {} is not a multiple of the gateway unit ({})",
            amount, divisor
        )));
    }
    Ok(amount / divisor)
}

/// Converts a gateway amount back into the request unit (Rial).
///
/// # Examples
///
/// ```
/// use shaparak_rs::utils::from_gateway_amount;
///
/// assert_eq!(from_gateway_amount(1_000, 10), 10_000);
/// ```
pub fn from_gateway_amount(amount: i64, divisor: i64) -> i64 {
    amount.saturating_mul(divisor)
}

/// Parses an idempotency key as the numeric order id some gateways require.
///
/// # Examples
///
/// ```
/// use shaparak_rs::utils::parse_order_id;
///
/// assert_eq!(parse_order_id("1001").unwrap(), 1001);
/// assert!(parse_order_id("order-1").is_err());
/// ```
pub fn parse_order_id(key: &str) -> GatewayResult<i64> {
    let id: i64 = key.trim().parse().map_err(|e| {
        GatewayError::invalid_request(format!(
            "invalid order id '{}' (idempotency key must be a valid int64 string)",
            key
        ))
        .with_cause(e)
    })?;
    if id <= 0 {
        return Err(GatewayError::invalid_request(format!(
            "invalid order id '{}' (must be positive)",
            key
        )));
    }
    Ok(id)
}

/// Checks that a payment URL is absolute http(s).
pub fn ensure_payment_url(raw: &str) -> GatewayResult<Url> {
    let url = Url::parse(raw).map_err(|e| {
        GatewayError::invalid_request(format!("payment url '{}' is not absolute", raw)).with_cause(e)
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(GatewayError::invalid_request(format!(
            "payment url '{}' has unsupported scheme '{}'",
            raw, other
        ))),
    }
}

/// Appends `segment` to the path of `base` (e.g. `StartPay/<authority>`).
pub fn join_path(base: &str, segment: &str) -> GatewayResult<String> {
    let mut url = ensure_payment_url(base)?;
    url.path_segments_mut()
        .map_err(|_| GatewayError::invalid_request(format!("'{}' cannot be a base url", base)))?
        .pop_if_empty()
        .push(segment);
    Ok(url.to_string())
}

/// Sets a query parameter on `base` (e.g. `?Token=<token>`).
pub fn with_query(base: &str, key: &str, value: &str) -> GatewayResult<String> {
    let mut url = ensure_payment_url(base)?;
    url.query_pairs_mut().append_pair(key, value);
    Ok(url.to_string())
}

/// Current time in Iran Standard Time.
pub fn tehran_now() -> DateTime<FixedOffset> {
    to_tehran(Utc::now())
}

/// Converts a UTC instant to Iran Standard Time.
pub fn to_tehran(instant: DateTime<Utc>) -> DateTime<FixedOffset> {
    match FixedOffset::east_opt(TEHRAN_OFFSET_SECS) {
        Some(offset) => instant.with_timezone(&offset),
        None => instant.fixed_offset(),
    }
}

/// Returns `YYYYMMDD` and `HHMMSS` strings for a bank-local timestamp.
pub fn bank_date_time(at: &DateTime<FixedOffset>) -> (String, String) {
    (at.format("%Y%m%d").to_string(), at.format("%H%M%S").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_to_gateway_amount() {
        assert_eq!(to_gateway_amount(10_000, 1).unwrap(), 10_000);
        assert_eq!(to_gateway_amount(10_000, 10).unwrap(), 1_000);
        assert!(to_gateway_amount(-10, 1).is_err());
        assert!(to_gateway_amount(15, 10).is_err());
    }

    #[test]
    fn test_conversion_is_consistent() {
        let gateway = to_gateway_amount(250_000, 10).unwrap();
        assert_eq!(from_gateway_amount(gateway, 10), 250_000);
    }

    #[test]
    fn test_parse_order_id() {
        assert_eq!(parse_order_id(" 42 ").unwrap(), 42);
        assert!(parse_order_id("0").is_err());
        assert!(parse_order_id("").is_err());
        let err = parse_order_id("order-1").unwrap_err();
        assert!(err.cause.is_some());
    }

    #[test]
    fn test_ensure_payment_url() {
        assert!(ensure_payment_url("https://bpm.shaparak.ir/pgwchannel/startpay.mellat").is_ok());
        assert!(ensure_payment_url("/relative/path").is_err());
        assert!(ensure_payment_url("ftp://host/file").is_err());
    }

    #[test]
    fn test_join_path_and_query() {
        assert_eq!(
            join_path("https://www.zarinpal.com/pg/StartPay/", "A0000012").unwrap(),
            "https://www.zarinpal.com/pg/StartPay/A0000012"
        );
        assert_eq!(
            with_query("https://pec.shaparak.ir/NewIPG/", "Token", "123").unwrap(),
            "https://pec.shaparak.ir/NewIPG/?Token=123"
        );
    }

    #[test]
    fn test_bank_date_time() {
        let utc = Utc.with_ymd_and_hms(2024, 3, 20, 21, 0, 0).unwrap();
        let (date, time) = bank_date_time(&to_tehran(utc));
        assert_eq!(date, "20240321");
        assert_eq!(time, "003000");
    }
}
