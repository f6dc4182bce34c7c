//! Integration tests for the shaparak-rs library.
//!
//! These tests exercise the public surface end to end: configuration,
//! registration, capability lookup and the purchase/callback lifecycle,
//! using the in-process mock driver where no bank is involved.

use shaparak_rs::config::{DriverConfig, GatewayConfig};
use shaparak_rs::drivers::{self, mock::MockDriver};
use shaparak_rs::errors::{BoxError, GatewayErrorKind};
use shaparak_rs::fetcher::{FnFetcher, MemoryFetcher, TransactionNotFound};
use shaparak_rs::{
    Callback, Capability, Driver, GatewayError, OriginalTransaction, PayError, Registry,
    TransactionRequest, VerificationResult, VerificationStatus,
};
use std::sync::Arc;

fn mock_config() -> GatewayConfig {
    GatewayConfig::new().with_driver(drivers::mock::NAME, DriverConfig::new())
}

#[tokio::test]
async fn test_mock_lifecycle_through_registry() {
    let registry = Registry::new(mock_config());
    registry
        .register(drivers::mock::NAME, drivers::mock::initializer)
        .await
        .unwrap();

    let driver = registry.resolve("mock").await.unwrap();
    let payer = driver.redirect_payer().unwrap();

    let request = TransactionRequest::new(10_000, "https://shop.example/callback", "order-1")
        .with_description("two books");
    let payment = payer.purchase(&request).await.unwrap();
    assert!(!payment.authority.is_empty());
    assert!(payment.payment_url.contains(&payment.authority));

    let transactions = MemoryFetcher::new();
    transactions.insert(payment.authority.clone(), request.amount).await;

    let encoded = format!("Authority={}&Status=OK&Amount=10000", payment.authority);
    let callback = Callback::from_urlencoded(&encoded).unwrap();
    let result = payer.verify_and_confirm(&callback, &transactions).await.unwrap();

    assert_eq!(result.status, VerificationStatus::Success);
    assert!(result.is_paid());
    assert!(!result.reference_id.is_empty());
    assert_ne!(result.reference_id, payment.authority);

    let again = payer.verify_and_confirm(&callback, &transactions).await.unwrap();
    assert_eq!(again.status, VerificationStatus::AlreadyVerified);
    assert_eq!(again.reference_id, result.reference_id);
}

#[tokio::test]
async fn test_cancelled_and_mismatched_callbacks() {
    let mock = MockDriver::new();
    let payer = mock.redirect_payer().unwrap();
    let transactions = MemoryFetcher::new();
    transactions.insert("MOCK-7", 50_000).await;

    let cancelled = Callback::from_pairs([("Authority", "MOCK-7"), ("Status", "CANCEL")]);
    let result = payer.verify_and_confirm(&cancelled, &transactions).await.unwrap();
    assert_eq!(result.status, VerificationStatus::Cancelled);
    assert!(!result.is_paid());

    let short = Callback::from_pairs([
        ("Authority", "MOCK-7"),
        ("Status", "OK"),
        ("Amount", "5000"),
    ]);
    let result = payer.verify_and_confirm(&short, &transactions).await.unwrap();
    assert_eq!(result.status, VerificationStatus::AmountMismatch);
    assert_eq!(result.original_data["expected_amount"], 50_000);
    assert_eq!(result.original_data["confirmed_amount"], 5_000);

    // Neither callback settled the payment, so a correct one still succeeds.
    let good = Callback::from_pairs([("Authority", "MOCK-7"), ("Status", "OK")]);
    let result = payer.verify_and_confirm(&good, &transactions).await.unwrap();
    assert_eq!(result.status, VerificationStatus::Success);
}

async fn two_phase_payer(registry: &Registry, mock: &Arc<MockDriver>) -> Arc<dyn Driver> {
    let shared = mock.clone();
    registry
        .register("mock", move |_| Ok(shared as Arc<dyn Driver>))
        .await
        .unwrap();
    registry.resolve("mock").await.unwrap()
}

#[tokio::test]
async fn test_two_phase_gateway_settles_only_verified_payments() {
    let request = TransactionRequest::new(10_000, "https://shop.example/callback/mock", "order-1");

    let mock = Arc::new(MockDriver::two_phase());
    let registry = Registry::new(mock_config());
    let driver = two_phase_payer(&registry, &mock).await;
    let payer = driver.redirect_payer().unwrap();

    let payment = payer.purchase(&request).await.unwrap();
    assert_eq!(payment.authority, "MOCK-order-1");
    assert!(payment.payment_url.ends_with("?Authority=MOCK-order-1"));
    let transactions = MemoryFetcher::new();
    transactions.insert(payment.authority.clone(), request.amount).await;

    let ok = Callback::from_pairs([("Authority", "MOCK-order-1"), ("Status", "OK")]);
    let result = payer.verify_and_confirm(&ok, &transactions).await.unwrap();
    assert_eq!(result.status, VerificationStatus::Success);
    assert_ne!(result.reference_id, payment.authority);
    assert_eq!(mock.settle_calls(), 1);

    let replay = payer.verify_and_confirm(&ok, &transactions).await.unwrap();
    assert_eq!(replay.status, VerificationStatus::AlreadyVerified);
    assert_eq!(mock.settle_calls(), 1);

    // Cancelled and short-paid callbacks never reach the settle step.
    let mock = Arc::new(MockDriver::two_phase());
    let registry = Registry::new(mock_config());
    let driver = two_phase_payer(&registry, &mock).await;
    let payer = driver.redirect_payer().unwrap();
    payer.purchase(&request).await.unwrap();

    let cancelled = Callback::from_pairs([("Authority", "MOCK-order-1"), ("Status", "CANCEL")]);
    let result = payer.verify_and_confirm(&cancelled, &transactions).await.unwrap();
    assert_eq!(result.status, VerificationStatus::Cancelled);

    let short = Callback::from_pairs([
        ("Authority", "MOCK-order-1"),
        ("Status", "OK"),
        ("Amount", "1000"),
    ]);
    let result = payer.verify_and_confirm(&short, &transactions).await.unwrap();
    assert_eq!(result.status, VerificationStatus::AmountMismatch);
    assert_eq!(mock.settle_calls(), 0);
}

#[tokio::test]
async fn test_two_phase_flag_from_config() {
    let config = GatewayConfig::new().with_driver(
        drivers::mock::NAME,
        DriverConfig::new()
            .set("two_phase", "true")
            .set("payment_url", "http://127.0.0.1:8080/pay"),
    );
    let registry = Registry::new(config);
    registry
        .register(drivers::mock::NAME, drivers::mock::initializer)
        .await
        .unwrap();
    let driver = registry.resolve(drivers::mock::NAME).await.unwrap();
    let request = TransactionRequest::new(10_000, "https://shop.example/callback/mock", "order-1");
    let payment = driver.redirect_payer().unwrap().purchase(&request).await.unwrap();
    assert_eq!(payment.payment_url, "http://127.0.0.1:8080/pay?Authority=MOCK-order-1");
}

#[tokio::test]
async fn test_malformed_endpoint_is_config_error() {
    let config = GatewayConfig::new().with_driver(
        "behpardakht_v1",
        DriverConfig::new()
            .set("terminal_id", "1")
            .set("username", "u")
            .set("password", "p")
            .set("service_url", "not a url"),
    );
    let registry = Registry::new(config);
    let err = registry
        .register("behpardakht_v1", drivers::behpardakht::initializer)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PayError::DriverInit { ref source, .. } if matches!(**source, PayError::Config { .. })
    ));
}

#[tokio::test]
async fn test_malformed_callback_is_an_error() {
    let mock = MockDriver::new();
    let callback = Callback::from_pairs([("Status", "OK")]);
    let err = mock
        .redirect_payer()
        .unwrap()
        .verify_and_confirm(&callback, &MemoryFetcher::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind, GatewayErrorKind::Callback);
}

#[tokio::test]
async fn test_fetcher_failure_is_fatal() {
    let mock = MockDriver::new();
    let fetcher = FnFetcher::new(|id: String| async move {
        Err::<OriginalTransaction, BoxError>(Box::new(TransactionNotFound(id)))
    });
    let callback = Callback::from_pairs([("Authority", "MOCK-9"), ("Status", "OK")]);

    let err = mock
        .redirect_payer()
        .unwrap()
        .verify_and_confirm(&callback, &fetcher)
        .await
        .unwrap_err();

    assert_eq!(err.kind, GatewayErrorKind::Collaborator);
    assert_eq!(err.code, GatewayError::LOCAL_CODE);
    assert!(err.cause.unwrap().to_string().contains("MOCK-9"));
}

#[tokio::test]
async fn test_programmed_mock_is_shared_through_registry() {
    let mock = Arc::new(
        MockDriver::new()
            .on_verify(|_| {
                Ok(VerificationResult::failed(GatewayError::business(
                    51,
                    "insufficient funds",
                )))
            })
            .on_refund(|req| Ok(shaparak_rs::RefundResponse::new(req.reference_id.clone()))),
    );
    let registry = Registry::new(mock_config());
    let shared = mock.clone();
    registry
        .register("mock", move |_| Ok(shared as Arc<dyn Driver>))
        .await
        .unwrap();

    let driver = registry.resolve("mock").await.unwrap();
    assert_eq!(
        driver.capabilities(),
        vec![Capability::RedirectPayment, Capability::Refund]
    );

    let result = driver
        .redirect_payer()
        .unwrap()
        .verify_and_confirm(&Callback::default(), &MemoryFetcher::new())
        .await
        .unwrap();
    assert_eq!(result.status, VerificationStatus::Failed);
    assert_eq!(result.error.unwrap().code, 51);
    assert_eq!(mock.verify_calls(), 1);
}

#[tokio::test]
async fn test_registry_errors() {
    let registry = Registry::new(mock_config());
    registry
        .register("mock", drivers::mock::initializer)
        .await
        .unwrap();

    let err = registry
        .register("mock", drivers::mock::initializer)
        .await
        .unwrap_err();
    assert!(matches!(err, PayError::AlreadyRegistered(ref n) if n == "mock"));

    let err = registry
        .register("parsian_v1", drivers::parsian::initializer)
        .await
        .unwrap_err();
    assert!(matches!(err, PayError::MissingDriverConfig(_)));

    let err = registry.resolve("nonexistent").await.err().unwrap();
    assert!(matches!(err, PayError::DriverNotFound(_)));
    assert_eq!(registry.names().await, vec!["mock".to_string()]);
}

#[tokio::test]
async fn test_failed_constructor_leaves_registry_unchanged() {
    let config = GatewayConfig::new().with_driver(
        "behpardakht_v1",
        DriverConfig::new().set("terminal_id", "not-a-number"),
    );
    let registry = Registry::new(config);
    let err = registry
        .register("behpardakht_v1", drivers::behpardakht::initializer)
        .await
        .unwrap_err();

    assert!(matches!(err, PayError::DriverInit { ref name, .. } if name == "behpardakht_v1"));
    assert!(!registry.contains("behpardakht_v1").await);
}

#[tokio::test]
async fn test_builtin_drivers_from_json_config() {
    let json = r#"{
        "drivers": {
            "zarinpal_v4": { "merchant_id": "1344b5d4-0048-11e8-94db-005056a205be", "sandbox": "true" },
            "parsian_v1": { "login_account": "ABCDEF123" }
        }
    }"#;
    let registry = Registry::new(GatewayConfig::from_json_str(json).unwrap());
    let registered = registry.register_configured(drivers::builtin()).await.unwrap();
    assert_eq!(registered, vec!["parsian_v1", "zarinpal_v4"]);

    let zarinpal = registry.resolve("zarinpal_v4").await.unwrap();
    assert_eq!(zarinpal.capabilities(), vec![Capability::RedirectPayment]);
    let err = zarinpal.refundable().err().unwrap();
    assert!(matches!(
        err,
        PayError::Unsupported { capability: Capability::Refund, .. }
    ));

    let parsian = registry.resolve("parsian_v1").await.unwrap();
    assert!(parsian.supports(Capability::Refund));
}

#[tokio::test]
async fn test_unreachable_gateway_is_transport_error() {
    let config = GatewayConfig::new().with_driver(
        "zarinpal_v4",
        DriverConfig::new()
            .set("merchant_id", "m")
            .set("request_url", "http://127.0.0.1:1/request.json")
            .set("timeout_secs", "2"),
    );
    let registry = Registry::new(config);
    registry
        .register("zarinpal_v4", drivers::zarinpal::initializer)
        .await
        .unwrap();

    let driver = registry.resolve("zarinpal_v4").await.unwrap();
    let request = TransactionRequest::new(10_000, "https://shop.example/callback", "order-1");
    let err = driver
        .redirect_payer()
        .unwrap()
        .purchase(&request)
        .await
        .unwrap_err();

    assert_eq!(err.kind, GatewayErrorKind::Transport);
    assert!(err.cause.is_some());
}

#[tokio::test]
async fn test_concurrent_resolve_and_purchase() {
    let registry = Arc::new(Registry::new(mock_config()));
    registry
        .register("mock", drivers::mock::initializer)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..32 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            let driver = registry.resolve("mock").await.unwrap();
            let request = TransactionRequest::new(
                1_000 + i,
                "https://shop.example/callback",
                format!("order-{}", i),
            );
            driver
                .redirect_payer()
                .unwrap()
                .purchase(&request)
                .await
                .unwrap()
                .authority
        }));
    }

    let mut authorities = Vec::new();
    for handle in handles {
        authorities.push(handle.await.unwrap());
    }
    authorities.sort();
    authorities.dedup();
    assert_eq!(authorities.len(), 32);
}
