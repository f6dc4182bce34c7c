//! Example shop backend using Axum.
//!
//! Starts a purchase against any registered driver and handles the bank's
//! callback. The mock driver is always registered; real gateways are added
//! when a configuration file provides their credentials.
//!
//! Run with:
//! ```bash
//! cargo run --example server
//! ```
//!
//! Environment variables:
//! - GATEWAY_CONFIG: Path to a JSON file of driver sections (optional)
//! - PUBLIC_URL: Base URL the bank redirects back to (default: http://localhost:3000)
//! - PORT: Server port (default: 3000)

use axum::{
    extract::{Path, RawQuery, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use shaparak_rs::config::{DriverConfig, GatewayConfig};
use shaparak_rs::drivers;
use shaparak_rs::fetcher::MemoryFetcher;
use shaparak_rs::{Callback, PayError, Registry, TransactionRequest};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

struct AppState {
    registry: Registry,
    transactions: MemoryFetcher,
    public_url: String,
}

#[derive(Deserialize)]
struct PurchaseBody {
    amount: i64,
    order_id: String,
    #[serde(default)]
    description: String,
}

/// Registers the purchase with the gateway and returns redirect instructions.
async fn purchase_handler(
    State(state): State<Arc<AppState>>,
    Path(driver_name): Path<String>,
    Json(body): Json<PurchaseBody>,
) -> Result<Response, AppError> {
    let driver = state.registry.resolve(&driver_name).await?;
    let payer = driver.redirect_payer()?;

    let callback_url = format!("{}/callback/{}", state.public_url, driver_name);
    let request = TransactionRequest::new(body.amount, callback_url, body.order_id)
        .with_description(body.description);
    let payment = payer.purchase(&request).await.map_err(PayError::from)?;

    // Behpardakht callbacks are keyed by order id, the rest by authority.
    let key = if driver_name == drivers::behpardakht::NAME {
        request.idempotency_key.clone()
    } else {
        payment.authority.clone()
    };
    state.transactions.insert(key, request.amount).await;

    Ok((StatusCode::CREATED, Json(payment)).into_response())
}

/// Bank callback. Accepts fields in the query string or a form body.
async fn callback_handler(
    State(state): State<Arc<AppState>>,
    Path(driver_name): Path<String>,
    RawQuery(query): RawQuery,
    body: String,
) -> Result<Response, AppError> {
    let encoded = if body.trim().is_empty() {
        query.unwrap_or_default()
    } else {
        body
    };
    let callback =
        Callback::from_urlencoded(&encoded).map_err(|e| AppError::BadCallback(e.to_string()))?;

    let driver = state.registry.resolve(&driver_name).await?;
    let result = driver
        .redirect_payer()?
        .verify_and_confirm(&callback, &state.transactions)
        .await
        .map_err(PayError::from)?;

    tracing::info!(
        driver = %driver_name,
        status = %result.status,
        reference_id = %result.reference_id,
        "callback processed"
    );
    Ok(Json(result).into_response())
}

/// Health check endpoint.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "drivers": state.registry.names().await,
    }))
}

fn load_config() -> anyhow::Result<GatewayConfig> {
    let config = match std::env::var("GATEWAY_CONFIG") {
        Ok(path) => GatewayConfig::from_json_str(&std::fs::read_to_string(path)?)?,
        Err(_) => GatewayConfig::new(),
    };
    Ok(config.with_driver(drivers::mock::NAME, DriverConfig::new()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".to_string())
        .parse::<u16>()?;
    let public_url =
        std::env::var("PUBLIC_URL").unwrap_or_else(|_| format!("http://localhost:{}", port));

    let registry = Registry::new(load_config()?);
    registry
        .register(drivers::mock::NAME, drivers::mock::initializer)
        .await?;
    let configured = registry.register_configured(drivers::builtin()).await?;
    tracing::info!(?configured, "gateway drivers ready");

    let state = Arc::new(AppState {
        registry,
        transactions: MemoryFetcher::new(),
        public_url,
    });

    let app = Router::new()
        .route("/purchase/:driver", post(purchase_handler))
        .route("/callback/:driver", get(callback_handler).post(callback_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");
    println!("\nTry:");
    println!(
        "  curl -X POST http://localhost:{}/purchase/mock -H 'content-type: application/json' \\\n    -d '{{\"amount\": 10000, \"order_id\": \"1001\"}}'",
        port
    );
    println!(
        "  curl 'http://localhost:{}/callback/mock?Authority=MOCK-1001&Status=OK'",
        port
    );

    axum::serve(listener, app).await?;

    Ok(())
}

// Error handling
enum AppError {
    BadCallback(String),
    Pay(PayError),
}

impl From<PayError> for AppError {
    fn from(err: PayError) -> Self {
        AppError::Pay(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        use shaparak_rs::errors::GatewayErrorKind;

        let status = match &self {
            AppError::BadCallback(_) => StatusCode::BAD_REQUEST,
            AppError::Pay(PayError::DriverNotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Pay(PayError::Unsupported { .. }) => StatusCode::NOT_IMPLEMENTED,
            AppError::Pay(PayError::Gateway(e)) => match e.kind {
                GatewayErrorKind::InvalidRequest | GatewayErrorKind::Callback => {
                    StatusCode::BAD_REQUEST
                }
                GatewayErrorKind::Business => StatusCode::PAYMENT_REQUIRED,
                _ => StatusCode::BAD_GATEWAY,
            },
            AppError::Pay(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match self {
            AppError::BadCallback(msg) => msg,
            AppError::Pay(err) => err.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
