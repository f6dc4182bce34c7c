//! # shaparak-rs
//!
//! A single request/verify lifecycle over heterogeneous Iranian bank payment
//! gateways (Shaparak IPGs).
//!
//! Every gateway speaks its own protocol: some are SOAP, some JSON; some
//! settle in two calls, some in one; some key transactions by numeric order
//! ids, others by opaque tokens; some report failures as numbers, others as
//! string enums. This crate hides those differences behind one set of
//! capability traits and one normalized [`VerificationResult`].
//!
//! ## Features
//!
//! - **Capability-set drivers**: every driver implements [`Driver`]; redirect
//!   flows add [`RedirectPayer`], reversals add [`Refundable`]
//! - **Registry**: an explicit, injectable store of constructed drivers
//! - **Amount integrity**: capture calls are gated on the confirmed amount
//!   matching the amount recorded at purchase time
//! - **Built-in drivers**: Behpardakht Mellat, Parsian, Fanava, Zarinpal v4,
//!   plus a programmable mock
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shaparak_rs::config::{DriverConfig, GatewayConfig};
//! use shaparak_rs::drivers;
//! use shaparak_rs::fetcher::MemoryFetcher;
//! use shaparak_rs::{Callback, Registry, TransactionRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GatewayConfig::new().with_driver(
//!     "zarinpal_v4",
//!     DriverConfig::new().set("merchant_id", "xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx"),
//! );
//! let registry = Registry::new(config);
//! registry.register_configured(drivers::builtin()).await?;
//!
//! let driver = registry.resolve("zarinpal_v4").await?;
//! let payer = driver.redirect_payer()?;
//!
//! // Purchase: send the payer to `payment_url`, remember the amount.
//! let request = TransactionRequest::new(100_000, "https://shop.example/callback", "1001");
//! let payment = payer.purchase(&request).await?;
//! let transactions = MemoryFetcher::new();
//! transactions.insert(payment.authority.clone(), request.amount).await;
//!
//! // Callback: verify and capture.
//! let callback = Callback::from_urlencoded("Authority=A000000000000000000000000000000abcd1&Status=OK")?;
//! let result = payer.verify_and_confirm(&callback, &transactions).await?;
//! println!("{}: {}", result.status, result.reference_id);
//! # Ok(())
//! # }
//! ```
//!
//! ## Lifecycle
//!
//! 1. **Purchase**: the driver registers the transaction with the gateway and
//!    returns redirect instructions plus an authority
//! 2. **Redirect**: the payer pays on the bank's page (outside this crate)
//! 3. **Callback**: the bank sends the payer back with a handful of fields
//! 4. **Verify and confirm**: the driver parses the callback, fetches the
//!    original amount through a [`TransactionFetcher`], checks it, and runs
//!    the gateway's verify/settle calls
//!
//! ## Errors
//!
//! Gateway calls return [`GatewayError`], classified by
//! [`GatewayErrorKind`](errors::GatewayErrorKind). Business outcomes of the
//! verify phase (declines, cancellations, mismatches) are `Ok` results, not
//! errors. Nothing in the crate retries.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod callback;
pub mod config;
pub mod driver;
pub mod drivers;
pub mod errors;
pub mod fetcher;
pub mod lifecycle;
pub mod registry;
pub mod soap;
pub mod transport;
pub mod types;
pub mod utils;

// Re-export commonly used items
pub use callback::Callback;
pub use driver::{Capability, Driver, RedirectPayer, Refundable};
pub use errors::{GatewayError, GatewayResult, PayError, Result};
pub use fetcher::TransactionFetcher;
pub use registry::Registry;
pub use types::{
    OriginalTransaction, PaymentResponse, RedirectMethod, RefundRequest, RefundResponse,
    TransactionRequest, VerificationResult, VerificationStatus,
};
