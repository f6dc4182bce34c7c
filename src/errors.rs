//! Error types for the shaparak-rs library.
//!
//! Two layers of errors exist. [`GatewayError`] is the typed failure value a
//! driver returns from a purchase, verify or refund call; it carries the
//! gateway's native status code when one exists. [`PayError`] is the
//! crate-level error covering configuration, registration and lookup, and it
//! wraps `GatewayError` so callers can use `?` across both.

use crate::driver::Capability;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Boxed error used for causes coming from outside the crate.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Broad classification of a [`GatewayError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayErrorKind {
    /// The remote call did not complete (connect, TLS, timeout, body read).
    Transport,
    /// The remote replied but the payload could not be parsed.
    Protocol,
    /// The gateway explicitly reported a non-success status.
    Business,
    /// The caller's request was rejected locally before any remote call.
    InvalidRequest,
    /// The inbound callback is missing fields or has malformed values.
    Callback,
    /// The caller-supplied transaction fetcher failed.
    Collaborator,
}

impl fmt::Display for GatewayErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GatewayErrorKind::Transport => "transport",
            GatewayErrorKind::Protocol => "protocol",
            GatewayErrorKind::Business => "business",
            GatewayErrorKind::InvalidRequest => "invalid request",
            GatewayErrorKind::Callback => "callback",
            GatewayErrorKind::Collaborator => "collaborator",
        };
        f.write_str(s)
    }
}

/// Failure value returned by gateway drivers.
///
/// `code` holds the gateway-native status code for [`GatewayErrorKind::Business`]
/// errors and [`GatewayError::LOCAL_CODE`] for everything that did not come from
/// the gateway. Protocol errors keep the raw response body in `raw_body`.
#[derive(Debug, Clone, Error)]
#[error("gateway error ({kind}): code={code}, msg='{message}'")]
pub struct GatewayError {
    /// Failure classification
    pub kind: GatewayErrorKind,

    /// Gateway-native status code, or [`GatewayError::LOCAL_CODE`]
    pub code: i32,

    /// Human-readable description
    pub message: String,

    /// Underlying error, if any
    #[source]
    pub cause: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,

    /// Raw remote payload kept for diagnosis of protocol errors
    pub raw_body: Option<String>,
}

impl GatewayError {
    /// Sentinel code for failures that did not originate from the gateway.
    pub const LOCAL_CODE: i32 = -1;

    fn new(kind: GatewayErrorKind, code: i32, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            cause: None,
            raw_body: None,
        }
    }

    /// Network-level failure while talking to the gateway.
    pub fn transport(
        message: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::new(GatewayErrorKind::Transport, Self::LOCAL_CODE, message).with_cause(cause)
    }

    /// Unparseable remote payload. The raw body is preserved.
    pub fn protocol(message: impl Into<String>, raw_body: impl Into<String>) -> Self {
        let mut err = Self::new(GatewayErrorKind::Protocol, Self::LOCAL_CODE, message);
        err.raw_body = Some(raw_body.into());
        err
    }

    /// Gateway-reported rejection with its native code.
    pub fn business(code: i32, message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Business, code, message)
    }

    /// Request rejected locally (e.g. an order id the gateway cannot accept).
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::InvalidRequest, Self::LOCAL_CODE, message)
    }

    /// Malformed inbound callback.
    pub fn callback(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Callback, Self::LOCAL_CODE, message)
    }

    /// The transaction fetcher failed.
    pub fn collaborator(message: impl Into<String>, cause: BoxError) -> Self {
        let mut err = Self::new(GatewayErrorKind::Collaborator, Self::LOCAL_CODE, message);
        err.cause = Some(Arc::from(cause));
        err
    }

    /// Attaches an underlying cause.
    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Returns true if the gateway itself reported this failure.
    pub fn is_business(&self) -> bool {
        self.kind == GatewayErrorKind::Business
    }
}

/// Main error type for registry, configuration and driver operations.
#[derive(Error, Debug)]
pub enum PayError {
    /// A driver's configuration is missing a key or holds a malformed value
    #[error("configuration error for driver '{driver}': {reason}")]
    Config {
        /// Driver being configured
        driver: String,
        /// What is wrong
        reason: String,
    },

    /// No configuration section exists for the driver
    #[error("config for driver '{0}' not found")]
    MissingDriverConfig(String),

    /// A driver with this name was already registered
    #[error("driver '{0}' is already registered")]
    AlreadyRegistered(String),

    /// No driver is registered under this name
    #[error("driver '{0}' not found or not registered")]
    DriverNotFound(String),

    /// The driver constructor failed
    #[error("failed to initialize driver '{name}': {source}")]
    DriverInit {
        /// Driver name
        name: String,
        /// Constructor error
        #[source]
        source: Box<PayError>,
    },

    /// The driver does not implement the requested capability
    #[error("driver '{driver}' does not support {capability}")]
    Unsupported {
        /// Driver name
        driver: String,
        /// Missing capability
        capability: Capability,
    },

    /// Error reported by a gateway driver
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Error during JSON deserialization of configuration
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Error decoding an url-encoded callback body
    #[error("callback decode error: {0}")]
    CallbackError(#[from] serde_urlencoded::de::Error),
}

impl PayError {
    /// Shorthand for [`PayError::Config`].
    pub fn config(driver: impl Into<String>, reason: impl Into<String>) -> Self {
        PayError::Config {
            driver: driver.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for crate-level operations.
pub type Result<T> = std::result::Result<T, PayError>;

/// Result type alias for driver calls.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;
