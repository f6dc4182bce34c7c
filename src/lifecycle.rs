//! Transaction lifecycle shared by every driver.
//!
//! A payment moves `Initiated → Redirected → Verifying → Confirmed/Settled`
//! and then ends. Two-phase gateways pass through `Confirmed` (verify call)
//! before `Settled` (settle call); single-call gateways jump from `Verifying`
//! straight to `Settled`. Any phase may end early in `Terminal`.
//!
//! Capture calls take an [`AmountVerified`] witness, which only
//! [`check_amount`] can produce, so a driver cannot settle without having
//! compared the confirmed amount against the original one. Gateways that
//! receive the stored amount and reject a differing payment themselves get
//! their witness from the stored transaction instead.

use crate::errors::{GatewayError, GatewayResult};
use crate::types::OriginalTransaction;
use std::fmt;

/// A step in the payment lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Purchase registered with the gateway
    Initiated,
    /// Payer sent to the payment page
    Redirected,
    /// Callback received, verification in progress
    Verifying,
    /// Gateway verified the payment; settlement pending
    Confirmed,
    /// Payment captured
    Settled,
    /// Lifecycle ended without further remote calls
    Terminal,
}

impl Phase {
    /// Returns true if `next` may follow `self`.
    pub fn can_advance_to(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Initiated, Redirected)
                | (Redirected, Verifying)
                | (Verifying, Confirmed)
                | (Verifying, Settled)
                | (Confirmed, Settled)
                | (Initiated | Redirected | Verifying | Confirmed | Settled, Terminal)
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Tracks one transaction through its phases and logs each transition.
#[derive(Debug)]
pub struct Lifecycle<'a> {
    driver: &'a str,
    identifier: String,
    phase: Phase,
}

impl<'a> Lifecycle<'a> {
    /// Starts tracking at the purchase phase.
    pub fn purchase(driver: &'a str, identifier: impl Into<String>) -> Self {
        Self::at(driver, identifier, Phase::Initiated)
    }

    /// Starts tracking at the callback, i.e. after the payer was redirected.
    pub fn callback(driver: &'a str, identifier: impl Into<String>) -> Self {
        Self::at(driver, identifier, Phase::Redirected)
    }

    fn at(driver: &'a str, identifier: impl Into<String>, phase: Phase) -> Self {
        Self {
            driver,
            identifier: identifier.into(),
            phase,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Moves to `next`, rejecting out-of-order transitions.
    pub fn advance(&mut self, next: Phase) -> GatewayResult<()> {
        if !self.phase.can_advance_to(next) {
            return Err(GatewayError::invalid_request(format!(
                "illegal lifecycle transition {} -> {} for '{}'",
                self.phase, next, self.identifier
            )));
        }
        tracing::debug!(
            driver = self.driver,
            id = %self.identifier,
            from = %self.phase,
            to = %next,
            "lifecycle transition"
        );
        self.phase = next;
        Ok(())
    }

    /// Ends the lifecycle early, recording why.
    pub fn terminate(&mut self, reason: &str) {
        tracing::debug!(
            driver = self.driver,
            id = %self.identifier,
            from = %self.phase,
            reason,
            "lifecycle terminated"
        );
        self.phase = Phase::Terminal;
    }
}

/// Proof that the confirmed amount equals the original amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountVerified {
    amount: i64,
}

impl AmountVerified {
    /// The verified amount, in the request's minor unit.
    pub fn amount(&self) -> i64 {
        self.amount
    }

    /// Witness for gateways that receive the stored amount with the capture
    /// call and reject it themselves when it differs from what was paid.
    pub(crate) fn enforced_by_gateway(original: &OriginalTransaction) -> Self {
        Self {
            amount: original.amount,
        }
    }
}

/// Outcome of the amount-integrity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Integrity {
    /// Amounts match; capture may proceed
    Verified(AmountVerified),
    /// Amounts differ; capture must not proceed
    Mismatch {
        /// Amount recorded at purchase time
        expected: i64,
        /// Amount the gateway confirmed
        confirmed: i64,
    },
}

/// Compares the amount confirmed by the gateway with the original request.
///
/// Both amounts must already be in the request's minor unit.
///
/// # Examples
///
/// ```
/// use shaparak_rs::lifecycle::{check_amount, Integrity};
/// use shaparak_rs::types::OriginalTransaction;
///
/// let original = OriginalTransaction { amount: 10_000 };
/// assert!(matches!(check_amount(&original, 10_000), Integrity::Verified(_)));
/// assert!(matches!(check_amount(&original, 1_000), Integrity::Mismatch { .. }));
/// ```
pub fn check_amount(original: &OriginalTransaction, confirmed: i64) -> Integrity {
    if original.amount == confirmed {
        Integrity::Verified(AmountVerified { amount: confirmed })
    } else {
        Integrity::Mismatch {
            expected: original.amount,
            confirmed,
        }
    }
}
