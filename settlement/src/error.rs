//! Error types for the settlement pipeline.
//!
//! Every public fallible operation returns a [`SettlementError`]. Variants
//! carry structured fields (amounts, currency, wait time) so a caller can
//! render "you need 0.02 more SOL" or "try again in 3s" without parsing a
//! message string.

use thiserror::Error;

use crate::ledger::LedgerError;
use crate::signer::SignerError;
use crate::types::{Currency, Fingerprint};

/// Errors that can occur while settling a payment.
#[derive(Debug, Error)]
pub enum SettlementError {
    /// The amount is malformed, negative, zero, or overflows.
    #[error("invalid amount: {reason}")]
    InvalidAmount {
        /// What was wrong with it.
        reason: String,
    },

    /// The fee schedule itself is unusable (zero denominator or > 100%).
    #[error("invalid fee schedule: {numerator}/{denominator}")]
    InvalidFeeSchedule { numerator: u64, denominator: u64 },

    /// The payer cannot cover the payment plus network costs and reserve.
    #[error("insufficient {currency} funds: required {required}, available {available}")]
    InsufficientFunds {
        /// Currency the check was performed in.
        currency: Currency,
        /// Amount needed, including network fee where applicable.
        required: u64,
        /// Amount actually spendable.
        available: u64,
    },

    /// The process-wide submission budget is exhausted for now.
    #[error("rate limited: retry in {wait_time_ms}ms")]
    RateLimited {
        /// Milliseconds until the oldest admission leaves the window.
        wait_time_ms: u64,
    },

    /// An identical payment is already pending or confirmed.
    #[error("duplicate transaction: {fingerprint} is already in flight")]
    DuplicateTransaction { fingerprint: Fingerprint },

    /// The ledger's dry run rejected the transaction. Never retried.
    #[error("simulation failed: {message}")]
    Simulation {
        message: String,
        /// Program logs returned by the simulation.
        logs: Vec<String>,
    },

    /// Every attempt hit a transient failure and the retry budget ran out.
    #[error("network error persisted after {attempts} attempts: {last_error}")]
    TransientNetwork {
        attempts: u32,
        last_error: LedgerError,
    },

    /// Submission failed with an error that retrying cannot fix.
    #[error("transaction rejected on attempt {attempt}: {source}")]
    Rejected {
        attempt: u32,
        #[source]
        source: LedgerError,
    },

    /// The currency kind is not accepted by this deployment.
    #[error("unsupported currency: {0}")]
    UnsupportedCurrency(String),

    /// A read-only ledger query failed.
    #[error("ledger query failed: {0}")]
    Ledger(#[from] LedgerError),

    /// The wallet refused or failed to sign.
    #[error("signing failed: {0}")]
    Signer(#[from] SignerError),

    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Field-less discriminant of [`SettlementError`], for metrics labels and
/// UI branching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidAmount,
    InvalidFeeSchedule,
    InsufficientFunds,
    RateLimited,
    DuplicateTransaction,
    Simulation,
    TransientNetwork,
    Rejected,
    UnsupportedCurrency,
    Ledger,
    Signer,
    Config,
}

impl SettlementError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidAmount { .. } => ErrorKind::InvalidAmount,
            Self::InvalidFeeSchedule { .. } => ErrorKind::InvalidFeeSchedule,
            Self::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::DuplicateTransaction { .. } => ErrorKind::DuplicateTransaction,
            Self::Simulation { .. } => ErrorKind::Simulation,
            Self::TransientNetwork { .. } => ErrorKind::TransientNetwork,
            Self::Rejected { .. } => ErrorKind::Rejected,
            Self::UnsupportedCurrency(_) => ErrorKind::UnsupportedCurrency,
            Self::Ledger(_) => ErrorKind::Ledger,
            Self::Signer(_) => ErrorKind::Signer,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// `true` for conditions the caller is expected to handle and move on
    /// from: wait out a rate limit, or treat a duplicate as "in progress".
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::DuplicateTransaction { .. }
        )
    }

    /// For [`SettlementError::InsufficientFunds`], how much is missing.
    pub fn shortfall(&self) -> Option<u64> {
        match self {
            Self::InsufficientFunds {
                required,
                available,
                ..
            } => Some(required.saturating_sub(*available)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_kinds() {
        assert!(SettlementError::RateLimited { wait_time_ms: 10 }.is_recoverable());
        assert!(SettlementError::DuplicateTransaction {
            fingerprint: Fingerprint::from("abc")
        }
        .is_recoverable());
        assert!(!SettlementError::Simulation {
            message: "bad".into(),
            logs: vec![]
        }
        .is_recoverable());
        assert!(!SettlementError::UnsupportedCurrency("x".into()).is_recoverable());
    }

    #[test]
    fn shortfall_reported() {
        let err = SettlementError::InsufficientFunds {
            currency: Currency::Native,
            required: 1_000,
            available: 999,
        };
        assert_eq!(err.shortfall(), Some(1));
        assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
        assert_eq!(
            SettlementError::RateLimited { wait_time_ms: 1 }.shortfall(),
            None
        );
    }

    #[test]
    fn messages_carry_context() {
        let err = SettlementError::InsufficientFunds {
            currency: Currency::token("RPS"),
            required: 50,
            available: 20,
        };
        let msg = err.to_string();
        assert!(msg.contains("token:RPS"));
        assert!(msg.contains("50"));
        assert!(msg.contains("20"));

        let err = SettlementError::TransientNetwork {
            attempts: 4,
            last_error: LedgerError::ConfirmationTimeout,
        };
        assert!(err.to_string().contains("4 attempts"));
    }
}
