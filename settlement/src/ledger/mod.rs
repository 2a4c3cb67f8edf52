//! # Ledger Network Interface
//!
//! The settlement layer does not store balances or execute transfers. It
//! asks a ledger. This module defines the narrow contract it relies on,
//! [`LedgerClient`], plus the error vocabulary the ledger speaks.
//!
//! ```text
//! mod.rs   : LedgerClient trait, LedgerError, SequencingToken, SimulationReport
//! memory.rs: InMemoryLedger: a scriptable ledger for devnets and tests
//! ```
//!
//! ## Failure classification
//!
//! Whether a failed submission is worth retrying is decided here, by
//! [`LedgerError::is_retryable`], and nowhere else. Retryable means the
//! *same* payment could succeed if sent again with fresh sequencing data:
//! a stale token, a confirmation timeout, a dropped connection, or the
//! node telling us to slow down. Everything else (no money, bad signature,
//! the program said no) will fail identically on every attempt.

pub mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transaction::SettlementTransaction;
use crate::types::{Address, Currency};

pub use memory::InMemoryLedger;

// ---------------------------------------------------------------------------
// SequencingToken
// ---------------------------------------------------------------------------

/// A short-lived recent-block reference. Transactions carrying an expired
/// one are refused, which is what makes old signatures unreplayable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequencingToken(String);

impl SequencingToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SequencingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// SimulationReport
// ---------------------------------------------------------------------------

/// Result of a dry run. `error` is `None` when the transaction would
/// succeed as built.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SimulationReport {
    pub error: Option<String>,
    pub logs: Vec<String>,
    pub units_consumed: Option<u64>,
}

impl SimulationReport {
    pub fn ok(logs: Vec<String>) -> Self {
        Self {
            error: None,
            logs,
            units_consumed: None,
        }
    }

    pub fn failed(message: impl Into<String>, logs: Vec<String>) -> Self {
        Self {
            error: Some(message.into()),
            logs,
            units_consumed: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

// ---------------------------------------------------------------------------
// LedgerError
// ---------------------------------------------------------------------------

/// Failures reported by the ledger network or the transport to it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The transaction's sequencing token is no longer accepted.
    #[error("sequencing token expired")]
    SequencingTokenExpired,

    /// Sent, but confirmation did not arrive in time.
    #[error("confirmation timed out")]
    ConfirmationTimeout,

    /// The connection to the node failed or was reset.
    #[error("connection error: {0}")]
    Connection(String),

    /// The node is throttling us.
    #[error("rate limited by ledger node")]
    RateLimited,

    /// The ledger found the payer short at execution time.
    #[error("insufficient funds for transaction")]
    InsufficientFunds,

    #[error("invalid transaction signature")]
    InvalidSignature,

    /// A program in the transaction returned an error.
    #[error("program rejected transaction (code {code}): {message}")]
    ProgramRejected { code: u32, message: String },

    #[error("ledger error: {0}")]
    Other(String),
}

impl LedgerError {
    /// `true` if resubmitting the same payment with a fresh sequencing
    /// token may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SequencingTokenExpired
                | Self::ConfirmationTimeout
                | Self::Connection(_)
                | Self::RateLimited
        )
    }

    /// Classifies a raw RPC error message.
    ///
    /// Node software reports most failures as free text. The phrases
    /// matched here are the ones observed from public RPC providers; an
    /// unrecognized message becomes [`LedgerError::Other`] and is treated
    /// as fatal.
    pub fn from_rpc_message(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if has(&["blockhash not found", "block height exceeded", "blockhash expired"]) {
            Self::SequencingTokenExpired
        } else if has(&["timed out", "timeout", "was not confirmed"]) {
            Self::ConfirmationTimeout
        } else if has(&["429", "too many requests", "rate limit"]) {
            Self::RateLimited
        } else if has(&["insufficient funds", "insufficient lamports"]) {
            Self::InsufficientFunds
        } else if has(&["signature verification failed", "invalid signature", "missing signature"]) {
            Self::InvalidSignature
        } else if let Some(code) = parse_custom_program_error(&lower) {
            Self::ProgramRejected {
                code,
                message: message.to_string(),
            }
        } else if has(&[
            "connection refused",
            "connection reset",
            "econnreset",
            "econnrefused",
            "network error",
            "broken pipe",
            "502",
            "503",
        ]) {
            Self::Connection(message.to_string())
        } else {
            Self::Other(message.to_string())
        }
    }
}

/// Extracts `N` from `... custom program error: 0xN`.
fn parse_custom_program_error(lower: &str) -> Option<u32> {
    let idx = lower.find("custom program error: 0x")?;
    let hex_start = idx + "custom program error: 0x".len();
    let digits: String = lower[hex_start..]
        .chars()
        .take_while(|c| c.is_ascii_hexdigit())
        .collect();
    u32::from_str_radix(&digits, 16).ok()
}

// ---------------------------------------------------------------------------
// LedgerClient
// ---------------------------------------------------------------------------

/// What the settlement layer needs from a ledger network.
///
/// Every method is a suspension point. Implementations are expected to be
/// cheap to share (`Arc<dyn LedgerClient>`).
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Spendable balance of `owner` in `currency`.
    ///
    /// Returns `Ok(None)` when `owner` has no account for a fungible token.
    /// Native balances of unknown accounts are `Ok(Some(0))`.
    async fn get_balance(
        &self,
        owner: &Address,
        currency: &Currency,
    ) -> Result<Option<u64>, LedgerError>;

    /// A fresh sequencing token to stamp transactions with.
    async fn latest_sequencing_token(&self) -> Result<SequencingToken, LedgerError>;

    /// Dry-runs `tx` without committing anything.
    async fn simulate(&self, tx: &SettlementTransaction) -> Result<SimulationReport, LedgerError>;

    /// Submits `tx` and waits for confirmation. Returns the ledger
    /// signature of the confirmed transaction.
    async fn submit_and_confirm(&self, tx: &SettlementTransaction) -> Result<String, LedgerError>;
}
