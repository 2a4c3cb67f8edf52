//! # Settlement Configuration & Constants
//!
//! Every tunable number in the settlement layer lives here, first as a
//! documented constant and then grouped into [`SettlementConfig`] so a host
//! application can override any subset from a JSON file.
//!
//! The fee constants must match what the on-chain program charges. If the
//! client and the program disagree about the fee, the pot and the fee
//! account disagree about reality, and reconciliation becomes a hobby.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SettlementError;
use crate::types::TokenId;

// ---------------------------------------------------------------------------
// Fee Parameters
// ---------------------------------------------------------------------------

/// Protocol fee numerator. 10 / 1000 = 1%, mirrored from the arena program.
pub const FEE_NUMERATOR: u64 = 10;

/// Protocol fee denominator.
pub const FEE_DENOMINATOR: u64 = 1_000;

// ---------------------------------------------------------------------------
// Rate Limiting
// ---------------------------------------------------------------------------

/// Length of the sliding submission window, in milliseconds.
pub const RATE_WINDOW_MS: u64 = 10_000;

/// Submissions admitted per window across the whole process.
pub const RATE_CAPACITY: usize = 5;

// ---------------------------------------------------------------------------
// Idempotency Tracking
// ---------------------------------------------------------------------------

/// How long a tracked transaction is remembered, regardless of status.
/// After this, the same (payer, payee, amount, currency) may be paid again.
pub const TRACKER_TTL_MS: u64 = 120_000;

// ---------------------------------------------------------------------------
// Retry Policy
// ---------------------------------------------------------------------------

/// Additional submission attempts after the first one.
pub const MAX_RETRIES: u32 = 3;

/// Delay before each retry, in milliseconds.
pub const RETRY_DELAY_MS: u64 = 1_000;

/// Multiplier applied to the delay after every retry. 1 keeps it constant.
pub const RETRY_BACKOFF_MULTIPLIER: u32 = 1;

/// Upper bound on any single retry delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Balance Checks
// ---------------------------------------------------------------------------

/// Estimated network cost of one settlement transaction, in lamports.
/// Signature fee for a single signer with headroom for a second.
pub const ESTIMATED_NETWORK_FEE: u64 = 5_000;

/// Native balance that must remain after a payment (rent-exempt minimum
/// for a zero-data account).
pub const NATIVE_RESERVE_FLOOR: u64 = 890_880;

/// Decimal places of the native currency (1 SOL = 10^9 lamports).
pub const NATIVE_DECIMALS: u8 = 9;

/// Decimal places assumed for fungible tokens when none are configured.
pub const DEFAULT_TOKEN_DECIMALS: u8 = 6;

// ---------------------------------------------------------------------------
// Grouped configuration
// ---------------------------------------------------------------------------

/// Protocol fee as a rational `numerator / denominator`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeConfig {
    pub numerator: u64,
    pub denominator: u64,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            numerator: FEE_NUMERATOR,
            denominator: FEE_DENOMINATOR,
        }
    }
}

/// Sliding-window submission budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub window_ms: u64,
    pub capacity: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: RATE_WINDOW_MS,
            capacity: RATE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub ttl_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            ttl_ms: TRACKER_TTL_MS,
        }
    }
}

/// Retry knobs for the submitter. See [`crate::retry::RetryPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub backoff_multiplier: u32,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            retry_delay_ms: RETRY_DELAY_MS,
            backoff_multiplier: RETRY_BACKOFF_MULTIPLIER,
            max_delay_ms: MAX_RETRY_DELAY.as_millis() as u64,
        }
    }
}

/// Headroom the balance verifier demands on top of the payment itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceConfig {
    pub estimated_network_fee: u64,
    pub native_reserve_floor: u64,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            estimated_network_fee: ESTIMATED_NETWORK_FEE,
            native_reserve_floor: NATIVE_RESERVE_FLOOR,
        }
    }
}

/// Complete configuration for a [`crate::PaymentProcessor`].
///
/// Every field has a default, so a JSON file only needs to name what it
/// changes:
///
/// ```
/// use arena_settlement::SettlementConfig;
///
/// let cfg = SettlementConfig::from_json_str(r#"{ "retry": { "max_retries": 5 } }"#).unwrap();
/// assert_eq!(cfg.retry.max_retries, 5);
/// assert_eq!(cfg.fee.denominator, 1_000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    pub fee: FeeConfig,
    pub rate_limit: RateLimitConfig,
    pub tracker: TrackerConfig,
    pub retry: RetryConfig,
    pub balance: BalanceConfig,

    /// Fungible tokens this deployment accepts. Empty means any token.
    pub supported_tokens: Vec<TokenId>,
}

impl SettlementConfig {
    /// Parses and validates a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, SettlementError> {
        let cfg: Self = serde_json::from_str(json)
            .map_err(|e| SettlementError::Config(format!("invalid config JSON: {}", e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads, parses, and validates a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SettlementError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SettlementError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&raw)
    }

    /// Rejects configurations that would make a component meaningless.
    pub fn validate(&self) -> Result<(), SettlementError> {
        if self.fee.denominator == 0 || self.fee.numerator > self.fee.denominator {
            return Err(SettlementError::InvalidFeeSchedule {
                numerator: self.fee.numerator,
                denominator: self.fee.denominator,
            });
        }
        if self.rate_limit.window_ms == 0 || self.rate_limit.capacity == 0 {
            return Err(SettlementError::Config(
                "rate limit window and capacity must be non-zero".to_string(),
            ));
        }
        if self.tracker.ttl_ms == 0 {
            return Err(SettlementError::Config(
                "tracker TTL must be non-zero".to_string(),
            ));
        }
        if self.retry.backoff_multiplier == 0 {
            return Err(SettlementError::Config(
                "retry backoff multiplier must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns `true` if payments in `token` are accepted.
    pub fn supports_token(&self, token: &TokenId) -> bool {
        token_allowed(&self.supported_tokens, token)
    }
}

/// Allow-list check shared by the config and the balance verifier. An empty
/// list accepts every token.
pub fn token_allowed(allowed: &[TokenId], token: &TokenId) -> bool {
    allowed.is_empty() || allowed.contains(token)
}
