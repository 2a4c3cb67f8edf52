//! Core value types: who pays, who gets paid, how much, in what.
//!
//! These are the vocabulary of every settlement. They are small, immutable
//! once built, and carry no ledger-specific machinery, so that fee math and
//! idempotency logic can be tested without a network anywhere in sight.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::SettlementError;

// ---------------------------------------------------------------------------
// Address / TokenId
// ---------------------------------------------------------------------------

/// A ledger account identity (base58 public key on the arena's network).
///
/// Opaque to this crate. Validation of the encoding is the ledger's job; we
/// only need equality, hashing, and a stable byte representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a fungible token (its mint address).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(String);

impl TokenId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Currency
// ---------------------------------------------------------------------------

/// What a payment is denominated in.
///
/// Every component that cares about the difference (fee splitting, balance
/// checks, operation building) matches on this exhaustively. Adding a third
/// kind is meant to break the build in all the right places.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    /// The network's native coin (smallest unit: lamport, 10^-9).
    Native,
    /// A fungible token identified by its mint.
    Fungible(TokenId),
}

impl Currency {
    /// Convenience constructor for a fungible token.
    pub fn token(mint: impl Into<String>) -> Self {
        Self::Fungible(TokenId::new(mint))
    }

    pub fn is_native(&self) -> bool {
        matches!(self, Self::Native)
    }

    /// Display precision. Token mints carry their own decimals on-chain;
    /// without that lookup the common 6 is assumed.
    pub fn default_decimals(&self) -> u8 {
        match self {
            Self::Native => crate::config::NATIVE_DECIMALS,
            Self::Fungible(_) => crate::config::DEFAULT_TOKEN_DECIMALS,
        }
    }

    /// Returns the token mint for fungible currencies.
    pub fn token_id(&self) -> Option<&TokenId> {
        match self {
            Self::Native => None,
            Self::Fungible(id) => Some(id),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => write!(f, "native"),
            Self::Fungible(id) => write!(f, "token:{}", id),
        }
    }
}

impl FromStr for Currency {
    type Err = SettlementError;

    /// Accepts `native` (or `sol`) and `token:<mint>`. Anything else is an
    /// [`SettlementError::UnsupportedCurrency`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("native") || trimmed.eq_ignore_ascii_case("sol") {
            return Ok(Self::Native);
        }
        match trimmed.strip_prefix("token:") {
            Some(mint) if !mint.is_empty() => Ok(Self::token(mint)),
            _ => Err(SettlementError::UnsupportedCurrency(trimmed.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Amount parsing
// ---------------------------------------------------------------------------

/// Converts a user-entered decimal string into smallest units, exactly.
///
/// `parse_units("0.05", 9)` is `50_000_000`. No floating point is involved,
/// so `"0.1"` is always exactly `100_000_000` lamports and never
/// `99_999_999`.
///
/// Fails with [`SettlementError::InvalidAmount`] for negative values,
/// malformed input, more fractional digits than `decimals`, or values that
/// do not fit in a `u64`.
pub fn parse_units(input: &str, decimals: u8) -> Result<u64, SettlementError> {
    let s = input.trim();
    let invalid = |reason: String| SettlementError::InvalidAmount { reason };

    if s.starts_with('-') {
        return Err(invalid(format!("negative amount: {}", s)));
    }

    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };

    if whole.is_empty() && frac.is_empty() {
        return Err(invalid(format!("not a number: {:?}", input)));
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid(format!("not a number: {:?}", input)));
    }
    if frac.len() > decimals as usize {
        return Err(invalid(format!(
            "{} has more than {} decimal places",
            s, decimals
        )));
    }

    let overflow = || invalid(format!("{} does not fit in 64 bits", s));
    let scale = 10u64.checked_pow(decimals as u32).ok_or_else(overflow)?;

    let whole_units = if whole.is_empty() {
        0
    } else {
        whole.parse::<u64>().map_err(|_| overflow())?
    };

    let frac_units = if frac.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", frac, width = decimals as usize);
        padded.parse::<u64>().map_err(|_| overflow())?
    };

    whole_units
        .checked_mul(scale)
        .and_then(|v| v.checked_add(frac_units))
        .ok_or_else(overflow)
}

/// Formats smallest units as a decimal string, the inverse of
/// [`parse_units`]. `format_units(150_000_000, 9)` is `"0.150000000"`.
pub fn format_units(value: u64, decimals: u8) -> String {
    if decimals == 0 {
        return value.to_string();
    }
    let Some(divisor) = 10u64.checked_pow(decimals as u32) else {
        // Any u64 is below 10^20, so the whole part is zero.
        return format!("0.{:0>width$}", value, width = decimals as usize);
    };
    format!(
        "{}.{:0>width$}",
        value / divisor,
        value % divisor,
        width = decimals as usize
    )
}

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// Deterministic identity of a logical payment.
///
/// Derived only from (payer, payee, amount, currency), so a retry of the
/// same intent collides with the original. That collision is the whole
/// point: it is how duplicates are recognized.
///
/// Encoded as `hex(sha256(canonical_bytes))` so map keys have a fixed size
/// no matter how long the addresses are.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Fingerprint {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ---------------------------------------------------------------------------
// PaymentIntent
// ---------------------------------------------------------------------------

/// A request to move `amount` smallest units of `currency` from `payer` to
/// `payee`.
///
/// Immutable after construction. Zero-amount intents are rejected up front;
/// there is nothing to settle and nothing to charge a fee on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    payer: Address,
    payee: Address,
    amount: u64,
    currency: Currency,
}

impl PaymentIntent {
    pub fn new(
        payer: Address,
        payee: Address,
        amount: u64,
        currency: Currency,
    ) -> Result<Self, SettlementError> {
        if amount == 0 {
            return Err(SettlementError::InvalidAmount {
                reason: "payment amount must be greater than zero".to_string(),
            });
        }
        Ok(Self {
            payer,
            payee,
            amount,
            currency,
        })
    }

    pub fn payer(&self) -> &Address {
        &self.payer
    }

    pub fn payee(&self) -> &Address {
        &self.payee
    }

    /// Gross amount in smallest units.
    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    /// Canonical bytes for fingerprinting: null-separated strings and a
    /// little-endian amount, so no two distinct intents share an encoding.
    fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);
        buf.extend_from_slice(self.payer.as_str().as_bytes());
        buf.push(0x00);
        buf.extend_from_slice(self.payee.as_str().as_bytes());
        buf.push(0x00);
        buf.extend_from_slice(&self.amount.to_le_bytes());
        buf.extend_from_slice(self.currency.to_string().as_bytes());
        buf.push(0x00);
        buf
    }

    /// Returns the idempotency fingerprint of this intent.
    pub fn fingerprint(&self) -> Fingerprint {
        let digest = Sha256::digest(self.canonical_bytes());
        Fingerprint(hex::encode(digest))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(amount: u64, currency: Currency) -> PaymentIntent {
        PaymentIntent::new(Address::new("alice"), Address::new("pot"), amount, currency).unwrap()
    }

    #[test]
    fn currency_display_and_parse() {
        assert_eq!(Currency::Native.to_string(), "native");
        assert_eq!(Currency::token("RPS").to_string(), "token:RPS");

        assert_eq!("SOL".parse::<Currency>().unwrap(), Currency::Native);
        assert_eq!("native".parse::<Currency>().unwrap(), Currency::Native);
        assert_eq!(
            "token:RPS".parse::<Currency>().unwrap(),
            Currency::token("RPS")
        );
    }

    #[test]
    fn unknown_currency_is_unsupported() {
        let err = "DOGE".parse::<Currency>().unwrap_err();
        assert!(matches!(err, SettlementError::UnsupportedCurrency(ref c) if c == "DOGE"));
        assert!("token:".parse::<Currency>().is_err());
    }

    #[test]
    fn zero_amount_intent_rejected() {
        let err = PaymentIntent::new(Address::new("a"), Address::new("b"), 0, Currency::Native)
            .unwrap_err();
        assert!(matches!(err, SettlementError::InvalidAmount { .. }));
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let a = intent(1_000, Currency::Native);
        let b = intent(1_000, Currency::Native);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().as_str().len(), 64);
    }

    #[test]
    fn fingerprint_distinguishes_every_field() {
        let base = intent(1_000, Currency::Native).fingerprint();
        assert_ne!(base, intent(1_001, Currency::Native).fingerprint());
        assert_ne!(base, intent(1_000, Currency::token("RPS")).fingerprint());

        let other_payee =
            PaymentIntent::new(Address::new("alice"), Address::new("pot2"), 1_000, Currency::Native)
                .unwrap();
        assert_ne!(base, other_payee.fingerprint());
    }

    #[test]
    fn fingerprint_separators_prevent_concatenation_collisions() {
        let a = PaymentIntent::new(Address::new("ab"), Address::new("c"), 5, Currency::Native)
            .unwrap();
        let b = PaymentIntent::new(Address::new("a"), Address::new("bc"), 5, Currency::Native)
            .unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn parse_units_is_exact() {
        assert_eq!(parse_units("0.1", 9).unwrap(), 100_000_000);
        assert_eq!(parse_units("1", 9).unwrap(), 1_000_000_000);
        assert_eq!(parse_units("0.000000001", 9).unwrap(), 1);
        assert_eq!(parse_units(".5", 2).unwrap(), 50);
        assert_eq!(parse_units("12.", 2).unwrap(), 1_200);
        assert_eq!(parse_units(" 3.25 ", 6).unwrap(), 3_250_000);
    }

    #[test]
    fn parse_units_rejects_bad_input() {
        for bad in ["-1", "-0.5", "abc", "", ".", "1.2.3", "1e9", "0.0000000001"] {
            let err = parse_units(bad, 9).unwrap_err();
            assert!(
                matches!(err, SettlementError::InvalidAmount { .. }),
                "{:?} should be InvalidAmount",
                bad
            );
        }
    }

    #[test]
    fn parse_units_rejects_overflow() {
        let err = parse_units("18446744073709551616", 0).unwrap_err();
        assert!(matches!(err, SettlementError::InvalidAmount { .. }));
        assert!(parse_units("18446744074", 9).is_err());
    }

    #[test]
    fn format_units_matches_parse() {
        assert_eq!(format_units(150_000_000, 9), "0.150000000");
        assert_eq!(format_units(1_050, 2), "10.50");
        assert_eq!(format_units(7, 0), "7");
        assert_eq!(parse_units(&format_units(123_456_789, 6), 6).unwrap(), 123_456_789);
    }

    #[test]
    fn intent_serde_roundtrip() {
        let i = intent(42, Currency::token("RPS"));
        let json = serde_json::to_string(&i).unwrap();
        let recovered: PaymentIntent = serde_json::from_str(&json).unwrap();
        assert_eq!(i, recovered);
    }
}
