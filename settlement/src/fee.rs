//! # Protocol Fee Arithmetic
//!
//! The arena takes a fixed fraction of every entry fee. This module computes
//! that fraction and the remainder that goes to the pot, using nothing but
//! integer math.
//!
//! The two parts always sum to the gross amount. The fee rounds down, so any
//! fractional unit stays in the pot rather than vanishing.

use serde::{Deserialize, Serialize};

use crate::config::FeeConfig;
use crate::error::SettlementError;

/// Division of a gross payment into the destination's share and the fee.
///
/// Derived from a gross amount by [`FeeSchedule::split_for_settlement`];
/// never constructed independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    /// Amount credited to the payee (the pot).
    pub pot_amount: u64,
    /// Amount retained as protocol fee.
    pub fee_amount: u64,
}

impl FeeSplit {
    /// The amount this split was derived from.
    pub fn gross(&self) -> u64 {
        // Cannot overflow: both parts came out of a single u64.
        self.pot_amount + self.fee_amount
    }
}

/// A validated fee rate `numerator / denominator`, with `numerator <=
/// denominator` and `denominator > 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSchedule {
    numerator: u64,
    denominator: u64,
}

impl FeeSchedule {
    pub fn new(numerator: u64, denominator: u64) -> Result<Self, SettlementError> {
        if denominator == 0 || numerator > denominator {
            return Err(SettlementError::InvalidFeeSchedule {
                numerator,
                denominator,
            });
        }
        Ok(Self {
            numerator,
            denominator,
        })
    }

    pub fn from_config(cfg: &FeeConfig) -> Result<Self, SettlementError> {
        Self::new(cfg.numerator, cfg.denominator)
    }

    pub fn numerator(&self) -> u64 {
        self.numerator
    }

    pub fn denominator(&self) -> u64 {
        self.denominator
    }

    /// `floor(gross * numerator / denominator)`.
    ///
    /// The product is taken in `u128`, so every `u64` input is exact.
    /// Because `numerator <= denominator`, the result always fits back in a
    /// `u64` and never exceeds `gross`.
    pub fn compute_fee(&self, gross: u64) -> u64 {
        let fee = (gross as u128 * self.numerator as u128) / self.denominator as u128;
        fee as u64
    }

    /// Splits `gross` into pot and fee such that `pot + fee == gross`.
    pub fn split_for_settlement(&self, gross: u64) -> FeeSplit {
        let fee_amount = self.compute_fee(gross);
        FeeSplit {
            pot_amount: gross - fee_amount,
            fee_amount,
        }
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            numerator: crate::config::FEE_NUMERATOR,
            denominator: crate::config::FEE_DENOMINATOR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_percent_of_a_million() {
        let fees = FeeSchedule::new(10, 1_000).unwrap();
        let split = fees.split_for_settlement(1_000_000);
        assert_eq!(split.fee_amount, 10_000);
        assert_eq!(split.pot_amount, 990_000);
    }

    #[test]
    fn fee_rounds_down_and_remainder_stays_in_pot() {
        let fees = FeeSchedule::default();
        // 1% of 199 is 1.99 -> 1.
        let split = fees.split_for_settlement(199);
        assert_eq!(split.fee_amount, 1);
        assert_eq!(split.pot_amount, 198);
        // Below 100 units there is no fee at all.
        assert_eq!(fees.compute_fee(99), 0);
    }

    #[test]
    fn parts_always_sum_to_gross() {
        let schedules = [(10, 1_000), (1, 3), (7, 9), (0, 1), (1, 1), (333, 1_000)];
        let amounts = [0, 1, 2, 99, 100, 101, 12_345, 999_999_999, u64::MAX - 1, u64::MAX];

        for (num, den) in schedules {
            let fees = FeeSchedule::new(num, den).unwrap();
            for g in amounts {
                let split = fees.split_for_settlement(g);
                assert_eq!(split.gross(), g, "{}/{} of {}", num, den, g);
                let expected = (g as u128 * num as u128 / den as u128) as u64;
                assert_eq!(split.fee_amount, expected);
            }
        }
    }

    #[test]
    fn repeated_calls_agree() {
        let fees = FeeSchedule::new(10, 1_000).unwrap();
        let first = fees.compute_fee(123_456_789);
        for _ in 0..100 {
            assert_eq!(fees.compute_fee(123_456_789), first);
        }
    }

    #[test]
    fn max_amount_does_not_overflow() {
        let fees = FeeSchedule::new(1, 1).unwrap();
        assert_eq!(fees.compute_fee(u64::MAX), u64::MAX);
        assert_eq!(fees.split_for_settlement(u64::MAX).pot_amount, 0);
    }

    #[test]
    fn invalid_schedules_rejected() {
        assert!(matches!(
            FeeSchedule::new(1, 0),
            Err(SettlementError::InvalidFeeSchedule { .. })
        ));
        assert!(matches!(
            FeeSchedule::new(11, 10),
            Err(SettlementError::InvalidFeeSchedule { .. })
        ));
    }

    #[test]
    fn from_config_uses_configured_rate() {
        let cfg = FeeConfig {
            numerator: 25,
            denominator: 1_000,
        };
        let fees = FeeSchedule::from_config(&cfg).unwrap();
        assert_eq!(fees.compute_fee(1_000), 25);
    }
}
