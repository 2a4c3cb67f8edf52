//! # Pre-flight Balance Checks
//!
//! Before anything is built or signed, the payer's spendable balance is
//! compared against what the payment will actually cost. The check is
//! read-only and advisory: the ledger has the final word at execution time,
//! but catching a shortfall here gives the caller exact numbers instead of
//! a generic program error.
//!
//! - **Native**: `required = amount + estimated_network_fee` and
//!   `available = balance - native_reserve_floor`. The reserve keeps the
//!   payer's account rent-exempt after the payment.
//! - **Fungible token**: `required = amount` and `available` is the token
//!   account balance. A payer without a token account has `available = 0`.

use std::sync::Arc;

use tracing::debug;

use crate::config::{token_allowed, BalanceConfig};
use crate::error::SettlementError;
use crate::ledger::LedgerClient;
use crate::types::{format_units, Address, Currency, TokenId};

/// Checks payers can afford what they are about to send.
#[derive(Clone)]
pub struct BalanceVerifier {
    ledger: Arc<dyn LedgerClient>,
    config: BalanceConfig,
    supported_tokens: Vec<TokenId>,
}

impl std::fmt::Debug for BalanceVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BalanceVerifier")
            .field("config", &self.config)
            .field("supported_tokens", &self.supported_tokens)
            .finish_non_exhaustive()
    }
}

impl BalanceVerifier {
    /// A verifier that accepts every token.
    pub fn new(ledger: Arc<dyn LedgerClient>, config: BalanceConfig) -> Self {
        Self {
            ledger,
            config,
            supported_tokens: Vec::new(),
        }
    }

    /// Restricts fungible payments to `tokens`. An empty list accepts any.
    pub fn with_supported_tokens(mut self, tokens: Vec<TokenId>) -> Self {
        self.supported_tokens = tokens;
        self
    }

    pub fn config(&self) -> &BalanceConfig {
        &self.config
    }

    /// Amount the payer must be able to spend for a payment of `amount`.
    pub fn required_for(&self, amount: u64, currency: &Currency) -> Result<u64, SettlementError> {
        match currency {
            Currency::Native => amount
                .checked_add(self.config.estimated_network_fee)
                .ok_or_else(|| SettlementError::InvalidAmount {
                    reason: format!("{} plus network fee overflows", amount),
                }),
            Currency::Fungible(_) => Ok(amount),
        }
    }

    /// Succeeds when `payer` can cover `amount` of `currency`.
    ///
    /// Fails with [`SettlementError::InsufficientFunds`] carrying the exact
    /// `required` and `available` figures, or
    /// [`SettlementError::UnsupportedCurrency`] for a token this deployment
    /// does not accept.
    pub async fn check_sufficient(
        &self,
        payer: &Address,
        amount: u64,
        currency: &Currency,
    ) -> Result<(), SettlementError> {
        if let Currency::Fungible(token) = currency {
            if !token_allowed(&self.supported_tokens, token) {
                return Err(SettlementError::UnsupportedCurrency(currency.to_string()));
            }
        }

        let required = self.required_for(amount, currency)?;
        let balance = self.ledger.get_balance(payer, currency).await?;
        let available = match currency {
            Currency::Native => balance
                .unwrap_or(0)
                .saturating_sub(self.config.native_reserve_floor),
            Currency::Fungible(_) => balance.unwrap_or(0),
        };

        let decimals = currency.default_decimals();
        debug!(
            payer = %payer,
            %currency,
            required,
            available,
            required_units = %format_units(required, decimals),
            available_units = %format_units(available, decimals),
            "balance check"
        );

        if available < required {
            return Err(SettlementError::InsufficientFunds {
                currency: currency.clone(),
                required,
                available,
            });
        }
        Ok(())
    }
}
