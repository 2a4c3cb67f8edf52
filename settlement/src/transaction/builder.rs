//! Operation lists for direct and split settlements.
//!
//! The builder is pure: it never talks to the ledger. Whether a token
//! account already exists does not matter, because the creation operation
//! it emits is idempotent on the ledger side.

use serde::{Deserialize, Serialize};

use crate::fee::FeeSchedule;
use crate::ledger::SequencingToken;
use crate::types::{Address, Currency, PaymentIntent, TokenId};

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// A single value-moving instruction inside a settlement transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Create `owner`'s account for `token` if it does not exist yet, paid
    /// for by `funder`. A no-op on the ledger when the account exists.
    CreateTokenAccount {
        funder: Address,
        owner: Address,
        token: TokenId,
    },
    /// Move `amount` smallest units of `currency` from `from` to `to`.
    Transfer {
        from: Address,
        to: Address,
        amount: u64,
        currency: Currency,
    },
}

impl Operation {
    /// Transferred amount, or `None` for non-transfer operations.
    pub fn transfer_amount(&self) -> Option<u64> {
        match self {
            Self::Transfer { amount, .. } => Some(*amount),
            Self::CreateTokenAccount { .. } => None,
        }
    }

    fn write_canonical(&self, buf: &mut Vec<u8>) {
        match self {
            Self::CreateTokenAccount {
                funder,
                owner,
                token,
            } => {
                buf.push(0x01);
                for part in [funder.as_str(), owner.as_str(), token.as_str()] {
                    buf.extend_from_slice(part.as_bytes());
                    buf.push(0x00);
                }
            }
            Self::Transfer {
                from,
                to,
                amount,
                currency,
            } => {
                buf.push(0x02);
                buf.extend_from_slice(from.as_str().as_bytes());
                buf.push(0x00);
                buf.extend_from_slice(to.as_str().as_bytes());
                buf.push(0x00);
                buf.extend_from_slice(&amount.to_le_bytes());
                buf.extend_from_slice(currency.to_string().as_bytes());
                buf.push(0x00);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// SettlementTransaction
// ---------------------------------------------------------------------------

/// An atomic batch of operations submitted to the ledger as one unit.
///
/// The signature covers [`signable_bytes`](Self::signable_bytes), which
/// includes the sequencing token. Refreshing the token therefore
/// invalidates the signature, and
/// [`set_sequencing_token`](Self::set_sequencing_token) clears it to make
/// that explicit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementTransaction {
    /// Account that pays the network fee and signs.
    pub fee_payer: Address,

    pub operations: Vec<Operation>,

    /// Recent-block reference that makes the transaction valid and
    /// non-replayable. `None` until fetched from the ledger.
    pub sequencing_token: Option<SequencingToken>,

    /// Base58 Ed25519 signature of the fee payer. Doubles as the ledger's
    /// transaction identifier once submitted.
    pub signature: Option<String>,
}

impl SettlementTransaction {
    pub fn new(fee_payer: Address, operations: Vec<Operation>) -> Self {
        Self {
            fee_payer,
            operations,
            sequencing_token: None,
            signature: None,
        }
    }

    /// Canonical bytes covered by the fee payer's signature.
    ///
    /// Null-separated strings and little-endian integers. JSON is avoided
    /// because its field order is not a contract.
    pub fn signable_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64 + self.operations.len() * 96);

        buf.extend_from_slice(self.fee_payer.as_str().as_bytes());
        buf.push(0x00);

        match &self.sequencing_token {
            Some(token) => {
                buf.push(0x01);
                buf.extend_from_slice(token.as_str().as_bytes());
                buf.push(0x00);
            }
            None => buf.push(0x00),
        }

        buf.extend_from_slice(&(self.operations.len() as u32).to_le_bytes());
        for op in &self.operations {
            op.write_canonical(&mut buf);
        }
        buf
    }

    /// Installs a fresh sequencing token and drops the now-stale signature.
    pub fn set_sequencing_token(&mut self, token: SequencingToken) {
        self.sequencing_token = Some(token);
        self.signature = None;
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// Sum of every transfer in the transaction.
    pub fn transfer_total(&self) -> u128 {
        self.operations
            .iter()
            .filter_map(Operation::transfer_amount)
            .map(u128::from)
            .sum()
    }

    /// Number of transfer operations.
    pub fn transfer_count(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Transfer { .. }))
            .count()
    }
}

// ---------------------------------------------------------------------------
// TransactionBuilder
// ---------------------------------------------------------------------------

/// Builds operation lists for a [`PaymentIntent`].
///
/// ```
/// use arena_settlement::fee::FeeSchedule;
/// use arena_settlement::transaction::TransactionBuilder;
/// use arena_settlement::{Address, Currency, PaymentIntent};
///
/// let builder = TransactionBuilder::new(FeeSchedule::new(10, 1_000).unwrap());
/// let intent = PaymentIntent::new(
///     Address::new("player"),
///     Address::new("game-pot"),
///     1_000_000,
///     Currency::Native,
/// )
/// .unwrap();
///
/// let ops = builder.build_split_transfer(&intent, &Address::new("fee-vault"));
/// assert_eq!(ops.len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct TransactionBuilder {
    fees: FeeSchedule,
}

impl TransactionBuilder {
    pub fn new(fees: FeeSchedule) -> Self {
        Self { fees }
    }

    pub fn fee_schedule(&self) -> &FeeSchedule {
        &self.fees
    }

    /// One transfer of the full gross amount from payer to payee.
    pub fn build_direct_transfer(&self, intent: &PaymentIntent) -> Vec<Operation> {
        let legs = [(intent.payee().clone(), intent.amount())];
        Self::emit(intent, &legs)
    }

    /// Pot share to the payee, fee share to `fee_destination`.
    ///
    /// The emitted transfer amounts always sum to the gross amount.
    pub fn build_split_transfer(
        &self,
        intent: &PaymentIntent,
        fee_destination: &Address,
    ) -> Vec<Operation> {
        let split = self.fees.split_for_settlement(intent.amount());
        let legs = [
            (intent.payee().clone(), split.pot_amount),
            (fee_destination.clone(), split.fee_amount),
        ];
        Self::emit(intent, &legs)
    }

    /// Drops zero legs, prepends token-account creation for token
    /// currencies, then appends the transfers in leg order.
    fn emit(intent: &PaymentIntent, legs: &[(Address, u64)]) -> Vec<Operation> {
        let live: Vec<&(Address, u64)> = legs.iter().filter(|(_, amount)| *amount > 0).collect();
        let mut ops = Vec::with_capacity(live.len() * 2);

        match intent.currency() {
            Currency::Native => {}
            Currency::Fungible(token) => {
                let mut owners: Vec<&Address> = Vec::with_capacity(live.len());
                for (owner, _) in &live {
                    if !owners.contains(&owner) {
                        owners.push(owner);
                    }
                }
                for owner in owners {
                    ops.push(Operation::CreateTokenAccount {
                        funder: intent.payer().clone(),
                        owner: owner.clone(),
                        token: token.clone(),
                    });
                }
            }
        }

        for (to, amount) in live {
            ops.push(Operation::Transfer {
                from: intent.payer().clone(),
                to: to.clone(),
                amount: *amount,
                currency: intent.currency().clone(),
            });
        }
        ops
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> TransactionBuilder {
        TransactionBuilder::new(FeeSchedule::new(10, 1_000).unwrap())
    }

    fn intent(amount: u64, currency: Currency) -> PaymentIntent {
        PaymentIntent::new(Address::new("player"), Address::new("pot"), amount, currency).unwrap()
    }

    fn transfer_sum(ops: &[Operation]) -> u64 {
        ops.iter().filter_map(Operation::transfer_amount).sum()
    }

    #[test]
    fn direct_native_is_single_transfer() {
        let ops = builder().build_direct_transfer(&intent(5_000, Currency::Native));
        assert_eq!(
            ops,
            vec![Operation::Transfer {
                from: Address::new("player"),
                to: Address::new("pot"),
                amount: 5_000,
                currency: Currency::Native,
            }]
        );
    }

    #[test]
    fn split_native_has_pot_and_fee_legs() {
        let ops = builder().build_split_transfer(
            &intent(1_000_000, Currency::Native),
            &Address::new("fees"),
        );
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].transfer_amount(), Some(990_000));
        assert_eq!(ops[1].transfer_amount(), Some(10_000));
        match &ops[1] {
            Operation::Transfer { to, .. } => assert_eq!(to, &Address::new("fees")),
            other => panic!("unexpected op {:?}", other),
        }
    }

    #[test]
    fn split_sum_equals_gross_and_no_zero_legs() {
        let b = builder();
        for gross in [1, 50, 99, 100, 101, 999, 1_000, 123_457, 10_000_000_007] {
            for currency in [Currency::Native, Currency::token("RPS")] {
                let ops = b.build_split_transfer(&intent(gross, currency), &Address::new("fees"));
                assert_eq!(transfer_sum(&ops), gross);
                assert!(ops
                    .iter()
                    .filter_map(Operation::transfer_amount)
                    .all(|a| a > 0));
            }
        }
    }

    #[test]
    fn fee_leg_omitted_when_fee_rounds_to_zero() {
        let ops = builder().build_split_transfer(&intent(99, Currency::Native), &Address::new("fees"));
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].transfer_amount(), Some(99));
    }

    #[test]
    fn pot_leg_omitted_when_fee_takes_everything() {
        let b = TransactionBuilder::new(FeeSchedule::new(1, 1).unwrap());
        let ops = b.build_split_transfer(&intent(500, Currency::Native), &Address::new("fees"));
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            Operation::Transfer { to, amount, .. } => {
                assert_eq!(to, &Address::new("fees"));
                assert_eq!(*amount, 500);
            }
            other => panic!("unexpected op {:?}", other),
        }
    }

    #[test]
    fn token_split_prepends_account_creation() {
        let ops = builder().build_split_transfer(
            &intent(1_000_000, Currency::token("RPS")),
            &Address::new("fees"),
        );
        assert_eq!(ops.len(), 4);
        assert!(matches!(
            &ops[0],
            Operation::CreateTokenAccount { owner, .. } if owner == &Address::new("pot")
        ));
        assert!(matches!(
            &ops[1],
            Operation::CreateTokenAccount { owner, .. } if owner == &Address::new("fees")
        ));
        assert!(matches!(ops[2], Operation::Transfer { .. }));
        assert!(matches!(ops[3], Operation::Transfer { .. }));
    }

    #[test]
    fn token_account_creation_skipped_for_zero_legs() {
        let ops = builder().build_split_transfer(&intent(10, Currency::token("RPS")), &Address::new("fees"));
        let creations = ops
            .iter()
            .filter(|op| matches!(op, Operation::CreateTokenAccount { .. }))
            .count();
        assert_eq!(creations, 1);
    }

    #[test]
    fn token_account_creation_deduplicated() {
        let ops = builder().build_split_transfer(
            &intent(1_000_000, Currency::token("RPS")),
            &Address::new("pot"),
        );
        let creations = ops
            .iter()
            .filter(|op| matches!(op, Operation::CreateTokenAccount { .. }))
            .count();
        assert_eq!(creations, 1);
        assert_eq!(transfer_sum(&ops), 1_000_000);
    }

    #[test]
    fn direct_token_transfer_ensures_destination_account() {
        let ops = builder().build_direct_transfer(&intent(42, Currency::token("RPS")));
        assert_eq!(ops.len(), 2);
        assert!(matches!(ops[0], Operation::CreateTokenAccount { .. }));
    }

    #[test]
    fn sequencing_token_change_clears_signature_and_bytes() {
        let ops = builder().build_direct_transfer(&intent(42, Currency::Native));
        let mut tx = SettlementTransaction::new(Address::new("player"), ops);
        tx.set_sequencing_token(SequencingToken::new("hash-1"));
        let bytes_1 = tx.signable_bytes();
        tx.signature = Some("sig".into());

        tx.set_sequencing_token(SequencingToken::new("hash-2"));
        assert!(!tx.is_signed());
        assert_ne!(bytes_1, tx.signable_bytes());
    }

    #[test]
    fn signature_not_part_of_signable_bytes() {
        let ops = builder().build_direct_transfer(&intent(42, Currency::Native));
        let mut tx = SettlementTransaction::new(Address::new("player"), ops);
        let before = tx.signable_bytes();
        tx.signature = Some("sig".into());
        assert_eq!(before, tx.signable_bytes());
    }

    #[test]
    fn transfer_total_and_count() {
        let ops = builder().build_split_transfer(
            &intent(1_000_000, Currency::token("RPS")),
            &Address::new("fees"),
        );
        let tx = SettlementTransaction::new(Address::new("player"), ops);
        assert_eq!(tx.transfer_total(), 1_000_000);
        assert_eq!(tx.transfer_count(), 2);
    }
}
