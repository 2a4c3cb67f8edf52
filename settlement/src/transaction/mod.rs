//! # Transaction Module
//!
//! Turns a [`PaymentIntent`](crate::types::PaymentIntent) into the list of
//! ledger operations that settle it, and wraps those operations into a
//! signable [`SettlementTransaction`].
//!
//! ```text
//! builder.rs: Operation, SettlementTransaction, TransactionBuilder
//! ```
//!
//! ## Settlement shapes
//!
//! - **Direct**: one transfer for the full gross amount. Used for prize
//!   payouts and for destinations that do their own fee accounting.
//! - **Split**: one transfer of the pot share to the payee and one of the
//!   fee share to the fee destination, in the same transaction so both
//!   land or neither does.
//!
//! Token settlements prepend idempotent token-account creation for every
//! destination that receives something. Zero-amount legs are never emitted.

pub mod builder;

pub use builder::{Operation, SettlementTransaction, TransactionBuilder};
