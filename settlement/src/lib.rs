// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Arena Settlement: Payment Reliability Layer
//!
//! This crate sits between an arena application (tournament entry fees,
//! prize payouts, token transfers) and the external ledger network that
//! actually moves the money. It turns "pay X from A to B" into a ledger
//! transaction that is fee-adjusted, deduplicated, rate-limited, and
//! resilient to the network having a bad day.
//!
//! The one rule it never breaks: a user is never charged twice for the same
//! logical payment, and a payment is never silently dropped.
//!
//! ## Architecture
//!
//! Leaves first:
//!
//! - **fee**: Integer-exact protocol fee and pot/fee split.
//! - **balance**: Pre-flight sufficiency checks against the ledger.
//! - **limiter**: Sliding-window submission budget.
//! - **tracker**: Fingerprint-keyed idempotency and lifecycle tracking.
//! - **transaction**: Operation lists for direct and split settlements.
//! - **submitter**: Simulate, submit, classify, retry.
//! - **processor**: The whole pipeline, end to end.
//!
//! Supporting modules: **types** (addresses, currencies, intents),
//! **ledger** and **signer** (the external collaborators, as traits),
//! **clock**, **retry**, **error**, **config**, **logging**.
//!
//! ## Design Philosophy
//!
//! 1. All amounts are `u64` in the smallest unit. Floats stay away from money.
//! 2. Shared state (rate window, tracker map) is an explicit object handed to
//!    whoever needs it. No globals, so every test gets a clean slate.
//! 3. Retries are a policy, not a `loop` with a `catch` in it.

pub mod balance;
pub mod clock;
pub mod config;
pub mod error;
pub mod fee;
pub mod ledger;
pub mod limiter;
pub mod logging;
pub mod processor;
pub mod retry;
pub mod signer;
pub mod submitter;
pub mod tracker;
pub mod transaction;
pub mod types;

pub use config::SettlementConfig;
pub use error::{ErrorKind, SettlementError};
pub use processor::{PaymentProcessor, PaymentReceipt, SettlementMode};
pub use types::{Address, Currency, PaymentIntent, TokenId};
