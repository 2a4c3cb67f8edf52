//! A scriptable in-process ledger.
//!
//! Keeps native and token balances in memory, executes operations
//! atomically, checks fee-payer signatures and sequencing tokens, and can be
//! told to fail in specific ways. Good enough to run the full settlement
//! pipeline on a laptop or in CI without a validator.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{LedgerClient, LedgerError, SequencingToken, SimulationReport};
use crate::signer::verify_fee_payer_signature;
use crate::transaction::{Operation, SettlementTransaction};
use crate::types::{Address, Currency, TokenId};

/// Network fee charged to the fee payer per confirmed transaction.
pub const DEFAULT_TRANSACTION_FEE: u64 = 5_000;

#[derive(Debug, Clone, Default)]
struct Balances {
    native: HashMap<Address, u64>,
    tokens: HashMap<(Address, TokenId), u64>,
}

impl Balances {
    fn debit_native(&mut self, owner: &Address, amount: u64) -> Result<(), String> {
        let balance = self.native.entry(owner.clone()).or_insert(0);
        let current = *balance;
        *balance = current.checked_sub(amount).ok_or_else(|| {
            format!(
                "insufficient lamports: {} has {}, needs {}",
                owner, current, amount
            )
        })?;
        Ok(())
    }

    fn credit_native(&mut self, owner: &Address, amount: u64) -> Result<(), String> {
        let balance = self.native.entry(owner.clone()).or_insert(0);
        let current = *balance;
        *balance = current
            .checked_add(amount)
            .ok_or_else(|| format!("native balance overflow for {}", owner))?;
        Ok(())
    }

    fn apply(&mut self, op: &Operation) -> Result<(), String> {
        match op {
            Operation::CreateTokenAccount { owner, token, .. } => {
                self.tokens.entry((owner.clone(), token.clone())).or_insert(0);
                Ok(())
            }
            Operation::Transfer {
                from,
                to,
                amount,
                currency,
            } => match currency {
                Currency::Native => {
                    self.debit_native(from, *amount)?;
                    self.credit_native(to, *amount)
                }
                Currency::Fungible(token) => {
                    let to_key = (to.clone(), token.clone());
                    if !self.tokens.contains_key(&to_key) {
                        return Err(format!("token account for {} ({}) not initialized", to, token));
                    }
                    let from_balance = self
                        .tokens
                        .get_mut(&(from.clone(), token.clone()))
                        .ok_or_else(|| format!("token account for {} ({}) not initialized", from, token))?;
                    let available = *from_balance;
                    *from_balance = available.checked_sub(*amount).ok_or_else(|| {
                        format!("insufficient funds: {} holds {} {}", from, available, token)
                    })?;
                    let to_balance = self.tokens.entry(to_key).or_insert(0);
                    let current = *to_balance;
                    *to_balance = current
                        .checked_add(*amount)
                        .ok_or_else(|| format!("token balance overflow for {}", to))?;
                    Ok(())
                }
            },
        }
    }
}

#[derive(Debug, Default)]
struct State {
    balances: Balances,
    token_seq: u64,
    submit_failures: VecDeque<LedgerError>,
    persistent_submit_failure: Option<LedgerError>,
    simulate_failures: VecDeque<LedgerError>,
    simulation_error: Option<(String, Vec<String>)>,
    submit_calls: u32,
    simulate_calls: u32,
    token_requests: u32,
    confirmed: Vec<SettlementTransaction>,
}

impl State {
    fn current_token(&self) -> SequencingToken {
        SequencingToken::new(format!("block-{:08}", self.token_seq))
    }

    /// Applies `tx` to a copy of the balances.
    fn execute(&self, tx: &SettlementTransaction, fee: u64) -> Result<Balances, String> {
        let mut next = self.balances.clone();
        next.debit_native(&tx.fee_payer, fee)?;
        for (index, op) in tx.operations.iter().enumerate() {
            next.apply(op)
                .map_err(|e| format!("operation {} failed: {}", index, e))?;
        }
        Ok(next)
    }
}

/// In-memory [`LedgerClient`].
///
/// ```
/// use arena_settlement::ledger::{InMemoryLedger, LedgerClient};
/// use arena_settlement::{Address, Currency};
///
/// # tokio_test_block_on(async {
/// let ledger = InMemoryLedger::new();
/// ledger.set_native_balance(&Address::new("alice"), 2_000_000_000);
/// let bal = ledger.get_balance(&Address::new("alice"), &Currency::Native).await.unwrap();
/// assert_eq!(bal, Some(2_000_000_000));
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Debug)]
pub struct InMemoryLedger {
    state: Mutex<State>,
    transaction_fee: u64,
    latency: Mutex<Option<Duration>>,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::with_transaction_fee(DEFAULT_TRANSACTION_FEE)
    }

    pub fn with_transaction_fee(transaction_fee: u64) -> Self {
        Self {
            state: Mutex::new(State::default()),
            transaction_fee,
            latency: Mutex::new(None),
        }
    }

    // -- seeding ------------------------------------------------------------

    pub fn set_native_balance(&self, owner: &Address, lamports: u64) {
        self.state
            .lock()
            .balances
            .native
            .insert(owner.clone(), lamports);
    }

    /// Creates (or overwrites) `owner`'s account for `token`.
    pub fn set_token_balance(&self, owner: &Address, token: &TokenId, amount: u64) {
        self.state
            .lock()
            .balances
            .tokens
            .insert((owner.clone(), token.clone()), amount);
    }

    // -- scripting ----------------------------------------------------------

    /// The next submission fails with `err` instead of executing.
    pub fn push_submit_failure(&self, err: LedgerError) {
        self.state.lock().submit_failures.push_back(err);
    }

    /// Every submission fails with `err` until cleared with `None`.
    pub fn set_persistent_submit_failure(&self, err: Option<LedgerError>) {
        self.state.lock().persistent_submit_failure = err;
    }

    /// The next simulation call fails at the transport level with `err`.
    pub fn push_simulate_failure(&self, err: LedgerError) {
        self.state.lock().simulate_failures.push_back(err);
    }

    /// Every simulation reports `message` as a program error.
    pub fn set_simulation_error(&self, message: impl Into<String>, logs: Vec<String>) {
        self.state.lock().simulation_error = Some((message.into(), logs));
    }

    /// Advances the chain so every previously issued sequencing token expires.
    pub fn expire_sequencing_tokens(&self) {
        self.state.lock().token_seq += 1;
    }

    /// Simulated round-trip time for every call.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    // -- inspection ---------------------------------------------------------

    pub fn native_balance(&self, owner: &Address) -> u64 {
        self.state
            .lock()
            .balances
            .native
            .get(owner)
            .copied()
            .unwrap_or(0)
    }

    pub fn token_balance(&self, owner: &Address, token: &TokenId) -> Option<u64> {
        self.state
            .lock()
            .balances
            .tokens
            .get(&(owner.clone(), token.clone()))
            .copied()
    }

    pub fn submit_calls(&self) -> u32 {
        self.state.lock().submit_calls
    }

    pub fn simulate_calls(&self) -> u32 {
        self.state.lock().simulate_calls
    }

    pub fn token_requests(&self) -> u32 {
        self.state.lock().token_requests
    }

    /// Transactions that were executed and confirmed, in order.
    pub fn confirmed(&self) -> Vec<SettlementTransaction> {
        self.state.lock().confirmed.clone()
    }

    async fn round_trip(&self) {
        let latency = *self.latency.lock();
        match latency {
            Some(d) => tokio::time::sleep(d).await,
            None => tokio::task::yield_now().await,
        }
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn get_balance(
        &self,
        owner: &Address,
        currency: &Currency,
    ) -> Result<Option<u64>, LedgerError> {
        self.round_trip().await;
        let state = self.state.lock();
        Ok(match currency {
            Currency::Native => Some(state.balances.native.get(owner).copied().unwrap_or(0)),
            Currency::Fungible(token) => state
                .balances
                .tokens
                .get(&(owner.clone(), token.clone()))
                .copied(),
        })
    }

    async fn latest_sequencing_token(&self) -> Result<SequencingToken, LedgerError> {
        self.round_trip().await;
        let mut state = self.state.lock();
        state.token_requests += 1;
        Ok(state.current_token())
    }

    async fn simulate(&self, tx: &SettlementTransaction) -> Result<SimulationReport, LedgerError> {
        self.round_trip().await;
        let mut state = self.state.lock();
        state.simulate_calls += 1;

        if let Some(err) = state.simulate_failures.pop_front() {
            return Err(err);
        }
        if let Some((message, logs)) = state.simulation_error.clone() {
            return Ok(SimulationReport::failed(message, logs));
        }

        let mut logs = vec![format!("simulating {} operations", tx.operations.len())];
        match state.execute(tx, self.transaction_fee) {
            Ok(_) => {
                logs.push("simulation succeeded".to_string());
                Ok(SimulationReport {
                    error: None,
                    logs,
                    units_consumed: Some(150 * tx.operations.len() as u64),
                })
            }
            Err(message) => {
                logs.push(format!("simulation failed: {}", message));
                Ok(SimulationReport::failed(message, logs))
            }
        }
    }

    async fn submit_and_confirm(&self, tx: &SettlementTransaction) -> Result<String, LedgerError> {
        self.round_trip().await;
        let mut state = self.state.lock();
        state.submit_calls += 1;

        if let Some(err) = state.submit_failures.pop_front() {
            return Err(err);
        }
        if let Some(err) = state.persistent_submit_failure.clone() {
            return Err(err);
        }

        if tx.sequencing_token.as_ref() != Some(&state.current_token()) {
            return Err(LedgerError::SequencingTokenExpired);
        }
        let signature = match &tx.signature {
            Some(sig) if verify_fee_payer_signature(tx) => sig.clone(),
            _ => return Err(LedgerError::InvalidSignature),
        };

        let next = state
            .execute(tx, self.transaction_fee)
            .map_err(|message| LedgerError::from_rpc_message(&message))?;
        state.balances = next;
        state.confirmed.push(tx.clone());
        // Each confirmed transaction lands in a new block.
        state.token_seq += 1;

        Ok(signature)
    }
}
