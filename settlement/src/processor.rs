//! # Payment Processor
//!
//! The end-to-end pipeline. One call to [`PaymentProcessor::pay`] walks a
//! [`PaymentIntent`] through every stage, in this order:
//!
//! 1. **Balance**: can the payer afford it (plus network fee and reserve)?
//! 2. **Idempotency**: is the same payment already pending or confirmed?
//! 3. **Rate limit**: is there room in the shared submission window?
//! 4. **Build**: direct transfer or pot/fee split.
//! 5. **Track**: record the fingerprint as `Pending`.
//! 6. **Submit**: simulate, then send with retry.
//! 7. **Resolve**: mark the fingerprint `Confirmed` or `Failed`.
//!
//! Stages 1 to 4 never touch the tracker, so a payment rejected there
//! leaves no trace and can be retried immediately. From stage 5 on, a
//! failure always resolves the entry to `Failed`; nothing is left pending.
//!
//! The tracker and the limiter are shared objects. Hand the same `Arc`s to
//! several processors (say, one per signer) and they share one budget and
//! one idempotency map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::balance::BalanceVerifier;
use crate::clock::Clock;
use crate::config::SettlementConfig;
use crate::error::SettlementError;
use crate::fee::{FeeSchedule, FeeSplit};
use crate::ledger::LedgerClient;
use crate::limiter::RateLimiter;
use crate::retry::RetryPolicy;
use crate::signer::{SignerError, WalletSigner};
use crate::submitter::Submitter;
use crate::tracker::{TrackedStatus, TransactionTracker};
use crate::transaction::{Operation, TransactionBuilder};
use crate::types::{Address, Currency, Fingerprint, PaymentIntent};

/// How the gross amount is distributed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementMode {
    /// Everything to the payee. Used for prize payouts, and for program
    /// accounts that take their own fee on-chain.
    Direct,
    /// Pot share to the payee, protocol fee to `fee_destination`.
    Split { fee_destination: Address },
}

/// Proof that a payment landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    /// Correlates with the `settlement` tracing span.
    pub request_id: Uuid,
    pub fingerprint: Fingerprint,
    /// Ledger signature of the confirmed transaction.
    pub signature: String,
    pub currency: Currency,
    pub pot_amount: u64,
    pub fee_amount: u64,
    /// Submission attempts it took, including the successful one.
    pub attempts: u32,
    pub settled_at: DateTime<Utc>,
}

impl PaymentReceipt {
    pub fn gross_amount(&self) -> u64 {
        self.pot_amount + self.fee_amount
    }
}

/// Point-in-time copy of the processor's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettlementStats {
    /// Payments handed to the submitter.
    pub submitted: u64,
    pub confirmed: u64,
    /// Submitted payments that did not confirm.
    pub failed: u64,
    pub duplicates_rejected: u64,
    pub rate_limited: u64,
    /// Protocol fees confirmed on-chain, per currency.
    pub fees_collected: HashMap<Currency, u64>,
}

#[derive(Debug, Default)]
struct StatsCounters {
    submitted: AtomicU64,
    confirmed: AtomicU64,
    failed: AtomicU64,
    duplicates_rejected: AtomicU64,
    rate_limited: AtomicU64,
    fees_collected: Mutex<HashMap<Currency, u64>>,
}

impl StatsCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn add_fee(&self, currency: &Currency, amount: u64) {
        if amount == 0 {
            return;
        }
        let mut fees = self.fees_collected.lock();
        let total = fees.entry(currency.clone()).or_insert(0);
        *total = total.saturating_add(amount);
    }

    fn snapshot(&self) -> SettlementStats {
        SettlementStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            confirmed: self.confirmed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            duplicates_rejected: self.duplicates_rejected.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            fees_collected: self.fees_collected.lock().clone(),
        }
    }
}

/// Settles payments signed by one wallet against one ledger.
pub struct PaymentProcessor {
    builder: TransactionBuilder,
    balance: BalanceVerifier,
    tracker: Arc<TransactionTracker>,
    limiter: Arc<RateLimiter>,
    submitter: Submitter,
    signer_address: Address,
    stats: StatsCounters,
}

impl std::fmt::Debug for PaymentProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentProcessor")
            .field("signer", &self.signer_address)
            .field("fees", self.builder.fee_schedule())
            .field("tracker", &self.tracker)
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

impl PaymentProcessor {
    /// Builds a processor with its own tracker and limiter.
    pub fn new(
        config: SettlementConfig,
        ledger: Arc<dyn LedgerClient>,
        signer: Arc<dyn WalletSigner>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SettlementError> {
        let tracker = Arc::new(TransactionTracker::from_config(
            &config.tracker,
            Arc::clone(&clock),
        ));
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit, clock));
        Self::with_components(config, ledger, signer, tracker, limiter)
    }

    /// Builds a processor around an existing tracker and limiter.
    pub fn with_components(
        config: SettlementConfig,
        ledger: Arc<dyn LedgerClient>,
        signer: Arc<dyn WalletSigner>,
        tracker: Arc<TransactionTracker>,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, SettlementError> {
        config.validate()?;
        let fees = FeeSchedule::from_config(&config.fee)?;
        let balance = BalanceVerifier::new(Arc::clone(&ledger), config.balance.clone())
            .with_supported_tokens(config.supported_tokens.clone());
        let signer_address = signer.address();
        let submitter = Submitter::new(ledger, signer, RetryPolicy::from_config(&config.retry));

        Ok(Self {
            builder: TransactionBuilder::new(fees),
            balance,
            tracker,
            limiter,
            submitter,
            signer_address,
            stats: StatsCounters::default(),
        })
    }

    pub fn tracker(&self) -> &Arc<TransactionTracker> {
        &self.tracker
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn fee_schedule(&self) -> &FeeSchedule {
        self.builder.fee_schedule()
    }

    pub fn stats(&self) -> SettlementStats {
        self.stats.snapshot()
    }

    /// Settles `intent` and returns a receipt once the ledger confirms it.
    ///
    /// Recoverable rejections ([`SettlementError::RateLimited`],
    /// [`SettlementError::DuplicateTransaction`]) happen before anything is
    /// signed. Every other error is final for this call.
    pub async fn pay(
        &self,
        intent: &PaymentIntent,
        mode: &SettlementMode,
    ) -> Result<PaymentReceipt, SettlementError> {
        let request_id = Uuid::new_v4();
        let fingerprint = intent.fingerprint();
        let span = info_span!(
            "settlement",
            %request_id,
            fingerprint = %fingerprint,
            amount = intent.amount(),
            currency = %intent.currency(),
        );

        self.pay_inner(request_id, fingerprint, intent, mode)
            .instrument(span)
            .await
    }

    async fn pay_inner(
        &self,
        request_id: Uuid,
        fingerprint: Fingerprint,
        intent: &PaymentIntent,
        mode: &SettlementMode,
    ) -> Result<PaymentReceipt, SettlementError> {
        if intent.payer() != &self.signer_address {
            return Err(SettlementError::Signer(SignerError::WrongSigner {
                signer: self.signer_address.clone(),
                fee_payer: intent.payer().clone(),
            }));
        }

        self.balance
            .check_sufficient(intent.payer(), intent.amount(), intent.currency())
            .await?;

        if self.tracker.is_duplicate(&fingerprint) {
            StatsCounters::bump(&self.stats.duplicates_rejected);
            info!("duplicate payment rejected");
            return Err(SettlementError::DuplicateTransaction { fingerprint });
        }

        let decision = self.limiter.check_limit();
        if !decision.allowed {
            StatsCounters::bump(&self.stats.rate_limited);
            info!(wait_time_ms = decision.wait_time_ms, "payment rate limited");
            return Err(SettlementError::RateLimited {
                wait_time_ms: decision.wait_time_ms,
            });
        }

        let (operations, split) = self.build(intent, mode);

        let ticket = match self.tracker.add_transaction(&fingerprint, None) {
            Ok(ticket) => ticket,
            Err(err) => {
                StatsCounters::bump(&self.stats.duplicates_rejected);
                info!("duplicate payment rejected at registration");
                return Err(err);
            }
        };
        StatsCounters::bump(&self.stats.submitted);
        debug!(
            operations = operations.len(),
            pot = split.pot_amount,
            fee = split.fee_amount,
            "payment registered as pending"
        );

        match self.submitter.settle(operations).await {
            Ok(outcome) => {
                self.tracker.record_signature(&ticket, &outcome.signature);
                if !self.tracker.update_status(&ticket, TrackedStatus::Confirmed) {
                    warn!(
                        generation = ticket.generation(),
                        "tracker entry expired before confirmation"
                    );
                }
                StatsCounters::bump(&self.stats.confirmed);
                self.stats.add_fee(intent.currency(), split.fee_amount);
                info!(
                    signature = %outcome.signature,
                    attempts = outcome.attempts,
                    "payment settled"
                );
                Ok(PaymentReceipt {
                    request_id,
                    fingerprint,
                    signature: outcome.signature,
                    currency: intent.currency().clone(),
                    pot_amount: split.pot_amount,
                    fee_amount: split.fee_amount,
                    attempts: outcome.attempts,
                    settled_at: Utc::now(),
                })
            }
            Err(err) => {
                self.tracker.update_status(&ticket, TrackedStatus::Failed);
                StatsCounters::bump(&self.stats.failed);
                warn!(error = %err, kind = ?err.kind(), "payment failed");
                Err(err)
            }
        }
    }

    fn build(&self, intent: &PaymentIntent, mode: &SettlementMode) -> (Vec<Operation>, FeeSplit) {
        match mode {
            SettlementMode::Direct => (
                self.builder.build_direct_transfer(intent),
                FeeSplit {
                    pot_amount: intent.amount(),
                    fee_amount: 0,
                },
            ),
            SettlementMode::Split { fee_destination } => (
                self.builder.build_split_transfer(intent, fee_destination),
                self.builder.fee_schedule().split_for_settlement(intent.amount()),
            ),
        }
    }
}
