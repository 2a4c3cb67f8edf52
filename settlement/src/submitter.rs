//! # Submission Pipeline
//!
//! Takes a list of operations to a confirmed ledger signature.
//!
//! ```text
//!  Built ──simulate──▶ Simulated ──submit──▶ Submitted ──▶ Confirmed
//!    ▲                                          │
//!    └──── refresh token + re-sign ◀── retry ───┤
//!                                               └──▶ Failed
//! ```
//!
//! A simulation that *reports* an error is fatal: the transaction is
//! structurally wrong and sending it again will not help. Transport
//! failures while simulating are retried like submit failures, and both
//! stages draw on one retry budget per submission: retries spent simulating
//! are not available to `submit`.
//!
//! Every retry of a submission restamps the transaction with a fresh
//! sequencing token and asks the wallet to sign it again, so a stale
//! block reference never burns the whole retry budget.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::SettlementError;
use crate::ledger::{LedgerClient, SimulationReport};
use crate::retry::{retry_with_policy, RetryError, RetryPolicy};
use crate::signer::WalletSigner;
use crate::transaction::{Operation, SettlementTransaction};

/// Where a [`Submission`] is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionState {
    /// Stamped and signed, not yet dry-run.
    Built,
    /// Dry run passed.
    Simulated,
    /// Handed to the ledger; retries may be in progress.
    Submitted,
    /// Terminal: landed on the ledger.
    Confirmed { signature: String, attempts: u32 },
    /// Terminal: gave up.
    Failed { reason: String },
}

impl SubmissionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed { .. } | Self::Failed { .. })
    }
}

impl fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Built => f.write_str("built"),
            Self::Simulated => f.write_str("simulated"),
            Self::Submitted => f.write_str("submitted"),
            Self::Confirmed { .. } => f.write_str("confirmed"),
            Self::Failed { .. } => f.write_str("failed"),
        }
    }
}

/// A signed transaction plus its lifecycle state.
#[derive(Debug, Clone)]
pub struct Submission {
    transaction: SettlementTransaction,
    state: SubmissionState,
    retries_left: u32,
}

impl Submission {
    fn new(transaction: SettlementTransaction, retries_left: u32) -> Self {
        Self {
            transaction,
            state: SubmissionState::Built,
            retries_left,
        }
    }

    pub fn transaction(&self) -> &SettlementTransaction {
        &self.transaction
    }

    pub fn state(&self) -> &SubmissionState {
        &self.state
    }

    /// Retries still available to `simulate` and `submit` combined.
    pub fn retries_left(&self) -> u32 {
        self.retries_left
    }

    fn spend_retries(&mut self, attempts: u32) {
        self.retries_left = self
            .retries_left
            .saturating_sub(attempts.saturating_sub(1));
    }

    fn mark_simulated(&mut self) {
        if self.state == SubmissionState::Built {
            self.state = SubmissionState::Simulated;
        }
    }

    fn mark_submitted(&mut self) {
        if !self.state.is_terminal() {
            self.state = SubmissionState::Submitted;
        }
    }

    fn mark_confirmed(&mut self, signature: String, attempts: u32) {
        if !self.state.is_terminal() {
            self.state = SubmissionState::Confirmed {
                signature,
                attempts,
            };
        }
    }

    fn mark_failed(&mut self, err: &SettlementError) {
        if !self.state.is_terminal() {
            self.state = SubmissionState::Failed {
                reason: err.to_string(),
            };
        }
    }
}

/// What a successful submission produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionOutcome {
    pub signature: String,
    /// Submission attempts, including the one that succeeded.
    pub attempts: u32,
}

/// Drives transactions through simulate and submit against one ledger,
/// signing with one wallet.
#[derive(Clone)]
pub struct Submitter {
    ledger: Arc<dyn LedgerClient>,
    signer: Arc<dyn WalletSigner>,
    policy: RetryPolicy,
}

impl fmt::Debug for Submitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Submitter")
            .field("signer", &self.signer.address())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

fn is_transient(err: &SettlementError) -> bool {
    matches!(err, SettlementError::Ledger(e) if e.is_retryable())
}

impl Submitter {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        signer: Arc<dyn WalletSigner>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            ledger,
            signer,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Wraps `operations` in a transaction paid for by the signer, stamps a
    /// current sequencing token, and signs it.
    pub async fn prepare(&self, operations: Vec<Operation>) -> Result<Submission, SettlementError> {
        let mut tx = SettlementTransaction::new(self.signer.address(), operations);
        tx.set_sequencing_token(self.ledger.latest_sequencing_token().await?);
        let tx = self.signer.sign(tx).await?;
        debug!(
            operations = tx.operations.len(),
            token = ?tx.sequencing_token,
            "transaction prepared"
        );
        Ok(Submission::new(tx, self.policy.max_retries))
    }

    /// Dry-runs the submission. A reported error becomes
    /// [`SettlementError::Simulation`] and is not retried.
    pub async fn simulate(
        &self,
        submission: &mut Submission,
    ) -> Result<SimulationReport, SettlementError> {
        let ledger: &dyn LedgerClient = self.ledger.as_ref();
        let tx = &submission.transaction;
        let policy = self.policy.with_max_retries(submission.retries_left);

        let retried = retry_with_policy(&policy, is_transient, move |_| async move {
            ledger.simulate(tx).await.map_err(SettlementError::from)
        })
        .await;
        submission.spend_retries(match &retried {
            Ok((_, attempts)) => *attempts,
            Err(err) => err.attempts(),
        });

        let result = retried
            .map_err(into_settlement_error)
        .and_then(|(report, _)| match report.error {
            None => Ok(report),
            Some(message) => Err(SettlementError::Simulation {
                message,
                logs: report.logs,
            }),
        });

        match result {
            Ok(report) => {
                debug!(units = ?report.units_consumed, "simulation passed");
                submission.mark_simulated();
                Ok(report)
            }
            Err(err) => {
                warn!(error = %err, "simulation failed");
                submission.mark_failed(&err);
                Err(err)
            }
        }
    }

    /// Submits and waits for confirmation, retrying transient failures
    /// with a fresh token and signature each time.
    pub async fn submit(
        &self,
        submission: &mut Submission,
    ) -> Result<SubmissionOutcome, SettlementError> {
        submission.mark_submitted();

        let ledger: &dyn LedgerClient = self.ledger.as_ref();
        let signer: &dyn WalletSigner = self.signer.as_ref();
        let signed = &submission.transaction;
        let policy = self.policy.with_max_retries(submission.retries_left);

        let retried = retry_with_policy(&policy, is_transient, move |attempt| async move {
            let mut tx = signed.clone();
            if attempt > 1 {
                tx.set_sequencing_token(ledger.latest_sequencing_token().await?);
                tx = signer.sign(tx).await?;
            }
            let signature = ledger.submit_and_confirm(&tx).await?;
            Ok::<_, SettlementError>(signature)
        })
        .await;
        submission.spend_retries(match &retried {
            Ok((_, attempts)) => *attempts,
            Err(err) => err.attempts(),
        });
        let result = retried.map_err(into_settlement_error);

        match result {
            Ok((signature, attempts)) => {
                info!(%signature, attempts, "transaction confirmed");
                submission.mark_confirmed(signature.clone(), attempts);
                Ok(SubmissionOutcome {
                    signature,
                    attempts,
                })
            }
            Err(err) => {
                warn!(error = %err, "submission failed");
                submission.mark_failed(&err);
                Err(err)
            }
        }
    }

    /// `prepare`, `simulate`, then `submit`.
    pub async fn settle(
        &self,
        operations: Vec<Operation>,
    ) -> Result<SubmissionOutcome, SettlementError> {
        let mut submission = self.prepare(operations).await?;
        self.simulate(&mut submission).await?;
        self.submit(&mut submission).await
    }
}

/// Ledger failures become `TransientNetwork` or `Rejected`. Anything else
/// (a signer refusal, say) passes through unchanged.
fn into_settlement_error(err: RetryError<SettlementError>) -> SettlementError {
    match err {
        RetryError::Exhausted {
            attempts,
            last_error: SettlementError::Ledger(last_error),
        } => SettlementError::TransientNetwork {
            attempts,
            last_error,
        },
        RetryError::Fatal {
            attempt,
            error: SettlementError::Ledger(source),
        } => SettlementError::Rejected { attempt, source },
        other => other.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{InMemoryLedger, LedgerError};
    use crate::signer::KeypairSigner;
    use crate::types::{Address, Currency};
    use std::time::Duration;

    struct Harness {
        ledger: Arc<InMemoryLedger>,
        signer: Arc<KeypairSigner>,
        submitter: Submitter,
    }

    fn harness(max_retries: u32) -> Harness {
        let ledger = Arc::new(InMemoryLedger::new());
        let signer = Arc::new(KeypairSigner::from_seed(&[3u8; 32]));
        ledger.set_native_balance(&signer.address(), 10_000_000);
        let submitter = Submitter::new(
            ledger.clone(),
            signer.clone(),
            RetryPolicy::fixed(max_retries, Duration::from_millis(1_000)),
        );
        Harness {
            ledger,
            signer,
            submitter,
        }
    }

    fn pay_pot(from: &Address, amount: u64) -> Vec<Operation> {
        vec![Operation::Transfer {
            from: from.clone(),
            to: Address::new("pot"),
            amount,
            currency: Currency::Native,
        }]
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_walks_every_state() {
        let h = harness(3);
        let mut sub = h
            .submitter
            .prepare(pay_pot(&h.signer.address(), 1_000))
            .await
            .unwrap();
        assert_eq!(sub.state(), &SubmissionState::Built);
        assert!(sub.transaction().is_signed());

        h.submitter.simulate(&mut sub).await.unwrap();
        assert_eq!(sub.state(), &SubmissionState::Simulated);

        let outcome = h.submitter.submit(&mut sub).await.unwrap();
        assert_eq!(outcome.attempts, 1);
        assert_eq!(
            sub.state(),
            &SubmissionState::Confirmed {
                signature: outcome.signature.clone(),
                attempts: 1
            }
        );
        assert_eq!(h.ledger.native_balance(&Address::new("pot")), 1_000);
    }

    #[tokio::test(start_paused = true)]
    async fn reported_simulation_error_is_not_retried() {
        let h = harness(3);
        h.ledger
            .set_simulation_error("custom program error: 0x1", vec!["Program log: nope".into()]);
        let mut sub = h
            .submitter
            .prepare(pay_pot(&h.signer.address(), 1_000))
            .await
            .unwrap();

        let err = h.submitter.simulate(&mut sub).await.unwrap_err();
        match err {
            SettlementError::Simulation { message, logs } => {
                assert!(message.contains("0x1"));
                assert_eq!(logs, vec!["Program log: nope".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(h.ledger.simulate_calls(), 1);
        assert!(matches!(sub.state(), SubmissionState::Failed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn simulation_transport_failure_is_retried() {
        let h = harness(3);
        h.ledger
            .push_simulate_failure(LedgerError::Connection("reset".into()));
        let mut sub = h
            .submitter
            .prepare(pay_pot(&h.signer.address(), 1_000))
            .await
            .unwrap();
        h.submitter.simulate(&mut sub).await.unwrap();
        assert_eq!(h.ledger.simulate_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn simulate_and_submit_share_one_retry_budget() {
        let h = harness(3);
        h.ledger
            .push_simulate_failure(LedgerError::Connection("reset".into()));
        h.ledger
            .push_simulate_failure(LedgerError::Connection("reset".into()));
        h.ledger
            .set_persistent_submit_failure(Some(LedgerError::ConfirmationTimeout));

        let started = tokio::time::Instant::now();
        let err = h
            .submitter
            .settle(pay_pot(&h.signer.address(), 1_000))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SettlementError::TransientNetwork { attempts: 2, .. }
        ));
        assert_eq!(h.ledger.simulate_calls(), 3);
        assert_eq!(h.ledger.submit_calls(), 2);
        assert_eq!(started.elapsed(), Duration::from_millis(3_000));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_simulation_leaves_one_submit_attempt() {
        let h = harness(1);
        h.ledger
            .push_simulate_failure(LedgerError::Connection("reset".into()));
        let mut sub = h
            .submitter
            .prepare(pay_pot(&h.signer.address(), 1_000))
            .await
            .unwrap();
        assert_eq!(sub.retries_left(), 1);

        h.submitter.simulate(&mut sub).await.unwrap();
        assert_eq!(sub.retries_left(), 0);

        h.ledger.expire_sequencing_tokens();
        let err = h.submitter.submit(&mut sub).await.unwrap_err();
        assert!(matches!(
            err,
            SettlementError::TransientNetwork { attempts: 1, .. }
        ));
        assert_eq!(h.ledger.submit_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_token_is_refreshed_and_resigned() {
        let h = harness(3);
        let mut sub = h
            .submitter
            .prepare(pay_pot(&h.signer.address(), 1_000))
            .await
            .unwrap();
        let original_sig = sub.transaction().signature.clone();
        h.ledger.expire_sequencing_tokens();

        let outcome = h.submitter.submit(&mut sub).await.unwrap();
        assert_eq!(outcome.attempts, 2);
        assert_ne!(Some(outcome.signature), original_sig);
        // One token for prepare, one for the retry.
        assert_eq!(h.ledger.token_requests(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn always_transient_exhausts_budget() {
        let h = harness(3);
        h.ledger
            .set_persistent_submit_failure(Some(LedgerError::ConfirmationTimeout));
        let mut sub = h
            .submitter
            .prepare(pay_pot(&h.signer.address(), 1_000))
            .await
            .unwrap();

        let err = h.submitter.submit(&mut sub).await.unwrap_err();
        match err {
            SettlementError::TransientNetwork {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 4);
                assert_eq!(last_error, LedgerError::ConfirmationTimeout);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(h.ledger.submit_calls(), 4);
        assert!(matches!(sub.state(), SubmissionState::Failed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_submit_error_stops_at_first_attempt() {
        let h = harness(3);
        h.ledger.push_submit_failure(LedgerError::InsufficientFunds);
        let mut sub = h
            .submitter
            .prepare(pay_pot(&h.signer.address(), 1_000))
            .await
            .unwrap();

        let err = h.submitter.submit(&mut sub).await.unwrap_err();
        assert!(matches!(
            err,
            SettlementError::Rejected {
                attempt: 1,
                source: LedgerError::InsufficientFunds
            }
        ));
        assert_eq!(h.ledger.submit_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn settle_runs_whole_pipeline() {
        let h = harness(1);
        h.ledger.push_submit_failure(LedgerError::RateLimited);
        let outcome = h
            .submitter
            .settle(pay_pot(&h.signer.address(), 2_500))
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 2);
        assert_eq!(h.ledger.native_balance(&Address::new("pot")), 2_500);
        assert_eq!(h.ledger.confirmed().len(), 1);
    }

    #[test]
    fn terminal_states_are_sticky() {
        let mut sub = Submission::new(SettlementTransaction::new(Address::new("a"), vec![]), 0);
        sub.mark_confirmed("sig".into(), 1);
        sub.mark_failed(&SettlementError::Config("late".into()));
        sub.mark_submitted();
        assert!(matches!(sub.state(), SubmissionState::Confirmed { .. }));
        assert_eq!(sub.state().to_string(), "confirmed");
    }
}
