//! Fingerprint-keyed idempotency tracking.
//!
//! Every payment that reaches submission is recorded here under its
//! [`Fingerprint`]. While an entry is `Pending` or `Confirmed`, another
//! payment with the same fingerprint is refused. A `Failed` entry does not
//! block a retry of the same intent.
//!
//! Entries are dropped after a fixed TTL whatever their status. That keeps
//! the map bounded and lets a user legitimately pay the same amount to the
//! same pot again later. Expiry runs lazily at the start of every access.
//!
//! This is an in-memory safety net. It does not survive a restart and is
//! not meant to; the ledger's own replay protection is the backstop.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::Clock;
use crate::config::TrackerConfig;
use crate::error::SettlementError;
use crate::types::Fingerprint;

/// Lifecycle state of a tracked payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackedStatus {
    /// Handed to the submitter, outcome unknown.
    Pending,
    /// The ledger confirmed it.
    Confirmed,
    /// Submission failed for good.
    Failed,
}

impl TrackedStatus {
    /// `Pending` and `Confirmed` both block a new payment with the same
    /// fingerprint.
    pub fn blocks_duplicates(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }
}

impl fmt::Display for TrackedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Confirmed => write!(f, "Confirmed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// One tracked payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedTransaction {
    pub fingerprint: Fingerprint,
    /// Ledger signature, once known.
    pub signature: Option<String>,
    /// Clock reading (ms) when the entry was created.
    pub created_at_ms: u64,
    pub status: TrackedStatus,
    /// Registration number, unique per tracker.
    pub generation: u64,
}

/// Handle to one registration, returned by
/// [`TransactionTracker::add_transaction`].
///
/// Status and signature updates only land on the entry this ticket created.
/// Once that entry expires and the fingerprint is registered again, the old
/// ticket no longer matches and its updates are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingTicket {
    fingerprint: Fingerprint,
    generation: u64,
}

impl TrackingTicket {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

pub struct TransactionTracker {
    entries: DashMap<Fingerprint, TrackedTransaction>,
    ttl_ms: u64,
    clock: Arc<dyn Clock>,
    next_generation: AtomicU64,
}

impl fmt::Debug for TransactionTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionTracker")
            .field("size", &self.entries.len())
            .field("ttl_ms", &self.ttl_ms)
            .finish()
    }
}

impl TransactionTracker {
    pub fn new(ttl_ms: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl_ms,
            clock,
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn from_config(cfg: &TrackerConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(cfg.ttl_ms, clock)
    }

    /// Drops every entry older than the TTL. Returns how many went.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_sub(entry.created_at_ms) < self.ttl_ms);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "expired tracked transactions");
        }
        removed
    }

    /// `true` iff a live entry for `fingerprint` is pending or confirmed.
    pub fn is_duplicate(&self, fingerprint: &Fingerprint) -> bool {
        self.purge_expired();
        self.entries
            .get(fingerprint)
            .map(|e| e.status.blocks_duplicates())
            .unwrap_or(false)
    }

    /// Records a new `Pending` entry and returns the ticket that owns it.
    ///
    /// Check and insert happen under one shard lock, so two concurrent
    /// callers with the same fingerprint cannot both succeed. A previous
    /// `Failed` entry is replaced.
    pub fn add_transaction(
        &self,
        fingerprint: &Fingerprint,
        signature: Option<String>,
    ) -> Result<TrackingTicket, SettlementError> {
        self.purge_expired();

        match self.entries.entry(fingerprint.clone()) {
            Entry::Occupied(existing) if existing.get().status.blocks_duplicates() => {
                Err(SettlementError::DuplicateTransaction {
                    fingerprint: fingerprint.clone(),
                })
            }
            Entry::Occupied(mut failed) => {
                let entry = self.new_entry(fingerprint, signature);
                let ticket = Self::ticket_for(&entry);
                failed.insert(entry);
                Ok(ticket)
            }
            Entry::Vacant(slot) => {
                let entry = self.new_entry(fingerprint, signature);
                let ticket = Self::ticket_for(&entry);
                slot.insert(entry);
                Ok(ticket)
            }
        }
    }

    fn new_entry(&self, fingerprint: &Fingerprint, signature: Option<String>) -> TrackedTransaction {
        TrackedTransaction {
            fingerprint: fingerprint.clone(),
            signature,
            created_at_ms: self.clock.now_ms(),
            status: TrackedStatus::Pending,
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
        }
    }

    fn ticket_for(entry: &TrackedTransaction) -> TrackingTicket {
        TrackingTicket {
            fingerprint: entry.fingerprint.clone(),
            generation: entry.generation,
        }
    }

    /// Moves the ticket's `Pending` entry to a terminal status.
    ///
    /// Expired entries, entries that are already terminal and entries
    /// registered under a different ticket are left alone. Returns whether
    /// anything changed.
    pub fn update_status(&self, ticket: &TrackingTicket, status: TrackedStatus) -> bool {
        self.purge_expired();
        if status == TrackedStatus::Pending {
            return false;
        }
        match self.entries.get_mut(&ticket.fingerprint) {
            Some(entry) if entry.generation != ticket.generation => {
                debug!(
                    fingerprint = %ticket.fingerprint,
                    stale = ticket.generation,
                    current = entry.generation,
                    requested = %status,
                    "ignoring status change from superseded registration"
                );
                false
            }
            Some(mut entry) if entry.status == TrackedStatus::Pending => {
                entry.status = status;
                true
            }
            Some(entry) => {
                debug!(
                    fingerprint = %ticket.fingerprint,
                    current = %entry.status,
                    requested = %status,
                    "ignoring status change on terminal entry"
                );
                false
            }
            None => false,
        }
    }

    /// Attaches the ledger signature to the ticket's entry, if still live.
    pub fn record_signature(&self, ticket: &TrackingTicket, signature: &str) -> bool {
        match self.entries.get_mut(&ticket.fingerprint) {
            Some(mut entry) if entry.generation == ticket.generation => {
                entry.signature = Some(signature.to_string());
                true
            }
            _ => false,
        }
    }

    /// Returns a copy of the live entry, if any.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<TrackedTransaction> {
        self.purge_expired();
        self.entries.get(fingerprint).map(|e| e.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn tracker(ttl_ms: u64) -> (TransactionTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        (TransactionTracker::new(ttl_ms, clock.clone()), clock)
    }

    fn fp(s: &str) -> Fingerprint {
        Fingerprint::from(s)
    }

    #[test]
    fn pending_entry_blocks_duplicate() {
        let (t, _) = tracker(60_000);
        assert!(!t.is_duplicate(&fp("a")));
        t.add_transaction(&fp("a"), None).unwrap();
        assert!(t.is_duplicate(&fp("a")));

        let err = t.add_transaction(&fp("a"), None).unwrap_err();
        assert!(matches!(err, SettlementError::DuplicateTransaction { .. }));
    }

    #[test]
    fn confirmed_entry_blocks_duplicate() {
        let (t, _) = tracker(60_000);
        let ticket = t.add_transaction(&fp("a"), None).unwrap();
        assert!(t.update_status(&ticket, TrackedStatus::Confirmed));
        assert!(t.is_duplicate(&fp("a")));
        assert!(t.add_transaction(&fp("a"), None).is_err());
    }

    #[test]
    fn failed_entry_allows_retry() {
        let (t, _) = tracker(60_000);
        let ticket = t.add_transaction(&fp("a"), None).unwrap();
        t.update_status(&ticket, TrackedStatus::Failed);
        assert!(!t.is_duplicate(&fp("a")));

        t.add_transaction(&fp("a"), Some("sig".into())).unwrap();
        let entry = t.get(&fp("a")).unwrap();
        assert_eq!(entry.status, TrackedStatus::Pending);
        assert_eq!(entry.signature.as_deref(), Some("sig"));
    }

    #[test]
    fn entries_expire_regardless_of_status() {
        let (t, clock) = tracker(1_000);
        t.add_transaction(&fp("pending"), None).unwrap();
        let confirmed = t.add_transaction(&fp("confirmed"), None).unwrap();
        t.update_status(&confirmed, TrackedStatus::Confirmed);

        clock.advance(999);
        assert!(t.is_duplicate(&fp("pending")));
        assert!(t.is_duplicate(&fp("confirmed")));

        clock.advance(1);
        assert!(!t.is_duplicate(&fp("pending")));
        assert!(!t.is_duplicate(&fp("confirmed")));
        assert!(t.is_empty());

        t.add_transaction(&fp("confirmed"), None).unwrap();
    }

    #[test]
    fn terminal_status_is_final() {
        let (t, _) = tracker(60_000);
        let ticket = t.add_transaction(&fp("a"), None).unwrap();
        assert!(t.update_status(&ticket, TrackedStatus::Failed));
        assert!(!t.update_status(&ticket, TrackedStatus::Confirmed));
        assert_eq!(t.get(&fp("a")).unwrap().status, TrackedStatus::Failed);
    }

    #[test]
    fn update_after_expiry_is_noop() {
        let (t, clock) = tracker(1_000);
        let ticket = t.add_transaction(&fp("ghost"), None).unwrap();
        clock.advance(1_000);
        assert!(!t.update_status(&ticket, TrackedStatus::Confirmed));
        assert!(t.is_empty());
    }

    #[test]
    fn pending_is_not_a_valid_update() {
        let (t, _) = tracker(60_000);
        let ticket = t.add_transaction(&fp("a"), None).unwrap();
        assert!(!t.update_status(&ticket, TrackedStatus::Pending));
    }

    #[test]
    fn record_signature_on_live_entry() {
        let (t, _) = tracker(60_000);
        let ticket = t.add_transaction(&fp("a"), None).unwrap();
        assert!(t.record_signature(&ticket, "5xSig"));
        assert_eq!(t.get(&fp("a")).unwrap().signature.as_deref(), Some("5xSig"));
    }

    #[test]
    fn late_result_for_expired_entry_leaves_new_registration_alone() {
        let (t, clock) = tracker(1_000);
        let stale = t.add_transaction(&fp("a"), None).unwrap();

        clock.advance(1_000);
        let fresh = t.add_transaction(&fp("a"), None).unwrap();
        assert_ne!(stale.generation(), fresh.generation());

        assert!(!t.update_status(&stale, TrackedStatus::Failed));
        assert!(!t.record_signature(&stale, "oldSig"));

        let entry = t.get(&fp("a")).unwrap();
        assert_eq!(entry.status, TrackedStatus::Pending);
        assert_eq!(entry.signature, None);
        assert_eq!(entry.generation, fresh.generation());

        let err = t.add_transaction(&fp("a"), None).unwrap_err();
        assert!(matches!(err, SettlementError::DuplicateTransaction { .. }));

        assert!(t.update_status(&fresh, TrackedStatus::Confirmed));
    }

    #[test]
    fn replacing_a_failed_entry_issues_a_new_ticket() {
        let (t, _) = tracker(60_000);
        let first = t.add_transaction(&fp("a"), None).unwrap();
        t.update_status(&first, TrackedStatus::Failed);
        let second = t.add_transaction(&fp("a"), None).unwrap();

        assert!(!t.update_status(&first, TrackedStatus::Confirmed));
        assert_eq!(t.get(&fp("a")).unwrap().status, TrackedStatus::Pending);
        assert!(t.update_status(&second, TrackedStatus::Confirmed));
    }

    #[test]
    fn concurrent_adds_admit_exactly_one() {
        let (t, _) = tracker(60_000);
        let t = Arc::new(t);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let t = Arc::clone(&t);
                std::thread::spawn(move || t.add_transaction(&fp("same"), None).is_ok())
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);
    }
}
