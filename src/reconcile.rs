//! Reconciliation: after any change notice, re-read the scope and replace the
//! store's list wholesale.
//!
//! Concurrent fetches are not deduplicated. Each one takes a ticket from a
//! monotonic sequence and its result is applied only if no newer fetch has
//! started since, so an older response arriving late can't roll the list back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;

use async_trait::async_trait;
use serde::Serialize;

use crate::feed::{ChangeListener, ChangeNotice};
use crate::gateway::Record;
use crate::store::DomainStore;

/// Ticket for one in-flight fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FetchTicket(u64);

#[derive(Debug, Default)]
pub struct FetchSequencer {
    issued: AtomicU64,
    applied: AtomicU64,
    discarded: AtomicU64,
    notices: AtomicU64,
}

/// Counters for tests and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileStats {
    pub issued: u64,
    pub applied: u64,
    pub discarded: u64,
    pub notices: u64,
}

impl FetchSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fetch. Every earlier ticket becomes stale.
    pub fn begin(&self) -> FetchTicket {
        FetchTicket(self.issued.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_latest(&self, ticket: FetchTicket) -> bool {
        self.issued.load(Ordering::SeqCst) == ticket.0
    }

    /// Make every in-flight fetch stale without starting a new one.
    pub fn invalidate(&self) {
        self.issued.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_applied(&self) {
        self.applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notice(&self) {
        self.notices.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> ReconcileStats {
        ReconcileStats {
            issued: self.issued.load(Ordering::SeqCst),
            applied: self.applied.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            notices: self.notices.load(Ordering::Relaxed),
        }
    }
}

/// Change listener that re-fetches a store's scope. Holds the store weakly,
/// so an open channel never keeps a store alive.
pub(crate) struct StoreReconciler<E: Record> {
    pub(crate) store: Weak<DomainStore<E>>,
    pub(crate) scope: String,
    /// Store generation at subscribe time; a reset store ignores old channels.
    pub(crate) generation: u64,
}

#[async_trait]
impl<E: Record> ChangeListener for StoreReconciler<E> {
    async fn on_change(&self, notice: ChangeNotice) {
        let Some(store) = self.store.upgrade() else {
            return;
        };
        store.reconcile(&self.scope, self.generation, &notice).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newer_ticket_supersedes_older() {
        let seq = FetchSequencer::new();
        let first = seq.begin();
        assert!(seq.is_latest(first));

        let second = seq.begin();
        assert!(second > first);
        assert!(!seq.is_latest(first));
        assert!(seq.is_latest(second));
    }

    #[test]
    fn test_invalidate_stales_in_flight() {
        let seq = FetchSequencer::new();
        let ticket = seq.begin();
        seq.invalidate();
        assert!(!seq.is_latest(ticket));
    }

    #[test]
    fn test_stats_count() {
        let seq = FetchSequencer::new();
        seq.begin();
        seq.record_applied();
        seq.begin();
        seq.record_discarded();
        seq.record_notice();
        assert_eq!(
            seq.stats(),
            ReconcileStats {
                issued: 2,
                applied: 1,
                discarded: 1,
                notices: 1,
            }
        );
    }
}
