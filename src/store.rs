//! Domain stores: one in-memory list per entity type, mirroring the remote
//! rows for a single scope (usually a project id).
//!
//! Read paths never fail outward; errors land in `error` and the last good
//! list is kept. Write paths go through the gateway first, then patch the
//! local list without waiting for the change feed, marking the entry pending.
//! The next applied fetch replaces everything with authoritative rows.
//! Concurrent mutations are not serialised; the remote store arbitrates.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;

use crate::error::SyncError;
use crate::feed::{ChangeFeed, ChangeNotice, Subscription};
use crate::gateway::{Filter, Record, TableGateway};
use crate::reconcile::{FetchSequencer, FetchTicket, ReconcileStats, StoreReconciler};
use crate::types::*;

pub type TeamStore = DomainStore<TeamMember>;
pub type TaskStore = DomainStore<Task>;
pub type InvestmentStore = DomainStore<Investment>;
pub type MilestoneStore = DomainStore<Milestone>;
pub type ChatStore = DomainStore<Chat>;
pub type MessageStore = DomainStore<ChatMessage>;
pub type EventStore = DomainStore<CalendarEvent>;
pub type ActivityStore = DomainStore<ActivityEntry>;

/// Load state of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Loading,
    Ready,
    Error,
}

struct StoreState<E> {
    items: Vec<E>,
    phase: Phase,
    error: Option<String>,
    scope: Option<String>,
    /// Ids written locally since the last applied fetch.
    pending: HashSet<String>,
}

impl<E> StoreState<E> {
    fn empty() -> Self {
        Self {
            items: Vec::new(),
            phase: Phase::Idle,
            error: None,
            scope: None,
            pending: HashSet::new(),
        }
    }
}

/// Point-in-time copy of a store for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct StoreSnapshot<E> {
    pub items: Vec<E>,
    pub phase: Phase,
    pub error: Option<String>,
    pub scope: Option<String>,
    pub pending_ids: Vec<String>,
}

impl<E: Record> StoreSnapshot<E> {
    pub fn get(&self, id: &str) -> Option<&E> {
        self.items.iter().find(|item| item.id() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Written locally and not yet confirmed by a fetch.
    pub fn is_pending(&self, id: &str) -> bool {
        self.pending_ids.iter().any(|p| p == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_loading(&self) -> bool {
        self.phase == Phase::Loading
    }
}

pub struct DomainStore<E: Record> {
    gateway: Arc<dyn TableGateway<E>>,
    feed: ChangeFeed,
    scope_column: &'static str,
    state: RwLock<StoreState<E>>,
    sequencer: FetchSequencer,
    /// Bumped by `reset`; channels opened earlier stop reconciling.
    generation: AtomicU64,
    revision: watch::Sender<u64>,
}

impl<E: Record> DomainStore<E> {
    /// Store scoped by the entity's default column.
    pub fn new(gateway: Arc<dyn TableGateway<E>>, feed: ChangeFeed) -> Arc<Self> {
        Arc::new(Self::build(gateway, feed, E::SCOPE_COLUMN))
    }

    /// Store scoped by another filterable column, e.g. tasks by `assignee_id`.
    pub fn with_scope_column(
        gateway: Arc<dyn TableGateway<E>>,
        feed: ChangeFeed,
        column: &str,
    ) -> Result<Arc<Self>, SyncError> {
        let column = E::filter_column(column)?;
        Ok(Arc::new(Self::build(gateway, feed, column)))
    }

    fn build(gateway: Arc<dyn TableGateway<E>>, feed: ChangeFeed, scope_column: &'static str) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            gateway,
            feed,
            scope_column,
            state: RwLock::new(StoreState::empty()),
            sequencer: FetchSequencer::new(),
            generation: AtomicU64::new(0),
            revision,
        }
    }

    pub fn scope_column(&self) -> &'static str {
        self.scope_column
    }

    fn scope_filter(&self, scope: &str) -> Filter {
        Filter::eq(self.scope_column, scope)
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Load every row in `scope`, replacing the list. Switching scope clears
    /// the old scope's rows first. Failures are recorded, not returned.
    pub async fn fetch(&self, scope: &str) {
        let ticket = self.sequencer.begin();
        {
            let mut state = self.state.write();
            if state.scope.as_deref() != Some(scope) {
                state.items.clear();
                state.pending.clear();
                state.scope = Some(scope.to_string());
            }
            state.phase = Phase::Loading;
        }
        self.bump();

        let result = self.gateway.fetch(&self.scope_filter(scope)).await;
        self.apply_fetch(ticket, scope, result);
    }

    fn apply_fetch(&self, ticket: FetchTicket, scope: &str, result: Result<Vec<E>, SyncError>) {
        {
            let mut state = self.state.write();
            if !self.sequencer.is_latest(ticket) {
                drop(state);
                self.sequencer.record_discarded();
                log::debug!(
                    "Store({}): discarded stale fetch {:?} for {}",
                    E::TABLE,
                    ticket,
                    scope
                );
                return;
            }

            match result {
                Ok(items) => {
                    log::debug!("Store({}): {} row(s) for {}", E::TABLE, items.len(), scope);
                    state.items = items;
                    state.pending.clear();
                    state.phase = Phase::Ready;
                    state.error = None;
                }
                Err(e) => {
                    log::warn!("Store({}): fetch for {} failed: {}", E::TABLE, scope, e);
                    state.phase = Phase::Error;
                    state.error = Some(e.to_string());
                }
            }
        }
        self.sequencer.record_applied();
        self.bump();
    }

    pub fn snapshot(&self) -> StoreSnapshot<E> {
        let state = self.state.read();
        let mut pending_ids: Vec<String> = state.pending.iter().cloned().collect();
        pending_ids.sort();
        StoreSnapshot {
            items: state.items.clone(),
            phase: state.phase,
            error: state.error.clone(),
            scope: state.scope.clone(),
            pending_ids,
        }
    }

    /// Local copy of one entry, if loaded.
    pub fn get(&self, id: &str) -> Option<E> {
        self.state.read().items.iter().find(|item| item.id() == id).cloned()
    }

    pub fn items(&self) -> Vec<E> {
        self.state.read().items.clone()
    }

    pub fn phase(&self) -> Phase {
        self.state.read().phase
    }

    pub fn error(&self) -> Option<String> {
        self.state.read().error.clone()
    }

    pub fn stats(&self) -> ReconcileStats {
        self.sequencer.stats()
    }

    /// Revision counter that ticks on every state change. Views await
    /// `changed()` and take a fresh `snapshot()`.
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    pub async fn create(&self, draft: E::Draft) -> Result<E, SyncError> {
        let row = self.gateway.create(draft).await.inspect_err(|e| {
            log::warn!("Store({}): create failed: {}", E::TABLE, e);
        })?;
        self.upsert_local(&row);
        Ok(row)
    }

    pub async fn update(&self, id: &str, patch: E::Patch) -> Result<E, SyncError> {
        let row = self.gateway.update(id, patch).await.inspect_err(|e| {
            log::warn!("Store({}): update {} failed: {}", E::TABLE, id, e);
        })?;
        self.upsert_local(&row);
        Ok(row)
    }

    /// Best effort. `true` when the remote call succeeded, including when the
    /// row was already gone.
    pub async fn delete(&self, id: &str) -> bool {
        match self.gateway.delete(id).await {
            Ok(removed) => {
                if !removed {
                    log::debug!("Store({}): {} was already deleted", E::TABLE, id);
                }
                {
                    let mut state = self.state.write();
                    state.items.retain(|item| item.id() != id);
                    state.pending.remove(id);
                }
                self.bump();
                true
            }
            Err(e) => {
                log::warn!("Store({}): delete {} failed: {}", E::TABLE, id, e);
                self.state.write().error = Some(e.to_string());
                self.bump();
                false
            }
        }
    }

    /// Put a written row into the local list if it belongs to the current
    /// scope; drop it if it has moved out.
    fn upsert_local(&self, row: &E) {
        {
            let mut state = self.state.write();
            let in_scope = match state.scope.as_deref() {
                Some(scope) => self.scope_filter(scope).matches_record(row),
                None => true,
            };
            let existing = state.items.iter().position(|item| item.id() == row.id());

            match (existing, in_scope) {
                (Some(pos), true) => state.items[pos] = row.clone(),
                (Some(pos), false) => {
                    state.items.remove(pos);
                }
                (None, true) => state.items.push(row.clone()),
                (None, false) => {}
            }

            if in_scope {
                state.pending.insert(row.id().to_string());
            } else {
                state.pending.remove(row.id());
            }
        }
        self.bump();
    }

    // -----------------------------------------------------------------------
    // Live updates
    // -----------------------------------------------------------------------

    /// Open a change-feed channel for `scope`. Every notice re-fetches the
    /// scope. Keep the handle for as long as the consumer is mounted.
    pub fn subscribe(self: &Arc<Self>, scope: &str) -> Subscription {
        let listener = StoreReconciler {
            store: Arc::downgrade(self),
            scope: scope.to_string(),
            generation: self.generation.load(Ordering::SeqCst),
        };
        self.feed
            .subscribe(E::TABLE, self.scope_filter(scope), Arc::new(listener))
    }

    pub(crate) async fn reconcile(&self, scope: &str, generation: u64, notice: &ChangeNotice) {
        if generation != self.generation.load(Ordering::SeqCst) {
            log::debug!("Store({}): ignoring {} after reset", E::TABLE, notice.channel);
            return;
        }

        let current = self.state.read().scope.clone();
        let tracked = match current.as_deref() {
            Some(current) => current == scope,
            None => true,
        };
        if !tracked {
            log::debug!(
                "Store({}): {} no longer matches the store scope",
                E::TABLE,
                notice.channel
            );
            return;
        }

        self.sequencer.record_notice();
        log::debug!(
            "Store({}): {:?} on {} ({} event(s)), reconciling",
            E::TABLE,
            notice.kind,
            notice.channel,
            notice.coalesced
        );
        self.fetch(scope).await;
    }

    /// Back to Idle. In-flight fetches and channels opened before the reset
    /// no longer touch state.
    pub fn reset(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.sequencer.invalidate();
        *self.state.write() = StoreState::empty();
        self.bump();
    }
}

// ---------------------------------------------------------------------------
// Entity helpers
// ---------------------------------------------------------------------------

impl DomainStore<Task> {
    pub async fn update_status(&self, id: &str, status: TaskStatus) -> Result<Task, SyncError> {
        self.update(
            id,
            TaskPatch {
                status: Some(status),
                ..Default::default()
            },
        )
        .await
    }
}

impl DomainStore<TeamMember> {
    pub async fn update_role(&self, id: &str, role: TeamRole) -> Result<TeamMember, SyncError> {
        self.update(
            id,
            TeamMemberPatch {
                role: Some(role),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn update_status(&self, id: &str, status: MemberStatus) -> Result<TeamMember, SyncError> {
        self.update(
            id,
            TeamMemberPatch {
                status: Some(status),
                ..Default::default()
            },
        )
        .await
    }
}

impl DomainStore<ChatMessage> {
    /// Add `user_id` to the message's read flags. The merge happens against
    /// the stored row, so the message need not be loaded here. No write if
    /// the loaded copy already shows it read.
    pub async fn mark_read(&self, message_id: &str, user_id: &str) -> Result<ChatMessage, SyncError> {
        if let Some(current) = self.get(message_id) {
            if current.is_read_by(user_id) {
                return Ok(current);
            }
        }

        self.update(
            message_id,
            ChatMessagePatch {
                mark_read_by: Some(user_id.to_string()),
                ..Default::default()
            },
        )
        .await
    }

    pub fn unread_count(&self, user_id: &str) -> usize {
        self.state
            .read()
            .items
            .iter()
            .filter(|m| !m.is_read_by(user_id))
            .count()
    }
}

/// Totals over the loaded investments. Sums client-supplied values as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSummary {
    pub count: usize,
    pub total_invested: f64,
    pub total_current_value: f64,
    pub active: usize,
    pub completed: usize,
    pub pending: usize,
}

impl DomainStore<Investment> {
    pub fn portfolio_summary(&self) -> PortfolioSummary {
        let state = self.state.read();
        let mut summary = PortfolioSummary::default();
        for inv in &state.items {
            summary.count += 1;
            summary.total_invested += inv.amount_invested;
            summary.total_current_value += inv.current_value;
            match inv.status {
                InvestmentStatus::Active => summary.active += 1,
                InvestmentStatus::Completed => summary.completed += 1,
                InvestmentStatus::Pending => summary.pending += 1,
            }
        }
        summary
    }
}
