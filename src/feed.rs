//! Realtime change feed.
//!
//! Every committed write on the backing store publishes a row-level
//! `ChangeEvent`. Consumers open one logical channel per (table, filter) and
//! get a `ChangeNotice` for each matching insert, update or delete.
//!
//! Delivery is at-least-once with no ordering across rows. Bursts that arrive
//! together are coalesced into one notice, and a subscriber that falls behind
//! the broadcast buffer gets a single `Resync` notice instead of the dropped
//! events. Listeners are expected to re-read full state, never apply deltas.
//!
//! When the connection drops, each channel polls for it with exponential
//! backoff and, once reattached, emits `Resync` so its owner forces a fetch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::task::JoinHandle;

use crate::db::now_timestamp;
use crate::gateway::{Filter, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    /// Events may have been missed (lag or reconnect); re-read everything.
    Resync,
}

/// One committed row change, shaped like a realtime `postgres_changes`
/// payload: the new row for insert/update, the old row for update/delete.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    pub row_id: String,
    pub record: Option<Value>,
    pub old_record: Option<Value>,
    pub commit_timestamp: String,
}

impl ChangeEvent {
    fn new<R: Serialize>(table: Table, kind: ChangeKind, row_id: &str, new: Option<&R>, old: Option<&R>) -> Self {
        Self {
            table,
            kind,
            row_id: row_id.to_string(),
            record: new.and_then(|r| serde_json::to_value(r).ok()),
            old_record: old.and_then(|r| serde_json::to_value(r).ok()),
            commit_timestamp: now_timestamp(),
        }
    }

    pub fn insert<R: crate::gateway::Record>(row: &R) -> Self {
        Self::new(R::TABLE, ChangeKind::Insert, row.id(), Some(row), None)
    }

    pub fn update<R: crate::gateway::Record>(old: &R, new: &R) -> Self {
        Self::new(R::TABLE, ChangeKind::Update, new.id(), Some(new), Some(old))
    }

    pub fn delete<R: crate::gateway::Record>(old: &R) -> Self {
        Self::new(R::TABLE, ChangeKind::Delete, old.id(), None, Some(old))
    }

    /// True if either side of the change satisfies the filter. A row moved
    /// out of a scope still notifies that scope.
    pub fn matches(&self, table: Table, filter: &Filter) -> bool {
        self.table == table
            && (self.record.as_ref().is_some_and(|r| filter.matches(r))
                || self.old_record.as_ref().is_some_and(|r| filter.matches(r)))
    }
}

/// What a listener receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotice {
    pub channel: String,
    pub kind: ChangeKind,
    /// Row of the last event in the batch; `None` for resyncs.
    pub row_id: Option<String>,
    /// Number of events folded into this notice.
    pub coalesced: usize,
}

impl ChangeNotice {
    fn resync(channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
            kind: ChangeKind::Resync,
            row_id: None,
            coalesced: 0,
        }
    }
}

#[async_trait]
pub trait ChangeListener: Send + Sync + 'static {
    async fn on_change(&self, notice: ChangeNotice);
}

/// Feed tuning, normally taken from `SyncConfig`.
#[derive(Debug, Clone)]
pub struct FeedOptions {
    /// Broadcast buffer per connection; slower subscribers get a resync.
    pub buffer: usize,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            buffer: 256,
            reconnect_base: Duration::from_millis(250),
            reconnect_max: Duration::from_secs(30),
        }
    }
}

/// Backoff delay for the given attempt (0-based): `base * 2^attempt`, capped.
pub fn backoff_delay(options: &FeedOptions, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
    options
        .reconnect_base
        .checked_mul(factor)
        .unwrap_or(options.reconnect_max)
        .min(options.reconnect_max)
}

struct FeedInner {
    options: FeedOptions,
    /// `None` while disconnected.
    link: RwLock<Option<broadcast::Sender<Arc<ChangeEvent>>>>,
    channels: Mutex<HashMap<u64, String>>,
    next_channel: AtomicU64,
}

impl FeedInner {
    fn attach(&self) -> Option<broadcast::Receiver<Arc<ChangeEvent>>> {
        self.link.read().as_ref().map(|tx| tx.subscribe())
    }
}

/// Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct ChangeFeed {
    inner: Arc<FeedInner>,
}

impl ChangeFeed {
    pub fn new(options: FeedOptions) -> Self {
        let (tx, _) = broadcast::channel(options.buffer.max(1));
        Self {
            inner: Arc::new(FeedInner {
                options,
                link: RwLock::new(Some(tx)),
                channels: Mutex::new(HashMap::new()),
                next_channel: AtomicU64::new(1),
            }),
        }
    }

    /// Deliver an event to every attached channel. Events published while
    /// disconnected are lost, as they would be on the wire.
    pub fn publish(&self, event: ChangeEvent) {
        match self.inner.link.read().as_ref() {
            Some(tx) => {
                // Err only means no channel is open.
                let _ = tx.send(Arc::new(event));
            }
            None => {
                log::debug!(
                    "Feed: disconnected, dropped {:?} on {} {}",
                    event.kind,
                    event.table,
                    event.row_id
                );
            }
        }
    }

    /// Open a channel for `table` rows matching `filter`.
    ///
    /// The returned handle owns the channel: call `unsubscribe()` (or drop it)
    /// when the consumer goes away. Must be called inside a tokio runtime.
    pub fn subscribe(
        &self,
        table: Table,
        filter: Filter,
        listener: Arc<dyn ChangeListener>,
    ) -> Subscription {
        let id = self.inner.next_channel.fetch_add(1, Ordering::Relaxed);
        let name = format!("realtime:{}:{}", table, filter);
        self.inner.channels.lock().insert(id, name.clone());

        // Attach before spawning so nothing published after this call is missed.
        let rx = self.inner.attach();
        let task = tokio::spawn(run_channel(
            Arc::downgrade(&self.inner),
            table,
            filter,
            name.clone(),
            listener,
            rx,
        ));

        log::debug!("Feed: opened channel {}", name);
        Subscription {
            id,
            name,
            feed: Arc::downgrade(&self.inner),
            task: Some(task),
        }
    }

    /// Number of channels currently open.
    pub fn channel_count(&self) -> usize {
        self.inner.channels.lock().len()
    }

    /// Names of the open channels.
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.channels.lock().values().cloned().collect();
        names.sort();
        names
    }

    /// Every event published from now on, unfiltered and uncoalesced.
    #[cfg(test)]
    pub(crate) fn tap(&self) -> broadcast::Receiver<Arc<ChangeEvent>> {
        self.inner.attach().expect("feed is connected")
    }

    pub fn is_connected(&self) -> bool {
        self.inner.link.read().is_some()
    }

    /// Drop the connection. Every channel sees its stream close and starts
    /// polling for a new one.
    pub fn disconnect(&self) {
        if self.inner.link.write().take().is_some() {
            log::warn!("Feed: connection dropped");
        }
    }

    /// Restore the connection. Channels reattach on their next backoff tick.
    pub fn reconnect(&self) {
        let mut link = self.inner.link.write();
        if link.is_none() {
            let (tx, _) = broadcast::channel(self.inner.options.buffer.max(1));
            *link = Some(tx);
            log::info!("Feed: connection restored");
        }
    }
}

/// Handle for one open channel.
pub struct Subscription {
    id: u64,
    name: String,
    feed: Weak<FeedInner>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.name
    }

    /// Release the channel.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        task.abort();
        if let Some(feed) = self.feed.upgrade() {
            feed.channels.lock().remove(&self.id);
        }
        log::debug!("Feed: closed channel {}", self.name);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("channel", &self.name).finish()
    }
}

// ---------------------------------------------------------------------------
// Channel task
// ---------------------------------------------------------------------------

enum Batch {
    /// Matching events folded together; `closed` if the stream ended mid-drain.
    Changes { last: Arc<ChangeEvent>, count: usize, closed: bool },
    Lagged(u64),
    Closed,
}

async fn run_channel(
    feed: Weak<FeedInner>,
    table: Table,
    filter: Filter,
    name: String,
    listener: Arc<dyn ChangeListener>,
    mut rx: Option<broadcast::Receiver<Arc<ChangeEvent>>>,
) {
    loop {
        let mut stream = match rx.take() {
            Some(stream) => stream,
            None => {
                let Some(stream) = wait_for_connection(&feed, &name).await else {
                    return;
                };
                listener.on_change(ChangeNotice::resync(&name)).await;
                stream
            }
        };

        loop {
            match next_batch(&mut stream, table, &filter).await {
                Batch::Changes { last, count, closed } => {
                    listener
                        .on_change(ChangeNotice {
                            channel: name.clone(),
                            kind: last.kind,
                            row_id: Some(last.row_id.clone()),
                            coalesced: count,
                        })
                        .await;
                    if closed {
                        break;
                    }
                }
                Batch::Lagged(missed) => {
                    log::warn!("Feed: {} lagged by {} event(s), forcing resync", name, missed);
                    listener.on_change(ChangeNotice::resync(&name)).await;
                }
                Batch::Closed => break,
            }
        }

        log::warn!("Feed: {} lost its connection", name);
    }
}

/// Wait for the next matching event, then fold in whatever else is already
/// queued.
async fn next_batch(
    stream: &mut broadcast::Receiver<Arc<ChangeEvent>>,
    table: Table,
    filter: &Filter,
) -> Batch {
    let first = loop {
        match stream.recv().await {
            Ok(event) if event.matches(table, filter) => break event,
            Ok(_) => continue,
            Err(RecvError::Lagged(n)) => return Batch::Lagged(n),
            Err(RecvError::Closed) => return Batch::Closed,
        }
    };

    let mut last = first;
    let mut count = 1;
    loop {
        match stream.try_recv() {
            Ok(event) => {
                if event.matches(table, filter) {
                    last = event;
                    count += 1;
                }
            }
            Err(TryRecvError::Empty) => break,
            // The resync that follows covers anything skipped.
            Err(TryRecvError::Lagged(n)) => return Batch::Lagged(n),
            Err(TryRecvError::Closed) => {
                return Batch::Changes {
                    last,
                    count,
                    closed: true,
                }
            }
        }
    }

    Batch::Changes {
        last,
        count,
        closed: false,
    }
}

/// Poll for a live connection with exponential backoff. Returns `None` once
/// the feed itself is gone.
async fn wait_for_connection(
    feed: &Weak<FeedInner>,
    name: &str,
) -> Option<broadcast::Receiver<Arc<ChangeEvent>>> {
    let mut attempt: u32 = 0;
    loop {
        let delay = {
            let inner = feed.upgrade()?;
            backoff_delay(&inner.options, attempt)
        };
        tokio::time::sleep(delay).await;

        let inner = feed.upgrade()?;
        if let Some(rx) = inner.attach() {
            log::info!("Feed: {} reattached after {} attempt(s)", name, attempt + 1);
            return Some(rx);
        }
        attempt = attempt.saturating_add(1);
        log::debug!("Feed: {} still disconnected (attempt {})", name, attempt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Task, TaskPriority, TaskStatus};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    struct Recorder(mpsc::UnboundedSender<ChangeNotice>);

    #[async_trait]
    impl ChangeListener for Recorder {
        async fn on_change(&self, notice: ChangeNotice) {
            let _ = self.0.send(notice);
        }
    }

    fn recorder() -> (Arc<dyn ChangeListener>, mpsc::UnboundedReceiver<ChangeNotice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Recorder(tx)), rx)
    }

    fn task(id: &str, project: &str) -> Task {
        Task {
            id: id.to_string(),
            title: "t".to_string(),
            description: None,
            due_date: "2024-12-01".to_string(),
            priority: TaskPriority::Low,
            status: TaskStatus::Todo,
            project_id: Some(project.to_string()),
            assignee_id: None,
            created_by: "u1".to_string(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn fast_options() -> FeedOptions {
        FeedOptions {
            buffer: 16,
            reconnect_base: Duration::from_millis(5),
            reconnect_max: Duration::from_millis(20),
        }
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<ChangeNotice>) -> ChangeNotice {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("notice within 2s")
            .expect("channel open")
    }

    #[tokio::test]
    async fn test_only_matching_rows_notify() {
        let feed = ChangeFeed::new(fast_options());
        let (listener, mut rx) = recorder();
        let sub = feed.subscribe(Table::Tasks, Filter::eq("project_id", "p1"), listener);
        assert_eq!(sub.channel(), "realtime:tasks:project_id=eq.p1");

        feed.publish(ChangeEvent::insert(&task("other", "p2")));
        feed.publish(ChangeEvent::insert(&task("mine", "p1")));

        let notice = next(&mut rx).await;
        assert_eq!(notice.kind, ChangeKind::Insert);
        assert_eq!(notice.row_id.as_deref(), Some("mine"));
        assert_eq!(notice.coalesced, 1);
    }

    #[tokio::test]
    async fn test_delete_matches_on_old_row() {
        let feed = ChangeFeed::new(fast_options());
        let (listener, mut rx) = recorder();
        let _sub = feed.subscribe(Table::Tasks, Filter::eq("project_id", "p1"), listener);

        feed.publish(ChangeEvent::delete(&task("gone", "p1")));
        let notice = next(&mut rx).await;
        assert_eq!(notice.kind, ChangeKind::Delete);
    }

    #[tokio::test]
    async fn test_move_out_of_scope_notifies_old_scope() {
        let feed = ChangeFeed::new(fast_options());
        let (listener, mut rx) = recorder();
        let _sub = feed.subscribe(Table::Tasks, Filter::eq("project_id", "p1"), listener);

        feed.publish(ChangeEvent::update(&task("t", "p1"), &task("t", "p2")));
        assert_eq!(next(&mut rx).await.kind, ChangeKind::Update);
    }

    #[tokio::test]
    async fn test_other_tables_ignored() {
        let feed = ChangeFeed::new(fast_options());
        let (listener, mut rx) = recorder();
        let _sub = feed.subscribe(Table::Milestones, Filter::eq("project_id", "p1"), listener);

        feed.publish(ChangeEvent::insert(&task("t", "p1")));
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_burst_is_coalesced() {
        let feed = ChangeFeed::new(fast_options());
        let (listener, mut rx) = recorder();
        let _sub = feed.subscribe(Table::Tasks, Filter::eq("project_id", "p1"), listener);

        // Current-thread runtime: the channel task cannot run until we yield.
        for i in 0..5 {
            feed.publish(ChangeEvent::insert(&task(&format!("t{i}"), "p1")));
        }

        let notice = next(&mut rx).await;
        assert_eq!(notice.coalesced, 5);
        assert_eq!(notice.row_id.as_deref(), Some("t4"));
    }

    #[tokio::test]
    async fn test_lagging_subscriber_gets_resync() {
        let feed = ChangeFeed::new(FeedOptions {
            buffer: 2,
            ..fast_options()
        });
        let (listener, mut rx) = recorder();
        let _sub = feed.subscribe(Table::Tasks, Filter::eq("project_id", "p1"), listener);

        for i in 0..10 {
            feed.publish(ChangeEvent::insert(&task(&format!("t{i}"), "p1")));
        }

        let notice = next(&mut rx).await;
        assert_eq!(notice.kind, ChangeKind::Resync);
    }

    #[tokio::test]
    async fn test_unsubscribe_releases_channel() {
        let feed = ChangeFeed::new(fast_options());
        let (listener, mut rx) = recorder();
        let sub = feed.subscribe(Table::Tasks, Filter::eq("project_id", "p1"), listener);
        assert_eq!(feed.channel_count(), 1);

        sub.unsubscribe();
        assert_eq!(feed.channel_count(), 0);

        feed.publish(ChangeEvent::insert(&task("late", "p1")));
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.ok().flatten().is_none());
    }

    #[tokio::test]
    async fn test_drop_releases_channel() {
        let feed = ChangeFeed::new(fast_options());
        {
            let (listener, _rx) = recorder();
            let _sub = feed.subscribe(Table::Tasks, Filter::eq("project_id", "p1"), listener);
            assert_eq!(feed.channel_names(), vec!["realtime:tasks:project_id=eq.p1".to_string()]);
        }
        assert_eq!(feed.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_reconnect_delivers_resync() {
        let feed = ChangeFeed::new(fast_options());
        let (listener, mut rx) = recorder();
        let _sub = feed.subscribe(Table::Tasks, Filter::eq("project_id", "p1"), listener);

        feed.disconnect();
        assert!(!feed.is_connected());
        // Lost on the wire.
        feed.publish(ChangeEvent::insert(&task("missed", "p1")));
        tokio::time::sleep(Duration::from_millis(30)).await;

        feed.reconnect();
        let notice = next(&mut rx).await;
        assert_eq!(notice.kind, ChangeKind::Resync);

        feed.publish(ChangeEvent::insert(&task("after", "p1")));
        let notice = next(&mut rx).await;
        assert_eq!(notice.row_id.as_deref(), Some("after"));
    }

    #[tokio::test]
    async fn test_subscribe_while_disconnected_resyncs_on_connect() {
        let feed = ChangeFeed::new(fast_options());
        feed.disconnect();

        let (listener, mut rx) = recorder();
        let _sub = feed.subscribe(Table::Tasks, Filter::eq("project_id", "p1"), listener);
        feed.reconnect();

        assert_eq!(next(&mut rx).await.kind, ChangeKind::Resync);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let options = FeedOptions {
            buffer: 8,
            reconnect_base: Duration::from_millis(100),
            reconnect_max: Duration::from_millis(1000),
        };
        assert_eq!(backoff_delay(&options, 0), Duration::from_millis(100));
        assert_eq!(backoff_delay(&options, 1), Duration::from_millis(200));
        assert_eq!(backoff_delay(&options, 3), Duration::from_millis(800));
        assert_eq!(backoff_delay(&options, 4), Duration::from_millis(1000));
        assert_eq!(backoff_delay(&options, 40), Duration::from_millis(1000));
    }
}
