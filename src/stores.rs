//! Store registry.
//!
//! One `Stores` per signed-in session. Each domain store is built the first
//! time it is asked for and lives until the registry is dropped; `reset()`
//! empties them all on logout.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::db::SqlRecord;
use crate::feed::Subscription;
use crate::gateway::{Backend, Table};
use crate::store::*;

pub struct Stores {
    backend: Arc<Backend>,
    team: OnceLock<Arc<TeamStore>>,
    tasks: OnceLock<Arc<TaskStore>>,
    investments: OnceLock<Arc<InvestmentStore>>,
    milestones: OnceLock<Arc<MilestoneStore>>,
    chats: OnceLock<Arc<ChatStore>>,
    messages: OnceLock<Arc<MessageStore>>,
    events: OnceLock<Arc<EventStore>>,
    activity: OnceLock<Arc<ActivityStore>>,
    /// Channels kept open on behalf of views until logout.
    subscriptions: Mutex<Vec<Subscription>>,
}

impl Stores {
    pub fn new(backend: Arc<Backend>) -> Self {
        Self {
            backend,
            team: OnceLock::new(),
            tasks: OnceLock::new(),
            investments: OnceLock::new(),
            milestones: OnceLock::new(),
            chats: OnceLock::new(),
            messages: OnceLock::new(),
            events: OnceLock::new(),
            activity: OnceLock::new(),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    fn build<E: SqlRecord>(&self) -> Arc<DomainStore<E>> {
        log::debug!("Stores: initialising {} store", E::TABLE);
        DomainStore::new(self.backend.gateway::<E>(), self.backend.feed().clone())
    }

    pub fn team(&self) -> &Arc<TeamStore> {
        self.team.get_or_init(|| self.build())
    }

    pub fn tasks(&self) -> &Arc<TaskStore> {
        self.tasks.get_or_init(|| self.build())
    }

    pub fn investments(&self) -> &Arc<InvestmentStore> {
        self.investments.get_or_init(|| self.build())
    }

    pub fn milestones(&self) -> &Arc<MilestoneStore> {
        self.milestones.get_or_init(|| self.build())
    }

    pub fn chats(&self) -> &Arc<ChatStore> {
        self.chats.get_or_init(|| self.build())
    }

    pub fn messages(&self) -> &Arc<MessageStore> {
        self.messages.get_or_init(|| self.build())
    }

    pub fn events(&self) -> &Arc<EventStore> {
        self.events.get_or_init(|| self.build())
    }

    pub fn activity(&self) -> &Arc<ActivityStore> {
        self.activity.get_or_init(|| self.build())
    }

    /// Tables whose store has been built so far.
    pub fn initialised(&self) -> Vec<Table> {
        let mut tables = Vec::new();
        if self.team.get().is_some() {
            tables.push(Table::TeamMembers);
        }
        if self.tasks.get().is_some() {
            tables.push(Table::Tasks);
        }
        if self.investments.get().is_some() {
            tables.push(Table::Investments);
        }
        if self.milestones.get().is_some() {
            tables.push(Table::Milestones);
        }
        if self.chats.get().is_some() {
            tables.push(Table::Chats);
        }
        if self.messages.get().is_some() {
            tables.push(Table::ChatMessages);
        }
        if self.events.get().is_some() {
            tables.push(Table::CalendarEvents);
        }
        if self.activity.get().is_some() {
            tables.push(Table::ActivityLog);
        }
        tables
    }

    /// Keep a channel open until `reset()`.
    pub fn retain(&self, subscription: Subscription) {
        self.subscriptions.lock().push(subscription);
    }

    pub fn retained_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Load every project-scoped store for `project_id` and keep them live.
    /// Must be called inside a tokio runtime.
    pub async fn open_project(&self, project_id: &str) {
        tokio::join!(
            self.team().fetch(project_id),
            self.tasks().fetch(project_id),
            self.milestones().fetch(project_id),
            self.events().fetch(project_id),
            self.activity().fetch(project_id),
        );

        let subs = [
            self.team().subscribe(project_id),
            self.tasks().subscribe(project_id),
            self.milestones().subscribe(project_id),
            self.events().subscribe(project_id),
            self.activity().subscribe(project_id),
        ];
        self.subscriptions.lock().extend(subs);
        log::info!("Stores: project {} loaded and subscribed", project_id);
    }

    /// Logout: close retained channels and return every built store to Idle.
    pub fn reset(&self) {
        let closed = {
            let mut subs = self.subscriptions.lock();
            std::mem::take(&mut *subs)
        };
        let channels = closed.len();
        drop(closed);

        if let Some(s) = self.team.get() {
            s.reset();
        }
        if let Some(s) = self.tasks.get() {
            s.reset();
        }
        if let Some(s) = self.investments.get() {
            s.reset();
        }
        if let Some(s) = self.milestones.get() {
            s.reset();
        }
        if let Some(s) = self.chats.get() {
            s.reset();
        }
        if let Some(s) = self.messages.get() {
            s.reset();
        }
        if let Some(s) = self.events.get() {
            s.reset();
        }
        if let Some(s) = self.activity.get() {
            s.reset();
        }
        log::info!("Stores: reset ({} channel(s) closed)", channels);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::test_support::test_backend;
    use crate::store::Phase;
    use crate::types::*;

    #[tokio::test]
    async fn test_stores_are_built_lazily_and_shared() {
        let stores = Stores::new(test_backend());
        assert!(stores.initialised().is_empty());

        let first = Arc::clone(stores.tasks());
        let second = Arc::clone(stores.tasks());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(stores.initialised(), vec![Table::Tasks]);
    }

    #[tokio::test]
    async fn test_open_project_subscribes_each_store() {
        let backend = test_backend();
        let stores = Stores::new(Arc::clone(&backend));
        stores.open_project("p1").await;

        assert_eq!(stores.retained_count(), 5);
        assert_eq!(backend.feed().channel_count(), 5);
        assert_eq!(stores.tasks().phase(), Phase::Ready);
        assert!(backend
            .feed()
            .channel_names()
            .contains(&"realtime:team_members:project_id=eq.p1".to_string()));
    }

    #[tokio::test]
    async fn test_reset_closes_channels_and_empties_stores() {
        let backend = test_backend();
        let stores = Stores::new(Arc::clone(&backend));
        stores.open_project("p1").await;
        stores
            .milestones()
            .create(MilestoneDraft {
                project_id: "p1".to_string(),
                title: "MVP".to_string(),
                date: "2024-11-01".to_string(),
                status: MilestoneStatus::Current,
                created_by: "u1".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(stores.milestones().snapshot().len(), 1);

        stores.reset();
        assert_eq!(stores.retained_count(), 0);
        assert_eq!(backend.feed().channel_count(), 0);
        let snap = stores.milestones().snapshot();
        assert_eq!(snap.phase, Phase::Idle);
        assert!(snap.is_empty());
    }
}
