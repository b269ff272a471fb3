//! Remote table gateway.
//!
//! Translates a domain operation (fetch by scope, create, patch, delete) into
//! a filtered statement against the backing store, and publishes a change
//! event for every row a committed write touched so every subscribed session
//! hears about it. Each call is its own transaction; multi-entity flows are
//! independent calls that can partially fail.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;

use crate::db::{with_transaction, RemoteDb, SqlRecord};
use crate::error::SyncError;
use crate::feed::{ChangeEvent, ChangeFeed, FeedOptions};

/// Remote tables the client mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    TeamMembers,
    Tasks,
    Investments,
    Milestones,
    Chats,
    ChatMessages,
    CalendarEvents,
    ActivityLog,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::TeamMembers => "team_members",
            Table::Tasks => "tasks",
            Table::Investments => "investments",
            Table::Milestones => "milestones",
            Table::Chats => "chats",
            Table::ChatMessages => "chat_messages",
            Table::CalendarEvents => "calendar_events",
            Table::ActivityLog => "activity_log",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mirrored row type.
pub trait Record: Clone + Serialize + Send + Sync + 'static {
    type Draft: Send + Sync + 'static;
    type Patch: Send + Sync + 'static;

    const TABLE: Table;

    /// Column a store scopes its list by (usually `project_id`).
    const SCOPE_COLUMN: &'static str;

    /// Columns accepted in fetch and subscription filters.
    const FILTER_COLUMNS: &'static [&'static str];

    fn id(&self) -> &str;

    /// Required-field checks, run before any remote call.
    fn validate(draft: &Self::Draft) -> Result<(), SyncError>;

    fn validate_patch(_patch: &Self::Patch) -> Result<(), SyncError> {
        Ok(())
    }

    /// Checks that need the stored row, run against it just before the patch
    /// is written.
    fn validate_merged(&self, _patch: &Self::Patch) -> Result<(), SyncError> {
        Ok(())
    }

    /// Resolve a filter column to its static name.
    fn filter_column(column: &str) -> Result<&'static str, SyncError> {
        Self::FILTER_COLUMNS
            .iter()
            .copied()
            .find(|c| *c == column)
            .ok_or_else(|| {
                SyncError::Validation(format!(
                    "{} cannot be filtered by '{}'",
                    Self::TABLE,
                    column
                ))
            })
    }
}

/// Reject blank required text fields.
pub(crate) fn require(field: &str, value: &str) -> Result<(), SyncError> {
    if value.trim().is_empty() {
        return Err(SyncError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

/// Equality filter on one column, the only predicate stores use.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Does a serialized row satisfy the filter? Array columns (chat
    /// participants) match when they contain the value.
    pub fn matches(&self, row: &Value) -> bool {
        match row.get(&self.column) {
            Some(Value::String(s)) => *s == self.value,
            Some(Value::Array(items)) => items.iter().any(|v| v.as_str() == Some(self.value.as_str())),
            _ => false,
        }
    }

    pub fn matches_record<E: Serialize>(&self, record: &E) -> bool {
        serde_json::to_value(record)
            .map(|v| self.matches(&v))
            .unwrap_or(false)
    }
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}=eq.{}", self.column, self.value)
    }
}

// ---------------------------------------------------------------------------
// Gateway contract
// ---------------------------------------------------------------------------

#[async_trait]
pub trait TableGateway<E: Record>: Send + Sync {
    /// All rows matching the filter in the table's default order. No rows is
    /// an empty list, not an error.
    async fn fetch(&self, filter: &Filter) -> Result<Vec<E>, SyncError>;

    /// Insert one row; returns it with server-assigned id and timestamps.
    async fn create(&self, draft: E::Draft) -> Result<E, SyncError>;

    /// Patch the named fields of an existing row.
    async fn update(&self, id: &str, patch: E::Patch) -> Result<E, SyncError>;

    /// Remove a row. `Ok(false)` when nothing matched.
    async fn delete(&self, id: &str) -> Result<bool, SyncError>;
}

// ---------------------------------------------------------------------------
// SQLite-backed implementation
// ---------------------------------------------------------------------------

/// The backing store shared by every client session: tables plus the
/// realtime change feed they publish into.
pub struct Backend {
    db: RemoteDb,
    feed: ChangeFeed,
}

impl Backend {
    pub fn new(db: RemoteDb, options: FeedOptions) -> Arc<Self> {
        Arc::new(Self {
            db,
            feed: ChangeFeed::new(options),
        })
    }

    pub fn db(&self) -> &RemoteDb {
        &self.db
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub fn gateway<E: SqlRecord>(self: &Arc<Self>) -> Arc<dyn TableGateway<E>> {
        Arc::new(SqliteGateway::<E>::new(Arc::clone(self)))
    }
}

pub struct SqliteGateway<E> {
    backend: Arc<Backend>,
    _record: PhantomData<fn() -> E>,
}

impl<E: SqlRecord> SqliteGateway<E> {
    pub fn new(backend: Arc<Backend>) -> Self {
        Self {
            backend,
            _record: PhantomData,
        }
    }

    fn not_found(id: &str) -> SyncError {
        SyncError::NotFound {
            table: E::TABLE.as_str(),
            id: id.to_string(),
        }
    }

    /// Run one statement group on the blocking pool with the connection
    /// locked, keeping SQLite off the async workers.
    async fn run<T, F>(&self, f: F) -> Result<T, SyncError>
    where
        F: FnOnce(&Connection) -> Result<T, SyncError> + Send + 'static,
        T: Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        let outcome = tokio::task::spawn_blocking(move || backend.db().with_conn(|conn| Ok(f(conn))))
            .await
            .map_err(|e| SyncError::Remote(format!("{} call aborted: {}", E::TABLE, e)))?;
        outcome?
    }

    /// Primary event first, then the rows the write touched elsewhere.
    fn publish_all(&self, primary: ChangeEvent, related: Vec<ChangeEvent>) {
        let feed = self.backend.feed();
        feed.publish(primary);
        for event in related {
            feed.publish(event);
        }
    }
}

#[async_trait]
impl<E: SqlRecord> TableGateway<E> for SqliteGateway<E> {
    async fn fetch(&self, filter: &Filter) -> Result<Vec<E>, SyncError> {
        let column = E::filter_column(&filter.column)?;
        let value = filter.value.clone();
        let rows = self
            .run(move |conn| Ok(E::select(conn, column, &value)?))
            .await?;
        log::debug!("Gateway: {} {} -> {} row(s)", E::TABLE, filter, rows.len());
        Ok(rows)
    }

    async fn create(&self, draft: E::Draft) -> Result<E, SyncError> {
        E::validate(&draft)?;
        let (row, related) = self
            .run(move |conn| {
                Ok(with_transaction(conn, |conn| {
                    let row = E::insert(conn, &draft)?;
                    let related = E::after_insert(conn, &row)?;
                    Ok((row, related))
                })?)
            })
            .await?;
        log::debug!("Gateway: inserted {} {}", E::TABLE, row.id());
        self.publish_all(ChangeEvent::insert(&row), related);
        Ok(row)
    }

    async fn update(&self, id: &str, patch: E::Patch) -> Result<E, SyncError> {
        E::validate_patch(&patch)?;
        let id = id.to_string();
        let (old, new) = self
            .run(move |conn| {
                let old = E::get(conn, &id)?.ok_or_else(|| Self::not_found(&id))?;
                old.validate_merged(&patch)?;
                let new = with_transaction(conn, |conn| {
                    E::apply_patch(conn, &id, &patch)?;
                    E::get(conn, &id)
                })?;
                let new = new.ok_or_else(|| Self::not_found(&id))?;
                Ok((old, new))
            })
            .await?;

        self.backend.feed().publish(ChangeEvent::update(&old, &new));
        Ok(new)
    }

    async fn delete(&self, id: &str) -> Result<bool, SyncError> {
        let id = id.to_string();
        let removed = self
            .run(move |conn| {
                let Some(old) = E::get(conn, &id)? else {
                    log::debug!("Gateway: delete {} {} matched nothing", E::TABLE, id);
                    return Ok(None);
                };
                let related = with_transaction(conn, |conn| {
                    let related = E::before_remove(conn, &old)?;
                    E::remove(conn, &id)?;
                    Ok(related)
                })?;
                Ok(Some((old, related)))
            })
            .await?;

        match removed {
            Some((old, related)) => {
                if !related.is_empty() {
                    log::debug!(
                        "Gateway: deleting {} {} removed {} related row(s)",
                        E::TABLE,
                        old.id(),
                        related.len()
                    );
                }
                self.publish_all(ChangeEvent::delete(&old), related);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
