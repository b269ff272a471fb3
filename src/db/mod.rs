//! SQLite mirror of the remote Launchpad tables.
//!
//! The database plays the role of the hosted relational store: every table the
//! web client reads and writes (team members, tasks, investments, milestones,
//! chats, messages, calendar events, activity log) lives here with the same
//! column names. Gateways lock the connection for the duration of one
//! statement group, so writes from different client sessions are serialised
//! per call and nothing else.

use std::path::PathBuf;

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::feed::ChangeEvent;
use crate::gateway::Record;

pub mod types;
pub use types::*;

pub mod activity;
pub mod chats;
pub mod events;
pub mod investments;
pub mod messages;
pub mod milestones;
pub mod tasks;
pub mod team_members;

pub struct RemoteDb {
    conn: Mutex<Connection>,
}

impl RemoteDb {
    /// Run a closure with the connection locked.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Connection) -> Result<T, DbError>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Open (or create) the database at `~/.launchpad/launchpad.db` and apply the schema.
    pub fn open() -> Result<Self, DbError> {
        let path = Self::db_path()?;
        Self::open_at(path)
    }

    /// Open a database at an explicit path.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::prepare(conn)
    }

    /// Open a private in-memory database. Nothing survives the handle.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> Result<Self, DbError> {
        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;

        // Set after migrations; chat messages cascade with their chat.
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Resolve the default database path: `~/.launchpad/launchpad.db`.
    pub fn db_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".launchpad").join("launchpad.db"))
    }
}

/// Execute a closure within a SQLite transaction.
/// Commits on Ok, rolls back on Err.
pub(crate) fn with_transaction<F, T>(conn: &Connection, f: F) -> Result<T, DbError>
where
    F: FnOnce(&Connection) -> Result<T, DbError>,
{
    conn.execute_batch("BEGIN IMMEDIATE")?;
    match f(conn) {
        Ok(val) => {
            conn.execute_batch("COMMIT")?;
            Ok(val)
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

/// Server-side timestamp. Fixed-width microseconds so text ordering matches time ordering.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Server-assigned row id.
pub fn new_row_id() -> String {
    Uuid::new_v4().to_string()
}

// ---------------------------------------------------------------------------
// Per-table SQL contract
// ---------------------------------------------------------------------------

/// SQL side of a mirrored table. Every statement the gateway issues goes
/// through these functions with the connection already locked; writes run
/// inside one transaction per gateway call.
pub trait SqlRecord: Record + Sized {
    /// Column list matching `map_row`, in order.
    const COLUMNS: &'static str;

    /// ORDER BY clause applied to scoped reads.
    const ORDER_BY: &'static str;

    fn map_row(row: &Row<'_>) -> rusqlite::Result<Self>;

    /// Insert a validated draft and return the stored row.
    fn insert(conn: &Connection, draft: &Self::Draft) -> Result<Self, DbError>;

    /// Apply a partial update. Returns the number of rows touched.
    fn apply_patch(conn: &Connection, id: &str, patch: &Self::Patch) -> Result<usize, DbError>;

    /// All rows where `column = value`, in the table's default order.
    /// `column` has already been checked against `Record::FILTER_COLUMNS`.
    fn select(conn: &Connection, column: &'static str, value: &str) -> Result<Vec<Self>, DbError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1 ORDER BY {}",
            Self::COLUMNS,
            Self::TABLE.as_str(),
            column,
            Self::ORDER_BY
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([value], Self::map_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn get(conn: &Connection, id: &str) -> Result<Option<Self>, DbError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = ?1",
            Self::COLUMNS,
            Self::TABLE.as_str()
        );
        Ok(conn.query_row(&sql, [id], Self::map_row).optional()?)
    }

    fn remove(conn: &Connection, id: &str) -> Result<usize, DbError> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", Self::TABLE.as_str());
        Ok(conn.execute(&sql, [id])?)
    }

    /// Writes to other tables that follow an insert, as change events for
    /// the rows they touched.
    fn after_insert(_conn: &Connection, _row: &Self) -> Result<Vec<ChangeEvent>, DbError> {
        Ok(Vec::new())
    }

    /// Rows of other tables that removing `old` takes with it. Runs before
    /// the delete so cascaded children can still be read.
    fn before_remove(_conn: &Connection, _old: &Self) -> Result<Vec<ChangeEvent>, DbError> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Partial updates
// ---------------------------------------------------------------------------

/// Builds `UPDATE <table> SET ... , updated_at = ? WHERE id = ?` from the
/// fields present in a patch. Column names are always static identifiers.
pub(crate) struct RowPatch {
    table: &'static str,
    sets: Vec<(&'static str, Box<dyn ToSql>)>,
}

impl RowPatch {
    pub(crate) fn new(table: &'static str) -> Self {
        Self {
            table,
            sets: Vec::new(),
        }
    }

    /// Set `column` when the patch carries a value for it.
    pub(crate) fn set<T: ToSql + Clone + 'static>(&mut self, column: &'static str, value: &Option<T>) {
        if let Some(v) = value {
            self.sets.push((column, Box::new(v.clone())));
        }
    }

    /// Set a column whose value has already been computed.
    pub(crate) fn set_value<T: ToSql + 'static>(&mut self, column: &'static str, value: T) {
        self.sets.push((column, Box::new(value)));
    }

    pub(crate) fn execute(self, conn: &Connection, id: &str) -> Result<usize, DbError> {
        let now = now_timestamp();
        let mut assignments: Vec<String> = self
            .sets
            .iter()
            .enumerate()
            .map(|(i, (column, _))| format!("{} = ?{}", column, i + 1))
            .collect();
        let n = self.sets.len();
        assignments.push(format!("updated_at = ?{}", n + 1));

        let sql = format!(
            "UPDATE {} SET {} WHERE id = ?{}",
            self.table,
            assignments.join(", "),
            n + 2
        );

        let mut param_refs: Vec<&dyn ToSql> = self.sets.iter().map(|(_, v)| v.as_ref()).collect();
        param_refs.push(&now);
        param_refs.push(&id);

        Ok(conn.execute(&sql, param_refs.as_slice())?)
    }
}

// =============================================================================
// Test utilities
// =============================================================================

#[cfg(test)]
pub mod test_utils {
    use super::RemoteDb;

    /// Create a temporary on-disk database for testing.
    ///
    /// We leak the `TempDir` so the directory persists for the duration of the test.
    pub fn test_db() -> RemoteDb {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("test.db");
        std::mem::forget(dir);
        RemoteDb::open_at(path).expect("Failed to open test database")
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::test_db;
    use super::*;

    #[test]
    fn test_open_applies_schema() {
        let db = test_db();
        let tables: Vec<String> = db
            .with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
                )?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .expect("list tables");

        for expected in [
            "activity_log",
            "calendar_events",
            "chat_messages",
            "chat_participants",
            "chats",
            "investments",
            "milestones",
            "schema_version",
            "tasks",
            "team_members",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing table {expected}");
        }
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = test_db();
        let result: Result<(), DbError> = db.with_conn(|conn| {
            with_transaction(conn, |conn| {
                conn.execute(
                    "INSERT INTO activity_log (id, project_id, actor_id, action, created_at, updated_at)
                     VALUES ('a1', 'p1', 'u1', 'task_created', '2024-01-01', '2024-01-01')",
                    [],
                )?;
                Err(DbError::Migration("forced".to_string()))
            })
        });
        assert!(result.is_err());

        let count: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM activity_log", [], |r| r.get(0))?))
            .expect("count");
        assert_eq!(count, 0);
    }

    #[test]
    fn test_timestamps_sort_lexicographically() {
        let a = now_timestamp();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = now_timestamp();
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }

    #[test]
    fn test_constraint_violation_detected() {
        let db = test_db();
        let insert = |conn: &Connection| -> Result<usize, DbError> {
            Ok(conn.execute(
                "INSERT INTO team_members (id, project_id, user_id, role, status, permissions, created_at, updated_at)
                 VALUES (?1, 'p1', 'u1', 'member', 'active', '[]', '2024-01-01', '2024-01-01')",
                [new_row_id()],
            )?)
        };
        db.with_conn(insert).expect("first insert");
        let err = db.with_conn(insert).expect_err("duplicate (project, user)");
        assert!(err.is_constraint_violation());
    }
}
