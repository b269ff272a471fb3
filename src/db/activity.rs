use rusqlite::{params, Connection, Row};

use super::*;
use crate::error::SyncError;
use crate::gateway::{require, Record, Table};
use crate::types::{ActivityDraft, ActivityEntry, ActivityPatch};

impl Record for ActivityEntry {
    type Draft = ActivityDraft;
    type Patch = ActivityPatch;

    const TABLE: Table = Table::ActivityLog;
    const SCOPE_COLUMN: &'static str = "project_id";
    const FILTER_COLUMNS: &'static [&'static str] = &["project_id", "actor_id", "subject_id"];

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(draft: &ActivityDraft) -> Result<(), SyncError> {
        require("project_id", &draft.project_id)?;
        require("actor_id", &draft.actor_id)?;
        require("action", &draft.action)
    }
}

impl SqlRecord for ActivityEntry {
    const COLUMNS: &'static str = "id, project_id, actor_id, action, subject_id, created_at, updated_at";

    // Feed order: most recent first.
    const ORDER_BY: &'static str = "created_at DESC, rowid DESC";

    fn map_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(ActivityEntry {
            id: row.get(0)?,
            project_id: row.get(1)?,
            actor_id: row.get(2)?,
            action: row.get(3)?,
            subject_id: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn insert(conn: &Connection, draft: &ActivityDraft) -> Result<Self, DbError> {
        let now = now_timestamp();
        let entry = ActivityEntry {
            id: new_row_id(),
            project_id: draft.project_id.clone(),
            actor_id: draft.actor_id.clone(),
            action: draft.action.clone(),
            subject_id: draft.subject_id.clone(),
            created_at: now.clone(),
            updated_at: now,
        };

        conn.execute(
            "INSERT INTO activity_log (id, project_id, actor_id, action, subject_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.id,
                entry.project_id,
                entry.actor_id,
                entry.action,
                entry.subject_id,
                entry.created_at,
                entry.updated_at,
            ],
        )?;
        Ok(entry)
    }

    fn apply_patch(conn: &Connection, id: &str, patch: &ActivityPatch) -> Result<usize, DbError> {
        let mut update = RowPatch::new(Self::TABLE.as_str());
        update.set("action", &patch.action);
        update.execute(conn, id)
    }
}
