use chrono::DateTime;
use rusqlite::{params, Connection, Row};

use super::*;
use crate::error::SyncError;
use crate::gateway::{require, Record, Table};
use crate::types::{CalendarEvent, CalendarEventDraft, CalendarEventPatch};

impl Record for CalendarEvent {
    type Draft = CalendarEventDraft;
    type Patch = CalendarEventPatch;

    const TABLE: Table = Table::CalendarEvents;
    const SCOPE_COLUMN: &'static str = "project_id";
    const FILTER_COLUMNS: &'static [&'static str] = &["project_id", "created_by"];

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(draft: &CalendarEventDraft) -> Result<(), SyncError> {
        require("project_id", &draft.project_id)?;
        require("title", &draft.title)?;
        require("starts_at", &draft.starts_at)?;
        require("ends_at", &draft.ends_at)?;
        require("created_by", &draft.created_by)?;
        check_window(&draft.starts_at, &draft.ends_at)
    }

    fn validate_patch(patch: &CalendarEventPatch) -> Result<(), SyncError> {
        if let Some(title) = &patch.title {
            require("title", title)?;
        }
        Ok(())
    }

    /// Moving either end checks the window the row would end up with.
    fn validate_merged(&self, patch: &CalendarEventPatch) -> Result<(), SyncError> {
        if patch.starts_at.is_none() && patch.ends_at.is_none() {
            return Ok(());
        }
        let starts_at = patch.starts_at.as_deref().unwrap_or(&self.starts_at);
        let ends_at = patch.ends_at.as_deref().unwrap_or(&self.ends_at);
        check_window(starts_at, ends_at)
    }
}

/// Reject events that end before they start. Values that are not RFC 3339
/// are passed through untouched.
fn check_window(starts_at: &str, ends_at: &str) -> Result<(), SyncError> {
    if let (Ok(start), Ok(end)) = (
        DateTime::parse_from_rfc3339(starts_at),
        DateTime::parse_from_rfc3339(ends_at),
    ) {
        if end < start {
            return Err(SyncError::validation(format!(
                "event ends ({}) before it starts ({})",
                ends_at, starts_at
            )));
        }
    }
    Ok(())
}

impl SqlRecord for CalendarEvent {
    const COLUMNS: &'static str = "id, project_id, title, description, starts_at, ends_at, \
         location, created_by, created_at, updated_at";

    const ORDER_BY: &'static str = "starts_at ASC, rowid ASC";

    fn map_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(CalendarEvent {
            id: row.get(0)?,
            project_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            starts_at: row.get(4)?,
            ends_at: row.get(5)?,
            location: row.get(6)?,
            created_by: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn insert(conn: &Connection, draft: &CalendarEventDraft) -> Result<Self, DbError> {
        let now = now_timestamp();
        let event = CalendarEvent {
            id: new_row_id(),
            project_id: draft.project_id.clone(),
            title: draft.title.clone(),
            description: draft.description.clone(),
            starts_at: draft.starts_at.clone(),
            ends_at: draft.ends_at.clone(),
            location: draft.location.clone(),
            created_by: draft.created_by.clone(),
            created_at: now.clone(),
            updated_at: now,
        };

        conn.execute(
            "INSERT INTO calendar_events (id, project_id, title, description, starts_at, ends_at,
                                          location, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                event.id,
                event.project_id,
                event.title,
                event.description,
                event.starts_at,
                event.ends_at,
                event.location,
                event.created_by,
                event.created_at,
                event.updated_at,
            ],
        )?;
        Ok(event)
    }

    fn apply_patch(conn: &Connection, id: &str, patch: &CalendarEventPatch) -> Result<usize, DbError> {
        let mut update = RowPatch::new(Self::TABLE.as_str());
        update.set("title", &patch.title);
        update.set("description", &patch.description);
        update.set("starts_at", &patch.starts_at);
        update.set("ends_at", &patch.ends_at);
        update.set("location", &patch.location);
        update.execute(conn, id)
    }
}
