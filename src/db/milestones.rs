use rusqlite::{params, Connection, Row};

use super::*;
use crate::error::SyncError;
use crate::gateway::{require, Record, Table};
use crate::types::{Milestone, MilestoneDraft, MilestonePatch};

impl Record for Milestone {
    type Draft = MilestoneDraft;
    type Patch = MilestonePatch;

    const TABLE: Table = Table::Milestones;
    const SCOPE_COLUMN: &'static str = "project_id";
    const FILTER_COLUMNS: &'static [&'static str] = &["project_id", "status"];

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(draft: &MilestoneDraft) -> Result<(), SyncError> {
        require("project_id", &draft.project_id)?;
        require("title", &draft.title)?;
        require("date", &draft.date)?;
        require("created_by", &draft.created_by)
    }

    fn validate_patch(patch: &MilestonePatch) -> Result<(), SyncError> {
        if let Some(title) = &patch.title {
            require("title", title)?;
        }
        if let Some(date) = &patch.date {
            require("date", date)?;
        }
        Ok(())
    }
}

impl SqlRecord for Milestone {
    const COLUMNS: &'static str =
        "id, project_id, title, date, status, created_by, created_at, updated_at";

    const ORDER_BY: &'static str = "date ASC, created_at ASC, rowid ASC";

    fn map_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Milestone {
            id: row.get(0)?,
            project_id: row.get(1)?,
            title: row.get(2)?,
            date: row.get(3)?,
            status: row.get(4)?,
            created_by: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn insert(conn: &Connection, draft: &MilestoneDraft) -> Result<Self, DbError> {
        let now = now_timestamp();
        let milestone = Milestone {
            id: new_row_id(),
            project_id: draft.project_id.clone(),
            title: draft.title.clone(),
            date: draft.date.clone(),
            status: draft.status,
            created_by: draft.created_by.clone(),
            created_at: now.clone(),
            updated_at: now,
        };

        conn.execute(
            "INSERT INTO milestones (id, project_id, title, date, status, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                milestone.id,
                milestone.project_id,
                milestone.title,
                milestone.date,
                milestone.status,
                milestone.created_by,
                milestone.created_at,
                milestone.updated_at,
            ],
        )?;
        Ok(milestone)
    }

    fn apply_patch(conn: &Connection, id: &str, patch: &MilestonePatch) -> Result<usize, DbError> {
        let mut update = RowPatch::new(Self::TABLE.as_str());
        update.set("title", &patch.title);
        update.set("date", &patch.date);
        update.set("status", &patch.status);
        update.execute(conn, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;
    use crate::types::MilestoneStatus;

    fn draft(title: &str, date: &str, status: MilestoneStatus) -> MilestoneDraft {
        MilestoneDraft {
            project_id: "p1".to_string(),
            title: title.to_string(),
            date: date.to_string(),
            status,
            created_by: "u1".to_string(),
        }
    }

    #[test]
    fn test_roadmap_is_chronological() {
        let db = test_db();
        let rows = db
            .with_conn(|conn| {
                Milestone::insert(conn, &draft("Launch", "2025-03-01", MilestoneStatus::Upcoming))?;
                Milestone::insert(conn, &draft("MVP", "2024-11-01", MilestoneStatus::Completed))?;
                Milestone::insert(conn, &draft("Beta", "2025-01-15", MilestoneStatus::Current))?;
                Milestone::select(conn, "project_id", "p1")
            })
            .expect("select");
        let titles: Vec<&str> = rows.iter().map(|m| m.title.as_str()).collect();
        assert_eq!(titles, vec!["MVP", "Beta", "Launch"]);
    }

    #[test]
    fn test_filter_by_status() {
        let db = test_db();
        let rows = db
            .with_conn(|conn| {
                Milestone::insert(conn, &draft("MVP", "2024-11-01", MilestoneStatus::Completed))?;
                Milestone::insert(conn, &draft("Beta", "2025-01-15", MilestoneStatus::Current))?;
                Milestone::select(conn, "status", "current")
            })
            .expect("select");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "Beta");
    }
}
