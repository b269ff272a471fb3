use rusqlite::{params, Connection, Row};

use super::*;
use crate::error::SyncError;
use crate::gateway::{require, Record, Table};
use crate::types::{Task, TaskDraft, TaskPatch};

impl Record for Task {
    type Draft = TaskDraft;
    type Patch = TaskPatch;

    const TABLE: Table = Table::Tasks;
    const SCOPE_COLUMN: &'static str = "project_id";
    const FILTER_COLUMNS: &'static [&'static str] =
        &["project_id", "assignee_id", "created_by", "status"];

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(draft: &TaskDraft) -> Result<(), SyncError> {
        require("title", &draft.title)?;
        require("due_date", &draft.due_date)?;
        require("created_by", &draft.created_by)
    }

    fn validate_patch(patch: &TaskPatch) -> Result<(), SyncError> {
        if let Some(title) = &patch.title {
            require("title", title)?;
        }
        if let Some(due) = &patch.due_date {
            require("due_date", due)?;
        }
        Ok(())
    }
}

impl SqlRecord for Task {
    const COLUMNS: &'static str = "id, title, description, due_date, priority, status, \
         project_id, assignee_id, created_by, created_at, updated_at";

    // Soonest first; ties keep insertion order.
    const ORDER_BY: &'static str = "due_date ASC, created_at ASC, rowid ASC";

    fn map_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Task {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            due_date: row.get(3)?,
            priority: row.get(4)?,
            status: row.get(5)?,
            project_id: row.get(6)?,
            assignee_id: row.get(7)?,
            created_by: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn insert(conn: &Connection, draft: &TaskDraft) -> Result<Self, DbError> {
        let now = now_timestamp();
        let task = Task {
            id: new_row_id(),
            title: draft.title.clone(),
            description: draft.description.clone(),
            due_date: draft.due_date.clone(),
            priority: draft.priority,
            status: draft.status,
            project_id: draft.project_id.clone(),
            assignee_id: draft.assignee_id.clone(),
            created_by: draft.created_by.clone(),
            created_at: now.clone(),
            updated_at: now,
        };

        conn.execute(
            "INSERT INTO tasks (id, title, description, due_date, priority, status,
                                project_id, assignee_id, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                task.id,
                task.title,
                task.description,
                task.due_date,
                task.priority,
                task.status,
                task.project_id,
                task.assignee_id,
                task.created_by,
                task.created_at,
                task.updated_at,
            ],
        )?;
        Ok(task)
    }

    fn apply_patch(conn: &Connection, id: &str, patch: &TaskPatch) -> Result<usize, DbError> {
        let mut update = RowPatch::new(Self::TABLE.as_str());
        update.set("title", &patch.title);
        update.set("description", &patch.description);
        update.set("due_date", &patch.due_date);
        update.set("priority", &patch.priority);
        update.set("status", &patch.status);
        update.set("project_id", &patch.project_id);
        update.set("assignee_id", &patch.assignee_id);
        update.execute(conn, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;
    use crate::types::{TaskPriority, TaskStatus};

    fn draft(title: &str, due: &str) -> TaskDraft {
        TaskDraft {
            title: title.to_string(),
            description: Some("notes".to_string()),
            due_date: due.to_string(),
            priority: TaskPriority::Medium,
            status: TaskStatus::Todo,
            project_id: Some("p1".to_string()),
            assignee_id: Some("u2".to_string()),
            created_by: "u1".to_string(),
        }
    }

    #[test]
    fn test_select_orders_by_due_date() {
        let db = test_db();
        let rows = db
            .with_conn(|conn| {
                Task::insert(conn, &draft("later", "2024-12-20"))?;
                Task::insert(conn, &draft("sooner", "2024-12-01"))?;
                Task::select(conn, "project_id", "p1")
            })
            .expect("select");
        let titles: Vec<&str> = rows.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["sooner", "later"]);
    }

    #[test]
    fn test_patch_can_clear_nullable_columns() {
        let db = test_db();
        let task = db
            .with_conn(|conn| {
                let task = Task::insert(conn, &draft("t", "2024-12-01"))?;
                let patch = TaskPatch {
                    assignee_id: Some(None),
                    description: Some(None),
                    ..Default::default()
                };
                Task::apply_patch(conn, &task.id, &patch)?;
                Task::get(conn, &task.id)
            })
            .expect("patch")
            .expect("row");
        assert!(task.assignee_id.is_none());
        assert!(task.description.is_none());
        assert_eq!(task.title, "t");
    }

    #[test]
    fn test_select_by_assignee() {
        let db = test_db();
        let rows = db
            .with_conn(|conn| {
                Task::insert(conn, &draft("mine", "2024-12-01"))?;
                Task::select(conn, "assignee_id", "u2")
            })
            .expect("select");
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_validate_rejects_blank_due_date() {
        let err = Task::validate(&draft("t", "")).expect_err("blank due date");
        assert!(err.to_string().contains("due_date"));
    }
}
