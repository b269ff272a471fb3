use rusqlite::{params, Connection, Row};

use super::*;
use crate::error::SyncError;
use crate::gateway::{require, Record, Table};
use crate::types::{TeamMember, TeamMemberDraft, TeamMemberPatch};

impl Record for TeamMember {
    type Draft = TeamMemberDraft;
    type Patch = TeamMemberPatch;

    const TABLE: Table = Table::TeamMembers;
    const SCOPE_COLUMN: &'static str = "project_id";
    const FILTER_COLUMNS: &'static [&'static str] = &["project_id", "user_id", "role", "status"];

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(draft: &TeamMemberDraft) -> Result<(), SyncError> {
        require("project_id", &draft.project_id)?;
        require("user_id", &draft.user_id)?;
        validate_salary(draft.salary)
    }

    fn validate_patch(patch: &TeamMemberPatch) -> Result<(), SyncError> {
        validate_salary(patch.salary.flatten())
    }
}

fn validate_salary(salary: Option<f64>) -> Result<(), SyncError> {
    match salary {
        Some(s) if !s.is_finite() || s < 0.0 => {
            Err(SyncError::validation(format!("salary must be a non-negative number, got {}", s)))
        }
        _ => Ok(()),
    }
}

impl SqlRecord for TeamMember {
    const COLUMNS: &'static str = "id, project_id, user_id, role, status, permissions, salary, \
         last_active_at, created_at, updated_at";

    const ORDER_BY: &'static str = "created_at ASC, rowid ASC";

    fn map_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(TeamMember {
            id: row.get(0)?,
            project_id: row.get(1)?,
            user_id: row.get(2)?,
            role: row.get(3)?,
            status: row.get(4)?,
            permissions: decode_string_list(5, row.get(5)?)?,
            salary: row.get(6)?,
            last_active_at: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn insert(conn: &Connection, draft: &TeamMemberDraft) -> Result<Self, DbError> {
        let now = now_timestamp();
        let member = TeamMember {
            id: new_row_id(),
            project_id: draft.project_id.clone(),
            user_id: draft.user_id.clone(),
            role: draft.role,
            status: draft.status,
            permissions: draft.permissions.clone(),
            salary: draft.salary,
            last_active_at: None,
            created_at: now.clone(),
            updated_at: now,
        };

        conn.execute(
            "INSERT INTO team_members (id, project_id, user_id, role, status, permissions,
                                       salary, last_active_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                member.id,
                member.project_id,
                member.user_id,
                member.role,
                member.status,
                encode_string_list("permissions", &member.permissions)?,
                member.salary,
                member.last_active_at,
                member.created_at,
                member.updated_at,
            ],
        )?;
        Ok(member)
    }

    fn apply_patch(conn: &Connection, id: &str, patch: &TeamMemberPatch) -> Result<usize, DbError> {
        let mut update = RowPatch::new(Self::TABLE.as_str());
        update.set("role", &patch.role);
        update.set("status", &patch.status);
        if let Some(permissions) = &patch.permissions {
            update.set_value("permissions", encode_string_list("permissions", permissions)?);
        }
        update.set("salary", &patch.salary);
        update.set("last_active_at", &patch.last_active_at);
        update.execute(conn, id)
    }
}
