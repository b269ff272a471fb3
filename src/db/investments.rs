use rusqlite::{params, Connection, Row};

use super::*;
use crate::error::SyncError;
use crate::gateway::{require, Record, Table};
use crate::types::{Investment, InvestmentDraft, InvestmentPatch};

impl Record for Investment {
    type Draft = InvestmentDraft;
    type Patch = InvestmentPatch;

    const TABLE: Table = Table::Investments;
    // An investor's portfolio spans projects.
    const SCOPE_COLUMN: &'static str = "user_id";
    const FILTER_COLUMNS: &'static [&'static str] = &["user_id", "project_id", "status"];

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(draft: &InvestmentDraft) -> Result<(), SyncError> {
        require("user_id", &draft.user_id)?;
        require("project_id", &draft.project_id)?;
        check_amount("amount_invested", Some(draft.amount_invested))?;
        check_amount("current_value", Some(draft.current_value))?;
        check_finite("roi", Some(draft.roi))?;
        check_finite("progress", Some(draft.progress))
    }

    fn validate_patch(patch: &InvestmentPatch) -> Result<(), SyncError> {
        check_amount("amount_invested", patch.amount_invested)?;
        check_amount("current_value", patch.current_value)?;
        check_finite("roi", patch.roi)?;
        check_finite("progress", patch.progress)
    }
}

fn check_finite(field: &str, value: Option<f64>) -> Result<(), SyncError> {
    match value {
        Some(v) if !v.is_finite() => Err(SyncError::validation(format!("{} must be a number", field))),
        _ => Ok(()),
    }
}

fn check_amount(field: &str, value: Option<f64>) -> Result<(), SyncError> {
    check_finite(field, value)?;
    match value {
        Some(v) if v < 0.0 => Err(SyncError::validation(format!("{} cannot be negative", field))),
        _ => Ok(()),
    }
}

impl SqlRecord for Investment {
    const COLUMNS: &'static str = "id, user_id, project_id, investment_type, amount_invested, \
         current_value, roi, progress, status, created_at, updated_at";

    // Newest first.
    const ORDER_BY: &'static str = "created_at DESC, rowid DESC";

    fn map_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Investment {
            id: row.get(0)?,
            user_id: row.get(1)?,
            project_id: row.get(2)?,
            investment_type: row.get(3)?,
            amount_invested: row.get(4)?,
            current_value: row.get(5)?,
            roi: row.get(6)?,
            progress: row.get(7)?,
            status: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn insert(conn: &Connection, draft: &InvestmentDraft) -> Result<Self, DbError> {
        let now = now_timestamp();
        let inv = Investment {
            id: new_row_id(),
            user_id: draft.user_id.clone(),
            project_id: draft.project_id.clone(),
            investment_type: draft.investment_type,
            amount_invested: draft.amount_invested,
            current_value: draft.current_value,
            roi: draft.roi,
            progress: draft.progress,
            status: draft.status,
            created_at: now.clone(),
            updated_at: now,
        };

        conn.execute(
            "INSERT INTO investments (id, user_id, project_id, investment_type, amount_invested,
                                      current_value, roi, progress, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                inv.id,
                inv.user_id,
                inv.project_id,
                inv.investment_type,
                inv.amount_invested,
                inv.current_value,
                inv.roi,
                inv.progress,
                inv.status,
                inv.created_at,
                inv.updated_at,
            ],
        )?;
        Ok(inv)
    }

    fn apply_patch(conn: &Connection, id: &str, patch: &InvestmentPatch) -> Result<usize, DbError> {
        let mut update = RowPatch::new(Self::TABLE.as_str());
        update.set("amount_invested", &patch.amount_invested);
        update.set("current_value", &patch.current_value);
        update.set("roi", &patch.roi);
        update.set("progress", &patch.progress);
        update.set("status", &patch.status);
        update.execute(conn, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;
    use crate::types::{InvestmentStatus, InvestmentType};

    fn draft(project: &str, amount: f64) -> InvestmentDraft {
        InvestmentDraft {
            user_id: "investor-1".to_string(),
            project_id: project.to_string(),
            investment_type: InvestmentType::RevenueShare,
            amount_invested: amount,
            current_value: amount,
            roi: 0.0,
            progress: 0.0,
            status: InvestmentStatus::Pending,
        }
    }

    #[test]
    fn test_portfolio_spans_projects_newest_first() {
        let db = test_db();
        let rows = db
            .with_conn(|conn| {
                Investment::insert(conn, &draft("p1", 100.0))?;
                Investment::insert(conn, &draft("p2", 200.0))?;
                Investment::select(conn, "user_id", "investor-1")
            })
            .expect("select");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].project_id, "p2");
        assert_eq!(rows[1].investment_type, InvestmentType::RevenueShare);
    }

    #[test]
    fn test_patch_stores_client_values_verbatim() {
        let db = test_db();
        let inv = db
            .with_conn(|conn| {
                let inv = Investment::insert(conn, &draft("p1", 100.0))?;
                let patch = InvestmentPatch {
                    current_value: Some(130.0),
                    roi: Some(12.5),
                    ..Default::default()
                };
                Investment::apply_patch(conn, &inv.id, &patch)?;
                Investment::get(conn, &inv.id)
            })
            .expect("patch")
            .expect("row");
        assert_eq!(inv.current_value, 130.0);
        // Not derived from the amounts.
        assert_eq!(inv.roi, 12.5);
    }

    #[test]
    fn test_negative_amount_rejected() {
        assert!(Investment::validate(&draft("p1", -5.0)).is_err());
        let patch = InvestmentPatch {
            progress: Some(f64::NAN),
            ..Default::default()
        };
        assert!(Investment::validate_patch(&patch).is_err());
    }
}
