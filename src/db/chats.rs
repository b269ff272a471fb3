use rusqlite::{params, Connection, OptionalExtension, Row};

use super::*;
use crate::error::SyncError;
use crate::gateway::{require, Record, Table};
use crate::types::{Chat, ChatDraft, ChatMessage, ChatPatch};

impl Record for Chat {
    type Draft = ChatDraft;
    type Patch = ChatPatch;

    const TABLE: Table = Table::Chats;
    // A user's inbox: every chat they take part in, across projects.
    const SCOPE_COLUMN: &'static str = "participants";
    const FILTER_COLUMNS: &'static [&'static str] = &["participants", "project_id", "created_by"];

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(draft: &ChatDraft) -> Result<(), SyncError> {
        require("name", &draft.name)?;
        require("created_by", &draft.created_by)?;
        for user in &draft.participants {
            require("participant", user)?;
        }
        Ok(())
    }

    fn validate_patch(patch: &ChatPatch) -> Result<(), SyncError> {
        if let Some(name) = &patch.name {
            require("name", name)?;
        }
        if let Some(participants) = &patch.participants {
            if participants.is_empty() {
                return Err(SyncError::validation("a chat needs at least one participant"));
            }
            for user in participants {
                require("participant", user)?;
            }
        }
        Ok(())
    }
}

/// Participants in join order.
fn load_participants(conn: &Connection, chat_id: &str) -> Result<Vec<String>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM chat_participants WHERE chat_id = ?1 ORDER BY joined_at ASC, rowid ASC",
    )?;
    let rows = stmt.query_map([chat_id], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn add_participants(conn: &Connection, chat_id: &str, users: &[String], joined_at: &str) -> Result<(), DbError> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO chat_participants (chat_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
    )?;
    for user in users {
        stmt.execute(params![chat_id, user, joined_at])?;
    }
    Ok(())
}

fn dedup_preserving_order(users: &[String]) -> Vec<String> {
    let mut seen = Vec::with_capacity(users.len());
    for user in users {
        if !seen.contains(user) {
            seen.push(user.clone());
        }
    }
    seen
}

impl SqlRecord for Chat {
    const COLUMNS: &'static str = "id, project_id, name, chat_type, created_by, created_at, updated_at";

    // Most recently active first.
    const ORDER_BY: &'static str = "updated_at DESC, rowid DESC";

    /// Participants are filled in by the caller.
    fn map_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Chat {
            id: row.get(0)?,
            project_id: row.get(1)?,
            name: row.get(2)?,
            chat_type: row.get(3)?,
            participants: Vec::new(),
            created_by: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn select(conn: &Connection, column: &'static str, value: &str) -> Result<Vec<Self>, DbError> {
        let sql = if column == "participants" {
            format!(
                "SELECT {} FROM chats
                 WHERE id IN (SELECT chat_id FROM chat_participants WHERE user_id = ?1)
                 ORDER BY {}",
                Self::COLUMNS,
                Self::ORDER_BY
            )
        } else {
            format!(
                "SELECT {} FROM chats WHERE {} = ?1 ORDER BY {}",
                Self::COLUMNS,
                column,
                Self::ORDER_BY
            )
        };

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([value], Self::map_row)?;
        let mut chats = rows.collect::<Result<Vec<_>, _>>()?;
        for chat in &mut chats {
            chat.participants = load_participants(conn, &chat.id)?;
        }
        Ok(chats)
    }

    fn get(conn: &Connection, id: &str) -> Result<Option<Self>, DbError> {
        let sql = format!("SELECT {} FROM chats WHERE id = ?1", Self::COLUMNS);
        let chat = conn.query_row(&sql, [id], Self::map_row).optional()?;
        match chat {
            Some(mut chat) => {
                chat.participants = load_participants(conn, &chat.id)?;
                Ok(Some(chat))
            }
            None => Ok(None),
        }
    }

    /// The creator always joins their own chat.
    fn insert(conn: &Connection, draft: &ChatDraft) -> Result<Self, DbError> {
        let now = now_timestamp();
        let mut participants = dedup_preserving_order(&draft.participants);
        if !participants.contains(&draft.created_by) {
            participants.insert(0, draft.created_by.clone());
        }

        let chat = Chat {
            id: new_row_id(),
            project_id: draft.project_id.clone(),
            name: draft.name.clone(),
            chat_type: draft.chat_type,
            participants,
            created_by: draft.created_by.clone(),
            created_at: now.clone(),
            updated_at: now,
        };

        conn.execute(
            "INSERT INTO chats (id, project_id, name, chat_type, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                chat.id,
                chat.project_id,
                chat.name,
                chat.chat_type,
                chat.created_by,
                chat.created_at,
                chat.updated_at,
            ],
        )?;
        add_participants(conn, &chat.id, &chat.participants, &chat.created_at)?;
        Ok(chat)
    }

    /// A participant list in the patch replaces the stored one; users who stay
    /// keep their original join time.
    fn apply_patch(conn: &Connection, id: &str, patch: &ChatPatch) -> Result<usize, DbError> {
        let mut update = RowPatch::new(Self::TABLE.as_str());
        update.set("name", &patch.name);
        let touched = update.execute(conn, id)?;

        if let (Some(participants), true) = (&patch.participants, touched > 0) {
            let keep = dedup_preserving_order(participants);
            let current = load_participants(conn, id)?;
            for user in current.iter().filter(|u| !keep.contains(u)) {
                conn.execute(
                    "DELETE FROM chat_participants WHERE chat_id = ?1 AND user_id = ?2",
                    params![id, user],
                )?;
            }
            add_participants(conn, id, &keep, &now_timestamp())?;
        }
        Ok(touched)
    }

    /// Messages go with their chat (`ON DELETE CASCADE`).
    fn before_remove(conn: &Connection, old: &Chat) -> Result<Vec<ChangeEvent>, DbError> {
        let messages = ChatMessage::select(conn, "chat_id", &old.id)?;
        Ok(messages.iter().map(ChangeEvent::delete).collect())
    }
}
