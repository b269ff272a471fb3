use rusqlite::{params, Connection, Row};

use super::*;
use crate::error::SyncError;
use crate::gateway::{require, Record, Table};
use crate::types::{Chat, ChatMessage, ChatMessageDraft, ChatMessagePatch};

impl Record for ChatMessage {
    type Draft = ChatMessageDraft;
    type Patch = ChatMessagePatch;

    const TABLE: Table = Table::ChatMessages;
    const SCOPE_COLUMN: &'static str = "chat_id";
    const FILTER_COLUMNS: &'static [&'static str] = &["chat_id", "sender_id"];

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(draft: &ChatMessageDraft) -> Result<(), SyncError> {
        require("chat_id", &draft.chat_id)?;
        require("sender_id", &draft.sender_id)?;
        require("content", &draft.content)
    }

    fn validate_patch(patch: &ChatMessagePatch) -> Result<(), SyncError> {
        match &patch.content {
            Some(content) => require("content", content),
            None => Ok(()),
        }
    }
}

impl SqlRecord for ChatMessage {
    const COLUMNS: &'static str = "id, chat_id, sender_id, content, read_by, created_at, updated_at";

    // Conversation order.
    const ORDER_BY: &'static str = "created_at ASC, rowid ASC";

    fn map_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(ChatMessage {
            id: row.get(0)?,
            chat_id: row.get(1)?,
            sender_id: row.get(2)?,
            content: row.get(3)?,
            read_by: decode_string_list(4, row.get(4)?)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    /// Fails with a foreign-key violation when the chat does not exist.
    fn insert(conn: &Connection, draft: &ChatMessageDraft) -> Result<Self, DbError> {
        let now = now_timestamp();
        let msg = ChatMessage {
            id: new_row_id(),
            chat_id: draft.chat_id.clone(),
            sender_id: draft.sender_id.clone(),
            content: draft.content.clone(),
            read_by: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
        };

        conn.execute(
            "INSERT INTO chat_messages (id, chat_id, sender_id, content, read_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                msg.id,
                msg.chat_id,
                msg.sender_id,
                msg.content,
                encode_string_list("read_by", &msg.read_by)?,
                msg.created_at,
                msg.updated_at,
            ],
        )?;
        Ok(msg)
    }

    /// Moves the chat to the top of its participants' inboxes.
    fn after_insert(conn: &Connection, msg: &ChatMessage) -> Result<Vec<ChangeEvent>, DbError> {
        let Some(before) = Chat::get(conn, &msg.chat_id)? else {
            return Ok(Vec::new());
        };
        conn.execute(
            "UPDATE chats SET updated_at = ?1 WHERE id = ?2",
            params![msg.created_at, msg.chat_id],
        )?;
        Ok(Chat::get(conn, &msg.chat_id)?
            .map(|after| ChangeEvent::update(&before, &after))
            .into_iter()
            .collect())
    }

    fn apply_patch(conn: &Connection, id: &str, patch: &ChatMessagePatch) -> Result<usize, DbError> {
        let mut update = RowPatch::new(Self::TABLE.as_str());
        update.set("content", &patch.content);

        let mut read_by = patch.read_by.clone();
        if let Some(reader) = &patch.mark_read_by {
            if let Some(stored) = Self::get(conn, id)? {
                let mut merged = read_by.unwrap_or(stored.read_by);
                if stored.sender_id != *reader && !merged.contains(reader) {
                    merged.push(reader.clone());
                }
                read_by = Some(merged);
            }
        }
        if let Some(read_by) = &read_by {
            update.set_value("read_by", encode_string_list("read_by", read_by)?);
        }
        update.execute(conn, id)
    }
}
