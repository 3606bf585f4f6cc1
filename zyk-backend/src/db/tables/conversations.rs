//! Conversation and message database operations

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Result as SqliteResult, Row};

use crate::models::{ChatMode, Conversation, ConversationStats, Message};
use super::super::Database;

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl Database {
    fn row_to_conversation(row: &Row) -> rusqlite::Result<Conversation> {
        let created_at: String = row.get(3)?;
        let updated_at: String = row.get(4)?;
        Ok(Conversation {
            id: row.get(0)?,
            title: row.get(1)?,
            mode: row.get(2)?,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        })
    }

    fn row_to_message(row: &Row) -> rusqlite::Result<Message> {
        let created_at: String = row.get(4)?;
        Ok(Message {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            role: row.get(2)?,
            content: row.get(3)?,
            created_at: parse_timestamp(&created_at),
        })
    }

    pub fn create_conversation(&self, title: &str, mode: &str) -> SqliteResult<Conversation> {
        let conn = self.conn();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO conversations (title, mode, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            rusqlite::params![title, mode, now.to_rfc3339()],
        )?;
        Ok(Conversation {
            id: conn.last_insert_rowid(),
            title: title.to_string(),
            mode: mode.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_conversation(&self, id: i64) -> SqliteResult<Option<Conversation>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, title, mode, created_at, updated_at FROM conversations WHERE id = ?1",
            [id],
            |row| Self::row_to_conversation(row),
        )
        .optional()
    }

    /// Most recently active first
    pub fn list_conversations(&self, limit: i64) -> SqliteResult<Vec<Conversation>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, title, mode, created_at, updated_at FROM conversations
             ORDER BY updated_at DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit], |row| Self::row_to_conversation(row))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn delete_conversation(&self, id: i64) -> SqliteResult<bool> {
        let conn = self.conn();
        conn.execute("DELETE FROM messages WHERE conversation_id = ?1", [id])?;
        let deleted = conn.execute("DELETE FROM conversations WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }

    /// Append a message and bump the conversation's activity time
    pub fn add_message(&self, conversation_id: i64, role: &str, content: &str) -> SqliteResult<Message> {
        let conn = self.conn();
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        conn.execute(
            "INSERT INTO messages (conversation_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![conversation_id, role, content, &now_str],
        )?;
        let id = conn.last_insert_rowid();
        conn.execute(
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            rusqlite::params![&now_str, conversation_id],
        )?;
        Ok(Message {
            id,
            conversation_id,
            role: role.to_string(),
            content: content.to_string(),
            created_at: now,
        })
    }

    pub fn list_messages(&self, conversation_id: i64) -> SqliteResult<Vec<Message>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, role, content, created_at FROM messages
             WHERE conversation_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([conversation_id], |row| Self::row_to_message(row))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn conversation_stats(&self) -> SqliteResult<ConversationStats> {
        let conn = self.conn();
        let total_conversations: i64 =
            conn.query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))?;
        let total_messages: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;

        let mut conversations_by_mode: std::collections::BTreeMap<String, i64> = ChatMode::ALL
            .iter()
            .map(|mode| (mode.as_str().to_string(), 0))
            .collect();
        let mut stmt = conn.prepare("SELECT mode, COUNT(*) FROM conversations GROUP BY mode")?;
        let counts = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for entry in counts {
            let (mode, count) = entry?;
            conversations_by_mode.insert(mode, count);
        }

        Ok(ConversationStats {
            total_conversations,
            total_messages,
            conversations_by_mode,
        })
    }
}
