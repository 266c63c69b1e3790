//! Deduplicated message storage and history queries.

use super::{format_ts, parse_opt_ts, parse_ts, parse_uuid, Store};
use chorus_core::{error::ChorusError, model::Message};
use chrono::{DateTime, Utc};
use uuid::Uuid;

type MessageRow = (String, String, String, String, String, String, Option<String>);

const MESSAGE_COLUMNS: &str =
    "m.id, m.channel_id, m.provider_id, m.author_id, m.content, m.timestamp, m.deleted_at";

fn message_from_row(row: MessageRow) -> Result<Message, ChorusError> {
    let (id, channel_id, provider_id, author_id, content, timestamp, deleted_at) = row;
    Ok(Message {
        id: parse_uuid(&id)?,
        channel_id: parse_uuid(&channel_id)?,
        provider_id,
        author_id: parse_uuid(&author_id)?,
        content,
        timestamp: parse_ts(&timestamp)?,
        deleted_at: parse_opt_ts(deleted_at)?,
    })
}

/// Decode rows and put them oldest first, whatever order the query produced.
fn ascending(rows: Vec<MessageRow>) -> Result<Vec<Message>, ChorusError> {
    let mut messages = rows
        .into_iter()
        .map(message_from_row)
        .collect::<Result<Vec<_>, _>>()?;
    messages.sort_by_key(|m| m.timestamp);
    Ok(messages)
}

impl Store {
    /// Store a message unless `(channel_id, provider_id)` already exists.
    ///
    /// Returns `None` for a duplicate: re-ingestion is a no-op, not an update.
    pub async fn insert_message(
        &self,
        channel_id: Uuid,
        provider_id: &str,
        author_id: Uuid,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<Message>, ChorusError> {
        let id = Uuid::new_v4();
        let affected = sqlx::query(
            "INSERT INTO messages (id, channel_id, provider_id, author_id, content, timestamp) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT (channel_id, provider_id) DO NOTHING",
        )
        .bind(id.to_string())
        .bind(channel_id.to_string())
        .bind(provider_id)
        .bind(author_id.to_string())
        .bind(content)
        .bind(format_ts(&timestamp))
        .execute(&self.pool)
        .await
        .map_err(|e| ChorusError::Memory(format!("message insert failed: {e}")))?
        .rows_affected();

        if affected == 0 {
            return Ok(None);
        }

        Ok(Some(Message {
            id,
            channel_id,
            provider_id: provider_id.to_string(),
            author_id,
            content: content.to_string(),
            timestamp,
            deleted_at: None,
        }))
    }

    /// The latest `limit` messages of a channel, oldest first.
    pub async fn list_messages(
        &self,
        channel_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Message>, ChorusError> {
        let mut rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m \
             WHERE m.channel_id = ? AND m.deleted_at IS NULL \
             ORDER BY m.timestamp DESC, m.rowid DESC LIMIT ?"
        ))
        .bind(channel_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ChorusError::Memory(format!("message history failed: {e}")))?;
        rows.reverse();
        ascending(rows)
    }

    pub async fn latest_message(&self, channel_id: Uuid) -> Result<Option<Message>, ChorusError> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m \
             WHERE m.channel_id = ? AND m.deleted_at IS NULL \
             ORDER BY m.timestamp DESC, m.rowid DESC LIMIT 1"
        ))
        .bind(channel_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ChorusError::Memory(format!("latest message failed: {e}")))?;
        row.map(message_from_row).transpose()
    }

    /// The most recent message written by any bot in the channel.
    pub async fn latest_bot_message(
        &self,
        channel_id: Uuid,
    ) -> Result<Option<Message>, ChorusError> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m \
             JOIN users u ON u.id = m.author_id \
             WHERE m.channel_id = ? AND m.deleted_at IS NULL AND u.bot_id IS NOT NULL \
             ORDER BY m.timestamp DESC, m.rowid DESC LIMIT 1"
        ))
        .bind(channel_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ChorusError::Memory(format!("latest bot message failed: {e}")))?;
        row.map(message_from_row).transpose()
    }

    /// Messages strictly after the one with provider id `cursor`, oldest first.
    ///
    /// An unknown cursor replays the latest `limit` messages.
    pub async fn messages_after(
        &self,
        channel_id: Uuid,
        cursor: &str,
        limit: usize,
    ) -> Result<Vec<Message>, ChorusError> {
        let anchor: Option<(String, i64)> = sqlx::query_as(
            "SELECT timestamp, rowid FROM messages WHERE channel_id = ? AND provider_id = ?",
        )
        .bind(channel_id.to_string())
        .bind(cursor)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ChorusError::Memory(format!("cursor lookup failed: {e}")))?;

        let Some((ts, rowid)) = anchor else {
            return self.list_messages(channel_id, limit).await;
        };

        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m \
             WHERE m.channel_id = ? AND m.deleted_at IS NULL \
             AND (m.timestamp > ? OR (m.timestamp = ? AND m.rowid > ?)) \
             ORDER BY m.timestamp, m.rowid LIMIT ?"
        ))
        .bind(channel_id.to_string())
        .bind(&ts)
        .bind(&ts)
        .bind(rowid)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ChorusError::Memory(format!("message replay failed: {e}")))?;
        ascending(rows)
    }
}
