//! Bot personas and their soft-deleted channel membership.

use super::{format_ts, parse_ts, parse_uuid, Store};
use chorus_core::{error::ChorusError, model::Bot};
use chrono::Utc;
use uuid::Uuid;

type BotRow = (String, String, String, String, Option<Vec<u8>>, String, String);

const BOT_COLUMNS: &str = "b.id, b.name, b.profile, b.prompt, b.avatar, b.generator, b.created_at";

fn bot_from_row(row: BotRow) -> Result<Bot, ChorusError> {
    let (id, name, profile, prompt, avatar, generator, created_at) = row;
    Ok(Bot {
        id: parse_uuid(&id)?,
        name,
        profile,
        prompt,
        avatar,
        generator,
        created_at: parse_ts(&created_at)?,
    })
}

impl Store {
    pub async fn insert_bot(&self, bot: &Bot) -> Result<(), ChorusError> {
        sqlx::query(
            "INSERT INTO bots (id, name, profile, prompt, avatar, generator, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(bot.id.to_string())
        .bind(&bot.name)
        .bind(&bot.profile)
        .bind(&bot.prompt)
        .bind(bot.avatar.as_deref())
        .bind(&bot.generator)
        .bind(format_ts(&bot.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| ChorusError::Memory(format!("bot insert failed: {e}")))?;
        Ok(())
    }

    pub async fn get_bot(&self, id: Uuid) -> Result<Option<Bot>, ChorusError> {
        let row: Option<BotRow> =
            sqlx::query_as(&format!("SELECT {BOT_COLUMNS} FROM bots b WHERE b.id = ?"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| ChorusError::Memory(format!("bot lookup failed: {e}")))?;
        row.map(bot_from_row).transpose()
    }

    /// All bots, oldest first.
    pub async fn list_bots(&self) -> Result<Vec<Bot>, ChorusError> {
        let rows: Vec<BotRow> = sqlx::query_as(&format!(
            "SELECT {BOT_COLUMNS} FROM bots b ORDER BY b.created_at, b.name"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ChorusError::Memory(format!("bot list failed: {e}")))?;
        rows.into_iter().map(bot_from_row).collect()
    }

    /// Delete a bot. Its memberships are soft-deleted so history survives.
    pub async fn delete_bot(&self, id: Uuid) -> Result<bool, ChorusError> {
        let now = format_ts(&Utc::now());
        sqlx::query(
            "UPDATE bot_channels SET deleted_at = ? WHERE bot_id = ? AND deleted_at IS NULL",
        )
        .bind(&now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| ChorusError::Memory(format!("bot membership cleanup failed: {e}")))?;

        let deleted = sqlx::query("DELETE FROM bots WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| ChorusError::Memory(format!("bot delete failed: {e}")))?
            .rows_affected();
        Ok(deleted > 0)
    }

    /// Make the bot present in the channel, reviving a removed membership.
    pub async fn add_bot_to_channel(
        &self,
        bot_id: Uuid,
        channel_id: Uuid,
    ) -> Result<(), ChorusError> {
        sqlx::query(
            "INSERT INTO bot_channels (bot_id, channel_id, created_at) VALUES (?, ?, ?) \
             ON CONFLICT (bot_id, channel_id) DO UPDATE SET deleted_at = NULL",
        )
        .bind(bot_id.to_string())
        .bind(channel_id.to_string())
        .bind(format_ts(&Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| ChorusError::Memory(format!("bot membership upsert failed: {e}")))?;
        Ok(())
    }

    /// Soft-delete a membership. Returns `false` if the bot was not present.
    pub async fn remove_bot_from_channel(
        &self,
        bot_id: Uuid,
        channel_id: Uuid,
    ) -> Result<bool, ChorusError> {
        let affected = sqlx::query(
            "UPDATE bot_channels SET deleted_at = ? \
             WHERE bot_id = ? AND channel_id = ? AND deleted_at IS NULL",
        )
        .bind(format_ts(&Utc::now()))
        .bind(bot_id.to_string())
        .bind(channel_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| ChorusError::Memory(format!("bot membership removal failed: {e}")))?
        .rows_affected();
        Ok(affected > 0)
    }

    /// Bots currently present in the channel, in the order they joined.
    pub async fn list_bots_in_channel(&self, channel_id: Uuid) -> Result<Vec<Bot>, ChorusError> {
        let rows: Vec<BotRow> = sqlx::query_as(&format!(
            "SELECT {BOT_COLUMNS} FROM bots b \
             JOIN bot_channels bc ON bc.bot_id = b.id \
             WHERE bc.channel_id = ? AND bc.deleted_at IS NULL \
             ORDER BY bc.created_at, b.name"
        ))
        .bind(channel_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ChorusError::Memory(format!("channel bots failed: {e}")))?;
        rows.into_iter().map(bot_from_row).collect()
    }
}
