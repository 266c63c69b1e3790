//! Channel upsert and discovery queries.

use super::{parse_opt_ts, parse_uuid, Store};
use chorus_core::{
    error::ChorusError,
    message::ChannelInfo,
    model::{Channel, ProviderKind},
};
use uuid::Uuid;

type ChannelRow = (String, String, String, String, Option<String>);

const CHANNEL_COLUMNS: &str = "c.id, c.provider, c.provider_id, c.name, c.deleted_at";

fn channel_from_row(row: ChannelRow) -> Result<Channel, ChorusError> {
    let (id, provider, provider_id, name, deleted_at) = row;
    Ok(Channel {
        id: parse_uuid(&id)?,
        provider: provider.parse()?,
        provider_id,
        name,
        deleted_at: parse_opt_ts(deleted_at)?,
    })
}

impl Store {
    /// Create the channel on first sight, or refresh its name.
    ///
    /// Returns the channel and whether this call created it.
    pub async fn upsert_channel(&self, info: &ChannelInfo) -> Result<(Channel, bool), ChorusError> {
        if let Some(existing) = self
            .get_channel_by_provider_id(info.provider, &info.id)
            .await?
        {
            if info.name.is_empty() || info.name == existing.name {
                return Ok((existing, false));
            }
            sqlx::query("UPDATE channels SET name = ? WHERE id = ?")
                .bind(&info.name)
                .bind(existing.id.to_string())
                .execute(&self.pool)
                .await
                .map_err(|e| ChorusError::Memory(format!("channel rename failed: {e}")))?;
            return Ok((
                Channel {
                    name: info.name.clone(),
                    ..existing
                },
                false,
            ));
        }

        let id = Uuid::new_v4();
        let inserted = sqlx::query(
            "INSERT INTO channels (id, provider, provider_id, name) VALUES (?, ?, ?, ?) \
             ON CONFLICT (provider, provider_id) DO NOTHING",
        )
        .bind(id.to_string())
        .bind(info.provider.as_str())
        .bind(&info.id)
        .bind(&info.name)
        .execute(&self.pool)
        .await
        .map_err(|e| ChorusError::Memory(format!("channel insert failed: {e}")))?
        .rows_affected()
            > 0;

        // A concurrent ingest may have won the insert.
        let channel = self
            .get_channel_by_provider_id(info.provider, &info.id)
            .await?
            .ok_or_else(|| ChorusError::Memory(format!("channel {} vanished", info.id)))?;
        Ok((channel, inserted))
    }

    pub async fn get_channel(&self, id: Uuid) -> Result<Option<Channel>, ChorusError> {
        let row: Option<ChannelRow> = sqlx::query_as(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels c WHERE c.id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ChorusError::Memory(format!("channel lookup failed: {e}")))?;
        row.map(channel_from_row).transpose()
    }

    pub async fn get_channel_by_provider_id(
        &self,
        provider: ProviderKind,
        provider_id: &str,
    ) -> Result<Option<Channel>, ChorusError> {
        let row: Option<ChannelRow> = sqlx::query_as(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels c WHERE c.provider = ? AND c.provider_id = ?"
        ))
        .bind(provider.as_str())
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ChorusError::Memory(format!("channel lookup failed: {e}")))?;
        row.map(channel_from_row).transpose()
    }

    /// All live channels, by provider then name.
    pub async fn list_channels(&self) -> Result<Vec<Channel>, ChorusError> {
        let rows: Vec<ChannelRow> = sqlx::query_as(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels c WHERE c.deleted_at IS NULL \
             ORDER BY c.provider, c.name"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ChorusError::Memory(format!("channel list failed: {e}")))?;
        rows.into_iter().map(channel_from_row).collect()
    }

    pub async fn list_channels_by_provider(
        &self,
        provider: ProviderKind,
    ) -> Result<Vec<Channel>, ChorusError> {
        let rows: Vec<ChannelRow> = sqlx::query_as(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels c \
             WHERE c.provider = ? AND c.deleted_at IS NULL ORDER BY c.name"
        ))
        .bind(provider.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ChorusError::Memory(format!("channel list failed: {e}")))?;
        rows.into_iter().map(channel_from_row).collect()
    }

    /// Live channels where at least one bot is present.
    pub async fn list_channels_with_bots(&self) -> Result<Vec<Channel>, ChorusError> {
        let rows: Vec<ChannelRow> = sqlx::query_as(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels c \
             WHERE c.deleted_at IS NULL AND EXISTS ( \
                 SELECT 1 FROM bot_channels bc \
                 WHERE bc.channel_id = c.id AND bc.deleted_at IS NULL) \
             ORDER BY c.provider, c.name"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ChorusError::Memory(format!("channel list failed: {e}")))?;
        rows.into_iter().map(channel_from_row).collect()
    }
}
