//! Message authors, created lazily on first sight.

use super::{parse_uuid, Store};
use chorus_core::{
    error::ChorusError,
    model::{ProviderKind, User},
};
use uuid::Uuid;

type UserRow = (String, String, String, String, String, Option<String>);

fn user_from_row(row: UserRow) -> Result<User, ChorusError> {
    let (id, provider, provider_id, name, profile, bot_id) = row;
    Ok(User {
        id: parse_uuid(&id)?,
        provider: provider.parse()?,
        provider_id,
        name,
        profile,
        bot_id: bot_id.as_deref().map(parse_uuid).transpose()?,
    })
}

impl Store {
    pub async fn get_user_by_provider_id(
        &self,
        provider: ProviderKind,
        provider_id: &str,
    ) -> Result<Option<User>, ChorusError> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, provider, provider_id, name, profile, bot_id FROM users \
             WHERE provider = ? AND provider_id = ?",
        )
        .bind(provider.as_str())
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ChorusError::Memory(format!("user lookup failed: {e}")))?;
        row.map(user_from_row).transpose()
    }

    /// Insert a user, or return the existing row for the same provider identity.
    pub async fn insert_user(&self, user: &User) -> Result<User, ChorusError> {
        sqlx::query(
            "INSERT INTO users (id, provider, provider_id, name, profile, bot_id) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT (provider, provider_id) DO NOTHING",
        )
        .bind(user.id.to_string())
        .bind(user.provider.as_str())
        .bind(&user.provider_id)
        .bind(&user.name)
        .bind(&user.profile)
        .bind(user.bot_id.map(|id| id.to_string()))
        .execute(&self.pool)
        .await
        .map_err(|e| ChorusError::Memory(format!("user insert failed: {e}")))?;

        self.get_user_by_provider_id(user.provider, &user.provider_id)
            .await?
            .ok_or_else(|| ChorusError::Memory(format!("user {} vanished", user.provider_id)))
    }

    pub async fn get_user(&self, id: Uuid) -> Result<Option<User>, ChorusError> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, provider, provider_id, name, profile, bot_id FROM users WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ChorusError::Memory(format!("user lookup failed: {e}")))?;
        row.map(user_from_row).transpose()
    }

    pub async fn list_users_by_provider(
        &self,
        provider: ProviderKind,
    ) -> Result<Vec<User>, ChorusError> {
        let rows: Vec<UserRow> = sqlx::query_as(
            "SELECT id, provider, provider_id, name, profile, bot_id FROM users \
             WHERE provider = ? ORDER BY name",
        )
        .bind(provider.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ChorusError::Memory(format!("user list failed: {e}")))?;
        rows.into_iter().map(user_from_row).collect()
    }

    /// Everyone who has authored a message in the channel.
    pub async fn list_channel_users(&self, channel_id: Uuid) -> Result<Vec<User>, ChorusError> {
        let rows: Vec<UserRow> = sqlx::query_as(
            "SELECT u.id, u.provider, u.provider_id, u.name, u.profile, u.bot_id FROM users u \
             WHERE u.id IN (SELECT DISTINCT author_id FROM messages WHERE channel_id = ?) \
             ORDER BY u.name",
        )
        .bind(channel_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ChorusError::Memory(format!("channel users failed: {e}")))?;
        rows.into_iter().map(user_from_row).collect()
    }
}
