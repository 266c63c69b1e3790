//! Administrative operations: bot CRUD, channel membership, manual instruct.

use super::Gateway;
use chorus_core::{
    error::ChorusError,
    model::{Bot, Channel, User},
    task::TaskKind,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

/// Request to create a bot persona.
#[derive(Debug, Clone, Deserialize)]
pub struct NewBot {
    pub name: String,
    /// Short description the profile is drafted from.
    pub description: String,
    /// Generator family, e.g. "openai".
    pub generator: String,
}

/// A channel with the bots currently present in it.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelOverview {
    #[serde(flatten)]
    pub channel: Channel,
    pub bots: Vec<Bot>,
}

impl Gateway {
    /// Create a bot. The profile is drafted by its generator; the avatar is
    /// best-effort and its failure does not fail creation.
    pub async fn create_bot(&self, req: NewBot) -> Result<Bot, ChorusError> {
        let name = req.name.trim();
        if name.is_empty() {
            return Err(ChorusError::Config("bot name must not be empty".into()));
        }
        let generator = self.generators.get(&req.generator)?;

        let ask = self
            .prompts
            .create_persona
            .replace("{name}", name)
            .replace("{description}", &req.description);
        let profile = generator.ask(&ask).await?.trim().to_string();

        let avatar_prompt = self.prompts.avatar.replace("{description}", &profile);
        let avatar = match generator.generate_avatar(&avatar_prompt).await {
            Ok(bytes) if !bytes.is_empty() => Some(bytes),
            Ok(_) => None,
            Err(e) => {
                warn!("admin: avatar for {name} failed: {e}");
                None
            }
        };

        let bot = Bot {
            id: Uuid::new_v4(),
            name: name.to_string(),
            profile,
            prompt: req.description,
            avatar,
            generator: req.generator,
            created_at: Utc::now(),
        };
        self.store.insert_bot(&bot).await?;
        info!("admin: created bot {} ({})", bot.name, bot.generator);
        Ok(bot)
    }

    pub async fn list_bots(&self) -> Result<Vec<Bot>, ChorusError> {
        self.store.list_bots().await
    }

    pub async fn get_bot(&self, id: Uuid) -> Result<Bot, ChorusError> {
        self.store
            .get_bot(id)
            .await?
            .ok_or_else(|| ChorusError::NotFound(format!("bot {id}")))
    }

    pub async fn delete_bot(&self, id: Uuid) -> Result<(), ChorusError> {
        if !self.store.delete_bot(id).await? {
            return Err(ChorusError::NotFound(format!("bot {id}")));
        }
        info!("admin: deleted bot {id}");
        Ok(())
    }

    /// PNG bytes of the bot's avatar.
    pub async fn bot_avatar(&self, id: Uuid) -> Result<Vec<u8>, ChorusError> {
        self.get_bot(id)
            .await?
            .avatar
            .ok_or_else(|| ChorusError::NotFound(format!("avatar of bot {id}")))
    }

    pub async fn list_channels(&self) -> Result<Vec<ChannelOverview>, ChorusError> {
        let mut out = Vec::new();
        for channel in self.store.list_channels().await? {
            let bots = self.store.list_bots_in_channel(channel.id).await?;
            out.push(ChannelOverview { channel, bots });
        }
        Ok(out)
    }

    async fn get_channel(&self, id: Uuid) -> Result<Channel, ChorusError> {
        self.store
            .get_channel(id)
            .await?
            .ok_or_else(|| ChorusError::NotFound(format!("channel {id}")))
    }

    /// Make a bot present in a channel and let it introduce itself.
    ///
    /// History is backfilled first so the introduction sees the latest
    /// conversation; a backfill failure only degrades the context.
    pub async fn add_bot_to_channel(&self, channel_id: Uuid, bot_id: Uuid) -> Result<(), ChorusError> {
        let channel = self.get_channel(channel_id).await?;
        let bot = self.get_bot(bot_id).await?;
        let provider = self.providers.get(channel.provider.as_str())?;

        self.store.add_bot_to_channel(bot.id, channel.id).await?;
        if let Err(e) = self.backfill(&channel).await {
            warn!("admin: backfill of {} failed: {e}", channel.name);
        }
        provider.channel(&channel.provider_id).join(&bot).await?;
        info!("admin: {} joined {}", bot.name, channel.name);

        self.dispatch_channel(TaskKind::Join, &[bot], &channel, None)
            .await?;
        Ok(())
    }

    /// Remove a bot from a channel. It says goodbye before it leaves.
    pub async fn remove_bot_from_channel(
        &self,
        channel_id: Uuid,
        bot_id: Uuid,
    ) -> Result<(), ChorusError> {
        let channel = self.get_channel(channel_id).await?;
        let bot = self.get_bot(bot_id).await?;
        if !self.store.remove_bot_from_channel(bot.id, channel.id).await? {
            return Err(ChorusError::NotFound(format!(
                "bot {} in channel {}",
                bot.name, channel.name
            )));
        }
        info!("admin: {} removed from {}", bot.name, channel.name);

        self.dispatch_channel(TaskKind::Leave, &[bot], &channel, None)
            .await?;
        Ok(())
    }

    /// Record an admin instruction in the channel and have its bots act on it.
    ///
    /// `bots` narrows the addressed roster; `None` addresses every present bot.
    /// Returns the number of tasks queued.
    pub async fn instruct(
        &self,
        channel_id: Uuid,
        instruction: &str,
        bots: Option<&[Uuid]>,
    ) -> Result<usize, ChorusError> {
        let channel = self.get_channel(channel_id).await?;
        let mut present = self.store.list_bots_in_channel(channel.id).await?;
        if let Some(ids) = bots {
            present.retain(|b| ids.contains(&b.id));
        }

        self.store
            .insert_message(
                channel.id,
                &Uuid::new_v4().to_string(),
                User::admin().id,
                instruction,
                Utc::now(),
            )
            .await?;

        self.dispatch_channel(TaskKind::Instruct, &present, &channel, Some(instruction))
            .await
    }
}
