//! Normalizer: canonical messages in, stored rows out.

use super::Gateway;
use chorus_core::{
    error::ChorusError,
    message::{CanonicalMessage, InboundBatch},
    model::{Channel, Message, ProviderKind, User},
    task::TaskKind,
    traits::ChannelProvider,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A stored message with its resolved channel and author.
///
/// `message` is `None` when the row already existed.
pub(super) struct Ingested {
    pub channel: Channel,
    pub author: User,
    pub message: Option<Message>,
}

impl Gateway {
    /// Store a provider batch. Returns only the newly inserted messages.
    ///
    /// Re-ingesting a known message is a no-op. A message whose author or
    /// channel cannot be resolved is skipped without failing the batch.
    pub async fn ingest(
        &self,
        provider: ProviderKind,
        messages: &[CanonicalMessage],
    ) -> Result<Vec<Message>, ChorusError> {
        Ok(self
            .ingest_batch(provider, messages)
            .await?
            .into_iter()
            .filter_map(|i| i.message)
            .collect())
    }

    pub(super) async fn ingest_batch(
        &self,
        provider: ProviderKind,
        messages: &[CanonicalMessage],
    ) -> Result<Vec<Ingested>, ChorusError> {
        let client = self.providers.get(provider.as_str())?;
        let mut stored = Vec::new();

        for canonical in messages {
            if canonical.channel.provider != provider {
                warn!(
                    "ingest: message {} belongs to {}, not {provider}; skipped",
                    canonical.provider_id, canonical.channel.provider
                );
                continue;
            }
            match self.ingest_one(&client, provider, canonical).await {
                Ok(item) => {
                    if item.message.is_none() {
                        debug!("ingest: {} already stored", canonical.provider_id);
                    }
                    stored.push(item);
                }
                Err(e) => warn!("ingest: skipping message {}: {e}", canonical.provider_id),
            }
        }

        let new = stored.iter().filter(|i| i.message.is_some()).count();
        if new > 0 {
            info!("ingest: {new} new {provider} message(s)");
        }
        Ok(stored)
    }

    async fn ingest_one(
        &self,
        client: &Arc<dyn ChannelProvider>,
        provider: ProviderKind,
        canonical: &CanonicalMessage,
    ) -> Result<Ingested, ChorusError> {
        let author = self.resolve_author(client, provider, canonical).await?;
        let (channel, _) = self.store.upsert_channel(&canonical.channel).await?;

        let message = self
            .store
            .insert_message(
                channel.id,
                &canonical.provider_id,
                author.id,
                &canonical.content,
                canonical.timestamp,
            )
            .await?;

        Ok(Ingested {
            channel,
            author,
            message,
        })
    }

    /// Find the author, creating it on first sight. Bot authors are tagged by
    /// the adapter and never looked up on the provider.
    async fn resolve_author(
        &self,
        client: &Arc<dyn ChannelProvider>,
        provider: ProviderKind,
        canonical: &CanonicalMessage,
    ) -> Result<User, ChorusError> {
        let author = &canonical.author;
        if let Some(user) = self.store.get_user_by_provider_id(provider, &author.id).await? {
            return Ok(user);
        }

        let (name, profile) = match author.bot_id {
            Some(_) => (author.name.clone(), String::new()),
            None => {
                let remote = client.get_user(&author.id).await?;
                let name = if remote.name.is_empty() {
                    author.name.clone()
                } else {
                    remote.name
                };
                (name, remote.profile)
            }
        };

        self.store
            .insert_user(&User {
                id: Uuid::new_v4(),
                provider,
                provider_id: author.id.clone(),
                name,
                profile,
                bot_id: author.bot_id,
            })
            .await
    }

    /// Consume one `inbound-events` delivery.
    ///
    /// Every channel holding a message of the batch from a non-bot author
    /// gets one `continue` dispatch for its present bots. Messages stored by
    /// an earlier delivery count too: a redelivered batch retries dispatches
    /// that failed the first time. Channels are attempted independently and
    /// the last failure is returned.
    pub async fn handle_inbound(&self, batch: InboundBatch) -> Result<(), ChorusError> {
        let stored = self.ingest_batch(batch.provider, &batch.messages).await?;

        let mut channels: HashMap<Uuid, Channel> = HashMap::new();
        for item in stored {
            if !item.author.is_bot() {
                channels.entry(item.channel.id).or_insert(item.channel);
            }
        }

        let mut failure = None;
        for channel in channels.into_values() {
            if let Err(e) = self.continue_channel(&channel).await {
                warn!("inbound: continue in {} failed: {e}", channel.name);
                failure = Some(e);
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn continue_channel(&self, channel: &Channel) -> Result<(), ChorusError> {
        let bots = self.store.list_bots_in_channel(channel.id).await?;
        if bots.is_empty() {
            return Ok(());
        }
        self.dispatch_channel(TaskKind::Continue, &bots, channel, None)
            .await?;
        Ok(())
    }

    /// Pull messages the provider has that the store does not, and ingest them.
    pub async fn backfill(&self, channel: &Channel) -> Result<Vec<Message>, ChorusError> {
        let client = self.providers.get(channel.provider.as_str())?;
        let latest = self.store.latest_message(channel.id).await?;
        let cursor = latest.as_ref().map(|m| m.provider_id.as_str());

        let messages = client
            .channel(&channel.provider_id)
            .list_messages_since(cursor)
            .await?;
        self.ingest(channel.provider, &messages).await
    }

    /// Discover every provider's channels and catch up on the ones with bots.
    ///
    /// Failures are logged per provider and per channel; startup continues.
    pub async fn init_channels(&self) {
        for (name, provider) in self.providers.iter() {
            let infos = match provider.list_channels().await {
                Ok(infos) => infos,
                Err(e) => {
                    warn!("init: cannot list {name} channels: {e}");
                    continue;
                }
            };

            for info in infos {
                let channel = match self.store.upsert_channel(&info).await {
                    Ok((channel, _)) => channel,
                    Err(e) => {
                        warn!("init: cannot store channel {name}/{}: {e}", info.id);
                        continue;
                    }
                };

                match self.store.list_bots_in_channel(channel.id).await {
                    Ok(bots) if !bots.is_empty() => {}
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("init: cannot list bots in {}: {e}", channel.name);
                        continue;
                    }
                }

                match self.backfill(&channel).await {
                    Ok(new) => info!(
                        "init: {name}/{} backfilled {} message(s)",
                        channel.name,
                        new.len()
                    ),
                    Err(e) => warn!("init: backfill of {name}/{} failed: {e}", channel.name),
                }
            }
        }
    }
}
