//! Application handler for live web-client events.

use super::Gateway;
use async_trait::async_trait;
use chorus_channels::web::{ClientEventHandler, ConnectionId, Envelope, EventKind, HubHandle};
use chorus_core::{
    error::ChorusError,
    message::{CanonicalAuthor, CanonicalMessage, ChannelInfo, InboundBatch},
    model::{Bot, Channel, ProviderKind},
    queue::Topic,
    task::TaskKind,
};
use chrono::Utc;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Turns client events into hub fan-out and pipeline input.
pub struct WebEvents {
    gateway: Arc<Gateway>,
    hub: HubHandle,
    inbound: Topic<InboundBatch>,
    /// Bots assigned to a brand-new conversation.
    seed_bots: usize,
}

impl WebEvents {
    pub fn new(
        gateway: Arc<Gateway>,
        hub: HubHandle,
        inbound: Topic<InboundBatch>,
        seed_bots: usize,
    ) -> Self {
        Self {
            gateway,
            hub,
            inbound,
            seed_bots,
        }
    }

    async fn on_join(&self, conn: ConnectionId, event: &Envelope) -> Result<(), ChorusError> {
        self.hub.subscribe(conn, &event.conversation_id).await?;
        let (channel, created) = self
            .gateway
            .store
            .upsert_channel(&conversation_info(&event.conversation_id))
            .await?;
        if created {
            info!("web: new conversation {}", channel.provider_id);
            self.seed(&channel).await?;
        }
        Ok(())
    }

    /// Put a few random bots into a fresh conversation and get them talking.
    async fn seed(&self, channel: &Channel) -> Result<(), ChorusError> {
        if self.seed_bots == 0 {
            return Ok(());
        }
        let all = self.gateway.store.list_bots().await?;
        let chosen: Vec<Bot> = all
            .choose_multiple(&mut rand::thread_rng(), self.seed_bots)
            .cloned()
            .collect();
        if chosen.is_empty() {
            return Ok(());
        }

        for bot in &chosen {
            self.gateway.store.add_bot_to_channel(bot.id, channel.id).await?;
        }
        self.gateway
            .dispatch_channel(TaskKind::Prepopulate, &chosen, channel, None)
            .await?;
        Ok(())
    }

    async fn on_message(&self, event: Envelope) -> Result<(), ChorusError> {
        if event.content.trim().is_empty() {
            debug!("web: empty message from {} ignored", event.user_id);
            return Ok(());
        }
        let message = CanonicalMessage {
            provider_id: if event.id.is_empty() {
                Uuid::new_v4().to_string()
            } else {
                event.id.clone()
            },
            channel: conversation_info(&event.conversation_id),
            author: CanonicalAuthor {
                id: event.user_id.clone(),
                name: event.user_id.clone(),
                bot_id: None,
            },
            content: event.content,
            timestamp: Utc::now(),
        };

        // Store first so a resent client id is not fanned out twice.
        let inserted = self
            .gateway
            .ingest(ProviderKind::Web, std::slice::from_ref(&message))
            .await?;
        if inserted.is_empty() {
            debug!(
                "web: message {} not stored (duplicate or rejected)",
                message.provider_id
            );
            return Ok(());
        }

        self.hub
            .broadcast(&event.conversation_id, &Envelope::from_canonical(&message))
            .await?;
        self.inbound
            .publish(InboundBatch {
                provider: ProviderKind::Web,
                messages: vec![message],
            })
            .await
    }

    async fn on_typing(&self, conn: ConnectionId, event: &Envelope) -> Result<(), ChorusError> {
        let typing = Envelope::typing(&event.conversation_id, &event.user_id);
        self.hub
            .broadcast_except(&event.conversation_id, &typing, conn)
            .await?;
        Ok(())
    }

    /// Resubscribe and replay everything after the client's last seen message.
    async fn on_reconnect(&self, conn: ConnectionId, event: &Envelope) -> Result<(), ChorusError> {
        self.hub.subscribe(conn, &event.conversation_id).await?;

        let store = &self.gateway.store;
        let Some(channel) = store
            .get_channel_by_provider_id(ProviderKind::Web, &event.conversation_id)
            .await?
        else {
            return Ok(());
        };

        let limit = self.gateway.history_limit;
        let missed = match event.last_message_id.as_deref() {
            Some(cursor) if !cursor.is_empty() => {
                store.messages_after(channel.id, cursor, limit).await?
            }
            _ => store.list_messages(channel.id, limit).await?,
        };
        if missed.is_empty() {
            return Ok(());
        }

        let names: HashMap<Uuid, String> = store
            .list_channel_users(channel.id)
            .await?
            .into_iter()
            .map(|u| (u.id, u.name))
            .collect();

        for message in &missed {
            let author = names
                .get(&message.author_id)
                .map(String::as_str)
                .unwrap_or("unknown");
            let envelope = Envelope::message(
                &event.conversation_id,
                author,
                &message.provider_id,
                &message.content,
                message.timestamp,
            );
            self.hub.send_to(conn, &envelope).await?;
        }
        debug!("web: replayed {} message(s) to {conn}", missed.len());
        Ok(())
    }
}

fn conversation_info(conversation_id: &str) -> ChannelInfo {
    ChannelInfo {
        provider: ProviderKind::Web,
        id: conversation_id.to_string(),
        name: conversation_id.to_string(),
    }
}

#[async_trait]
impl ClientEventHandler for WebEvents {
    async fn handle(&self, conn: ConnectionId, event: Envelope) {
        if event.conversation_id.is_empty() {
            warn!("web: {:?} event from {conn} without conversation", event.kind);
            return;
        }
        let kind = event.kind;
        let result = match kind {
            EventKind::Join => self.on_join(conn, &event).await,
            EventKind::Message => self.on_message(event).await,
            EventKind::Typing => self.on_typing(conn, &event).await,
            EventKind::Reconnect => self.on_reconnect(conn, &event).await,
        };
        if let Err(e) = result {
            warn!("web: {kind:?} from {conn} failed: {e}");
        }
    }
}
