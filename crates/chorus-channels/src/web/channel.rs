use std::sync::Arc;

use async_trait::async_trait;
use chorus_core::{
    error::ChorusError,
    message::{CanonicalAuthor, CanonicalMessage, ChannelInfo, InboundBatch, ProviderUser},
    model::{Bot, ProviderKind},
    queue::Topic,
    traits::{ChannelProvider, ProviderChannel},
};
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use super::hub::HubHandle;
use super::protocol::Envelope;

/// Provider-native author id of a bot speaking on the web channel.
pub fn bot_author_id(bot: &Bot) -> String {
    format!("bot:{}", bot.id)
}

/// The native web channel. Conversations are identified by the
/// client-chosen `conversationId`.
pub struct WebChannelProvider {
    hub: HubHandle,
    inbound: Topic<InboundBatch>,
}

impl WebChannelProvider {
    pub fn new(hub: HubHandle, inbound: Topic<InboundBatch>) -> Self {
        Self { hub, inbound }
    }
}

#[async_trait]
impl ChannelProvider for WebChannelProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Web
    }

    /// Web conversations come into existence when a client joins them.
    async fn list_channels(&self) -> Result<Vec<ChannelInfo>, ChorusError> {
        Ok(Vec::new())
    }

    async fn get_user(&self, id: &str) -> Result<ProviderUser, ChorusError> {
        Ok(ProviderUser {
            id: id.to_string(),
            name: id.to_string(),
            profile: String::new(),
        })
    }

    fn channel(&self, id: &str) -> Arc<dyn ProviderChannel> {
        Arc::new(WebChannel {
            conversation_id: id.to_string(),
            hub: self.hub.clone(),
            inbound: self.inbound.clone(),
        })
    }
}

struct WebChannel {
    conversation_id: String,
    hub: HubHandle,
    inbound: Topic<InboundBatch>,
}

impl WebChannel {
    fn channel_info(&self) -> ChannelInfo {
        ChannelInfo {
            provider: ProviderKind::Web,
            id: self.conversation_id.clone(),
            name: self.conversation_id.clone(),
        }
    }
}

#[async_trait]
impl ProviderChannel for WebChannel {
    /// Broadcast to live clients, then feed the message back through
    /// ingestion so it is stored like any other.
    async fn send(&self, bot: &Bot, content: &str) -> Result<(), ChorusError> {
        let message = CanonicalMessage {
            provider_id: Uuid::new_v4().to_string(),
            channel: self.channel_info(),
            author: CanonicalAuthor {
                id: bot_author_id(bot),
                name: bot.name.clone(),
                bot_id: Some(bot.id),
            },
            content: content.to_string(),
            timestamp: Utc::now(),
        };

        let report = self
            .hub
            .broadcast(&self.conversation_id, &Envelope::from_canonical(&message))
            .await?;
        debug!(
            "web: {} -> {} ({} delivered)",
            bot.name, self.conversation_id, report.delivered
        );

        self.inbound
            .publish(InboundBatch {
                provider: ProviderKind::Web,
                messages: vec![message],
            })
            .await
    }

    /// History lives in the store; the hub keeps none.
    async fn list_messages_since(
        &self,
        _cursor: Option<&str>,
    ) -> Result<Vec<CanonicalMessage>, ChorusError> {
        Ok(Vec::new())
    }

    async fn info(&self) -> Result<ChannelInfo, ChorusError> {
        Ok(self.channel_info())
    }
}
