use crate::{
    error::ChorusError,
    message::{CanonicalMessage, ChannelInfo, ProviderUser},
    model::{Bot, ProviderKind},
    prompt::Prompt,
};
use async_trait::async_trait;
use std::sync::Arc;

/// A language-model backend.
///
/// Every language-model backend (OpenAI, Gemini, etc.) implements this
/// trait. Implementations return raw text; parsing is the caller's job.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generator family name, as bots reference it.
    fn name(&self) -> &str;

    /// One-shot completion of a single prompt.
    async fn ask(&self, prompt: &str) -> Result<String, ChorusError>;

    /// Continue a multi-party conversation.
    async fn continue_chat(&self, prompt: &Prompt) -> Result<String, ChorusError>;

    /// Generate a PNG avatar from a description.
    async fn generate_avatar(&self, prompt: &str) -> Result<Vec<u8>, ChorusError>;

    /// Check if the backend is configured and reachable.
    async fn is_available(&self) -> bool;
}

/// One chat surface.
///
/// Discord-like gateways, Slack-like gateways, and the native web channel
/// all sit behind this boundary.
#[async_trait]
pub trait ChannelProvider: Send + Sync {
    /// Provider family.
    fn kind(&self) -> ProviderKind;

    /// Discover every channel visible to this provider.
    async fn list_channels(&self) -> Result<Vec<ChannelInfo>, ChorusError>;

    /// Fetch a user profile by provider-native id.
    async fn get_user(&self, id: &str) -> Result<ProviderUser, ChorusError>;

    /// Handle to one channel by provider-native id.
    fn channel(&self, id: &str) -> Arc<dyn ProviderChannel>;
}

/// Operations on a single provider channel.
#[async_trait]
pub trait ProviderChannel: Send + Sync {
    /// Post `content` under the bot's identity (name and avatar).
    async fn send(&self, bot: &Bot, content: &str) -> Result<(), ChorusError>;

    /// Messages newer than the provider-native message id `cursor`,
    /// or the available backlog when `cursor` is `None`.
    async fn list_messages_since(
        &self,
        cursor: Option<&str>,
    ) -> Result<Vec<CanonicalMessage>, ChorusError>;

    /// Current channel identity and name.
    async fn info(&self) -> Result<ChannelInfo, ChorusError>;

    /// Make the bot a visible member of the channel.
    async fn join(&self, _bot: &Bot) -> Result<(), ChorusError> {
        Ok(())
    }

    /// Remove the bot from the channel.
    async fn leave(&self, _bot: &Bot) -> Result<(), ChorusError> {
        Ok(())
    }
}
