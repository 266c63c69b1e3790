use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::ProviderKind;

/// A provider-agnostic chat message, as translated by a gateway adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMessage {
    /// Provider-native message id, unique within its channel.
    pub provider_id: String,
    pub channel: ChannelInfo,
    pub author: CanonicalAuthor,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Author of a canonical message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalAuthor {
    /// Provider-native user id.
    pub id: String,
    pub name: String,
    /// Set by the adapter when the message was sent by one of our bots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_id: Option<Uuid>,
}

/// Channel identity and display name as reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub provider: ProviderKind,
    /// Provider-native channel id.
    pub id: String,
    pub name: String,
}

/// User profile as reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderUser {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub profile: String,
}

/// One provider's batch of canonical messages on the `inbound-events` topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundBatch {
    pub provider: ProviderKind,
    pub messages: Vec<CanonicalMessage>,
}
