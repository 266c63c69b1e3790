//! Persistent domain entities: channels, users, bots, and messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ChorusError;

/// Display name of the administrative pseudo-user.
pub const ADMIN_NAME: &str = "Admin";

/// The chat surface an entity originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Discord,
    Slack,
    Web,
    /// Instruction-only messages written by an operator.
    Admin,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discord => "discord",
            Self::Slack => "slack",
            Self::Web => "web",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ChorusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discord" => Ok(Self::Discord),
            "slack" => Ok(Self::Slack),
            "web" => Ok(Self::Web),
            "admin" => Ok(Self::Admin),
            other => Err(ChorusError::UnknownBackend(format!("provider {other}"))),
        }
    }
}

/// A conversation space on some provider.
///
/// Identity is `(provider, provider_id)`; `provider_id` never changes after
/// creation while `name` may be refreshed by later discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: Uuid,
    pub provider: ProviderKind,
    pub provider_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A message author as seen by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub provider: ProviderKind,
    pub provider_id: String,
    pub name: String,
    #[serde(default)]
    pub profile: String,
    /// Weak back-reference when this author is one of our bots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_id: Option<Uuid>,
}

impl User {
    /// The operator pseudo-user that authors instruction messages.
    pub fn admin() -> Self {
        Self {
            id: Uuid::nil(),
            provider: ProviderKind::Admin,
            provider_id: "admin".to_string(),
            name: ADMIN_NAME.to_string(),
            profile: String::new(),
            bot_id: None,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.id.is_nil()
    }

    pub fn is_bot(&self) -> bool {
        self.bot_id.is_some()
    }
}

/// A persona that speaks in channels through a generator backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bot {
    pub id: Uuid,
    pub name: String,
    /// System profile text describing the persona.
    pub profile: String,
    /// The prompt the persona was created from.
    pub prompt: String,
    /// PNG bytes. Served separately, never inlined in JSON.
    #[serde(skip, default)]
    pub avatar: Option<Vec<u8>>,
    /// Generator family this bot is bound to (e.g. "openai").
    pub generator: String,
    pub created_at: DateTime<Utc>,
}

/// A stored chat message.
///
/// `(channel_id, provider_id)` is unique: re-ingesting the same provider
/// message is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub provider_id: String,
    pub author_id: Uuid,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}
