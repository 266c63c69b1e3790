//! Live-client wire protocol: one JSON envelope per text frame.

use chorus_core::error::ChorusError;
use chorus_core::message::CanonicalMessage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Envelope type, in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Join,
    Message,
    Typing,
    Reconnect,
}

/// A client or server event.
///
/// Clients may omit fields; the server always populates `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Envelope {
    pub fn message(
        conversation_id: &str,
        user_id: &str,
        id: &str,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: EventKind::Message,
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
            content: content.to_string(),
            id: id.to_string(),
            last_message_id: None,
            timestamp: Some(timestamp),
        }
    }

    pub fn typing(conversation_id: &str, user_id: &str) -> Self {
        Self {
            kind: EventKind::Typing,
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
            content: String::new(),
            id: String::new(),
            last_message_id: None,
            timestamp: None,
        }
    }

    /// Server-side rendering of a canonical message.
    pub fn from_canonical(message: &CanonicalMessage) -> Self {
        Self::message(
            &message.channel.id,
            &message.author.name,
            &message.provider_id,
            &message.content,
            message.timestamp,
        )
    }

    pub fn decode(text: &str) -> Result<Self, ChorusError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode(&self) -> Result<String, ChorusError> {
        Ok(serde_json::to_string(self)?)
    }
}
