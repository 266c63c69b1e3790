//! Transient units of work flowing through the generation queues.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::model::{Bot, Channel, Message, User, ADMIN_NAME};

/// Why a generation is being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Join,
    Leave,
    Continue,
    Instruct,
    Prepopulate,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Join => "join",
            Self::Leave => "leave",
            Self::Continue => "continue",
            Self::Instruct => "instruct",
            Self::Prepopulate => "prepopulate",
        };
        f.write_str(s)
    }
}

/// A request to let a set of bots sharing one generator react to a channel.
///
/// Carries the full visible history rather than a delta: generator calls
/// are stateless.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationTask {
    pub kind: TaskKind,
    /// Generator family shared by every bot in `bots`.
    pub generator: String,
    pub channel: Channel,
    /// Addressed roster, in dispatch order.
    pub bots: Vec<Bot>,
    /// Known authors of `messages`, including the admin pseudo-user.
    pub users: Vec<User>,
    /// Oldest first.
    pub messages: Vec<Message>,
    pub instruction: Option<String>,
}

impl GenerationTask {
    /// Find the author of a history message.
    pub fn author_of(&self, message: &Message) -> Option<&User> {
        self.users.iter().find(|u| u.id == message.author_id)
    }

    /// Whether the message was written by one of the addressed bots.
    pub fn is_from_addressed_bot(&self, message: &Message) -> bool {
        self.author_of(message)
            .and_then(|u| u.bot_id)
            .is_some_and(|bot_id| self.bots.iter().any(|b| b.id == bot_id))
    }

    /// Render a history message as a transcript line.
    ///
    /// Admin messages render as `Admin: content`, everything else as
    /// `HH:MM channel/name: content`.
    pub fn format_message(&self, message: &Message) -> String {
        match self.author_of(message) {
            Some(user) if user.is_admin() => format!("{ADMIN_NAME}: {}", message.content),
            Some(user) => format!(
                "{} {}/{}: {}",
                message.timestamp.format("%H:%M"),
                self.channel.name,
                user.name,
                message.content
            ),
            None => format!(
                "{} {}/unknown: {}",
                message.timestamp.format("%H:%M"),
                self.channel.name,
                message.content
            ),
        }
    }

    /// Comma-separated names of the addressed bots.
    pub fn bot_names(&self) -> String {
        self.bots
            .iter()
            .map(|b| b.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// One message a bot should emit.
#[derive(Debug, Clone, PartialEq)]
pub struct BotReply {
    pub bot: Bot,
    pub content: String,
}

/// Parsed output of one generation task, ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub task_id: Uuid,
    pub kind: TaskKind,
    pub channel: Channel,
    /// Follows the addressed roster order.
    pub replies: Vec<BotReply>,
    /// Bots that must leave the channel once their replies are sent.
    pub departing: Vec<Bot>,
}
