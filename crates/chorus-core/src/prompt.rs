use serde::{Deserialize, Serialize};

/// Speaker role of a prompt entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single entry in the prompt transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptEntry {
    pub role: Role,
    pub content: String,
}

/// A chat-completion request handed to a generator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    /// Persona and routing instructions.
    pub system: String,
    /// Transcript lines, oldest first. The last entry is the routing turn.
    pub entries: Vec<PromptEntry>,
}

impl Prompt {
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.entries.push(PromptEntry {
            role,
            content: content.into(),
        });
    }

    /// Flatten into a single text for backends that take one input.
    pub fn to_prompt_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.entries.len() + 1);
        if !self.system.is_empty() {
            parts.push(self.system.clone());
        }
        for entry in &self.entries {
            parts.push(entry.content.clone());
        }
        parts.join("\n\n")
    }
}
