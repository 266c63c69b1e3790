use std::collections::HashMap;

use super::shellexpand;

/// Prompt templates, overridable from `{data_dir}/prompts/PROMPTS.md`.
///
/// Placeholders: `{channel}` (channel name), `{bots}` (comma-separated bot
/// names), `{name}` and `{description}` (persona name and description).
#[derive(Debug, Clone)]
pub struct Prompts {
    /// Opens the system prompt, before the persona profiles.
    pub persona: String,
    /// Routing instruction: who may answer and in what format.
    pub response: String,
    /// Task suffix for `continue`.
    pub reply: String,
    /// Task suffix for `join`.
    pub intro: String,
    /// Task suffix for `leave`.
    pub goodbye: String,
    /// Task suffix for `prepopulate`.
    pub prepopulate: String,
    /// Scheduler instruction for quiet channels.
    pub initiate: String,
    /// Turns a short description into a persona profile.
    pub create_persona: String,
    /// Avatar image prompt.
    pub avatar: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            persona: "You voice several characters taking part in a group chat. \
                      Stay in character, keep messages short and conversational, \
                      and never mention that you are a language model.\n\
                      The characters are:"
                .into(),
            response: "Decide which of these characters reply next: {bots}.\n\
                       Answer with a YAML block fenced by ``` where each key is a character name \
                       and each value is that character's message. Use None as the value for a \
                       character that stays silent. Do not add anything outside the block."
                .into(),
            reply: "Reply to the latest messages if your characters have something to add.".into(),
            intro: "Your characters just joined the channel {channel}. Introduce them briefly.".into(),
            goodbye: "Your characters are leaving the channel {channel}. Say goodbye.".into(),
            prepopulate: "The channel {channel} is brand new. Start an interesting conversation \
                          between your characters about something they care about."
                .into(),
            initiate: "Continue a discussion with a character or start a completely random new one."
                .into(),
            create_persona: "Write a short profile for a chat character named {name} based on this \
                             description: {description}\n\
                             Cover personality, interests, and way of speaking in under 120 words. \
                             Write in the second person."
                .into(),
            avatar: "A friendly square avatar portrait for a chat character. {description}".into(),
        }
    }
}

impl Prompts {
    /// Load overrides from `{data_dir}/prompts/PROMPTS.md`.
    ///
    /// Sections are `## Name` headers; missing file or sections keep defaults.
    pub fn load(data_dir: &str) -> Self {
        let mut prompts = Self::default();
        let dir = shellexpand(data_dir);
        let path = format!("{dir}/prompts/PROMPTS.md");

        let Ok(content) = std::fs::read_to_string(&path) else {
            return prompts;
        };

        let sections = parse_markdown_sections(&content);
        for (name, slot) in [
            ("Persona", &mut prompts.persona),
            ("Response", &mut prompts.response),
            ("Reply", &mut prompts.reply),
            ("Intro", &mut prompts.intro),
            ("Goodbye", &mut prompts.goodbye),
            ("Prepopulate", &mut prompts.prepopulate),
            ("Initiate", &mut prompts.initiate),
            ("Create Persona", &mut prompts.create_persona),
            ("Avatar", &mut prompts.avatar),
        ] {
            if let Some(v) = sections.get(name) {
                *slot = v.clone();
            }
        }
        tracing::info!("loaded prompts from {path}");
        prompts
    }
}

/// Split markdown into `## Header` -> trimmed body. Empty bodies are skipped.
pub(super) fn parse_markdown_sections(content: &str) -> HashMap<String, String> {
    let mut sections = HashMap::new();
    let mut current: Option<(String, String)> = None;

    for line in content.lines() {
        if let Some(header) = line.strip_prefix("## ") {
            if let Some((key, body)) = current.take() {
                insert_section(&mut sections, key, &body);
            }
            current = Some((header.trim().to_string(), String::new()));
        } else if let Some((_, body)) = current.as_mut() {
            body.push_str(line);
            body.push('\n');
        }
    }
    if let Some((key, body)) = current {
        insert_section(&mut sections, key, &body);
    }

    sections
}

fn insert_section(sections: &mut HashMap<String, String>, key: String, body: &str) {
    let trimmed = body.trim();
    if !trimmed.is_empty() {
        sections.insert(key, trimmed.to_string());
    }
}
