//! Response router: prompt assembly, reply parsing, result publishing.

use super::Gateway;
use chorus_core::{
    config::Prompts,
    error::ChorusError,
    model::ADMIN_NAME,
    prompt::{Prompt, Role},
    task::{BotReply, GenerationResult, GenerationTask, TaskKind},
};
use std::collections::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

const FENCE: &str = "```";
const NO_REPLY: &str = "None";

/// Build the generator request for a task.
///
/// The system prompt carries the persona profiles. History follows as
/// transcript lines, with the addressed bots' own lines as assistant turns.
/// A final admin turn states the task and who may answer.
pub fn build_prompt(task: &GenerationTask, prompts: &Prompts) -> Prompt {
    let mut system = prompts.persona.clone();
    for bot in &task.bots {
        system.push_str(&format!("\n{}: {}", bot.name, bot.profile));
    }
    let mut prompt = Prompt::new(system);

    for message in &task.messages {
        let role = if task.is_from_addressed_bot(message) {
            Role::Assistant
        } else {
            Role::User
        };
        prompt.push(role, task.format_message(message));
    }

    let instruction = task_instruction(task, prompts);
    let routing = prompts.response.replace("{bots}", &task.bot_names());
    let closing = if instruction.is_empty() {
        routing
    } else {
        format!("{instruction}\n\n{routing}")
    };
    prompt.push(Role::User, format!("{ADMIN_NAME}: {closing}"));
    prompt
}

fn task_instruction(task: &GenerationTask, prompts: &Prompts) -> String {
    let suffix = match task.kind {
        TaskKind::Join => prompts.intro.as_str(),
        TaskKind::Leave => prompts.goodbye.as_str(),
        TaskKind::Continue => prompts.reply.as_str(),
        TaskKind::Prepopulate => prompts.prepopulate.as_str(),
        TaskKind::Instruct => "",
    };
    let suffix = suffix.replace("{channel}", &task.channel.name);

    match task.instruction.as_deref().map(str::trim) {
        Some(extra) if !extra.is_empty() && !suffix.is_empty() => format!("{extra}\n{suffix}"),
        Some(extra) if !extra.is_empty() => extra.to_string(),
        _ => suffix,
    }
}

/// The body of the first fenced block, or the whole text if there is none.
///
/// The language tag on the opening fence line is skipped. An unterminated
/// block runs to the end of the text.
pub fn extract_block(raw: &str) -> &str {
    let Some(start) = raw.find(FENCE) else {
        return raw;
    };
    let after = &raw[start + FENCE.len()..];
    let body = match after.find('\n') {
        Some(nl) => &after[nl + 1..],
        None => after,
    };
    match body.find(FENCE) {
        Some(end) => &body[..end],
        None => body,
    }
}

/// Parse a reply block into `(bot name, content)` pairs.
///
/// Keys may be namespaced as `channel/name`; only the last segment is kept.
/// Entries whose key or value is the no-reply sentinel, or whose value is
/// empty, are dropped. Output follows the block's order.
pub fn parse_replies(raw: &str) -> Vec<(String, String)> {
    let block = extract_block(raw);
    let entries = parse_yaml(block).unwrap_or_else(|| parse_lines(block));

    entries
        .into_iter()
        .filter_map(|(key, value)| {
            let name = key.rsplit('/').next().unwrap_or_default().trim().to_string();
            let value = value.trim().to_string();
            if name.is_empty() || name == NO_REPLY || value.is_empty() || value == NO_REPLY {
                None
            } else {
                Some((name, value))
            }
        })
        .collect()
}

fn parse_yaml(block: &str) -> Option<Vec<(String, String)>> {
    let mapping: serde_yaml::Mapping = serde_yaml::from_str(block).ok()?;
    let mut entries = Vec::new();
    for (key, value) in mapping {
        let Some(key) = scalar(&key) else {
            continue;
        };
        match scalar(&value) {
            Some(value) => entries.push((key, value)),
            None if value.is_null() => {}
            None => warn!("router: reply for {key} is not text, dropped"),
        }
    }
    Some(entries)
}

fn scalar(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Lenient `name: content` reading for blocks YAML rejects, such as replies
/// that contain a colon.
fn parse_lines(block: &str) -> Vec<(String, String)> {
    block
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| {
            let v = v.trim();
            let v = v
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .unwrap_or(v);
            (k.trim().to_string(), v.to_string())
        })
        .collect()
}

/// Match parsed entries to the addressed roster, in roster order.
///
/// Names outside the roster are logged and dropped.
pub(crate) fn route_replies(task: &GenerationTask, entries: Vec<(String, String)>) -> Vec<BotReply> {
    let mut by_name: HashMap<String, String> = HashMap::new();
    for (name, content) in entries {
        if task.bots.iter().any(|b| b.name == name) {
            by_name.insert(name, content);
        } else {
            warn!(
                "router: {} answered as unknown bot {name:?} in {}",
                task.generator, task.channel.name
            );
        }
    }

    task.bots
        .iter()
        .filter_map(|bot| {
            by_name.remove(&bot.name).map(|content| BotReply {
                bot: bot.clone(),
                content,
            })
        })
        .collect()
}

impl Gateway {
    /// Consume one `generation-tasks` delivery.
    pub async fn handle_task(&self, task: GenerationTask) -> Result<(), ChorusError> {
        let generator = self.generators.get(&task.generator)?;
        let prompt = build_prompt(&task, &self.prompts);

        let raw = generator.continue_chat(&prompt).await?;
        debug!("router: {} raw response: {raw}", task.generator);

        let replies = route_replies(&task, parse_replies(&raw));
        let departing = if task.kind == TaskKind::Leave {
            task.bots.clone()
        } else {
            Vec::new()
        };

        if replies.is_empty() && departing.is_empty() {
            info!(
                "router: {} task in {} produced no replies",
                task.kind, task.channel.name
            );
            return Ok(());
        }

        info!(
            "router: {} task in {} -> {} reply(ies)",
            task.kind,
            task.channel.name,
            replies.len()
        );
        self.results
            .publish(GenerationResult {
                task_id: Uuid::new_v4(),
                kind: task.kind,
                channel: task.channel,
                replies,
                departing,
            })
            .await
    }
}
