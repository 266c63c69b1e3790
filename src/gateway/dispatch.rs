//! Task dispatcher: one generation task per (channel, generator family).

use super::Gateway;
use chorus_core::{
    error::ChorusError,
    model::{Bot, Channel, Message, User},
    task::{GenerationTask, TaskKind},
};
use tracing::{debug, warn};

/// Split the roster by generator family, keeping first-seen family order and
/// roster order within each family.
pub(crate) fn partition_tasks(
    kind: TaskKind,
    bots: &[Bot],
    channel: &Channel,
    users: &[User],
    messages: &[Message],
    instruction: Option<&str>,
) -> Vec<GenerationTask> {
    let mut families: Vec<(String, Vec<Bot>)> = Vec::new();
    for bot in bots {
        match families.iter_mut().find(|(g, _)| *g == bot.generator) {
            Some((_, group)) => group.push(bot.clone()),
            None => families.push((bot.generator.clone(), vec![bot.clone()])),
        }
    }

    families
        .into_iter()
        .map(|(generator, bots)| GenerationTask {
            kind,
            generator,
            channel: channel.clone(),
            bots,
            users: users.to_vec(),
            messages: messages.to_vec(),
            instruction: instruction.map(str::to_string),
        })
        .collect()
}

impl Gateway {
    /// Queue generation tasks for `bots` with an explicit history snapshot.
    ///
    /// Returns the number of tasks queued. A publish failure is logged, the
    /// remaining partitions are still attempted, and the last error is
    /// returned; the queue's redelivery is the only retry.
    pub async fn dispatch(
        &self,
        kind: TaskKind,
        bots: &[Bot],
        channel: &Channel,
        users: &[User],
        history: &[Message],
        instruction: Option<&str>,
    ) -> Result<usize, ChorusError> {
        let tasks = partition_tasks(kind, bots, channel, users, history, instruction);
        let mut queued = 0;
        let mut failure = None;

        for task in tasks {
            let generator = task.generator.clone();
            let count = task.bots.len();
            match self.tasks.publish(task).await {
                Ok(()) => {
                    queued += 1;
                    debug!(
                        "dispatch: {kind} for {count} {generator} bot(s) in {}",
                        channel.name
                    );
                }
                Err(e) => {
                    warn!("dispatch: {kind} for {generator} in {} failed: {e}", channel.name);
                    failure = Some(e);
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(queued),
        }
    }

    /// Dispatch with the channel's stored history and authors.
    ///
    /// The admin pseudo-user is always part of the roster so instruction
    /// messages render correctly.
    pub async fn dispatch_channel(
        &self,
        kind: TaskKind,
        bots: &[Bot],
        channel: &Channel,
        instruction: Option<&str>,
    ) -> Result<usize, ChorusError> {
        if bots.is_empty() {
            return Ok(0);
        }
        let history = self.store.list_messages(channel.id, self.history_limit).await?;
        let mut users = self.store.list_channel_users(channel.id).await?;
        if !users.iter().any(User::is_admin) {
            users.push(User::admin());
        }
        self.dispatch(kind, bots, channel, &users, &history, instruction)
            .await
    }
}
