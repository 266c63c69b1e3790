//! Outbound delivery of generation results.

use super::Gateway;
use chorus_core::{error::ChorusError, task::GenerationResult};
use tracing::{info, warn};

impl Gateway {
    /// Consume one `generation-results` delivery.
    ///
    /// Sends each reply under its bot's identity. A failed send is logged and
    /// the rest still go out; there is no rollback. Departing bots leave
    /// after every reply has been attempted.
    pub async fn deliver(&self, result: GenerationResult) -> Result<(), ChorusError> {
        let provider = self.providers.get(result.channel.provider.as_str())?;
        let channel = provider.channel(&result.channel.provider_id);

        let mut sent = 0;
        for reply in &result.replies {
            match channel.send(&reply.bot, &reply.content).await {
                Ok(()) => sent += 1,
                Err(e) => warn!(
                    "delivery: {} -> {} failed: {e}",
                    reply.bot.name, result.channel.name
                ),
            }
        }

        for bot in &result.departing {
            match channel.leave(bot).await {
                Ok(()) => info!("delivery: {} left {}", bot.name, result.channel.name),
                Err(e) => warn!(
                    "delivery: {} could not leave {}: {e}",
                    bot.name, result.channel.name
                ),
            }
        }

        info!(
            "delivery: {}/{} {} message(s) sent to {}",
            sent,
            result.replies.len(),
            result.kind,
            result.channel.name
        );
        Ok(())
    }
}
