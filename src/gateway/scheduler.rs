//! Conversation initiation for quiet channels.

use super::Gateway;
use chorus_core::{config::SchedulerConfig, error::ChorusError, model::Channel, task::TaskKind};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

impl Gateway {
    /// Background task: nudge bots in channels where they have gone quiet.
    pub(super) async fn scheduler_loop(
        self: Arc<Self>,
        config: SchedulerConfig,
        shutdown: CancellationToken,
    ) {
        let period = std::time::Duration::from_secs(config.poll_interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        // The first tick fires immediately; skip it so startup backfill settles.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let cutoff = Utc::now() - Duration::minutes(config.initiate_after_minutes);
            match self.initiate_quiet_channels(cutoff).await {
                Ok(0) => {}
                Ok(n) => info!("scheduler: initiated conversation in {n} channel(s)"),
                Err(e) => error!("scheduler: {e}"),
            }
        }
    }

    /// Dispatch an initiation instruction to every channel whose bots have
    /// not spoken since `cutoff`. Returns the number of channels nudged.
    ///
    /// A failing channel is logged and skipped; the others are still nudged.
    pub async fn initiate_quiet_channels(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, ChorusError> {
        let mut nudged = 0;
        for channel in self.store.list_channels_with_bots().await? {
            match self.initiate_if_quiet(&channel, cutoff).await {
                Ok(true) => nudged += 1,
                Ok(false) => {}
                Err(e) => warn!("scheduler: cannot nudge {}: {e}", channel.name),
            }
        }
        Ok(nudged)
    }

    async fn initiate_if_quiet(
        &self,
        channel: &Channel,
        cutoff: DateTime<Utc>,
    ) -> Result<bool, ChorusError> {
        let latest = self.store.latest_bot_message(channel.id).await?;
        if latest.is_some_and(|m| m.timestamp > cutoff) {
            return Ok(false);
        }

        let bots = self.store.list_bots_in_channel(channel.id).await?;
        let instruction = self.prompts.initiate.clone();
        let queued = self
            .dispatch_channel(TaskKind::Instruct, &bots, channel, Some(&instruction))
            .await?;
        Ok(queued > 0)
    }
}
